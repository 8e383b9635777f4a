//! Environment constants and path utilities for llm-relay.
//!
//! Centralizes the file and directory names used by configuration discovery
//! and the environment variables adapters read their credentials from.

use std::path::{Path, PathBuf};

/// Application directory name (hidden directory like .git, .vscode)
pub const RELAY_DIR_NAME: &str = ".llm-relay";

/// System-wide configuration directory name under /etc
pub const SYSTEM_DIR_NAME: &str = "llm-relay";

/// Configuration file name inside an application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Stand-alone configuration file name in the working directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "llm-relay.toml";

/// Default logging filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "llm_relay=info";

/// Environment variables consulted for API keys
pub mod keys {
    pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
    pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
    /// Fallback for `generic` OpenAI-compatible endpoints
    pub const GENERIC_API_KEY: &str = "LLM_RELAY_API_KEY";
}

/// Build the config directory path in the user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(RELAY_DIR_NAME)
}

/// Build the config file path in the user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build the stand-alone config file path in a directory
pub fn local_config_toml_path(current_dir: &Path) -> PathBuf {
    current_dir.join(LOCAL_CONFIG_FILE_NAME)
}

/// Build the local config file path (`.llm-relay/config.toml`) in a directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(RELAY_DIR_NAME).join(CONFIG_FILE_NAME)
}

#[cfg(unix)]
pub fn system_config_file_path() -> PathBuf {
    Path::new("/etc")
        .join(SYSTEM_DIR_NAME)
        .join(CONFIG_FILE_NAME)
}
