//! Command line argument parsing
//!
//! This module handles CLI argument parsing with subcommands:
//! - `chat`: Send a prompt through the router
//! - `embed`: Compute embeddings for one or more texts
//! - `status`: Show provider metrics, breaker states and spend
//! - `health`: Probe every configured provider once
//! - `show-config`: Show configuration discovery information
//! - `init-config`: Write a default user configuration file

use crate::routing::{RequestContext, RequestPriority};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    Chat(ChatConfig),
    Embed(EmbedConfig),
    Status,
    Health,
    ShowConfig,
    InitConfig,
}

#[derive(Debug)]
pub struct ChatConfig {
    pub prompt: String,
    pub system: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stream: bool,
    pub context: RequestContext,
}

#[derive(Debug)]
pub struct EmbedConfig {
    pub texts: Vec<String>,
    pub model: Option<String>,
    pub context: RequestContext,
}

#[derive(Debug, Parser)]
#[command(name = "llm-relay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Route LLM requests across providers with fallback, retries, circuit breaking and budgets"
)]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path (skips discovery)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Send a prompt through the router
    Chat {
        /// User prompt
        prompt: String,
        /// System prompt
        #[arg(short = 's', long = "system")]
        system: Option<String>,
        /// Model override passed to the chosen provider
        #[arg(short = 'm', long = "model")]
        model: Option<String>,
        #[arg(long = "max-tokens")]
        max_tokens: Option<u32>,
        #[arg(short = 't', long = "temperature")]
        temperature: Option<f32>,
        /// Request priority: low, normal, high or critical
        #[arg(short = 'p', long = "priority", default_value = "normal")]
        priority: RequestPriority,
        /// Stream the response as it is generated
        #[arg(long = "stream")]
        stream: bool,
        /// Prefer this provider (can be used multiple times)
        #[arg(long = "prefer", value_name = "NAME")]
        prefer: Vec<String>,
        /// Never route to this provider (can be used multiple times)
        #[arg(long = "exclude", value_name = "NAME")]
        exclude: Vec<String>,
        /// Only route to providers carrying one of these tags
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        /// Declared cost of the request in USD, checked against the per-request ceiling
        #[arg(long = "max-cost")]
        max_cost: Option<f64>,
    },
    /// Compute embeddings for one or more texts
    Embed {
        /// Texts to embed
        #[arg(required = true)]
        texts: Vec<String>,
        /// Embedding model override
        #[arg(short = 'm', long = "model")]
        model: Option<String>,
        /// Prefer this provider (can be used multiple times)
        #[arg(long = "prefer", value_name = "NAME")]
        prefer: Vec<String>,
    },
    /// Show provider metrics, breaker states and daily spend
    Status,
    /// Probe every configured provider once
    Health,
    /// Show configuration discovery information
    ShowConfig,
    /// Write a default configuration file to ~/.llm-relay/config.toml
    InitConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Chat {
                prompt,
                system,
                model,
                max_tokens,
                temperature,
                priority,
                stream,
                prefer,
                exclude,
                tags,
                max_cost,
            }) => {
                if prompt.trim().is_empty() {
                    return Err("Prompt must not be empty".to_string());
                }

                let mut context = RequestContext::new()
                    .with_priority(*priority)
                    .with_tags(tags.iter().cloned());
                context.require_streaming = *stream;
                context.max_cost = *max_cost;
                for name in prefer {
                    context = context.prefer(name.clone());
                }
                for name in exclude {
                    context = context.exclude(name.clone());
                }

                Ok(ExecutionMode::Chat(ChatConfig {
                    prompt: prompt.clone(),
                    system: system.clone(),
                    model: model.clone(),
                    max_tokens: *max_tokens,
                    temperature: *temperature,
                    stream: *stream,
                    context,
                }))
            }
            Some(Commands::Embed {
                texts,
                model,
                prefer,
            }) => {
                let context = prefer
                    .iter()
                    .fold(RequestContext::new(), |context, name| context.prefer(name.clone()));
                Ok(ExecutionMode::Embed(EmbedConfig {
                    texts: texts.clone(),
                    model: model.clone(),
                    context,
                }))
            }
            Some(Commands::Status) => Ok(ExecutionMode::Status),
            Some(Commands::Health) => Ok(ExecutionMode::Health),
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            Some(Commands::InitConfig) => Ok(ExecutionMode::InitConfig),
            None => Err(
                "No command specified. Use 'llm-relay --help' to see available commands."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        <Args as Parser>::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_chat_command() {
        let args = parse(&[
            "llm-relay",
            "--config",
            "relay.toml",
            "chat",
            "hello there",
            "--system",
            "be brief",
            "--priority",
            "critical",
            "--prefer",
            "claude-sonnet",
            "--exclude",
            "openai-gpt4",
            "--tag",
            "writing",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("relay.toml")));

        let ExecutionMode::Chat(config) = args.mode().unwrap() else {
            panic!("Expected Chat mode");
        };
        assert_eq!(config.prompt, "hello there");
        assert_eq!(config.system.as_deref(), Some("be brief"));
        assert!(!config.stream);
        assert!(config.context.is_critical());
        assert!(config.context.preferred_providers.contains("claude-sonnet"));
        assert!(config.context.excluded_providers.contains("openai-gpt4"));
        assert!(config.context.tags.contains("writing"));
    }

    #[test]
    fn test_chat_defaults_and_stream() {
        let args = parse(&["llm-relay", "chat", "hi", "--stream"]);
        let ExecutionMode::Chat(config) = args.mode().unwrap() else {
            panic!("Expected Chat mode");
        };
        assert!(config.stream);
        assert!(config.context.require_streaming);
        assert_eq!(config.context.priority, RequestPriority::Normal);
        assert!(config.context.tags.is_empty());
    }

    #[test]
    fn test_invalid_priority_rejected() {
        let result = <Args as Parser>::try_parse_from(["llm-relay", "chat", "hi", "-p", "urgent"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_prompt_rejected() {
        let args = parse(&["llm-relay", "chat", "  "]);
        assert!(args.mode().is_err());
    }

    #[test]
    fn test_embed_command() {
        let args = parse(&["llm-relay", "embed", "one", "two", "--model", "small"]);
        let ExecutionMode::Embed(config) = args.mode().unwrap() else {
            panic!("Expected Embed mode");
        };
        assert_eq!(config.texts, vec!["one", "two"]);
        assert_eq!(config.model.as_deref(), Some("small"));
    }

    #[test]
    fn test_embed_requires_text() {
        assert!(<Args as Parser>::try_parse_from(["llm-relay", "embed"]).is_err());
    }

    #[test]
    fn test_simple_commands() {
        assert!(matches!(
            parse(&["llm-relay", "status"]).mode().unwrap(),
            ExecutionMode::Status
        ));
        assert!(matches!(
            parse(&["llm-relay", "health"]).mode().unwrap(),
            ExecutionMode::Health
        ));
        assert!(matches!(
            parse(&["llm-relay", "show-config"]).mode().unwrap(),
            ExecutionMode::ShowConfig
        ));
        assert!(matches!(
            parse(&["llm-relay", "init-config"]).mode().unwrap(),
            ExecutionMode::InitConfig
        ));
    }

    #[test]
    fn test_no_command_error() {
        let args = Args {
            config: None,
            command: None,
        };
        assert!(args.mode().is_err());
    }
}
