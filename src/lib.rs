//! # llm-relay
//!
//! A routing core that spreads chat, streaming and embedding requests across
//! several LLM providers and keeps serving when some of them misbehave.
//!
//! ## Architecture Overview
//!
//! - **[`config`]**: TOML configuration for providers, routing policy, budgets and caching
//! - **[`llm`]**: Provider-agnostic adapter interface with OpenAI and Claude HTTP adapters
//! - **[`routing`]**: Circuit breakers, retries, selection, caching, budgets and the admission queue
//! - **[`cli`]**: Argument parsing and configuration discovery for the `llm-relay` binary
//!
//! ## Features
//!
//! ### Resilience
//! - **Circuit Breaking**: Per-provider breakers with a single half-open trial
//! - **Retries**: Bounded exponential backoff around every provider call
//! - **Fallback**: Ordered fallback across candidates, or fail fast
//!
//! ### Control
//! - **Routing Strategies**: Priority, round robin, weighted, cost optimized, latency optimized
//! - **Budgets**: Per-request cost ceiling and a daily budget that resets at local midnight
//! - **Admission**: FIFO queue with request spacing; critical requests skip it
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use llm_relay::llm::HttpProviderFactory;
//! use llm_relay::{ChatOptions, LLMManager, Message, RelayConfig, RequestContext};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = LLMManager::new(RelayConfig::default(), &HttpProviderFactory).await?;
//!
//!     let response = manager
//!         .chat(
//!             vec![Message::user("Summarise the release notes")],
//!             &RequestContext::new(),
//!             ChatOptions::default(),
//!         )
//!         .await?;
//!
//!     println!("{}", response.content);
//!     manager.destroy().await;
//!     Ok(())
//! }
//! ```

/// Relay configuration and TOML persistence.
pub mod config;

/// Environment constants and path utilities.
///
/// Centralizes the paths, directory names and environment variable names
/// used throughout the crate.
pub mod env;

/// Provider-agnostic LLM interface.
///
/// Adapters for OpenAI-compatible and Anthropic endpoints, the shared
/// request/response types and the per-provider metrics store.
pub mod llm;

/// Request routing.
///
/// The [`LLMManager`] façade and the pieces it composes: circuit breaker,
/// retry executor, response cache, budget guard, provider selector and
/// admission queue.
pub mod routing;

// CLI module for command-line interface
pub mod cli;

pub use config::{
    BreakerConfig, CacheConfig, ConfigError, CostControlConfig, FallbackStrategy,
    MonitoringConfig, ProviderKind, ProviderRegistration, RelayConfig, RoutingConfig,
    RoutingStrategy,
};

pub use llm::{
    ChatOptions, ChunkStream, LLMError, LLMProvider, LLMResponse, Message, ProviderMetrics,
    StreamChunk, TokenUsage,
};

pub use routing::{CircuitState, LLMManager, ManagerStatus, RequestContext, RequestPriority};
