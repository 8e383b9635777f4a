pub mod claude_provider;
pub mod metrics;
pub mod openai_provider;
pub mod provider;
pub mod sse;
pub mod types;

pub use claude_provider::ClaudeProvider;
pub use metrics::{CallOutcome, MetricsStore};
pub use openai_provider::OpenAIProvider;
pub use provider::{HttpProviderFactory, LLMProvider, ProviderFactory, StaticProviderFactory};
pub use types::*;
