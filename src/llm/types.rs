use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Role of a message author in a chat conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

/// A single chat message sent to a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Per-call overrides of the adapter's configured generation parameters.
///
/// Field order is fixed so the JSON form is canonical; the response cache
/// fingerprints requests over it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
}

/// Why the provider stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    FunctionCall,
    ContentFilter,
}

impl FinishReason {
    /// Map a vendor finish/stop reason string onto the common set
    pub fn from_vendor(reason: &str) -> Self {
        match reason {
            "length" | "max_tokens" => FinishReason::Length,
            "function_call" | "tool_calls" | "tool_use" => FinishReason::FunctionCall,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        }
    }
}

/// Token usage statistics reported by a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Completed (non-streaming) chat response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LLMResponse {
    pub id: String,
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// One increment of a streamed chat response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: String,
    pub delta_content: Option<String>,
    pub model: String,
    pub done: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Finite, non-restartable sequence of stream chunks
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, LLMError>>;

/// Price per 1K tokens in USD
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostTable {
    pub input: f64,
    pub output: f64,
}

impl CostTable {
    pub fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }

    /// Combined input+output rate, used to rank providers by price
    pub fn combined(&self) -> f64 {
        self.input + self.output
    }

    /// Realized cost of a completed call
    pub fn cost_for(&self, usage: &TokenUsage) -> f64 {
        (usage.prompt_tokens as f64 * self.input + usage.completion_tokens as f64 * self.output)
            / 1000.0
    }
}

/// Rolling per-provider request statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_latency_ms: f64,
    pub average_tokens_per_request: f64,
    pub total_cost_usd: f64,
    pub last_request_time: Option<DateTime<Utc>>,
    pub error_rate: f64,
    pub availability: f64,
}

impl Default for ProviderMetrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            average_latency_ms: 0.0,
            average_tokens_per_request: 0.0,
            total_cost_usd: 0.0,
            last_request_time: None,
            error_rate: 0.0,
            availability: 1.0,
        }
    }
}

impl ProviderMetrics {
    /// Providers at or below 80% availability, or at or above a 20% error
    /// rate, are excluded from routing.
    pub fn is_healthy(&self) -> bool {
        self.availability > 0.8 && self.error_rate < 0.2
    }
}

/// Errors surfaced by adapters and by the routing core
#[derive(Debug, Clone, thiserror::Error)]
pub enum LLMError {
    #[error("No suitable providers available")]
    NoProvidersAvailable,
    #[error("Request cost {requested} exceeds maximum allowed cost {limit}")]
    CostCeilingExceeded { requested: f64, limit: f64 },
    #[error("Daily budget exceeded: spent {spent:.4} of {budget:.4}")]
    DailyBudgetExceeded { spent: f64, budget: f64 },
    #[error("Circuit breaker is open for provider {provider}")]
    BreakerOpen { provider: String },
    #[error("Adapter error: {0}")]
    Adapter(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Manager has been shut down")]
    Shutdown,
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Provider {provider} failed: {source}")]
    ProviderFailed {
        provider: String,
        #[source]
        source: Box<LLMError>,
    },
}

impl LLMError {
    /// Whether the fallback loop may move on to the next candidate.
    /// Budget, selection and shutdown errors always reach the caller.
    pub fn is_provider_failure(&self) -> bool {
        match self {
            LLMError::BreakerOpen { .. }
            | LLMError::Adapter(_)
            | LLMError::Unsupported(_)
            | LLMError::Timeout(_) => true,
            LLMError::ProviderFailed { source, .. } => source.is_provider_failure(),
            LLMError::NoProvidersAvailable
            | LLMError::CostCeilingExceeded { .. }
            | LLMError::DailyBudgetExceeded { .. }
            | LLMError::Shutdown
            | LLMError::Configuration(_) => false,
        }
    }

    /// Innermost error, looking through provider attribution
    pub fn root(&self) -> &LLMError {
        match self {
            LLMError::ProviderFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn attributed(self, provider: &str) -> LLMError {
        match self {
            LLMError::ProviderFailed { .. } => self,
            other => LLMError::ProviderFailed {
                provider: provider.to_string(),
                source: Box::new(other),
            },
        }
    }
}

impl From<reqwest::Error> for LLMError {
    fn from(error: reqwest::Error) -> Self {
        LLMError::Adapter(error.to_string())
    }
}

impl From<serde_json::Error> for LLMError {
    fn from(error: serde_json::Error) -> Self {
        LLMError::Adapter(format!("Malformed provider payload: {}", error))
    }
}
