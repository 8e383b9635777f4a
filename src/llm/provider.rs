use crate::config::{ProviderKind, ProviderRegistration};
use crate::llm::types::{ChatOptions, ChunkStream, CostTable, LLMError, LLMResponse, Message};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Capability contract implemented by every backend adapter
pub trait LLMProvider: Send + Sync {
    /// Adapter name, used in logs and chunk metadata
    fn name(&self) -> &str;

    /// Models this adapter can serve
    fn supported_models(&self) -> Vec<String>;

    /// Context window of the configured model, in tokens
    fn max_context_length(&self) -> u64;

    /// Price per 1K input/output tokens of the configured model
    fn cost_per_1k_tokens(&self) -> CostTable;

    /// Whether [`LLMProvider::chat_stream`] is implemented.
    ///
    /// Streaming requests are only routed to adapters reporting `true`.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Execute a single chat completion
    fn chat(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> BoxFuture<'_, Result<LLMResponse, LLMError>>;

    /// Open a streamed chat completion
    fn chat_stream(
        &self,
        _messages: Vec<Message>,
        _options: ChatOptions,
    ) -> BoxFuture<'_, Result<ChunkStream, LLMError>> {
        let name = self.name().to_string();
        Box::pin(async move {
            Err(LLMError::Unsupported(format!(
                "{} does not support streaming",
                name
            )))
        })
    }

    /// Compute embedding vectors for each input text
    fn embeddings(
        &self,
        _texts: Vec<String>,
        _model: Option<String>,
    ) -> BoxFuture<'_, Result<Vec<Vec<f32>>, LLMError>> {
        let name = self.name().to_string();
        Box::pin(async move {
            Err(LLMError::Unsupported(format!(
                "{} does not support embeddings",
                name
            )))
        })
    }

    /// Test provider connectivity with a minimal chat call
    fn health_check(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let options = ChatOptions {
                max_tokens: Some(5),
                ..Default::default()
            };
            match self.chat(vec![Message::user("ping")], options).await {
                Ok(response) => !response.content.is_empty(),
                Err(e) => {
                    warn!("Health check failed for {}: {}", self.name(), e);
                    false
                }
            }
        })
    }
}

/// Builds adapters for provider registrations
pub trait ProviderFactory: Send + Sync {
    fn create_provider(
        &self,
        registration: &ProviderRegistration,
    ) -> Result<Arc<dyn LLMProvider>, LLMError>;
}

/// Factory for the built-in HTTP adapters
#[derive(Debug, Default, Clone)]
pub struct HttpProviderFactory;

impl ProviderFactory for HttpProviderFactory {
    fn create_provider(
        &self,
        registration: &ProviderRegistration,
    ) -> Result<Arc<dyn LLMProvider>, LLMError> {
        match registration.kind {
            ProviderKind::OpenAI | ProviderKind::Generic => Ok(Arc::new(
                crate::llm::openai_provider::OpenAIProvider::new(
                    registration.kind,
                    registration.adapter.clone(),
                )?,
            )),
            ProviderKind::Claude => Ok(Arc::new(
                crate::llm::claude_provider::ClaudeProvider::new(registration.adapter.clone())?,
            )),
        }
    }
}

/// Factory handing out pre-built adapters by registration name.
///
/// Lets an embedding application plug in its own [`LLMProvider`]
/// implementations without going through the HTTP adapters.
#[derive(Default, Clone)]
pub struct StaticProviderFactory {
    adapters: HashMap<String, Arc<dyn LLMProvider>>,
}

impl StaticProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, name: impl Into<String>, adapter: Arc<dyn LLMProvider>) -> Self {
        self.adapters.insert(name.into(), adapter);
        self
    }
}

impl ProviderFactory for StaticProviderFactory {
    fn create_provider(
        &self,
        registration: &ProviderRegistration,
    ) -> Result<Arc<dyn LLMProvider>, LLMError> {
        self.adapters.get(&registration.name).cloned().ok_or_else(|| {
            LLMError::Configuration(format!(
                "No adapter supplied for provider '{}'",
                registration.name
            ))
        })
    }
}
