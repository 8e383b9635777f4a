#![allow(dead_code)]

use futures::future::BoxFuture;
use futures::StreamExt;
use llm_relay::config::{ProviderKind, ProviderRegistration, RelayConfig};
use llm_relay::llm::{
    ChatOptions, ChunkStream, CostTable, FinishReason, LLMError, LLMProvider, LLMResponse, Message,
    StaticProviderFactory, StreamChunk, TokenUsage,
};
use llm_relay::routing::LLMManager;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted stream item: a content delta, a transport error, or a
/// stall after which the stream never yields again
#[derive(Debug, Clone)]
pub enum StreamStep {
    Delta(&'static str),
    Fail(&'static str),
    Stall,
}

/// In-memory adapter whose behaviour tests flip at will
pub struct ScriptedProvider {
    name: String,
    reply: String,
    failing: AtomicBool,
    healthy: AtomicBool,
    delay: Duration,
    cost: CostTable,
    usage: TokenUsage,
    stream: Option<Vec<StreamStep>>,
    embeddings: Option<Vec<Vec<f32>>>,
    calls: AtomicU32,
    health_checks: AtomicU32,
    received: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(name: &str, reply: &str) -> Self {
        Self {
            name: name.to_string(),
            reply: reply.to_string(),
            failing: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            delay: Duration::ZERO,
            cost: CostTable::new(0.001, 0.002),
            usage: TokenUsage::new(10, 5),
            stream: None,
            embeddings: None,
            calls: AtomicU32::new(0),
            health_checks: AtomicU32::new(0),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(name: &str) -> Self {
        let provider = Self::new(name, "");
        provider.set_failing(true);
        provider
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_cost(mut self, cost: CostTable) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_stream(mut self, steps: Vec<StreamStep>) -> Self {
        self.stream = Some(steps);
        self
    }

    pub fn with_embeddings(mut self, vectors: Vec<Vec<f32>>) -> Self {
        self.embeddings = Some(vectors);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn health_checks(&self) -> u32 {
        self.health_checks.load(Ordering::SeqCst)
    }

    /// Last user message of every chat call, in arrival order
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    async fn begin_call(&self, messages: &[Message]) -> Result<(), LLMError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(last) = messages.last() {
            self.received.lock().unwrap().push(last.content.clone());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(LLMError::Adapter(format!("{} is down", self.name)));
        }
        Ok(())
    }
}

impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_models(&self) -> Vec<String> {
        vec!["scripted-model".to_string()]
    }

    fn max_context_length(&self) -> u64 {
        4096
    }

    fn cost_per_1k_tokens(&self) -> CostTable {
        self.cost
    }

    fn supports_streaming(&self) -> bool {
        self.stream.is_some()
    }

    fn chat(
        &self,
        messages: Vec<Message>,
        _options: ChatOptions,
    ) -> BoxFuture<'_, Result<LLMResponse, LLMError>> {
        Box::pin(async move {
            self.begin_call(&messages).await?;
            Ok(LLMResponse {
                id: format!("{}-{}", self.name, self.calls()),
                content: self.reply.clone(),
                model: "scripted-model".to_string(),
                usage: self.usage,
                finish_reason: FinishReason::Stop,
                metadata: HashMap::new(),
            })
        })
    }

    fn chat_stream(
        &self,
        messages: Vec<Message>,
        _options: ChatOptions,
    ) -> BoxFuture<'_, Result<ChunkStream, LLMError>> {
        Box::pin(async move {
            self.begin_call(&messages).await?;
            let Some(steps) = self.stream.clone() else {
                return Err(LLMError::Unsupported("no streaming".to_string()));
            };

            let stalls = steps.iter().any(|step| matches!(step, StreamStep::Stall));
            let steps: Vec<StreamStep> = steps
                .into_iter()
                .take_while(|step| !matches!(step, StreamStep::Stall))
                .collect();
            let last = if stalls { usize::MAX } else { steps.len().saturating_sub(1) };
            let items: Vec<Result<StreamChunk, LLMError>> = steps
                .into_iter()
                .enumerate()
                .filter_map(|(i, step)| match step {
                    StreamStep::Delta(text) => Some(Ok(StreamChunk {
                        id: "stream".to_string(),
                        delta_content: Some(text.to_string()),
                        model: "scripted-model".to_string(),
                        done: i == last,
                        metadata: HashMap::new(),
                    })),
                    StreamStep::Fail(message) => {
                        Some(Err(LLMError::Adapter(message.to_string())))
                    }
                    StreamStep::Stall => None,
                })
                .collect();

            let head = futures::stream::iter(items);
            if stalls {
                Ok(head.chain(futures::stream::pending()).boxed())
            } else {
                Ok(head.boxed())
            }
        })
    }

    fn embeddings(
        &self,
        texts: Vec<String>,
        _model: Option<String>,
    ) -> BoxFuture<'_, Result<Vec<Vec<f32>>, LLMError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.embeddings {
                Some(vectors) => Ok(vectors.iter().take(texts.len()).cloned().collect()),
                None => Err(LLMError::Unsupported(format!(
                    "{} does not support embeddings",
                    self.name
                ))),
            }
        })
    }

    fn health_check(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.health_checks.fetch_add(1, Ordering::SeqCst);
            self.healthy.load(Ordering::SeqCst)
        })
    }
}

/// Config with background probing off and registrations in the given order,
/// priorities 1, 2, ...
pub fn config_for(names: &[&str]) -> RelayConfig {
    let mut config = RelayConfig::empty();
    config.monitoring.enable_health_check = false;
    for (i, name) in names.iter().enumerate() {
        config = config.with_provider(
            ProviderRegistration::new(*name, ProviderKind::Generic).with_priority(i as i32 + 1),
        );
    }
    config
}

pub async fn manager_with(
    config: RelayConfig,
    providers: &[Arc<ScriptedProvider>],
) -> LLMManager {
    let factory = providers
        .iter()
        .fold(StaticProviderFactory::new(), |factory, provider| {
            factory.with_provider(
                provider.name().to_string(),
                Arc::clone(provider) as Arc<dyn LLMProvider>,
            )
        });
    LLMManager::new(config, &factory)
        .await
        .expect("manager should build")
}

pub fn ask(prompt: &str) -> Vec<Message> {
    vec![Message::user(prompt)]
}
