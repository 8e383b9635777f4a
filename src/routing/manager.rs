use crate::config::{FallbackStrategy, ProviderRegistration, RelayConfig};
use crate::llm::metrics::{CallOutcome, MetricsStore};
use crate::llm::provider::{LLMProvider, ProviderFactory};
use crate::llm::types::{
    ChatOptions, ChunkStream, LLMError, LLMResponse, Message, ProviderMetrics, StreamChunk,
};
use crate::routing::admission::AdmissionQueue;
use crate::routing::budget::BudgetGuard;
use crate::routing::cache::{ResponseCache, fingerprint};
use crate::routing::error_recovery::{CircuitBreaker, CircuitState, RetryExecutor};
use crate::routing::selector::{CandidateInfo, ProviderSelector};
use crate::routing::types::RequestContext;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// Streamed responses carry no usage block, so their cost is estimated from
/// the number of characters received.
pub const STREAM_COST_PER_CHAR_ESTIMATE: f64 = 0.00001;

/// Snapshot returned by [`LLMManager::status`]
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub providers: HashMap<String, ProviderMetrics>,
    pub breakers: HashMap<String, CircuitState>,
    pub daily_spent: f64,
    pub cache_size: usize,
    pub queue_length: usize,
}

struct ProviderSlot {
    registration: ProviderRegistration,
    adapter: Arc<dyn LLMProvider>,
    breaker: Arc<CircuitBreaker>,
}

impl ProviderSlot {
    fn name(&self) -> &str {
        &self.registration.name
    }
}

/// A successful attempt and where it came from
struct Routed<T> {
    provider: String,
    adapter: Arc<dyn LLMProvider>,
    value: T,
    latency: Duration,
}

struct ManagerCore {
    config: RelayConfig,
    providers: RwLock<Vec<Arc<ProviderSlot>>>,
    metrics: MetricsStore,
    cache: ResponseCache,
    budget: BudgetGuard,
    selector: ProviderSelector,
    retry: RetryExecutor,
    queue: AdmissionQueue,
    destroyed: AtomicBool,
}

/// Entry point for routed LLM calls.
///
/// Each call goes through the response cache, the budget guard, provider
/// selection and then, per candidate, the admission queue (unless critical),
/// the retry executor and the provider's circuit breaker. Failed candidates
/// fall back to the next one according to the configured fallback strategy.
pub struct LLMManager {
    core: Arc<ManagerCore>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl LLMManager {
    /// Build adapters for every registration and start the background tasks.
    pub async fn new(config: RelayConfig, factory: &dyn ProviderFactory) -> Result<Self, LLMError> {
        config
            .validate()
            .map_err(|e| LLMError::Configuration(e.to_string()))?;

        let metrics = MetricsStore::new();
        let mut slots = Vec::with_capacity(config.providers.len());
        for registration in &config.providers {
            let adapter = factory.create_provider(registration)?;
            metrics.register(&registration.name);
            let breaker = Arc::new(CircuitBreaker::new(
                registration.name.clone(),
                config.breaker.clone(),
            ));
            info!(
                "Registered provider {} ({}, priority {}{})",
                registration.name,
                registration.kind,
                registration.priority,
                if registration.enabled { "" } else { ", disabled" }
            );
            slots.push(Arc::new(ProviderSlot {
                registration: registration.clone(),
                adapter,
                breaker,
            }));
        }

        let core = Arc::new(ManagerCore {
            cache: ResponseCache::new(config.cache.ttl(), config.cache.max_size),
            budget: BudgetGuard::new(config.cost_control.clone()),
            selector: ProviderSelector::new(config.routing.strategy),
            retry: RetryExecutor::new(config.routing.retry_attempts),
            queue: AdmissionQueue::new(config.routing.queue_spacing()),
            providers: RwLock::new(slots),
            metrics,
            destroyed: AtomicBool::new(false),
            config,
        });

        let health_task = if core.config.monitoring.enable_health_check {
            Some(spawn_health_task(
                Arc::downgrade(&core),
                core.config.monitoring.health_check_interval(),
            ))
        } else {
            None
        };

        info!(
            "LLM manager ready with {} providers ({:?} routing, {:?} fallback)",
            core.providers.read().await.len(),
            core.config.routing.strategy,
            core.config.routing.fallback_strategy
        );

        Ok(Self {
            core,
            health_task: Mutex::new(health_task),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.core.config
    }

    /// Run a chat completion against the best available provider
    pub async fn chat(
        &self,
        messages: Vec<Message>,
        context: &RequestContext,
        options: ChatOptions,
    ) -> Result<LLMResponse, LLMError> {
        let span = info_span!("chat", request_id = %Uuid::new_v4());
        self.core
            .chat(messages, context, options)
            .instrument(span)
            .await
    }

    /// Open a streamed chat completion.
    ///
    /// The provider is fixed once it produces a first chunk; later errors end
    /// the stream rather than switching providers.
    pub async fn chat_stream(
        &self,
        messages: Vec<Message>,
        context: &RequestContext,
        options: ChatOptions,
    ) -> Result<ChunkStream, LLMError> {
        let span = info_span!("chat_stream", request_id = %Uuid::new_v4());
        Arc::clone(&self.core)
            .chat_stream(messages, context, options)
            .instrument(span)
            .await
    }

    pub async fn embeddings(
        &self,
        texts: Vec<String>,
        context: &RequestContext,
        model: Option<String>,
    ) -> Result<Vec<Vec<f32>>, LLMError> {
        let span = info_span!("embeddings", request_id = %Uuid::new_v4());
        self.core
            .embeddings(texts, context, model)
            .instrument(span)
            .await
    }

    /// Probe every registered provider once, recording the outcomes
    pub async fn run_health_checks(&self) -> HashMap<String, bool> {
        self.core.run_health_checks().await
    }

    pub async fn status(&self) -> ManagerStatus {
        let mut providers = HashMap::new();
        let mut breakers = HashMap::new();
        for slot in self.core.providers.read().await.iter() {
            providers.insert(
                slot.name().to_string(),
                self.core.metrics.snapshot(slot.name()).unwrap_or_default(),
            );
            breakers.insert(slot.name().to_string(), slot.breaker.state());
        }

        ManagerStatus {
            providers,
            breakers,
            daily_spent: self.core.budget.daily_spent().await,
            cache_size: self.core.cache.len().await,
            queue_length: self.core.queue.len(),
        }
    }

    pub fn provider_metrics(&self, name: &str) -> Option<ProviderMetrics> {
        self.core.metrics.snapshot(name)
    }

    /// Clear the rolling metrics of one provider. Returns `false` for
    /// unknown names.
    pub fn reset_metrics(&self, name: &str) -> bool {
        let reset = self.core.metrics.reset(name);
        if reset {
            info!("Metrics reset for provider {}", name);
        }
        reset
    }

    pub async fn breaker_state(&self, name: &str) -> Option<CircuitState> {
        self.core
            .providers
            .read()
            .await
            .iter()
            .find(|slot| slot.name() == name)
            .map(|slot| slot.breaker.state())
    }

    pub async fn provider_names(&self) -> Vec<String> {
        self.core
            .providers
            .read()
            .await
            .iter()
            .map(|slot| slot.name().to_string())
            .collect()
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.destroyed.load(Ordering::SeqCst)
    }

    /// Stop background work and release all state. Later calls fail with
    /// [`LLMError::Shutdown`]. Safe to call more than once.
    pub async fn destroy(&self) {
        let first = !self.core.destroyed.swap(true, Ordering::SeqCst);

        if let Some(task) = self
            .health_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.core.queue.close();
        self.core.cache.clear().await;
        self.core.providers.write().await.clear();
        self.core.metrics.clear();

        if first {
            info!("LLM manager destroyed");
        }
    }
}

impl Drop for LLMManager {
    fn drop(&mut self) {
        if let Some(task) = self
            .health_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

fn spawn_health_task(core: Weak<ManagerCore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(core) = core.upgrade() else {
                break;
            };
            core.run_health_checks().await;
        }
    })
}

impl ManagerCore {
    fn ensure_active(&self) -> Result<(), LLMError> {
        if self.destroyed.load(Ordering::SeqCst) {
            Err(LLMError::Shutdown)
        } else {
            Ok(())
        }
    }

    async fn chat(
        &self,
        messages: Vec<Message>,
        context: &RequestContext,
        options: ChatOptions,
    ) -> Result<LLMResponse, LLMError> {
        self.ensure_active()?;

        let cache_key = if self.config.cache.enabled {
            let key = fingerprint(&messages, &options)?;
            if let Some(cached) = self.cache.get(&key).await {
                debug!("Cache hit for {}", key);
                return Ok(cached);
            }
            Some(key)
        } else {
            None
        };

        self.budget.check(context.max_cost).await?;

        let routed = self
            .route(context, false, self.config.routing.timeout(), move |adapter| {
                let messages = messages.clone();
                let options = options.clone();
                async move { adapter.chat(messages, options).await }
            })
            .await?;

        let mut response = routed.value;
        let cost = routed
            .adapter
            .cost_per_1k_tokens()
            .cost_for(&response.usage);
        self.metrics.record(
            &routed.provider,
            CallOutcome::success(routed.latency, response.usage.total_tokens, cost),
        );
        self.budget.record(cost).await;

        response
            .metadata
            .insert("provider".to_string(), json!(routed.provider));
        response.metadata.insert("cost".to_string(), json!(cost));

        if let Some(key) = cache_key {
            self.cache.insert(key, response.clone()).await;
        }

        info!(
            "Chat served by {} in {:?} ({} tokens, {:.6} USD)",
            routed.provider, routed.latency, response.usage.total_tokens, cost
        );
        Ok(response)
    }

    async fn chat_stream(
        self: Arc<Self>,
        messages: Vec<Message>,
        context: &RequestContext,
        options: ChatOptions,
    ) -> Result<ChunkStream, LLMError> {
        self.ensure_active()?;
        self.budget.check(context.max_cost).await?;

        let routed = self
            .route(
                context,
                true,
                self.config.routing.stream_timeout(),
                move |adapter| {
                    let messages = messages.clone();
                    let options = options.clone();
                    async move {
                        let mut stream = adapter.chat_stream(messages, options).await?;
                        match stream.next().await {
                            Some(Ok(first)) => Ok((first, stream)),
                            Some(Err(e)) => Err(e),
                            None => Err(LLMError::Adapter(
                                "Stream ended before the first chunk".to_string(),
                            )),
                        }
                    }
                },
            )
            .await?;

        info!("Streaming from {}", routed.provider);
        let (first, rest) = routed.value;
        let state = StreamAccounting {
            core: Arc::clone(&self),
            provider: routed.provider,
            first: Some(first),
            rest,
            read_timeout: self.config.routing.stream_timeout(),
            started: Instant::now() - routed.latency,
            chunks: 0,
            estimated_cost: 0.0,
            finished: false,
        };

        Ok(futures::stream::unfold(state, StreamAccounting::advance).boxed())
    }

    async fn embeddings(
        &self,
        texts: Vec<String>,
        context: &RequestContext,
        model: Option<String>,
    ) -> Result<Vec<Vec<f32>>, LLMError> {
        self.ensure_active()?;
        self.budget.check(context.max_cost).await?;

        let routed = self
            .route(context, false, self.config.routing.timeout(), move |adapter| {
                let texts = texts.clone();
                let model = model.clone();
                async move { adapter.embeddings(texts, model).await }
            })
            .await?;

        self.metrics
            .record(&routed.provider, CallOutcome::success(routed.latency, 0, 0.0));
        debug!(
            "Embeddings served by {} ({} vectors)",
            routed.provider,
            routed.value.len()
        );
        Ok(routed.value)
    }

    async fn candidates(
        &self,
        context: &RequestContext,
        require_streaming: bool,
    ) -> Result<Vec<Arc<ProviderSlot>>, LLMError> {
        let providers = self.providers.read().await;
        let infos = providers
            .iter()
            .map(|slot| CandidateInfo {
                name: slot.registration.name.clone(),
                priority: slot.registration.priority,
                weight: slot.registration.weight,
                enabled: slot.registration.enabled,
                tags: slot.registration.tags.clone(),
                supports_streaming: slot.adapter.supports_streaming(),
                cost: slot.adapter.cost_per_1k_tokens(),
                metrics: self.metrics.snapshot(slot.name()).unwrap_or_default(),
            })
            .collect();

        let ordered = self.selector.select(infos, context, require_streaming)?;
        Ok(ordered
            .iter()
            .filter_map(|info| {
                providers
                    .iter()
                    .find(|slot| slot.name() == info.name)
                    .cloned()
            })
            .collect())
    }

    /// Try candidates in order until one succeeds.
    ///
    /// Failures are recorded here; the caller records the success since only
    /// it knows the tokens and cost involved.
    async fn route<T, F, Fut>(
        &self,
        context: &RequestContext,
        require_streaming: bool,
        limit: Duration,
        operation: F,
    ) -> Result<Routed<T>, LLMError>
    where
        F: Fn(Arc<dyn LLMProvider>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T, LLMError>> + Send + 'static,
        T: Send + 'static,
    {
        let candidates = self.candidates(context, require_streaming).await?;
        let mut last_error = None;

        for slot in candidates {
            let started = Instant::now();
            let attempt = self
                .execute(&slot, context, limit, operation.clone())
                .await;
            let latency = started.elapsed();

            match attempt {
                Ok(value) => {
                    return Ok(Routed {
                        provider: slot.name().to_string(),
                        adapter: Arc::clone(&slot.adapter),
                        value,
                        latency,
                    });
                }
                Err(LLMError::Shutdown) => return Err(LLMError::Shutdown),
                Err(error) => {
                    if matches!(error.root(), LLMError::Unsupported(_)) {
                        // a missing capability says nothing about provider health
                        debug!("Provider {} skipped: {}", slot.name(), error);
                    } else {
                        self.metrics
                            .record(slot.name(), CallOutcome::failure(latency));
                        warn!("Provider {} failed: {}", slot.name(), error);
                    }

                    let error = error.attributed(slot.name());
                    if !error.is_provider_failure() {
                        return Err(error);
                    }
                    last_error = Some(error);

                    if self.config.routing.fallback_strategy == FallbackStrategy::FailFast {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(LLMError::NoProvidersAvailable))
    }

    /// One candidate: queue (unless critical), then retries through the
    /// provider's breaker, each attempt bounded by `limit`.
    async fn execute<T, F, Fut>(
        &self,
        slot: &ProviderSlot,
        context: &RequestContext,
        limit: Duration,
        operation: F,
    ) -> Result<T, LLMError>
    where
        F: Fn(Arc<dyn LLMProvider>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, LLMError>> + Send + 'static,
        T: Send + 'static,
    {
        let retry = self.retry;
        let breaker = Arc::clone(&slot.breaker);
        let adapter = Arc::clone(&slot.adapter);

        let run = async move {
            retry
                .execute_with_recovery(&breaker, || {
                    let call = operation(Arc::clone(&adapter));
                    async move {
                        match tokio::time::timeout(limit, call).await {
                            Ok(result) => result,
                            Err(_) => Err(LLMError::Timeout(limit)),
                        }
                    }
                })
                .await
        };

        if context.is_critical() {
            run.await
        } else {
            self.queue.submit(run).await
        }
    }

    async fn run_health_checks(&self) -> HashMap<String, bool> {
        let slots: Vec<Arc<ProviderSlot>> = self.providers.read().await.clone();
        let limit = self.config.routing.timeout();
        let mut results = HashMap::with_capacity(slots.len());

        for slot in slots {
            let started = Instant::now();
            let healthy = tokio::time::timeout(limit, slot.adapter.health_check())
                .await
                .unwrap_or(false);
            let latency = started.elapsed();

            if healthy {
                debug!("Health check passed for {}", slot.name());
                self.metrics
                    .record(slot.name(), CallOutcome::success(latency, 0, 0.0));
            } else {
                warn!("Health check failed for {}", slot.name());
                self.metrics
                    .record(slot.name(), CallOutcome::failure(latency));
            }
            results.insert(slot.name().to_string(), healthy);
        }

        results
    }
}

/// Per-stream bookkeeping once a provider has been committed to
struct StreamAccounting {
    core: Arc<ManagerCore>,
    provider: String,
    first: Option<StreamChunk>,
    rest: ChunkStream,
    /// Bound on the wait for each chunk after the first
    read_timeout: Duration,
    started: Instant,
    chunks: u64,
    estimated_cost: f64,
    finished: bool,
}

impl StreamAccounting {
    async fn advance(mut self) -> Option<(Result<StreamChunk, LLMError>, Self)> {
        if self.finished {
            return None;
        }

        let item = match self.first.take() {
            Some(first) => Some(Ok(first)),
            None => match tokio::time::timeout(self.read_timeout, self.rest.next()).await {
                Ok(item) => item,
                Err(_) => Some(Err(LLMError::Timeout(self.read_timeout))),
            },
        };

        match item {
            Some(Ok(mut chunk)) => {
                let chars = chunk
                    .delta_content
                    .as_deref()
                    .map_or(0, |content| content.chars().count());
                let cost = chars as f64 * STREAM_COST_PER_CHAR_ESTIMATE;
                if cost > 0.0 {
                    self.estimated_cost += cost;
                    self.core.metrics.add_cost(&self.provider, cost);
                    self.core.budget.record(cost).await;
                }
                self.chunks += 1;

                chunk
                    .metadata
                    .insert("provider".to_string(), json!(self.provider));
                if chunk.done {
                    chunk
                        .metadata
                        .insert("estimated_cost".to_string(), json!(self.estimated_cost));
                }
                Some((Ok(chunk), self))
            }
            Some(Err(error)) => {
                self.finished = true;
                warn!(
                    "Stream from {} failed after {} chunks: {}",
                    self.provider, self.chunks, error
                );
                self.core
                    .metrics
                    .record(&self.provider, CallOutcome::failure(self.started.elapsed()));
                let error = error.attributed(&self.provider);
                Some((Err(error), self))
            }
            None => {
                self.core.metrics.record(
                    &self.provider,
                    CallOutcome::success(self.started.elapsed(), 0, 0.0),
                );
                debug!(
                    "Stream from {} completed: {} chunks, ~{:.6} USD",
                    self.provider, self.chunks, self.estimated_cost
                );
                None
            }
        }
    }
}
