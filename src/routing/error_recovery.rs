use crate::config::BreakerConfig;
use crate::llm::types::LLMError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_time: Option<Instant>,
    pub next_attempt_time: Option<Instant>,
    trial_in_flight: bool,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_time: None,
            next_attempt_time: None,
            trial_in_flight: false,
        }
    }
}

/// Per-provider circuit breaker.
///
/// While half-open exactly one trial call is admitted; concurrent callers
/// are rejected until the trial resolves.
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: String,
    config: BreakerConfig,
    state: Mutex<CircuitBreakerState>,
}

impl CircuitBreaker {
    pub fn new(provider: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
            state: Mutex::new(CircuitBreakerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        self.lock().clone()
    }

    /// Ask for permission to run one call through the breaker
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, LLMError> {
        let mut state = self.lock();
        let now = Instant::now();

        let trial = match state.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let elapsed = state.next_attempt_time.is_none_or(|at| now >= at);
                if !elapsed {
                    return Err(self.open_error());
                }
                info!("Circuit breaker for {} moving to half-open", self.provider);
                state.state = CircuitState::HalfOpen;
                state.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    return Err(self.open_error());
                }
                state.trial_in_flight = true;
                true
            }
        };

        Ok(BreakerPermit {
            breaker: self,
            trial,
            resolved: false,
        })
    }

    /// Run `operation` guarded by the breaker.
    ///
    /// `Unsupported` outcomes say nothing about provider health and leave the
    /// failure count untouched.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, LLMError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LLMError>>,
    {
        let permit = self.try_acquire()?;
        match operation().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(error @ LLMError::Unsupported(_)) => {
                permit.release();
                Err(error)
            }
            Err(error) => {
                permit.fail();
                Err(error)
            }
        }
    }

    fn open_error(&self) -> LLMError {
        LLMError::BreakerOpen {
            provider: self.provider.clone(),
        }
    }

    fn on_success(&self) {
        let mut state = self.lock();
        if state.state != CircuitState::Closed {
            info!("Circuit breaker for {} closed", self.provider);
        }
        state.state = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.next_attempt_time = None;
        state.trial_in_flight = false;
    }

    fn on_failure(&self, trial: bool) {
        let mut state = self.lock();
        let now = Instant::now();
        state.consecutive_failures += 1;
        state.last_failure_time = Some(now);

        if trial {
            state.trial_in_flight = false;
        }

        let tripped = trial
            || state.state == CircuitState::HalfOpen
            || state.consecutive_failures >= self.config.failure_threshold;
        if tripped {
            if state.state != CircuitState::Open {
                warn!(
                    "Circuit breaker for {} opened after {} consecutive failures",
                    self.provider, state.consecutive_failures
                );
            }
            state.state = CircuitState::Open;
            state.next_attempt_time = Some(now + self.config.reset_timeout());
        }
    }

    /// A trial that ended without a verdict hands the slot straight back
    fn on_release(&self, trial: bool) {
        if !trial {
            return;
        }
        let mut state = self.lock();
        if state.state == CircuitState::HalfOpen {
            state.state = CircuitState::Open;
            state.next_attempt_time = Some(Instant::now());
        }
        state.trial_in_flight = false;
    }
}

/// Admission granted by [`CircuitBreaker::try_acquire`].
///
/// Dropping a permit without resolving it, e.g. when the caller's future is
/// cancelled, releases a half-open trial slot.
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl BreakerPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.resolved = true;
        self.breaker.on_success();
    }

    pub fn fail(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.trial);
    }

    pub fn release(mut self) {
        self.resolved = true;
        self.breaker.on_release(self.trial);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.on_release(self.trial);
        }
    }
}

/// Retries an operation through a breaker with capped exponential backoff
#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryExecutor {
    pub fn new(max_retries: u32) -> Self {
        Self::with_delays(max_retries, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }

    pub fn with_delays(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay slept after the failed attempt numbered `attempt` (0-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Make up to `max_retries + 1` attempts of `operation`.
    ///
    /// An open breaker consumes an attempt like any other failure.
    /// `Unsupported` is returned at once.
    pub async fn execute_with_recovery<T, F, Fut>(
        &self,
        breaker: &CircuitBreaker,
        mut operation: F,
    ) -> Result<T, LLMError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LLMError>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match breaker.call(&mut operation).await {
                Ok(value) => return Ok(value),
                Err(error @ LLMError::Unsupported(_)) => return Err(error),
                Err(error) => {
                    debug!(
                        "Attempt {}/{} failed: {}",
                        attempt + 1,
                        self.max_retries + 1,
                        error
                    );
                    last_error = Some(error);
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LLMError::Adapter("No attempts were made".to_string())))
    }
}
