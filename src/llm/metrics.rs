use crate::llm::types::ProviderMetrics;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;

/// Number of most recent requests the availability figure is computed over
const AVAILABILITY_WINDOW: u64 = 100;

/// Result of one routed call, as seen by the metrics store
#[derive(Debug, Clone, Copy)]
pub struct CallOutcome {
    pub success: bool,
    pub latency: Duration,
    pub tokens: Option<u64>,
    pub cost: Option<f64>,
}

impl CallOutcome {
    pub fn success(latency: Duration, tokens: u64, cost: f64) -> Self {
        Self {
            success: true,
            latency,
            tokens: Some(tokens),
            cost: Some(cost),
        }
    }

    pub fn failure(latency: Duration) -> Self {
        Self {
            success: false,
            latency,
            tokens: None,
            cost: None,
        }
    }
}

/// Per-provider rolling statistics, shared across concurrent requests.
///
/// Updates are incremental running averages; concurrent writers to the same
/// provider are serialized by the map shard lock.
#[derive(Debug, Default)]
pub struct MetricsStore {
    providers: DashMap<String, ProviderMetrics>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: &str) {
        self.providers
            .entry(provider.to_string())
            .or_default();
    }

    pub fn record(&self, provider: &str, outcome: CallOutcome) {
        let mut metrics = self.providers.entry(provider.to_string()).or_default();
        apply_outcome(&mut metrics, outcome);
    }

    /// Add cost without counting a request; streamed responses accrue cost
    /// chunk by chunk.
    pub fn add_cost(&self, provider: &str, cost: f64) {
        let mut metrics = self.providers.entry(provider.to_string()).or_default();
        metrics.total_cost_usd += cost;
    }

    pub fn snapshot(&self, provider: &str) -> Option<ProviderMetrics> {
        self.providers.get(provider).map(|m| m.value().clone())
    }

    pub fn all(&self) -> HashMap<String, ProviderMetrics> {
        self.providers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn reset(&self, provider: &str) -> bool {
        match self.providers.get_mut(provider) {
            Some(mut metrics) => {
                *metrics = ProviderMetrics::default();
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.providers.clear();
    }
}

fn apply_outcome(metrics: &mut ProviderMetrics, outcome: CallOutcome) {
    metrics.total_requests += 1;
    metrics.last_request_time = Some(Utc::now());

    if outcome.success {
        metrics.successful_requests += 1;
    } else {
        metrics.failed_requests += 1;
    }

    let total = metrics.total_requests as f64;
    let latency_ms = outcome.latency.as_secs_f64() * 1000.0;
    metrics.average_latency_ms = (metrics.average_latency_ms * (total - 1.0) + latency_ms) / total;

    if let Some(tokens) = outcome.tokens
        && tokens > 0
    {
        metrics.average_tokens_per_request =
            (metrics.average_tokens_per_request * (total - 1.0) + tokens as f64) / total;
    }

    if let Some(cost) = outcome.cost {
        metrics.total_cost_usd += cost;
    }

    metrics.error_rate = metrics.failed_requests as f64 / total;

    let recent_requests = metrics.total_requests.min(AVAILABILITY_WINDOW);
    let recent_failures = metrics.failed_requests.min(recent_requests);
    metrics.availability = 1.0 - recent_failures as f64 / recent_requests as f64;
}
