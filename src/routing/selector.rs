use crate::config::RoutingStrategy;
use crate::llm::types::{CostTable, LLMError, ProviderMetrics};
use crate::routing::types::RequestContext;
use chrono::Utc;
use rand::Rng;
use std::collections::BTreeSet;
use tracing::debug;

/// Routing-relevant view of one registered provider
#[derive(Debug, Clone)]
pub struct CandidateInfo {
    pub name: String,
    pub priority: i32,
    pub weight: u32,
    pub enabled: bool,
    pub tags: BTreeSet<String>,
    pub supports_streaming: bool,
    pub cost: CostTable,
    pub metrics: ProviderMetrics,
}

/// Filters and orders providers for a request
#[derive(Debug, Clone, Copy)]
pub struct ProviderSelector {
    strategy: RoutingStrategy,
}

impl ProviderSelector {
    pub fn new(strategy: RoutingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    pub fn select(
        &self,
        candidates: Vec<CandidateInfo>,
        context: &RequestContext,
        require_streaming: bool,
    ) -> Result<Vec<CandidateInfo>, LLMError> {
        let now_secs = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        self.select_with(
            candidates,
            context,
            require_streaming,
            &mut rand::rng(),
            now_secs,
        )
    }

    /// Deterministic core of [`ProviderSelector::select`]: randomness and the
    /// clock are supplied by the caller.
    pub fn select_with<R: Rng + ?Sized>(
        &self,
        candidates: Vec<CandidateInfo>,
        context: &RequestContext,
        require_streaming: bool,
        rng: &mut R,
        now_secs: u64,
    ) -> Result<Vec<CandidateInfo>, LLMError> {
        let require_streaming = require_streaming || context.require_streaming;

        let mut eligible: Vec<CandidateInfo> = candidates
            .into_iter()
            .filter(|c| c.enabled)
            .filter(|c| !require_streaming || c.supports_streaming)
            .collect();

        // preferences apply before exclusion, tags and health, so a filtered
        // preferred provider is not replaced by another
        if eligible
            .iter()
            .any(|c| context.preferred_providers.contains(&c.name))
        {
            eligible.retain(|c| context.preferred_providers.contains(&c.name));
        }

        eligible.retain(|c| {
            !context.excluded_providers.contains(&c.name)
                && (context.tags.is_empty() || !c.tags.is_disjoint(&context.tags))
                && c.metrics.is_healthy()
        });

        if eligible.is_empty() {
            return Err(LLMError::NoProvidersAvailable);
        }

        match self.strategy {
            RoutingStrategy::Priority => eligible.sort_by_key(|c| c.priority),
            RoutingStrategy::CostOptimized => {
                eligible.sort_by(|a, b| a.cost.combined().total_cmp(&b.cost.combined()))
            }
            RoutingStrategy::LatencyOptimized => eligible.sort_by(|a, b| {
                a.metrics
                    .average_latency_ms
                    .total_cmp(&b.metrics.average_latency_ms)
            }),
            RoutingStrategy::Weighted => {
                let index = weighted_pick(&eligible, rng);
                let chosen = eligible.remove(index);
                eligible.insert(0, chosen);
            }
            RoutingStrategy::RoundRobin => {
                let offset = (now_secs % eligible.len() as u64) as usize;
                eligible.rotate_left(offset);
            }
        }

        debug!(
            "Selected providers ({:?}): {:?}",
            self.strategy,
            eligible.iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
        );

        Ok(eligible)
    }
}

/// Index drawn with probability proportional to weight; uniform when every
/// weight is zero.
fn weighted_pick<R: Rng + ?Sized>(candidates: &[CandidateInfo], rng: &mut R) -> usize {
    let total: u64 = candidates.iter().map(|c| u64::from(c.weight)).sum();
    if total == 0 {
        return rng.random_range(0..candidates.len());
    }

    let mut point = rng.random_range(0..total);
    for (index, candidate) in candidates.iter().enumerate() {
        let weight = u64::from(candidate.weight);
        if point < weight {
            return index;
        }
        point -= weight;
    }
    candidates.len() - 1
}
