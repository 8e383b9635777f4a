use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Scheduling priority of a request.
///
/// `Critical` requests bypass the admission queue; every other priority is
/// served in FIFO order through it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RequestPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl FromStr for RequestPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(RequestPriority::Low),
            "normal" => Ok(RequestPriority::Normal),
            "high" => Ok(RequestPriority::High),
            "critical" => Ok(RequestPriority::Critical),
            other => Err(format!(
                "Invalid priority '{}'. Must be one of: low, normal, high, critical",
                other
            )),
        }
    }
}

/// Routing hints and limits attached to a single call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestContext {
    pub priority: RequestPriority,
    /// Restrict routing to providers sharing at least one tag
    pub tags: BTreeSet<String>,
    /// Caller's estimate of the request cost in USD
    pub max_cost: Option<f64>,
    /// Narrow routing to these providers when any of them is eligible
    pub preferred_providers: BTreeSet<String>,
    pub excluded_providers: BTreeSet<String>,
    pub require_streaming: bool,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn critical() -> Self {
        Self::new().with_priority(RequestPriority::Critical)
    }

    pub fn with_priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    pub fn prefer(mut self, provider: impl Into<String>) -> Self {
        self.preferred_providers.insert(provider.into());
        self
    }

    pub fn exclude(mut self, provider: impl Into<String>) -> Self {
        self.excluded_providers.insert(provider.into());
        self
    }

    pub fn is_critical(&self) -> bool {
        self.priority == RequestPriority::Critical
    }
}
