//! Relay configuration.
//!
//! [`RelayConfig`] is the whole configuration surface of the routing core:
//! provider registrations, routing/fallback policy, cost control, health
//! monitoring, response caching and circuit breaker tuning. It round-trips
//! through TOML; every section falls back to its defaults when omitted.
//!
//! ```toml
//! [routing]
//! strategy = "cost_optimized"
//! fallback_strategy = "next_priority"
//!
//! [[providers]]
//! name = "openai-gpt4"
//! kind = "openai"
//! priority = 1
//! weight = 50
//! tags = ["general", "coding"]
//!
//! [providers.adapter]
//! model = "gpt-4-turbo"
//! api_key_env = "OPENAI_API_KEY"
//! ```

use crate::llm::CostTable;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Backend family an adapter speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAI,
    Claude,
    /// Any OpenAI-compatible endpoint
    Generic,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAI => write!(f, "openai"),
            ProviderKind::Claude => write!(f, "claude"),
            ProviderKind::Generic => write!(f, "generic"),
        }
    }
}

/// Settings handed to the adapter for one registration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub api_key: Option<String>,
    /// Environment variable holding the API key when `api_key` is unset
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub organization: Option<String>,
    pub anthropic_version: Option<String>,
    pub embedding_model: Option<String>,
    pub cost_override: Option<CostTable>,
    pub max_context_length: Option<u64>,
}

impl AdapterConfig {
    /// Explicit key first, then the configured variable, then `default_env`
    pub fn resolve_api_key(&self, default_env: &str) -> Option<String> {
        if let Some(key) = &self.api_key
            && !key.is_empty()
        {
            return Some(key.clone());
        }

        let var = self.api_key_env.as_deref().unwrap_or(default_env);
        std::env::var(var).ok().filter(|v| !v.is_empty())
    }
}

/// A backend the manager may route to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRegistration {
    pub name: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub adapter: AdapterConfig,
    /// Lower is preferred
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

fn default_weight() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

impl ProviderRegistration {
    pub fn new(name: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            name: name.into(),
            kind,
            adapter: AdapterConfig::default(),
            priority: 0,
            weight: default_weight(),
            enabled: true,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
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

    pub fn with_adapter(mut self, adapter: AdapterConfig) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Candidate ordering policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    Priority,
    RoundRobin,
    Weighted,
    CostOptimized,
    LatencyOptimized,
}

/// What to do after a candidate provider fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    NextPriority,
    AnyAvailable,
    FailFast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub strategy: RoutingStrategy,
    pub fallback_strategy: FallbackStrategy,
    pub retry_attempts: u32,
    pub timeout_ms: u64,
    /// Deadline for opening a stream and receiving its first chunk
    pub stream_timeout_ms: u64,
    /// Minimum gap between admission queue dequeues
    pub queue_spacing_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::Priority,
            fallback_strategy: FallbackStrategy::NextPriority,
            retry_attempts: 3,
            timeout_ms: 30_000,
            stream_timeout_ms: 120_000,
            queue_spacing_ms: 10,
        }
    }
}

impl RoutingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout_ms)
    }

    pub fn queue_spacing(&self) -> Duration {
        Duration::from_millis(self.queue_spacing_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostControlConfig {
    pub enabled: bool,
    /// USD
    pub max_cost_per_request: f64,
    /// USD, reset at local midnight
    pub daily_budget: f64,
}

impl Default for CostControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_cost_per_request: 0.5,
            daily_budget: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enable_health_check: bool,
    pub health_check_interval_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_health_check: true,
            health_check_interval_ms: 60_000,
        }
    }
}

impl MonitoringConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 300,
            max_size: 1000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
        }
    }
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub providers: Vec<ProviderRegistration>,
    pub routing: RoutingConfig,
    pub cost_control: CostControlConfig,
    pub monitoring: MonitoringConfig,
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let openai = ProviderRegistration::new("openai-gpt4", ProviderKind::OpenAI)
            .with_priority(1)
            .with_weight(50)
            .with_tags(["general", "coding", "reasoning"])
            .with_adapter(AdapterConfig {
                model: Some("gpt-4-turbo".to_string()),
                max_tokens: Some(2000),
                temperature: Some(0.7),
                ..Default::default()
            });

        let claude = ProviderRegistration::new("claude-sonnet", ProviderKind::Claude)
            .with_priority(2)
            .with_weight(30)
            .with_tags(["general", "writing", "analysis"])
            .with_adapter(AdapterConfig {
                model: Some("claude-3-5-sonnet-20241022".to_string()),
                max_tokens: Some(2000),
                temperature: Some(0.7),
                ..Default::default()
            });

        Self {
            providers: vec![openai, claude],
            routing: RoutingConfig::default(),
            cost_control: CostControlConfig::default(),
            monitoring: MonitoringConfig::default(),
            cache: CacheConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Configuration with no providers registered
    pub fn empty() -> Self {
        Self {
            providers: Vec::new(),
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, registration: ProviderRegistration) -> Self {
        self.providers.push(registration);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "provider name must not be empty".to_string(),
                ));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
        }

        if self.cache.enabled && self.cache.max_size == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_size must be positive when the cache is enabled".to_string(),
            ));
        }

        if self.cost_control.enabled && self.cost_control.daily_budget <= 0.0 {
            return Err(ConfigError::Invalid(
                "cost_control.daily_budget must be positive".to_string(),
            ));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker.failure_threshold must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
