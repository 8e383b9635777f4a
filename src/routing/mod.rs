//! Request routing: selection, admission, retries, breaking, caching and
//! budget enforcement in front of the provider adapters.

pub mod admission;
pub mod budget;
pub mod cache;
pub mod error_recovery;
pub mod manager;
pub mod selector;
pub mod types;

pub use admission::AdmissionQueue;
pub use budget::{BudgetGuard, BudgetLedger};
pub use cache::{ResponseCache, fingerprint};
pub use error_recovery::{CircuitBreaker, CircuitBreakerState, CircuitState, RetryExecutor};
pub use manager::{LLMManager, ManagerStatus, STREAM_COST_PER_CHAR_ESTIMATE};
pub use selector::{CandidateInfo, ProviderSelector};
pub use types::{RequestContext, RequestPriority};
