//! Reconciliation engine for calendar mirroring.
//!
//! Orchestrates signature-based diffing between a private source
//! calendar and its public mirror: change caching, batched execution,
//! occurrence exception handling, resilience (circuit breaker, retry,
//! rate limiting), scheduling, and post-sync validation.

pub mod batch;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod occurrence;
pub mod ratelimit;
pub mod reconcile;
pub mod retry;
pub mod scheduler;
pub mod validate;

pub use breaker::{CircuitBreaker, CircuitState};
pub use cache::{CacheStats, ChangeCache, ChangeSet};
pub use config::SyncConfig;
pub use engine::{EngineStatus, SyncEngine, SyncReport};
pub use error::SyncError;
pub use history::{SyncHistory, SyncOutcome, SyncRecord, SyncStats};
pub use ratelimit::RateLimiter;
pub use reconcile::OperationSet;
pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, SchedulerCommand, SchedulerHandle};
pub use validate::{ValidationIssue, ValidationReport};
