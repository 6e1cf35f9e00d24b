//! Curio resilience core.
//!
//! Error-handling and recovery engine for Curio's AI-service calls
//! (summarize, categorize, compose). Every call goes through
//! [`engine::ResilienceEngine::execute`], which layers:
//!
//! - failure classification (ordered substring rules, severity, retryability)
//! - retry with exponential backoff and jitter
//! - per-service circuit breakers
//! - degraded-mode fallbacks
//! - a recovery queue with dead-letter promotion
//! - per-service health monitoring with a periodic sweep
//! - statistics, error-rate spike alerting and trend analysis
//! - concurrency protection and an advisory graceful-shutdown flag
//!
//! The AI operations themselves and the persistent store are external
//! collaborators: callers pass an opaque async operation, and persistence
//! goes through the [`store::KeyValueStore`] seam with failures swallowed.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod breaker;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod events;
pub mod fallback;
pub mod health;
pub mod protect;
pub mod queue;
pub mod retry;
pub mod stats;
pub mod store;
pub mod types;

pub use breaker::{BreakerSnapshot, CircuitState};
pub use classifier::{Classifier, ClassifierRule, ErrorCategory, ErrorInfo, ErrorSeverity};
pub use self::config::{ConfigError, ConfigLoader, EngineConfig, EngineConfigPatch};
pub use engine::ResilienceEngine;
pub use events::{EVENT_ERROR_RATE_SPIKE, EVENT_GRACEFUL_SHUTDOWN, EngineEvent};
pub use fallback::FallbackFn;
pub use health::{HealthStatus, ServiceHealth};
pub use protect::ShutdownState;
pub use queue::{DeadLetterItem, QueuedItem};
pub use stats::{ErrorStatistics, Trend, TrendReport};
pub use store::{KeyValueStore, MemoryStore};
pub use types::{ExecutionContext, ExecutionReport};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
