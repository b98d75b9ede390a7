//! Error recovery for the drama pipeline.
//!
//! This crate provides:
//! - A retry dispatcher that re-invokes failed pipeline stages with
//!   exponential backoff
//! - Per-stage circuit breakers persisted across restarts
//! - A dead letter queue with operator requeue
//! - A health reporter and alert sink for operator notification
//!
//! The dispatcher is driven externally (cron or the CLI); one `run_once`
//! pass retries every eligible job exactly once.

pub mod alert;
pub mod backoff;
pub mod breaker;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod registry;

pub use alert::{AlertSink, LogAlerter, TelegramAlerter};
pub use backoff::{BackoffPolicy, JitterFn};
pub use breaker::{BreakerEvent, CircuitBreaker};
pub use config::RecoveryConfig;
pub use dispatcher::{Dispatcher, RunReport};
pub use error::{RecoveryError, RecoveryResult, StageError};
pub use health::HealthReporter;
pub use registry::{CommandHandler, HandlerRegistry, HandlerRegistryBuilder, StageHandler};
