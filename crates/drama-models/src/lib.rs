//! Shared data models for the drama pipeline recovery subsystem.
//!
//! This crate provides Serde-serializable types for:
//! - Retryable jobs and their lifecycle states
//! - Pipeline stages
//! - Circuit breaker records
//! - Dead letter entries
//! - Health report and error log schemas

pub mod breaker;
pub mod dead_letter;
pub mod error_log;
pub mod health;
pub mod job;
pub mod stage;

// Re-export common types
pub use breaker::{BreakerRecord, CircuitState};
pub use dead_letter::DeadLetterEntry;
pub use error_log::{ErrorLogEntry, Severity};
pub use health::{HealthReport, PipelineStatus, StageHealth};
pub use job::{Job, JobId, JobStatus};
pub use stage::{Stage, UnknownStageError};
