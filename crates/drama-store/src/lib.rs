//! File-backed JSON state stores for the recovery subsystem.
//!
//! Every store follows the same discipline: one flat JSON file, rewritten
//! wholesale, with every read-modify-write cycle protected by an exclusive
//! advisory lock on a sidecar file for the whole critical section. Locks are
//! never held across a stage invocation; the dispatcher marks jobs in-flight
//! under one lock, calls out, then re-acquires to write results.
//!
//! Malformed persisted JSON is a fatal error: the caller refuses to run
//! rather than guess at corrupted state.

pub mod breakers;
pub mod dead_letter;
pub mod error;
pub mod error_log;
mod file;
pub mod jobs;
pub mod lock;

pub use breakers::BreakerStore;
pub use dead_letter::DeadLetterStore;
pub use error::{StoreError, StoreResult};
pub use error_log::ErrorLogStore;
pub use jobs::JobStore;
pub use lock::FileLock;
