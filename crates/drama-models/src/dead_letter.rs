//! Dead letter entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::Job;

/// Terminal record of a job that exhausted retries or failed permanently.
///
/// Immutable once written, kept for operator requeue or audit. Admission is
/// idempotent on job id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// The job as it looked at admission time
    pub job: Job,

    /// Why the job was dead-lettered
    pub reason: String,

    /// Admission timestamp
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(job: Job, reason: impl Into<String>) -> Self {
        Self {
            job,
            reason: reason.into(),
            failed_at: Utc::now(),
        }
    }
}
