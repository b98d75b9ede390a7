//! Retryable job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::stage::Stage;

/// Identifies one retry record across all of its attempts.
///
/// Upstream stages usually supply their own key (a script id, an upload id);
/// [`JobId::new`] generates a random one for jobs without a natural key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting for its first retry pass
    #[default]
    Pending,
    /// Job has failed at least once and is scheduled for retry
    Retrying,
    /// Job re-invocation succeeded
    Succeeded,
    /// Job exhausted retries and was moved to the DLQ
    DeadLettered,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Retrying => "retrying",
            JobStatus::Succeeded => "succeeded",
            JobStatus::DeadLettered => "dead_lettered",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::DeadLettered)
    }
}

/// One retryable unit of pipeline work.
///
/// Created by an upstream stage failure, mutated only by the retry
/// dispatcher, terminated by success, operator requeue, or DLQ admission.
/// `attempt_count` increases monotonically until the status is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Pipeline stage to re-invoke
    pub stage: Stage,

    /// Opaque data needed to re-invoke the stage operation
    pub payload: serde_json::Value,

    /// Number of failed attempts so far
    #[serde(default)]
    pub attempt_count: u32,

    /// Last failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Job is not eligible for retry before this time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Lifecycle state
    #[serde(default)]
    pub status: JobStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Set while a handler invocation is in progress; survives a crash
    /// mid-call so the stale-flight sweep can reclaim the job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_flight_since: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job for a stage.
    pub fn new(stage: Stage, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            stage,
            payload,
            attempt_count: 0,
            last_error: None,
            next_retry_at: None,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            in_flight_since: None,
        }
    }

    /// Create a job with a caller-supplied id (upstream stages key retry
    /// records by their own identifiers, e.g. a script id).
    pub fn with_id(id: JobId, stage: Stage, payload: serde_json::Value) -> Self {
        Self { id, ..Self::new(stage, payload) }
    }

    /// Mark the job as in-flight for one handler invocation.
    pub fn begin_attempt(mut self, now: DateTime<Utc>) -> Self {
        self.status = JobStatus::Retrying;
        self.in_flight_since = Some(now);
        self.updated_at = now;
        self
    }

    /// Mark the job as succeeded.
    pub fn succeed(mut self, now: DateTime<Utc>) -> Self {
        self.status = JobStatus::Succeeded;
        self.in_flight_since = None;
        self.last_error = None;
        self.next_retry_at = None;
        self.updated_at = now;
        self
    }

    /// Record a failed attempt and schedule the next retry.
    pub fn record_failure(
        mut self,
        error: impl Into<String>,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        self.attempt_count += 1;
        self.last_error = Some(error.into());
        self.next_retry_at = Some(next_retry_at);
        self.status = JobStatus::Retrying;
        self.in_flight_since = None;
        self.updated_at = now;
        self
    }

    /// Terminal transition to the dead-letter state. Counts the failed
    /// attempt and clears any retry schedule.
    pub fn dead_letter(mut self, error: impl Into<String>, now: DateTime<Utc>) -> Self {
        self.attempt_count += 1;
        self.last_error = Some(error.into());
        self.next_retry_at = None;
        self.status = JobStatus::DeadLettered;
        self.in_flight_since = None;
        self.updated_at = now;
        self
    }

    /// Dead-letter without consuming an attempt (dispatcher configuration
    /// errors, not stage failures).
    pub fn dead_letter_unattempted(mut self, error: impl Into<String>, now: DateTime<Utc>) -> Self {
        self.last_error = Some(error.into());
        self.next_retry_at = None;
        self.status = JobStatus::DeadLettered;
        self.in_flight_since = None;
        self.updated_at = now;
        self
    }

    /// Return a stuck in-flight job to the retryable pool with its
    /// attempt count unchanged (crash recovery).
    pub fn reclaim(mut self, now: DateTime<Utc>) -> Self {
        self.status = JobStatus::Retrying;
        self.in_flight_since = None;
        self.updated_at = now;
        self
    }

    /// Operator requeue from the DLQ: reset to a fresh pending job.
    pub fn requeue(mut self, now: DateTime<Utc>) -> Self {
        self.attempt_count = 0;
        self.last_error = None;
        self.next_retry_at = None;
        self.status = JobStatus::Pending;
        self.in_flight_since = None;
        self.updated_at = now;
        self
    }

    /// Whether this job may be dispatched at `now`: non-terminal, not
    /// in-flight, and past its scheduled retry time.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || self.in_flight_since.is_some() {
            return false;
        }
        match self.next_retry_at {
            Some(at) => at <= now,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job() -> Job {
        Job::new(Stage::Voiceover, serde_json::json!({"script_id": "s-1"}))
    }

    #[test]
    fn test_new_job_is_eligible() {
        let j = job();
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.attempt_count, 0);
        assert!(j.is_eligible(Utc::now()));
    }

    #[test]
    fn test_failure_increments_and_schedules() {
        let now = Utc::now();
        let next = now + Duration::seconds(4);
        let j = job().record_failure("timeout", next, now);

        assert_eq!(j.attempt_count, 1);
        assert_eq!(j.status, JobStatus::Retrying);
        assert!(!j.is_eligible(now));
        assert!(j.is_eligible(next));
    }

    #[test]
    fn test_in_flight_job_not_eligible() {
        let now = Utc::now();
        let j = job().begin_attempt(now);
        assert!(!j.is_eligible(now));
    }

    #[test]
    fn test_dead_letter_clears_schedule() {
        let now = Utc::now();
        let j = job().dead_letter("exhausted", now);
        assert_eq!(j.status, JobStatus::DeadLettered);
        assert!(j.status.is_terminal());
        assert_eq!(j.next_retry_at, None);
        assert_eq!(j.attempt_count, 1);
    }

    #[test]
    fn test_requeue_resets() {
        let now = Utc::now();
        let j = job()
            .record_failure("timeout", now, now)
            .dead_letter("exhausted", now)
            .requeue(now);

        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.attempt_count, 0);
        assert_eq!(j.last_error, None);
        assert!(j.is_eligible(now));
    }

    #[test]
    fn test_reclaim_keeps_attempt_count() {
        let now = Utc::now();
        let j = job()
            .record_failure("timeout", now, now)
            .begin_attempt(now)
            .reclaim(now);

        assert_eq!(j.attempt_count, 1);
        assert_eq!(j.in_flight_since, None);
        assert!(j.is_eligible(now));
    }
}
