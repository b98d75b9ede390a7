//! Retry dispatcher.
//!
//! One `run_once` pass: sweep stale in-flight markers, then for every
//! eligible job consult the stage's circuit breaker, re-invoke the stage
//! operation, and record the outcome. Jobs for the same stage are processed
//! in stored order; no cross-stage ordering is guaranteed.
//!
//! Locking discipline: a job is marked in-flight under the job-store lock,
//! the lock is released, the handler runs, then the lock is re-acquired to
//! write the result. A crash mid-call leaves the in-flight marker behind
//! for the stale-flight sweep to reclaim. An in-process set additionally
//! enforces single-flight per job id across overlapping `run_once` calls.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use drama_models::{DeadLetterEntry, ErrorLogEntry, Job, JobId, Severity, Stage};
use drama_store::{DeadLetterStore, ErrorLogStore, JobStore};

use crate::alert::AlertSink;
use crate::breaker::{BreakerEvent, CircuitBreaker};
use crate::config::RecoveryConfig;
use crate::error::{RecoveryResult, StageError};
use crate::registry::HandlerRegistry;

/// Outcome tally for one dispatcher pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunReport {
    /// Handler invocations performed
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    /// Jobs skipped by breaker denial or single-flight exclusion
    pub skipped: usize,
    /// Stale in-flight jobs returned to the retry pool
    pub reclaimed: usize,
}

/// Retry dispatcher over the file-backed stores.
pub struct Dispatcher {
    jobs: JobStore,
    dlq: DeadLetterStore,
    breaker: CircuitBreaker,
    error_log: ErrorLogStore,
    registry: HandlerRegistry,
    alerts: Arc<dyn AlertSink>,
    config: RecoveryConfig,
    in_flight: Mutex<HashSet<JobId>>,
}

impl Dispatcher {
    /// Open the state stores and validate every persisted file.
    ///
    /// Corrupt state is a fatal startup error: the dispatcher refuses to
    /// run rather than guess at what the file meant.
    pub fn new(
        config: RecoveryConfig,
        registry: HandlerRegistry,
        alerts: Arc<dyn AlertSink>,
    ) -> RecoveryResult<Self> {
        let jobs = JobStore::new(&config.state_dir)?;
        let dlq = DeadLetterStore::new(&config.state_dir)?;
        let error_log = ErrorLogStore::new(&config.state_dir)?;
        let breaker_store = drama_store::BreakerStore::new(&config.state_dir)?;

        jobs.validate()?;
        dlq.validate()?;
        error_log.validate()?;
        breaker_store.validate()?;

        let breaker = CircuitBreaker::new(
            breaker_store,
            config.failure_threshold,
            config.cooldown_base,
            config.cooldown_max,
            config.stale_flight_timeout,
        );

        Ok(Self {
            jobs,
            dlq,
            breaker,
            error_log,
            registry,
            alerts,
            config,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Enqueue a retry record from an upstream stage failure.
    pub fn enqueue(&self, job: Job) -> RecoveryResult<()> {
        info!("Enqueued job {} for stage {}", job.id, job.stage);
        self.jobs.upsert(job)?;
        Ok(())
    }

    /// Operator requeue of a dead-lettered job: attempts reset to zero,
    /// eligible on the next pass.
    pub fn requeue(&self, id: &JobId) -> RecoveryResult<Job> {
        let job = self.dlq.take_for_requeue(id)?;
        self.jobs.upsert(job.clone())?;
        info!("Requeued job {} for stage {}", job.id, job.stage);
        Ok(job)
    }

    /// One pass over all pending/retrying jobs.
    pub async fn run_once(&self) -> RecoveryResult<RunReport> {
        let now = Utc::now();
        let mut report = RunReport {
            reclaimed: self.sweep_stale(now)?,
            ..Default::default()
        };

        for stage in Stage::ALL {
            let candidates: Vec<JobId> = self
                .jobs
                .load(stage)?
                .into_iter()
                .filter(|j| j.is_eligible(now))
                .map(|j| j.id)
                .collect();

            for id in candidates {
                self.process_job(stage, id, &mut report).await?;
            }
        }

        info!(
            "Dispatcher pass: {} attempted, {} succeeded, {} failed, {} dead-lettered, {} skipped, {} reclaimed",
            report.attempted,
            report.succeeded,
            report.failed,
            report.dead_lettered,
            report.skipped,
            report.reclaimed
        );
        Ok(report)
    }

    /// Return jobs whose in-flight marker outlived the stage timeout to the
    /// retry pool (crash recovery). Jobs in flight in this process are left
    /// alone.
    fn sweep_stale(&self, now: DateTime<Utc>) -> RecoveryResult<usize> {
        let cutoff = chrono::Duration::from_std(self.config.stale_flight_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(600));
        let local: HashSet<JobId> = self.in_flight.lock().expect("in-flight set poisoned").clone();

        let mut reclaimed = 0;
        for stage in Stage::ALL {
            reclaimed += self.jobs.with_stage(stage, |jobs| {
                let mut n = 0;
                for job in jobs.iter_mut() {
                    let Some(since) = job.in_flight_since else {
                        continue;
                    };
                    if local.contains(&job.id) || now - since < cutoff {
                        continue;
                    }
                    warn!(
                        "Reclaiming stale in-flight job {} (stage {}, in flight since {})",
                        job.id, stage, since
                    );
                    *job = job.clone().reclaim(now);
                    n += 1;
                }
                n
            })?;
        }
        Ok(reclaimed)
    }

    async fn process_job(
        &self,
        stage: Stage,
        id: JobId,
        report: &mut RunReport,
    ) -> RecoveryResult<()> {
        // Single-flight per job id within this process.
        {
            let mut set = self.in_flight.lock().expect("in-flight set poisoned");
            if !set.insert(id.clone()) {
                debug!("Job {} already in flight, skipping", id);
                report.skipped += 1;
                return Ok(());
            }
        }

        let result = self.process_claimed(stage, &id, report).await;

        self.in_flight
            .lock()
            .expect("in-flight set poisoned")
            .remove(&id);
        result
    }

    async fn process_claimed(
        &self,
        stage: Stage,
        id: &JobId,
        report: &mut RunReport,
    ) -> RecoveryResult<()> {
        let now = Utc::now();

        // Claim the job under the store lock: re-check eligibility (another
        // invocation may have got here first) and mark it in-flight.
        let claimed = self.jobs.with_stage(stage, |jobs| {
            jobs.iter_mut()
                .find(|j| &j.id == id && j.is_eligible(now))
                .map(|j| {
                    let original = j.clone();
                    *j = j.clone().begin_attempt(now);
                    original
                })
        })?;
        let Some(original) = claimed else {
            report.skipped += 1;
            return Ok(());
        };

        // Unknown stage: configuration error, dead-letter without consuming
        // an attempt or touching the breaker. Checked before the breaker
        // gate so the half-open trial latch is never claimed for a job that
        // will not produce a success/failure outcome.
        let Some(handler) = self.registry.get(stage).cloned() else {
            error!("No handler registered for stage {}, dead-lettering {}", stage, id);
            let job = original.dead_letter_unattempted(
                StageError::Unknown(stage.to_string()).to_string(),
                now,
            );
            self.admit_to_dlq(job, "unknown stage", Severity::Critical)
                .await?;
            report.dead_lettered += 1;
            return Ok(());
        };

        // Breaker gate. Denial restores the record untouched: skipped jobs
        // are not penalized.
        if !self.breaker.allow_dispatch(stage, now)? {
            debug!("Circuit open for {}, skipping job {}", stage, id);
            self.restore(stage, original)?;
            report.skipped += 1;
            return Ok(());
        }

        // Invoke the stage operation with no lock held, bounded by the
        // per-stage timeout.
        report.attempted += 1;
        let outcome = match tokio::time::timeout(
            self.config.stage_timeout,
            handler.attempt(&original.payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StageError::transient(format!(
                "stage timed out after {:?}",
                self.config.stage_timeout
            ))),
        };

        let now = Utc::now();
        match outcome {
            Ok(()) => {
                self.jobs.with_stage(stage, |jobs| {
                    if let Some(j) = jobs.iter_mut().find(|j| &j.id == id) {
                        *j = j.clone().succeed(now);
                    }
                })?;
                let event = self.breaker.record_success(stage, now)?;
                self.emit_breaker_event(stage, event).await;
                info!("Job {} succeeded on attempt {}", id, original.attempt_count + 1);
                report.succeeded += 1;
            }
            Err(err) => {
                self.handle_failure(stage, original, err, now, report).await?;
            }
        }
        Ok(())
    }

    async fn handle_failure(
        &self,
        stage: Stage,
        original: Job,
        err: StageError,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> RecoveryResult<()> {
        let message = err.to_string();
        warn!("Job {} failed on stage {}: {}", original.id, stage, message);

        let event = self.breaker.record_failure(stage, &message, now)?;
        self.emit_breaker_event(stage, event).await;

        let policy = self.config.backoff_for(stage);
        let attempts_after = original.attempt_count + 1;
        let exhausted = policy.is_exhausted(attempts_after);

        if !err.is_retryable() || exhausted {
            let reason = if err.is_retryable() {
                format!("retries exhausted after {} attempts", attempts_after)
            } else {
                message.clone()
            };
            let job = original.dead_letter(message.clone(), now);
            self.admit_to_dlq(job, &reason, Severity::Critical).await?;
            report.failed += 1;
            report.dead_lettered += 1;
        } else {
            let next = policy.next_retry_at(now, attempts_after);
            let id = original.id.clone();
            self.jobs.with_stage(stage, |jobs| {
                if let Some(j) = jobs.iter_mut().find(|j| j.id == id) {
                    *j = j.clone().record_failure(message.clone(), next, now);
                }
            })?;
            self.error_log
                .append(ErrorLogEntry::new(stage, "attempt", message.clone(), Severity::Error))?;
            debug!(
                "Job {} rescheduled for {} (attempt {}/{})",
                id, next, attempts_after, policy.max_attempts
            );
            report.failed += 1;
        }
        Ok(())
    }

    /// Move a terminal job out of the stage file and into the DLQ, record
    /// it in the error log, and alert.
    async fn admit_to_dlq(
        &self,
        job: Job,
        reason: &str,
        severity: Severity,
    ) -> RecoveryResult<()> {
        let id = job.id.clone();
        let stage = job.stage;
        let error = job.last_error.clone().unwrap_or_else(|| reason.to_string());

        self.jobs.with_stage(stage, |jobs| {
            jobs.retain(|j| j.id != id);
        })?;
        self.dlq.admit(DeadLetterEntry::new(job, reason))?;
        self.error_log
            .append(ErrorLogEntry::new(stage, "dead_letter", error, severity))?;

        self.alerts
            .send(&format!(
                "🚨 Job {} ({}) dead-lettered: {}",
                id, stage, reason
            ))
            .await;
        Ok(())
    }

    async fn emit_breaker_event(&self, stage: Stage, event: BreakerEvent) {
        match event {
            BreakerEvent::Opened => {
                self.alerts
                    .send(&format!(
                        "🔴 Circuit breaker OPEN for {} — dispatch suspended until cooldown",
                        stage
                    ))
                    .await;
            }
            BreakerEvent::NearOpen { failures } => {
                self.alerts
                    .send(&format!(
                        "⚠️ Circuit breaker for {} at {} failures. Will open at {}.",
                        stage, failures, self.config.failure_threshold
                    ))
                    .await;
            }
            BreakerEvent::Reclosed => {
                self.alerts
                    .send(&format!("✅ Circuit breaker for {} closed again", stage))
                    .await;
            }
            BreakerEvent::None => {}
        }
    }

    fn restore(&self, stage: Stage, original: Job) -> RecoveryResult<()> {
        self.jobs.with_stage(stage, |jobs| {
            if let Some(j) = jobs.iter_mut().find(|j| j.id == original.id) {
                *j = original;
            }
        })?;
        Ok(())
    }

    pub fn job_store(&self) -> &JobStore {
        &self.jobs
    }

    pub fn dead_letter_store(&self) -> &DeadLetterStore {
        &self.dlq
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn error_log(&self) -> &ErrorLogStore {
        &self.error_log
    }
}
