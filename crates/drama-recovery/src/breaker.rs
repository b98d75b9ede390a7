//! Per-stage circuit breakers.
//!
//! Closed counts consecutive failures and opens at a threshold; open denies
//! dispatch until a cooldown elapses, then half-open
//! allows exactly one trial; the trial decides closed or open again. The
//! cooldown doubles per consecutive open. Every transition is persisted
//! through [`BreakerStore`] so circuit state survives process restarts.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};

use drama_models::{BreakerRecord, CircuitState, Stage};
use drama_store::{BreakerStore, StoreResult};

/// Transition event produced by a success/failure record, for the caller to
/// alert on. The breaker itself never talks to the alert sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerEvent {
    /// No transition of interest.
    None,
    /// One failure away from opening.
    NearOpen { failures: u32 },
    /// Transitioned to open.
    Opened,
    /// A half-open trial succeeded and the breaker fully closed.
    Reclosed,
}

/// Circuit breaker over the persisted per-stage records.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    store: BreakerStore,
    failure_threshold: u32,
    cooldown_base: Duration,
    cooldown_max: Duration,
    trial_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(
        store: BreakerStore,
        failure_threshold: u32,
        cooldown_base: Duration,
        cooldown_max: Duration,
        trial_timeout: Duration,
    ) -> Self {
        Self {
            store,
            failure_threshold,
            cooldown_base,
            cooldown_max,
            trial_timeout,
        }
    }

    /// Cooldown before a half-open trial, doubling per consecutive open.
    fn cooldown_for(&self, open_count: u32) -> chrono::Duration {
        let exponent = open_count.saturating_sub(1).min(31);
        let cooldown = self
            .cooldown_base
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.cooldown_max);
        chrono::Duration::from_std(cooldown)
            .unwrap_or_else(|_| chrono::Duration::from_std(self.cooldown_max).unwrap_or_default())
    }

    /// Whether a job for this stage may be dispatched now.
    ///
    /// Open breakers transition to half-open once the cooldown has elapsed;
    /// half-open allows exactly one in-flight trial (the latch is persisted,
    /// so overlapping invocations cannot both claim it). A trial whose
    /// outcome was never recorded (crash mid-call) goes stale after
    /// `trial_timeout` and is handed to the next caller.
    pub fn allow_dispatch(&self, stage: Stage, now: DateTime<Utc>) -> StoreResult<bool> {
        let cooldown_for = |record: &BreakerRecord| self.cooldown_for(record.open_count);
        let trial_timeout = chrono::Duration::from_std(self.trial_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(600));
        self.store.with_record(stage, |record| match record.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = record
                    .opened_at
                    .map(|at| now - at)
                    .unwrap_or_else(chrono::Duration::zero);
                if elapsed >= cooldown_for(record) {
                    info!("Circuit breaker for {} half-open after cooldown", stage);
                    record.state = CircuitState::HalfOpen;
                    record.trial_in_flight = true;
                    record.updated_at = now;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if !record.trial_in_flight {
                    record.trial_in_flight = true;
                    record.updated_at = now;
                    true
                } else if now - record.updated_at >= trial_timeout {
                    warn!(
                        "Half-open trial for {} never reported an outcome, reclaiming",
                        stage
                    );
                    record.updated_at = now;
                    true
                } else {
                    false
                }
            }
        })
    }

    /// Record a successful dispatch. A success in half-open fully closes the
    /// breaker and resets all counts.
    pub fn record_success(&self, stage: Stage, now: DateTime<Utc>) -> StoreResult<BreakerEvent> {
        self.store.with_record(stage, |record| {
            let was = record.state;
            record.state = CircuitState::Closed;
            record.failure_count = 0;
            record.open_count = 0;
            record.opened_at = None;
            record.trial_in_flight = false;
            record.last_error = None;
            record.updated_at = now;

            if was != CircuitState::Closed {
                info!("Circuit breaker for {} closed after successful trial", stage);
                BreakerEvent::Reclosed
            } else {
                BreakerEvent::None
            }
        })
    }

    /// Record a failed dispatch.
    pub fn record_failure(
        &self,
        stage: Stage,
        error: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<BreakerEvent> {
        let threshold = self.failure_threshold;
        self.store.with_record(stage, |record| {
            record.last_error = Some(error.to_string());
            record.updated_at = now;

            match record.state {
                CircuitState::HalfOpen => {
                    // Failed trial: back to open with a fresh cooldown window.
                    warn!("Circuit breaker trial failed for {}, reopening", stage);
                    record.state = CircuitState::Open;
                    record.opened_at = Some(now);
                    record.open_count += 1;
                    record.failure_count += 1;
                    record.trial_in_flight = false;
                    BreakerEvent::Opened
                }
                CircuitState::Open => {
                    record.failure_count += 1;
                    BreakerEvent::None
                }
                CircuitState::Closed => {
                    record.failure_count += 1;
                    if record.failure_count >= threshold {
                        warn!(
                            "Circuit breaker OPEN for {} after {} consecutive failures",
                            stage, record.failure_count
                        );
                        record.state = CircuitState::Open;
                        record.opened_at = Some(now);
                        record.open_count += 1;
                        BreakerEvent::Opened
                    } else if record.failure_count + 1 == threshold {
                        BreakerEvent::NearOpen {
                            failures: record.failure_count,
                        }
                    } else {
                        BreakerEvent::None
                    }
                }
            }
        })
    }

    /// Operator reset to a fresh closed breaker.
    pub fn reset(&self, stage: Stage) -> StoreResult<bool> {
        self.store.reset(stage)
    }

    pub fn store(&self) -> &BreakerStore {
        &self.store
    }
}
