//! Health reporting.
//!
//! Pure read aggregation over the job, breaker, DLQ, and error-log stores.
//! Each file is read under its own lock, so the summary never observes a
//! partial write.

use chrono::{Duration, Utc};
use std::collections::BTreeMap;

use drama_models::{CircuitState, HealthReport, PipelineStatus, Stage, StageHealth};
use drama_store::{BreakerStore, DeadLetterStore, ErrorLogStore, JobStore};

use crate::config::RecoveryConfig;
use crate::error::RecoveryResult;

/// Aggregates circuit and queue state into an operator summary.
pub struct HealthReporter {
    jobs: JobStore,
    breakers: BreakerStore,
    dlq: DeadLetterStore,
    error_log: ErrorLogStore,
    dlq_threshold: usize,
}

impl HealthReporter {
    pub fn new(config: &RecoveryConfig) -> RecoveryResult<Self> {
        Ok(Self {
            jobs: JobStore::new(&config.state_dir)?,
            breakers: BreakerStore::new(&config.state_dir)?,
            dlq: DeadLetterStore::new(&config.state_dir)?,
            error_log: ErrorLogStore::new(&config.state_dir)?,
            dlq_threshold: config.dlq_alert_threshold,
        })
    }

    /// Build the health summary. No mutation.
    pub fn summary(&self) -> RecoveryResult<HealthReport> {
        let now = Utc::now();
        let breakers = self.breakers.load_all()?;

        let mut stages = BTreeMap::new();
        let mut open_circuits = Vec::new();
        let mut half_open = 0usize;

        for stage in Stage::ALL {
            let circuit_state = breakers
                .get(&stage)
                .map(|r| r.state)
                .unwrap_or(CircuitState::Closed);
            match circuit_state {
                CircuitState::Open => open_circuits.push(stage),
                CircuitState::HalfOpen => half_open += 1,
                CircuitState::Closed => {}
            }

            let (pending_count, retrying_count) = self.jobs.status_counts(stage)?;
            stages.insert(
                stage,
                StageHealth {
                    circuit_state,
                    pending_count,
                    retrying_count,
                    dead_letter_count: self.dlq.count_for_stage(stage)?,
                },
            );
        }

        let dead_letter_total = self.dlq.len()?;
        let recent_errors = self.error_log.count_since(now - Duration::hours(24))?;

        let status = if !open_circuits.is_empty() {
            PipelineStatus::Critical
        } else if dead_letter_total > self.dlq_threshold {
            PipelineStatus::Degraded
        } else if recent_errors > 0 || half_open > 0 {
            PipelineStatus::Warning
        } else {
            PipelineStatus::Healthy
        };

        Ok(HealthReport {
            status,
            checked_at: now,
            stages,
            open_circuits,
            dead_letter_total,
            recent_errors,
        })
    }

    /// Whether the health check should exit non-zero.
    pub fn needs_attention(&self, report: &HealthReport) -> bool {
        report.needs_attention(self.dlq_threshold)
    }

    /// Human-readable rendering for the CLI and the alert sink.
    pub fn render(report: &HealthReport) -> String {
        let emoji = match report.status {
            PipelineStatus::Healthy => "✅",
            PipelineStatus::Warning => "⚠️",
            PipelineStatus::Degraded => "🔶",
            PipelineStatus::Critical => "🚨",
        };

        let mut lines = vec![
            format!("{emoji} <b>PIPELINE HEALTH</b>"),
            format!("Status: {}", report.status.as_str().to_uppercase()),
            format!("Checked: {}", report.checked_at.format("%Y-%m-%dT%H:%M:%SZ")),
            String::new(),
            format!("Errors (24h): {}", report.recent_errors),
            format!("Dead-lettered: {}", report.dead_letter_total),
            String::new(),
            "By Stage:".to_string(),
        ];

        for (stage, health) in &report.stages {
            lines.push(format!(
                "  • {}: circuit {} | {} pending, {} retrying, {} dead",
                stage,
                health.circuit_state.as_str(),
                health.pending_count,
                health.retrying_count,
                health.dead_letter_count
            ));
        }

        if !report.open_circuits.is_empty() {
            lines.push(String::new());
            lines.push("🔴 Open Circuits:".to_string());
            for stage in &report.open_circuits {
                lines.push(format!("  • {stage}"));
            }
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drama_models::{DeadLetterEntry, Job, JobId};

    fn reporter(dir: &std::path::Path) -> HealthReporter {
        let config = RecoveryConfig {
            state_dir: dir.to_path_buf(),
            ..Default::default()
        };
        HealthReporter::new(&config).unwrap()
    }

    #[test]
    fn test_empty_state_is_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = reporter(dir.path());
        let report = reporter.summary().unwrap();
        assert_eq!(report.status, PipelineStatus::Healthy);
        assert!(!reporter.needs_attention(&report));
    }

    #[test]
    fn test_dlq_backlog_degrades_and_needs_attention() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = DeadLetterStore::new(dir.path()).unwrap();
        let job = Job::with_id(JobId::from_string("s-1"), Stage::Voiceover, serde_json::Value::Null)
            .dead_letter("boom", Utc::now());
        dlq.admit(DeadLetterEntry::new(job, "retries exhausted")).unwrap();

        let reporter = reporter(dir.path());
        let report = reporter.summary().unwrap();
        assert_eq!(report.status, PipelineStatus::Degraded);
        assert_eq!(report.dead_letter_total, 1);
        assert_eq!(report.stages[&Stage::Voiceover].dead_letter_count, 1);
        assert!(reporter.needs_attention(&report));
    }

    #[test]
    fn test_open_circuit_is_critical() {
        let dir = tempfile::tempdir().unwrap();
        let breakers = BreakerStore::new(dir.path()).unwrap();
        breakers
            .with_record(Stage::Upload, |r| {
                r.state = CircuitState::Open;
                r.opened_at = Some(Utc::now());
            })
            .unwrap();

        let report = reporter(dir.path()).summary().unwrap();
        assert_eq!(report.status, PipelineStatus::Critical);
        assert_eq!(report.open_circuits, vec![Stage::Upload]);
    }
}
