//! Health report schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::breaker::CircuitState;
use crate::stage::Stage;

/// Overall pipeline status, worst-first ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Healthy,
    Warning,
    Degraded,
    Critical,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Healthy => "healthy",
            PipelineStatus::Warning => "warning",
            PipelineStatus::Degraded => "degraded",
            PipelineStatus::Critical => "critical",
        }
    }
}

/// Per-stage health snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageHealth {
    pub circuit_state: CircuitState,
    pub pending_count: usize,
    pub retrying_count: usize,
    pub dead_letter_count: usize,
}

/// Aggregated health summary across all stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: PipelineStatus,
    pub checked_at: DateTime<Utc>,
    pub stages: BTreeMap<Stage, StageHealth>,
    pub open_circuits: Vec<Stage>,
    pub dead_letter_total: usize,
    /// Error-log entries recorded in the last 24 hours
    pub recent_errors: usize,
}

impl HealthReport {
    /// True when the pipeline needs operator attention: any open circuit,
    /// or DLQ backlog above the given threshold.
    pub fn needs_attention(&self, dlq_threshold: usize) -> bool {
        !self.open_circuits.is_empty() || self.dead_letter_total > dlq_threshold
    }
}
