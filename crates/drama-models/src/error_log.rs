//! Error log entries for operator inspection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::Stage;

/// Error severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

/// One recorded terminal failure. The log is capped to the most recent
/// entries; it is an inspection aid, not an audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Utc>,
    pub stage: Stage,
    pub operation: String,
    pub error: String,
    pub severity: Severity,
}

impl ErrorLogEntry {
    pub fn new(
        stage: Stage,
        operation: impl Into<String>,
        error: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            stage,
            operation: operation.into(),
            error: error.into(),
            severity,
        }
    }
}
