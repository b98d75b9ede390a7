//! Persisted circuit breaker records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Circuit breaker state for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Dispatch allowed
    #[default]
    Closed,
    /// Dispatch denied until the cooldown elapses
    Open,
    /// Exactly one trial dispatch allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Persisted breaker record for one stage.
///
/// Written back after every transition so circuit state survives process
/// restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerRecord {
    #[serde(default)]
    pub state: CircuitState,

    /// Consecutive failures since the last success
    #[serde(default)]
    pub failure_count: u32,

    /// Consecutive opens without an intervening close; drives cooldown
    /// doubling
    #[serde(default)]
    pub open_count: u32,

    /// When the breaker last transitioned to open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,

    /// Set while the single half-open trial is in flight
    #[serde(default)]
    pub trial_in_flight: bool,

    /// Last recorded failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl Default for BreakerRecord {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            open_count: 0,
            opened_at: None,
            trial_in_flight: false,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

impl BreakerRecord {
    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }
}
