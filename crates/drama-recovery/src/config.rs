//! Recovery subsystem configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use drama_models::Stage;

use crate::backoff::BackoffPolicy;

/// Recovery configuration, env-driven with sane defaults.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Root directory for persisted state files
    pub state_dir: PathBuf,
    /// Backoff base delay (doubles per attempt)
    pub base_delay: Duration,
    /// Backoff delay cap
    pub max_delay: Duration,
    /// Default attempt ceiling before DLQ admission
    pub max_attempts: u32,
    /// Per-stage attempt ceiling overrides
    pub stage_max_attempts: HashMap<Stage, u32>,
    /// Consecutive failures before a stage's circuit opens
    pub failure_threshold: u32,
    /// Cooldown before an open circuit allows a half-open trial
    pub cooldown_base: Duration,
    /// Cooldown cap (the cooldown doubles per consecutive open)
    pub cooldown_max: Duration,
    /// Per-stage handler invocation timeout; a hung call counts as a failure
    pub stage_timeout: Duration,
    /// Age after which an in-flight marker is considered stale and the job
    /// is reclaimed (crash recovery)
    pub stale_flight_timeout: Duration,
    /// DLQ backlog above which the health check reports non-zero
    pub dlq_alert_threshold: usize,
    /// Per-stage re-invocation command lines
    pub stage_commands: HashMap<Stage, String>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("state"),
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            max_attempts: 3,
            stage_max_attempts: HashMap::new(),
            failure_threshold: 5,
            cooldown_base: Duration::from_secs(300),
            cooldown_max: Duration::from_secs(3600),
            stage_timeout: Duration::from_secs(300),
            stale_flight_timeout: Duration::from_secs(600),
            dlq_alert_threshold: 0,
            stage_commands: HashMap::new(),
        }
    }
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(key)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default),
    )
}

impl RecoveryConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let mut stage_max_attempts = HashMap::new();
        let mut stage_commands = HashMap::new();
        for stage in Stage::ALL {
            let suffix = stage.as_str().to_uppercase();
            if let Some(n) = std::env::var(format!("RECOVERY_MAX_ATTEMPTS_{suffix}"))
                .ok()
                .and_then(|s| s.parse().ok())
            {
                stage_max_attempts.insert(stage, n);
            }
            if let Ok(cmd) = std::env::var(format!("RECOVERY_CMD_{suffix}")) {
                stage_commands.insert(stage, cmd);
            }
        }

        Self {
            state_dir: std::env::var("RECOVERY_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("state")),
            base_delay: env_secs("RECOVERY_BACKOFF_BASE_SECS", 2),
            max_delay: env_secs("RECOVERY_BACKOFF_MAX_SECS", 60),
            max_attempts: std::env::var("RECOVERY_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            stage_max_attempts,
            failure_threshold: std::env::var("RECOVERY_FAILURE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            cooldown_base: env_secs("RECOVERY_COOLDOWN_SECS", 300),
            cooldown_max: env_secs("RECOVERY_COOLDOWN_MAX_SECS", 3600),
            stage_timeout: env_secs("RECOVERY_STAGE_TIMEOUT_SECS", 300),
            stale_flight_timeout: env_secs("RECOVERY_STALE_FLIGHT_SECS", 600),
            dlq_alert_threshold: std::env::var("RECOVERY_DLQ_ALERT_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            stage_commands,
        }
    }

    /// Attempt ceiling for a stage, honoring per-stage overrides.
    pub fn max_attempts_for(&self, stage: Stage) -> u32 {
        self.stage_max_attempts
            .get(&stage)
            .copied()
            .unwrap_or(self.max_attempts)
    }

    /// Backoff policy for a stage.
    pub fn backoff_for(&self, stage: Stage) -> BackoffPolicy {
        BackoffPolicy::new(self.base_delay, self.max_delay, self.max_attempts_for(stage))
    }
}
