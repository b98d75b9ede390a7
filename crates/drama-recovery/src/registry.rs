//! Stage operation registry.
//!
//! The dispatcher depends only on the [`StageHandler`] contract: call with
//! the job payload, get success or a typed failure. Handlers for the real
//! pipeline stages re-invoke the upstream scripts as subprocesses; tests
//! register stubs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

use drama_models::Stage;

use crate::error::{RecoveryError, RecoveryResult, StageError};

/// One stage's re-invocation operation.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Re-run the stage for the given payload.
    async fn attempt(&self, payload: &serde_json::Value) -> Result<(), StageError>;
}

/// Mapping from stage to its registered handler.
///
/// Built once at startup; [`HandlerRegistryBuilder::build`] rejects a
/// registry that leaves any stage without a handler, so a missing mapping
/// is a startup configuration error rather than a runtime surprise.
pub struct HandlerRegistry {
    handlers: HashMap<Stage, Arc<dyn StageHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn get(&self, stage: Stage) -> Option<&Arc<dyn StageHandler>> {
        self.handlers.get(&stage)
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<Stage, Arc<dyn StageHandler>>,
}

impl HandlerRegistryBuilder {
    pub fn register(mut self, stage: Stage, handler: impl StageHandler + 'static) -> Self {
        self.handlers.insert(stage, Arc::new(handler));
        self
    }

    /// Build, requiring a handler for every stage.
    pub fn build(self) -> RecoveryResult<HandlerRegistry> {
        let missing: Vec<&str> = Stage::ALL
            .iter()
            .filter(|s| !self.handlers.contains_key(s))
            .map(|s| s.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(RecoveryError::config(format!(
                "no handler registered for stages: {}",
                missing.join(", ")
            )));
        }
        Ok(HandlerRegistry {
            handlers: self.handlers,
        })
    }

    /// Build without the completeness check. Jobs for unregistered stages
    /// are dead-lettered on sight.
    pub fn build_partial(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}

/// Handler that re-invokes a stage by running its pipeline script as a
/// subprocess, passing the job payload as a JSON argument.
///
/// A non-zero exit is a transient failure carrying a stderr excerpt; the
/// per-stage timeout is enforced by the dispatcher around `attempt`.
pub struct CommandHandler {
    program: String,
    args: Vec<String>,
}

impl CommandHandler {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a whitespace-separated command line, e.g.
    /// `python3 scripts/voiceforge.py --retry`.
    pub fn from_command_line(line: &str) -> RecoveryResult<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| RecoveryError::config("empty stage command"))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl StageHandler for CommandHandler {
    async fn attempt(&self, payload: &serde_json::Value) -> Result<(), StageError> {
        debug!("Running stage command: {} {:?}", self.program, self.args);

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(payload.to_string())
            .output()
            .await
            .map_err(|e| {
                StageError::transient(format!("failed to spawn {}: {}", self.program, e))
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let excerpt: String = stderr.chars().take(500).collect();
        Err(StageError::transient(format!(
            "exit code {}: {}",
            output.status.code().unwrap_or(-1),
            excerpt.trim()
        )))
    }
}
