//! Circuit breaker state store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use drama_models::{BreakerRecord, Stage};

use crate::error::StoreResult;
use crate::file::{load_or, save};
use crate::lock::FileLock;

/// Per-stage breaker records in a single `circuit_breakers.json` file.
#[derive(Debug, Clone)]
pub struct BreakerStore {
    path: PathBuf,
}

impl BreakerStore {
    pub fn new(state_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(state_dir)?;
        Ok(Self {
            path: state_dir.join("circuit_breakers.json"),
        })
    }

    /// Read all breaker records. Stages with no record yet are absent.
    pub fn load_all(&self) -> StoreResult<BTreeMap<Stage, BreakerRecord>> {
        let _lock = FileLock::acquire(&self.path)?;
        load_or(&self.path, BTreeMap::new())
    }

    /// Read one stage's record, defaulting to a fresh closed breaker.
    pub fn load(&self, stage: Stage) -> StoreResult<BreakerRecord> {
        Ok(self.load_all()?.remove(&stage).unwrap_or_default())
    }

    /// Run one locked read-modify-write cycle over a stage's record.
    /// Persisted after every call, so transitions survive restarts.
    pub fn with_record<R>(
        &self,
        stage: Stage,
        f: impl FnOnce(&mut BreakerRecord) -> R,
    ) -> StoreResult<R> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut records: BTreeMap<Stage, BreakerRecord> = load_or(&self.path, BTreeMap::new())?;
        let record = records.entry(stage).or_default();
        let out = f(record);
        save(&self.path, &records)?;
        Ok(out)
    }

    /// Operator reset: drop the stage's record entirely, returning whether
    /// one existed.
    pub fn reset(&self, stage: Stage) -> StoreResult<bool> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut records: BTreeMap<Stage, BreakerRecord> = load_or(&self.path, BTreeMap::new())?;
        let existed = records.remove(&stage).is_some();
        if existed {
            save(&self.path, &records)?;
            info!("Circuit breaker reset for stage {}", stage);
        }
        Ok(existed)
    }

    /// Parse the file, surfacing corruption before a run starts.
    pub fn validate(&self) -> StoreResult<()> {
        self.load_all().map(|_| ())
    }
}
