//! Dead letter queue store.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use drama_models::{DeadLetterEntry, Job, JobId};

use crate::error::{StoreError, StoreResult};
use crate::file::{load_or, save};
use crate::lock::FileLock;

/// Durable record of jobs that exhausted retries, in `dead_letter.json`.
///
/// Entries are append-only; admission is idempotent on job id, so
/// re-admitting an id updates the existing entry in place rather than
/// duplicating it.
#[derive(Debug, Clone)]
pub struct DeadLetterStore {
    path: PathBuf,
}

impl DeadLetterStore {
    pub fn new(state_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(state_dir)?;
        Ok(Self {
            path: state_dir.join("dead_letter.json"),
        })
    }

    /// Admit a job. Returns true if this was a new admission rather than an
    /// update of an existing entry.
    pub fn admit(&self, entry: DeadLetterEntry) -> StoreResult<bool> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut entries: Vec<DeadLetterEntry> = load_or(&self.path, Vec::new())?;

        let id = entry.job.id.clone();
        let fresh = match entries.iter_mut().find(|e| e.job.id == id) {
            Some(existing) => {
                warn!("Job {} re-admitted to DLQ, updating entry", id);
                *existing = entry;
                false
            }
            None => {
                entries.push(entry);
                true
            }
        };
        save(&self.path, &entries)?;
        if fresh {
            info!("Job {} admitted to DLQ", id);
        }
        Ok(fresh)
    }

    /// List all entries, oldest first.
    pub fn list(&self) -> StoreResult<Vec<DeadLetterEntry>> {
        let _lock = FileLock::acquire(&self.path)?;
        load_or(&self.path, Vec::new())
    }

    /// Remove and return the entry for a job id, reset for requeueing.
    /// The caller reinserts the returned job into the job store.
    pub fn take_for_requeue(&self, id: &JobId) -> StoreResult<Job> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut entries: Vec<DeadLetterEntry> = load_or(&self.path, Vec::new())?;

        let pos = entries
            .iter()
            .position(|e| &e.job.id == id)
            .ok_or_else(|| StoreError::JobNotFound(id.to_string()))?;
        let entry = entries.remove(pos);
        save(&self.path, &entries)?;

        Ok(entry.job.requeue(chrono::Utc::now()))
    }

    /// Number of dead-lettered jobs for one stage.
    pub fn count_for_stage(&self, stage: drama_models::Stage) -> StoreResult<usize> {
        Ok(self.list()?.iter().filter(|e| e.job.stage == stage).count())
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.list()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Parse the file, surfacing corruption before a run starts.
    pub fn validate(&self) -> StoreResult<()> {
        self.list().map(|_| ())
    }
}
