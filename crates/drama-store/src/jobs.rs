//! Per-stage job record store.

use std::path::{Path, PathBuf};
use tracing::debug;

use drama_models::{Job, JobStatus, Stage};

use crate::error::StoreResult;
use crate::file::{load_or, save};
use crate::lock::FileLock;

/// Flat per-stage JSON files of pending/failed jobs, read and rewritten
/// wholesale on each operation. Job order within a file is preserved; the
/// dispatcher processes jobs in stored order.
#[derive(Debug, Clone)]
pub struct JobStore {
    dir: PathBuf,
}

impl JobStore {
    /// Open the store rooted at `<state_dir>/jobs`.
    pub fn new(state_dir: &Path) -> StoreResult<Self> {
        let dir = state_dir.join("jobs");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn stage_path(&self, stage: Stage) -> PathBuf {
        self.dir.join(format!("{}.json", stage.as_str()))
    }

    /// Read all jobs for a stage.
    pub fn load(&self, stage: Stage) -> StoreResult<Vec<Job>> {
        let path = self.stage_path(stage);
        let _lock = FileLock::acquire(&path)?;
        load_or(&path, Vec::new())
    }

    /// Run one locked read-modify-write cycle over a stage's jobs.
    ///
    /// The exclusive lock is held for the duration of `f` and the
    /// write-back; `f` must never perform a stage invocation.
    pub fn with_stage<R>(
        &self,
        stage: Stage,
        f: impl FnOnce(&mut Vec<Job>) -> R,
    ) -> StoreResult<R> {
        let path = self.stage_path(stage);
        let _lock = FileLock::acquire(&path)?;
        let mut jobs: Vec<Job> = load_or(&path, Vec::new())?;
        let out = f(&mut jobs);
        save(&path, &jobs)?;
        Ok(out)
    }

    /// Insert or replace a job record, keyed by id.
    pub fn upsert(&self, job: Job) -> StoreResult<()> {
        let id = job.id.clone();
        let stage = job.stage;
        self.with_stage(stage, move |jobs| {
            match jobs.iter_mut().find(|j| j.id == job.id) {
                Some(existing) => *existing = job,
                None => jobs.push(job),
            }
        })?;
        debug!("Upserted job {} for stage {}", id, stage);
        Ok(())
    }

    /// Count jobs by status for a stage.
    pub fn status_counts(&self, stage: Stage) -> StoreResult<(usize, usize)> {
        let jobs = self.load(stage)?;
        let pending = jobs.iter().filter(|j| j.status == JobStatus::Pending).count();
        let retrying = jobs.iter().filter(|j| j.status == JobStatus::Retrying).count();
        Ok((pending, retrying))
    }

    /// Parse every stage file, surfacing corruption before a run starts.
    pub fn validate(&self) -> StoreResult<()> {
        for stage in Stage::ALL {
            self.load(stage)?;
        }
        Ok(())
    }

    /// Drop succeeded jobs older than the cutoff so stage files do not grow
    /// without bound.
    pub fn prune_succeeded(&self, cutoff: chrono::DateTime<chrono::Utc>) -> StoreResult<usize> {
        let mut pruned = 0;
        for stage in Stage::ALL {
            pruned += self.with_stage(stage, |jobs| {
                let before = jobs.len();
                jobs.retain(|j| !(j.status == JobStatus::Succeeded && j.updated_at < cutoff));
                before - jobs.len()
            })?;
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drama_models::JobId;

    fn store() -> (tempfile::TempDir, JobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_load_missing_stage_is_empty() {
        let (_dir, store) = store();
        assert!(store.load(Stage::Scout).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let (_dir, store) = store();
        let job = Job::with_id(
            JobId::from_string("s-1"),
            Stage::Voiceover,
            serde_json::json!({"take": 1}),
        );
        store.upsert(job.clone()).unwrap();

        let mut updated = job;
        updated.payload = serde_json::json!({"take": 2});
        store.upsert(updated).unwrap();

        let jobs = store.load(Stage::Voiceover).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].payload["take"], 2);
    }

    #[test]
    fn test_order_preserved() {
        let (_dir, store) = store();
        for n in 0..3 {
            store
                .upsert(Job::with_id(
                    JobId::from_string(format!("j-{n}")),
                    Stage::Upload,
                    serde_json::Value::Null,
                ))
                .unwrap();
        }
        let ids: Vec<_> = store
            .load(Stage::Upload)
            .unwrap()
            .into_iter()
            .map(|j| j.id.0)
            .collect();
        assert_eq!(ids, vec!["j-0", "j-1", "j-2"]);
    }

    #[test]
    fn test_corrupt_file_is_fatal() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("jobs/scout.json"), "{not json").unwrap();
        assert!(matches!(
            store.validate(),
            Err(crate::StoreError::Corrupt { .. })
        ));
    }
}
