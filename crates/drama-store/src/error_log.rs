//! Capped error log store.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use drama_models::ErrorLogEntry;

use crate::error::StoreResult;
use crate::file::{load_or, save};
use crate::lock::FileLock;

/// Maximum entries retained in `error_log.json`.
const MAX_ENTRIES: usize = 100;

/// Rolling log of terminal job failures for operator inspection.
#[derive(Debug, Clone)]
pub struct ErrorLogStore {
    path: PathBuf,
}

impl ErrorLogStore {
    pub fn new(state_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(state_dir)?;
        Ok(Self {
            path: state_dir.join("error_log.json"),
        })
    }

    /// Append an entry, trimming to the most recent `MAX_ENTRIES`.
    pub fn append(&self, entry: ErrorLogEntry) -> StoreResult<()> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut entries: Vec<ErrorLogEntry> = load_or(&self.path, Vec::new())?;
        entries.push(entry);
        if entries.len() > MAX_ENTRIES {
            let excess = entries.len() - MAX_ENTRIES;
            entries.drain(..excess);
        }
        save(&self.path, &entries)
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> StoreResult<Vec<ErrorLogEntry>> {
        let _lock = FileLock::acquire(&self.path)?;
        let entries: Vec<ErrorLogEntry> = load_or(&self.path, Vec::new())?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.into_iter().skip(skip).collect())
    }

    /// Number of entries recorded since `cutoff`.
    pub fn count_since(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let _lock = FileLock::acquire(&self.path)?;
        let entries: Vec<ErrorLogEntry> = load_or(&self.path, Vec::new())?;
        Ok(entries.iter().filter(|e| e.timestamp > cutoff).count())
    }

    /// Truncate the log.
    pub fn clear(&self) -> StoreResult<()> {
        let _lock = FileLock::acquire(&self.path)?;
        save(&self.path, &Vec::<ErrorLogEntry>::new())
    }

    /// Parse the file, surfacing corruption before a run starts.
    pub fn validate(&self) -> StoreResult<()> {
        self.recent(0).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drama_models::{Severity, Stage};

    fn entry(n: usize) -> ErrorLogEntry {
        ErrorLogEntry::new(Stage::Upload, "attempt", format!("error {n}"), Severity::Error)
    }

    #[test]
    fn test_capped_at_max_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = ErrorLogStore::new(dir.path()).unwrap();

        for n in 0..(MAX_ENTRIES + 10) {
            store.append(entry(n)).unwrap();
        }

        let recent = store.recent(MAX_ENTRIES * 2).unwrap();
        assert_eq!(recent.len(), MAX_ENTRIES);
        // Oldest entries were dropped.
        assert_eq!(recent[0].error, "error 10");
    }

    #[test]
    fn test_recent_returns_tail() {
        let dir = tempfile::tempdir().unwrap();
        let store = ErrorLogStore::new(dir.path()).unwrap();
        for n in 0..5 {
            store.append(entry(n)).unwrap();
        }
        let recent = store.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].error, "error 4");
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = ErrorLogStore::new(dir.path()).unwrap();
        store.append(entry(0)).unwrap();
        store.clear().unwrap();
        assert!(store.recent(10).unwrap().is_empty());
    }
}
