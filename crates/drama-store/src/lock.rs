//! Exclusive advisory file locks.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::StoreResult;

/// Exclusive advisory lock on a sidecar `<file>.lock`, released on drop.
///
/// Locking a sidecar rather than the data file itself lets the data file be
/// atomically replaced (temp file + rename) while the lock is held.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Block until the exclusive lock for `data_path` is acquired.
    pub fn acquire(data_path: &Path) -> StoreResult<Self> {
        let lock_path = Self::lock_path(data_path);
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }

    fn lock_path(data_path: &Path) -> PathBuf {
        let mut name = data_path.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        data_path.with_file_name(name)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release file lock: {}", e);
        }
    }
}
