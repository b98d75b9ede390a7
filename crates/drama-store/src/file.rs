//! Shared load/save helpers for flat JSON state files.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::error::{StoreError, StoreResult};

/// Load a JSON file, or return `default` if it does not exist yet.
/// A file that exists but fails to parse is fatal corruption.
pub(crate) fn load_or<T: DeserializeOwned>(path: &Path, default: T) -> StoreResult<T> {
    if !path.exists() {
        return Ok(default);
    }
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a JSON file atomically: serialize to a temp file in the same
/// directory, then rename over the target.
pub(crate) fn save<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_string_pretty(value)?;
    fs::write(&tmp, payload)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
