//! PS-009: Lock file management: load, save (atomic), path derivation.

use super::error::{Error, Result};
use super::types::StackLock;
use crate::provenance::eventlog::now_iso8601;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Derive the lock file path for a stack within the state directory.
pub fn lock_file_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("stack.lock.yaml")
}

/// Directory holding a stack's per-action build copies.
pub fn build_dir(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("builds")
}

/// Load a stack's lock file. Returns None if the file doesn't exist.
pub fn load_lock(state_dir: &Path, stack: &str) -> Result<Option<StackLock>> {
    let path = lock_file_path(state_dir, stack);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::State(format!("cannot read {}: {}", path.display(), e)))?;
    let lock: StackLock = serde_yaml_ng::from_str(&content)
        .map_err(|e| Error::State(format!("invalid lock file {}: {}", path.display(), e)))?;
    Ok(Some(lock))
}

/// Save a lock file atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &StackLock) -> Result<()> {
    let path = lock_file_path(state_dir, &lock.stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let yaml = serde_yaml_ng::to_string(lock)
        .map_err(|e| Error::State(format!("serialize error: {}", e)))?;

    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml)?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        Error::State(format!(
            "cannot rename {} to {}: {}",
            tmp_path.display(),
            path.display(),
            e
        ))
    })?;

    Ok(())
}

/// Create a new empty lock for a stack.
pub fn new_lock(stack: &str) -> StackLock {
    StackLock {
        schema: "1.0".to_string(),
        stack: stack.to_string(),
        generated_at: now_iso8601(),
        generator: format!("pipestack {}", env!("CARGO_PKG_VERSION")),
        resources: IndexMap::new(),
        outputs: IndexMap::new(),
    }
}
