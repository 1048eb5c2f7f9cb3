use std::fs::File;
use std::path::Path;

use fs2::FileExt;

use crate::error::TallyError;

/// Exclusive lock held for the duration of an export cycle.
///
/// The flock is released when this value is dropped.
#[derive(Debug)]
pub struct ExportLock {
    _lock_file: File,
}

impl ExportLock {
    /// Take the lock without waiting.
    /// Returns `TallyError::DbBusy` if another process holds it.
    pub fn try_acquire(path: &Path) -> Result<Self, TallyError> {
        let lock_file = open_lock_file(path)?;
        lock_file.try_lock_exclusive().map_err(|e| {
            TallyError::DbBusy(format!("export already running ({}): {}", path.display(), e))
        })?;
        Ok(Self {
            _lock_file: lock_file,
        })
    }
}

fn open_lock_file(path: &Path) -> Result<File, TallyError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(File::create(path)?)
}
