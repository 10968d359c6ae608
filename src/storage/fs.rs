//! Filesystem helpers shared by persistence components.

pub mod store_lock;

pub use store_lock::StoreLockGuard;

use crate::error::CartResult;
use std::path::Path;

/// Sync directory entries to disk to guarantee metadata durability.
pub fn sync_directory(path: &Path) -> CartResult<()> {
    let dir = std::fs::File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

/// Removes everything inside `dir`, keeping `dir` itself. A missing `dir` is fine.
pub fn remove_contents(dir: &Path) -> CartResult<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}
