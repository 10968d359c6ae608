use std::fs::{self, File, OpenOptions};
use std::path::Path;

use fs2::FileExt;

use crate::error::{CartError, CartResult};

const LOCK_FILE_NAME: &str = "cartd.lock";

/// Exclusive advisory lock on a data directory, held for the store's lifetime.
pub struct StoreLockGuard {
    file: File,
}

impl StoreLockGuard {
    pub fn acquire(data_dir: &Path) -> CartResult<Self> {
        fs::create_dir_all(data_dir)?;

        let lock_path = data_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)?;

        if FileExt::try_lock_exclusive(&file).is_err() {
            return Err(CartError::DataDirLocked { path: lock_path });
        }

        Ok(Self { file })
    }
}

impl Drop for StoreLockGuard {
    fn drop(&mut self) {
        // The OS drops the lock with the descriptor anyway.
        let _ = FileExt::unlock(&self.file);
    }
}
