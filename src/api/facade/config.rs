use std::path::{Path, PathBuf};

use crate::error::{CartError, CartResult};

/// Shard count used when neither the caller nor the data directory names one.
pub const DEFAULT_SHARDS_COUNT: usize = 1024;

/// Default LMDB map size of each shard environment.
pub const DEFAULT_SHARD_MAP_SIZE: usize = 64 << 20;

/// Default LMDB map size of the metadata environment.
pub const DEFAULT_METADATA_MAP_SIZE: usize = 16 << 20;

const MIN_MAP_SIZE: usize = 1 << 20;

/// Configuration for opening a cart store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base directory for all store data
    pub data_dir: PathBuf,
    /// Shards per index. `None` reuses the layout recorded in the data
    /// directory, or [`DEFAULT_SHARDS_COUNT`] for a fresh one.
    pub shards_count: Option<usize>,
    /// LMDB map size of every shard environment, in bytes
    pub shard_map_size: usize,
    /// LMDB map size of the metadata environment, in bytes
    pub metadata_map_size: usize,
    /// Wipe all shards and metadata before opening
    pub flush: bool,
}

impl StoreConfig {
    /// # Examples
    ///
    /// ```ignore
    /// use cartstore::StoreConfig;
    ///
    /// let config = StoreConfig::new("./data").with_shards_count(64);
    /// ```
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            shards_count: None,
            shard_map_size: DEFAULT_SHARD_MAP_SIZE,
            metadata_map_size: DEFAULT_METADATA_MAP_SIZE,
            flush: false,
        }
    }

    /// Pins the shard count. Opening a directory created with a different
    /// count fails with `ConfigurationMismatch`.
    pub fn with_shards_count(mut self, shards_count: usize) -> Self {
        self.shards_count = Some(shards_count);
        self
    }

    pub fn with_shard_map_size(mut self, size: usize) -> Self {
        self.shard_map_size = size;
        self
    }

    pub fn with_metadata_map_size(mut self, size: usize) -> Self {
        self.metadata_map_size = size;
        self
    }

    /// Starts from an empty store, discarding everything in `data_dir`.
    pub fn with_flush(mut self, flush: bool) -> Self {
        self.flush = flush;
        self
    }

    /// Returns the directory holding one LMDB environment per (index, shard).
    pub fn shards_dir(&self) -> PathBuf {
        self.data_dir.join("shards")
    }

    /// Returns the path to the metadata directory.
    pub fn metadata_dir(&self) -> PathBuf {
        self.data_dir.join("metadata")
    }

    pub fn validate(&self) -> CartResult<()> {
        if let Some(shards_count) = self.shards_count {
            ensure_at_least("shards_count", 1, shards_count)?;
        }
        ensure_at_least("shard_map_size", MIN_MAP_SIZE, self.shard_map_size)?;
        ensure_at_least("metadata_map_size", MIN_MAP_SIZE, self.metadata_map_size)?;
        Ok(())
    }
}

fn ensure_at_least(field: &'static str, min: usize, value: usize) -> CartResult<()> {
    if value < min {
        return Err(CartError::InvalidConfiguration { field, min, value });
    }
    Ok(())
}
