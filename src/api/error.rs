use std::path::PathBuf;

use thiserror::Error;

use crate::types::{IndexKind, Key};

pub type CartResult<T> = Result<T, CartError>;

#[derive(Debug, Error)]
pub enum CartError {
    #[error("heed error: {0}")]
    Heed(#[from] heed::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("{index} shard {shard} is busy; retry later")]
    Unavailable { index: IndexKind, shard: usize },

    #[error("no {index} entry for key {key}")]
    NotFound { index: IndexKind, key: Key },

    #[error("{peer} is not in the set of {key}")]
    NotInCart { key: Key, peer: Key },

    #[error("count of {peer} in the set of {key} is at its maximum")]
    CountOverflow { key: Key, peer: Key },

    #[error("corrupt entry in {index} index: {reason}")]
    CorruptEntry { index: IndexKind, reason: String },

    #[error("store is closed")]
    Closed,

    #[error("data directory locked at {path:?}")]
    DataDirLocked { path: PathBuf },

    #[error("invalid configuration: {field} must be at least {min}, got {value}")]
    InvalidConfiguration {
        field: &'static str,
        min: usize,
        value: usize,
    },

    #[error("configuration mismatch: {field} (stored: {stored}, requested: {requested})")]
    ConfigurationMismatch {
        field: &'static str,
        stored: usize,
        requested: usize,
    },
}

impl CartError {
    /// Contention errors leave no trace in either index and can be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CartError::Unavailable { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CartError::NotFound { .. })
    }
}
