use crate::error::{CartError, CartResult};
use crate::metadata::{MetadataStore, ShardLayout};
use crate::storage::fs::remove_contents;

use super::config::{StoreConfig, DEFAULT_SHARDS_COUNT};

/// Picks the shard layout for this open and records it on first use.
pub(crate) fn resolve_shard_layout(
    metadata: &dyn MetadataStore,
    config: &StoreConfig,
) -> CartResult<ShardLayout> {
    if let Some(stored) = metadata.load_shard_layout()? {
        if let Some(requested) = config.shards_count {
            if requested != stored.shards_count {
                return Err(CartError::ConfigurationMismatch {
                    field: "shards_count",
                    stored: stored.shards_count,
                    requested,
                });
            }
        }
        return Ok(stored);
    }

    let layout = ShardLayout {
        shards_count: config.shards_count.unwrap_or(DEFAULT_SHARDS_COUNT),
    };
    metadata.store_shard_layout(&layout)?;
    tracing::info!(shards_count = layout.shards_count, "recorded shard layout");
    Ok(layout)
}

/// Removes all shards and metadata, leaving the data directory and its lock.
pub(crate) fn flush_data_dir(config: &StoreConfig) -> CartResult<()> {
    tracing::warn!(data_dir = ?config.data_dir, "flushing store contents");
    remove_contents(&config.shards_dir())?;
    remove_contents(&config.metadata_dir())?;
    Ok(())
}
