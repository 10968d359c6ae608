use serde::{Deserialize, Serialize};

use crate::error::CartResult;
use crate::types::{CartOp, Count, CustomerId, ItemId};

pub mod lmdb;

pub use lmdb::LmdbMetadataStore;

/// Sequence number of a recorded intent.
pub type IntentId = u64;

/// Shard geometry a data directory was created with.
///
/// Routing is `key % shards_count`, so reopening with another count would
/// orphan every stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardLayout {
    pub shards_count: usize,
}

/// Durable record of a dual-index write that has not finished yet.
///
/// The before-counts are the pair's values in each index when the write
/// started; undoing an intent restores both, which is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub customer: CustomerId,
    pub item: ItemId,
    pub op: CartOp,
    pub customer_before: Count,
    pub item_before: Count,
}

pub trait MetadataStore: Send + Sync {
    fn load_shard_layout(&self) -> CartResult<Option<ShardLayout>>;
    fn store_shard_layout(&self, layout: &ShardLayout) -> CartResult<()>;

    /// Durably appends `intent` and returns its id.
    fn record_intent(&self, intent: &Intent) -> CartResult<IntentId>;
    fn clear_intent(&self, id: IntentId) -> CartResult<()>;
    /// Intents recorded but never cleared, oldest first.
    fn pending_intents(&self) -> CartResult<Vec<(IntentId, Intent)>>;

    fn close(&self) -> CartResult<()> {
        Ok(())
    }
}
