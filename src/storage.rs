//! Persistence backends: codec, shard stores, metadata and filesystem helpers.

pub mod codec;
pub mod fs;
pub mod metadata;
pub mod shard;
pub mod sharded;

pub mod prelude {
    pub use super::fs::store_lock::StoreLockGuard;
    pub use super::metadata::{Intent, IntentId, LmdbMetadataStore, MetadataStore, ShardLayout};
    pub use super::shard::ShardStore;
    pub use super::sharded::ShardedStorage;
}
