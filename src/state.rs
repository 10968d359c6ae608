//! In-memory primitives: shard locks and multiset values.

pub mod lock;
pub mod multiset;

pub mod prelude {
    pub use super::lock::{ShardGuard, ShardedLock};
    pub use super::multiset::{add_to_set, remove_from_set, Multiset};
}
