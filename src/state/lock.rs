use std::sync::atomic::{AtomicBool, Ordering};

use crate::types::Key;

/// Fixed array of non-blocking binary locks, one per shard.
///
/// Keys share a cell whenever `key % shard_count` collides, so a cell guards a
/// pool of keys rather than one specific key. Acquisition never waits: a
/// contended cell rejects every `try_acquire` until its holder releases it.
pub struct ShardedLock {
    cells: Box<[AtomicBool]>,
}

impl ShardedLock {
    pub fn new(shard_count: usize) -> Self {
        assert!(shard_count > 0, "sharded lock requires at least one shard");
        let cells = (0..shard_count)
            .map(|_| AtomicBool::new(false))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { cells }
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn shard_of(&self, key: Key) -> usize {
        key as usize % self.cells.len()
    }

    /// Attempts the free -> held transition for the key's shard.
    pub fn try_acquire(&self, key: Key) -> bool {
        self.cells[self.shard_of(key)]
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Performs the held -> free transition for the key's shard.
    ///
    /// # Panics
    ///
    /// Panics when the shard is not held. Releasing a lock nobody holds means
    /// the calling protocol is broken and the concurrency state can no longer
    /// be trusted.
    pub fn release(&self, key: Key) {
        let shard = self.shard_of(key);
        if self.cells[shard]
            .compare_exchange(true, false, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            tracing::error!(key, shard, "released a shard lock that was not held");
            panic!("internal error: releasing shard lock {shard} (key {key}) that was not held");
        }
    }

    /// Like [`ShardedLock::try_acquire`], returning a guard that releases on drop.
    pub fn try_guard(&self, key: Key) -> Option<ShardGuard<'_>> {
        if self.try_acquire(key) {
            Some(ShardGuard { lock: self, key })
        } else {
            None
        }
    }

    pub fn is_held(&self, key: Key) -> bool {
        self.cells[self.shard_of(key)].load(Ordering::Acquire)
    }
}

pub struct ShardGuard<'a> {
    lock: &'a ShardedLock,
    key: Key,
}

impl ShardGuard<'_> {
    pub fn shard(&self) -> usize {
        self.lock.shard_of(self.key)
    }
}

impl Drop for ShardGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(self.key);
    }
}
