use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use crate::error::{CartError, CartResult};
use crate::storage::shard::ShardStore;
use crate::types::{Count, IndexKind, Key, Multiset};

/// The N shard stores backing one logical index.
///
/// Slots are created lazily, each behind its own once-cell so concurrent first
/// accesses to a shard open exactly one environment. The outer `RwLock` is only
/// write-locked by [`ShardedStorage::close`], which takes every slot out.
pub struct ShardedStorage {
    index: IndexKind,
    root: PathBuf,
    map_size: usize,
    shard_count: usize,
    slots: RwLock<Option<Box<[OnceCell<ShardStore>]>>>,
    stores_opened: AtomicUsize,
}

impl ShardedStorage {
    pub fn new(index: IndexKind, root: impl AsRef<Path>, shard_count: usize, map_size: usize) -> Self {
        assert!(shard_count > 0, "sharded storage requires at least one shard");
        let slots = (0..shard_count)
            .map(|_| OnceCell::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            index,
            root: root.as_ref().to_path_buf(),
            map_size,
            shard_count,
            slots: RwLock::new(Some(slots)),
            stores_opened: AtomicUsize::new(0),
        }
    }

    pub fn index(&self) -> IndexKind {
        self.index
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    #[inline]
    pub fn shard_of(&self, key: Key) -> usize {
        key as usize % self.shard_count
    }

    /// Directory of one shard: `<root>/<index>-<shard>`.
    pub fn shard_path(&self, shard: usize) -> PathBuf {
        self.root.join(format!("{}-{}", self.index.name(), shard))
    }

    /// Number of shard environments opened since construction.
    pub fn stores_opened(&self) -> usize {
        self.stores_opened.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.slots.read().is_none()
    }

    fn resolve<'a>(
        &self,
        slots: &'a [OnceCell<ShardStore>],
        shard: usize,
    ) -> CartResult<&'a ShardStore> {
        slots[shard].get_or_try_init(|| {
            let path = self.shard_path(shard);
            let store = ShardStore::open(self.index, shard, &path, self.map_size)?;
            self.stores_opened.fetch_add(1, Ordering::AcqRel);
            tracing::debug!(index = %self.index, shard, path = ?path, "opened shard store");
            Ok(store)
        })
    }

    /// Like `resolve`, but never creates a shard that does not exist on disk.
    fn resolve_existing<'a>(
        &self,
        slots: &'a [OnceCell<ShardStore>],
        shard: usize,
    ) -> CartResult<Option<&'a ShardStore>> {
        if let Some(store) = slots[shard].get() {
            return Ok(Some(store));
        }
        if !ShardStore::exists(&self.shard_path(shard)) {
            return Ok(None);
        }
        self.resolve(slots, shard).map(Some)
    }

    /// Read-only access to the multiset stored under `key`.
    ///
    /// Fails with `NotFound` when the shard, its bucket, or the entry does not
    /// exist. Never writes and never creates a shard.
    pub fn observe<R, F>(&self, key: Key, visitor: F) -> CartResult<R>
    where
        F: FnOnce(&Multiset) -> CartResult<R>,
    {
        let guard = self.slots.read();
        let slots = guard.as_deref().ok_or(CartError::Closed)?;
        let not_found = || CartError::NotFound {
            index: self.index,
            key,
        };

        let store = self
            .resolve_existing(slots, self.shard_of(key))?
            .ok_or_else(not_found)?;
        store.observe(key, visitor)?.ok_or_else(not_found)
    }

    /// Count of `peer` under `key`, zero when anything along the way is absent.
    pub fn count(&self, key: Key, peer: Key) -> CartResult<Count> {
        let guard = self.slots.read();
        let slots = guard.as_deref().ok_or(CartError::Closed)?;

        match self.resolve_existing(slots, self.shard_of(key))? {
            Some(store) => store.count(key, peer),
            None => Ok(0),
        }
    }

    /// Read-modify-write of the multiset under `key`, creating the shard on demand.
    pub fn change<F>(&self, key: Key, peer: Key, mutator: F) -> CartResult<Count>
    where
        F: FnOnce(&mut Multiset, Key) -> CartResult<()>,
    {
        let guard = self.slots.read();
        let slots = guard.as_deref().ok_or(CartError::Closed)?;

        let store = self.resolve(slots, self.shard_of(key))?;
        store.change(key, peer, mutator)
    }

    /// Visits every entry of every shard present on disk.
    pub fn scan<F>(&self, mut visitor: F) -> CartResult<usize>
    where
        F: FnMut(Key, &Multiset),
    {
        let guard = self.slots.read();
        let slots = guard.as_deref().ok_or(CartError::Closed)?;

        let mut visited = 0;
        for shard in 0..self.shard_count {
            if let Some(store) = self.resolve_existing(slots, shard)? {
                visited += store.scan(&mut visitor)?;
            }
        }
        Ok(visited)
    }

    /// Flushes and closes every shard store opened so far.
    ///
    /// Later calls are no-ops; every other operation fails with `Closed`.
    pub fn close(&self) -> CartResult<()> {
        let Some(slots) = self.slots.write().take() else {
            return Ok(());
        };

        let mut first_error = None;
        let mut closed = 0usize;
        for cell in slots.into_vec() {
            if let Some(store) = cell.into_inner() {
                let shard = store.shard();
                match store.close() {
                    Ok(()) => closed += 1,
                    Err(err) => {
                        tracing::error!(index = %self.index, shard, ?err, "failed to close shard store");
                        first_error.get_or_insert(err);
                    }
                }
            }
        }

        tracing::debug!(index = %self.index, closed, "closed sharded storage");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for ShardedStorage {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(index = %self.index, ?err, "failed to close sharded storage during drop");
        }
    }
}
