use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{CartError, CartResult};
use crate::storage::metadata::{Intent, IntentId, MetadataStore, ShardLayout};

mod env;

use env::EnvHandles;

/// LMDB-backed metadata: shard layout and the dual-write intent log.
pub struct LmdbMetadataStore {
    path: PathBuf,
    handles: RwLock<Option<EnvHandles>>,
    next_intent: AtomicU64,
}

impl LmdbMetadataStore {
    const SHARD_LAYOUT_KEY: &'static str = "shard_layout";
    pub const DEFAULT_MAP_SIZE: usize = env::DEFAULT_MAP_SIZE;

    pub fn new(path: impl AsRef<Path>) -> CartResult<Self> {
        Self::new_with_map_size(path, Self::DEFAULT_MAP_SIZE)
    }

    pub fn new_with_map_size(path: impl AsRef<Path>, map_size: usize) -> CartResult<Self> {
        let handles = env::open_rw(path.as_ref(), map_size)?;

        let next_intent = {
            let txn = handles.env.read_txn()?;
            let last = handles.intents_db.last(&txn)?;
            last.map(|(id, _)| id + 1).unwrap_or(1)
        };

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            handles: RwLock::new(Some(handles)),
            next_intent: AtomicU64::new(next_intent),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_handles<R>(&self, f: impl FnOnce(&EnvHandles) -> CartResult<R>) -> CartResult<R> {
        let guard = self.handles.read();
        let handles = guard.as_ref().ok_or(CartError::Closed)?;
        f(handles)
    }
}

impl MetadataStore for LmdbMetadataStore {
    fn load_shard_layout(&self) -> CartResult<Option<ShardLayout>> {
        self.with_handles(|h| {
            let txn = h.env.read_txn()?;
            if let Some(bytes) = h.config_db.get(&txn, Self::SHARD_LAYOUT_KEY)? {
                Ok(Some(bincode::deserialize(bytes)?))
            } else {
                Ok(None)
            }
        })
    }

    fn store_shard_layout(&self, layout: &ShardLayout) -> CartResult<()> {
        self.with_handles(|h| {
            let mut txn = h.env.write_txn()?;
            let bytes = bincode::serialize(layout)?;
            h.config_db
                .put(&mut txn, Self::SHARD_LAYOUT_KEY, bytes.as_slice())?;
            txn.commit()?;
            Ok(())
        })
    }

    fn record_intent(&self, intent: &Intent) -> CartResult<IntentId> {
        self.with_handles(|h| {
            let id = self.next_intent.fetch_add(1, Ordering::AcqRel);
            let mut txn = h.env.write_txn()?;
            h.intents_db.put(&mut txn, &id, intent)?;
            txn.commit()?;
            Ok(id)
        })
    }

    fn clear_intent(&self, id: IntentId) -> CartResult<()> {
        self.with_handles(|h| {
            let mut txn = h.env.write_txn()?;
            h.intents_db.delete(&mut txn, &id)?;
            txn.commit()?;
            Ok(())
        })
    }

    fn pending_intents(&self) -> CartResult<Vec<(IntentId, Intent)>> {
        self.with_handles(|h| {
            let txn = h.env.read_txn()?;
            let mut pending = Vec::new();
            for result in h.intents_db.iter(&txn)? {
                pending.push(result?);
            }
            Ok(pending)
        })
    }

    fn close(&self) -> CartResult<()> {
        let Some(handles) = self.handles.write().take() else {
            return Ok(());
        };
        handles.env.force_sync()?;
        handles.env.prepare_for_closing().wait();
        tracing::debug!(path = ?self.path, "closed metadata store");
        Ok(())
    }
}

impl Drop for LmdbMetadataStore {
    fn drop(&mut self) {
        if let Err(err) = MetadataStore::close(self) {
            tracing::warn!(path = ?self.path, ?err, "failed to close metadata store during drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::tempdir_in;

    use crate::types::CartOp;

    fn sample_intent(customer: u32, item: u32) -> Intent {
        Intent {
            customer,
            item,
            op: CartOp::Add,
            customer_before: 2,
            item_before: 2,
        }
    }

    fn scratch() -> tempfile::TempDir {
        let workspace_tmp = std::env::current_dir().unwrap().join("target/testdata");
        fs::create_dir_all(&workspace_tmp).unwrap();
        tempdir_in(&workspace_tmp).unwrap()
    }

    #[test]
    fn shard_layout_round_trip() {
        let tmp = scratch();
        let store = LmdbMetadataStore::new(tmp.path()).expect("metadata store should initialize");

        assert!(store.load_shard_layout().unwrap().is_none());
        store
            .store_shard_layout(&ShardLayout { shards_count: 1024 })
            .unwrap();
        assert_eq!(
            store.load_shard_layout().unwrap(),
            Some(ShardLayout { shards_count: 1024 })
        );
        assert!(store.path().exists());
    }

    #[test]
    fn intents_are_listed_until_cleared() {
        let tmp = scratch();
        let store = LmdbMetadataStore::new(tmp.path()).unwrap();

        let first = store.record_intent(&sample_intent(1, 2)).unwrap();
        let second = store.record_intent(&sample_intent(3, 4)).unwrap();
        assert!(second > first);

        let pending = store.pending_intents().unwrap();
        assert_eq!(
            pending,
            vec![(first, sample_intent(1, 2)), (second, sample_intent(3, 4))]
        );

        store.clear_intent(first).unwrap();
        assert_eq!(
            store.pending_intents().unwrap(),
            vec![(second, sample_intent(3, 4))]
        );
    }

    #[test]
    fn intent_ids_continue_after_reopen() {
        let tmp = scratch();

        let store = LmdbMetadataStore::new(tmp.path()).unwrap();
        let kept = store.record_intent(&sample_intent(5, 6)).unwrap();
        MetadataStore::close(&store).unwrap();
        assert!(matches!(
            store.pending_intents().unwrap_err(),
            CartError::Closed
        ));
        drop(store);

        let reopened = LmdbMetadataStore::new(tmp.path()).unwrap();
        let next = reopened.record_intent(&sample_intent(7, 8)).unwrap();
        assert!(next > kept);
        assert_eq!(reopened.pending_intents().unwrap().len(), 2);
    }
}
