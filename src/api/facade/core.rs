use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::coordinator::Coordinator;
use crate::error::CartResult;
use crate::metadata::{LmdbMetadataStore, MetadataStore};
use crate::metrics::CartMetrics;
use crate::storage::sharded::ShardedStorage;
use crate::store_lock::StoreLockGuard;
use crate::types::{AuditReport, CartOp, CustomerId, IndexKind, ItemId, Key, Multiset};

use super::config::StoreConfig;
use super::recovery::{flush_data_dir, resolve_shard_layout};
use super::CartFacade;

/// Main implementation of the store facade.
///
/// Handles are cheap to clone and share one coordinator. The store closes
/// when [`CartStoreFacade::close`] is called or the last handle is dropped.
pub struct CartStoreFacade {
    coordinator: Arc<Coordinator>,
    lock: Arc<StoreLockGuard>,
    shutdown_state: Arc<AtomicBool>,
    handle_count: Arc<AtomicUsize>,
}

impl Clone for CartStoreFacade {
    fn clone(&self) -> Self {
        self.handle_count.fetch_add(1, Ordering::AcqRel);
        Self {
            coordinator: Arc::clone(&self.coordinator),
            lock: Arc::clone(&self.lock),
            shutdown_state: Arc::clone(&self.shutdown_state),
            handle_count: Arc::clone(&self.handle_count),
        }
    }
}

impl CartStoreFacade {
    /// Opens (or creates) the store described by `config`.
    ///
    /// Takes the data directory lock, resolves the shard layout against the
    /// one recorded on disk and rolls back any operation an earlier process
    /// left half-applied before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the configuration is invalid
    /// - another process holds the data directory
    /// - `shards_count` differs from the recorded layout
    /// - LMDB initialization or recovery fails
    pub fn new(config: StoreConfig) -> CartResult<Self> {
        config.validate()?;
        let lock = Arc::new(StoreLockGuard::acquire(&config.data_dir)?);

        if config.flush {
            flush_data_dir(&config)?;
        }
        std::fs::create_dir_all(config.shards_dir())?;

        let metadata = Arc::new(LmdbMetadataStore::new_with_map_size(
            config.metadata_dir(),
            config.metadata_map_size,
        )?);
        let layout = resolve_shard_layout(metadata.as_ref(), &config)?;

        let shards_dir = config.shards_dir();
        let coordinator = Coordinator::new(
            ShardedStorage::new(
                IndexKind::Customer,
                &shards_dir,
                layout.shards_count,
                config.shard_map_size,
            ),
            ShardedStorage::new(
                IndexKind::Item,
                &shards_dir,
                layout.shards_count,
                config.shard_map_size,
            ),
            metadata as Arc<dyn MetadataStore>,
        );

        let recovered = coordinator.recover()?;
        tracing::info!(
            data_dir = ?config.data_dir,
            shards_count = layout.shards_count,
            recovered,
            "cart store opened"
        );

        Ok(Self {
            coordinator: Arc::new(coordinator),
            lock,
            shutdown_state: Arc::new(AtomicBool::new(false)),
            handle_count: Arc::new(AtomicUsize::new(1)),
        })
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn metrics(&self) -> &CartMetrics {
        self.coordinator.metrics()
    }

    pub fn shards_count(&self) -> usize {
        self.coordinator.locks(IndexKind::Customer).shard_count()
    }

    /// Cross-checks both indexes. See [`Coordinator::audit`].
    pub fn audit(&self) -> CartResult<AuditReport> {
        self.coordinator.audit()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown_state.load(Ordering::Acquire)
    }

    /// Flushes and closes every shard and the metadata store.
    pub fn close(&self) -> CartResult<()> {
        if self
            .shutdown_state
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        match self.coordinator.close() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.shutdown_state.store(false, Ordering::Release);
                Err(err)
            }
        }
    }
}

impl CartFacade for CartStoreFacade {
    fn apply(&self, customer: CustomerId, item: ItemId, op: CartOp) -> CartResult<()> {
        self.coordinator.apply(customer, item, op)
    }

    fn list(&self, index: IndexKind, key: Key) -> CartResult<Multiset> {
        self.coordinator.list(index, key)
    }

    fn close(&self) -> CartResult<()> {
        CartStoreFacade::close(self)
    }
}

impl Drop for CartStoreFacade {
    fn drop(&mut self) {
        if self.handle_count.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        if self
            .shutdown_state
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        if let Err(err) = self.coordinator.close() {
            tracing::warn!(error = ?err, "failed to close cart store during drop");
        }
    }
}
