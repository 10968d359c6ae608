use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::{CartError, CartResult};
use crate::metrics::CartMetrics;
use crate::state::lock::ShardedLock;
use crate::storage::metadata::{Intent, IntentId, MetadataStore};
use crate::storage::sharded::ShardedStorage;
use crate::types::{CartOp, Count, CustomerId, IndexKind, ItemId, Key, Multiset};

mod recovery;

/// Keeps the customer and item indexes in step.
///
/// Every logical operation takes the customer shard lock, then the item shard
/// lock, both without waiting. A dual write is bracketed by a durable intent
/// holding the pair's before-counts: when the item write fails the customer
/// write is compensated, and an intent that cannot be cleared is undone either
/// by the next operation on the same pair or by [`Coordinator::recover`] at the
/// next open.
pub struct Coordinator {
    customer_locks: ShardedLock,
    item_locks: ShardedLock,
    customers: ShardedStorage,
    items: ShardedStorage,
    metadata: Arc<dyn MetadataStore>,
    stranded: Mutex<HashMap<(CustomerId, ItemId), (IntentId, Intent)>>,
    metrics: CartMetrics,
    #[cfg(test)]
    compensation_faults: std::sync::atomic::AtomicUsize,
}

impl Coordinator {
    pub fn new(
        customers: ShardedStorage,
        items: ShardedStorage,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        assert_eq!(customers.index(), IndexKind::Customer);
        assert_eq!(items.index(), IndexKind::Item);

        Self {
            customer_locks: ShardedLock::new(customers.shard_count()),
            item_locks: ShardedLock::new(items.shard_count()),
            customers,
            items,
            metadata,
            stranded: Mutex::new(HashMap::new()),
            metrics: CartMetrics::new(),
            #[cfg(test)]
            compensation_faults: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn locks(&self, index: IndexKind) -> &ShardedLock {
        match index {
            IndexKind::Customer => &self.customer_locks,
            IndexKind::Item => &self.item_locks,
        }
    }

    pub fn storage(&self, index: IndexKind) -> &ShardedStorage {
        match index {
            IndexKind::Customer => &self.customers,
            IndexKind::Item => &self.items,
        }
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn metrics(&self) -> &CartMetrics {
        &self.metrics
    }

    /// Pairs whose intent could not be cleared in this process.
    pub fn stranded_pairs(&self) -> usize {
        self.stranded.lock().len()
    }

    /// Applies `op` to the pair in both indexes.
    ///
    /// Fails with `Unavailable` when either shard lock is taken; nothing is
    /// changed in that case and the call can be retried.
    pub fn apply(&self, customer: CustomerId, item: ItemId, op: CartOp) -> CartResult<()> {
        let started = Instant::now();
        let result = self.apply_locked(customer, item, op);
        match &result {
            Ok(()) => self.metrics.record_apply(op, started.elapsed()),
            Err(err) => self.metrics.record_failure(err),
        }
        result
    }

    fn apply_locked(&self, customer: CustomerId, item: ItemId, op: CartOp) -> CartResult<()> {
        let _customer_guard = self
            .customer_locks
            .try_guard(customer)
            .ok_or_else(|| self.unavailable(IndexKind::Customer, customer))?;
        let _item_guard = self
            .item_locks
            .try_guard(item)
            .ok_or_else(|| self.unavailable(IndexKind::Item, item))?;

        self.repair_stranded(customer, item)?;

        let intent = Intent {
            customer,
            item,
            op,
            customer_before: self.customers.count(customer, item)?,
            item_before: self.items.count(item, customer)?,
        };
        let intent_id = self.metadata.record_intent(&intent)?;

        if let Err(err) = self
            .customers
            .change(customer, item, |set, peer| op.apply(set, peer))
        {
            self.settle(intent_id, intent);
            return Err(err);
        }

        if let Err(err) = self
            .items
            .change(item, customer, |set, peer| op.apply(set, peer))
        {
            tracing::warn!(
                customer,
                item,
                %op,
                ?err,
                "item index write failed; compensating customer index"
            );
            self.compensate(intent_id, intent);
            return Err(err);
        }

        if let Err(err) = self.metadata.clear_intent(intent_id) {
            self.strand(intent_id, intent, &err);
            return Err(err);
        }

        tracing::trace!(customer, item, %op, "applied");
        Ok(())
    }

    /// Reads the multiset stored under `key` in the chosen index.
    pub fn list(&self, index: IndexKind, key: Key) -> CartResult<Multiset> {
        let result = self.list_locked(index, key);
        match &result {
            Ok(_) => self.metrics.record_list(),
            Err(err) => self.metrics.record_failure(err),
        }
        result
    }

    fn list_locked(&self, index: IndexKind, key: Key) -> CartResult<Multiset> {
        let _guard = self
            .locks(index)
            .try_guard(key)
            .ok_or_else(|| self.unavailable(index, key))?;
        self.storage(index).observe(key, |set| Ok(set.clone()))
    }

    /// Closes both indexes and the metadata store, reporting the first failure.
    pub fn close(&self) -> CartResult<()> {
        let results = [
            self.customers.close(),
            self.items.close(),
            self.metadata.close(),
        ];
        results.into_iter().collect::<CartResult<Vec<()>>>()?;
        Ok(())
    }

    fn unavailable(&self, index: IndexKind, key: Key) -> CartError {
        CartError::Unavailable {
            index,
            shard: self.locks(index).shard_of(key),
        }
    }

    /// Restores the customer write after the item write failed.
    fn compensate(&self, intent_id: IntentId, intent: Intent) {
        let restored = self.compensation_fault().and_then(|()| {
            self.customers.change(
                intent.customer,
                intent.item,
                restore_to(intent.customer_before),
            )
        });
        match restored {
            Ok(_) => {
                self.metrics.record_compensation(true);
                self.settle(intent_id, intent);
            }
            Err(err) => {
                self.metrics.record_compensation(false);
                tracing::error!(
                    customer = intent.customer,
                    item = intent.item,
                    intent_id,
                    ?err,
                    "compensation failed; indexes disagree until the intent is undone"
                );
                self.strand(intent_id, intent, &err);
            }
        }
    }

    #[cfg(not(test))]
    fn compensation_fault(&self) -> CartResult<()> {
        Ok(())
    }

    /// Fails the next `compensation_faults` compensating writes.
    #[cfg(test)]
    fn compensation_fault(&self) -> CartResult<()> {
        use std::sync::atomic::Ordering;

        let remaining = self.compensation_faults.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(());
        }
        self.compensation_faults.store(remaining - 1, Ordering::SeqCst);
        Err(CartError::Io(std::io::Error::other(
            "simulated compensation failure",
        )))
    }

    /// Clears an intent whose writes left both indexes at their before-counts.
    fn settle(&self, intent_id: IntentId, intent: Intent) {
        if let Err(err) = self.metadata.clear_intent(intent_id) {
            self.strand(intent_id, intent, &err);
        }
    }

    fn strand(&self, intent_id: IntentId, intent: Intent, err: &CartError) {
        tracing::warn!(
            customer = intent.customer,
            item = intent.item,
            intent_id,
            ?err,
            "intent left pending"
        );
        self.stranded
            .lock()
            .insert((intent.customer, intent.item), (intent_id, intent));
    }

    /// Undoes a stranded intent on this pair. Callers hold both pair locks.
    fn repair_stranded(&self, customer: CustomerId, item: ItemId) -> CartResult<()> {
        let stranded = self.stranded.lock().get(&(customer, item)).copied();
        if let Some((intent_id, intent)) = stranded {
            self.undo(intent_id, &intent)?;
            self.stranded.lock().remove(&(customer, item));
            tracing::info!(customer, item, intent_id, "repaired stranded intent");
        }
        Ok(())
    }
}

fn restore_to(count: Count) -> impl FnOnce(&mut Multiset, Key) -> CartResult<()> {
    move |set, peer| {
        set.restore(peer, count);
        Ok(())
    }
}
