use std::collections::BTreeMap;

use super::{restore_to, Coordinator};
use crate::error::CartResult;
use crate::storage::metadata::{Intent, IntentId};
use crate::types::{AuditReport, Count, CustomerId, ItemId, Mismatch};

impl Coordinator {
    /// Rolls back every intent left pending by an earlier process.
    ///
    /// Both index entries of each pair go back to the counts recorded before the
    /// interrupted write, which is correct whichever step the write reached.
    /// Must run before the coordinator serves any operation.
    pub fn recover(&self) -> CartResult<usize> {
        let pending = self.metadata.pending_intents()?;
        if pending.is_empty() {
            return Ok(0);
        }

        for (intent_id, intent) in &pending {
            self.undo(*intent_id, intent)?;
            tracing::info!(
                customer = intent.customer,
                item = intent.item,
                op = %intent.op,
                intent_id,
                "rolled back interrupted operation"
            );
        }

        self.metrics.record_recovered(pending.len());
        Ok(pending.len())
    }

    pub(super) fn undo(&self, intent_id: IntentId, intent: &Intent) -> CartResult<()> {
        self.customers.change(
            intent.customer,
            intent.item,
            restore_to(intent.customer_before),
        )?;
        self.items
            .change(intent.item, intent.customer, restore_to(intent.item_before))?;
        self.metadata.clear_intent(intent_id)
    }

    /// Scans both indexes and reports every pair whose counts disagree.
    ///
    /// Takes no shard locks; run it while the store is quiet for an exact answer.
    pub fn audit(&self) -> CartResult<AuditReport> {
        let mut pairs: BTreeMap<(CustomerId, ItemId), (Count, Count)> = BTreeMap::new();

        let customers_scanned = self.customers.scan(|customer, set| {
            for (item, count) in set.iter() {
                pairs.entry((customer, item)).or_default().0 = count;
            }
        })?;
        let items_scanned = self.items.scan(|item, set| {
            for (customer, count) in set.iter() {
                pairs.entry((customer, item)).or_default().1 = count;
            }
        })?;

        let mismatches: Vec<Mismatch> = pairs
            .iter()
            .filter(|(_, (customer_count, item_count))| customer_count != item_count)
            .map(|(&(customer, item), &(customer_count, item_count))| Mismatch {
                customer,
                item,
                customer_count,
                item_count,
            })
            .collect();

        if !mismatches.is_empty() {
            tracing::warn!(mismatches = mismatches.len(), "indexes disagree");
        }

        Ok(AuditReport {
            customers_scanned,
            items_scanned,
            pairs_checked: pairs.len(),
            mismatches,
        })
    }
}
