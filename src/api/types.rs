use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CartResult;
use crate::state::multiset::{add_to_set, remove_from_set};

pub use crate::state::multiset::Multiset;

/// Identifier shared by both id spaces.
///
/// Customers and items are unrelated namespaces that happen to use the same
/// integer representation.
pub type Key = u32;

pub type CustomerId = Key;

pub type ItemId = Key;

/// Number of units a customer holds of an item. Stored counts are never zero.
pub type Count = u32;

/// One of the two directions of the customer/item association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// customer -> items held
    Customer,
    /// item -> customers holding it
    Item,
}

impl IndexKind {
    pub fn name(&self) -> &'static str {
        match self {
            IndexKind::Customer => "customer",
            IndexKind::Item => "item",
        }
    }

    pub fn is_customer(&self) -> bool {
        matches!(self, IndexKind::Customer)
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A logical mutation applied to both indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CartOp {
    Add,
    Remove,
}

impl CartOp {
    /// Applies the operation to a single multiset entry.
    pub fn apply(self, set: &mut Multiset, peer: Key) -> CartResult<()> {
        match self {
            CartOp::Add => add_to_set(set, peer),
            CartOp::Remove => remove_from_set(set, peer),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CartOp::Add => "add",
            CartOp::Remove => "remove",
        }
    }
}

impl fmt::Display for CartOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A customer/item pair whose two index entries disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    pub customer: CustomerId,
    pub item: ItemId,
    pub customer_count: Count,
    pub item_count: Count,
}

/// Result of a full cross-index consistency scan.
#[derive(Debug, Clone, Default)]
pub struct AuditReport {
    pub customers_scanned: usize,
    pub items_scanned: usize,
    pub pairs_checked: usize,
    pub mismatches: Vec<Mismatch>,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}
