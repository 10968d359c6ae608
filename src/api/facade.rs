//! High-level store facade APIs and supporting utilities.

mod config;
mod core;
mod recovery;


use crate::error::CartResult;
use crate::types::{CartOp, CustomerId, IndexKind, ItemId, Key, Multiset};

pub use config::{
    StoreConfig, DEFAULT_METADATA_MAP_SIZE, DEFAULT_SHARDS_COUNT, DEFAULT_SHARD_MAP_SIZE,
};
pub use core::CartStoreFacade;

/// Main interface for interacting with the cart store.
///
/// Every call fails fast: when a shard is busy the call returns
/// `CartError::Unavailable` instead of waiting, and the caller decides
/// whether to retry.
pub trait CartFacade: Send + Sync {
    /// Applies `op` to the (customer, item) pair in both indexes.
    ///
    /// # Errors
    ///
    /// * `Unavailable` if either shard is busy; nothing was changed
    /// * `NotInCart` when removing an item the customer does not hold
    /// * `CountOverflow` when the pair's count is already at its maximum
    ///
    /// # Examples
    ///
    /// ```ignore
    /// store.apply(4321, 1234, CartOp::Add)?;
    /// ```
    fn apply(&self, customer: CustomerId, item: ItemId, op: CartOp) -> CartResult<()>;

    /// Returns the multiset stored under `key` in the chosen index.
    ///
    /// Returns `NotFound` when no entry exists; an entry whose last peer was
    /// removed is gone, so it reports `NotFound` as well.
    fn list(&self, index: IndexKind, key: Key) -> CartResult<Multiset>;

    /// Flushes and closes the store. Later calls are no-ops.
    fn close(&self) -> CartResult<()>;

    fn add(&self, customer: CustomerId, item: ItemId) -> CartResult<()> {
        self.apply(customer, item, CartOp::Add)
    }

    fn remove(&self, customer: CustomerId, item: ItemId) -> CartResult<()> {
        self.apply(customer, item, CartOp::Remove)
    }

    /// Items in the customer's cart, with counts.
    fn list_customer(&self, customer: CustomerId) -> CartResult<Multiset> {
        self.list(IndexKind::Customer, customer)
    }

    /// Customers holding the item, with counts.
    fn list_item(&self, item: ItemId) -> CartResult<Multiset> {
        self.list(IndexKind::Item, item)
    }
}
