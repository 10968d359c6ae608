//! Public API surface for cartstore consumers.
//!
//! This module groups lightweight types, error definitions, and the facade so
//! request-handling layers can drive the store without touching the
//! runtime/state/storage internals.

pub mod error;
pub mod facade;
pub mod types;

pub mod prelude {
    pub use super::error::{CartError, CartResult};
    pub use super::facade::{CartFacade, CartStoreFacade, StoreConfig};
    pub use super::types::*;
}
