//! # Cartstore
//!
//! A durable, sharded store of shopping carts kept as two mirrored indexes:
//! customer → items and item → customers, each a multiset of peer ids.
//!
//! ## Features
//!
//! - **Fail-fast concurrency**: every shard is guarded by a try-lock; busy
//!   shards answer `Unavailable` instead of blocking
//! - **Lazy shards**: one LMDB environment per (index, shard), created on first write
//! - **Consistent dual writes**: an intent log, compensation and startup
//!   recovery keep both indexes in step
//! - **Line protocol server**: `cartd` exposes the store over TCP
//!
//! ## Quick Start
//!
//! ```ignore
//! use cartstore::*;
//!
//! let store = CartStoreFacade::new(StoreConfig::new("./data"))?;
//!
//! store.add(4321, 1234)?;
//! store.add(4321, 1234)?;
//!
//! let cart = store.list_customer(4321)?;
//! assert_eq!(cart.get(1234), 2);
//!
//! store.remove(4321, 1234)?;
//! store.close()?;
//! # Ok::<(), cartstore::error::CartError>(())
//! ```
//!
//! Calls never wait on each other. A call that finds its shard busy returns
//! `CartError::Unavailable`; check `is_retryable()` and try again.

pub mod api;
pub mod net;
pub mod runtime;
pub mod state;
pub mod storage;

pub use crate::api::{error, facade, types};
pub use crate::runtime::{coordinator, metrics};
pub use crate::storage::fs::store_lock;
pub use crate::storage::metadata;

pub use api::error::{CartError, CartResult};
pub use api::facade::{CartFacade, CartStoreFacade, StoreConfig};
pub use api::types::*;
pub use net::server::{CartServer, CartServerHandle, ServerConfig, ServerError};
pub use runtime::coordinator::Coordinator;
pub use runtime::metrics::{CartMetrics, MetricsSnapshot};
pub use state::lock::{ShardGuard, ShardedLock};
pub use storage::fs::store_lock::StoreLockGuard;
pub use storage::metadata::{Intent, IntentId, LmdbMetadataStore, MetadataStore, ShardLayout};
pub use storage::sharded::ShardedStorage;
