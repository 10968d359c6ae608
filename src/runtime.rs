//! Runtime protocols: cross-index coordination, recovery and metrics collection.

pub mod coordinator;
pub mod metrics;

pub mod prelude {
    pub use super::coordinator::Coordinator;
    pub use super::metrics::{CartMetrics, MetricsSnapshot};
}
