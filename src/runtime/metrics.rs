//! Runtime counters for coordinator operations.
//!
//! Counters are lock-free and monotonically increasing; `snapshot` gives a
//! consistent-enough copy for logging and health endpoints.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::CartError;
use crate::types::CartOp;

#[derive(Debug, Clone, Default)]
pub struct CartMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    adds_applied: AtomicU64,
    removes_applied: AtomicU64,
    lists_served: AtomicU64,
    unavailable_rejections: AtomicU64,
    failed_operations: AtomicU64,
    compensations: AtomicU64,
    compensation_failures: AtomicU64,
    intents_recovered: AtomicU64,
    total_apply_time_us: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub adds_applied: u64,
    pub removes_applied: u64,
    pub lists_served: u64,
    pub unavailable_rejections: u64,
    pub failed_operations: u64,
    pub compensations: u64,
    pub compensation_failures: u64,
    pub intents_recovered: u64,
    pub avg_apply_time_us: u64,
}

impl CartMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_apply(&self, op: CartOp, duration: Duration) {
        let counter = match op {
            CartOp::Add => &self.inner.adds_applied,
            CartOp::Remove => &self.inner.removes_applied,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_apply_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_list(&self) {
        self.inner.lists_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Classifies a failed operation.
    pub fn record_failure(&self, err: &CartError) {
        let counter = if err.is_retryable() {
            &self.inner.unavailable_rejections
        } else {
            &self.inner.failed_operations
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compensation(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.inner.compensations
        } else {
            &self.inner.compensation_failures
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recovered(&self, intents: usize) {
        self.inner
            .intents_recovered
            .fetch_add(intents as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        let adds = inner.adds_applied.load(Ordering::Relaxed);
        let removes = inner.removes_applied.load(Ordering::Relaxed);
        let applied = adds + removes;
        let total_time = inner.total_apply_time_us.load(Ordering::Relaxed);

        MetricsSnapshot {
            adds_applied: adds,
            removes_applied: removes,
            lists_served: inner.lists_served.load(Ordering::Relaxed),
            unavailable_rejections: inner.unavailable_rejections.load(Ordering::Relaxed),
            failed_operations: inner.failed_operations.load(Ordering::Relaxed),
            compensations: inner.compensations.load(Ordering::Relaxed),
            compensation_failures: inner.compensation_failures.load(Ordering::Relaxed),
            intents_recovered: inner.intents_recovered.load(Ordering::Relaxed),
            avg_apply_time_us: if applied == 0 { 0 } else { total_time / applied },
        }
    }
}
