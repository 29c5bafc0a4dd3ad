//! Per-sink counters
//!
//! Updated by the fan-out loop (dispatched, dropped, queue depth) and by the
//! sink worker (writes, failures); read as a whole through `snapshot`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct SinkMetrics {
    queue_len: AtomicUsize,
    /// Records accepted into the sink queue
    dispatched: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
    /// Records refused because the sink queue was full
    dropped: AtomicU64,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one drop; returns the running total
    pub fn record_drop(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len.load(Ordering::Relaxed),
            dispatched_count: self.dispatched.load(Ordering::Relaxed),
            write_count: self.written.load(Ordering::Relaxed),
            failure_count: self.failed.load(Ordering::Relaxed),
            dropped_count: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `SinkMetrics`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub dispatched_count: u64,
    pub write_count: u64,
    pub failure_count: u64,
    pub dropped_count: u64,
}
