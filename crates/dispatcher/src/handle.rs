//! SinkHandle - manages a sink with isolated queue and worker task

use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use contracts::{DataSink, Record};

use crate::metrics::{MetricsSnapshot, SinkMetrics};
use crate::registry::SinkId;

/// Log every this many drops after the first
const DROP_LOG_INTERVAL: u64 = 1000;

/// Result of offering one record to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full; counted as a drop
    Dropped,
    /// Record predates the sink's registration
    Skipped,
    /// Queue already closed
    Closed,
}

/// Handle to a running sink worker
pub struct SinkHandle {
    id: SinkId,
    /// Sink name
    name: String,
    /// First sequence number this sink may receive
    joined_at: u64,
    /// Sink queue, written only by the fan-out loop
    tx: Sender<Record>,
    /// Shared metrics
    metrics: Arc<SinkMetrics>,
    /// Cancels in-flight writes once the grace period is over
    abort: CancellationToken,
    /// Worker task handle, taken on join
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SinkHandle {
    /// Create a new SinkHandle and spawn the worker task
    pub fn spawn<S: DataSink + 'static>(
        id: SinkId,
        sink: S,
        queue_capacity: usize,
        joined_at: u64,
    ) -> Self {
        let name = sink.name().to_string();
        let (tx, rx) = async_channel::bounded(queue_capacity.max(1));
        let metrics = Arc::new(SinkMetrics::new());
        let abort = CancellationToken::new();

        let worker_handle = tokio::spawn(sink_worker(
            sink,
            rx,
            Arc::clone(&metrics),
            abort.clone(),
            name.clone(),
        ));

        Self {
            id,
            name,
            joined_at,
            tx,
            metrics,
            abort,
            worker_handle: Mutex::new(Some(worker_handle)),
        }
    }

    pub fn id(&self) -> SinkId {
        self.id
    }

    /// Get sink name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn joined_at(&self) -> u64 {
        self.joined_at
    }

    /// Queue capacity
    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or_default()
    }

    /// Get current metrics
    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Offer a record to the sink without waiting
    ///
    /// A full queue drops the record for this sink only.
    pub fn try_send(&self, record: &Record) -> Delivery {
        if record.seq < self.joined_at {
            return Delivery::Skipped;
        }

        match self.tx.try_send(record.clone()) {
            Ok(()) => {
                self.metrics.record_dispatched();
                self.metrics.set_queue_len(self.tx.len());
                ::metrics::counter!("dnstap_relay_records_dispatched_total", "sink" => self.name.clone())
                    .increment(1);
                Delivery::Queued
            }
            Err(TrySendError::Full(record)) => {
                let dropped = self.metrics.record_drop();
                ::metrics::counter!("dnstap_relay_records_dropped_total", "sink" => self.name.clone())
                    .increment(1);
                if dropped == 1 || dropped % DROP_LOG_INTERVAL == 0 {
                    warn!(
                        sink = %self.name,
                        seq = record.seq,
                        dropped,
                        "Queue full, record dropped"
                    );
                }
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Stop accepting records; queued records are still written
    pub fn close(&self) -> bool {
        self.tx.close()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Close the queue and wait for the worker to finish
    ///
    /// Writes still running after `grace` are abandoned.
    #[instrument(name = "sink_handle_join", skip(self), fields(sink = %self.name))]
    pub async fn join(&self, grace: Duration) -> MetricsSnapshot {
        self.close();
        let worker = self.worker_handle.lock().take();

        if let Some(mut worker) = worker {
            match tokio::time::timeout(grace, &mut worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(sink = %self.name, error = ?e, "Worker task panicked"),
                Err(_) => {
                    warn!(sink = %self.name, queued = self.tx.len(), "Grace period elapsed, abandoning writes");
                    self.abort.cancel();
                    if let Err(e) = worker.await {
                        error!(sink = %self.name, error = ?e, "Worker task panicked");
                    }
                }
            }
        }

        debug!(sink = %self.name, "SinkHandle shutdown complete");
        self.metrics.snapshot()
    }
}

impl Drop for SinkHandle {
    fn drop(&mut self) {
        self.tx.close();
    }
}

impl std::fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("joined_at", &self.joined_at)
            .finish_non_exhaustive()
    }
}

/// Worker task that consumes records and writes to sink
#[instrument(
    name = "sink_worker_loop",
    skip(sink, rx, metrics, abort),
    fields(sink = %name)
)]
async fn sink_worker<S: DataSink>(
    mut sink: S,
    rx: Receiver<Record>,
    metrics: Arc<SinkMetrics>,
    abort: CancellationToken,
    name: String,
) {
    debug!(sink = %name, "Sink worker started");
    let mut aborted = false;

    loop {
        let record = tokio::select! {
            biased;
            _ = abort.cancelled() => {
                aborted = true;
                break;
            }
            next = rx.recv() => match next {
                Ok(record) => record,
                Err(_) => break,
            },
        };
        metrics.set_queue_len(rx.len());

        let written = tokio::select! {
            biased;
            _ = abort.cancelled() => {
                aborted = true;
                break;
            }
            written = sink.write(&record) => written,
        };

        match written {
            Ok(()) => {
                metrics.record_write();
                ::metrics::counter!("dnstap_relay_sink_writes_total", "sink" => name.clone(), "status" => "ok")
                    .increment(1);
            }
            Err(e) => {
                metrics.record_failure();
                ::metrics::counter!("dnstap_relay_sink_writes_total", "sink" => name.clone(), "status" => "error")
                    .increment(1);
                error!(sink = %name, seq = record.seq, error = %e, "Write failed");
            }
        }

        // idle: push buffered bytes out
        if rx.is_empty() {
            let flushed = tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    aborted = true;
                    break;
                }
                flushed = sink.flush() => flushed,
            };
            if let Err(e) = flushed {
                warn!(sink = %name, error = %e, "Flush failed");
            }
        }
    }

    if aborted {
        warn!(sink = %name, "Sink worker aborted");
        return;
    }

    // Cleanup
    if let Err(e) = sink.flush().await {
        error!(sink = %name, error = %e, "Flush failed on shutdown");
    }
    if let Err(e) = sink.close().await {
        error!(sink = %name, error = %e, "Close failed on shutdown");
    }

    debug!(sink = %name, "Sink worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use contracts::ContractError;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::Notify;
    use tokio::time::{sleep, Duration};

    /// Mock sink for testing
    struct MockSink {
        name: String,
        write_count: Arc<AtomicU64>,
        closed: Arc<AtomicU64>,
        should_fail: bool,
        gate: Option<Arc<Notify>>,
    }

    impl MockSink {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                write_count: Arc::new(AtomicU64::new(0)),
                closed: Arc::new(AtomicU64::new(0)),
                should_fail: false,
                gate: None,
            }
        }
    }

    impl DataSink for MockSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn write(&mut self, _record: &Record) -> Result<(), ContractError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.should_fail {
                return Err(ContractError::sink_write(&self.name, "mock failure"));
            }
            self.write_count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            self.closed.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn record(seq: u64) -> Record {
        Record::new(seq, Bytes::from_static(b"payload"))
    }

    #[tokio::test]
    async fn test_sink_handle_basic() {
        let sink = MockSink::new("test");
        let write_count = Arc::clone(&sink.write_count);
        let closed = Arc::clone(&sink.closed);

        let handle = SinkHandle::spawn(SinkId(1), sink, 10, 0);
        for seq in 0..5 {
            assert_eq!(handle.try_send(&record(seq)), Delivery::Queued);
        }

        let snapshot = handle.join(Duration::from_secs(5)).await;
        assert_eq!(write_count.load(Ordering::Relaxed), 5);
        assert_eq!(closed.load(Ordering::Relaxed), 1);
        assert_eq!(snapshot.write_count, 5);
        assert_eq!(snapshot.dispatched_count, 5);
    }

    #[tokio::test]
    async fn test_sink_handle_queue_full() {
        let mut sink = MockSink::new("slow");
        // never released: the worker holds one record, the queue holds two
        sink.gate = Some(Arc::new(Notify::new()));

        let handle = SinkHandle::spawn(SinkId(1), sink, 2, 0);
        let mut outcomes = Vec::new();
        for seq in 0..10 {
            outcomes.push(handle.try_send(&record(seq)));
            sleep(Duration::from_millis(5)).await;
        }

        assert!(outcomes.contains(&Delivery::Dropped));
        let queued = outcomes.iter().filter(|d| **d == Delivery::Queued).count() as u64;
        assert_eq!(handle.metrics().snapshot().dropped_count, 10 - queued);

        let snapshot = handle.join(Duration::from_millis(50)).await;
        assert_eq!(snapshot.write_count, 0);
    }

    #[tokio::test]
    async fn test_records_before_join_are_skipped() {
        let sink = MockSink::new("late");
        let handle = SinkHandle::spawn(SinkId(2), sink, 10, 3);

        assert_eq!(handle.try_send(&record(2)), Delivery::Skipped);
        assert_eq!(handle.try_send(&record(3)), Delivery::Queued);

        let snapshot = handle.join(Duration::from_secs(5)).await;
        assert_eq!(snapshot.write_count, 1);
        assert_eq!(snapshot.dropped_count, 0);
    }

    #[tokio::test]
    async fn test_sink_handle_failure_isolation() {
        let mut sink = MockSink::new("failing");
        sink.should_fail = true;

        let handle = SinkHandle::spawn(SinkId(3), sink, 10, 0);
        for seq in 0..3 {
            handle.try_send(&record(seq));
        }

        let snapshot = handle.join(Duration::from_secs(5)).await;
        assert_eq!(snapshot.failure_count, 3);
        assert_eq!(handle.try_send(&record(4)), Delivery::Closed);
    }
}
