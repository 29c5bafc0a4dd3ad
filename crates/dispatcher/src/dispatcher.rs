//! Dispatcher - the fan-out hub between readers and sinks
//!
//! Lifecycle: `Created -> Running -> Draining -> Stopped`. While running, a
//! single loop takes records from the inbound queue in arrival order and
//! offers each one to every registered sink without waiting; a full sink
//! queue drops the record for that sink only.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{
    inbound_queue, ConfigEntry, DataSink, OutputConfig, RecordReceiver, RecordSender, RelayConfig,
    DEFAULT_DRAIN_TIMEOUT_SECS, DEFAULT_INPUT_MSG_BUFFER, DEFAULT_OUTPUT_BUFFER_SIZE,
    MIN_INPUT_MSG_BUFFER,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::metrics::MetricsSnapshot;
use crate::registry::{SinkId, SinkRegistry};
use crate::sinks::create_sink;

/// Default time a sink worker gets to finish after its queue closes
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatcherState {
    Created = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl DispatcherState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Inbound queue capacity (floored at 128)
    pub inbound_capacity: usize,
    /// Queue capacity for sinks registered without one
    pub default_sink_capacity: usize,
    /// How long `shutdown` keeps draining the inbound queue
    pub drain_timeout: Duration,
    /// How long each sink gets to finish in-flight writes
    pub grace_period: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: DEFAULT_INPUT_MSG_BUFFER,
            default_sink_capacity: DEFAULT_OUTPUT_BUFFER_SIZE,
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl DispatcherConfig {
    pub fn from_relay(config: &RelayConfig) -> Self {
        Self {
            inbound_capacity: config.input_msg_buffer,
            default_sink_capacity: config.default_buffer_size(),
            drain_timeout: Duration::from_secs(config.drain_timeout_secs),
            ..Default::default()
        }
    }
}

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder {
    config: DispatcherConfig,
}

impl DispatcherBuilder {
    /// Create a new DispatcherBuilder
    pub fn new(config: DispatcherConfig) -> Self {
        Self { config }
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.config.grace_period = grace;
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// Build a dispatcher in the `Created` state
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            config: self.config,
            state: AtomicU8::new(DispatcherState::Created as u8),
            registry: Arc::new(SinkRegistry::new()),
            inbound: None,
            fanout: None,
            stop: CancellationToken::new(),
        }
    }
}

/// What shutdown left behind
#[derive(Debug, Clone, Default)]
pub struct DispatcherReport {
    /// Records taken from the inbound queue
    pub records_dispatched: u64,
    /// Records still queued when the drain deadline passed
    pub records_discarded: usize,
    /// Final per-sink metrics, in registration order
    pub sinks: Vec<(String, MetricsSnapshot)>,
}

impl DispatcherReport {
    pub fn total_dropped(&self) -> u64 {
        self.sinks.iter().map(|(_, m)| m.dropped_count).sum()
    }
}

/// The fan-out hub
pub struct Dispatcher {
    config: DispatcherConfig,
    state: AtomicU8,
    registry: Arc<SinkRegistry>,
    inbound: Option<RecordReceiver>,
    fanout: Option<JoinHandle<u64>>,
    stop: CancellationToken,
}

impl Dispatcher {
    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: DispatcherState) {
        self.state.store(state as u8, Ordering::Release);
        debug!(state = %state, "Dispatcher state changed");
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Allocate the inbound queue and start the fan-out loop
    ///
    /// Returns the producer handle that readers enqueue into.
    #[instrument(name = "dispatcher_start", skip(self))]
    pub fn start(&mut self) -> Result<RecordSender, DispatcherError> {
        let state = self.state();
        if state != DispatcherState::Created {
            return Err(DispatcherError::invalid_state("start", state));
        }

        let capacity = self.config.inbound_capacity.max(MIN_INPUT_MSG_BUFFER);
        let (tx, rx) = inbound_queue(capacity);
        self.fanout = Some(tokio::spawn(fan_out(
            rx.clone(),
            Arc::clone(&self.registry),
            self.stop.clone(),
        )));
        self.inbound = Some(rx);
        self.set_state(DispatcherState::Running);

        info!(capacity, sinks = self.registry.len(), "Dispatcher started");
        Ok(tx)
    }

    /// Register a sink with its own queue of `capacity` records
    ///
    /// `None` uses the configured default. Records enqueued before the call
    /// are never delivered to the new sink.
    pub fn register<S: DataSink + 'static>(
        &self,
        sink: S,
        capacity: Option<usize>,
    ) -> Result<SinkId, DispatcherError> {
        let state = self.state();
        if matches!(state, DispatcherState::Draining | DispatcherState::Stopped) {
            return Err(DispatcherError::invalid_state("register a sink", state));
        }

        let capacity = capacity
            .filter(|c| *c > 0)
            .unwrap_or(self.config.default_sink_capacity);
        let joined_at = self.inbound.as_ref().map_or(0, RecordReceiver::next_seq);
        let id = self.registry.next_id();
        let handle = SinkHandle::spawn(id, sink, capacity, joined_at);

        info!(sink = %handle.name(), %id, capacity, joined_at, "Sink registered");
        self.registry.insert(Arc::new(handle));
        Ok(id)
    }

    /// Create and register every configured output
    ///
    /// Sinks that cannot be created are returned, not registered.
    #[instrument(name = "dispatcher_register_outputs", skip_all, fields(count = outputs.len()))]
    pub async fn register_outputs(
        &self,
        outputs: &[ConfigEntry<OutputConfig>],
    ) -> (Vec<SinkId>, Vec<DispatcherError>) {
        let mut ids = Vec::new();
        let mut failures = Vec::new();

        for entry in outputs {
            let capacity = entry.config.buffer_size_or(self.config.default_sink_capacity);
            let registered = match create_sink(&entry.name, &entry.config).await {
                Ok(sink) => self.register(sink, Some(capacity)),
                Err(e) => Err(e),
            };
            match registered {
                Ok(id) => ids.push(id),
                Err(e) => {
                    error!(sink = %entry.name, error = %e, "sink failed to start");
                    failures.push(e);
                }
            }
        }
        (ids, failures)
    }

    /// Remove one sink, wait for its worker and return its final metrics
    #[instrument(name = "dispatcher_deregister", skip(self))]
    pub async fn deregister(&self, id: SinkId) -> Option<(String, MetricsSnapshot)> {
        let handle = self.registry.remove(id)?;
        let snapshot = handle.join(self.config.grace_period).await;
        info!(sink = %handle.name(), %id, "Sink deregistered");
        Some((handle.name().to_string(), snapshot))
    }

    /// Current metrics for all sinks
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.registry
            .snapshot()
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    pub fn sink_count(&self) -> usize {
        self.registry.len()
    }

    /// Records waiting in the inbound queue
    pub fn inbound_len(&self) -> usize {
        self.inbound.as_ref().map_or(0, RecordReceiver::len)
    }

    /// Drain and stop
    ///
    /// Closes the inbound queue, keeps fanning out what is already queued
    /// until empty or the drain timeout passes, then closes every sink queue
    /// and waits for the sinks to finish.
    #[instrument(name = "dispatcher_shutdown", skip(self))]
    pub async fn shutdown(&mut self) -> DispatcherReport {
        let mut report = DispatcherReport::default();
        if self.state() == DispatcherState::Stopped {
            return report;
        }

        self.set_state(DispatcherState::Draining);
        if let Some(inbound) = &self.inbound {
            inbound.close();
            info!(queued = inbound.len(), "Dispatcher draining");
        }

        if let Some(mut fanout) = self.fanout.take() {
            let drained = match tokio::time::timeout(self.config.drain_timeout, &mut fanout).await {
                Ok(joined) => joined,
                Err(_) => {
                    self.stop.cancel();
                    report.records_discarded = self.inbound_len();
                    warn!(
                        discarded = report.records_discarded,
                        "Drain timeout elapsed, discarding queued records"
                    );
                    fanout.await
                }
            };
            match drained {
                Ok(count) => report.records_dispatched = count,
                Err(e) => error!(error = ?e, "Fan-out task panicked"),
            }
        }

        let grace = self.config.grace_period;
        for handle in self.registry.take_all() {
            let snapshot = handle.join(grace).await;
            report.sinks.push((handle.name().to_string(), snapshot));
        }

        self.set_state(DispatcherState::Stopped);
        info!(
            dispatched = report.records_dispatched,
            dropped = report.total_dropped(),
            "Dispatcher stopped"
        );
        report
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(inbound) = &self.inbound {
            inbound.close();
        }
        for handle in self.registry.take_all() {
            handle.close();
        }
    }
}

/// The fan-out loop; returns the number of records taken from the queue
#[instrument(name = "dispatcher_fan_out", skip_all)]
async fn fan_out(rx: RecordReceiver, registry: Arc<SinkRegistry>, stop: CancellationToken) -> u64 {
    let mut count: u64 = 0;

    loop {
        let record = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            next = rx.recv() => match next {
                Some(record) => record,
                None => break,
            },
        };
        count += 1;
        ::metrics::gauge!("dnstap_relay_inbound_queue_depth").set(rx.len() as f64);

        for handle in registry.snapshot().iter() {
            handle.try_send(&record);
        }

        if count.is_multiple_of(10_000) {
            debug!(records = count, "Dispatcher progress");
        }
    }

    debug!(records = count, "Fan-out loop finished");
    count
}
