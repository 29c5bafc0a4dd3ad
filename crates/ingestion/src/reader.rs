//! InputReader - one external source of framed records
//!
//! A closed set of variants sharing one lifecycle: `open` acquires the
//! source (failures here are startup errors), `run` reads until the source
//! ends or shutdown is requested, and dropping the reader releases
//! everything it acquired.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use contracts::{ConfigKind, FrameError, InputConfig, RecordSender};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::error::{IngestionError, Result};
use crate::metrics::IngestionMetrics;
use crate::readers::{FileReader, TailReader, TcpSocketReader, UnixSocketReader};
use crate::session::ProtocolViolation;

/// Everything a running reader needs besides its source
#[derive(Debug, Clone)]
pub struct ReaderContext {
    name: Arc<str>,
    tx: RecordSender,
    metrics: Arc<IngestionMetrics>,
    shutdown: CancellationToken,
    delivered: Arc<AtomicU64>,
}

impl ReaderContext {
    pub fn new(
        name: impl Into<Arc<str>>,
        tx: RecordSender,
        metrics: Arc<IngestionMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            tx,
            metrics,
            shutdown,
            delivered: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn metrics(&self) -> &Arc<IngestionMetrics> {
        &self.metrics
    }

    /// Records delivered through this context and its clones
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Enqueue one payload, waiting while the inbound queue is full
    ///
    /// Returns `Cancelled` if shutdown arrives first.
    pub async fn deliver(&self, payload: Bytes) -> Result<()> {
        tokio::select! {
            biased;
            sent = self.tx.send(payload) => {
                sent.map_err(|_| IngestionError::QueueClosed)?;
            }
            _ = self.shutdown.cancelled() => return Err(IngestionError::Cancelled),
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_received();
        ::metrics::counter!(
            "dnstap_relay_records_received_total",
            "reader" => self.name.to_string()
        )
        .increment(1);
        Ok(())
    }

    pub fn framing(&self, source: FrameError) -> IngestionError {
        match source {
            FrameError::Io(source) => IngestionError::Io {
                reader: self.name.to_string(),
                source,
            },
            source => IngestionError::Framing {
                reader: self.name.to_string(),
                source,
            },
        }
    }

    pub fn protocol(&self, source: ProtocolViolation) -> IngestionError {
        IngestionError::Protocol {
            reader: self.name.to_string(),
            source,
        }
    }

    pub fn io(&self, source: std::io::Error) -> IngestionError {
        IngestionError::Io {
            reader: self.name.to_string(),
            source,
        }
    }

    /// Count and log an error that closed one source instance
    pub fn report(&self, err: &IngestionError, peer: &str) {
        if err.is_shutdown() {
            return;
        }
        if err.is_framing() {
            self.metrics.record_framing_error();
            ::metrics::counter!(
                "dnstap_relay_framing_errors_total",
                "reader" => self.name.to_string()
            )
            .increment(1);
        }
        warn!(reader = %self.name, peer = %peer, error = %err, "source closed after error");
    }
}

/// One configured input
#[derive(Debug)]
pub enum InputReader {
    UnixSocket(UnixSocketReader),
    TcpSocket(TcpSocketReader),
    File(FileReader),
    TailedFile(TailReader),
}

impl InputReader {
    /// Acquire the source described by `config`
    ///
    /// # Errors
    /// `IngestionError::Startup` when the source cannot be acquired.
    #[instrument(name = "reader_open", skip(config), fields(kind = config.kind()))]
    pub async fn open(name: &str, config: &InputConfig) -> Result<Self> {
        let reader = match config {
            InputConfig::UnixSocket(c) => Self::UnixSocket(UnixSocketReader::bind(name, c)?),
            InputConfig::TcpSocket(c) => Self::TcpSocket(TcpSocketReader::bind(name, c).await?),
            InputConfig::File(c) => Self::File(FileReader::open(name, c).await?),
            InputConfig::TailedFile(c) => Self::TailedFile(TailReader::open(name, c).await?),
        };
        Ok(reader)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::UnixSocket(r) => r.name(),
            Self::TcpSocket(r) => r.name(),
            Self::File(r) => r.name(),
            Self::TailedFile(r) => r.name(),
        }
    }

    /// True for readers that end on their own (plain files)
    pub fn is_finite(&self) -> bool {
        matches!(self, Self::File(_))
    }

    /// Read until the source ends or shutdown; returns records delivered
    pub async fn run(self, ctx: ReaderContext) -> Result<u64> {
        match self {
            Self::UnixSocket(r) => r.run(ctx).await,
            Self::TcpSocket(r) => r.run(ctx).await,
            Self::File(r) => r.run(ctx).await,
            Self::TailedFile(r) => r.run(ctx).await,
        }
    }
}
