//! Ingestion Pipeline main entry

use std::collections::HashMap;
use std::sync::Arc;

use contracts::{ConfigEntry, InputConfig, RecordSender};
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::IngestionError;
use crate::metrics::IngestionMetrics;
use crate::reader::{InputReader, ReaderContext};

/// How one reader ended
#[derive(Debug)]
pub struct ReaderOutcome {
    pub name: String,
    pub records: u64,
    /// `None` on completion or shutdown
    pub error: Option<IngestionError>,
}

impl ReaderOutcome {
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

/// Ingestion Pipeline
///
/// Owns every reader of the relay: opens them, runs each on its own task
/// feeding the shared inbound queue, and stops them together.
pub struct IngestionPipeline {
    /// Opened, not yet started
    pending: Vec<InputReader>,

    /// Running reader tasks
    tasks: JoinSet<ReaderOutcome>,

    /// Task id -> reader name, for tasks that panic
    names: HashMap<Id, String>,

    /// Shared metrics
    metrics: Arc<IngestionMetrics>,

    shutdown: CancellationToken,
}

impl Default for IngestionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestionPipeline {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            tasks: JoinSet::new(),
            names: HashMap::new(),
            metrics: Arc::new(IngestionMetrics::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register an opened reader
    pub fn register(&mut self, reader: InputReader) {
        debug!(reader = %reader.name(), "registered reader");
        self.pending.push(reader);
    }

    /// Open every configured input; failures are returned, not registered
    #[instrument(name = "ingestion_open_all", skip_all, fields(count = inputs.len()))]
    pub async fn open_all(&mut self, inputs: &[ConfigEntry<InputConfig>]) -> Vec<IngestionError> {
        let mut failures = Vec::new();
        for entry in inputs {
            match InputReader::open(&entry.name, &entry.config).await {
                Ok(reader) => self.register(reader),
                Err(e) => {
                    error!(reader = %entry.name, error = %e, "reader failed to start");
                    failures.push(e);
                }
            }
        }
        failures
    }

    /// Start all registered readers, each feeding `tx`
    #[instrument(name = "ingestion_start_all", skip_all)]
    pub fn start_all(&mut self, tx: &RecordSender) {
        info!(count = self.pending.len(), "starting all readers");
        for reader in self.pending.drain(..) {
            let name = reader.name().to_string();
            let ctx = ReaderContext::new(
                name.clone(),
                tx.clone(),
                self.metrics.clone(),
                self.shutdown.child_token(),
            );
            let handle = self.tasks.spawn(run_reader(reader, ctx));
            self.names.insert(handle.id(), name);
        }
    }

    /// Ask every running reader to stop
    #[instrument(name = "ingestion_stop_all", skip(self))]
    pub fn stop_all(&self) {
        info!(count = self.tasks.len(), "stopping all readers");
        self.shutdown.cancel();
    }

    /// Wait for the next reader to end; `None` when none are running
    pub async fn join_next(&mut self) -> Option<ReaderOutcome> {
        let joined = self.tasks.join_next_with_id().await?;
        Some(match joined {
            Ok((id, outcome)) => {
                self.names.remove(&id);
                outcome
            }
            Err(e) => {
                let name = self.names.remove(&e.id()).unwrap_or_default();
                error!(reader = %name, error = %e, "reader task failed");
                ReaderOutcome {
                    name,
                    records: 0,
                    error: Some(IngestionError::startup("reader task", e.to_string())),
                }
            }
        })
    }

    /// Wait for every running reader
    pub async fn wait_all(&mut self) -> Vec<ReaderOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.join_next().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        self.metrics.clone()
    }

    /// Readers registered or running
    pub fn reader_count(&self) -> usize {
        self.pending.len() + self.tasks.len()
    }

    pub fn running_count(&self) -> usize {
        self.tasks.len()
    }
}

impl Drop for IngestionPipeline {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_reader(reader: InputReader, ctx: ReaderContext) -> ReaderOutcome {
    let name = reader.name().to_string();
    let result = reader.run(ctx.clone()).await;
    let records = ctx.delivered();

    match result {
        Ok(_) => {
            info!(reader = %name, records, "reader finished");
            ReaderOutcome {
                name,
                records,
                error: None,
            }
        }
        Err(e) if e.is_shutdown() => ReaderOutcome {
            name,
            records,
            error: None,
        },
        Err(e) => {
            ctx.report(&e, &name);
            if !e.is_framing() {
                warn!(reader = %name, "reader stopped");
            }
            ReaderOutcome {
                name,
                records,
                error: Some(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};
    use contracts::{inbound_queue, Frame, FrameStreamCodec, InputFileConfig, RelayConfig};
    use tokio_util::codec::Encoder;

    fn write_frames(path: &std::path::Path, payloads: &[&'static [u8]]) {
        let mut buf = BytesMut::new();
        for p in payloads {
            FrameStreamCodec
                .encode(Frame::Data(Bytes::from_static(*p)), &mut buf)
                .unwrap();
        }
        std::fs::write(path, &buf).unwrap();
    }

    #[test]
    fn test_pipeline_creation() {
        let pipeline = IngestionPipeline::new();
        assert_eq!(pipeline.reader_count(), 0);
        assert_eq!(pipeline.running_count(), 0);
    }

    #[tokio::test]
    async fn test_open_failures_are_collected() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.fstrm");
        write_frames(&good, &[b"x"]);

        let config = RelayConfig {
            input_file: vec![
                InputFileConfig {
                    path: good.to_string_lossy().into_owned(),
                },
                InputFileConfig {
                    path: dir.path().join("missing").to_string_lossy().into_owned(),
                },
            ],
            ..Default::default()
        };

        let mut pipeline = IngestionPipeline::new();
        let failures = pipeline.open_all(&config.inputs()).await;
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], IngestionError::Startup { .. }));
        assert_eq!(pipeline.reader_count(), 1);
    }

    #[tokio::test]
    async fn test_file_readers_complete() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.fstrm");
        let b = dir.path().join("b.fstrm");
        write_frames(&a, &[b"a1", b"a2"]);
        write_frames(&b, &[b"b1"]);

        let config = RelayConfig {
            input_file: vec![
                InputFileConfig {
                    path: a.to_string_lossy().into_owned(),
                },
                InputFileConfig {
                    path: b.to_string_lossy().into_owned(),
                },
            ],
            ..Default::default()
        };

        let (tx, rx) = inbound_queue(16);
        let mut pipeline = IngestionPipeline::new();
        assert!(pipeline.open_all(&config.inputs()).await.is_empty());
        pipeline.start_all(&tx);

        let mut outcomes = pipeline.wait_all().await;
        outcomes.sort_by(|x, y| x.name.cmp(&y.name));
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(ReaderOutcome::is_clean));
        assert_eq!(outcomes[0].name, "InputFile[0]");
        assert_eq!(outcomes[0].records, 2);
        assert_eq!(outcomes[1].records, 1);

        assert_eq!(rx.len(), 3);
        assert_eq!(pipeline.metrics().snapshot().records_received, 3);
    }
}
