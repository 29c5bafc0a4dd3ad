//! Supervisor: owns the dispatcher and every reader of one relay run.
//!
//! Startup order is dispatcher, sinks, readers, so that no record is
//! produced before its sinks can accept it. Shutdown runs the other way:
//! readers stop, the dispatcher drains, sinks finish.

use std::future::Future;
use std::time::{Duration, Instant};

use contracts::{RecordSender, RelayConfig};
use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherConfig};
use ingestion::{IngestionPipeline, ReaderOutcome};
use observability::RunSummary;
use tracing::{error, info, instrument, warn};

use super::stats::build_summary;
use crate::error::{CliError, Result};

/// Startup policy for one run
#[derive(Debug, Clone, Default)]
pub struct SupervisorOptions {
    /// Abort when any input or output cannot start
    pub fail_fast: bool,
    /// Overrides `DrainTimeoutSecs`
    pub drain_timeout: Option<Duration>,
}

/// A started relay
pub struct Supervisor {
    dispatcher: Dispatcher,
    ingestion: IngestionPipeline,
    tx: Option<RecordSender>,
    startup_failures: Vec<String>,
    outcomes: Vec<ReaderOutcome>,
    started: Instant,
}

impl Supervisor {
    /// Start the dispatcher, register every output, then open and start
    /// every input
    ///
    /// # Errors
    /// `CliError::Startup` when `fail_fast` is set and any component failed.
    #[instrument(name = "supervisor_start", skip_all, fields(fail_fast = options.fail_fast))]
    pub async fn start(config: &RelayConfig, options: SupervisorOptions) -> Result<Self> {
        let mut builder = DispatcherBuilder::new(DispatcherConfig::from_relay(config));
        if let Some(timeout) = options.drain_timeout {
            builder = builder.drain_timeout(timeout);
        }
        let mut dispatcher = builder.build();
        let tx = dispatcher
            .start()
            .map_err(|e| CliError::execution(e.to_string()))?;

        let outputs = config.outputs();
        let (sink_ids, sink_failures) = dispatcher.register_outputs(&outputs).await;

        let inputs = config.inputs();
        let mut ingestion = IngestionPipeline::new();
        let reader_failures = ingestion.open_all(&inputs).await;

        let startup_failures: Vec<String> = sink_failures
            .iter()
            .map(ToString::to_string)
            .chain(reader_failures.iter().map(ToString::to_string))
            .collect();

        if options.fail_fast && !startup_failures.is_empty() {
            error!(
                failures = startup_failures.len(),
                "Startup failed, aborting before any record flows"
            );
            drop(ingestion);
            drop(tx);
            dispatcher.shutdown().await;
            return Err(CliError::startup(startup_failures));
        }

        if sink_ids.is_empty() {
            warn!("No outputs running, every record will be discarded");
        }
        if ingestion.reader_count() == 0 {
            warn!("No inputs running");
        }

        ingestion.start_all(&tx);
        info!(
            inputs = ingestion.running_count(),
            outputs = sink_ids.len(),
            failed = startup_failures.len(),
            "Relay started"
        );

        Ok(Self {
            dispatcher,
            ingestion,
            tx: Some(tx),
            startup_failures,
            outcomes: Vec::new(),
            started: Instant::now(),
        })
    }

    /// Components that failed to start and were left out
    pub fn startup_failures(&self) -> &[String] {
        &self.startup_failures
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run until `shutdown` resolves or every reader has finished
    pub async fn run_until<F>(mut self, shutdown: F) -> RunSummary
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    warn!("Received shutdown signal, stopping relay...");
                    break;
                }
                outcome = self.ingestion.join_next() => match outcome {
                    Some(outcome) => self.outcomes.push(outcome),
                    None => {
                        info!("All inputs finished");
                        break;
                    }
                },
            }
        }
        self.shutdown().await
    }

    /// Stop readers, drain the dispatcher, stop sinks
    #[instrument(name = "supervisor_shutdown", skip(self))]
    pub async fn shutdown(mut self) -> RunSummary {
        self.ingestion.stop_all();
        let remaining = self.ingestion.wait_all().await;
        self.outcomes.extend(remaining);
        self.tx.take();

        let report = self.dispatcher.shutdown().await;
        let summary = build_summary(self.started.elapsed(), &self.outcomes, &report);
        info!(
            received = summary.total_received(),
            dispatched = summary.records_dispatched,
            dropped = summary.total_dropped(),
            "Relay stopped"
        );
        summary
    }
}
