//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Supervisor, SupervisorOptions};

/// Execute the `run` command
pub async fn run_relay(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .map_err(|e| CliError::config_validation(e.to_string()))
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    info!(
        inputs = config.inputs().len(),
        outputs = config.outputs().len(),
        input_msg_buffer = config.input_msg_buffer,
        "Configuration loaded"
    );

    if args.metrics_port != 0 {
        observability::init_metrics_only(args.metrics_port)?;
    }

    let options = SupervisorOptions {
        fail_fast: args.fail_fast,
        drain_timeout: args.drain_timeout.map(Duration::from_secs),
    };
    let supervisor = Supervisor::start(&config, options).await?;

    for failure in supervisor.startup_failures() {
        warn!(failure = %failure, "Component left out of this run");
    }

    info!("Relay running, press Ctrl+C to stop");
    let summary = supervisor.run_until(shutdown_signal()).await;

    info!(
        received = summary.total_received(),
        dropped = summary.total_dropped(),
        duration_secs = summary.elapsed.as_secs_f64(),
        "Relay finished"
    );
    println!("{summary}");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
///
/// A handler that cannot be installed is logged and never resolves, so the
/// other one still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
