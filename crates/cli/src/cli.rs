//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// dnstap relay - fan DNS query logs out to several collectors
#[derive(Parser, Debug)]
#[command(
    name = "dnstap-relay",
    author,
    version,
    about = "Relay dnstap query logs to multiple collectors",
    long_about = "Reads dnstap Frame Streams from unix sockets, TCP sockets, files and \n\
                  tailed files, and replicates every record to unix/TCP sockets, files \n\
                  and Fluent forward-protocol collectors, optionally masking addresses."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "DNSTAP_RELAY_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "compact",
        global = true,
        env = "DNSTAP_RELAY_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Filter used when `RUST_LOG` is unset
    pub fn default_log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay until interrupted or every input is finished
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display the resolved configuration
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "dnstap-relay.toml",
        env = "DNSTAP_RELAY_CONFIG"
    )]
    pub config: PathBuf,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "DNSTAP_RELAY_METRICS_PORT")]
    pub metrics_port: u16,

    /// Abort if any input or output fails to start
    #[arg(long, env = "DNSTAP_RELAY_FAIL_FAST")]
    pub fail_fast: bool,

    /// Override DrainTimeoutSecs from the configuration
    #[arg(long)]
    pub drain_timeout: Option<u64>,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "dnstap-relay.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "dnstap-relay.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let cli = Cli::parse_from([
            "dnstap-relay",
            "-v",
            "run",
            "--config",
            "relay.toml",
            "--fail-fast",
            "--metrics-port",
            "9100",
        ]);
        assert_eq!(cli.default_log_level(), "debug");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.config, PathBuf::from("relay.toml"));
                assert!(args.fail_fast);
                assert_eq!(args.metrics_port, 9100);
                assert_eq!(args.drain_timeout, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["dnstap-relay", "-q", "-v", "info"]).is_err());
        let cli = Cli::parse_from(["dnstap-relay", "-q", "validate", "--json"]);
        assert_eq!(cli.default_log_level(), "warn");
    }
}
