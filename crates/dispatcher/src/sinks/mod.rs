//! Sink implementations
//!
//! One variant per configured output kind, dispatched statically.

mod file;
mod forward;
mod socket;

use contracts::{ConfigKind, ContractError, DataSink, OutputConfig, Record};
use tracing::instrument;

use crate::error::DispatcherError;

pub use self::file::FileSink;
pub use self::forward::ForwardSink;
pub use self::socket::SocketSink;

/// One configured output
pub enum OutputSink {
    UnixSocket(SocketSink),
    TcpSocket(SocketSink),
    File(FileSink),
    Forward(ForwardSink),
}

/// Create the sink described by `config`
///
/// # Errors
/// `DispatcherError::SinkCreation` when the destination cannot be set up.
/// Unreachable socket destinations are not an error: they connect lazily.
#[instrument(name = "dispatcher_create_sink", skip(config), fields(kind = config.kind()))]
pub async fn create_sink(name: &str, config: &OutputConfig) -> Result<OutputSink, DispatcherError> {
    let sink = match config {
        OutputConfig::UnixSocket(c) => OutputSink::UnixSocket(SocketSink::unix(name, c)?),
        OutputConfig::TcpSocket(c) => OutputSink::TcpSocket(SocketSink::tcp(name, c)?),
        OutputConfig::File(c) => OutputSink::File(FileSink::open(name, c).await?),
        OutputConfig::Forward(c) => OutputSink::Forward(ForwardSink::new(name, c)?),
    };
    Ok(sink)
}

impl DataSink for OutputSink {
    fn name(&self) -> &str {
        match self {
            Self::UnixSocket(s) | Self::TcpSocket(s) => s.name(),
            Self::File(s) => s.name(),
            Self::Forward(s) => s.name(),
        }
    }

    async fn write(&mut self, record: &Record) -> Result<(), ContractError> {
        match self {
            Self::UnixSocket(s) | Self::TcpSocket(s) => s.write(record).await,
            Self::File(s) => s.write(record).await,
            Self::Forward(s) => s.write(record).await,
        }
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        match self {
            Self::UnixSocket(s) | Self::TcpSocket(s) => s.flush().await,
            Self::File(s) => s.flush().await,
            Self::Forward(s) => s.flush().await,
        }
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        match self {
            Self::UnixSocket(s) | Self::TcpSocket(s) => s.close().await,
            Self::File(s) => s.close().await,
            Self::Forward(s) => s.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{OutputFileConfig, OutputFluentConfig};

    #[tokio::test]
    async fn test_create_sink_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let file = OutputConfig::File(OutputFileConfig {
            path: dir.path().join("out").to_string_lossy().into_owned(),
            ..Default::default()
        });
        let sink = create_sink("OutputFile[0]", &file).await.unwrap();
        assert!(matches!(sink, OutputSink::File(_)));
        assert_eq!(sink.name(), "OutputFile[0]");

        let fluent = OutputConfig::Forward(OutputFluentConfig {
            host: "collector.invalid".into(),
            tag: "dnstap".into(),
            ..Default::default()
        });
        let sink = create_sink("OutputFluent[0]", &fluent).await.unwrap();
        assert!(matches!(sink, OutputSink::Forward(_)));
    }
}
