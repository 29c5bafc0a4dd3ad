//! Ingestion error types

use contracts::FrameError;
use thiserror::Error;

use crate::session::ProtocolViolation;

/// Ingestion error
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Reader could not acquire its source (bad path, address in use, ...)
    #[error("reader {reader} failed to start: {message}")]
    Startup {
        reader: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Malformed framing on one connection or file
    #[error("reader {reader}: framing error: {source}")]
    Framing {
        reader: String,
        #[source]
        source: FrameError,
    },

    /// Well-formed frames in an order the protocol does not allow
    #[error("reader {reader}: {source}")]
    Protocol {
        reader: String,
        #[source]
        source: ProtocolViolation,
    },

    /// Source I/O failure after startup
    #[error("reader {reader}: io error: {source}")]
    Io {
        reader: String,
        #[source]
        source: std::io::Error,
    },

    /// The inbound queue was closed underneath the reader
    #[error("inbound queue closed")]
    QueueClosed,

    /// Shutdown was requested while the reader was busy
    #[error("reader cancelled")]
    Cancelled,
}

impl IngestionError {
    pub fn startup(reader: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Startup {
            reader: reader.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn startup_io(
        reader: impl Into<String>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Startup {
            reader: reader.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// A framing or protocol error, contained to one source instance
    pub fn is_framing(&self) -> bool {
        matches!(self, Self::Framing { .. } | Self::Protocol { .. })
    }

    /// Normal termination caused by shutdown or queue close
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Cancelled | Self::QueueClosed)
    }
}

/// Ingestion Result type alias
pub type Result<T> = std::result::Result<T, IngestionError>;
