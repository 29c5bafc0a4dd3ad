//! # Ingestion Pipeline
//!
//! Input side of the relay.
//!
//! Responsibilities:
//! - Acquire input sources (unix / tcp sockets, files, tailed files)
//! - Decode Frame Streams framing and the control handshake
//! - Push every data frame into the inbound queue, waiting when it is full
//! - Contain framing errors to the connection or file they occur on
//!
//! ## Usage Example
//!
//! ```ignore
//! use contracts::inbound_queue;
//! use ingestion::IngestionPipeline;
//!
//! let (tx, rx) = inbound_queue(config.input_msg_buffer);
//! let mut pipeline = IngestionPipeline::new();
//! let failures = pipeline.open_all(&config.inputs()).await;
//! pipeline.start_all(&tx);
//!
//! while let Some(record) = rx.recv().await {
//!     // hand to the dispatcher
//! }
//! ```

mod error;
mod metrics;
mod pipeline;
mod reader;
mod readers;
mod session;

// Re-exports
pub use error::{IngestionError, Result};
pub use metrics::{IngestionMetrics, MetricsSnapshot};
pub use pipeline::{IngestionPipeline, ReaderOutcome};
pub use reader::{InputReader, ReaderContext};
pub use readers::{FileReader, TailReader, TcpSocketReader, UnixSocketReader};
pub use session::{FrameSession, ProtocolViolation, SessionAction};
