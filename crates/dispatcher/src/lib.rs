//! # Dispatcher
//!
//! Fan-out hub of the relay.
//!
//! - consumes `Record`s from the inbound queue in arrival order
//! - copies each one into every registered sink's bounded queue
//! - drops for a full sink only, so a slow sink never stalls the others
//! - owns the sinks: file, unix/tcp socket and forward protocol

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod link;
pub mod metrics;
pub mod registry;
pub mod sinks;

pub use contracts::{DataSink, Record};
pub use dispatcher::{
    Dispatcher, DispatcherBuilder, DispatcherConfig, DispatcherReport, DispatcherState,
    DEFAULT_GRACE_PERIOD,
};
pub use error::DispatcherError;
pub use handle::{Delivery, SinkHandle};
pub use link::{Backoff, Endpoint, Link, LinkState};
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use registry::{SinkId, SinkRegistry};
pub use sinks::{create_sink, FileSink, ForwardSink, OutputSink, SocketSink};
