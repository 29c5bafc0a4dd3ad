//! DataSink trait - Dispatcher output interface
//!
//! Defines the abstract interface for output sinks.

use crate::{ContractError, Record};

/// Data output trait
///
/// All sink implementations must implement this trait. A sink owns its
/// destination exclusively; the dispatcher drives it from one worker task.
#[trait_variant::make(DataSink: Send)]
pub trait LocalDataSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Write one record
    ///
    /// # Errors
    /// Returns write error (should include context). Transport failures
    /// that the sink recovers from internally are not returned.
    async fn write(&mut self, record: &Record) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}
