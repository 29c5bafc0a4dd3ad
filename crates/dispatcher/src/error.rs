//! Dispatcher error types

use thiserror::Error;

use crate::dispatcher::DispatcherState;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Sink creation error
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    /// Operation not allowed in the current lifecycle state
    #[error("cannot {operation} while dispatcher is {state}")]
    InvalidState {
        operation: &'static str,
        state: DispatcherState,
    },

    /// Sink error (from contract)
    #[error("sink error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    /// Create a sink creation error
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_state(operation: &'static str, state: DispatcherState) -> Self {
        Self::InvalidState { operation, state }
    }
}
