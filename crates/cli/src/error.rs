//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration validation error
    #[error("Configuration validation failed:\n{message}")]
    ConfigValidation { message: String },

    /// Inputs or outputs failed to start under `--fail-fast`
    #[error("{} component(s) failed to start:\n{}", .failures.len(), .failures.join("\n"))]
    Startup { failures: Vec<String> },

    /// Relay execution error
    #[error("Relay execution failed: {message}")]
    Execution { message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    pub fn startup(failures: Vec<String>) -> Self {
        Self::Startup { failures }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
