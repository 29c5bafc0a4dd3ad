//! Layered error definitions
//!
//! Categorized by source: config / sink / general

use std::fmt;

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// One or more configuration entries failed validation
    #[error("config validation failed:\n{0}")]
    ConfigInvalid(ValidationFailures),

    // ===== Sink Errors =====
    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    /// Sink connection error
    #[error("sink '{sink_name}' connection error: {message}")]
    SinkConnection { sink_name: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Create sink connection error
    pub fn sink_connection(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkConnection {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }
}

/// Validation failures of a single configuration entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryError {
    /// Entry kind as written in the config file (e.g. `OutputFluent`)
    pub kind: String,
    /// Position in the kind's list; `None` for top-level fields
    pub index: Option<usize>,
    /// One message per failed rule
    pub messages: Vec<String>,
}

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = match self.index {
            Some(index) => format!("{}[{}]", self.kind, index),
            None => self.kind.clone(),
        };
        for (i, message) in self.messages.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{location}: {message}")?;
        }
        Ok(())
    }
}

/// Aggregated validation failures across the whole configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationFailures {
    entries: Vec<EntryError>,
}

impl ValidationFailures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: EntryError) {
        if !entry.messages.is_empty() {
            self.entries.push(entry);
        }
    }

    pub fn entries(&self) -> &[EntryError] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every failure rendered as one `Kind[index]: message` line
    pub fn lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .flat_map(|entry| {
                entry
                    .to_string()
                    .lines()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// `Ok(())` when nothing failed
    pub fn into_result(self) -> Result<(), ContractError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ContractError::ConfigInvalid(self))
        }
    }
}

impl fmt::Display for ValidationFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines().join("\n"))
    }
}
