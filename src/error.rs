//! Error types for Armada.
//!
//! Task failures and unreachable hosts are not errors at this level: they travel
//! as data inside [`TaskResult`](crate::executor::task_result::TaskResult) and are
//! applied to host state by the strategy. The variants here are the conditions
//! that abort a resolver call, a play, or the whole run.

use std::path::PathBuf;
use thiserror::Error;

use crate::inventory::InventoryError;

/// Result type alias for Armada operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Armada.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Pattern Errors
    // ========================================================================
    /// Malformed host pattern, glob, regex, or subscript.
    #[error("Invalid host pattern '{pattern}': {message}")]
    Parse {
        /// The offending pattern term
        pattern: String,
        /// Error message
        message: String,
    },

    /// A subscript selected a position past the end of the matched hosts.
    #[error("No hosts matched the subscripted pattern '{0}'")]
    SubscriptOutOfRange(String),

    // ========================================================================
    // Inventory Errors
    // ========================================================================
    /// A source could not be parsed by any enabled inventory plugin.
    #[error("Unable to parse inventory source '{source_name}': {message}")]
    InventorySource {
        /// Source path or literal
        source_name: String,
        /// Collected plugin failures
        message: String,
    },

    /// Inventory graph mutation rejected.
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// A notified handler matched nothing.
    #[error("The requested handler '{0}' was not found in either the main handlers list nor in the listening handlers list")]
    HandlerLookup(String),

    /// A worker unit died without reporting a result.
    #[error("A worker was found in a dead state: {0}")]
    WorkerDeath(String),

    /// The run was cancelled through the terminated flag.
    #[error("Execution was terminated")]
    Terminated,

    /// Unknown strategy name.
    #[error("Invalid strategy '{0}' specified")]
    UnknownStrategy(String),

    /// Unknown or malformed meta task.
    #[error("Invalid meta action requested: {0}")]
    InvalidMeta(String),

    // ========================================================================
    // Playbook Errors
    // ========================================================================
    /// Error compiling a playbook or task file.
    #[error("Failed to load playbook '{path}': {message}")]
    Playbook {
        /// Path to the file
        path: PathBuf,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Collaborator Errors
    // ========================================================================
    /// Template rendering or conditional evaluation failed.
    #[error("Template error in '{template}': {message}")]
    Template {
        /// Template source
        template: String,
        /// Error message
        message: String,
    },

    /// Fact cache backend failure.
    #[error("Fact cache error: {0}")]
    Cache(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // IO and Serialization Errors
    // ========================================================================
    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Error {
    /// Creates a new pattern parse error.
    pub fn parse(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Creates a new playbook error.
    pub fn playbook(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Playbook {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new template error.
    pub fn template(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error aborts the whole run rather than one play.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, Error::WorkerDeath(_) | Error::Terminated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = Error::parse("web[x:", "malformed subscript");
        assert_eq!(
            err.to_string(),
            "Invalid host pattern 'web[x:': malformed subscript"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::WorkerDeath("slot 0".into()).is_fatal_to_run());
        assert!(Error::Terminated.is_fatal_to_run());
        assert!(!Error::HandlerLookup("restart".into()).is_fatal_to_run());
    }
}
