//! Unified error types for the Dockyard workspace.
//!
//! Three kinds matter to callers of the pipeline: [`DockyardError::Connection`]
//! (the engine cannot be reached), [`DockyardError::Execution`] (an operation
//! in a composition chain cannot be satisfied) and [`DockyardError::Assembly`]
//! (a publish request is malformed). Everything else is plumbing that the
//! engine folds into one of those when it surfaces from an operation.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum DockyardError {
    /// The execution engine could not be reached or opened.
    #[error("cannot connect to engine {engine}: {message}")]
    Connection {
        /// Name of the engine that was being connected to.
        engine: String,
        /// Description of the failure.
        message: String,
    },

    /// An operation of a composition chain could not be satisfied.
    #[error("{operation} failed: {message}")]
    Execution {
        /// Human-readable rendering of the failing operation.
        operation: String,
        /// Description of the failure.
        message: String,
        /// Exit status reported by the command, if it ran at all.
        exit_code: Option<i32>,
        /// Captured standard error of the command.
        stderr: String,
    },

    /// A publish request was rejected before reaching the engine.
    #[error("invalid publish request: {message}")]
    Assembly {
        /// Description of the rejected request.
        message: String,
    },

    /// The invocation was cancelled while waiting on the engine.
    #[error("operation cancelled")]
    Cancelled,

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A hash validation failed.
    #[error("hash mismatch for {resource}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Resource that failed validation.
        resource: String,
        /// Expected hash value.
        expected: String,
        /// Actual computed hash value.
        actual: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl DockyardError {
    /// Wraps an I/O error with the path it occurred at.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Builds an execution error that carries no process output.
    pub fn execution(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            operation: operation.into(),
            message: message.into(),
            exit_code: None,
            stderr: String::new(),
        }
    }

    /// Builds an assembly error.
    pub fn assembly(message: impl Into<String>) -> Self {
        Self::Assembly {
            message: message.into(),
        }
    }

    /// Returns `true` for errors raised by a failing operation.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution { .. })
    }

    /// Returns `true` for rejected publish requests.
    #[must_use]
    pub const fn is_assembly(&self) -> bool {
        matches!(self, Self::Assembly { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, DockyardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_display_names_operation() {
        let err = DockyardError::execution("exec [false]", "exit status 1");
        assert_eq!(err.to_string(), "exec [false] failed: exit status 1");
        assert!(err.is_execution());
        assert!(!err.is_assembly());
    }

    #[test]
    fn io_error_display_includes_path() {
        let err = DockyardError::io(
            "/tmp/missing",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/missing"));
    }

    #[test]
    fn serde_error_converts_via_from() {
        let source = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: DockyardError = source.into();
        assert!(matches!(err, DockyardError::Serialization { .. }));
    }
}
