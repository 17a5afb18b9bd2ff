//! Error types for the data-judge library.
//!
//! Errors describe why a constraint *could not be evaluated*. A constraint that
//! ran and found bad data is not an error: it produces a
//! [`TestResult`](crate::core::TestResult) with a failing outcome.

use crate::dialect::Dialect;
use thiserror::Error;

/// The main error type for the data-judge library.
#[derive(Error, Debug)]
pub enum JudgeError {
    /// Invalid or contradictory constraint parameters, or a malformed condition.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A column name could not be resolved against the source schema.
    #[error("Column '{column}' not found in {source_name}")]
    ColumnNotFound {
        /// The unresolved column name, as given by the caller
        column: String,
        /// Description of the data source that was searched
        source_name: String,
    },

    /// The resolved dialect cannot perform the requested operation.
    #[error("{operation} is not supported by the {dialect} backend")]
    BackendCapability {
        /// Dialect that lacks the capability
        dialect: Dialect,
        /// Human-readable name of the operation
        operation: String,
    },

    /// Error from DataFusion query execution.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Query execution failed on a backend other than DataFusion.
    #[error("Retrieval failed: {message}")]
    Retrieval {
        /// Detailed error message
        message: String,
        /// Optional underlying driver error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Error when serializing or deserializing results and configuration.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal errors that shouldn't happen in normal operation.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`JudgeError`].
///
/// Lets callers tell "the test cannot run here" apart from "the query failed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad parameters, unresolvable columns, malformed conditions.
    Configuration,
    /// Operation unsupported by the dialect.
    BackendCapability,
    /// Query execution failure.
    Retrieval,
    /// Anything else.
    Internal,
}

/// A type alias for `Result<T, JudgeError>`.
pub type Result<T> = std::result::Result<T, JudgeError>;

impl JudgeError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a backend capability error.
    pub fn unsupported(dialect: Dialect, operation: impl Into<String>) -> Self {
        Self::BackendCapability {
            dialect,
            operation: operation.into(),
        }
    }

    /// Creates a retrieval error wrapping a driver error.
    pub fn retrieval_with_source(
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Retrieval {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::ColumnNotFound { .. } => ErrorKind::Configuration,
            Self::BackendCapability { .. } => ErrorKind::BackendCapability,
            Self::DataFusion(_) | Self::Arrow(_) | Self::Retrieval { .. } => ErrorKind::Retrieval,
            Self::Serialization(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for JudgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, msg: &str) -> Result<T>;

    /// Adds context with a lazily evaluated message.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| JudgeError::Internal(format!("{msg}: {e}")))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| JudgeError::Internal(format!("{}: {e}", f())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_capability_message() {
        let err = JudgeError::unsupported(Dialect::Mssql, "In-database regex matching");
        assert_eq!(
            err.to_string(),
            "In-database regex matching is not supported by the mssql backend"
        );
        assert_eq!(err.kind(), ErrorKind::BackendCapability);
    }

    #[test]
    fn test_column_not_found() {
        let err = JudgeError::ColumnNotFound {
            column: "nme".to_string(),
            source_name: "companies".to_string(),
        };
        assert_eq!(err.to_string(), "Column 'nme' not found in companies");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_retrieval_with_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer gone");
        let err = JudgeError::retrieval_with_source("SELECT 1", Box::new(io));
        assert_eq!(err.kind(), ErrorKind::Retrieval);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_context() {
        fn failing_operation() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"))
                .context("Failed to read fixture")
        }

        let err = failing_operation().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Internal error: Failed to read fixture: missing"
        );
    }
}
