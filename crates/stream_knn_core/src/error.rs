//! Error types for the continuous KNN core.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KnnError {
    /// Invalid startup parameters; raised before any point is processed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A malformed input or output record.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A record could not be rendered in its output format.
    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Dimension mismatch: expected {expected} coordinates, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

impl KnnError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        KnnError::Configuration(message.into())
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        KnnError::Parse(message.into())
    }
}
