//! Error types for the filtering and export pipeline.
//!
//! Every variant is recoverable: callers surface the message and let the user
//! correct their inputs.

use thiserror::Error;

/// Errors raised by type inference, filter compilation and export.
#[derive(Error, Debug)]
pub enum ExplorerError {
    /// Time window missing, reversed, too long, or on a non-datetime column;
    /// also an optional filter whose kind does not fit its column.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// A filter or export selection names a column that was never profiled.
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    /// The serializer for the requested format is not built in.
    #[error("{format} export is unavailable: {reason}")]
    CapabilityUnavailable { format: String, reason: String },

    /// Export requested with no columns selected.
    #[error("no columns selected for export")]
    EmptySelection,

    /// Columns of unequal length or duplicate names.
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[cfg(feature = "parquet")]
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[cfg(feature = "parquet")]
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

/// Result type alias for pipeline operations
pub type ExplorerResult<T> = Result<T, ExplorerError>;
