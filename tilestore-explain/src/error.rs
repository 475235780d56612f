//! Error types for tilestore-explain

use thiserror::Error;
use tilestore::StoreError;

/// Errors that can occur while building or printing a report
#[derive(Error, Debug)]
pub enum ExplainError {
    /// Planner rejected the configuration or ran out of registers
    #[error("Store planning failed: {0}")]
    Store(#[from] StoreError),

    /// Command-line argument out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for tilestore-explain operations
pub type Result<T> = std::result::Result<T, ExplainError>;
