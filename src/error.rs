//! Error types for tilestore operations
//!
//! Scalar-register overflow during requirement modelling is reported through
//! [`RegisterRequirement::sgpr_overflow`](crate::RegisterRequirement), not
//! through this enum: the caller decides whether to regenerate the kernel.

use thiserror::Error;

/// Result type alias for tilestore operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while planning store registers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The register pool could not satisfy a checkout
    #[error("register pool exhausted: {requested} registers (align {align}) for '{tag}'")]
    PoolExhausted {
        /// Registers requested
        requested: u32,
        /// Required start alignment
        align: u32,
        /// Purpose tag of the failed checkout
        tag: String,
    },

    /// Check-in of a register block the pool never handed out
    #[error("register v{0} is not checked out")]
    NotCheckedOut(u32),

    /// Caller or configuration broke an invariant of the planner
    #[error("store contract violation: {0}")]
    ContractViolation(String),

    /// Kernel configuration rejected before any register was touched
    #[error("invalid kernel configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// Create a contract violation error
    pub fn contract(msg: impl Into<String>) -> Self {
        Self::ContractViolation(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
