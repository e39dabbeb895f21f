//! Error types for the usage ledger.

use thiserror::Error;

/// Main error type for usage ledger operations.
///
/// Malformed stored records are deliberately absent from this enum: reads
/// treat them as missing and log a warning instead of failing the caller.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The key-value store call itself failed
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A monthly quota consumption would exceed the period limit
    #[error("insufficient_quota: used {used} + requested {requested} exceeds limit {limit}")]
    QuotaExceeded {
        used: u64,
        requested: u64,
        limit: u64,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Encoding a record for storage failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    /// Stable machine-readable code for callers that map errors to responses.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::StorageUnavailable(_) => "storage_unavailable",
            LedgerError::QuotaExceeded { .. } => "insufficient_quota",
            LedgerError::Config(_) => "config_error",
            LedgerError::Serialization(_) => "serialization_error",
            LedgerError::Io(_) => "io_error",
        }
    }

    /// Whether this is a business-rule rejection rather than an infrastructure failure.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, LedgerError::QuotaExceeded { .. })
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(err: config::ConfigError) -> Self {
        LedgerError::Config(err.to_string())
    }
}

/// Result type alias for usage ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
