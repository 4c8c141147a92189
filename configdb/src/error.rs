//! Error types for ConfigDb operations.

use common::StoreError;

/// Error type for ConfigDb operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The store could not be reached.
    Connection(String),

    /// Errors reported by the underlying store.
    Storage(String),

    /// A flat key that does not belong to any table.
    Encoding(String),

    /// Invalid or incomplete configuration.
    Config(String),

    /// Internal errors indicating bugs or invariant violations.
    Internal(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Connection(msg) => write!(f, "Connection error: {}", msg),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Encoding(msg) => write!(f, "Encoding error: {}", msg),
            Error::Config(msg) => write!(f, "Config error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(msg) => Error::Connection(msg),
            StoreError::Storage(msg) => Error::Storage(msg),
            StoreError::Config(msg) => Error::Config(msg),
            StoreError::Internal(msg) => Error::Internal(msg),
        }
    }
}

/// Result type alias for ConfigDb operations.
pub type Result<T> = std::result::Result<T, Error>;
