//! Error types for drainspout-core.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for drainspout-core.
///
/// Per-record failures inside stream workers are logged and swallowed;
/// this type surfaces only the conditions that callers can act on,
/// which in practice means startup failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Storage errors.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Logging initialization errors.
    #[error("logging error: {0}")]
    Logging(#[from] crate::logging::LogError),

    /// Geo table loading errors.
    #[error("geo table error: {0}")]
    Geo(String),
}

/// Errors from the SQLite persistence layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
