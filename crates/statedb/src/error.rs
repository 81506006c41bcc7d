//! Error types for the statedb crate

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during state store operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value is not valid JSON
    #[error("corrupt value for {resource}.{key}: {source}")]
    CorruptValue {
        resource: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Database file has an unknown schema version
    #[error("unsupported schema version {found} in {}", .path.display())]
    SchemaVersion { path: PathBuf, found: i64 },
}

impl From<Error> for declarative::Error {
    fn from(err: Error) -> Self {
        declarative::Error::store(err)
    }
}

/// Result type for state store operations
pub type Result<T> = std::result::Result<T, Error>;
