//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// An UPDATE or DELETE addressed a row that does not exist.
    #[error("No row with id {id} in {table}")]
    NotFound { table: &'static str, id: i64 },

    /// A stored JSON value could not be encoded or decoded.
    #[error("Invalid stored value for '{key}': {source}")]
    Value {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Database lock poisoned")]
    LockPoisoned,
}
