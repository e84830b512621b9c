use std::path::PathBuf;
use thiserror::Error;

use crate::worker::StageError;

#[derive(Error, Debug)]
pub enum ScanSyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Item error: {0}")]
    Item(#[from] ItemError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Stage error: {0}")]
    Stage(#[from] crate::worker::StageError),

    #[error("Watch directory '{0}' does not exist")]
    WatchDirectoryMissing(PathBuf),
}

impl ScanSyncError {
    /// Process exit code used when this error aborts a stage at startup.
    pub fn exit_code(&self) -> i32 {
        match self {
            ScanSyncError::Config(_) | ScanSyncError::Secret(_) => 2,
            ScanSyncError::WatchDirectoryMissing(_) => 3,
            ScanSyncError::Transport(_) | ScanSyncError::Stage(StageError::Transport(_)) => 4,
            ScanSyncError::Database(_) | ScanSyncError::Stage(StageError::Database(_)) => 5,
            _ => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum ItemError {
    #[error("File '{path}' is not accessible: {source}")]
    Inaccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path '{0}' is not a regular file")]
    NotAFile(PathBuf),

    #[error("Path '{0}' has no usable file name")]
    NoFileName(PathBuf),

    #[error("Item already has database id {0}")]
    IdAlreadyAssigned(i64),

    #[error("Item has no database id")]
    MissingId,

    #[error("Unsupported item schema version {found} (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("Failed to decode item: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Failed to rename working file from '{from}' to '{to}': {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("Failed to process image: {0}")]
    ImageProcessing(String),

    #[error("Failed to render preview: {0}")]
    Preview(String),

    #[error("Text extraction failed: {0}")]
    TextExtraction(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete file '{path}': {source}")]
    DeleteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),
}

pub type Result<T> = std::result::Result<T, ScanSyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;

    #[test]
    fn test_exit_codes() {
        let config = ScanSyncError::from(ConfigError::Validation {
            message: "bad".into(),
        });
        assert_eq!(config.exit_code(), 2);
        assert_eq!(
            ScanSyncError::WatchDirectoryMissing(PathBuf::from("/scans")).exit_code(),
            3
        );
        assert_eq!(ScanSyncError::from(TransportError::Closed).exit_code(), 4);
        assert_eq!(
            ScanSyncError::from(StageError::Transport(TransportError::Closed)).exit_code(),
            4
        );
        assert_eq!(
            ScanSyncError::from(StageError::Payload("x".into())).exit_code(),
            1
        );
    }
}
