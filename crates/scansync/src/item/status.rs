//! Lifecycle and outcome enums carried by an [`Item`](super::Item).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of an item. This is the field clients observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    FileNotReady,
    ReadingMetadata,
    OcrPending,
    Ocr,
    FilenamePending,
    Filename,
    SyncPending,
    Sync,
    Completed,
    Failed,
    Skipped,
    InvalidFile,
    SyncFailed,
    Deleted,
}

impl ProcessStatus {
    pub const ALL: [ProcessStatus; 14] = [
        ProcessStatus::FileNotReady,
        ProcessStatus::ReadingMetadata,
        ProcessStatus::OcrPending,
        ProcessStatus::Ocr,
        ProcessStatus::FilenamePending,
        ProcessStatus::Filename,
        ProcessStatus::SyncPending,
        ProcessStatus::Sync,
        ProcessStatus::Completed,
        ProcessStatus::Failed,
        ProcessStatus::Skipped,
        ProcessStatus::InvalidFile,
        ProcessStatus::SyncFailed,
        ProcessStatus::Deleted,
    ];

    /// Label stored in `scanneddata.file_status`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::FileNotReady => "File Not Ready",
            ProcessStatus::ReadingMetadata => "Reading Metadata",
            ProcessStatus::OcrPending => "OCR Pending",
            ProcessStatus::Ocr => "OCR Processing",
            ProcessStatus::FilenamePending => "File Name Pending",
            ProcessStatus::Filename => "File Name Processing",
            ProcessStatus::SyncPending => "Sync Pending",
            ProcessStatus::Sync => "Syncing",
            ProcessStatus::Completed => "Completed",
            ProcessStatus::Failed => "Failed",
            ProcessStatus::Skipped => "Skipped",
            ProcessStatus::InvalidFile => "Invalid File",
            ProcessStatus::SyncFailed => "Sync Failed",
            ProcessStatus::Deleted => "Deleted",
        }
    }

    /// Numeric progress code persisted next to the status.
    ///
    /// Non-decreasing along the happy path, `-1` for every failure.
    pub fn progress_code(&self) -> i32 {
        match self {
            ProcessStatus::FileNotReady => 0,
            ProcessStatus::ReadingMetadata | ProcessStatus::OcrPending => 1,
            ProcessStatus::Ocr | ProcessStatus::FilenamePending => 2,
            ProcessStatus::Filename | ProcessStatus::SyncPending => 3,
            ProcessStatus::Sync => 4,
            ProcessStatus::Completed => 5,
            ProcessStatus::Failed
            | ProcessStatus::SyncFailed
            | ProcessStatus::InvalidFile
            | ProcessStatus::Deleted => -1,
            ProcessStatus::Skipped => 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.progress_code() < 0
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessStatus::Completed | ProcessStatus::Skipped) || self.is_failure()
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown process status '{}'", s))
    }
}

/// Outcome of the OCR stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrStatus {
    Unknown,
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
    Unsupported,
    DpiError,
    InputError,
    OutputError,
}

impl OcrStatus {
    pub fn code(&self) -> i32 {
        match self {
            OcrStatus::Unknown => 0,
            OcrStatus::Pending => 1,
            OcrStatus::Processing => 2,
            OcrStatus::Completed => 3,
            OcrStatus::Failed => -1,
            OcrStatus::Skipped => -2,
            OcrStatus::Unsupported => -3,
            OcrStatus::DpiError => -4,
            OcrStatus::InputError => -5,
            OcrStatus::OutputError => -6,
        }
    }
}

/// Outcome of the file-naming stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileNamingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
    NoOcrFile,
    NoPdfText,
    NoServerConnection,
    ModelNotFound,
    AuthenticationError,
    RateLimitError,
}

impl FileNamingStatus {
    /// Name stored in `file_naming_jobs.file_naming_status`.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileNamingStatus::Pending => "PENDING",
            FileNamingStatus::Processing => "PROCESSING",
            FileNamingStatus::Completed => "COMPLETED",
            FileNamingStatus::Failed => "FAILED",
            FileNamingStatus::Skipped => "SKIPPED",
            FileNamingStatus::NoOcrFile => "NO_OCR_FILE",
            FileNamingStatus::NoPdfText => "NO_PDF_TEXT",
            FileNamingStatus::NoServerConnection => "NO_SERVER_CONNECTION",
            FileNamingStatus::ModelNotFound => "MODEL_NOT_FOUND",
            FileNamingStatus::AuthenticationError => "AUTHENTICATION_ERROR",
            FileNamingStatus::RateLimitError => "RATE_LIMIT_ERROR",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FileNamingStatus::Pending => "Pending",
            FileNamingStatus::Processing => "Processing",
            FileNamingStatus::Completed => "Completed",
            FileNamingStatus::Failed => "Failed",
            FileNamingStatus::Skipped => "Skipped",
            FileNamingStatus::NoOcrFile => "OCR failed on item, no OCR file available",
            FileNamingStatus::NoPdfText => "No text found in PDF for file naming",
            FileNamingStatus::NoServerConnection => "Could not connect to the naming server",
            FileNamingStatus::ModelNotFound => "Model not found on the naming server",
            FileNamingStatus::AuthenticationError => "Authentication with the naming backend failed",
            FileNamingStatus::RateLimitError => "Rate limit of the naming backend exceeded",
        }
    }
}

impl fmt::Display for FileNamingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detected document kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Pdf,
    Image,
    Unknown,
}
