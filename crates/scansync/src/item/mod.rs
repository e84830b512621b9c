//! The item record: one document moving through the pipeline.
//!
//! An [`Item`] is created by the metadata stage from a detected path, gets
//! its database id exactly once, and is handed from stage to stage as a
//! JSON payload. Whoever holds the deserialized value owns it until the
//! message is acknowledged or forwarded.

pub mod status;

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ItemError;

pub use status::{FileNamingStatus, ItemType, OcrStatus, ProcessStatus};

/// Version of the serialized item layout exchanged between stages.
pub const ITEM_SCHEMA_VERSION: u32 = 1;

const OCR_SUFFIX: &str = "_OCR.pdf";

/// A remote folder an item is uploaded to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDestination {
    pub remote_path: String,
    pub folder_id: String,
    pub drive_id: String,
}

/// Returns the working OCR file for a base name inside `directory`.
pub fn ocr_file_path(directory: &Path, stem: &str) -> PathBuf {
    directory.join(format!("{}{}", stem, OCR_SUFFIX))
}

/// Whether a path names a working OCR output file.
pub fn is_ocr_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(OCR_SUFFIX))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    schema_version: u32,
    db_id: Option<i64>,

    pub local_file_path: PathBuf,
    pub filename: String,
    pub filename_without_extension: String,
    pub local_directory: PathBuf,
    /// Name of the watched subdirectory the file arrived in.
    pub smb_target: String,

    pub item_type: ItemType,
    pub status: ProcessStatus,
    pub ocr_status: OcrStatus,
    pub file_naming_status: FileNamingStatus,
    pub file_naming_job_id: Option<i64>,

    pub destinations: Vec<RemoteDestination>,
    pub additional_local_paths: Vec<PathBuf>,
    pub additional_remote_paths: Vec<String>,

    pub preview_image_path: Option<PathBuf>,
    pub web_url: Option<String>,
    pub pdf_pages: u32,
    pub current_uploading: u32,
    pub current_upload_target: Option<String>,

    pub time_added: DateTime<Utc>,
    pub time_ocr_started: Option<DateTime<Utc>>,
    pub time_ocr_finished: Option<DateTime<Utc>>,
    pub time_upload_started: Option<DateTime<Utc>>,
    pub time_finished: Option<DateTime<Utc>>,
}

impl Item {
    /// Builds an item for an existing, readable regular file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ItemError> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path).map_err(|e| ItemError::Inaccessible {
            path: path.to_path_buf(),
            source: e,
        })?;
        if !metadata.is_file() {
            return Err(ItemError::NotAFile(path.to_path_buf()));
        }
        File::open(path).map_err(|e| ItemError::Inaccessible {
            path: path.to_path_buf(),
            source: e,
        })?;

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ItemError::NoFileName(path.to_path_buf()))?
            .to_string();
        let filename_without_extension = path
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or(&filename)
            .to_string();
        let local_directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let smb_target = directory_name(&local_directory);

        Ok(Self {
            schema_version: ITEM_SCHEMA_VERSION,
            db_id: None,
            local_file_path: path.to_path_buf(),
            filename,
            filename_without_extension,
            local_directory,
            smb_target,
            item_type: ItemType::Unknown,
            status: ProcessStatus::FileNotReady,
            ocr_status: OcrStatus::Unknown,
            file_naming_status: FileNamingStatus::Pending,
            file_naming_job_id: None,
            destinations: Vec::new(),
            additional_local_paths: Vec::new(),
            additional_remote_paths: Vec::new(),
            preview_image_path: None,
            web_url: None,
            pdf_pages: 0,
            current_uploading: 0,
            current_upload_target: None,
            time_added: Utc::now(),
            time_ocr_started: None,
            time_ocr_finished: None,
            time_upload_started: None,
            time_finished: None,
        })
    }

    pub fn db_id(&self) -> Option<i64> {
        self.db_id
    }

    /// Returns the database id or an error for items that were never persisted.
    pub fn require_db_id(&self) -> Result<i64, ItemError> {
        self.db_id.ok_or(ItemError::MissingId)
    }

    /// Records the row id of the item. Can only happen once.
    pub fn assign_db_id(&mut self, id: i64) -> Result<(), ItemError> {
        if let Some(existing) = self.db_id {
            return Err(ItemError::IdAlreadyAssigned(existing));
        }
        self.db_id = Some(id);
        Ok(())
    }

    /// Path of the working OCR output next to the source file.
    pub fn ocr_file(&self) -> PathBuf {
        ocr_file_path(&self.local_directory, &self.filename_without_extension)
    }

    /// Name the processed document gets on remote storage.
    pub fn upload_name(&self) -> String {
        format!("{}.pdf", self.filename_without_extension)
    }

    /// Adds another source path carrying the same content.
    ///
    /// Paths that do not exist or are already known are ignored.
    pub fn add_additional_path(&mut self, path: &Path) -> bool {
        if !path.exists()
            || path == self.local_file_path
            || self.additional_local_paths.iter().any(|p| p == path)
        {
            return false;
        }
        let remote = path.parent().map(directory_name).unwrap_or_default();
        self.additional_local_paths.push(path.to_path_buf());
        self.additional_remote_paths.push(remote);
        true
    }

    /// Distinct watched subdirectory names this item arrived in, canonical first.
    pub fn smb_targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        for name in std::iter::once(&self.smb_target).chain(self.additional_remote_paths.iter()) {
            if !name.is_empty() && !targets.contains(name) {
                targets.push(name.clone());
            }
        }
        targets
    }

    /// Renames the working OCR file to `<stem>_OCR.pdf` and updates the
    /// filename fields to match. Nothing changes if the rename fails.
    pub fn rename_working_file(&mut self, stem: &str) -> Result<PathBuf, ItemError> {
        let from = self.ocr_file();
        let mut candidate = stem.to_string();
        let mut to = ocr_file_path(&self.local_directory, &candidate);
        let mut counter = 2;
        while to != from && to.exists() {
            candidate = format!("{}_{}", stem, counter);
            to = ocr_file_path(&self.local_directory, &candidate);
            counter += 1;
        }

        if to != from {
            std::fs::rename(&from, &to).map_err(|e| ItemError::Rename {
                from: from.clone(),
                to: to.clone(),
                source: e,
            })?;
        }

        self.filename = format!("{}.pdf", candidate);
        self.filename_without_extension = candidate;
        Ok(to)
    }

    /// Serializes the item for a queue handoff.
    pub fn to_payload(&self) -> Result<Vec<u8>, ItemError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserializes an item received from a queue.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ItemError> {
        let item: Item = serde_json::from_slice(payload)?;
        if item.schema_version != ITEM_SCHEMA_VERSION {
            return Err(ItemError::SchemaVersion {
                found: item.schema_version,
                expected: ITEM_SCHEMA_VERSION,
            });
        }
        Ok(item)
    }
}

fn directory_name(dir: &Path) -> String {
    dir.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}
