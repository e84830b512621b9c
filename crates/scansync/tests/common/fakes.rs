//! Stand-ins for the external programs and services a stage talks to.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use scansync::error::ProcessError;
use scansync::item::{ItemType, RemoteDestination};
use scansync::processor::{FilenameBackend, NamingError, OcrEngine, OcrError, PreviewRenderer};
use scansync::storage::{RemoteStorage, UploadError, UploadedFile};

/// OCR engine that copies the input to the output path.
#[derive(Default)]
pub struct CopyOcr {
    /// Report every image as unsupported without writing output.
    pub reject_images: bool,
}

#[async_trait]
impl OcrEngine for CopyOcr {
    async fn run(&self, input: &Path, output: &Path) -> Result<(), OcrError> {
        let is_pdf = input
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        if self.reject_images && !is_pdf {
            return Err(OcrError::Unsupported);
        }
        std::fs::copy(input, output).map_err(|_| OcrError::Output)?;
        Ok(())
    }
}

/// Writes a placeholder preview without rasterizing.
pub struct StubPreview;

impl PreviewRenderer for StubPreview {
    fn render(&self, _source: &Path, _kind: ItemType, dest: &Path) -> Result<(), ProcessError> {
        std::fs::write(dest, b"jpeg").map_err(|e| ProcessError::WriteFile {
            path: dest.to_path_buf(),
            source: e,
        })
    }
}

/// Naming backend with a canned answer.
pub struct CannedNamer {
    pub answer: Result<String, fn() -> NamingError>,
    pub seen: Mutex<Vec<String>>,
}

impl CannedNamer {
    pub fn answering(name: &str) -> Self {
        Self {
            answer: Ok(name.to_string()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: fn() -> NamingError) -> Self {
        Self {
            answer: Err(error),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl FilenameBackend for CannedNamer {
    fn method(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        "canned"
    }

    async fn propose(&self, text: &str) -> Result<String, NamingError> {
        self.seen.lock().unwrap().push(text.to_string());
        match &self.answer {
            Ok(name) => Ok(name.clone()),
            Err(make) => Err(make()),
        }
    }
}

/// One completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub folder_id: String,
    pub name: String,
    pub bytes: usize,
}

/// Remote storage that keeps uploads in memory.
#[derive(Default)]
pub struct RecordingRemote {
    /// Folder ids that answer with HTTP 503.
    pub unavailable: Vec<String>,
    pub uploads: Mutex<Vec<Upload>>,
}

impl RecordingRemote {
    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteStorage for RecordingRemote {
    async fn upload(
        &self,
        local: &Path,
        name: &str,
        destination: &RemoteDestination,
    ) -> Result<UploadedFile, UploadError> {
        if self.unavailable.contains(&destination.folder_id) {
            return Err(UploadError::Http {
                status: 503,
                body: "service unavailable".into(),
            });
        }
        let bytes = std::fs::read(local).map(|b| b.len()).unwrap_or(0);
        self.uploads.lock().unwrap().push(Upload {
            folder_id: destination.folder_id.clone(),
            name: name.to_string(),
            bytes,
        });
        Ok(UploadedFile {
            name: Some(name.to_string()),
            web_url: Some(format!(
                "https://onedrive.example/{}/{}",
                destination.folder_id, name
            )),
        })
    }
}
