//! Holding area for items that could not be processed.

use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::item::Item;

use super::{ensure_directory, move_file, remove_if_exists, resolve_conflict};

/// What happens to an item's working OCR file when it is relocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrArtifact {
    /// Move it next to the originals.
    Relocate,
    /// Delete it; used when the file can only be a partial artifact.
    Delete,
}

/// The failed-items directory below the watch root.
#[derive(Debug, Clone)]
pub struct FailedArea {
    directory: PathBuf,
}

impl FailedArea {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Moves one file into the area, keeping its name unless taken.
    pub fn relocate(&self, path: &Path) -> Result<PathBuf, StorageError> {
        ensure_directory(&self.directory)?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let target = resolve_conflict(&self.directory, &name)?;

        move_file(path, &target)?;
        log::info!("Moved {} to the failed directory", display_name(path));
        Ok(target)
    }

    /// Moves the item's source file and every additional source path into the
    /// area and handles the working OCR file as requested.
    ///
    /// Individual failures are logged and skipped; the returned list holds the
    /// new locations of everything that was moved.
    pub fn relocate_item(&self, item: &Item, ocr: OcrArtifact) -> Vec<PathBuf> {
        let mut moved = Vec::new();
        let sources = std::iter::once(&item.local_file_path).chain(item.additional_local_paths.iter());

        for source in sources {
            if !source.exists() {
                log::debug!("Skipping {}: no longer present", display_name(source));
                continue;
            }
            match self.relocate(source) {
                Ok(target) => moved.push(target),
                Err(e) => log::error!("Failed to relocate {}: {}", display_name(source), e),
            }
        }

        let ocr_file = item.ocr_file();
        match ocr {
            OcrArtifact::Relocate if ocr_file.exists() => match self.relocate(&ocr_file) {
                Ok(target) => moved.push(target),
                Err(e) => log::error!("Failed to relocate {}: {}", display_name(&ocr_file), e),
            },
            OcrArtifact::Relocate => {}
            OcrArtifact::Delete => match remove_if_exists(&ocr_file) {
                Ok(true) => log::info!("Removed OCR file {}", display_name(&ocr_file)),
                Ok(false) => {}
                Err(e) => log::error!("{}", e),
            },
        }

        moved
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
