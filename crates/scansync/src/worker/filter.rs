//! Which paths under the watch root are documents to ingest.

use std::path::{Path, PathBuf};

use crate::item::is_ocr_file;
use crate::sanitize::redact_path;

const ZONE_IDENTIFIER: &str = ":Zone.Identifier";

/// Why a path is not ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Directory,
    /// Windows security stream copied next to a download.
    ZoneIdentifier,
    Hidden,
    OcrOutput,
    FailedArea,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Rejection::Directory => "is a directory",
            Rejection::ZoneIdentifier => "is a Windows security file",
            Rejection::Hidden => "is hidden",
            Rejection::OcrOutput => "is a working OCR file",
            Rejection::FailedArea => "is in the failed documents folder",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone)]
pub struct PathFilter {
    failed_directory: PathBuf,
}

impl PathFilter {
    pub fn new<P: AsRef<Path>>(failed_directory: P) -> Self {
        Self {
            failed_directory: failed_directory.as_ref().to_path_buf(),
        }
    }

    pub fn in_failed_area(&self, path: &Path) -> bool {
        path.starts_with(&self.failed_directory)
    }

    /// Checks a path. Only the final component decides hidden-ness.
    pub fn check(&self, path: &Path) -> Result<(), Rejection> {
        if path.is_dir() {
            return Err(Rejection::Directory);
        }
        if path.to_string_lossy().contains(ZONE_IDENTIFIER) {
            return Err(Rejection::ZoneIdentifier);
        }
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.') || n.starts_with('_'))
            .unwrap_or(false);
        if hidden {
            return Err(Rejection::Hidden);
        }
        if is_ocr_file(path) {
            return Err(Rejection::OcrOutput);
        }
        if self.in_failed_area(path) {
            return Err(Rejection::FailedArea);
        }
        Ok(())
    }

    /// Like [`check`](Self::check), but deletes security stream files and
    /// logs every rejection.
    pub fn admit(&self, path: &Path) -> bool {
        match self.check(path) {
            Ok(()) => true,
            Err(Rejection::ZoneIdentifier) => {
                tracing::info!(file = %redact_path(path), "Removing Windows security file");
                if let Err(e) = std::fs::remove_file(path) {
                    tracing::debug!(error = %e, "Could not remove security file");
                }
                false
            }
            Err(Rejection::Directory) => {
                tracing::warn!(file = %redact_path(path), "Path is a directory, skipping");
                false
            }
            Err(reason) => {
                tracing::debug!(file = %redact_path(path), %reason, "Ignoring path");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_check() {
        let dir = TempDir::new().unwrap();
        let filter = PathFilter::new(dir.path().join("failed-documents"));
        let check = |rel: &str| filter.check(&dir.path().join(rel));

        assert_eq!(check("Finance/scan.pdf"), Ok(()));
        assert_eq!(check("Finance/.scan.pdf"), Err(Rejection::Hidden));
        assert_eq!(check("Finance/_tmp.pdf"), Err(Rejection::Hidden));
        assert_eq!(check("Finance/scan_OCR.pdf"), Err(Rejection::OcrOutput));
        assert_eq!(
            check("Finance/scan.pdf:Zone.Identifier"),
            Err(Rejection::ZoneIdentifier)
        );
        assert_eq!(
            check("failed-documents/scan.pdf"),
            Err(Rejection::FailedArea)
        );
        assert_eq!(filter.check(dir.path()), Err(Rejection::Directory));
    }

    #[test]
    fn test_admit_removes_zone_identifier() {
        let dir = TempDir::new().unwrap();
        let filter = PathFilter::new(dir.path().join("failed"));
        let zone = dir.path().join("scan.pdf:Zone.Identifier");
        std::fs::write(&zone, b"[ZoneTransfer]").unwrap();

        assert!(!filter.admit(&zone));
        assert!(!zone.exists());
    }
}
