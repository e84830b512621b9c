//! Document processing collaborators: inspection, previews, OCR and naming.
//!
//! Each external tool sits behind a trait ([`preview::PreviewRenderer`],
//! [`ocr::OcrEngine`], [`naming::FilenameBackend`]) so stages can be
//! exercised without poppler, ocrmypdf or a model server installed.

pub mod inspector;
pub mod naming;
pub mod ocr;
pub mod preview;

pub use naming::{FilenameBackend, NamingError};
pub use ocr::{OcrEngine, OcrError, OcrMyPdf};
pub use preview::{PopplerPreview, PreviewRenderer};
