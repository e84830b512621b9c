//! Format probing and text extraction for incoming documents.

use std::path::Path;

use crate::error::ProcessError;
use crate::item::ItemType;

fn load_pdf(path: &Path) -> Result<lopdf::Document, ProcessError> {
    lopdf::Document::load(path).map_err(|e| {
        ProcessError::PdfProcessing(format!("Failed to parse {}: {}", display_name(path), e))
    })
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Number of pages of a PDF file.
pub fn page_count(path: &Path) -> Result<u32, ProcessError> {
    let doc = load_pdf(path)?;
    Ok(doc.get_pages().len() as u32)
}

/// Whether the file parses as a PDF with at least one page.
pub fn is_pdf(path: &Path) -> bool {
    matches!(page_count(path), Ok(pages) if pages > 0)
}

/// Whether the file decodes as a raster image.
pub fn is_image(path: &Path) -> bool {
    let reader = match image::ImageReader::open(path) {
        Ok(reader) => reader,
        Err(_) => return false,
    };
    match reader.with_guessed_format() {
        Ok(reader) => reader.format().is_some() && reader.into_dimensions().is_ok(),
        Err(_) => false,
    }
}

/// Classifies a file, trying PDF before image.
pub fn classify(path: &Path) -> Option<ItemType> {
    if is_pdf(path) {
        Some(ItemType::Pdf)
    } else if is_image(path) {
        Some(ItemType::Image)
    } else {
        None
    }
}

/// Text of the first page, trimmed. Empty when the page has no text layer.
pub fn first_page_text(path: &Path) -> Result<String, ProcessError> {
    let doc = load_pdf(path)?;
    let Some((&first, _)) = doc.get_pages().iter().next() else {
        return Ok(String::new());
    };
    let text = doc
        .extract_text(&[first])
        .map_err(|e| ProcessError::TextExtraction(e.to_string()))?;
    Ok(text.trim().to_string())
}


#[cfg(test)]
mod tests {
    use super::fixtures::{write_pdf, write_png};
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_classify_pdf() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.pdf");
        write_pdf(&path, &["Invoice 2024", "Page two"]);

        assert!(is_pdf(&path));
        assert_eq!(page_count(&path).unwrap(), 2);
        assert_eq!(classify(&path), Some(ItemType::Pdf));
    }

    #[test]
    fn test_classify_image() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.png");
        write_png(&path, 20, 10);

        assert!(!is_pdf(&path));
        assert!(is_image(&path));
        assert_eq!(classify(&path), Some(ItemType::Image));
    }

    #[test]
    fn test_classify_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.pdf");
        std::fs::write(&path, b"%PDF-1.4 truncated").unwrap();

        assert_eq!(classify(&path), None);
        assert!(page_count(&path).is_err());
    }

    #[test]
    fn test_first_page_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.pdf");
        write_pdf(&path, &["Rechnung ACME", "Seite zwei"]);

        let text = first_page_text(&path).unwrap();
        assert!(text.contains("Rechnung ACME"));
        assert!(!text.contains("Seite zwei"));
    }
}
