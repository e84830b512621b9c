//! First-page preview thumbnails.

use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::Command;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::ProcessError;
use crate::item::ItemType;

pub trait PreviewRenderer: Send + Sync {
    /// Renders the first page of `source` into a JPEG at `dest`.
    fn render(&self, source: &Path, kind: ItemType, dest: &Path) -> Result<(), ProcessError>;
}

/// Preview file for an item id inside the preview directory.
pub fn preview_file(preview_dir: &Path, item_id: i64) -> PathBuf {
    preview_dir.join(format!("{}.jpg", item_id))
}

/// Path the dashboard serves a preview under.
pub fn preview_web_path(url_prefix: &str, item_id: i64) -> String {
    format!("{}/{}.jpg", url_prefix.trim_end_matches('/'), item_id)
}

/// Renders PDFs through `pdftoppm` (poppler) and images through `image`.
pub struct PopplerPreview {
    height: u32,
    quality: u8,
}

impl PopplerPreview {
    pub fn new(height: u32, quality: u8) -> Self {
        Self { height, quality }
    }

    fn rasterize_first_page(&self, source: &Path) -> Result<DynamicImage, ProcessError> {
        let prefix = std::env::temp_dir().join(format!("scansync_preview_{}", uuid::Uuid::new_v4()));

        let output = Command::new("pdftoppm")
            .arg("-png")
            .args(["-f", "1", "-l", "1", "-singlefile"])
            .args(["-scale-to-y", &self.height.to_string(), "-scale-to-x", "-1"])
            .arg(source)
            .arg(&prefix)
            .output()
            .map_err(|e| {
                ProcessError::Preview(format!(
                    "Failed to run pdftoppm: {}. Make sure poppler-utils is installed.",
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(ProcessError::Preview(format!(
                "pdftoppm failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let rendered = prefix.with_extension("png");
        let image = image::open(&rendered)
            .map_err(|e| ProcessError::Preview(format!("Failed to read rendered page: {}", e)));
        let _ = std::fs::remove_file(&rendered);
        image
    }

    fn write_jpeg(&self, image: &DynamicImage, dest: &Path) -> Result<(), ProcessError> {
        let scaled = if image.height() == self.height {
            image.clone()
        } else {
            image.resize(u32::MAX, self.height, FilterType::Triangle)
        };
        let rgb = DynamicImage::ImageRgb8(scaled.to_rgb8());

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProcessError::WriteFile {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let file = std::fs::File::create(dest).map_err(|e| ProcessError::WriteFile {
            path: dest.to_path_buf(),
            source: e,
        })?;
        let encoder = JpegEncoder::new_with_quality(BufWriter::new(file), self.quality);
        rgb.write_with_encoder(encoder)
            .map_err(|e| ProcessError::Preview(format!("Failed to encode preview: {}", e)))
    }
}

impl PreviewRenderer for PopplerPreview {
    fn render(&self, source: &Path, kind: ItemType, dest: &Path) -> Result<(), ProcessError> {
        let _span = tracing::info_span!("processor.preview").entered();

        let image = match kind {
            ItemType::Pdf => self.rasterize_first_page(source)?,
            ItemType::Image => image::open(source)
                .map_err(|e| ProcessError::ImageProcessing(format!("Failed to load image: {}", e)))?,
            ItemType::Unknown => {
                return Err(ProcessError::Preview("unknown document type".to_string()))
            }
        };
        self.write_jpeg(&image, dest)
    }
}
