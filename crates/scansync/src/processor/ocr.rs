use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::OcrConfig;
use crate::item::OcrStatus;

/// Extra wall-clock time granted on top of the per-page engine timeout.
const WALL_CLOCK_MARGIN: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Unsupported image format")]
    Unsupported,

    #[error("Input resolution too low")]
    Dpi,

    #[error("Could not read input file")]
    Input,

    #[error("Could not write output file")]
    Output,

    #[error("OCR engine exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("Failed to start OCR engine: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("OCR engine did not finish within {0:?}")]
    Timeout(Duration),
}

impl OcrError {
    /// Persisted OCR status for this failure.
    pub fn status(&self) -> OcrStatus {
        match self {
            OcrError::Unsupported => OcrStatus::Unsupported,
            OcrError::Dpi => OcrStatus::DpiError,
            OcrError::Input => OcrStatus::InputError,
            OcrError::Output => OcrStatus::OutputError,
            OcrError::Failed { .. } | OcrError::Spawn(_) | OcrError::Timeout(_) => {
                OcrStatus::Failed
            }
        }
    }
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Produces a searchable PDF at `output` from `input`.
    async fn run(&self, input: &Path, output: &Path) -> Result<(), OcrError>;
}

/// Maps an engine exit to a result.
///
/// Exit code 6 means the input already had text; that counts as success
/// as long as an output file was written.
pub fn classify_outcome(
    exit_code: Option<i32>,
    stderr: &str,
    output_exists: bool,
) -> Result<(), OcrError> {
    if stderr.contains("UnsupportedImageFormatError") {
        return Err(OcrError::Unsupported);
    }
    if stderr.contains("DpiError") {
        return Err(OcrError::Dpi);
    }
    match exit_code {
        Some(0) => Ok(()),
        Some(6) if output_exists => Ok(()),
        Some(2) => Err(OcrError::Input),
        Some(4) => Err(OcrError::Output),
        code => Err(OcrError::Failed {
            code,
            stderr: stderr.trim().to_string(),
        }),
    }
}

/// Runs `ocrmypdf` as a child process.
pub struct OcrMyPdf {
    command: String,
    languages: String,
    timeout_secs: u64,
    jpg_quality: u8,
    png_quality: u8,
    optimize: u8,
}

impl OcrMyPdf {
    pub fn new(config: &OcrConfig) -> Self {
        let languages = if config.languages.is_empty() {
            "eng".to_string()
        } else {
            config.languages.join("+")
        };

        Self {
            command: config.command.clone(),
            languages,
            timeout_secs: config.timeout_secs,
            jpg_quality: config.jpg_quality,
            png_quality: config.png_quality,
            optimize: config.optimize,
        }
    }

    pub fn arguments(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "--output-type",
            "pdfa",
            "--skip-text",
            "--rotate-pages",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.extend(
            [
                "--jpg-quality".to_string(),
                self.jpg_quality.to_string(),
                "--png-quality".to_string(),
                self.png_quality.to_string(),
                "--optimize".to_string(),
                self.optimize.to_string(),
                "-l".to_string(),
                self.languages.clone(),
                "--tesseract-timeout".to_string(),
                self.timeout_secs.to_string(),
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.push(input.as_os_str().to_os_string());
        args.push(output.as_os_str().to_os_string());
        args
    }

    fn wall_clock_limit(&self) -> Duration {
        Duration::from_secs(self.timeout_secs) + WALL_CLOCK_MARGIN
    }
}

#[async_trait]
impl OcrEngine for OcrMyPdf {
    async fn run(&self, input: &Path, output: &Path) -> Result<(), OcrError> {
        let limit = self.wall_clock_limit();
        let child = tokio::process::Command::new(&self.command)
            .args(self.arguments(input, output))
            .kill_on_drop(true)
            .output();

        let result = tokio::time::timeout(limit, child)
            .await
            .map_err(|_| OcrError::Timeout(limit))?
            .map_err(OcrError::Spawn)?;

        let stderr = String::from_utf8_lossy(&result.stderr);
        let outcome = classify_outcome(result.status.code(), &stderr, output.exists());
        if let Err(ref e) = outcome {
            tracing::warn!(error = %e, "OCR engine reported a failure");
        }
        outcome
    }
}
