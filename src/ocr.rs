use async_trait::async_trait;
use image::DynamicImage;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("failed to stage image for OCR: {0}")]
    Stage(#[from] std::io::Error),

    #[error("failed to encode image for OCR: {0}")]
    Encode(#[from] image::ImageError),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Text found in `image`, cleaned up; empty when nothing was recognized.
    async fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError>;
}

/// `tesseract` command-line OCR.
pub struct Tesseract {
    program: String,
}

impl Tesseract {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl TextRecognizer for Tesseract {
    async fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError> {
        let staged = tempfile::Builder::new()
            .prefix("promptpilot-ocr-")
            .suffix(".png")
            .tempfile()?;
        image.save(staged.path())?;

        let output = Command::new(&self.program)
            .arg(staged.path())
            .arg("stdout")
            .args(["--psm", "6"])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| OcrError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(OcrError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = clean_ocr_text(&String::from_utf8_lossy(&output.stdout));
        tracing::debug!("recognized {} chars", text.len());
        Ok(text)
    }
}

/// Collapse OCR output into single-spaced lines, dropping blank lines and
/// form feeds.
pub fn clean_ocr_text(raw: &str) -> String {
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
