use crate::error::{IngestError, Result};
use crate::traits::OcrEngine;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Runs the `tesseract` binary, streaming the PNG through stdin.
pub struct TesseractOcr {
    binary: String,
    language: Option<String>,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            language: None,
        }
    }
}

impl TesseractOcr {
    pub fn new(language: Option<String>) -> Self {
        Self {
            language,
            ..Self::default()
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn extract_text(&self, image_png: &[u8]) -> Result<String> {
        let mut command = Command::new(&self.binary);
        command.arg("stdin").arg("stdout");
        if let Some(language) = &self.language {
            command.arg("-l").arg(language);
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| IngestError::Extraction(format!("{}: {error}", self.binary)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(image_png).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(IngestError::Extraction(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Skips OCR entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOcr;

#[async_trait]
impl OcrEngine for NoOcr {
    async fn extract_text(&self, _image_png: &[u8]) -> Result<String> {
        Ok(String::new())
    }
}
