use crate::error::{IngestError, Result};
use crate::traits::DocumentConverter;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

const STAGING_DIR: &str = ".staging";

/// Copies PDFs into the processed directory and converts office documents
/// there with a headless LibreOffice.
pub struct OfficeConverter {
    processed_dir: PathBuf,
    binary: String,
}

impl OfficeConverter {
    pub fn new(processed_dir: impl Into<PathBuf>) -> Self {
        Self {
            processed_dir: processed_dir.into(),
            binary: "soffice".to_string(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    /// `{processed_dir}/{output_stem}.pdf`
    pub fn output_path(&self, output_stem: &str) -> Result<PathBuf> {
        let valid = !output_stem.is_empty()
            && output_stem != "."
            && output_stem != ".."
            && !output_stem.contains(&['/', '\\'][..]);
        if !valid {
            return Err(IngestError::InvalidArgument(format!(
                "`{output_stem}` cannot name a converted pdf"
            )));
        }
        Ok(self.processed_dir.join(format!("{output_stem}.pdf")))
    }

    /// LibreOffice names its output after the source stem, so it converts
    /// into a private staging folder and the result is moved into place.
    async fn run_office(&self, source: &Path, output: &Path, output_stem: &str) -> Result<()> {
        let staging = self.processed_dir.join(STAGING_DIR).join(output_stem);
        tokio::fs::create_dir_all(&staging).await?;
        let converted = self.run_office_into(source, &staging).await;
        let moved = match converted {
            Ok(()) => self.take_staged(source, &staging, output).await,
            Err(error) => Err(error),
        };
        if let Err(error) = tokio::fs::remove_dir_all(&staging).await {
            debug!(staging = %staging.display(), %error, "staging folder not removed");
        }
        moved
    }

    async fn take_staged(&self, source: &Path, staging: &Path, output: &Path) -> Result<()> {
        let stem = source
            .file_stem()
            .ok_or_else(|| IngestError::MissingFileName(source.display().to_string()))?;
        let staged = staging.join(format!("{}.pdf", stem.to_string_lossy()));
        if !tokio::fs::try_exists(&staged).await.unwrap_or(false) {
            return Err(conversion_error(source, "converter produced no pdf"));
        }
        tokio::fs::rename(&staged, output)
            .await
            .map_err(|error| conversion_error(source, error.to_string()))
    }

    async fn run_office_into(&self, source: &Path, outdir: &Path) -> Result<()> {
        let output = Command::new(&self.binary)
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(outdir)
            .arg(source)
            .output()
            .await
            .map_err(|error| conversion_error(source, format!("{}: {error}", self.binary)))?;

        if !output.status.success() {
            return Err(conversion_error(
                source,
                format!(
                    "{} exited with {}: {}",
                    self.binary,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(())
    }
}

fn conversion_error(source: &Path, reason: impl Into<String>) -> IngestError {
    IngestError::Conversion {
        path: source.display().to_string(),
        reason: reason.into(),
    }
}

#[async_trait]
impl DocumentConverter for OfficeConverter {
    async fn convert(&self, source: &Path, output_stem: &str) -> Result<PathBuf> {
        let output = self.output_path(output_stem)?;
        tokio::fs::create_dir_all(&self.processed_dir).await?;

        let extension = source
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => {
                let same_file = match (
                    tokio::fs::canonicalize(source).await,
                    tokio::fs::canonicalize(&output).await,
                ) {
                    (Ok(left), Ok(right)) => left == right,
                    _ => false,
                };
                if !same_file {
                    tokio::fs::copy(source, &output)
                        .await
                        .map_err(|error| conversion_error(source, error.to_string()))?;
                }
            }
            "doc" | "docx" | "pptx" => self.run_office(source, &output, output_stem).await?,
            other => {
                return Err(conversion_error(
                    source,
                    format!("unsupported extension `{other}`"),
                ))
            }
        }

        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(conversion_error(source, "converter produced no pdf"));
        }

        info!(source = %source.display(), output = %output.display(), "converted");
        Ok(output)
    }

    async fn remove_output(&self, output_stem: &str) -> Result<bool> {
        let output = self.output_path(output_stem)?;
        match tokio::fs::remove_file(&output).await {
            Ok(()) => {
                info!(output = %output.display(), "removed converted pdf");
                Ok(true)
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(output = %output.display(), "no converted pdf to remove");
                Ok(false)
            }
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn pdfs_are_copied_under_the_output_stem() -> Result<(), Box<dyn std::error::Error>> {
        let raw = tempdir()?;
        let processed = tempdir()?;
        let source = raw.path().join("Quarterly Report.PDF");
        std::fs::write(&source, b"%PDF-1.5 fake")?;

        let converter = OfficeConverter::new(processed.path());
        let output = converter.convert(&source, "Quarterly Report").await?;

        assert_eq!(output, processed.path().join("Quarterly Report.pdf"));
        assert_eq!(std::fs::read(&output)?, b"%PDF-1.5 fake");
        Ok(())
    }

    #[tokio::test]
    async fn unsupported_extensions_fail_conversion() -> Result<(), Box<dyn std::error::Error>> {
        let raw = tempdir()?;
        let source = raw.path().join("notes.txt");
        std::fs::write(&source, b"plain")?;

        let result = OfficeConverter::new(raw.path().join("out"))
            .convert(&source, "notes")
            .await;
        assert!(matches!(result, Err(IngestError::Conversion { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn missing_office_binary_is_a_conversion_failure() -> Result<(), Box<dyn std::error::Error>>
    {
        let raw = tempdir()?;
        let source = raw.path().join("slides.pptx");
        std::fs::write(&source, b"not really a deck")?;

        let converter =
            OfficeConverter::new(raw.path().join("out")).with_binary("no-such-office-binary-here");
        let result = converter.convert(&source, "slides").await;
        assert!(matches!(result, Err(IngestError::Conversion { .. })));
        assert!(!raw.path().join("out").join(STAGING_DIR).join("slides").exists());
        Ok(())
    }

    #[tokio::test]
    async fn remove_output_reports_whether_a_file_existed() -> Result<(), Box<dyn std::error::Error>>
    {
        let processed = tempdir()?;
        let converter = OfficeConverter::new(processed.path());
        std::fs::write(processed.path().join("manual.pdf"), b"%PDF")?;

        assert!(converter.remove_output("manual").await?);
        assert!(!converter.remove_output("manual").await?);
        Ok(())
    }

    #[tokio::test]
    async fn same_stem_sources_get_distinct_outputs() -> Result<(), Box<dyn std::error::Error>> {
        let raw = tempdir()?;
        let processed = tempdir()?;
        for (folder, body) in [("a", b"%PDF a".as_slice()), ("b", b"%PDF b".as_slice())] {
            std::fs::create_dir_all(raw.path().join(folder))?;
            std::fs::write(raw.path().join(folder).join("x.pdf"), body)?;
        }

        let converter = OfficeConverter::new(processed.path());
        let a = converter.convert(&raw.path().join("a/x.pdf"), "a_x_pdf").await?;
        let b = converter.convert(&raw.path().join("b/x.pdf"), "b_x_pdf").await?;

        assert_ne!(a, b);
        assert!(converter.remove_output("a_x_pdf").await?);
        assert_eq!(std::fs::read(&b)?, b"%PDF b");
        Ok(())
    }

    #[test]
    fn output_stems_cannot_leave_the_processed_dir() {
        let converter = OfficeConverter::new("/processed");
        assert!(converter.output_path("../escape").is_err());
        assert!(converter.output_path("").is_err());
        assert!(converter.output_path("manual").is_ok());
    }
}
