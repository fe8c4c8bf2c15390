use crate::error::{IndexError, Result};
use crate::models::{IndexedEntry, SearchHit};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Turns a source document into the PDF the rest of the pipeline reads.
///
/// Outputs are named by `output_stem`, the document id, so two sources only
/// share a converted PDF when they share a document id.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(&self, source: &Path, output_stem: &str) -> Result<PathBuf>;

    /// Removes the converted output named `output_stem`. Returns whether
    /// anything was removed.
    async fn remove_output(&self, output_stem: &str) -> Result<bool>;
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, entries: &[IndexedEntry]) -> Result<(), IndexError>;

    /// Deletes every entry whose document id matches.
    async fn delete_document(&self, document_id: &str) -> Result<(), IndexError>;

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<SearchHit>, IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, image_png: Option<&[u8]>) -> Result<String>;
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract_text(&self, image_png: &[u8]) -> Result<String>;
}

/// Embeds images and texts into one shared space.
#[async_trait]
pub trait CrossModalScorer: Send + Sync {
    async fn embed_image(&self, image_png: &[u8]) -> Result<Vec<f32>>;

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
