use crate::geometry::BBox;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A tracked source file as recorded in the fingerprint snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub normalized_path: String,
    pub content_hash: String,
}

/// A structural text block after short-block accumulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBlock {
    pub text: String,
    pub bbox: BBox,
    pub page: u32,
}

/// The unit of text indexing. `page` is zero-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub text: String,
    pub bbox: BBox,
    pub page: u32,
    pub document_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureRecord {
    pub raster_png: Vec<u8>,
    pub page: u32,
    pub bbox: BBox,
    pub associated_text_index: Option<usize>,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub content_type: ContentType,
    pub page: u32,
    /// The document id; named after the field downstream consumers filter on.
    pub file_type: String,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
}

/// One record in a vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedEntry {
    pub id: String,
    pub document: String,
    pub metadata: EntryMetadata,
}

impl IndexedEntry {
    pub fn document_id(&self) -> &str {
        &self.metadata.file_type
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub document: String,
    pub metadata: EntryMetadata,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DocumentIdStrategy {
    /// File name without extension. Two sources sharing a stem share an id.
    #[default]
    FileStem,
    /// Slug of the path relative to the raw directory, extension included.
    RelativePath,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_block_length: usize,
    pub merge_threshold: f32,
    pub padding: f32,
    pub ignore_image_processing: bool,
    pub one_image_entry_per_page: bool,
    pub allow_shared_targets: bool,
    pub document_ids: DocumentIdStrategy,
    pub extensions: Vec<String>,
    pub individual_image_dir: Option<PathBuf>,
    pub merged_image_dir: Option<PathBuf>,
}

pub const MIN_BLOCK_LENGTH: usize = 100;

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 0,
            min_block_length: MIN_BLOCK_LENGTH,
            merge_threshold: 80.0,
            padding: 40.0,
            ignore_image_processing: false,
            one_image_entry_per_page: true,
            allow_shared_targets: true,
            document_ids: DocumentIdStrategy::FileStem,
            extensions: ["pdf", "doc", "docx", "pptx"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            individual_image_dir: None,
            merged_image_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStage {
    Convert,
    Segment,
    Figures,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: String,
    pub stage: FileStage,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub started_at: DateTime<Utc>,
    pub changed: Vec<String>,
    pub deleted: Vec<String>,
    pub converted: Vec<PathBuf>,
    pub text_entries: usize,
    pub image_entries: usize,
    pub failures: Vec<FileFailure>,
}

impl IngestionSummary {
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnswerStyle {
    #[default]
    FreeForm,
    YesNo,
}
