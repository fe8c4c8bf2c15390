pub mod associator;
pub mod cmap;
pub mod embeddings;
pub mod error;
pub mod figures;
pub mod fingerprint;
pub mod geometry;
pub mod ingest;
pub mod layout;
pub mod models;
pub mod retrieval;
pub mod segmenter;
pub mod services;
pub mod stores;
pub mod traits;

#[cfg(test)]
mod fixtures;

pub use associator::{apply_enrichment, Association, FigureTextAssociator};
pub use embeddings::{cosine_similarity, CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IndexError, IngestError, Result};
pub use figures::{
    decode_image, is_valid_image, ExtractedFigure, FigureExtractor, PageFigures, PageRenderer,
    PlacedImageRenderer, RENDER_SCALE,
};
pub use fingerprint::{
    calculate_file_hash, discover_source_files, normalize_path, FingerprintDiff,
    FingerprintRepository, FingerprintStore, InMemoryFingerprints, JsonFingerprintFile, Snapshot,
};
pub use geometry::{box_distance, merge_overlapping, BBox};
pub use ingest::{document_id, IngestionOrchestrator};
pub use cmap::ToUnicodeMap;
pub use layout::{PageLayout, PdfLayout};
pub use models::{
    AnswerStyle, ContentType, DocumentIdStrategy, EntryMetadata, FigureRecord, FileFailure,
    FileRecord, FileStage, IndexedEntry, IngestionOptions, IngestionSummary, RawBlock, SearchHit,
    TextChunk,
};
pub use retrieval::{compose_prompt, Answer, QueryPlan, RetrievalPipeline};
pub use segmenter::{ChunkingConfig, PageSegmenter};
pub use services::{ChatCompletionsGenerator, ClipEndpointScorer, NoOcr, OfficeConverter, TesseractOcr};
pub use stores::{InMemoryIndex, QdrantStore};
pub use traits::{CrossModalScorer, DocumentConverter, Generator, OcrEngine, VectorIndex};
