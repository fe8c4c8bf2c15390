use crate::error::{IngestError, Result};
use crate::geometry::{box_distance, BBox};
use crate::layout::{PageLayout, PdfLayout};
use crate::models::{IngestionOptions, RawBlock, TextChunk};

/// Lines closer than this many font sizes belong to the same structural block.
const LINE_GAP_FACTOR: f32 = 0.8;

/// Split points tried in order before falling back to single characters.
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
    pub min_block_length: usize,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
            overlap: value.chunk_overlap,
            min_block_length: value.min_block_length,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk_size {}",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageSegmenter {
    config: ChunkingConfig,
}

impl PageSegmenter {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Structural blocks of every page, with short blocks accumulated until
    /// they reach `min_block_length` characters. Accumulation never crosses
    /// a page boundary.
    pub fn extract_blocks(&self, layout: &PdfLayout) -> Vec<RawBlock> {
        layout
            .pages
            .iter()
            .flat_map(|page| accumulate_blocks(&structural_blocks(page), self.config.min_block_length))
            .collect()
    }

    pub fn split(&self, blocks: &[RawBlock], document_id: &str) -> Vec<TextChunk> {
        let mut chunks = Vec::new();
        for block in blocks {
            for text in split_text(&block.text, self.config.chunk_size, self.config.overlap) {
                chunks.push(TextChunk {
                    text,
                    bbox: block.bbox,
                    page: block.page,
                    document_id: document_id.to_string(),
                });
            }
        }
        chunks
    }

    pub fn segment(&self, layout: &PdfLayout, document_id: &str) -> Vec<TextChunk> {
        self.split(&self.extract_blocks(layout), document_id)
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Groups a page's positioned runs into blocks of nearby lines. A page with
/// fallback text becomes one block covering the whole page.
pub fn structural_blocks(page: &PageLayout) -> Vec<RawBlock> {
    if let Some(text) = page.fallback_text.as_deref().map(normalize_whitespace) {
        if !text.is_empty() {
            return vec![RawBlock {
                text,
                bbox: page.bounds(),
                page: page.index,
            }];
        }
    }

    let mut blocks: Vec<RawBlock> = Vec::new();
    let mut current: Option<(RawBlock, f32)> = None;

    for run in &page.runs {
        let text = normalize_whitespace(&run.text);
        if text.is_empty() {
            continue;
        }

        let joins = current.as_ref().is_some_and(|(block, size)| {
            box_distance(&block.bbox, &run.bbox) <= LINE_GAP_FACTOR * size.max(run.font_size)
        });

        if let (true, Some((block, size))) = (joins, current.as_mut()) {
            block.text.push(' ');
            block.text.push_str(&text);
            block.bbox = block.bbox.union(&run.bbox);
            *size = size.max(run.font_size);
            continue;
        }

        if let Some((block, _)) = current.take() {
            blocks.push(block);
        }
        current = Some((
            RawBlock {
                text,
                bbox: run.bbox,
                page: page.index,
            },
            run.font_size,
        ));
    }

    if let Some((block, _)) = current {
        blocks.push(block);
    }

    blocks
}

/// Merges consecutive blocks while the accumulated text is shorter than
/// `min_length` characters, unioning their boxes.
pub fn accumulate_blocks(blocks: &[RawBlock], min_length: usize) -> Vec<RawBlock> {
    let mut merged = Vec::new();
    let mut pending: Option<RawBlock> = None;

    for block in blocks {
        if block.text.trim().is_empty() {
            continue;
        }

        if let Some(accumulated) = pending
            .as_mut()
            .filter(|accumulated| accumulated.text.chars().count() < min_length)
        {
            accumulated.text.push(' ');
            accumulated.text.push_str(&block.text);
            accumulated.bbox = accumulated.bbox.union(&block.bbox);
            continue;
        }

        if let Some(done) = pending.replace(block.clone()) {
            merged.push(done);
        }
    }

    merged.extend(pending);
    merged
}

/// Splits `text` into pieces of at most `chunk_size` characters, preferring
/// paragraph, line, sentence and word boundaries before cutting inside a word.
/// Consecutive pieces share up to `overlap` characters.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if chunk_size == 0 {
        return Vec::new();
    }
    split_recursive(text, &SEPARATORS, chunk_size, overlap)
}

fn split_recursive(text: &str, separators: &[&str], chunk_size: usize, overlap: usize) -> Vec<String> {
    let position = separators
        .iter()
        .position(|separator| separator.is_empty() || text.contains(*separator))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(position).copied().unwrap_or("");
    let finer = separators.get(position + 1..).unwrap_or(&[]);

    let pieces: Vec<&str> = if separator.is_empty() {
        text.char_indices()
            .map(|(start, ch)| &text[start..start + ch.len_utf8()])
            .collect()
    } else {
        text.split_inclusive(separator).collect()
    };

    let mut chunks = Vec::new();
    let mut short = Vec::new();
    for piece in pieces {
        if char_len(piece) < chunk_size {
            short.push(piece);
            continue;
        }

        if !short.is_empty() {
            chunks.extend(merge_pieces(&short, chunk_size, overlap));
            short.clear();
        }
        if finer.is_empty() {
            push_trimmed(&mut chunks, piece);
        } else {
            chunks.extend(split_recursive(piece, finer, chunk_size, overlap));
        }
    }

    if !short.is_empty() {
        chunks.extend(merge_pieces(&short, chunk_size, overlap));
    }
    chunks
}

fn merge_pieces(pieces: &[&str], chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: Vec<(&str, usize)> = Vec::new();
    let mut total = 0usize;

    for piece in pieces {
        let length = char_len(piece);
        if total + length > chunk_size && !window.is_empty() {
            push_trimmed(&mut chunks, &concat(&window));
            while total > overlap || (total > 0 && total + length > chunk_size) {
                let (_, dropped) = window.remove(0);
                total -= dropped;
            }
        }
        window.push((piece, length));
        total += length;
    }

    if !window.is_empty() {
        push_trimmed(&mut chunks, &concat(&window));
    }
    chunks
}

fn concat(window: &[(&str, usize)]) -> String {
    window.iter().map(|(piece, _)| *piece).collect()
}

fn push_trimmed(chunks: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
