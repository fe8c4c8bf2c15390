//! Links each extracted figure to the text chunk that best describes it and
//! produces a textual description of the figure.
//!
//! Association is pure: it returns [`FigureRecord`]s and leaves the chunks
//! alone. [`apply_enrichment`] is the explicit step that folds descriptions
//! into the matched chunks.

use crate::embeddings::{cosine_similarity, CharacterNgramEmbedder, Embedder};
use crate::error::Result;
use crate::figures::{ExtractedFigure, PageFigures};
use crate::models::{FigureRecord, TextChunk};
use crate::traits::{CrossModalScorer, Generator, OcrEngine};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

const DESCRIPTION_PROMPT: &str = "\
Describe only the visual details that are clearly visible in this image. Follow these rules:
1. Base the description on explicit features of the image. Use the OCR text only when the image itself is not enough.
2. If the image has no concrete or meaningful visual detail, reply with an empty answer.
3. Do not comment on or correct mistakes in the OCR text; it is reference material only.
4. Do not guess. Describe only what can actually be observed.";

#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    pub description: String,
    pub ocr_text: String,
    /// Index into the document's chunk list.
    pub best_match: Option<usize>,
    pub score: Option<f32>,
}

pub struct FigureTextAssociator {
    ocr: Arc<dyn OcrEngine>,
    generator: Arc<dyn Generator>,
    scorer: Option<Arc<dyn CrossModalScorer>>,
    embedder: CharacterNgramEmbedder,
}

impl FigureTextAssociator {
    pub fn new(ocr: Arc<dyn OcrEngine>, generator: Arc<dyn Generator>) -> Self {
        Self {
            ocr,
            generator,
            scorer: None,
            embedder: CharacterNgramEmbedder::default(),
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn CrossModalScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub async fn associate(
        &self,
        page: u32,
        figure: &ExtractedFigure,
        chunks: &[TextChunk],
    ) -> Association {
        self.associate_excluding(page, figure, chunks, &BTreeSet::new())
            .await
    }

    /// Like [`associate`](Self::associate) but never picks an index in `claimed`.
    pub async fn associate_excluding(
        &self,
        page: u32,
        figure: &ExtractedFigure,
        chunks: &[TextChunk],
        claimed: &BTreeSet<usize>,
    ) -> Association {
        let ocr_text = match self.ocr.extract_text(&figure.raster_png).await {
            Ok(text) => text,
            Err(error) => {
                warn!(page, %error, "ocr failed; continuing without figure text");
                String::new()
            }
        };

        let prompt = format!("{DESCRIPTION_PROMPT}\nOCR text (reference only): [{ocr_text}]");
        let description = match self
            .generator
            .generate(&prompt, Some(&figure.raster_png))
            .await
        {
            Ok(text) => text.trim().to_string(),
            Err(error) => {
                warn!(page, %error, "figure description failed");
                String::new()
            }
        };

        let candidates: Vec<usize> = chunks
            .iter()
            .enumerate()
            .filter(|(index, chunk)| chunk.page == page && !claimed.contains(index))
            .map(|(index, _)| index)
            .collect();

        if candidates.is_empty() {
            debug!(page, "no candidate chunk on the figure's page");
            return Association {
                description,
                ocr_text,
                best_match: None,
                score: None,
            };
        }

        let texts: Vec<String> = candidates
            .iter()
            .map(|index| chunks[*index].text.clone())
            .collect();
        let fallback_query = format!("{description} {ocr_text}");
        let scores = match &self.scorer {
            Some(scorer) => {
                match cross_modal_scores(scorer.as_ref(), &figure.raster_png, &texts).await {
                    Ok(scores) => scores,
                    Err(error) => {
                        warn!(page, %error, "cross-modal scoring failed; using text similarity");
                        self.text_scores(&fallback_query, &texts)
                    }
                }
            }
            None => self.text_scores(&fallback_query, &texts),
        };

        let mut best: Option<(usize, f32)> = None;
        for (index, score) in candidates.iter().zip(scores) {
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((*index, score));
            }
        }

        Association {
            description,
            ocr_text,
            best_match: best.map(|(index, _)| index),
            score: best.map(|(_, score)| score),
        }
    }

    /// Associates every figure greedily in page then extraction order.
    pub async fn associate_all(
        &self,
        pages: &[PageFigures],
        chunks: &[TextChunk],
        allow_shared_targets: bool,
    ) -> Vec<FigureRecord> {
        let mut claimed = BTreeSet::new();
        let mut records = Vec::new();

        for page in pages {
            for figure in &page.figures {
                let association = self
                    .associate_excluding(page.page, figure, chunks, &claimed)
                    .await;
                if let (false, Some(index)) = (allow_shared_targets, association.best_match) {
                    claimed.insert(index);
                }
                records.push(FigureRecord {
                    raster_png: figure.raster_png.clone(),
                    page: page.page,
                    bbox: figure.bbox,
                    associated_text_index: association.best_match,
                    description: association.description,
                });
            }
        }

        records
    }

    fn text_scores(&self, query: &str, texts: &[String]) -> Vec<f32> {
        let query = self.embedder.embed(query);
        texts
            .iter()
            .map(|text| cosine_similarity(&query, &self.embedder.embed(text)))
            .collect()
    }
}

async fn cross_modal_scores(
    scorer: &dyn CrossModalScorer,
    image_png: &[u8],
    texts: &[String],
) -> Result<Vec<f32>> {
    let image = scorer.embed_image(image_png).await?;
    let embedded = scorer.embed_texts(texts).await?;
    Ok(embedded
        .iter()
        .map(|text| cosine_similarity(&image, text))
        .collect())
}

/// Appends each figure's description to its matched chunk, space-joined.
/// Figures without a match or with an empty description change nothing.
pub fn apply_enrichment(chunks: &mut [TextChunk], figures: &[FigureRecord]) {
    for figure in figures {
        let description = figure.description.trim();
        if description.is_empty() {
            continue;
        }
        let Some(chunk) = figure
            .associated_text_index
            .and_then(|index| chunks.get_mut(index))
        else {
            continue;
        };
        chunk.text.push(' ');
        chunk.text.push_str(description);
    }
}
