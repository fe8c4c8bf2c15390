//! Question answering over the text and image indices.
//!
//! A question is expanded into alternative queries and keywords by the
//! generator, each of them pulls the single best text entry, and the original
//! question pulls the best image entry whose page is rendered and attached to
//! the final generation.

use crate::error::{IndexError, IngestError, Result};
use crate::figures::{encode_png, PageRenderer, PlacedImageRenderer};
use crate::layout::PdfLayout;
use crate::models::{AnswerStyle, SearchHit};
use crate::traits::{Generator, VectorIndex};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

const PAGE_RENDER_SCALE: f32 = 2.0;
const EXPANSION_COUNT: usize = 3;

const EXPANSION_PROMPT: &str = r#"You help a search system. For the user's question do two things:
1. Write three different versions of the question to use as retrieval queries.
2. Extract three keywords that best capture the question's core intent.

Reply with JSON only, in exactly this shape:
{"queries": ["query 1", "query 2", "query 3"], "keywords": ["keyword 1", "keyword 2", "keyword 3"]}"#;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct QueryPlan {
    pub queries: Vec<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub answer: String,
    pub prompt: String,
    pub plan: QueryPlan,
    pub contexts: Vec<SearchHit>,
    pub image: Option<SearchHit>,
}

pub struct RetrievalPipeline {
    text_index: Arc<dyn VectorIndex>,
    image_index: Arc<dyn VectorIndex>,
    generator: Arc<dyn Generator>,
    processed_dir: PathBuf,
    renderer: PlacedImageRenderer,
    ignore_images: bool,
}

impl RetrievalPipeline {
    pub fn new(
        text_index: Arc<dyn VectorIndex>,
        image_index: Arc<dyn VectorIndex>,
        generator: Arc<dyn Generator>,
        processed_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            text_index,
            image_index,
            generator,
            processed_dir: processed_dir.into(),
            renderer: PlacedImageRenderer,
            ignore_images: false,
        }
    }

    pub fn ignore_images(mut self, ignore: bool) -> Self {
        self.ignore_images = ignore;
        self
    }

    /// Falls back to the question alone when the generator fails or its reply
    /// does not carry exactly three queries.
    pub async fn expand_query(&self, question: &str) -> QueryPlan {
        let prompt = format!("{EXPANSION_PROMPT}\n\nOriginal question: \"{question}\"");
        let reply = match self.generator.generate(&prompt, None).await {
            Ok(reply) => reply,
            Err(error) => {
                warn!(%error, "query expansion failed");
                String::new()
            }
        };

        let mut plan = match parse_query_plan(&reply) {
            Ok(Some(plan)) => plan,
            Ok(None) => QueryPlan::default(),
            Err(error) => {
                warn!(%error, "query expansion reply unusable");
                QueryPlan::default()
            }
        };
        if plan.queries.len() != EXPANSION_COUNT {
            info!(count = plan.queries.len(), "using the original question as the only query");
            plan.queries = vec![question.to_string()];
        }
        plan
    }

    pub async fn ask(&self, question: &str, style: AnswerStyle) -> Result<Answer> {
        if question.trim().is_empty() {
            return Err(IngestError::InvalidArgument("question is empty".to_string()));
        }

        let plan = self.expand_query(question).await;
        debug!(queries = ?plan.queries, keywords = ?plan.keywords, "query plan");

        let mut seen = BTreeSet::new();
        let mut contexts = Vec::new();
        for query in plan.queries.iter().chain(plan.keywords.iter()) {
            let hits = self.text_index.query(query, 1).await.map_err(retrieval_error)?;
            match hits.into_iter().next() {
                Some(hit) if seen.insert(hit.id.clone()) => contexts.push(hit),
                Some(hit) => debug!(id = %hit.id, "duplicate context skipped"),
                None => {}
            }
        }

        let mut image = None;
        let mut image_png = None;
        if !self.ignore_images {
            let hits = self
                .image_index
                .query(question, 1)
                .await
                .map_err(retrieval_error)?;
            if let Some(hit) = hits.into_iter().next() {
                match self.render_page(&hit) {
                    Ok(png) => image_png = Some(png),
                    Err(error) => warn!(id = %hit.id, %error, "page image unavailable"),
                }
                image = Some(hit);
            }
        }

        let context = contexts
            .iter()
            .map(|hit| hit.document.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = compose_prompt(&context, question, style);
        let answer = self.generator.generate(&prompt, image_png.as_deref()).await?;

        Ok(Answer {
            answer,
            prompt,
            plan,
            contexts,
            image,
        })
    }

    fn render_page(&self, hit: &SearchHit) -> Result<Vec<u8>> {
        let path = self.processed_dir.join(&hit.metadata.file_name);
        let layout = PdfLayout::load(&path)?;
        let page = layout.page(hit.metadata.page).ok_or_else(|| {
            IngestError::NotFound(format!("page {} of {}", hit.metadata.page, path.display()))
        })?;
        let raster = self
            .renderer
            .render(page, &page.bounds(), PAGE_RENDER_SCALE)?;
        info!(file = %hit.metadata.file_name, page = hit.metadata.page, "page image attached");
        encode_png(&raster)
    }
}

fn json_object_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)\{.*\}"))
        .as_ref()
        .map_err(|error| IngestError::Regex(error.clone()))
}

fn retrieval_error(error: IndexError) -> IngestError {
    IngestError::Retrieval(error.to_string())
}

/// Extracts the JSON object from a model reply, tolerating code fences and
/// surrounding prose. `Ok(None)` when the reply holds no object.
pub fn parse_query_plan(reply: &str) -> Result<Option<QueryPlan>> {
    let object = json_object_pattern()?;
    let Some(found) = object.find(reply) else {
        return Ok(None);
    };
    let mut plan: QueryPlan = serde_json::from_str(found.as_str())?;
    plan.queries.retain(|query| !query.trim().is_empty());
    plan.keywords.retain(|keyword| !keyword.trim().is_empty());
    Ok(Some(plan))
}

pub fn compose_prompt(context: &str, question: &str, style: AnswerStyle) -> String {
    match style {
        AnswerStyle::FreeForm => format!("Context: {context}\n\nQuestion: {question}\nAnswer:"),
        AnswerStyle::YesNo => format!(
            "Context: {context}\n\nQuestion: {question}\n\
             Rule: decide the answer from the context and reply with only 'yes' or 'no', nothing else.\n\
             Answer:"
        ),
    }
}
