//! Incremental ingestion run.
//!
//! One call to [`IngestionOrchestrator::run`] diffs the raw directory against
//! the fingerprint snapshot, drops every stale document from both indices,
//! then converts, segments and (optionally) enriches each changed file before
//! upserting its entries. Files are processed one at a time.

use crate::associator::{apply_enrichment, FigureTextAssociator};
use crate::error::{IngestError, Result};
use crate::figures::FigureExtractor;
use crate::fingerprint::{normalize_path, FingerprintDiff, FingerprintRepository, FingerprintStore};
use crate::layout::PdfLayout;
use crate::models::{
    ContentType, DocumentIdStrategy, EntryMetadata, FigureRecord, FileFailure, FileStage,
    IndexedEntry, IngestionOptions, IngestionSummary, TextChunk,
};
use crate::segmenter::{ChunkingConfig, PageSegmenter};
use crate::traits::{DocumentConverter, VectorIndex};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct IngestionOrchestrator<R: FingerprintRepository> {
    fingerprints: FingerprintStore<R>,
    converter: Arc<dyn DocumentConverter>,
    text_index: Arc<dyn VectorIndex>,
    image_index: Arc<dyn VectorIndex>,
    associator: FigureTextAssociator,
    segmenter: PageSegmenter,
    figures: FigureExtractor,
    options: IngestionOptions,
}

/// Everything one file contributes to the indices.
struct FileOutput {
    converted: PathBuf,
    text: Vec<IndexedEntry>,
    images: Vec<IndexedEntry>,
    degraded: Option<String>,
}

impl<R: FingerprintRepository> IngestionOrchestrator<R> {
    pub fn new(
        repository: R,
        converter: Arc<dyn DocumentConverter>,
        text_index: Arc<dyn VectorIndex>,
        image_index: Arc<dyn VectorIndex>,
        associator: FigureTextAssociator,
        options: IngestionOptions,
    ) -> Result<Self> {
        let segmenter = PageSegmenter::new(ChunkingConfig::from(&options))?;
        let figures = FigureExtractor::new().with_artifact_dirs(
            options.individual_image_dir.clone(),
            options.merged_image_dir.clone(),
        );

        Ok(Self {
            fingerprints: FingerprintStore::new(repository, &options.extensions),
            converter,
            text_index,
            image_index,
            associator,
            segmenter,
            figures,
            options,
        })
    }

    pub fn fingerprints(&self) -> &FingerprintStore<R> {
        &self.fingerprints
    }

    pub fn options(&self) -> &IngestionOptions {
        &self.options
    }

    pub async fn run(&self, raw_dir: &Path) -> Result<IngestionSummary> {
        let started_at = Utc::now();
        let diff = self.fingerprints.diff(raw_dir)?;

        let mut summary = IngestionSummary {
            started_at,
            changed: diff.changed.iter().cloned().collect(),
            deleted: diff.deleted.iter().cloned().collect(),
            converted: Vec::new(),
            text_entries: 0,
            image_entries: 0,
            failures: Vec::new(),
        };

        if diff.is_empty() {
            info!(directory = %raw_dir.display(), "index is up to date");
            return Ok(summary);
        }

        let ids = self.document_ids(raw_dir, &diff);

        for path in &diff.deleted {
            let Some(document_id) = ids.get(path) else {
                continue;
            };
            if let Err(error) = self.converter.remove_output(document_id).await {
                warn!(path = %path, %error, "could not remove converted pdf");
            }
        }

        for document_id in ids.values().collect::<BTreeSet<_>>() {
            if let Err(error) = self.delete_everywhere(document_id).await {
                return Err(self.abort(&diff, error));
            }
        }

        let mut retry = Vec::new();
        for path in &diff.changed {
            let Some(document_id) = ids.get(path) else {
                continue;
            };

            let output = match self.process_file(path, document_id).await {
                Ok(output) => output,
                Err(failure) => {
                    warn!(path = %failure.path, stage = ?failure.stage, reason = %failure.reason, "file skipped");
                    retry.push(path.clone());
                    summary.failures.push(failure);
                    continue;
                }
            };

            if let Err(error) = self.upsert(&output).await {
                return Err(self.abort(&diff, error));
            }

            if let Some(reason) = output.degraded {
                summary.failures.push(FileFailure {
                    path: path.clone(),
                    stage: FileStage::Figures,
                    reason,
                });
            }
            summary.text_entries += output.text.len();
            summary.image_entries += output.images.len();
            summary.converted.push(output.converted);
        }

        if !retry.is_empty() {
            self.fingerprints.invalidate(&diff, retry.iter())?;
        }

        info!(
            changed = summary.changed.len(),
            deleted = summary.deleted.len(),
            converted = summary.converted.len(),
            text_entries = summary.text_entries,
            image_entries = summary.image_entries,
            failures = summary.failures.len(),
            "ingestion finished"
        );
        Ok(summary)
    }

    fn document_ids(&self, raw_dir: &Path, diff: &FingerprintDiff) -> BTreeMap<String, String> {
        let ids: BTreeMap<String, String> = diff
            .stale()
            .map(|path| {
                (
                    path.clone(),
                    document_id(raw_dir, path, self.options.document_ids),
                )
            })
            .collect();

        let mut owners: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (path, id) in &ids {
            owners.entry(id.as_str()).or_default().push(path.as_str());
        }
        for (id, paths) in owners.iter().filter(|(_, paths)| paths.len() > 1) {
            warn!(document_id = %id, paths = ?paths, "several source files share one document id");
        }

        ids
    }

    async fn delete_everywhere(&self, document_id: &str) -> Result<()> {
        self.text_index.delete_document(document_id).await?;
        self.image_index.delete_document(document_id).await?;
        debug!(document_id, "stale entries deleted");
        Ok(())
    }

    async fn upsert(&self, output: &FileOutput) -> Result<()> {
        self.text_index.upsert(&output.text).await?;
        self.image_index.upsert(&output.images).await?;
        Ok(())
    }

    /// Makes every path of the diff show up again next run, then hands the
    /// index error back.
    fn abort(&self, diff: &FingerprintDiff, error: IngestError) -> IngestError {
        error!(%error, "index write failed; aborting run");
        if let Err(invalidate) = self.fingerprints.invalidate(diff, diff.stale()) {
            error!(error = %invalidate, "could not invalidate fingerprints");
        }
        error
    }

    async fn process_file(
        &self,
        path: &str,
        document_id: &str,
    ) -> std::result::Result<FileOutput, FileFailure> {
        let failure = |stage: FileStage, error: IngestError| FileFailure {
            path: path.to_string(),
            stage,
            reason: error.to_string(),
        };

        let converted = self
            .converter
            .convert(Path::new(path), document_id)
            .await
            .map_err(|error| failure(FileStage::Convert, error))?;
        let layout = PdfLayout::load(&converted).map_err(|error| failure(FileStage::Segment, error))?;

        let mut chunks = self.segmenter.segment(&layout, document_id);
        let mut degraded = None;
        let mut records = Vec::new();

        if !self.options.ignore_image_processing {
            match self.figures.extract_figures(
                &layout,
                ..,
                self.options.merge_threshold,
                self.options.padding,
            ) {
                Ok(pages) => {
                    records = self
                        .associator
                        .associate_all(&pages, &chunks, self.options.allow_shared_targets)
                        .await;
                    apply_enrichment(&mut chunks, &records);
                }
                Err(error) => {
                    warn!(path, %error, "figure stage failed; indexing text only");
                    degraded = Some(error.to_string());
                }
            }
        }

        let file_name = converted
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        let text = text_entries(document_id, &file_name, &chunks);
        let images = image_entries(
            document_id,
            &file_name,
            &records,
            self.options.one_image_entry_per_page,
        );
        info!(
            path,
            document_id,
            chunks = text.len(),
            images = images.len(),
            "file processed"
        );

        Ok(FileOutput {
            converted,
            text,
            images,
            degraded,
        })
    }
}

/// Reconciliation key of a source file.
pub fn document_id(raw_dir: &Path, normalized_path: &str, strategy: DocumentIdStrategy) -> String {
    match strategy {
        DocumentIdStrategy::FileStem => Path::new(normalized_path)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| normalized_path.to_string()),
        DocumentIdStrategy::RelativePath => {
            let root = normalize_path(raw_dir);
            let relative = normalized_path
                .strip_prefix(root.trim_end_matches('/'))
                .unwrap_or(normalized_path)
                .trim_start_matches('/');
            relative
                .chars()
                .map(|ch| if ch.is_alphanumeric() || ch == '-' { ch } else { '_' })
                .collect()
        }
    }
}

/// `{document_id}_page{page}_txt{index}` with `index` the position in the
/// document's chunk list.
pub fn text_entries(document_id: &str, file_name: &str, chunks: &[TextChunk]) -> Vec<IndexedEntry> {
    chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| IndexedEntry {
            id: format!("{document_id}_page{}_txt{index}", chunk.page),
            document: chunk.text.clone(),
            metadata: EntryMetadata {
                content_type: ContentType::Text,
                page: chunk.page,
                file_type: document_id.to_string(),
                file_name: file_name.to_string(),
                chunk_index: Some(index),
            },
        })
        .collect()
}

/// Image entries for described figures. With `one_per_page` the first
/// described figure of each page wins and is keyed `{document_id}_page{page}_img`;
/// otherwise every described figure gets `..._img{k}`.
pub fn image_entries(
    document_id: &str,
    file_name: &str,
    figures: &[FigureRecord],
    one_per_page: bool,
) -> Vec<IndexedEntry> {
    let mut per_page: BTreeMap<u32, usize> = BTreeMap::new();
    let mut entries = Vec::new();

    for figure in figures {
        let description = figure.description.trim();
        if description.is_empty() {
            continue;
        }

        let seen = per_page.entry(figure.page).or_insert(0);
        let id = match (one_per_page, *seen) {
            (true, 0) => format!("{document_id}_page{}_img", figure.page),
            (true, _) => continue,
            (false, k) => format!("{document_id}_page{}_img{k}", figure.page),
        };
        *seen += 1;

        entries.push(IndexedEntry {
            id,
            document: description.to_string(),
            metadata: EntryMetadata {
                content_type: ContentType::Image,
                page: figure.page,
                file_type: document_id.to_string(),
                file_name: file_name.to_string(),
                chunk_index: figure.associated_text_index,
            },
        });
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use crate::fingerprint::InMemoryFingerprints;
    use crate::fixtures::{build_pdf, checkerboard, FixtureImage, FixturePage};
    use crate::geometry::BBox;
    use crate::models::SearchHit;
    use crate::services::{NoOcr, OfficeConverter};
    use crate::stores::InMemoryIndex;
    use crate::traits::Generator;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    struct Describe;

    #[async_trait]
    impl Generator for Describe {
        async fn generate(&self, _prompt: &str, _image_png: Option<&[u8]>) -> Result<String> {
            Ok("A checkered test pattern.".to_string())
        }
    }

    /// Accepts deletes, refuses writes.
    struct ReadOnlyIndex;

    #[async_trait]
    impl VectorIndex for ReadOnlyIndex {
        async fn upsert(&self, _entries: &[IndexedEntry]) -> Result<(), IndexError> {
            Err(IndexError::Request("read only".to_string()))
        }

        async fn delete_document(&self, _document_id: &str) -> Result<(), IndexError> {
            Ok(())
        }

        async fn query(&self, _text: &str, _top_k: usize) -> Result<Vec<SearchHit>, IndexError> {
            Ok(Vec::new())
        }

        async fn count(&self) -> Result<usize, IndexError> {
            Ok(0)
        }
    }

    struct Harness {
        _root: TempDir,
        raw: PathBuf,
        processed: PathBuf,
        text: Arc<InMemoryIndex>,
        images: Arc<InMemoryIndex>,
        orchestrator: IngestionOrchestrator<InMemoryFingerprints>,
    }

    fn harness(options: IngestionOptions) -> Harness {
        let root = tempdir().expect("tempdir");
        let raw = root.path().join("raw");
        let processed = root.path().join("processed");
        fs::create_dir_all(&raw).expect("raw dir");

        let text = Arc::new(InMemoryIndex::new());
        let images = Arc::new(InMemoryIndex::new());
        let associator = FigureTextAssociator::new(Arc::new(NoOcr), Arc::new(Describe));
        let orchestrator = IngestionOrchestrator::new(
            InMemoryFingerprints::new(),
            Arc::new(OfficeConverter::new(&processed).with_binary("no-such-office-binary-here")),
            text.clone(),
            images.clone(),
            associator,
            options,
        )
        .expect("valid options");

        Harness {
            _root: root,
            raw,
            processed,
            text,
            images,
            orchestrator,
        }
    }

    fn write_pdf(path: &Path, lines: &[&str]) {
        let mut page = FixturePage::default();
        for (row, line) in lines.iter().enumerate() {
            page = page.line(72.0, 700.0 - row as f32 * 40.0, 12.0, line);
        }
        fs::write(path, build_pdf(&[page])).expect("write pdf");
    }

    #[tokio::test]
    async fn unchanged_directory_is_a_noop() -> Result<(), Box<dyn std::error::Error>> {
        let h = harness(IngestionOptions::default());
        write_pdf(&h.raw.join("alpha.pdf"), &["Alpha text about pumps."]);

        let first = h.orchestrator.run(&h.raw).await?;
        assert_eq!(first.changed.len(), 1);
        assert_eq!(first.text_entries, 1);
        let ids = h.text.ids()?;

        let second = h.orchestrator.run(&h.raw).await?;
        assert!(second.is_noop());
        assert_eq!(h.text.ids()?, ids);
        Ok(())
    }

    #[tokio::test]
    async fn changed_file_replaces_its_entries() -> Result<(), Box<dyn std::error::Error>> {
        let h = harness(IngestionOptions::default());
        let source = h.raw.join("manual.pdf");
        write_pdf(&source, &["First edition."]);
        h.orchestrator.run(&h.raw).await?;
        assert_eq!(h.text.entries()?[0].document, "First edition.");

        write_pdf(&source, &["Second edition with a longer body of text."]);
        let summary = h.orchestrator.run(&h.raw).await?;

        assert_eq!(summary.changed.len(), 1);
        let entries = h.text.entries()?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "manual_page0_txt0");
        assert_eq!(entries[0].document, "Second edition with a longer body of text.");
        Ok(())
    }

    #[tokio::test]
    async fn deleted_file_leaves_no_entries_or_output() -> Result<(), Box<dyn std::error::Error>> {
        let h = harness(IngestionOptions::default());
        write_pdf(&h.raw.join("keep.pdf"), &["Keep me."]);
        write_pdf(&h.raw.join("gone.pdf"), &["Delete me."]);
        h.orchestrator.run(&h.raw).await?;
        assert!(h.processed.join("gone.pdf").is_file());

        fs::remove_file(h.raw.join("gone.pdf"))?;
        let summary = h.orchestrator.run(&h.raw).await?;

        assert_eq!(summary.deleted.len(), 1);
        assert!(summary.changed.is_empty());
        assert_eq!(h.text.ids()?, vec!["keep_page0_txt0".to_string()]);
        assert!(!h.processed.join("gone.pdf").exists());
        Ok(())
    }

    #[tokio::test]
    async fn conversion_failures_are_retried() -> Result<(), Box<dyn std::error::Error>> {
        let h = harness(IngestionOptions::default());
        fs::write(h.raw.join("slides.pptx"), b"deck")?;
        write_pdf(&h.raw.join("notes.pdf"), &["Notes."]);

        let first = h.orchestrator.run(&h.raw).await?;
        assert_eq!(first.failures.len(), 1);
        assert_eq!(first.failures[0].stage, FileStage::Convert);
        assert!(first.failures[0].path.ends_with("slides.pptx"));
        assert_eq!(first.converted.len(), 1);

        let second = h.orchestrator.run(&h.raw).await?;
        assert_eq!(second.changed.len(), 1);
        assert!(second.changed[0].ends_with("slides.pptx"));
        Ok(())
    }

    #[tokio::test]
    async fn figures_become_one_image_entry_per_page() -> Result<(), Box<dyn std::error::Error>> {
        let h = harness(IngestionOptions::default());
        let page = FixturePage::default()
            .line(72.0, 700.0, 12.0, "Figure 1 shows the test pattern.")
            .image(FixtureImage::new(100.0, 300.0, 200.0, 150.0, checkerboard(8, 8)))
            .image(FixtureImage::new(100.0, 50.0, 60.0, 60.0, checkerboard(4, 4)));
        fs::write(h.raw.join("figs.pdf"), build_pdf(&[page]))?;

        let summary = h.orchestrator.run(&h.raw).await?;
        assert_eq!(summary.image_entries, 1);
        assert_eq!(h.images.ids()?, vec!["figs_page0_img".to_string()]);

        let text = h.text.entries()?;
        assert!(text[0].document.ends_with("A checkered test pattern."));
        Ok(())
    }

    #[tokio::test]
    async fn ignoring_images_skips_the_figure_stage() -> Result<(), Box<dyn std::error::Error>> {
        let h = harness(IngestionOptions {
            ignore_image_processing: true,
            ..IngestionOptions::default()
        });
        let page = FixturePage::default()
            .line(72.0, 700.0, 12.0, "Caption.")
            .image(FixtureImage::new(100.0, 300.0, 200.0, 150.0, checkerboard(8, 8)));
        fs::write(h.raw.join("figs.pdf"), build_pdf(&[page]))?;

        let summary = h.orchestrator.run(&h.raw).await?;
        assert_eq!(summary.image_entries, 0);
        assert_eq!(h.images.count().await?, 0);
        assert_eq!(h.text.entries()?[0].document, "Caption.");
        Ok(())
    }

    #[tokio::test]
    async fn figure_failure_indexes_text_only_without_retry(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let scratch = tempdir()?;
        let not_a_dir = scratch.path().join("artifacts");
        fs::write(&not_a_dir, b"occupied")?;

        let h = harness(IngestionOptions {
            individual_image_dir: Some(not_a_dir),
            ..IngestionOptions::default()
        });
        let page = FixturePage::default()
            .line(72.0, 700.0, 12.0, "Panel overview.")
            .image(FixtureImage::new(100.0, 300.0, 200.0, 150.0, checkerboard(8, 8)));
        fs::write(h.raw.join("panel.pdf"), build_pdf(&[page]))?;

        let summary = h.orchestrator.run(&h.raw).await?;

        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].stage, FileStage::Figures);
        assert_eq!(summary.converted.len(), 1);
        assert_eq!(summary.image_entries, 0);
        assert_eq!(h.images.count().await?, 0);
        assert_eq!(h.text.ids()?, vec!["panel_page0_txt0".to_string()]);
        assert_eq!(h.text.entries()?[0].document, "Panel overview.");

        assert!(h.orchestrator.fingerprints().diff(&h.raw)?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn relative_ids_keep_same_stem_sources_apart() -> Result<(), Box<dyn std::error::Error>>
    {
        let h = harness(IngestionOptions {
            document_ids: DocumentIdStrategy::RelativePath,
            ..IngestionOptions::default()
        });
        fs::create_dir_all(h.raw.join("a"))?;
        fs::create_dir_all(h.raw.join("b"))?;
        write_pdf(&h.raw.join("a/x.pdf"), &["Edition from folder a."]);
        write_pdf(&h.raw.join("b/x.pdf"), &["Edition from folder b."]);

        h.orchestrator.run(&h.raw).await?;
        let names: BTreeSet<String> = h
            .text
            .entries()?
            .into_iter()
            .map(|entry| entry.metadata.file_name)
            .collect();
        assert_eq!(
            names,
            BTreeSet::from(["a_x_pdf.pdf".to_string(), "b_x_pdf.pdf".to_string()])
        );

        fs::remove_file(h.raw.join("a/x.pdf"))?;
        h.orchestrator.run(&h.raw).await?;

        let entries = h.text.entries()?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "b_x_pdf_page0_txt0");
        assert!(!h.processed.join("a_x_pdf.pdf").exists());
        let live = PdfLayout::load(&h.processed.join(&entries[0].metadata.file_name))?;
        assert_eq!(live.pages[0].runs[0].text, "Edition from folder b.");
        Ok(())
    }

    #[tokio::test]
    async fn index_write_failure_aborts_and_keeps_files_pending(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let raw = root.path().join("raw");
        fs::create_dir_all(&raw)?;
        write_pdf(&raw.join("alpha.pdf"), &["Alpha."]);

        let orchestrator = IngestionOrchestrator::new(
            InMemoryFingerprints::new(),
            Arc::new(OfficeConverter::new(root.path().join("processed"))),
            Arc::new(ReadOnlyIndex),
            Arc::new(ReadOnlyIndex),
            FigureTextAssociator::new(Arc::new(NoOcr), Arc::new(Describe)),
            IngestionOptions::default(),
        )?;

        let result = orchestrator.run(&raw).await;
        assert!(matches!(result, Err(ref error) if error.is_index_write()));

        let diff = orchestrator.fingerprints().diff(&raw)?;
        assert_eq!(diff.changed.len(), 1);
        Ok(())
    }

    #[test]
    fn document_ids_follow_the_strategy() {
        let raw = Path::new("/data/raw");
        assert_eq!(
            document_id(raw, "/data/raw/sub/Report 2024.docx", DocumentIdStrategy::FileStem),
            "Report 2024"
        );
        assert_eq!(
            document_id(raw, "/data/raw/sub/Report 2024.docx", DocumentIdStrategy::RelativePath),
            "sub_Report_2024_docx"
        );
    }

    #[test]
    fn image_entries_number_figures_when_not_limited_per_page() {
        let figure = |page: u32, description: &str| FigureRecord {
            raster_png: Vec::new(),
            page,
            bbox: BBox::default(),
            associated_text_index: Some(0),
            description: description.to_string(),
        };
        let figures = vec![
            figure(1, ""),
            figure(1, "first"),
            figure(1, "second"),
            figure(2, "third"),
        ];

        let limited: Vec<String> = image_entries("doc", "doc.pdf", &figures, true)
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(limited, vec!["doc_page1_img", "doc_page2_img"]);

        let all: Vec<String> = image_entries("doc", "doc.pdf", &figures, false)
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(all, vec!["doc_page1_img0", "doc_page1_img1", "doc_page2_img0"]);
    }
}
