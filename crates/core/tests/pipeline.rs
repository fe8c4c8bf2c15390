#[path = "../src/fixtures.rs"]
#[allow(dead_code)]
mod fixtures;

use async_trait::async_trait;
use fixtures::{build_pdf, checkerboard, FixtureImage, FixturePage};
use pdf_rag_core::{
    ContentType, FigureTextAssociator, Generator, InMemoryFingerprints, InMemoryIndex,
    IndexedEntry, IngestionOptions, IngestionOrchestrator, NoOcr, OfficeConverter, Result,
    VectorIndex,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

struct Describe;

#[async_trait]
impl Generator for Describe {
    async fn generate(&self, _prompt: &str, _image_png: Option<&[u8]>) -> Result<String> {
        Ok("A grid of coloured squares.".to_string())
    }
}

struct Setup {
    text: Arc<InMemoryIndex>,
    images: Arc<InMemoryIndex>,
    orchestrator: IngestionOrchestrator<InMemoryFingerprints>,
}

fn setup(processed: &Path, options: IngestionOptions) -> Setup {
    let text = Arc::new(InMemoryIndex::new());
    let images = Arc::new(InMemoryIndex::new());
    let orchestrator = IngestionOrchestrator::new(
        InMemoryFingerprints::new(),
        Arc::new(OfficeConverter::new(processed)),
        text.clone(),
        images.clone(),
        FigureTextAssociator::new(Arc::new(NoOcr), Arc::new(Describe)),
        options,
    )
    .expect("default options are valid");
    Setup {
        text,
        images,
        orchestrator,
    }
}

fn three_page_report() -> Vec<u8> {
    build_pdf(&[
        FixturePage::default().line(72.0, 700.0, 12.0, "Chapter one introduces the device."),
        FixturePage::default()
            .line(72.0, 720.0, 12.0, "Chapter two: the front panel is shown below.")
            .image(FixtureImage::new(150.0, 350.0, 240.0, 180.0, checkerboard(16, 12))),
        FixturePage::default().line(72.0, 700.0, 12.0, "Chapter three covers maintenance."),
    ])
}

#[tokio::test]
async fn three_page_document_yields_text_per_page_and_one_image(
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let root = tempdir()?;
    let raw = root.path().join("raw");
    std::fs::create_dir_all(&raw)?;
    std::fs::write(raw.join("report.pdf"), three_page_report())?;

    let s = setup(&root.path().join("processed"), IngestionOptions::default());
    let summary = s.orchestrator.run(&raw).await?;
    assert!(summary.failures.is_empty());

    let text = s.text.entries()?;
    let pages: BTreeSet<u32> = text.iter().map(|entry| entry.metadata.page).collect();
    assert_eq!(pages, BTreeSet::from([0, 1, 2]));
    assert!(text
        .iter()
        .all(|entry| entry.metadata.content_type == ContentType::Text
            && entry.metadata.file_type == "report"
            && entry.metadata.file_name == "report.pdf"));

    let images = s.images.entries()?;
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].id, "report_page1_img");
    assert_eq!(images[0].metadata.page, 1);
    assert_eq!(images[0].document, "A grid of coloured squares.");
    Ok(())
}

#[tokio::test]
async fn ignoring_images_indexes_no_image_entries(
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let root = tempdir()?;
    let raw = root.path().join("raw");
    std::fs::create_dir_all(&raw)?;
    std::fs::write(raw.join("report.pdf"), three_page_report())?;

    let s = setup(
        &root.path().join("processed"),
        IngestionOptions {
            ignore_image_processing: true,
            ..IngestionOptions::default()
        },
    );
    let summary = s.orchestrator.run(&raw).await?;

    assert_eq!(summary.image_entries, 0);
    assert_eq!(s.images.count().await?, 0);
    assert!(s.text.count().await? >= 3);
    Ok(())
}

#[tokio::test]
async fn reindexing_a_document_leaves_none_of_its_old_entries(
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let root = tempdir()?;
    let raw = root.path().join("raw");
    std::fs::create_dir_all(&raw)?;
    std::fs::write(raw.join("report.pdf"), three_page_report())?;
    std::fs::write(
        raw.join("other.pdf"),
        build_pdf(&[FixturePage::default().line(72.0, 700.0, 12.0, "Unrelated memo.")]),
    )?;

    let s = setup(&root.path().join("processed"), IngestionOptions::default());
    s.orchestrator.run(&raw).await?;
    let before: Vec<IndexedEntry> = s.text.entries()?;
    let before_images = s.images.entries()?;

    std::fs::write(
        raw.join("report.pdf"),
        build_pdf(&[FixturePage::default().line(72.0, 700.0, 12.0, "Revised single page edition.")]),
    )?;
    let summary = s.orchestrator.run(&raw).await?;
    assert_eq!(summary.changed.len(), 1);

    let after = s.text.entries()?;
    let stale: Vec<&IndexedEntry> = before
        .iter()
        .filter(|entry| entry.metadata.file_type == "report")
        .filter(|entry| after.contains(entry))
        .collect();
    assert!(stale.is_empty(), "stale entries survived: {stale:?}");
    assert!(after
        .iter()
        .any(|entry| entry.metadata.file_type == "report"
            && entry.document.contains("Revised single page edition")));
    assert!(after.iter().any(|entry| entry.document.contains("Unrelated memo")));

    assert_eq!(before_images.len(), 1);
    assert_eq!(s.images.count().await?, 0);
    Ok(())
}
