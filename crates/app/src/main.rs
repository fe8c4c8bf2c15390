use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use pdf_rag_core::{
    AnswerStyle, ChatCompletionsGenerator, ClipEndpointScorer, DocumentIdStrategy,
    FigureTextAssociator, FingerprintStore, IngestionOptions, IngestionOrchestrator,
    JsonFingerprintFile, NoOcr, OcrEngine, OfficeConverter, QdrantStore, RetrievalPipeline,
    TesseractOcr, VectorIndex,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Folder holding the raw documents (pdf, doc, docx, pptx).
    #[arg(long, env = "RAG_RAW_FILE_PATH", default_value = "raw_files")]
    raw_dir: PathBuf,

    /// Folder the converted PDFs are written to.
    #[arg(long, env = "RAG_FILE_PATH", default_value = "processed_files")]
    processed_dir: PathBuf,

    /// JSON file holding the content fingerprints.
    #[arg(long, env = "RAG_HASH_FILE", default_value = "file_hashes.json")]
    hash_file: PathBuf,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Seconds before a Qdrant request is abandoned.
    #[arg(long, env = "QDRANT_TIMEOUT_SECS", default_value = "30")]
    qdrant_timeout_secs: u64,

    /// Collection for text chunks
    #[arg(long, default_value = "pdf_text")]
    text_collection: String,

    /// Collection for figure descriptions
    #[arg(long, default_value = "pdf_images")]
    image_collection: String,

    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Args)]
struct LlmArgs {
    /// OpenAI-compatible API base, e.g. http://localhost:11434/v1
    #[arg(long, env = "LLM_ENDPOINT", default_value = "http://localhost:11434/v1")]
    llm_endpoint: String,

    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o")]
    llm_model: String,

    /// Seconds before a generator or CLIP request is abandoned.
    #[arg(long, env = "LLM_TIMEOUT_SECS", default_value = "120")]
    llm_timeout_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Convert, segment and index every document changed since the last run.
    Ingest(IngestArgs),
    /// Answer a question from the indexed documents.
    Ask {
        #[arg(long)]
        question: String,
        /// Restrict the answer to yes or no.
        #[arg(long, default_value_t = false)]
        yes_no: bool,
        /// Do not search the image index.
        #[arg(long, default_value_t = false)]
        ignore_images: bool,
    },
    /// Print the tracked files and the number of indexed entries.
    Status,
    /// Forget every fingerprint so the next ingest reprocesses everything.
    ClearHashes,
}

#[derive(Args)]
struct IngestArgs {
    /// Index text only.
    #[arg(long, default_value_t = false)]
    ignore_images: bool,

    #[arg(long, default_value = "512")]
    chunk_size: usize,

    #[arg(long, default_value = "0")]
    chunk_overlap: usize,

    /// Image boxes closer than this many points are merged into one figure.
    #[arg(long, default_value = "80")]
    merge_threshold: f32,

    /// Margin in points added around each merged figure.
    #[arg(long, default_value = "40")]
    padding: f32,

    /// Key documents by their path under the raw folder instead of the file stem.
    #[arg(long, default_value_t = false)]
    relative_ids: bool,

    /// Index every described figure instead of one per page.
    #[arg(long, default_value_t = false)]
    all_figures: bool,

    /// Let each text chunk receive at most one figure description.
    #[arg(long, default_value_t = false)]
    exclusive_targets: bool,

    /// Save every decoded page image here.
    #[arg(long)]
    image_dir: Option<PathBuf>,

    /// Save every merged figure crop here.
    #[arg(long)]
    merged_image_dir: Option<PathBuf>,

    /// LibreOffice binary used for doc/docx/pptx.
    #[arg(long, default_value = "soffice")]
    soffice: String,

    /// CLIP-style embedding service for figure/text matching.
    #[arg(long, env = "CLIP_ENDPOINT")]
    clip_endpoint: Option<String>,

    /// Tesseract language, e.g. `eng` or `chi_tra`.
    #[arg(long, env = "OCR_LANGUAGE")]
    ocr_language: Option<String>,

    /// Skip OCR of figures.
    #[arg(long, default_value_t = false)]
    no_ocr: bool,
}

impl IngestArgs {
    fn options(&self) -> IngestionOptions {
        IngestionOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            merge_threshold: self.merge_threshold,
            padding: self.padding,
            ignore_image_processing: self.ignore_images,
            one_image_entry_per_page: !self.all_figures,
            allow_shared_targets: !self.exclusive_targets,
            document_ids: if self.relative_ids {
                DocumentIdStrategy::RelativePath
            } else {
                DocumentIdStrategy::FileStem
            },
            individual_image_dir: self.image_dir.clone(),
            merged_image_dir: self.merged_image_dir.clone(),
            ..IngestionOptions::default()
        }
    }
}

fn generator(args: &LlmArgs) -> anyhow::Result<Arc<ChatCompletionsGenerator>> {
    let generator = ChatCompletionsGenerator::new(&args.llm_endpoint, &args.llm_model)?
        .with_timeout(Duration::from_secs(args.llm_timeout_secs))?
        .with_api_key(args.llm_api_key.clone());
    Ok(Arc::new(generator))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-rag boot"
    );

    let qdrant_timeout = Duration::from_secs(cli.qdrant_timeout_secs);
    let text_store = Arc::new(
        QdrantStore::new(&cli.qdrant_url, &cli.text_collection)?.with_timeout(qdrant_timeout)?,
    );
    let image_store = Arc::new(
        QdrantStore::new(&cli.qdrant_url, &cli.image_collection)?.with_timeout(qdrant_timeout)?,
    );

    match cli.command {
        Command::Ingest(args) => {
            text_store.ensure_collection().await?;
            image_store.ensure_collection().await?;

            let ocr: Arc<dyn OcrEngine> = if args.no_ocr {
                Arc::new(NoOcr)
            } else {
                Arc::new(TesseractOcr::new(args.ocr_language.clone()))
            };
            let mut associator = FigureTextAssociator::new(ocr, generator(&cli.llm)?);
            if let Some(endpoint) = &args.clip_endpoint {
                let scorer = ClipEndpointScorer::new(endpoint)?
                    .with_timeout(Duration::from_secs(cli.llm.llm_timeout_secs))?;
                associator = associator.with_scorer(Arc::new(scorer));
            }

            let orchestrator = IngestionOrchestrator::new(
                JsonFingerprintFile::new(&cli.hash_file),
                Arc::new(OfficeConverter::new(&cli.processed_dir).with_binary(&args.soffice)),
                text_store,
                image_store,
                associator,
                args.options(),
            )?;

            let summary = orchestrator
                .run(&cli.raw_dir)
                .await
                .with_context(|| format!("ingesting {}", cli.raw_dir.display()))?;

            if summary.is_noop() {
                println!("nothing to do: no changed or deleted files");
                return Ok(());
            }
            for failure in &summary.failures {
                warn!(path = %failure.path, stage = ?failure.stage, reason = %failure.reason, "file failed");
            }
            println!(
                "changed={} deleted={} converted={} text_entries={} image_entries={} failures={}",
                summary.changed.len(),
                summary.deleted.len(),
                summary.converted.len(),
                summary.text_entries,
                summary.image_entries,
                summary.failures.len()
            );
        }
        Command::Ask {
            question,
            yes_no,
            ignore_images,
        } => {
            let pipeline = RetrievalPipeline::new(
                text_store,
                image_store,
                generator(&cli.llm)?,
                &cli.processed_dir,
            )
            .ignore_images(ignore_images);
            let style = if yes_no {
                AnswerStyle::YesNo
            } else {
                AnswerStyle::FreeForm
            };

            let answer = pipeline.ask(&question, style).await?;
            for hit in &answer.contexts {
                println!(
                    "[context] score={:.4} id={} file={} page={}",
                    hit.score, hit.id, hit.metadata.file_name, hit.metadata.page
                );
            }
            if let Some(hit) = &answer.image {
                println!(
                    "[image] id={} file={} page={}",
                    hit.id, hit.metadata.file_name, hit.metadata.page
                );
            }
            println!("{}", answer.answer);
        }
        Command::Status => {
            let fingerprints = FingerprintStore::new(
                JsonFingerprintFile::new(&cli.hash_file),
                &IngestionOptions::default().extensions,
            );
            let records = fingerprints.records()?;
            println!("tracked files: {}", records.len());
            for record in records {
                let short = record.content_hash.get(..12).unwrap_or(&record.content_hash);
                println!("  {short} {}", record.normalized_path);
            }
            println!(
                "{}: {} entries",
                text_store.collection(),
                text_store.count().await?
            );
            println!(
                "{}: {} entries",
                image_store.collection(),
                image_store.count().await?
            );
        }
        Command::ClearHashes => {
            let fingerprints = FingerprintStore::new(
                JsonFingerprintFile::new(&cli.hash_file),
                &IngestionOptions::default().extensions,
            );
            if fingerprints.clear()? {
                println!("cleared {}", cli.hash_file.display());
            } else {
                println!("no fingerprints stored at {}", cli.hash_file.display());
            }
        }
    }

    Ok(())
}
