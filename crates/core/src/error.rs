use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("conversion failed for {path}: {reason}")]
    Conversion { path: String, reason: String },

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("index write failed: {0}")]
    IndexWrite(#[from] IndexError),

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl IngestError {
    /// Index write failures abort an ingestion run; every other error is
    /// scoped to the file that raised it.
    pub fn is_index_write(&self) -> bool {
        matches!(self, IngestError::IndexWrite(_))
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("index request failed: {0}")]
    Request(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
