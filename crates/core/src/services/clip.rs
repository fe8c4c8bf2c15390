use crate::error::{IngestError, Result};
use crate::services::generator::png_data_url;
use crate::services::{http_client, DEFAULT_REQUEST_TIMEOUT};
use crate::traits::CrossModalScorer;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

/// Client for a CLIP-style embedding service.
///
/// `POST {endpoint}/embed/image` with `{"image": <data url>}` answers
/// `{"embedding": [..]}`; `POST {endpoint}/embed/text` with `{"texts": [..]}`
/// answers `{"embeddings": [[..], ..]}`.
pub struct ClipEndpointScorer {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ImageEmbedding {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct TextEmbeddings {
    embeddings: Vec<Vec<f32>>,
}

impl ClipEndpointScorer {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client(DEFAULT_REQUEST_TIMEOUT)?,
            endpoint: endpoint.into(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = http_client(timeout)?;
        Ok(self)
    }

    fn url(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}/", self.endpoint.trim_end_matches('/')))
            .and_then(|base| base.join(path))
            .map_err(|error| IngestError::InvalidArgument(format!("clip endpoint: {error}")))
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<T> {
        let response = self.client.post(self.url(path)?).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Extraction(format!(
                "clip endpoint returned {status}"
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl CrossModalScorer for ClipEndpointScorer {
    async fn embed_image(&self, image_png: &[u8]) -> Result<Vec<f32>> {
        let parsed: ImageEmbedding = self
            .post("embed/image", json!({ "image": png_data_url(image_png) }))
            .await?;
        Ok(parsed.embedding)
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let parsed: TextEmbeddings = self.post("embed/text", json!({ "texts": texts })).await?;
        if parsed.embeddings.len() != texts.len() {
            return Err(IngestError::Extraction(format!(
                "clip endpoint returned {} embeddings for {} texts",
                parsed.embeddings.len(),
                texts.len()
            )));
        }
        Ok(parsed.embeddings)
    }
}
