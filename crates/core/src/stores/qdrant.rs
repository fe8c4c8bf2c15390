use crate::embeddings::{CharacterNgramEmbedder, Embedder};
use crate::error::IndexError;
use crate::models::{EntryMetadata, IndexedEntry, SearchHit};
use crate::services::http_client;
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

const BACKEND: &str = "qdrant";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    embedder: CharacterNgramEmbedder,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
    ) -> Result<Self, IndexError> {
        Ok(Self {
            endpoint: endpoint.into(),
            collection: collection.into(),
            client: http_client(REQUEST_TIMEOUT)?,
            embedder: CharacterNgramEmbedder::default(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, IndexError> {
        self.client = http_client(timeout)?;
        Ok(self)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Creates the collection with cosine distance when it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        let url = self.url(&format!("collections/{}", self.collection))?;
        let response = self.client.get(url.clone()).send().await?;

        if response.status() == StatusCode::OK {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(url)
            .json(&json!({
                "vectors": {
                    "size": self.embedder.dimensions(),
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    fn url(&self, path: &str) -> Result<Url, IndexError> {
        let base = Url::parse(&format!("{}/", self.endpoint.trim_end_matches('/')))?;
        Ok(base.join(path)?)
    }

    fn points_url(&self, action: &str) -> Result<Url, IndexError> {
        self.url(&format!("collections/{}/points{action}", self.collection))
    }
}

/// Qdrant only accepts integers and UUIDs as point ids, so entry ids are
/// hashed into a stable UUID.
pub fn point_id(entry_id: &str) -> Uuid {
    let digest = Sha256::digest(entry_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

fn backend_error(status: StatusCode) -> IndexError {
    IndexError::BackendResponse {
        backend: BACKEND.to_string(),
        details: status.to_string(),
    }
}

async fn check(response: Response) -> Result<Value, IndexError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(IndexError::BackendResponse {
            backend: BACKEND.to_string(),
            details: format!("{status}: {body}"),
        });
    }
    Ok(response.json().await?)
}

fn document_filter(document_id: &str) -> Value {
    json!({
        "must": [
            { "key": "file_type", "match": { "value": document_id } }
        ]
    })
}

fn parse_hits(body: &Value) -> Result<Vec<SearchHit>, IndexError> {
    let hits = body
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut result = Vec::with_capacity(hits.len());
    for hit in hits {
        let payload = hit.get("payload").cloned().unwrap_or(Value::Null);
        let metadata: EntryMetadata = serde_json::from_value(
            payload.get("metadata").cloned().unwrap_or(Value::Null),
        )?;

        result.push(SearchHit {
            id: payload
                .get("entry_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            document: payload
                .get("document")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            metadata,
            score: hit.get("score").and_then(Value::as_f64).unwrap_or(0.0),
        });
    }
    Ok(result)
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn upsert(&self, entries: &[IndexedEntry]) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }

        let points = entries
            .iter()
            .map(|entry| {
                Ok(json!({
                    "id": point_id(&entry.id).to_string(),
                    "vector": self.embedder.embed(&entry.document),
                    "payload": {
                        "entry_id": entry.id,
                        "document": entry.document,
                        "file_type": entry.metadata.file_type,
                        "metadata": serde_json::to_value(&entry.metadata)?,
                    },
                }))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        let response = self
            .client
            .put(self.points_url("?wait=true")?)
            .json(&json!({ "points": points }))
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), IndexError> {
        let response = self
            .client
            .post(self.points_url("/delete?wait=true")?)
            .json(&json!({ "filter": document_filter(document_id) }))
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<SearchHit>, IndexError> {
        let response = self
            .client
            .post(self.points_url("/search")?)
            .json(&json!({
                "vector": self.embedder.embed(text),
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?;
        parse_hits(&check(response).await?)
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let response = self
            .client
            .post(self.points_url("/count")?)
            .json(&json!({ "exact": true }))
            .send()
            .await?;
        let body = check(response).await?;
        body.pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| IndexError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "count missing from response".to_string(),
            })
    }
}
