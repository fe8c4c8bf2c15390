//! In-process [`VectorIndex`] for tests and dry runs.
//!
//! Entries live in a `BTreeMap` behind a `RwLock`; queries rank every entry by
//! cosine similarity of character n-gram embeddings.

use crate::embeddings::{cosine_similarity, CharacterNgramEmbedder, Embedder};
use crate::error::IndexError;
use crate::models::{IndexedEntry, SearchHit};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

type Entries = BTreeMap<String, (IndexedEntry, Vec<f32>)>;

#[derive(Default)]
pub struct InMemoryIndex {
    entries: RwLock<Entries>,
    embedder: CharacterNgramEmbedder,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries ordered by id.
    pub fn entries(&self) -> Result<Vec<IndexedEntry>, IndexError> {
        Ok(self.read()?.values().map(|(entry, _)| entry.clone()).collect())
    }

    pub fn ids(&self) -> Result<Vec<String>, IndexError> {
        Ok(self.read()?.keys().cloned().collect())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Entries>, IndexError> {
        self.entries
            .read()
            .map_err(|_| IndexError::Request("in-memory index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Entries>, IndexError> {
        self.entries
            .write()
            .map_err(|_| IndexError::Request("in-memory index lock poisoned".to_string()))
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, entries: &[IndexedEntry]) -> Result<(), IndexError> {
        let mut stored = self.write()?;
        for entry in entries {
            let vector = self.embedder.embed(&entry.document);
            stored.insert(entry.id.clone(), (entry.clone(), vector));
        }
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), IndexError> {
        self.write()?
            .retain(|_, (entry, _)| entry.document_id() != document_id);
        Ok(())
    }

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<SearchHit>, IndexError> {
        let query = self.embedder.embed(text);
        let mut hits: Vec<SearchHit> = self
            .read()?
            .values()
            .map(|(entry, vector)| SearchHit {
                id: entry.id.clone(),
                document: entry.document.clone(),
                metadata: entry.metadata.clone(),
                score: cosine_similarity(&query, vector) as f64,
            })
            .collect();

        hits.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.id.cmp(&right.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.read()?.len())
    }
}
