//! Vector storage: one [`VectorStore`] trait, two interchangeable backends.
//!
//! Backends are selected through configuration and constructed behind
//! [`build_store`]; callers never name a concrete backend type. Collections
//! are keyed and isolated by session id, owned exclusively by the session
//! that created them, and follow a single-writer/multi-reader discipline.

pub mod document;
pub mod flat;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::embedding::EmbeddedChunk;
use crate::error::PipelineError;

pub use document::DocumentStore;
pub use flat::FlatIndexStore;

/// Similarity metric applied when scoring stored vectors against a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Cosine similarity in [-1, 1]; equals the inner product on normalized
    /// vectors. Higher is better.
    #[default]
    Cosine,
    /// Raw inner product. Higher is better.
    DotProduct,
    /// Raw L2 distance. Lower is better, so result ordering inverts.
    Euclidean,
}

impl SimilarityMetric {
    pub fn name(&self) -> &'static str {
        match self {
            SimilarityMetric::Cosine => "cosine",
            SimilarityMetric::DotProduct => "dot_product",
            SimilarityMetric::Euclidean => "euclidean",
        }
    }

    /// Whether larger raw scores rank first.
    pub fn higher_is_better(&self) -> bool {
        !matches!(self, SimilarityMetric::Euclidean)
    }

    /// Raw score between a stored vector and the query.
    pub fn score(&self, stored: &[f32], query: &[f32]) -> f32 {
        match self {
            SimilarityMetric::Cosine => {
                let dot = dot(stored, query);
                let norms = norm(stored) * norm(query);
                if norms > 0.0 { dot / norms } else { 0.0 }
            }
            SimilarityMetric::DotProduct => dot(stored, query),
            SimilarityMetric::Euclidean => stored
                .iter()
                .zip(query)
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f32>()
                .sqrt(),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

/// Which backend a session stores its vectors in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendKind {
    /// Embedded SQLite document store.
    Document,
    /// In-memory flat index with snapshot persistence.
    #[default]
    FlatIndex,
}

/// Opaque reference to one session's collection inside a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    session_id: String,
}

impl CollectionHandle {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Backend-agnostic persisted form of an embedded chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub text: String,
    pub source_rows: Vec<usize>,
    pub method: String,
    pub sequence: usize,
    pub model_name: String,
    pub vector: Vec<f32>,
}

impl StoredChunk {
    /// Metadata surfaced on search results.
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "source_rows": self.source_rows,
            "method": self.method,
            "sequence": self.sequence,
            "model_name": self.model_name,
        })
    }
}

impl From<&EmbeddedChunk> for StoredChunk {
    fn from(embedded: &EmbeddedChunk) -> Self {
        StoredChunk {
            chunk_id: embedded.chunk.id.clone(),
            text: embedded.chunk.text.clone(),
            source_rows: embedded.chunk.source_rows.clone(),
            method: embedded.chunk.method.clone(),
            sequence: embedded.chunk.sequence,
            model_name: embedded.model_name.clone(),
            vector: embedded.vector.clone(),
        }
    }
}

/// One scored search hit, ordered best-first by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredHit {
    pub chunk_id: String,
    pub text: String,
    pub metadata: serde_json::Value,
    pub raw_score: f32,
}

/// Persistence and nearest-neighbor interface implemented by both backends.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Creates an empty collection owned by `session_id`. Fails if the
    /// collection already exists — collections have exactly one owner.
    async fn create_collection(&self, session_id: &str) -> Result<CollectionHandle, PipelineError>;

    /// Upserts chunks into the collection. Idempotent per chunk id: a
    /// duplicate id overwrites the stored record instead of growing the
    /// collection.
    async fn add(
        &self,
        handle: &CollectionHandle,
        chunks: &[EmbeddedChunk],
    ) -> Result<(), PipelineError>;

    /// Scores every stored vector against `query` and returns the best
    /// `top_k` hits (clamped to collection size), ordered best-first for
    /// `metric`.
    async fn search(
        &self,
        handle: &CollectionHandle,
        query: &[f32],
        top_k: usize,
        metric: SimilarityMetric,
    ) -> Result<Vec<ScoredHit>, PipelineError>;

    /// Durability boundary: after this returns, the collection survives a
    /// process restart.
    async fn persist(&self, handle: &CollectionHandle) -> Result<(), PipelineError>;

    /// Restores a previously persisted collection.
    async fn load(&self, handle: &CollectionHandle) -> Result<(), PipelineError>;

    /// Releases all vectors, text, and metadata for the collection.
    async fn delete_collection(&self, handle: &CollectionHandle) -> Result<(), PipelineError>;

    /// Number of chunks currently stored.
    async fn count(&self, handle: &CollectionHandle) -> Result<usize, PipelineError>;

    /// Full contents in sequence order, for export artifacts.
    async fn export(&self, handle: &CollectionHandle) -> Result<Vec<StoredChunk>, PipelineError>;
}

/// Constructs the configured backend rooted at `data_dir`.
pub async fn build_store(
    kind: StoreBackendKind,
    data_dir: &Path,
) -> Result<Arc<dyn VectorStore>, PipelineError> {
    match kind {
        StoreBackendKind::Document => {
            let store = DocumentStore::open(data_dir.join("collections.db")).await?;
            Ok(Arc::new(store))
        }
        StoreBackendKind::FlatIndex => Ok(Arc::new(FlatIndexStore::new(data_dir.join("flat")))),
    }
}

/// Shared ranking: sorts scored chunks best-first for `metric` and keeps the
/// top `top_k`.
pub(crate) fn rank_hits(
    mut scored: Vec<(StoredChunk, f32)>,
    metric: SimilarityMetric,
    top_k: usize,
) -> Vec<ScoredHit> {
    scored.sort_by(|a, b| {
        let ordering = a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal);
        if metric.higher_is_better() {
            ordering.reverse()
        } else {
            ordering
        }
    });
    scored
        .into_iter()
        .take(top_k)
        .map(|(chunk, raw_score)| ScoredHit {
            chunk_id: chunk.chunk_id.clone(),
            text: chunk.text.clone(),
            metadata: chunk.metadata(),
            raw_score,
        })
        .collect()
}
