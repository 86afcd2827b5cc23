//! Query-side retrieval: embed a query, rank stored vectors, build results.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::PipelineError;
use crate::embedding::ModelRegistry;
use crate::stores::{CollectionHandle, SimilarityMetric, VectorStore};

/// Default number of results per query.
pub const DEFAULT_TOP_K: usize = 5;

/// One ranked search hit. Produced fresh per query, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// 1-based rank, best hit first.
    pub rank: usize,
    pub chunk_id: String,
    /// The stored chunk text, verbatim.
    pub document_text: String,
    /// Metric-uniform similarity: higher is always better. Cosine and dot
    /// product report their raw score; Euclidean distance `d` is re-expressed
    /// as `1 / (1 + d)` so ranks keep a single direction.
    pub similarity_score: f32,
    pub metadata: serde_json::Value,
}

/// Embeds queries and ranks collection contents by a similarity metric.
///
/// The query should be embedded with the same model family that built the
/// collection. A mismatched model is tolerated (scores are still computed
/// when dimensions agree) but results are not meaningful — callers own that
/// caveat; nothing is silently corrected.
pub struct Retriever {
    registry: Arc<ModelRegistry>,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(registry: Arc<ModelRegistry>, store: Arc<dyn VectorStore>) -> Self {
        Self { registry, store }
    }

    /// Runs a query against one session's collection.
    ///
    /// Fails with [`PipelineError::EmptyIndex`] when the collection holds no
    /// vectors. Session existence is the caller's check; storage errors for
    /// unknown collections propagate as-is.
    pub async fn search(
        &self,
        handle: &CollectionHandle,
        query_text: &str,
        model_name: &str,
        top_k: usize,
        metric: SimilarityMetric,
    ) -> Result<Vec<SearchResult>, PipelineError> {
        let count = self.store.count(handle).await?;
        if count == 0 {
            return Err(PipelineError::EmptyIndex(handle.session_id().to_string()));
        }

        let provider = self.registry.get(model_name)?;
        let query = vec![query_text.to_string()];
        let mut vectors = provider.embed_batch(&query).await?;
        let query_vector = vectors.pop().ok_or_else(|| {
            PipelineError::EmbeddingQuality("provider returned no query vector".into())
        })?;

        let top_k = top_k.max(1);
        let hits = self
            .store
            .search(handle, &query_vector, top_k, metric)
            .await?;
        debug!(
            session = handle.session_id(),
            metric = metric.name(),
            hits = hits.len(),
            "query ranked"
        );

        Ok(hits
            .into_iter()
            .enumerate()
            .map(|(idx, hit)| {
                let similarity_score = match metric {
                    SimilarityMetric::Cosine | SimilarityMetric::DotProduct => hit.raw_score,
                    SimilarityMetric::Euclidean => 1.0 / (1.0 + hit.raw_score),
                };
                SearchResult {
                    rank: idx + 1,
                    chunk_id: hit.chunk_id,
                    document_text: hit.text,
                    similarity_score,
                    metadata: hit.metadata,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::Chunk;
    use crate::embedding::{EmbeddedChunk, EmbeddingGenerator};
    use crate::stores::FlatIndexStore;

    async fn seeded_store(texts: &[&str]) -> (Arc<ModelRegistry>, Arc<dyn VectorStore>, CollectionHandle) {
        let registry = Arc::new(ModelRegistry::with_default_models());
        let generator = EmbeddingGenerator::new(Arc::clone(&registry));

        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(idx, text)| Chunk {
                id: format!("chunk-{idx}"),
                text: (*text).to_string(),
                source_rows: vec![idx],
                method: "fixed_size".into(),
                sequence: idx,
            })
            .collect();
        let result = generator.embed(chunks, "hash-128", 32).await.unwrap();

        let store: Arc<dyn VectorStore> =
            Arc::new(FlatIndexStore::new(tempfile::tempdir().unwrap().keep()));
        let handle = store.create_collection("session").await.unwrap();
        store.add(&handle, &result.embedded_chunks).await.unwrap();
        (registry, store, handle)
    }

    #[tokio::test]
    async fn finds_the_verbatim_matching_chunk_first() {
        let (registry, store, handle) = seeded_store(&[
            "rust is a systems programming language",
            "bread baking requires patience and flour",
            "databases store structured records",
        ])
        .await;
        let retriever = Retriever::new(registry, store);

        let results = retriever
            .search(
                &handle,
                "rust is a systems programming language",
                "hash-128",
                2,
                SimilarityMetric::Cosine,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].rank, 1);
        assert_eq!(
            results[0].document_text,
            "rust is a systems programming language"
        );
        assert!(results[0].similarity_score > results[1].similarity_score);
    }

    #[tokio::test]
    async fn top_k_is_clamped_to_collection_size() {
        let (registry, store, handle) = seeded_store(&["one", "two"]).await;
        let retriever = Retriever::new(registry, store);
        let results = retriever
            .search(&handle, "one", "hash-128", 50, SimilarityMetric::Cosine)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn euclidean_similarity_descends_with_rank() {
        let (registry, store, handle) = seeded_store(&[
            "alpha beta gamma",
            "alpha beta delta",
            "unrelated text entirely",
            "alpha beta gamma",
        ])
        .await;
        let retriever = Retriever::new(registry, store);
        let results = retriever
            .search(
                &handle,
                "alpha beta gamma",
                "hash-128",
                3,
                SimilarityMetric::Euclidean,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        for pair in results.windows(2) {
            assert!(pair[0].similarity_score >= pair[1].similarity_score);
        }
        assert_eq!(results[0].document_text, "alpha beta gamma");
    }

    #[tokio::test]
    async fn empty_collection_is_an_empty_index_error() {
        let registry = Arc::new(ModelRegistry::with_default_models());
        let store: Arc<dyn VectorStore> =
            Arc::new(FlatIndexStore::new(tempfile::tempdir().unwrap().keep()));
        let handle = store.create_collection("empty").await.unwrap();
        let retriever = Retriever::new(registry, store);

        let err = retriever
            .search(&handle, "anything", "hash-128", 5, SimilarityMetric::Cosine)
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::EmptyIndex("empty".into()));
    }

    #[tokio::test]
    async fn unknown_model_propagates() {
        let (registry, store, handle) = seeded_store(&["text"]).await;
        let retriever = Retriever::new(registry, store);
        let err = retriever
            .search(&handle, "query", "missing-model", 5, SimilarityMetric::Cosine)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ModelUnavailable(_)));
    }
}
