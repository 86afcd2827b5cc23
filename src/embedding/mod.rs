//! Embedding generation: batched vector computation with quality validation.
//!
//! Chunk texts are processed in batches so peak memory stays bounded, and
//! batches are dispatched to a semaphore-capped worker pool. Results are
//! reassembled in submission order before they reach storage, so batch size
//! and scheduling never affect output.

pub mod provider;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::chunking::Chunk;
use crate::error::PipelineError;

pub use provider::{EmbeddingProvider, HashEmbeddingProvider, ModelRegistry};

/// Default number of chunk texts per embedding batch.
pub const DEFAULT_BATCH_SIZE: usize = 32;
/// Default cap on concurrently running embedding batches.
pub const DEFAULT_WORKER_PERMITS: usize = 4;

/// A chunk paired with its embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub model_name: String,
}

/// All embedded chunks for one run plus the shared vector dimension.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub embedded_chunks: Vec<EmbeddedChunk>,
    pub dimension: usize,
}

/// Turns chunks into [`EmbeddedChunk`]s via a registered provider.
pub struct EmbeddingGenerator {
    registry: Arc<ModelRegistry>,
    worker_permits: usize,
}

impl EmbeddingGenerator {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            worker_permits: DEFAULT_WORKER_PERMITS,
        }
    }

    /// Caps how many batches may run concurrently.
    pub fn with_worker_permits(mut self, permits: usize) -> Self {
        self.worker_permits = permits.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Embeds `chunks` with the named model in batches of `batch_size`.
    ///
    /// Fails with [`PipelineError::ModelUnavailable`] for unknown models and
    /// [`PipelineError::EmbeddingQuality`] when a batch yields non-finite
    /// values, an all-zero vector, or a drifting dimension.
    pub async fn embed(
        &self,
        chunks: Vec<Chunk>,
        model_name: &str,
        batch_size: usize,
    ) -> Result<EmbeddingResult, PipelineError> {
        let provider = self.registry.get(model_name)?;
        let dimension = provider.dimension();
        if chunks.is_empty() {
            return Ok(EmbeddingResult {
                embedded_chunks: Vec::new(),
                dimension,
            });
        }

        let batch_size = batch_size.max(1);
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let batches: Vec<Vec<String>> = texts
            .chunks(batch_size)
            .map(|batch| batch.to_vec())
            .collect();
        debug!(
            model = model_name,
            chunks = chunks.len(),
            batches = batches.len(),
            batch_size,
            "dispatching embedding batches"
        );

        let semaphore = Arc::new(Semaphore::new(self.worker_permits));
        let mut handles = Vec::with_capacity(batches.len());
        for batch in batches {
            let provider = Arc::clone(&provider);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| PipelineError::EmbeddingQuality("worker pool closed".into()))?;
                provider.embed_batch(&batch).await
            }));
        }

        // Await in submission order so vectors line up with chunk sequence.
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        for (batch_index, handle) in handles.into_iter().enumerate() {
            let batch_vectors = handle.await.map_err(|err| {
                PipelineError::EmbeddingQuality(format!("embedding worker failed: {err}"))
            })??;
            validate_batch(&batch_vectors, dimension, batch_index)?;
            vectors.extend(batch_vectors);
        }

        if vectors.len() != chunks.len() {
            return Err(PipelineError::EmbeddingQuality(format!(
                "provider returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let embedded_chunks = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddedChunk {
                chunk,
                vector,
                model_name: model_name.to_string(),
            })
            .collect();

        Ok(EmbeddingResult {
            embedded_chunks,
            dimension,
        })
    }
}

/// Rejects batches with the wrong dimension, non-finite values, or all-zero
/// vectors.
fn validate_batch(
    vectors: &[Vec<f32>],
    dimension: usize,
    batch_index: usize,
) -> Result<(), PipelineError> {
    for vector in vectors {
        if vector.len() != dimension {
            return Err(PipelineError::EmbeddingQuality(format!(
                "batch {batch_index} produced dimension {} instead of {dimension}",
                vector.len()
            )));
        }
        if vector.iter().any(|value| !value.is_finite()) {
            return Err(PipelineError::EmbeddingQuality(format!(
                "batch {batch_index} produced non-finite values"
            )));
        }
        if vector.iter().all(|value| *value == 0.0) {
            return Err(PipelineError::EmbeddingQuality(format!(
                "batch {batch_index} produced an all-zero vector"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| Chunk {
                id: format!("chunk-{i}"),
                text: format!("row {i} value {}", i * 7),
                source_rows: vec![i],
                method: "fixed_size".into(),
                sequence: i,
            })
            .collect()
    }

    #[tokio::test]
    async fn batch_size_does_not_affect_output() {
        let generator = EmbeddingGenerator::new(Arc::new(ModelRegistry::with_default_models()));

        let small = generator.embed(chunks(5), "hash-128", 2).await.unwrap();
        let large = generator.embed(chunks(5), "hash-128", 5).await.unwrap();

        assert_eq!(small.embedded_chunks.len(), 5);
        assert_eq!(small.dimension, 128);
        for (a, b) in small.embedded_chunks.iter().zip(&large.embedded_chunks) {
            assert_eq!(a.vector, b.vector);
        }
    }

    #[tokio::test]
    async fn preserves_chunk_order() {
        let generator = EmbeddingGenerator::new(Arc::new(ModelRegistry::with_default_models()))
            .with_worker_permits(2);
        let result = generator.embed(chunks(20), "hash-128", 3).await.unwrap();
        let sequences: Vec<usize> = result
            .embedded_chunks
            .iter()
            .map(|e| e.chunk.sequence)
            .collect();
        assert_eq!(sequences, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn unknown_model_fails() {
        let generator = EmbeddingGenerator::new(Arc::new(ModelRegistry::with_default_models()));
        let err = generator.embed(chunks(1), "nope", 32).await.unwrap_err();
        assert!(matches!(err, PipelineError::ModelUnavailable(_)));
    }

    #[tokio::test]
    async fn empty_input_reports_model_dimension() {
        let generator = EmbeddingGenerator::new(Arc::new(ModelRegistry::with_default_models()));
        let result = generator.embed(Vec::new(), "hash-256", 32).await.unwrap();
        assert!(result.embedded_chunks.is_empty());
        assert_eq!(result.dimension, 256);
    }

    #[derive(Debug)]
    struct BrokenProvider;

    #[async_trait]
    impl EmbeddingProvider for BrokenProvider {
        fn model_name(&self) -> &str {
            "broken"
        }

        fn dimension(&self) -> usize {
            4
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
            Ok(texts.iter().map(|_| vec![0.0; 4]).collect())
        }
    }

    #[tokio::test]
    async fn all_zero_vectors_are_rejected() {
        let registry = Arc::new(ModelRegistry::with_default_models());
        registry.register(Arc::new(BrokenProvider));
        let generator = EmbeddingGenerator::new(registry);
        let err = generator.embed(chunks(2), "broken", 32).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmbeddingQuality(_)));
    }

    #[derive(Debug)]
    struct NanProvider;

    #[async_trait]
    impl EmbeddingProvider for NanProvider {
        fn model_name(&self) -> &str {
            "nan"
        }

        fn dimension(&self) -> usize {
            4
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
            Ok(texts.iter().map(|_| vec![f32::NAN; 4]).collect())
        }
    }

    #[tokio::test]
    async fn non_finite_vectors_are_rejected() {
        let registry = Arc::new(ModelRegistry::with_default_models());
        registry.register(Arc::new(NanProvider));
        let generator = EmbeddingGenerator::new(registry);
        let err = generator.embed(chunks(2), "nan", 32).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmbeddingQuality(_)));
    }
}
