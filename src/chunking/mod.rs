//! Chunking engine: splits a cleaned dataset into text segments using one of
//! four interchangeable strategies.
//!
//! Strategy selection is a closed enum dispatched by exhaustive match, so a
//! new method is a compile-time-checked addition. The engine is the only
//! pipeline stage with an automatic fallback: any internal strategy failure
//! degrades to fixed-size chunking with the default size and flags the result.

pub mod document;
pub mod fixed;
pub mod recursive;
pub mod semantic;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::dataset::Dataset;
use crate::error::PipelineError;

/// Default number of rows per fixed-size chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 10;
/// Default token budget for the recursive strategy.
pub const DEFAULT_TOKEN_BUDGET: usize = 512;
/// Default cluster target for the semantic strategy.
pub const DEFAULT_CLUSTERS: usize = 8;

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_token_budget() -> usize {
    DEFAULT_TOKEN_BUDGET
}

fn default_clusters() -> usize {
    DEFAULT_CLUSTERS
}

/// Chunking strategy and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ChunkMethod {
    /// Consecutive groups of `chunk_size` rows; the last group may be smaller.
    FixedSize {
        #[serde(default = "default_chunk_size")]
        chunk_size: usize,
    },
    /// Fixed groups recursively halved until each fits the token budget or
    /// reaches a single row.
    Recursive {
        #[serde(default = "default_chunk_size")]
        chunk_size: usize,
        #[serde(default = "default_token_budget")]
        token_budget: usize,
    },
    /// K-means over per-row feature vectors; one chunk per non-empty cluster.
    Semantic {
        #[serde(default = "default_clusters")]
        n_clusters: usize,
    },
    /// One chunk per distinct value of `key_column`; null keys pool into a
    /// trailing "unassigned" chunk.
    DocumentBased { key_column: String },
}

impl Default for ChunkMethod {
    fn default() -> Self {
        ChunkMethod::FixedSize {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkMethod {
    pub fn name(&self) -> &'static str {
        match self {
            ChunkMethod::FixedSize { .. } => "fixed_size",
            ChunkMethod::Recursive { .. } => "recursive",
            ChunkMethod::Semantic { .. } => "semantic",
            ChunkMethod::DocumentBased { .. } => "document_based",
        }
    }
}

/// One text segment derived from a group of dataset rows.
///
/// `text` is deterministically derived from `source_rows` via
/// [`Dataset::row_text`], and `sequence` preserves chunk ordering end-to-end
/// through embedding and storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub source_rows: Vec<usize>,
    pub method: String,
    pub sequence: usize,
}

/// Distribution statistics over the produced chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkQualityMetrics {
    pub chunk_count: usize,
    /// Mean chunk size in rows.
    pub mean_chunk_size: f64,
    /// Population variance of chunk sizes in rows.
    pub size_variance: f64,
    /// Cluster cohesion in (0, 1], semantic strategy only.
    pub cohesion: Option<f64>,
    /// Set when the engine fell back to fixed-size chunking.
    pub degraded: bool,
}

/// Chunks plus their quality metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingResult {
    pub chunks: Vec<Chunk>,
    pub metrics: ChunkQualityMetrics,
}

/// Splits datasets into chunks, falling back to fixed-size on failure.
#[derive(Debug, Clone)]
pub struct ChunkingEngine {
    fallback_chunk_size: usize,
}

impl Default for ChunkingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkingEngine {
    pub fn new() -> Self {
        Self {
            fallback_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Overrides the chunk size used by the degraded fallback.
    pub fn with_fallback_chunk_size(mut self, chunk_size: usize) -> Self {
        self.fallback_chunk_size = chunk_size.max(1);
        self
    }

    /// Runs the selected strategy. Strategy failures are absorbed: the engine
    /// re-chunks with the fixed-size default and marks the result degraded.
    pub fn chunk(&self, dataset: &Dataset, method: &ChunkMethod) -> ChunkingResult {
        match self.try_chunk(dataset, method) {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    method = method.name(),
                    error = %err,
                    "chunking strategy failed, falling back to fixed-size"
                );
                let groups = fixed::partition(dataset.row_count(), self.fallback_chunk_size);
                let chunks = build_chunks(dataset, &groups, "fixed_size");
                let mut metrics = quality_metrics(&groups, None);
                metrics.degraded = true;
                ChunkingResult { chunks, metrics }
            }
        }
    }

    fn try_chunk(
        &self,
        dataset: &Dataset,
        method: &ChunkMethod,
    ) -> Result<ChunkingResult, PipelineError> {
        let (groups, cohesion) = match method {
            ChunkMethod::FixedSize { chunk_size } => {
                let size = validated_size(*chunk_size)?;
                (fixed::partition(dataset.row_count(), size), None)
            }
            ChunkMethod::Recursive {
                chunk_size,
                token_budget,
            } => {
                let size = validated_size(*chunk_size)?;
                if *token_budget == 0 {
                    return Err(PipelineError::Chunking(
                        "token_budget must be at least 1".into(),
                    ));
                }
                (recursive::partition(dataset, size, *token_budget), None)
            }
            ChunkMethod::Semantic { n_clusters } => {
                let (groups, cohesion) = semantic::partition(dataset, *n_clusters);
                (groups, Some(cohesion))
            }
            ChunkMethod::DocumentBased { key_column } => {
                (document::partition(dataset, key_column)?, None)
            }
        };

        let chunks = build_chunks(dataset, &groups, method.name());
        let metrics = quality_metrics(&groups, cohesion);
        Ok(ChunkingResult { chunks, metrics })
    }
}

fn validated_size(chunk_size: usize) -> Result<usize, PipelineError> {
    if chunk_size == 0 {
        return Err(PipelineError::Chunking(
            "chunk_size must be at least 1".into(),
        ));
    }
    Ok(chunk_size)
}

/// Materializes chunks from row-index groups, assigning ids and sequence
/// numbers in group order.
fn build_chunks(dataset: &Dataset, groups: &[Vec<usize>], method: &str) -> Vec<Chunk> {
    groups
        .iter()
        .enumerate()
        .map(|(sequence, rows)| {
            let text = rows
                .iter()
                .map(|&row| dataset.row_text(row))
                .collect::<Vec<_>>()
                .join("\n");
            Chunk {
                id: Uuid::new_v4().to_string(),
                text,
                source_rows: rows.clone(),
                method: method.to_string(),
                sequence,
            }
        })
        .collect()
}

fn quality_metrics(groups: &[Vec<usize>], cohesion: Option<f64>) -> ChunkQualityMetrics {
    let chunk_count = groups.len();
    if chunk_count == 0 {
        return ChunkQualityMetrics {
            chunk_count: 0,
            mean_chunk_size: 0.0,
            size_variance: 0.0,
            cohesion,
            degraded: false,
        };
    }

    let sizes: Vec<f64> = groups.iter().map(|g| g.len() as f64).collect();
    let mean = sizes.iter().sum::<f64>() / chunk_count as f64;
    let variance = sizes.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / chunk_count as f64;

    ChunkQualityMetrics {
        chunk_count,
        mean_chunk_size: mean,
        size_variance: variance,
        cohesion,
        degraded: false,
    }
}
