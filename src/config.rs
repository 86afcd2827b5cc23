//! Session configuration tree.
//!
//! Every field carries a serde default so callers can supply only the options
//! they care about; unrecognized keys are ignored during deserialization.

use serde::{Deserialize, Serialize};

use crate::chunking::ChunkMethod;
use crate::embedding::DEFAULT_BATCH_SIZE;
use crate::error::PipelineError;
use crate::preprocess::PreprocessingConfig;
use crate::stores::{SimilarityMetric, StoreBackendKind};

/// Model used when the configuration does not name one.
pub const DEFAULT_MODEL: &str = "hash-256";

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Embedding stage options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingOptions {
    pub model_name: String,
    pub batch_size: usize,
}

impl Default for EmbeddingOptions {
    fn default() -> Self {
        Self {
            model_name: default_model(),
            batch_size: default_batch_size(),
        }
    }
}

/// Storage stage options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageOptions {
    pub backend: StoreBackendKind,
    pub similarity_metric: SimilarityMetric,
}

/// Complete per-session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub preprocessing: PreprocessingConfig,
    pub chunking: ChunkMethod,
    pub embedding: EmbeddingOptions,
    pub storage: StorageOptions,
}

impl PipelineConfig {
    /// Deserializes a configuration from JSON, applying defaults for missing
    /// keys and ignoring unknown ones.
    pub fn from_json(value: serde_json::Value) -> Result<Self, PipelineError> {
        serde_json::from_value(value)
            .map_err(|err| PipelineError::Validation(format!("invalid configuration: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::DEFAULT_CHUNK_SIZE;
    use serde_json::json;

    #[test]
    fn empty_object_uses_all_defaults() {
        let config = PipelineConfig::from_json(json!({})).unwrap();
        assert_eq!(
            config.chunking,
            ChunkMethod::FixedSize {
                chunk_size: DEFAULT_CHUNK_SIZE
            }
        );
        assert_eq!(config.embedding.model_name, DEFAULT_MODEL);
        assert_eq!(config.embedding.batch_size, 32);
        assert_eq!(config.storage.backend, StoreBackendKind::FlatIndex);
        assert_eq!(config.storage.similarity_metric, SimilarityMetric::Cosine);
    }

    #[test]
    fn partial_sections_fill_in_defaults() {
        let config = PipelineConfig::from_json(json!({
            "chunking": {"method": "semantic", "n_clusters": 3},
            "storage": {"backend": "document"},
        }))
        .unwrap();
        assert_eq!(config.chunking, ChunkMethod::Semantic { n_clusters: 3 });
        assert_eq!(config.storage.backend, StoreBackendKind::Document);
        assert_eq!(config.storage.similarity_metric, SimilarityMetric::Cosine);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = PipelineConfig::from_json(json!({
            "embedding": {"model_name": "hash-128", "telemetry": "on"},
            "future_section": {"x": 1},
        }))
        .unwrap();
        assert_eq!(config.embedding.model_name, "hash-128");
    }

    #[test]
    fn method_variants_deserialize_from_tag() {
        let config = PipelineConfig::from_json(json!({
            "chunking": {"method": "document_based", "key_column": "city"},
        }))
        .unwrap();
        assert_eq!(
            config.chunking,
            ChunkMethod::DocumentBased {
                key_column: "city".into()
            }
        );
    }
}
