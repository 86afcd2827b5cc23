//! Embedding providers and the process-wide model registry.
//!
//! Providers are shared read-only across sessions once loaded. The built-in
//! providers use deterministic token feature hashing, which keeps the
//! pipeline self-contained and reproducible; external model bindings plug in
//! through the same [`EmbeddingProvider`] trait.

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

use crate::error::PipelineError;

/// A model that turns chunk texts into fixed-length vectors.
///
/// Implementations must be deterministic per input text and immutable after
/// construction so they can be shared across concurrent sessions.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    fn model_name(&self) -> &str;

    /// Output vector length; every vector this provider returns has exactly
    /// this many components.
    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;
}

/// Deterministic feature-hashing embedder.
///
/// Each whitespace token (lowercased) and each adjacent token bigram is
/// hashed into one of `dimension` buckets with a hash-derived sign, and the
/// resulting vector is L2-normalized. Embeddings depend only on the text, so
/// batch boundaries cannot affect output.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    name: String,
    dimension: usize,
}

impl HashEmbeddingProvider {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension: dimension.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens: Vec<String> = text
            .split_whitespace()
            .map(|token| token.to_lowercase())
            .collect();

        for token in &tokens {
            self.accumulate(&mut vector, token);
        }
        for pair in tokens.windows(2) {
            self.accumulate(&mut vector, &format!("{} {}", pair[0], pair[1]));
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &str) {
        let mut hasher = FxHasher::default();
        feature.hash(&mut hasher);
        let hashed = hasher.finish();
        let bucket = (hashed % self.dimension as u64) as usize;
        let sign = if hashed & (1 << 63) == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

type ProviderFactory = Box<dyn Fn() -> Arc<dyn EmbeddingProvider> + Send + Sync>;

/// Lazily loads providers by name and caches them for the process lifetime.
pub struct ModelRegistry {
    factories: FxHashMap<String, ProviderFactory>,
    loaded: RwLock<FxHashMap<String, Arc<dyn EmbeddingProvider>>>,
}

impl ModelRegistry {
    /// Registry pre-wired with the built-in hashing models
    /// (`hash-128`, `hash-256`, `hash-512`).
    pub fn with_default_models() -> Self {
        let mut registry = Self {
            factories: FxHashMap::default(),
            loaded: RwLock::new(FxHashMap::default()),
        };
        for dimension in [128usize, 256, 512] {
            let name = format!("hash-{dimension}");
            registry.add_factory(name.clone(), move || {
                let provider: Arc<dyn EmbeddingProvider> =
                    Arc::new(HashEmbeddingProvider::new(name.clone(), dimension));
                provider
            });
        }
        registry
    }

    fn add_factory<F>(&mut self, name: String, factory: F)
    where
        F: Fn() -> Arc<dyn EmbeddingProvider> + Send + Sync + 'static,
    {
        self.factories.insert(name, Box::new(factory));
    }

    /// Registers an already-constructed provider under its model name.
    pub fn register(&self, provider: Arc<dyn EmbeddingProvider>) {
        self.loaded
            .write()
            .insert(provider.model_name().to_string(), provider);
    }

    /// Returns the cached provider, loading it on first use.
    pub fn get(&self, model_name: &str) -> Result<Arc<dyn EmbeddingProvider>, PipelineError> {
        if let Some(provider) = self.loaded.read().get(model_name) {
            return Ok(Arc::clone(provider));
        }

        let factory = self
            .factories
            .get(model_name)
            .ok_or_else(|| PipelineError::ModelUnavailable(model_name.to_string()))?;

        debug!(model = model_name, "loading embedding model");
        let provider = factory();
        self.loaded
            .write()
            .insert(model_name.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    /// Model names this registry can serve.
    pub fn available_models(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .keys()
            .chain(self.loaded.read().keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embeddings_are_deterministic_and_normalized() {
        let provider = HashEmbeddingProvider::new("hash-64", 64);
        let texts = vec!["alpha beta gamma".to_string(), "alpha beta gamma".to_string()];
        let vectors = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors[0], vectors[1]);
        let norm: f32 = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn different_texts_differ() {
        let provider = HashEmbeddingProvider::new("hash-64", 64);
        let vectors = provider
            .embed_batch(&["first text".to_string(), "second text".to_string()])
            .await
            .unwrap();
        assert_ne!(vectors[0], vectors[1]);
    }

    #[test]
    fn registry_serves_and_caches_known_models() {
        let registry = ModelRegistry::with_default_models();
        let first = registry.get("hash-256").unwrap();
        let second = registry.get("hash-256").unwrap();
        assert_eq!(first.dimension(), 256);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn unknown_model_is_unavailable() {
        let registry = ModelRegistry::with_default_models();
        let err = registry.get("bert-base").unwrap_err();
        assert_eq!(err, PipelineError::ModelUnavailable("bert-base".into()));
    }

    #[test]
    fn custom_providers_can_be_registered() {
        let registry = ModelRegistry::with_default_models();
        registry.register(Arc::new(HashEmbeddingProvider::new("custom-32", 32)));
        assert_eq!(registry.get("custom-32").unwrap().dimension(), 32);
        assert!(registry.available_models().contains(&"custom-32".to_string()));
    }
}
