//! In-memory flat vector index with JSON snapshot persistence.
//!
//! Vectors live in one contiguous `Vec<f32>` per collection and queries scan
//! the whole slab, so there is no index build cost and scoring stays cache
//! friendly. Durability comes from an explicit [`persist`] snapshot per
//! collection.
//!
//! [`persist`]: crate::stores::VectorStore::persist

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use crate::embedding::EmbeddedChunk;
use crate::error::PipelineError;

use super::{CollectionHandle, ScoredHit, SimilarityMetric, StoredChunk, VectorStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    chunk_id: String,
    text: String,
    source_rows: Vec<usize>,
    method: String,
    sequence: usize,
    model_name: String,
}

#[derive(Debug, Default)]
struct FlatCollection {
    /// Vector width; 0 until the first chunk arrives.
    dimension: usize,
    /// All vectors back to back, `dimension` floats per slot.
    vectors: Vec<f32>,
    entries: Vec<EntryMeta>,
    /// chunk_id -> slot.
    slots: FxHashMap<String, usize>,
}

impl FlatCollection {
    fn vector(&self, slot: usize) -> &[f32] {
        let start = slot * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    fn upsert(&mut self, chunk: &EmbeddedChunk) -> Result<(), PipelineError> {
        if self.dimension == 0 {
            self.dimension = chunk.vector.len();
        }
        if chunk.vector.len() != self.dimension {
            return Err(PipelineError::Storage(format!(
                "vector dimension {} does not match collection dimension {}",
                chunk.vector.len(),
                self.dimension
            )));
        }

        let meta = EntryMeta {
            chunk_id: chunk.chunk.id.clone(),
            text: chunk.chunk.text.clone(),
            source_rows: chunk.chunk.source_rows.clone(),
            method: chunk.chunk.method.clone(),
            sequence: chunk.chunk.sequence,
            model_name: chunk.model_name.clone(),
        };

        match self.slots.get(&chunk.chunk.id) {
            Some(&slot) => {
                let start = slot * self.dimension;
                self.vectors[start..start + self.dimension].copy_from_slice(&chunk.vector);
                self.entries[slot] = meta;
            }
            None => {
                let slot = self.entries.len();
                self.vectors.extend_from_slice(&chunk.vector);
                self.entries.push(meta);
                self.slots.insert(chunk.chunk.id.clone(), slot);
            }
        }
        Ok(())
    }

    fn stored_chunk(&self, slot: usize) -> StoredChunk {
        let entry = &self.entries[slot];
        StoredChunk {
            chunk_id: entry.chunk_id.clone(),
            text: entry.text.clone(),
            source_rows: entry.source_rows.clone(),
            method: entry.method.clone(),
            sequence: entry.sequence,
            model_name: entry.model_name.clone(),
            vector: self.vector(slot).to_vec(),
        }
    }
}

/// On-disk snapshot format, one file per collection.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    dimension: usize,
    chunks: Vec<StoredChunk>,
}

/// Flat-index backend. See the module docs for the storage layout.
pub struct FlatIndexStore {
    snapshot_dir: PathBuf,
    collections: RwLock<FxHashMap<String, FlatCollection>>,
}

impl FlatIndexStore {
    pub fn new(snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_dir: snapshot_dir.into(),
            collections: RwLock::new(FxHashMap::default()),
        }
    }

    fn snapshot_path(&self, session_id: &str) -> PathBuf {
        self.snapshot_dir.join(format!("{session_id}.json"))
    }

    fn with_collection<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&FlatCollection) -> T,
    ) -> Result<T, PipelineError> {
        let collections = self.collections.read();
        let collection = collections
            .get(session_id)
            .ok_or_else(|| PipelineError::Storage(format!("unknown collection '{session_id}'")))?;
        Ok(f(collection))
    }
}

#[async_trait]
impl VectorStore for FlatIndexStore {
    async fn create_collection(&self, session_id: &str) -> Result<CollectionHandle, PipelineError> {
        let mut collections = self.collections.write();
        if collections.contains_key(session_id) {
            return Err(PipelineError::Storage(format!(
                "collection '{session_id}' already exists"
            )));
        }
        collections.insert(session_id.to_string(), FlatCollection::default());
        Ok(CollectionHandle::new(session_id))
    }

    async fn add(
        &self,
        handle: &CollectionHandle,
        chunks: &[EmbeddedChunk],
    ) -> Result<(), PipelineError> {
        let mut collections = self.collections.write();
        let collection = collections.get_mut(handle.session_id()).ok_or_else(|| {
            PipelineError::Storage(format!("unknown collection '{}'", handle.session_id()))
        })?;
        for chunk in chunks {
            collection.upsert(chunk)?;
        }
        Ok(())
    }

    async fn search(
        &self,
        handle: &CollectionHandle,
        query: &[f32],
        top_k: usize,
        metric: SimilarityMetric,
    ) -> Result<Vec<ScoredHit>, PipelineError> {
        self.with_collection(handle.session_id(), |collection| {
            let mut scored: Vec<(usize, f32)> = (0..collection.entries.len())
                .map(|slot| (slot, metric.score(collection.vector(slot), query)))
                .collect();
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
                .map(|(slot, raw_score)| {
                    let chunk = collection.stored_chunk(slot);
                    ScoredHit {
                        chunk_id: chunk.chunk_id.clone(),
                        text: chunk.text.clone(),
                        metadata: chunk.metadata(),
                        raw_score,
                    }
                })
                .collect()
        })
    }

    async fn persist(&self, handle: &CollectionHandle) -> Result<(), PipelineError> {
        let snapshot = self.with_collection(handle.session_id(), |collection| Snapshot {
            dimension: collection.dimension,
            chunks: (0..collection.entries.len())
                .map(|slot| collection.stored_chunk(slot))
                .collect(),
        })?;

        let payload = serde_json::to_vec(&snapshot)
            .map_err(|err| PipelineError::Storage(format!("snapshot encode failed: {err}")))?;

        tokio::fs::create_dir_all(&self.snapshot_dir)
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))?;
        let path = self.snapshot_path(handle.session_id());
        tokio::fs::write(&path, payload)
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))?;
        debug!(path = %path.display(), chunks = snapshot.chunks.len(), "persisted flat snapshot");
        Ok(())
    }

    async fn load(&self, handle: &CollectionHandle) -> Result<(), PipelineError> {
        let path = self.snapshot_path(handle.session_id());
        let payload = tokio::fs::read(&path).await.map_err(|err| {
            PipelineError::Storage(format!("snapshot '{}' unreadable: {err}", path.display()))
        })?;
        let snapshot: Snapshot = serde_json::from_slice(&payload)
            .map_err(|err| PipelineError::Storage(format!("snapshot decode failed: {err}")))?;

        let mut collection = FlatCollection {
            dimension: snapshot.dimension,
            ..Default::default()
        };
        for chunk in &snapshot.chunks {
            collection.slots.insert(chunk.chunk_id.clone(), collection.entries.len());
            collection.vectors.extend_from_slice(&chunk.vector);
            collection.entries.push(EntryMeta {
                chunk_id: chunk.chunk_id.clone(),
                text: chunk.text.clone(),
                source_rows: chunk.source_rows.clone(),
                method: chunk.method.clone(),
                sequence: chunk.sequence,
                model_name: chunk.model_name.clone(),
            });
        }

        self.collections
            .write()
            .insert(handle.session_id().to_string(), collection);
        Ok(())
    }

    async fn delete_collection(&self, handle: &CollectionHandle) -> Result<(), PipelineError> {
        self.collections.write().remove(handle.session_id());
        match tokio::fs::remove_file(self.snapshot_path(handle.session_id())).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PipelineError::Storage(err.to_string())),
        }
    }

    async fn count(&self, handle: &CollectionHandle) -> Result<usize, PipelineError> {
        self.with_collection(handle.session_id(), |collection| collection.entries.len())
    }

    async fn export(&self, handle: &CollectionHandle) -> Result<Vec<StoredChunk>, PipelineError> {
        self.with_collection(handle.session_id(), |collection| {
            let mut chunks: Vec<StoredChunk> = (0..collection.entries.len())
                .map(|slot| collection.stored_chunk(slot))
                .collect();
            chunks.sort_by_key(|chunk| chunk.sequence);
            chunks
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::Chunk;

    fn embedded(id: &str, sequence: usize, vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk {
                id: id.to_string(),
                text: format!("text for {id}"),
                source_rows: vec![sequence],
                method: "fixed_size".into(),
                sequence,
            },
            vector,
            model_name: "hash-128".into(),
        }
    }

    fn store() -> FlatIndexStore {
        FlatIndexStore::new(tempfile::tempdir().unwrap().keep())
    }

    #[tokio::test]
    async fn add_is_idempotent_per_chunk_id() {
        let store = store();
        let handle = store.create_collection("s1").await.unwrap();
        let chunks = vec![
            embedded("a", 0, vec![1.0, 0.0]),
            embedded("b", 1, vec![0.0, 1.0]),
        ];
        store.add(&handle, &chunks).await.unwrap();
        store.add(&handle, &chunks).await.unwrap();
        assert_eq!(store.count(&handle).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn duplicate_id_overwrites() {
        let store = store();
        let handle = store.create_collection("s1").await.unwrap();
        store
            .add(&handle, &[embedded("a", 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .add(&handle, &[embedded("a", 0, vec![0.0, 1.0])])
            .await
            .unwrap();
        let exported = store.export(&handle).await.unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].vector, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn search_clamps_top_k_and_orders_best_first() {
        let store = store();
        let handle = store.create_collection("s1").await.unwrap();
        store
            .add(
                &handle,
                &[
                    embedded("near", 0, vec![1.0, 0.0]),
                    embedded("mid", 1, vec![0.7, 0.7]),
                    embedded("far", 2, vec![-1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search(&handle, &[1.0, 0.0], 10, SimilarityMetric::Cosine)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk_id, "near");
        assert_eq!(hits[2].chunk_id, "far");

        let nearest = store
            .search(&handle, &[1.0, 0.0], 2, SimilarityMetric::Euclidean)
            .await
            .unwrap();
        assert_eq!(nearest.len(), 2);
        assert_eq!(nearest[0].chunk_id, "near");
        assert!(nearest[0].raw_score <= nearest[1].raw_score);
    }

    #[tokio::test]
    async fn persist_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![
            embedded("a", 0, vec![1.0, 0.0]),
            embedded("b", 1, vec![0.0, 1.0]),
        ];

        let writer = FlatIndexStore::new(dir.path());
        let handle = writer.create_collection("s1").await.unwrap();
        writer.add(&handle, &chunks).await.unwrap();
        writer.persist(&handle).await.unwrap();

        // Fresh store instance simulating a process restart.
        let reader = FlatIndexStore::new(dir.path());
        let handle = CollectionHandle::new("s1");
        reader.load(&handle).await.unwrap();
        assert_eq!(reader.count(&handle).await.unwrap(), 2);
        let hits = reader
            .search(&handle, &[1.0, 0.0], 1, SimilarityMetric::Cosine)
            .await
            .unwrap();
        assert_eq!(hits[0].chunk_id, "a");
        assert_eq!(hits[0].text, "text for a");
    }

    #[tokio::test]
    async fn delete_releases_memory_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlatIndexStore::new(dir.path());
        let handle = store.create_collection("s1").await.unwrap();
        store
            .add(&handle, &[embedded("a", 0, vec![1.0])])
            .await
            .unwrap();
        store.persist(&handle).await.unwrap();

        store.delete_collection(&handle).await.unwrap();
        assert!(store.count(&handle).await.is_err());
        assert!(!dir.path().join("s1.json").exists());
    }

    #[tokio::test]
    async fn dimension_mismatch_is_storage_error() {
        let store = store();
        let handle = store.create_collection("s1").await.unwrap();
        store
            .add(&handle, &[embedded("a", 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        let err = store
            .add(&handle, &[embedded("b", 1, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = store();
        store.create_collection("s1").await.unwrap();
        assert!(store.create_collection("s1").await.is_err());
    }
}
