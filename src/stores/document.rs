//! Embedded SQLite document store backend.
//!
//! One database file holds every collection; rows are keyed by
//! `(session_id, chunk_id)` so collections stay isolated per session and
//! upserts are idempotent per chunk id. SQLite commits synchronously on each
//! write, so the durability boundary is satisfied as soon as `add` returns;
//! `persist` only re-validates the collection.

use tokio_rusqlite::{Connection, OptionalExtension};

use async_trait::async_trait;
use std::path::Path;

use crate::embedding::EmbeddedChunk;
use crate::error::PipelineError;

use super::{
    CollectionHandle, ScoredHit, SimilarityMetric, StoredChunk, VectorStore, rank_hits,
};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS collections (
    session_id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE TABLE IF NOT EXISTS chunks (
    session_id TEXT NOT NULL,
    chunk_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    text TEXT NOT NULL,
    source_rows TEXT NOT NULL,
    method TEXT NOT NULL,
    model TEXT NOT NULL,
    vector TEXT NOT NULL,
    PRIMARY KEY (session_id, chunk_id)
);
CREATE INDEX IF NOT EXISTS idx_chunks_session ON chunks (session_id);
";

/// SQLite-backed document store. See the module docs for the data layout.
#[derive(Clone)]
pub struct DocumentStore {
    conn: Connection,
}

impl DocumentStore {
    /// Opens (or creates) the database file and applies the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        if let Some(parent) = path.as_ref().parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| PipelineError::Storage(err.to_string()))?;
        }
        let conn = Connection::open(path)
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA_SQL)
        })
        .await
        .map_err(|err| PipelineError::Storage(err.to_string()))?;
        Ok(Self { conn })
    }

    async fn collection_exists(&self, session_id: &str) -> Result<bool, PipelineError> {
        let session_id = session_id.to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT 1 FROM collections WHERE session_id = ?",
                    [&session_id],
                    |_| Ok(()),
                )
                .optional()
                .map(|row| row.is_some())
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))
    }

    async fn require_collection(&self, session_id: &str) -> Result<(), PipelineError> {
        if self.collection_exists(session_id).await? {
            Ok(())
        } else {
            Err(PipelineError::Storage(format!(
                "unknown collection '{session_id}'"
            )))
        }
    }

    async fn fetch_chunks(&self, session_id: &str) -> Result<Vec<StoredChunk>, PipelineError> {
        let session_id = session_id.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<StoredChunk>, tokio_rusqlite::rusqlite::Error> {
                let mut stmt = conn
                    .prepare(
                        "SELECT chunk_id, text, source_rows, method, sequence, model, vector \
                         FROM chunks WHERE session_id = ? ORDER BY sequence",
                    )?;

                let rows = stmt
                    .query_map([&session_id], |row| {
                        Ok(StoredChunk {
                            chunk_id: row.get(0)?,
                            text: row.get(1)?,
                            source_rows: row
                                .get::<_, String>(2)
                                .map(|s| serde_json::from_str(&s).unwrap_or_default())
                                .unwrap_or_default(),
                            method: row.get(3)?,
                            sequence: row.get::<_, i64>(4)? as usize,
                            model_name: row.get(5)?,
                            vector: row
                                .get::<_, String>(6)
                                .map(|s| serde_json::from_str(&s).unwrap_or_default())
                                .unwrap_or_default(),
                        })
                    })?;

                let mut chunks = Vec::new();
                for row in rows {
                    chunks.push(row?);
                }
                Ok(chunks)
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))
    }
}

#[async_trait]
impl VectorStore for DocumentStore {
    async fn create_collection(&self, session_id: &str) -> Result<CollectionHandle, PipelineError> {
        if self.collection_exists(session_id).await? {
            return Err(PipelineError::Storage(format!(
                "collection '{session_id}' already exists"
            )));
        }
        let owned = session_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO collections (session_id) VALUES (?)",
                    [&owned],
                )
                .map(|_| ())
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))?;
        Ok(CollectionHandle::new(session_id))
    }

    async fn add(
        &self,
        handle: &CollectionHandle,
        chunks: &[EmbeddedChunk],
    ) -> Result<(), PipelineError> {
        self.require_collection(handle.session_id()).await?;
        if chunks.is_empty() {
            return Ok(());
        }

        // Serialize JSON columns up front so the closure stays infallible
        // beyond SQLite itself.
        let session_id = handle.session_id().to_string();
        let mut rows = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let stored = StoredChunk::from(chunk);
            let source_rows = serde_json::to_string(&stored.source_rows)
                .map_err(|err| PipelineError::Storage(err.to_string()))?;
            let vector = serde_json::to_string(&stored.vector)
                .map_err(|err| PipelineError::Storage(err.to_string()))?;
            rows.push((stored, source_rows, vector));
        }

        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()?;
                {
                    let mut stmt = tx
                        .prepare(
                            "INSERT OR REPLACE INTO chunks \
                             (session_id, chunk_id, sequence, text, source_rows, method, model, vector) \
                             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                        )?;
                    for (stored, source_rows, vector) in &rows {
                        stmt.execute((
                            &session_id,
                            &stored.chunk_id,
                            stored.sequence as i64,
                            &stored.text,
                            source_rows,
                            &stored.method,
                            &stored.model_name,
                            vector,
                        ))?;
                    }
                }
                tx.commit()
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))
    }

    async fn search(
        &self,
        handle: &CollectionHandle,
        query: &[f32],
        top_k: usize,
        metric: SimilarityMetric,
    ) -> Result<Vec<ScoredHit>, PipelineError> {
        self.require_collection(handle.session_id()).await?;
        let chunks = self.fetch_chunks(handle.session_id()).await?;
        let scored = chunks
            .into_iter()
            .map(|chunk| {
                let score = metric.score(&chunk.vector, query);
                (chunk, score)
            })
            .collect();
        Ok(rank_hits(scored, metric, top_k))
    }

    async fn persist(&self, handle: &CollectionHandle) -> Result<(), PipelineError> {
        // Writes are committed transactionally in `add`; nothing further is
        // needed for durability.
        self.require_collection(handle.session_id()).await
    }

    async fn load(&self, handle: &CollectionHandle) -> Result<(), PipelineError> {
        self.require_collection(handle.session_id()).await
    }

    async fn delete_collection(&self, handle: &CollectionHandle) -> Result<(), PipelineError> {
        let session_id = handle.session_id().to_string();
        self.conn
            .call(move |conn| -> Result<(), tokio_rusqlite::rusqlite::Error> {
                conn.execute("DELETE FROM chunks WHERE session_id = ?", [&session_id])?;
                conn.execute(
                    "DELETE FROM collections WHERE session_id = ?",
                    [&session_id],
                )?;
                Ok(())
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))
    }

    async fn count(&self, handle: &CollectionHandle) -> Result<usize, PipelineError> {
        self.require_collection(handle.session_id()).await?;
        let session_id = handle.session_id().to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM chunks WHERE session_id = ?",
                    [&session_id],
                    |row| row.get::<_, i64>(0),
                )
                .map(|count| count as usize)
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))
    }

    async fn export(&self, handle: &CollectionHandle) -> Result<Vec<StoredChunk>, PipelineError> {
        self.require_collection(handle.session_id()).await?;
        self.fetch_chunks(handle.session_id()).await
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
                source_rows: vec![sequence, sequence + 1],
                method: "document_based".into(),
                sequence,
            },
            vector,
            model_name: "hash-128".into(),
        }
    }

    async fn open_store(dir: &tempfile::TempDir) -> DocumentStore {
        DocumentStore::open(dir.path().join("collections.db"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn add_is_idempotent_per_chunk_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
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
    async fn round_trips_text_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let handle = store.create_collection("s1").await.unwrap();
        store
            .add(&handle, &[embedded("a", 3, vec![0.5, 0.5])])
            .await
            .unwrap();

        let exported = store.export(&handle).await.unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].text, "text for a");
        assert_eq!(exported[0].source_rows, vec![3, 4]);
        assert_eq!(exported[0].sequence, 3);
        assert_eq!(exported[0].vector, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn survives_reopening_the_database() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_store(&dir).await;
            let handle = store.create_collection("s1").await.unwrap();
            store
                .add(&handle, &[embedded("a", 0, vec![1.0, 0.0])])
                .await
                .unwrap();
            store.persist(&handle).await.unwrap();
        }

        let reopened = open_store(&dir).await;
        let handle = CollectionHandle::new("s1");
        reopened.load(&handle).await.unwrap();
        assert_eq!(reopened.count(&handle).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn search_orders_by_metric() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let handle = store.create_collection("s1").await.unwrap();
        store
            .add(
                &handle,
                &[
                    embedded("near", 0, vec![1.0, 0.0]),
                    embedded("far", 1, vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search(&handle, &[1.0, 0.0], 5, SimilarityMetric::Euclidean)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "near");
        assert_eq!(hits[0].raw_score, 0.0);
    }

    #[tokio::test]
    async fn delete_collection_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let handle = store.create_collection("s1").await.unwrap();
        store
            .add(&handle, &[embedded("a", 0, vec![1.0])])
            .await
            .unwrap();
        store.delete_collection(&handle).await.unwrap();
        assert!(store.count(&handle).await.is_err());
        // The session id is free for reuse afterwards.
        store.create_collection("s1").await.unwrap();
    }

    #[tokio::test]
    async fn collections_are_isolated_by_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let first = store.create_collection("s1").await.unwrap();
        let second = store.create_collection("s2").await.unwrap();
        store
            .add(&first, &[embedded("a", 0, vec![1.0])])
            .await
            .unwrap();
        assert_eq!(store.count(&second).await.unwrap(), 0);
    }
}
