//! Export record shapes for completed sessions.
//!
//! The download collaborator owns on-disk formats; the core only guarantees
//! these two record shapes, generated from a session's stored chunks.

use serde::{Deserialize, Serialize};

use crate::stores::StoredChunk;

/// One row of the tabular chunk export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkExportRow {
    pub chunk_id: String,
    pub text: String,
    pub source_rows: Vec<usize>,
    pub method: String,
}

/// One record of the structured embedding export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingExportRecord {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub model_name: String,
    pub dimension: usize,
}

/// Maps stored chunks onto chunk export rows, keeping sequence order.
pub fn chunk_rows(stored: &[StoredChunk]) -> Vec<ChunkExportRow> {
    stored
        .iter()
        .map(|chunk| ChunkExportRow {
            chunk_id: chunk.chunk_id.clone(),
            text: chunk.text.clone(),
            source_rows: chunk.source_rows.clone(),
            method: chunk.method.clone(),
        })
        .collect()
}

/// Maps stored chunks onto embedding export records, keeping sequence order.
pub fn embedding_records(stored: &[StoredChunk]) -> Vec<EmbeddingExportRecord> {
    stored
        .iter()
        .map(|chunk| EmbeddingExportRecord {
            chunk_id: chunk.chunk_id.clone(),
            dimension: chunk.vector.len(),
            vector: chunk.vector.clone(),
            model_name: chunk.model_name.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(id: &str, sequence: usize) -> StoredChunk {
        StoredChunk {
            chunk_id: id.to_string(),
            text: format!("text {id}"),
            source_rows: vec![sequence * 2, sequence * 2 + 1],
            method: "fixed_size".into(),
            sequence,
            model_name: "hash-128".into(),
            vector: vec![0.1, 0.2, 0.3],
        }
    }

    #[test]
    fn chunk_rows_keep_identity_fields() {
        let rows = chunk_rows(&[stored("a", 0), stored("b", 1)]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].chunk_id, "a");
        assert_eq!(rows[1].source_rows, vec![2, 3]);
    }

    #[test]
    fn embedding_records_report_dimension() {
        let records = embedding_records(&[stored("a", 0)]);
        assert_eq!(records[0].dimension, 3);
        assert_eq!(records[0].vector, vec![0.1, 0.2, 0.3]);
        assert_eq!(records[0].model_name, "hash-128");
    }
}
