//! Error taxonomy shared across the pipeline stages.

use thiserror::Error;

/// Errors surfaced by the pipeline and its collaborators.
///
/// The variants map onto the propagation policy each stage follows:
///
/// - [`Validation`](PipelineError::Validation) is never retried and surfaces
///   to the caller immediately.
/// - [`Chunking`](PipelineError::Chunking) is absorbed by the chunking engine,
///   which falls back to fixed-size chunking and marks the result degraded.
/// - [`ModelUnavailable`](PipelineError::ModelUnavailable) and
///   [`EmbeddingQuality`](PipelineError::EmbeddingQuality) are fatal to the
///   session; embeddings must be trustworthy, so there is no fallback.
/// - [`Storage`](PipelineError::Storage) is fatal; a collection is either
///   fully written or absent.
/// - [`EmptyIndex`](PipelineError::EmptyIndex) and
///   [`SessionNotFound`](PipelineError::SessionNotFound) fail a single query;
///   the session itself stays `Ready`.
/// - [`Cancelled`](PipelineError::Cancelled) terminates the session but is
///   not an error from the caller's perspective.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Bad input shape or configuration.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A chunking strategy failed internally.
    #[error("chunking failed: {0}")]
    Chunking(String),

    /// The requested embedding model is not registered.
    #[error("embedding model '{0}' is not available")]
    ModelUnavailable(String),

    /// An embedding batch produced non-finite or all-zero vectors, or the
    /// dimension drifted within a run.
    #[error("embedding quality check failed: {0}")]
    EmbeddingQuality(String),

    /// A vector store backend failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A search ran against a collection holding no vectors.
    #[error("collection for session '{0}' holds no vectors")]
    EmptyIndex(String),

    /// No session is registered under the given id.
    #[error("unknown session '{0}'")]
    SessionNotFound(String),

    /// The session was cancelled between stages.
    #[error("session cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Short machine-readable kind tag, used in failure causes and events.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::Chunking(_) => "chunking",
            PipelineError::ModelUnavailable(_) => "model_unavailable",
            PipelineError::EmbeddingQuality(_) => "embedding_quality",
            PipelineError::Storage(_) => "storage",
            PipelineError::EmptyIndex(_) => "empty_index",
            PipelineError::SessionNotFound(_) => "session_not_found",
            PipelineError::Cancelled => "cancelled",
        }
    }
}
