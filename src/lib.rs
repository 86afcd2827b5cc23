//! # tablerag: tabular-dataset RAG pipeline
//!
//! Turns a tabular dataset into a searchable collection of semantic text
//! segments through five stages:
//!
//! ```text
//! raw bytes ──► Dataset ──► preprocess ──► ChunkingEngine ──► EmbeddingGenerator
//!                                                                    │
//!                                        VectorStore ◄───────────────┘
//!                                             │
//!                     Retriever ◄── query ────┘
//! ```
//!
//! The [`pipeline::PipelineOrchestrator`] sequences the stages per session,
//! records per-stage wall-clock timings, emits stage-transition events to
//! injected observers, and applies the chunking fallback policy. Sessions are
//! independent and may run concurrently; retrieval is served from `Ready`
//! sessions only.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tablerag::config::PipelineConfig;
//! use tablerag::pipeline::{PipelineOrchestrator, SearchOptions};
//!
//! # async fn example() -> Result<(), tablerag::error::PipelineError> {
//! let orchestrator = PipelineOrchestrator::new("./data").await?;
//!
//! let csv = b"city,population\nOslo,709037\nBergen,291940\n";
//! let result = orchestrator
//!     .run_pipeline(csv, "cities.csv", PipelineConfig::default())
//!     .await?;
//!
//! let hits = orchestrator
//!     .search_session(&result.session_id, "largest city", &SearchOptions::default())
//!     .await?;
//! println!("top hit: {}", hits[0].document_text);
//! # Ok(())
//! # }
//! ```

pub mod chunking;
pub mod config;
pub mod dataset;
pub mod embedding;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod preprocess;
pub mod retrieval;
pub mod stores;

pub use chunking::{Chunk, ChunkMethod, ChunkingEngine, ChunkingResult};
pub use config::PipelineConfig;
pub use dataset::Dataset;
pub use embedding::{EmbeddedChunk, EmbeddingGenerator, ModelRegistry};
pub use error::PipelineError;
pub use pipeline::{PipelineOrchestrator, ProcessingResult, SearchOptions};
pub use retrieval::{Retriever, SearchResult};
pub use stores::{SimilarityMetric, StoreBackendKind, VectorStore};
