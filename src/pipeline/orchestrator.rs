//! The pipeline orchestrator: sequences the stages, owns per-session state,
//! applies fallback policy, and exposes the two public entry points.

use rustc_hash::FxHashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::yield_now;
use tracing::{error, info};
use uuid::Uuid;

use crate::chunking::{ChunkQualityMetrics, ChunkingEngine, ChunkingResult};
use crate::config::PipelineConfig;
use crate::dataset::Dataset;
use crate::embedding::{EmbeddingGenerator, ModelRegistry};
use crate::error::PipelineError;
use crate::export::{ChunkExportRow, EmbeddingExportRecord, chunk_rows, embedding_records};
use crate::preprocess::preprocess;
use crate::retrieval::{DEFAULT_TOP_K, Retriever, SearchResult};
use crate::stores::{
    CollectionHandle, SimilarityMetric, StoreBackendKind, VectorStore, build_store,
};

use super::events::{Stage, StageEvent, StageObserver, TracingObserver};
use super::session::{ProcessingSession, SessionRegistry, SessionStatus};

/// Summary returned to the caller once a session reaches `Ready`.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub session_id: String,
    pub stage_timings: FxHashMap<String, Duration>,
    pub chunk_count: usize,
    pub vector_dimension: usize,
    pub quality_metrics: ChunkQualityMetrics,
}

/// Per-query overrides for [`PipelineOrchestrator::search_session`]. Absent
/// fields fall back to the session's configuration.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub top_k: Option<usize>,
    pub metric: Option<SimilarityMetric>,
    pub model_name: Option<String>,
}

/// Sequences `preprocess → chunk → embed → store` per session and serves
/// retrieval against `Ready` sessions.
///
/// Re-entrant across sessions: concurrent runs share only the read-only
/// model registry and the vector stores, whose collections are keyed and
/// isolated by session id.
pub struct PipelineOrchestrator {
    sessions: SessionRegistry,
    models: Arc<ModelRegistry>,
    engine: ChunkingEngine,
    generator: EmbeddingGenerator,
    document_store: Arc<dyn VectorStore>,
    flat_store: Arc<dyn VectorStore>,
    observers: Vec<Arc<dyn StageObserver>>,
}

impl PipelineOrchestrator {
    /// Builds an orchestrator with both storage backends rooted at
    /// `data_dir` and the built-in embedding models registered.
    pub async fn new(data_dir: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let data_dir = data_dir.into();
        let models = Arc::new(ModelRegistry::with_default_models());
        let document_store = build_store(StoreBackendKind::Document, &data_dir).await?;
        let flat_store = build_store(StoreBackendKind::FlatIndex, &data_dir).await?;
        Ok(Self {
            sessions: SessionRegistry::new(),
            generator: EmbeddingGenerator::new(Arc::clone(&models)),
            models,
            engine: ChunkingEngine::new(),
            document_store,
            flat_store,
            observers: vec![Arc::new(TracingObserver)],
        })
    }

    /// Adds a stage-transition observer.
    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// The shared embedding model registry, e.g. for registering custom
    /// providers before running sessions.
    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.models
    }

    /// Snapshot of one session's state.
    pub fn session(&self, session_id: &str) -> Option<ProcessingSession> {
        self.sessions.get(session_id)
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.session_ids()
    }

    /// Flags a session for cancellation, honored at the next stage boundary.
    pub fn cancel_session(&self, session_id: &str) -> bool {
        self.sessions.request_cancel(session_id)
    }

    /// Runs the full pipeline over a raw dataset payload.
    ///
    /// The caller always receives a definitive terminal state: `Ok` means the
    /// session is `Ready`; any `Err` left it `Failed` with the originating
    /// stage recorded (decode failures precede session creation).
    pub async fn run_pipeline(
        &self,
        raw: &[u8],
        filename: &str,
        config: PipelineConfig,
    ) -> Result<ProcessingResult, PipelineError> {
        let dataset = Dataset::decode(raw, filename)?;
        let session_id = Uuid::new_v4().to_string();
        self.sessions
            .insert(ProcessingSession::new(session_id.clone(), config.clone()));
        info!(
            session = %session_id,
            filename,
            rows = dataset.row_count(),
            "pipeline run started"
        );

        // Preprocessing.
        self.checkpoint(&session_id, Stage::Preprocessing).await?;
        let started = self.begin_stage(&session_id, Stage::Preprocessing);
        let (cleaned, report) = preprocess(&dataset, &config.preprocessing)
            .map_err(|err| self.fail(&session_id, Stage::Preprocessing, err))?;
        info!(
            session = %session_id,
            rows_in = report.rows_in,
            rows_out = report.rows_out,
            duplicates_removed = report.duplicates_removed,
            "dataset cleaned"
        );
        self.finish_stage(&session_id, Stage::Preprocessing, started);

        // Chunking. Strategy failures were already absorbed by the engine;
        // a degraded result continues the run.
        self.checkpoint(&session_id, Stage::Chunking).await?;
        let started = self.begin_stage(&session_id, Stage::Chunking);
        let ChunkingResult { chunks, metrics } = self.engine.chunk(&cleaned, &config.chunking);
        let elapsed = self.record_timing(&session_id, Stage::Chunking, started);
        if metrics.degraded {
            self.sessions.update(&session_id, |session| {
                session.degraded = true;
            });
            self.emit(StageEvent::degraded(
                session_id.as_str(),
                Stage::Chunking,
                elapsed,
                "fell back to fixed-size chunking",
            ));
        } else {
            self.emit(StageEvent::completed(
                session_id.as_str(),
                Stage::Chunking,
                elapsed,
            ));
        }
        let chunk_count = chunks.len();
        self.sessions.update(&session_id, |session| {
            session.chunk_count = chunk_count;
        });

        // Embedding.
        self.checkpoint(&session_id, Stage::Embedding).await?;
        let started = self.begin_stage(&session_id, Stage::Embedding);
        let embedding = self
            .generator
            .embed(
                chunks,
                &config.embedding.model_name,
                config.embedding.batch_size,
            )
            .await
            .map_err(|err| self.fail(&session_id, Stage::Embedding, err))?;
        self.finish_stage(&session_id, Stage::Embedding, started);
        self.sessions.update(&session_id, |session| {
            session.vector_dimension = Some(embedding.dimension);
        });

        // Storing. Collection creation waited until every chunk was embedded,
        // so a failure here can only leave an absent collection, never a
        // half-written one.
        self.checkpoint(&session_id, Stage::Storing).await?;
        let started = self.begin_stage(&session_id, Stage::Storing);
        let store = self.store_for(config.storage.backend);
        let stored: Result<(), PipelineError> = async {
            let handle = store.create_collection(&session_id).await?;
            store.add(&handle, &embedding.embedded_chunks).await?;
            store.persist(&handle).await?;
            Ok(())
        }
        .await;
        if let Err(err) = stored {
            let _ = store
                .delete_collection(&CollectionHandle::new(session_id.as_str()))
                .await;
            return Err(self.fail(&session_id, Stage::Storing, err));
        }
        self.finish_stage(&session_id, Stage::Storing, started);

        self.sessions.update(&session_id, |session| {
            session.status = SessionStatus::Ready;
        });
        info!(session = %session_id, chunk_count, "pipeline run ready");

        let stage_timings = self
            .sessions
            .get(&session_id)
            .map(|session| session.stage_timings)
            .unwrap_or_default();
        Ok(ProcessingResult {
            session_id,
            stage_timings,
            chunk_count,
            vector_dimension: embedding.dimension,
            quality_metrics: metrics,
        })
    }

    /// Answers a query against a `Ready` session.
    pub async fn search_session(
        &self,
        session_id: &str,
        query_text: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, PipelineError> {
        let session = self.ready_session(session_id)?;

        let store = Arc::clone(self.store_for(session.config.storage.backend));
        let retriever = Retriever::new(Arc::clone(&self.models), store);
        let metric = options
            .metric
            .unwrap_or(session.config.storage.similarity_metric);
        let model_name = options
            .model_name
            .clone()
            .unwrap_or(session.config.embedding.model_name);
        let top_k = options.top_k.unwrap_or(DEFAULT_TOP_K);

        retriever
            .search(
                &CollectionHandle::new(session_id),
                query_text,
                &model_name,
                top_k,
                metric,
            )
            .await
    }

    /// Tabular export of a `Ready` session's chunks.
    pub async fn export_chunks(
        &self,
        session_id: &str,
    ) -> Result<Vec<ChunkExportRow>, PipelineError> {
        let session = self.ready_session(session_id)?;
        let store = self.store_for(session.config.storage.backend);
        let stored = store.export(&CollectionHandle::new(session_id)).await?;
        Ok(chunk_rows(&stored))
    }

    /// Structured export of a `Ready` session's embeddings.
    pub async fn export_embeddings(
        &self,
        session_id: &str,
    ) -> Result<Vec<EmbeddingExportRecord>, PipelineError> {
        let session = self.ready_session(session_id)?;
        let store = self.store_for(session.config.storage.backend);
        let stored = store.export(&CollectionHandle::new(session_id)).await?;
        Ok(embedding_records(&stored))
    }

    /// Drops a session: deletes its collection and registry entry.
    pub async fn remove_session(&self, session_id: &str) -> Result<(), PipelineError> {
        let session = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| PipelineError::SessionNotFound(session_id.to_string()))?;
        let store = self.store_for(session.config.storage.backend);
        store
            .delete_collection(&CollectionHandle::new(session_id))
            .await
    }

    fn ready_session(&self, session_id: &str) -> Result<ProcessingSession, PipelineError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| PipelineError::SessionNotFound(session_id.to_string()))?;
        if !session.status.is_ready() {
            return Err(PipelineError::Validation(format!(
                "session '{session_id}' is not ready (status: {:?})",
                session.status
            )));
        }
        Ok(session)
    }

    fn store_for(&self, kind: StoreBackendKind) -> &Arc<dyn VectorStore> {
        match kind {
            StoreBackendKind::Document => &self.document_store,
            StoreBackendKind::FlatIndex => &self.flat_store,
        }
    }

    fn emit(&self, event: StageEvent) {
        for observer in &self.observers {
            observer.on_stage(&event);
        }
    }

    /// Cancellation check and cooperative yield at a stage boundary.
    async fn checkpoint(&self, session_id: &str, next: Stage) -> Result<(), PipelineError> {
        if self.sessions.is_cancelled(session_id) {
            return Err(self.fail(session_id, next, PipelineError::Cancelled));
        }
        // Let other sessions' stages interleave.
        yield_now().await;
        Ok(())
    }

    fn begin_stage(&self, session_id: &str, stage: Stage) -> Instant {
        self.sessions.update(session_id, |session| {
            session.status = SessionStatus::running_stage(stage);
        });
        self.emit(StageEvent::started(session_id, stage));
        Instant::now()
    }

    fn record_timing(&self, session_id: &str, stage: Stage, started: Instant) -> Duration {
        let elapsed = started.elapsed();
        self.sessions.update(session_id, |session| {
            session
                .stage_timings
                .insert(stage.name().to_string(), elapsed);
        });
        elapsed
    }

    fn finish_stage(&self, session_id: &str, stage: Stage, started: Instant) {
        let elapsed = self.record_timing(session_id, stage, started);
        self.emit(StageEvent::completed(session_id, stage, elapsed));
    }

    fn fail(&self, session_id: &str, stage: Stage, err: PipelineError) -> PipelineError {
        error!(session = %session_id, stage = stage.name(), error = %err, "stage failed");
        self.sessions.update(session_id, |session| {
            session.status = SessionStatus::Failed {
                stage: stage.name().to_string(),
                kind: err.kind().to_string(),
                message: err.to_string(),
            };
        });
        self.emit(StageEvent::failed(session_id, stage, err.to_string()));
        err
    }
}
