//! Per-session state and the registry that owns it.
//!
//! The registry replaces ambient globals: every session's state lives in one
//! map owned by the orchestrator, so concurrent sessions share no mutable
//! state and tests can inspect sessions directly.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::PipelineConfig;

use super::events::Stage;

/// Lifecycle of one pipeline session.
///
/// `Created → Preprocessing → Chunking → Embedding → Storing → Ready`, with
/// the terminal `Failed` reachable from any non-terminal state. `Ready` is
/// the only state retrieval accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Preprocessing,
    Chunking,
    Embedding,
    Storing,
    Ready,
    Failed {
        /// Stage the failure originated in.
        stage: String,
        /// Machine-readable cause kind, e.g. `validation` or `cancelled`.
        kind: String,
        message: String,
    },
}

impl SessionStatus {
    pub fn running_stage(stage: Stage) -> Self {
        match stage {
            Stage::Preprocessing => SessionStatus::Preprocessing,
            Stage::Chunking => SessionStatus::Chunking,
            Stage::Embedding => SessionStatus::Embedding,
            Stage::Storing => SessionStatus::Storing,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Ready | SessionStatus::Failed { .. })
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, SessionStatus::Ready)
    }
}

/// State for one end-to-end run over one dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub config: PipelineConfig,
    /// Wall-clock duration per completed stage, keyed by stage name.
    pub stage_timings: FxHashMap<String, Duration>,
    pub status: SessionStatus,
    pub chunk_count: usize,
    pub vector_dimension: Option<usize>,
    /// Set when chunking completed through its fallback path.
    pub degraded: bool,
}

impl ProcessingSession {
    pub fn new(session_id: impl Into<String>, config: PipelineConfig) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
            config,
            stage_timings: FxHashMap::default(),
            status: SessionStatus::Created,
            chunk_count: 0,
            vector_dimension: None,
            degraded: false,
        }
    }
}

struct SessionEntry {
    session: ProcessingSession,
    cancel: Arc<AtomicBool>,
}

/// Registry mapping session ids to their state and cancellation flags.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<FxHashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh session and returns its cancellation flag.
    pub fn insert(&self, session: ProcessingSession) -> Arc<AtomicBool> {
        let cancel = Arc::new(AtomicBool::new(false));
        self.sessions.write().insert(
            session.session_id.clone(),
            SessionEntry {
                session,
                cancel: Arc::clone(&cancel),
            },
        );
        cancel
    }

    /// Snapshot of one session's state.
    pub fn get(&self, session_id: &str) -> Option<ProcessingSession> {
        self.sessions
            .read()
            .get(session_id)
            .map(|entry| entry.session.clone())
    }

    /// Applies a mutation to one session's state.
    pub fn update(&self, session_id: &str, apply: impl FnOnce(&mut ProcessingSession)) {
        if let Some(entry) = self.sessions.write().get_mut(session_id) {
            apply(&mut entry.session);
        }
    }

    /// Requests cancellation; the orchestrator honors it at the next stage
    /// boundary. Returns `false` for unknown sessions.
    pub fn request_cancel(&self, session_id: &str) -> bool {
        match self.sessions.read().get(session_id) {
            Some(entry) => {
                entry.cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self, session_id: &str) -> bool {
        self.sessions
            .read()
            .get(session_id)
            .map(|entry| entry.cancel.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn remove(&self, session_id: &str) -> Option<ProcessingSession> {
        self.sessions
            .write()
            .remove(session_id)
            .map(|entry| entry.session)
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_update_round_trip() {
        let registry = SessionRegistry::new();
        registry.insert(ProcessingSession::new("s1", PipelineConfig::default()));

        registry.update("s1", |session| {
            session.status = SessionStatus::Chunking;
            session
                .stage_timings
                .insert("preprocessing".into(), Duration::from_millis(3));
        });

        let session = registry.get("s1").unwrap();
        assert_eq!(session.status, SessionStatus::Chunking);
        assert_eq!(
            session.stage_timings.get("preprocessing"),
            Some(&Duration::from_millis(3))
        );
    }

    #[test]
    fn cancellation_flag_is_shared() {
        let registry = SessionRegistry::new();
        let flag = registry.insert(ProcessingSession::new("s1", PipelineConfig::default()));
        assert!(!registry.is_cancelled("s1"));
        assert!(registry.request_cancel("s1"));
        assert!(flag.load(Ordering::SeqCst));
        assert!(registry.is_cancelled("s1"));
    }

    #[test]
    fn unknown_sessions_are_absent() {
        let registry = SessionRegistry::new();
        assert!(registry.get("ghost").is_none());
        assert!(!registry.request_cancel("ghost"));
        assert!(registry.remove("ghost").is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(SessionStatus::Ready.is_terminal());
        assert!(
            SessionStatus::Failed {
                stage: "embedding".into(),
                kind: "embedding_quality".into(),
                message: "bad batch".into(),
            }
            .is_terminal()
        );
        assert!(!SessionStatus::Chunking.is_terminal());
    }
}
