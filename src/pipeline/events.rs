//! Stage-transition events emitted by the orchestrator.
//!
//! The core never touches presentation state: progress is published as
//! [`StageEvent`] values to injected [`StageObserver`]s. A channel-backed
//! observer and a tracing-backed observer ship in-crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// The four orchestrated pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preprocessing,
    Chunking,
    Embedding,
    Storing,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Preprocessing => "preprocessing",
            Stage::Chunking => "chunking",
            Stage::Embedding => "embedding",
            Stage::Storing => "storing",
        }
    }
}

/// What happened at a stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Started,
    Completed,
    /// The stage completed through its fallback path.
    Degraded,
    Failed,
}

/// One stage transition for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    pub session_id: String,
    pub stage: Stage,
    pub status: StageStatus,
    /// Wall-clock stage duration; absent on `Started`.
    pub elapsed: Option<Duration>,
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

impl StageEvent {
    pub fn started(session_id: impl Into<String>, stage: Stage) -> Self {
        Self {
            session_id: session_id.into(),
            stage,
            status: StageStatus::Started,
            elapsed: None,
            message: None,
            at: Utc::now(),
        }
    }

    pub fn completed(session_id: impl Into<String>, stage: Stage, elapsed: Duration) -> Self {
        Self {
            session_id: session_id.into(),
            stage,
            status: StageStatus::Completed,
            elapsed: Some(elapsed),
            message: None,
            at: Utc::now(),
        }
    }

    pub fn degraded(
        session_id: impl Into<String>,
        stage: Stage,
        elapsed: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            stage,
            status: StageStatus::Degraded,
            elapsed: Some(elapsed),
            message: Some(message.into()),
            at: Utc::now(),
        }
    }

    pub fn failed(
        session_id: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            stage,
            status: StageStatus::Failed,
            elapsed: None,
            message: Some(message.into()),
            at: Utc::now(),
        }
    }
}

/// Receives stage transitions. Implementations must not block.
pub trait StageObserver: Send + Sync {
    fn on_stage(&self, event: &StageEvent);
}

/// Forwards events into a flume channel, e.g. for streaming progress to a
/// network layer. Send failures (receiver dropped) are ignored.
pub struct ChannelObserver {
    tx: flume::Sender<StageEvent>,
}

impl ChannelObserver {
    pub fn new(tx: flume::Sender<StageEvent>) -> Self {
        Self { tx }
    }

    /// Builds an observer together with its receiving end.
    pub fn unbounded() -> (Self, flume::Receiver<StageEvent>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }
}

impl StageObserver for ChannelObserver {
    fn on_stage(&self, event: &StageEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Logs stage transitions through `tracing`.
pub struct TracingObserver;

impl StageObserver for TracingObserver {
    fn on_stage(&self, event: &StageEvent) {
        info!(
            session = %event.session_id,
            stage = event.stage.name(),
            status = ?event.status,
            elapsed_ms = event.elapsed.map(|d| d.as_millis() as u64),
            message = event.message.as_deref().unwrap_or(""),
            "stage transition"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_observer_delivers_events() {
        let (observer, rx) = ChannelObserver::unbounded();
        observer.on_stage(&StageEvent::started("s1", Stage::Chunking));
        observer.on_stage(&StageEvent::completed(
            "s1",
            Stage::Chunking,
            Duration::from_millis(5),
        ));

        let first = rx.recv().unwrap();
        assert_eq!(first.status, StageStatus::Started);
        let second = rx.recv().unwrap();
        assert_eq!(second.status, StageStatus::Completed);
        assert_eq!(second.elapsed, Some(Duration::from_millis(5)));
    }

    #[test]
    fn dropped_receiver_is_tolerated() {
        let (observer, rx) = ChannelObserver::unbounded();
        drop(rx);
        observer.on_stage(&StageEvent::failed("s1", Stage::Embedding, "boom"));
    }
}
