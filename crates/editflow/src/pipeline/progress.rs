//! Stage transition events for live subscribers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::edit::ProcessingStage;

/// What happened to a stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageEventKind {
    Started,
    Succeeded,
    Retrying,
    FellBack,
    Failed,
    Completed,
}

/// One stage transition, mirroring a store write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StageEvent {
    pub edit_id: String,
    pub stage: ProcessingStage,
    pub kind: StageEventKind,
    /// 1-based attempt of the stage.
    pub attempt: u32,
    pub max_attempts: u32,
    pub progress_percent: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StageEvent {
    pub fn new(
        edit_id: &str,
        stage: ProcessingStage,
        kind: StageEventKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            edit_id: edit_id.to_string(),
            stage,
            kind,
            attempt: 1,
            max_attempts: 1,
            progress_percent: stage.progress_percent(),
            message: message.into(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_attempt(mut self, attempt: u32, max_attempts: u32) -> Self {
        self.attempt = attempt;
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: StageEvent);
}

/// No-op reporter for unit tests and headless workers.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: StageEvent) {}
}

/// Fans stage events out over a broadcast channel.
#[derive(Clone)]
pub struct BroadcastProgress {
    sender: Arc<broadcast::Sender<StageEvent>>,
}

impl BroadcastProgress {
    /// Creates a broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Creates a new subscriber for stage events.
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.sender.subscribe()
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: StageEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }
}
