//! Poll-facing views derived from an edit record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Edit, EditStatus, ProcessingStage};

/// What a polling client sees. Derived purely from the stored record, so a
/// snapshot rebuilt from the store equals the one cached at write time.
///
/// `updated_at` orders snapshots of one edit; the cache never replaces a
/// snapshot with an older one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub id: String,
    pub status: EditStatus,
    pub processing_stage: ProcessingStage,
    pub progress_percent: u8,
    pub is_complete: bool,
    pub is_error: bool,
    pub result_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message: String,
    /// Latest progress note written by the worker, such as a retry attempt.
    pub detail: Option<String>,
    pub error: Option<String>,
    pub failed_stage: Option<ProcessingStage>,
    pub estimated_time_remaining: String,
}

impl StatusSnapshot {
    pub fn from_edit(edit: &Edit) -> Self {
        let is_error = edit.status == EditStatus::Failed;
        let failed_stage = edit.failure_reason.as_ref().map(|r| r.stage);

        let progress_percent = if is_error {
            // Percentage of the last stage that finished before the failure.
            failed_stage
                .and_then(ProcessingStage::previous)
                .map(ProcessingStage::progress_percent)
                .unwrap_or(0)
        } else {
            edit.processing_stage.progress_percent()
        };

        let shown_stage = if is_error {
            ProcessingStage::Failed
        } else {
            edit.processing_stage
        };

        let message = shown_stage.message();
        let detail = edit.message.clone().filter(|m| !m.is_empty() && m != message);

        Self {
            id: edit.id.clone(),
            status: edit.status,
            processing_stage: edit.processing_stage,
            progress_percent,
            is_complete: edit.status == EditStatus::Completed,
            is_error,
            result_ref: edit.result_image_ref.clone(),
            created_at: edit.created_at,
            updated_at: edit.updated_at,
            message: message.to_string(),
            detail,
            error: edit.failure_reason.as_ref().map(|r| r.message.clone()),
            failed_stage,
            estimated_time_remaining: shown_stage.estimated_time_remaining().to_string(),
        }
    }

    /// Whether `self` reflects a later write than `other`.
    ///
    /// Terminal snapshots outrank everything, then stage rank, then the
    /// write timestamp.
    pub fn is_newer_than(&self, other: &StatusSnapshot) -> bool {
        self.order_key() > other.order_key()
    }

    fn order_key(&self) -> (bool, usize, DateTime<Utc>) {
        let terminal = self.status.is_terminal();
        let rank = self.processing_stage.rank().unwrap_or(usize::MAX);
        (terminal, rank, self.updated_at)
    }
}

/// One element of a chain history, root first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    pub id: String,
    pub prompt: String,
    pub chain_position: u32,
    pub parent_id: Option<String>,
}

impl From<&Edit> for ChainEntry {
    fn from(edit: &Edit) -> Self {
        Self {
            id: edit.id.clone(),
            prompt: edit.prompt.clone(),
            chain_position: edit.chain_position,
            parent_id: edit.parent_id.clone(),
        }
    }
}
