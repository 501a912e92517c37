//! Edit records and their lifecycle vocabulary.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

pub mod snapshot;
pub mod stage;

pub use snapshot::{ChainEntry, StatusSnapshot};
pub use stage::ProcessingStage;

/// Coarse lifecycle status of an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl EditStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EditStatus::Completed | EditStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EditStatus::Pending => "pending",
            EditStatus::Processing => "processing",
            EditStatus::Completed => "completed",
            EditStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EditStatus::Pending),
            "processing" => Some(EditStatus::Processing),
            "completed" => Some(EditStatus::Completed),
            "failed" => Some(EditStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for EditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an edit failed: the stage that gave up, how, and the last error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub stage: ProcessingStage,
    pub kind: ErrorKind,
    pub message: String,
}

impl FailureReason {
    pub fn new(stage: ProcessingStage, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed ({}): {}", self.stage, self.kind, self.message)
    }
}

/// One user-visible unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edit {
    pub id: String,
    pub prompt: String,
    pub enhanced_prompt: Option<String>,
    pub original_image_ref: String,
    pub result_image_ref: Option<String>,
    pub status: EditStatus,
    pub processing_stage: ProcessingStage,
    pub parent_id: Option<String>,
    pub chain_position: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub failure_reason: Option<FailureReason>,
    pub message: Option<String>,
}

impl Edit {
    /// A fresh root edit in `pending`, with a new UUID v4 id.
    pub fn new(prompt: impl Into<String>, original_image_ref: impl Into<String>) -> Self {
        Self::with_id(
            uuid::Uuid::new_v4().to_string(),
            prompt,
            original_image_ref,
        )
    }

    pub fn with_id(
        id: impl Into<String>,
        prompt: impl Into<String>,
        original_image_ref: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            prompt: prompt.into(),
            enhanced_prompt: None,
            original_image_ref: original_image_ref.into(),
            result_image_ref: None,
            status: EditStatus::Pending,
            processing_stage: ProcessingStage::Pending,
            parent_id: None,
            chain_position: 1,
            created_at: now,
            updated_at: now,
            failure_reason: None,
            message: Some(ProcessingStage::Pending.message().to_string()),
        }
    }

    /// The enhanced prompt when one was produced, otherwise the user's prompt.
    pub fn effective_prompt(&self) -> &str {
        self.enhanced_prompt.as_deref().unwrap_or(&self.prompt)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Object-storage key of an edit's generated image. Also its idempotency key.
pub fn result_key(edit_id: &str) -> String {
    format!("results/edited-{}.png", edit_id)
}

/// Object-storage key for uploaded source images.
pub fn original_key(edit_id: &str) -> String {
    format!("originals/original-{}.png", edit_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_edit_defaults() {
        let edit = Edit::new("make the sky purple", "mem://originals/a.png");
        assert_eq!(edit.status, EditStatus::Pending);
        assert_eq!(edit.processing_stage, ProcessingStage::Pending);
        assert_eq!(edit.chain_position, 1);
        assert!(edit.parent_id.is_none());
        assert!(uuid::Uuid::parse_str(&edit.id).is_ok());
        assert_eq!(edit.created_at, edit.updated_at);
    }

    #[test]
    fn test_effective_prompt_prefers_enhanced() {
        let mut edit = Edit::new("sky purple", "ref");
        assert_eq!(edit.effective_prompt(), "sky purple");
        edit.enhanced_prompt = Some("Change the sky to a deep purple dusk".to_string());
        assert_eq!(edit.effective_prompt(), "Change the sky to a deep purple dusk");
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(EditStatus::parse("failed"), Some(EditStatus::Failed));
        assert_eq!(EditStatus::parse("done"), None);
        assert!(EditStatus::Completed.is_terminal());
        assert!(!EditStatus::Processing.is_terminal());
    }

    #[test]
    fn test_failure_reason_display() {
        let reason = FailureReason::new(
            ProcessingStage::AiProcessing,
            ErrorKind::Permanent,
            "content moderated",
        );
        assert_eq!(
            reason.to_string(),
            "ai_processing failed (permanent): content moderated"
        );
    }

    #[test]
    fn test_object_keys() {
        assert_eq!(result_key("abc"), "results/edited-abc.png");
        assert_eq!(original_key("abc"), "originals/original-abc.png");
    }
}
