//! Ordered processing stages of an edit job.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where an edit currently is in the pipeline.
///
/// Stages are totally ordered by rank; `Failed` sits outside the order and
/// can be entered from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Pending,
    EnhancingPrompt,
    FetchingImage,
    AiProcessing,
    UploadingResult,
    Completed,
    Failed,
}

const ORDERED: [ProcessingStage; 6] = [
    ProcessingStage::Pending,
    ProcessingStage::EnhancingPrompt,
    ProcessingStage::FetchingImage,
    ProcessingStage::AiProcessing,
    ProcessingStage::UploadingResult,
    ProcessingStage::Completed,
];

impl ProcessingStage {
    /// Stages that do work, in execution order.
    pub const PIPELINE: [ProcessingStage; 4] = [
        ProcessingStage::EnhancingPrompt,
        ProcessingStage::FetchingImage,
        ProcessingStage::AiProcessing,
        ProcessingStage::UploadingResult,
    ];

    /// Position in the stage order. `None` for `Failed`.
    pub fn rank(self) -> Option<usize> {
        ORDERED.iter().position(|s| *s == self)
    }

    pub fn next(self) -> Option<Self> {
        self.rank().and_then(|r| ORDERED.get(r + 1).copied())
    }

    pub fn previous(self) -> Option<Self> {
        match self.rank() {
            Some(0) | None => None,
            Some(r) => Some(ORDERED[r - 1]),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessingStage::Completed | ProcessingStage::Failed)
    }

    /// Whether a record may move from `self` to `to` without going backwards.
    pub fn can_advance_to(self, to: ProcessingStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), to.rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to >= from,
            (None, Some(_)) => false,
        }
    }

    /// Fixed progress percentage shown while the edit sits in this stage.
    ///
    /// `Failed` has no percentage of its own; snapshots derive it from the
    /// stage that failed.
    pub fn progress_percent(self) -> u8 {
        match self {
            ProcessingStage::Pending => 10,
            ProcessingStage::EnhancingPrompt => 25,
            ProcessingStage::FetchingImage => 40,
            ProcessingStage::AiProcessing => 60,
            ProcessingStage::UploadingResult => 90,
            ProcessingStage::Completed => 100,
            ProcessingStage::Failed => 0,
        }
    }

    /// User-facing status line.
    pub fn message(self) -> &'static str {
        match self {
            ProcessingStage::Pending => "Your edit is queued and will start processing soon...",
            ProcessingStage::EnhancingPrompt => "Enhancing your prompt with AI...",
            ProcessingStage::FetchingImage => "Preparing your image...",
            ProcessingStage::AiProcessing => "Processing your edit...",
            ProcessingStage::UploadingResult => "Finalizing your edit...",
            ProcessingStage::Completed => "Edit completed successfully!",
            ProcessingStage::Failed => "Edit failed. Please try again.",
        }
    }

    pub fn estimated_time_remaining(self) -> &'static str {
        match self {
            ProcessingStage::Pending => "2-3 minutes",
            ProcessingStage::EnhancingPrompt => "1-2 minutes",
            ProcessingStage::FetchingImage => "1-2 minutes",
            ProcessingStage::AiProcessing => "30-60 seconds",
            ProcessingStage::UploadingResult => "10-20 seconds",
            ProcessingStage::Completed => "0 seconds",
            ProcessingStage::Failed => "N/A",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStage::Pending => "pending",
            ProcessingStage::EnhancingPrompt => "enhancing_prompt",
            ProcessingStage::FetchingImage => "fetching_image",
            ProcessingStage::AiProcessing => "ai_processing",
            ProcessingStage::UploadingResult => "uploading_result",
            ProcessingStage::Completed => "completed",
            ProcessingStage::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ProcessingStage::Pending),
            "enhancing_prompt" => Some(ProcessingStage::EnhancingPrompt),
            "fetching_image" => Some(ProcessingStage::FetchingImage),
            "ai_processing" => Some(ProcessingStage::AiProcessing),
            "uploading_result" => Some(ProcessingStage::UploadingResult),
            "completed" => Some(ProcessingStage::Completed),
            "failed" => Some(ProcessingStage::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
