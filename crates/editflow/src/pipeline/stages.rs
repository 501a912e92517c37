//! The fixed stage table driven by [`Pipeline`](super::Pipeline).

use std::time::Duration;

use crate::edit::ProcessingStage;
use crate::retry::RetryPolicy;

use super::context::PipelineContext;
use super::error::StageError;
use super::runner::Pipeline;

/// What happens when a stage gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Fail the edit with the stage's last error.
    FailJob,
    /// Record a warning and continue with the next stage.
    FallBack,
}

pub type StageHandler = fn(&Pipeline, &mut PipelineContext) -> Result<(), StageError>;

pub struct StageSpec {
    pub stage: ProcessingStage,
    pub handler: StageHandler,
    pub on_failure: FailureMode,
    /// When false the stage runs exactly once whatever the configuration says.
    pub retries_allowed: bool,
    pub default_retry: RetryPolicy,
}

pub static STAGES: &[StageSpec] = &[
    StageSpec {
        stage: ProcessingStage::EnhancingPrompt,
        handler: Pipeline::enhance_prompt,
        on_failure: FailureMode::FallBack,
        retries_allowed: true,
        default_retry: RetryPolicy {
            max_retries: 2,
            delay: Duration::from_secs(2),
            backoff: 2.0,
            max_delay: Duration::from_secs(10),
        },
    },
    StageSpec {
        stage: ProcessingStage::FetchingImage,
        handler: Pipeline::fetch_image,
        on_failure: FailureMode::FailJob,
        retries_allowed: true,
        default_retry: RetryPolicy {
            max_retries: 3,
            delay: Duration::from_secs(10),
            backoff: 2.0,
            max_delay: Duration::from_secs(60),
        },
    },
    StageSpec {
        stage: ProcessingStage::AiProcessing,
        handler: Pipeline::generate_image,
        on_failure: FailureMode::FailJob,
        retries_allowed: false,
        default_retry: RetryPolicy::NONE,
    },
    StageSpec {
        stage: ProcessingStage::UploadingResult,
        handler: Pipeline::upload_result,
        on_failure: FailureMode::FailJob,
        retries_allowed: true,
        default_retry: RetryPolicy {
            max_retries: 3,
            delay: Duration::from_secs(10),
            backoff: 2.0,
            max_delay: Duration::from_secs(60),
        },
    },
];

/// The stages still to run for an edit sitting at `current`.
///
/// `pending` starts from the first stage; a pipeline stage resumes at itself;
/// terminal stages have nothing left.
pub fn remaining(current: ProcessingStage) -> &'static [StageSpec] {
    if current == ProcessingStage::Pending {
        return STAGES;
    }
    match STAGES.iter().position(|spec| spec.stage == current) {
        Some(idx) => &STAGES[idx..],
        None => &[],
    }
}

pub fn spec_for(stage: ProcessingStage) -> Option<&'static StageSpec> {
    STAGES.iter().find(|spec| spec.stage == stage)
}
