use crate::edit::Edit;

use super::error::PipelineWarning;

/// Durable outputs of the stage currently running, committed together with
/// the move to the next stage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StageOutputs {
    pub enhanced_prompt: Option<String>,
    pub result_image_ref: Option<String>,
}

pub struct PipelineContext {
    // Input, refreshed after every store write
    pub edit: Edit,

    // Original image bytes; set by fetching_image (or early by enhancing_prompt)
    pub image: Option<Vec<u8>>,

    // Generated image bytes; set by ai_processing
    pub generated: Option<Vec<u8>>,

    // Outputs of the running stage, drained at commit
    pub outputs: StageOutputs,

    // Non-fatal warnings
    pub warnings: Vec<PipelineWarning>,
}

impl PipelineContext {
    pub fn new(edit: Edit) -> Self {
        Self {
            edit,
            image: None,
            generated: None,
            outputs: StageOutputs::default(),
            warnings: Vec::new(),
        }
    }
}
