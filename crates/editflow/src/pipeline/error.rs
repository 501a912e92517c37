use thiserror::Error;

use crate::adapters::AdapterError;
use crate::edit::ProcessingStage;
use crate::error::ErrorKind;
use crate::store::StoreError;

/// Failure of one stage attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<AdapterError> for StageError {
    fn from(err: AdapterError) -> Self {
        Self {
            kind: err.kind,
            message: err.to_string(),
        }
    }
}

/// Conditions that stop a run without deciding the edit's outcome.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Edit not found: {0}")]
    NotFound(String),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// The run should be retried later rather than dropped.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            PipelineError::Store(e) => e.is_infrastructure(),
            PipelineError::NotFound(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineWarning {
    EnhancementSkipped {
        stage: ProcessingStage,
        error: String,
    },
}
