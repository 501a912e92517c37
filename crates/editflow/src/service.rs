//! Submission and polling entry points.

use std::sync::Arc;

use thiserror::Error;

use crate::adapters::{AdapterError, ObjectStore};
use crate::chain::{ChainError, ChainManager};
use crate::edit::{
    original_key, ChainEntry, Edit, EditStatus, FailureReason, ProcessingStage, StatusSnapshot,
};
use crate::error::{ErrorKind, ValidationError};
use crate::queue::{QueueError, TaskQueue};
use crate::store::{EditStore, StoreError};

/// Where the image to edit comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// An object that already exists in object storage.
    Reference(String),
    /// Raw bytes, uploaded under `originals/` before the edit is created.
    Bytes(Vec<u8>),
    /// The result image of the parent edit.
    Parent,
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub prompt: String,
    pub image: ImageSource,
    pub parent_id: Option<String>,
    /// Prompt already enhanced by the caller; the enhancement stage is skipped.
    pub enhanced_prompt: Option<String>,
}

impl SubmitRequest {
    pub fn new(prompt: impl Into<String>, image: ImageSource) -> Self {
        Self {
            prompt: prompt.into(),
            image,
            parent_id: None,
            enhanced_prompt: None,
        }
    }

    /// A follow-up edit of `parent_id`, working on the parent's result.
    pub fn follow_up(prompt: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image: ImageSource::Parent,
            parent_id: Some(parent_id.into()),
            enhanced_prompt: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Invalid submission: {0}")]
    Validation(#[from] ValidationError),

    #[error("Chain error: {0}")]
    Chain(ChainError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to enqueue edit: {0}")]
    Queue(#[from] QueueError),

    #[error("Failed to upload original image: {0}")]
    Upload(#[source] AdapterError),
}

impl From<ChainError> for SubmitError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Validation(e) => SubmitError::Validation(e),
            other => SubmitError::Chain(other),
        }
    }
}

pub struct EditService {
    store: EditStore,
    chain: ChainManager,
    queue: Arc<dyn TaskQueue>,
    objects: Arc<dyn ObjectStore>,
    max_prompt_chars: usize,
}

impl EditService {
    pub fn new(
        store: EditStore,
        chain: ChainManager,
        queue: Arc<dyn TaskQueue>,
        objects: Arc<dyn ObjectStore>,
        max_prompt_chars: usize,
    ) -> Self {
        Self {
            store,
            chain,
            queue,
            objects,
            max_prompt_chars,
        }
    }

    /// Validates, records and enqueues a new edit.
    ///
    /// Validation failures are returned before anything is written.
    pub fn submit(&self, request: SubmitRequest) -> Result<Edit, SubmitError> {
        let prompt = validate_prompt(&request.prompt, self.max_prompt_chars)?;

        let mut edit = Edit::new(prompt, "");
        let parent = self.chain.attach(&mut edit, request.parent_id.as_deref())?;

        edit.original_image_ref = match request.image {
            ImageSource::Reference(reference) => {
                if reference.trim().is_empty() {
                    return Err(ValidationError::EmptyImage.into());
                }
                reference
            }
            ImageSource::Parent => {
                let parent = parent.ok_or(ValidationError::MissingParent)?;
                match parent.result_image_ref {
                    Some(reference) if parent.status == EditStatus::Completed => reference,
                    _ => {
                        return Err(ValidationError::ParentNotReady {
                            id: parent.id,
                            status: parent.status.to_string(),
                        }
                        .into())
                    }
                }
            }
            ImageSource::Bytes(bytes) => {
                if bytes.is_empty() {
                    return Err(ValidationError::EmptyImage.into());
                }
                self.objects
                    .put(&original_key(&edit.id), &bytes)
                    .map_err(SubmitError::Upload)?
            }
        };

        edit.enhanced_prompt = request
            .enhanced_prompt
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        self.store.create(&edit)?;
        if let Err(e) = self.queue.enqueue(&edit.id) {
            self.abandon(&edit.id, &e);
            return Err(e.into());
        }
        log::info!(
            "Submitted edit {} (chain position {})",
            edit.id,
            edit.chain_position
        );
        Ok(edit)
    }

    /// Fails an edit that was recorded but never reached the queue, so it
    /// does not sit in `pending` with nothing to process it.
    fn abandon(&self, id: &str, err: &QueueError) {
        log::error!("Failed to enqueue edit {}: {}", id, err);
        let reason = FailureReason::new(
            ProcessingStage::Pending,
            ErrorKind::Transient,
            format!("Failed to enqueue edit: {}", err),
        );
        if let Err(e) = self.store.update_status(
            id,
            EditStatus::Failed,
            Some(&reason),
            ProcessingStage::Failed.message(),
        ) {
            log::error!("Edit {} is stranded in pending: {}", id, e);
        }
    }

    pub fn status(&self, id: &str) -> Result<StatusSnapshot, StoreError> {
        self.store.snapshot(id)
    }

    pub fn history(&self, id: &str) -> Result<Vec<ChainEntry>, ChainError> {
        self.chain.history(id)
    }
}

fn validate_prompt(prompt: &str, max_chars: usize) -> Result<String, ValidationError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(ValidationError::EmptyPrompt);
    }
    let len = prompt.chars().count();
    if len > max_chars {
        return Err(ValidationError::PromptTooLong {
            len,
            max: max_chars,
        });
    }
    Ok(prompt.to_string())
}
