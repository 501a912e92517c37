use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapters::AdapterError;
use crate::chain::ChainError;
use crate::db::DatabaseError;
use crate::pipeline::PipelineError;
use crate::queue::QueueError;
use crate::secrets::SecretError;
use crate::service::SubmitError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum EditflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid retry settings for stage '{stage}': {reason}")]
    InvalidStage { stage: String, reason: String },

    #[error("Failed to resolve secret for '{field}': {source}")]
    Secret {
        field: &'static str,
        #[source]
        source: SecretError,
    },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Failed to build adapters for worker {worker_id}: {source}")]
    Adapters {
        worker_id: usize,
        #[source]
        source: AdapterError,
    },
}

/// Rejections raised before any state is written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Prompt must not be empty")]
    EmptyPrompt,

    #[error("Prompt is {len} characters, the limit is {max}")]
    PromptTooLong { len: usize, max: usize },

    #[error("Parent edit '{0}' does not exist")]
    ParentNotFound(String),

    #[error("Parent edit '{id}' has no result image yet (status {status})")]
    ParentNotReady { id: String, status: String },

    #[error("Chain position {position} exceeds the maximum chain length of {max}")]
    ChainTooLong { position: u32, max: u32 },

    #[error("Image source requires a parent edit")]
    MissingParent,

    #[error("Original image is empty")]
    EmptyImage,
}

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transient" => Some(ErrorKind::Transient),
            "permanent" => Some(ErrorKind::Permanent),
            _ => None,
        }
    }

    pub fn is_retryable(self) -> bool {
        self == ErrorKind::Transient
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, EditflowError>;
