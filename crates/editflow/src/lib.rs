pub mod adapters;
pub mod chain;
pub mod config;
pub mod db;
pub mod edit;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod secrets;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use adapters::{
    AdapterError, AdapterFactory, Adapters, ImageGenerator, ObjectStore, PromptEnhancer,
};
pub use chain::{ChainError, ChainManager};
pub use config::{load_config, Config};
pub use edit::{ChainEntry, Edit, EditStatus, FailureReason, ProcessingStage, StatusSnapshot};
pub use error::{ConfigError, EditflowError, ErrorKind, Result, ValidationError, WorkerError};
pub use pipeline::{Pipeline, PipelineConfig, PipelineContext, RunOutcome};
pub use queue::{Delivery, QueueError, TaskQueue};
pub use retry::RetryPolicy;
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use service::{EditService, ImageSource, SubmitError, SubmitRequest};
pub use store::{EditStore, StoreError};
pub use worker::{JobOutcome, WorkerPool};
