//! Narrow clients for the external services a pipeline run depends on.

use std::sync::Arc;

pub mod error;
pub mod factory;
pub mod flux;
pub mod fs_store;
pub mod gemini;
pub mod memory;
pub mod openai;
pub mod prompt;

pub use error::AdapterError;
pub use factory::HttpAdapterFactory;
pub use flux::FluxImageGenerator;
pub use fs_store::FsObjectStore;
pub use gemini::GeminiPromptEnhancer;
pub use memory::MemoryObjectStore;
pub use openai::OpenAiPromptEnhancer;

/// Rewrites a user prompt into a more precise edit instruction.
pub trait PromptEnhancer: Send + Sync {
    fn enhance(&self, prompt: &str, image: &[u8]) -> Result<String, AdapterError>;
}

/// Identifies a generation job running at the image service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationHandle {
    pub id: String,
    pub polling_url: String,
}

/// State of a generation job as last reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationPoll {
    Pending,
    Ready(Vec<u8>),
}

/// Asynchronous image generation: submit once, then poll until ready.
pub trait ImageGenerator: Send + Sync {
    fn submit(&self, prompt: &str, image: &[u8]) -> Result<GenerationHandle, AdapterError>;
    fn poll(&self, handle: &GenerationHandle) -> Result<GenerationPoll, AdapterError>;
}

/// Key/value blob storage. `put` under the same key is idempotent.
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` under `key` and returns a reference to the object.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<String, AdapterError>;

    /// Loads the object behind a reference returned by `put` or `head`.
    fn get(&self, reference: &str) -> Result<Vec<u8>, AdapterError>;

    /// Reference of the object under `key`, if one exists.
    fn head(&self, key: &str) -> Result<Option<String>, AdapterError>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<String, AdapterError> {
        (**self).put(key, bytes)
    }

    fn get(&self, reference: &str) -> Result<Vec<u8>, AdapterError> {
        (**self).get(reference)
    }

    fn head(&self, key: &str) -> Result<Option<String>, AdapterError> {
        (**self).head(key)
    }
}

/// The adapter set owned by one worker.
pub struct Adapters {
    pub enhancer: Option<Box<dyn PromptEnhancer>>,
    pub generator: Box<dyn ImageGenerator>,
    pub objects: Box<dyn ObjectStore>,
}

/// Builds a fresh adapter set for each worker.
pub trait AdapterFactory: Send + Sync {
    fn build(&self) -> Result<Adapters, AdapterError>;
}

impl<F> AdapterFactory for F
where
    F: Fn() -> Result<Adapters, AdapterError> + Send + Sync,
{
    fn build(&self) -> Result<Adapters, AdapterError> {
        self()
    }
}
