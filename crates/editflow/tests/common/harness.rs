//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` struct provides a complete in-process environment:
//! - An in-memory SQLite database behind an `EditStore` with a moka status cache
//! - A `MemoryObjectStore` for originals and results
//! - A `ChannelQueue` and an `EditService` on top of them
//! - Pipelines built from scripted adapters with millisecond retry delays

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use editflow::adapters::{Adapters, MemoryObjectStore, PromptEnhancer};
use editflow::db::Database;
use editflow::pipeline::{Pipeline, PipelineConfig};
use editflow::queue::{ChannelQueue, TaskQueue};
use editflow::store::{EditStore, MokaStatusCache, StatusCache};
use editflow::{
    ChainManager, Edit, EditService, ImageSource, ProcessingStage, RetryPolicy, SubmitRequest,
};

use super::fakes::{png, ScriptedEnhancer, ScriptedGenerator};

const FAST_RETRY: Duration = Duration::from_millis(1);

/// Isolated environment for integration tests.
pub struct TestHarness {
    pub db: Database,
    pub store: EditStore,
    pub objects: MemoryObjectStore,
    pub queue: Arc<ChannelQueue>,
    pub service: EditService,
}

impl TestHarness {
    /// Harness with a 30 second status TTL and chains of up to 10 edits.
    pub fn new() -> Self {
        Self::with_options(Duration::from_secs(30), 10)
    }

    pub fn with_status_ttl(status_ttl: Duration) -> Self {
        Self::with_options(status_ttl, 10)
    }

    pub fn with_max_chain_length(max_length: u32) -> Self {
        Self::with_options(Duration::from_secs(30), max_length)
    }

    pub fn with_options(status_ttl: Duration, max_chain_length: u32) -> Self {
        Self::build(Arc::new(MokaStatusCache::new(1_000)), status_ttl, max_chain_length)
    }

    /// Harness whose store writes through `cache`.
    pub fn with_cache(cache: Arc<dyn StatusCache>) -> Self {
        Self::build(cache, Duration::from_secs(30), 10)
    }

    fn build(cache: Arc<dyn StatusCache>, status_ttl: Duration, max_chain_length: u32) -> Self {
        let db = Database::open_in_memory().expect("Failed to create test database");
        let store = EditStore::new(db.clone(), cache, status_ttl);
        let objects = MemoryObjectStore::new();
        let queue = Arc::new(ChannelQueue::new());
        // Zero TTL: history is always read from the store.
        let chain = ChainManager::new(store.clone(), max_chain_length, Duration::ZERO);
        let service = EditService::new(
            store.clone(),
            chain,
            queue.clone() as Arc<dyn TaskQueue>,
            Arc::new(objects.clone()),
            2_000,
        );

        Self {
            db,
            store,
            objects,
            queue,
            service,
        }
    }

    /// Submits a root edit of a freshly generated PNG.
    pub fn submit_root(&self, prompt: &str) -> Edit {
        self.service
            .submit(SubmitRequest::new(prompt, ImageSource::Bytes(png(8, 8))))
            .expect("root submission should be accepted")
    }

    /// Pipeline settings with millisecond delays so retries don't slow tests.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            ai_poll_interval: Duration::from_millis(1),
            ai_timeout: Duration::from_secs(5),
            ..PipelineConfig::default()
        }
        .with_retry(
            ProcessingStage::EnhancingPrompt,
            RetryPolicy::fixed(2, FAST_RETRY),
        )
        .with_retry(ProcessingStage::FetchingImage, RetryPolicy::fixed(3, FAST_RETRY))
        .with_retry(
            ProcessingStage::UploadingResult,
            RetryPolicy::fixed(3, FAST_RETRY),
        )
    }

    pub fn adapters(
        &self,
        enhancer: Option<&ScriptedEnhancer>,
        generator: &ScriptedGenerator,
    ) -> Adapters {
        Adapters {
            enhancer: enhancer.map(|e| Box::new(e.clone()) as Box<dyn PromptEnhancer>),
            generator: Box::new(generator.clone()),
            objects: Box::new(self.objects.clone()),
        }
    }

    pub fn pipeline(
        &self,
        enhancer: Option<&ScriptedEnhancer>,
        generator: &ScriptedGenerator,
    ) -> Pipeline {
        Pipeline::new(
            Arc::new(self.pipeline_config()),
            self.store.clone(),
            self.adapters(enhancer, generator),
        )
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
