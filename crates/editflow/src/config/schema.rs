use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::edit::ProcessingStage;
use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::secrets::{expand_home, has_secret_source, resolve_secret};
use crate::telemetry::LogFormat;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub submission: SubmissionConfig,
    /// Retry settings keyed by stage name.
    #[serde(default)]
    pub stages: BTreeMap<String, StageRetryConfig>,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default = "default_infra_retry")]
    pub infra_retry: StageRetryConfig,
    #[serde(default)]
    pub enhancer: EnhancerConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Configured retry policy for `stage`, if the stage table has one.
    pub fn stage_retry(&self, stage: ProcessingStage) -> Option<RetryPolicy> {
        self.stages.get(stage.as_str()).map(StageRetryConfig::to_policy)
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(expand_home(&path.to_string_lossy())),
            None => crate::db::default_database_path(),
        }
    }
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    /// Leases in the SQLite database; survives restarts.
    #[default]
    Durable,
    /// In-process channel.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub kind: QueueKind,
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,
    #[serde(default = "default_queue_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
}

fn default_lease_secs() -> u64 {
    900
}

fn default_max_deliveries() -> u32 {
    5
}

fn default_queue_poll_interval_ms() -> u64 {
    250
}

fn default_dequeue_timeout_ms() -> u64 {
    1000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            kind: QueueKind::Durable,
            lease_secs: default_lease_secs(),
            max_deliveries: default_max_deliveries(),
            poll_interval_ms: default_queue_poll_interval_ms(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_status_ttl_secs")]
    pub status_ttl_secs: u64,
    #[serde(default = "default_history_ttl_secs")]
    pub history_ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
}

fn default_status_ttl_secs() -> u64 {
    30
}

fn default_history_ttl_secs() -> u64 {
    60
}

fn default_max_entries() -> u64 {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            status_ttl_secs: default_status_ttl_secs(),
            history_ttl_secs: default_history_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_max_chain_length")]
    pub max_length: u32,
}

fn default_max_chain_length() -> u32 {
    10
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_chain_length(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionConfig {
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
}

fn default_max_prompt_chars() -> usize {
    2000
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_prompt_chars: default_max_prompt_chars(),
        }
    }
}

/// Retry settings of one stage. `max_retries` counts re-invocations after
/// the first attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRetryConfig {
    pub max_retries: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff: f64,
    /// Cap on the wait between attempts; defaults to `delay_ms`.
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_backoff() -> f64 {
    1.0
}

fn default_infra_retry() -> StageRetryConfig {
    StageRetryConfig {
        max_retries: 3,
        delay_ms: 100,
        backoff: 2.0,
        max_delay_ms: Some(2000),
    }
}

impl StageRetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        let delay = Duration::from_millis(self.delay_ms);
        let max_delay = Duration::from_millis(self.max_delay_ms.unwrap_or(self.delay_ms));
        RetryPolicy::fixed(self.max_retries, delay).with_backoff(self.backoff, max_delay)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_ai_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ai_poll_interval_ms() -> u64 {
    500
}

fn default_ai_timeout_secs() -> u64 {
    300
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_ai_poll_interval_ms(),
            timeout_secs: default_ai_timeout_secs(),
        }
    }
}

/// Where an API key comes from: inline value, file, or environment variable,
/// tried in that order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeySource {
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl ApiKeySource {
    pub fn is_configured(&self) -> bool {
        has_secret_source(
            self.api_key.as_deref(),
            self.api_key_file.as_deref(),
            self.api_key_env.as_deref(),
        )
    }

    pub fn resolve(&self, field: &'static str) -> Result<SecretString, ConfigError> {
        resolve_secret(
            self.api_key.as_deref(),
            self.api_key_file.as_deref(),
            self.api_key_env.as_deref(),
        )
        .map_err(|source| ConfigError::Secret { field, source })
    }
}

/// Which model API enhances prompts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnhancerProvider {
    /// OpenAI-compatible chat completions.
    #[default]
    OpenAi,
    /// Google Gemini `generateContent`.
    Gemini,
}

impl EnhancerProvider {
    pub fn default_endpoint(self) -> &'static str {
        match self {
            EnhancerProvider::OpenAi => "https://api.openai.com/v1/chat/completions",
            EnhancerProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            EnhancerProvider::OpenAi => "gpt-4o",
            EnhancerProvider::Gemini => "gemini-1.5-flash",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub provider: EnhancerProvider,
    /// Provider default when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Provider default when unset.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,
    #[serde(default = "default_enhancer_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(flatten)]
    pub key: ApiKeySource,
}

impl EnhancerConfig {
    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or_else(|| self.provider.default_endpoint())
    }

    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }
}

fn default_max_image_dimension() -> u32 {
    1024
}

fn default_enhancer_timeout_secs() -> u64 {
    60
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: EnhancerProvider::default(),
            endpoint: None,
            model: None,
            max_image_dimension: default_max_image_dimension(),
            timeout_secs: default_enhancer_timeout_secs(),
            key: ApiKeySource::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_safety_tolerance")]
    pub safety_tolerance: u8,
    #[serde(default = "default_generator_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(flatten)]
    pub key: ApiKeySource,
}

fn default_generator_endpoint() -> String {
    "https://api.bfl.ai/v1/flux-kontext-pro".to_string()
}

fn default_safety_tolerance() -> u8 {
    2
}

fn default_generator_timeout_secs() -> u64 {
    30
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_generator_endpoint(),
            safety_tolerance: default_safety_tolerance(),
            timeout_secs: default_generator_timeout_secs(),
            key: ApiKeySource::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub public_base_url: Option<String>,
}

fn default_storage_root() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".editflow").join("objects"))
        .unwrap_or_else(|| PathBuf::from("editflow-objects"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            public_base_url: None,
        }
    }
}
