pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, validate_config};
pub use schema::{
    AiConfig, ApiKeySource, CacheConfig, ChainConfig, Config, EnhancerConfig, EnhancerProvider,
    GeneratorConfig, LoggingConfig, QueueConfig, QueueKind, StageRetryConfig, StorageConfig, SubmissionConfig,
};
