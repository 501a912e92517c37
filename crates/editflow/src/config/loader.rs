use std::path::Path;
use std::time::Duration;

use crate::config::schema::{Config, QueueKind, StageRetryConfig};
use crate::edit::ProcessingStage;
use crate::error::ConfigError;
use crate::pipeline::{stages, PipelineConfig};

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks the schema cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be greater than 0".to_string(),
        });
    }

    if config.chain.max_length == 0 {
        return Err(ConfigError::Validation {
            message: "chain.max_length must be at least 1".to_string(),
        });
    }

    for (name, retry) in &config.stages {
        let stage = ProcessingStage::parse(name).ok_or_else(|| ConfigError::InvalidStage {
            stage: name.clone(),
            reason: "unknown stage".to_string(),
        })?;
        let spec = stages::spec_for(stage).ok_or_else(|| ConfigError::InvalidStage {
            stage: name.clone(),
            reason: "stage does no work and cannot be retried".to_string(),
        })?;
        if !spec.retries_allowed {
            return Err(ConfigError::InvalidStage {
                stage: name.clone(),
                reason: "stage never retries".to_string(),
            });
        }
        validate_retry(retry).map_err(|reason| ConfigError::InvalidStage {
            stage: name.clone(),
            reason,
        })?;
    }

    validate_retry(&config.infra_retry).map_err(|reason| ConfigError::Validation {
        message: format!("infra_retry: {}", reason),
    })?;

    // A lease that expires mid-run hands the edit to a second worker.
    if config.queue.kind == QueueKind::Durable {
        let budget = worst_case_run(config);
        if Duration::from_secs(config.queue.lease_secs) <= budget {
            return Err(ConfigError::Validation {
                message: format!(
                    "queue.lease_secs ({}) must exceed the longest possible run ({}s)",
                    config.queue.lease_secs,
                    budget.as_secs()
                ),
            });
        }
    }

    Ok(())
}

/// Longest one delivery can take: the generation timeout and submit call,
/// every retry sleep, and every enhancer call running into its timeout.
pub fn worst_case_run(config: &Config) -> Duration {
    let pipeline = PipelineConfig::from_config(config);
    let mut total = Duration::from_secs(config.ai.timeout_secs)
        + Duration::from_secs(config.generator.timeout_secs);

    for spec in stages::STAGES.iter().filter(|spec| spec.retries_allowed) {
        let policy = pipeline.retry_policy(spec.stage);
        total += (1..=policy.max_retries)
            .map(|retry| policy.delay_for(retry))
            .sum::<Duration>();
    }

    if config.enhancer.enabled {
        let attempts = pipeline
            .retry_policy(ProcessingStage::EnhancingPrompt)
            .attempts();
        total += Duration::from_secs(config.enhancer.timeout_secs) * attempts;
    }
    total
}

fn validate_retry(retry: &StageRetryConfig) -> Result<(), String> {
    if !retry.backoff.is_finite() || retry.backoff < 1.0 {
        return Err(format!("backoff must be >= 1.0, got {}", retry.backoff));
    }
    if let Some(max_delay_ms) = retry.max_delay_ms {
        if max_delay_ms < retry.delay_ms {
            return Err(format!(
                "max_delay_ms ({}) is shorter than delay_ms ({})",
                max_delay_ms, retry.delay_ms
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::QueueKind;

    #[test]
    fn test_load_valid_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "worker_count": 4,
            "queue": { "kind": "memory", "max_deliveries": 3 },
            "stages": {
                "enhancing_prompt": { "max_retries": 2, "delay_ms": 2000 },
                "uploading_result": { "max_retries": 3, "delay_ms": 10000, "backoff": 2.0, "max_delay_ms": 60000 }
            },
            "generator": { "api_key_env": "BFL_API_KEY" },
            "storage": { "root": "/var/lib/editflow/objects" }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.queue.kind, QueueKind::Memory);
        assert_eq!(config.queue.max_deliveries, 3);
        assert_eq!(config.stages.len(), 2);
        assert_eq!(
            config
                .stage_retry(ProcessingStage::EnhancingPrompt)
                .map(|p| p.max_retries),
            Some(2)
        );
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("editflow.json");
        std::fs::write(&path, r#"{"version": "1.0", "worker_count": 2}"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.worker_count, 2);

        let missing = load_config(dir.path().join("nope.json"));
        assert!(matches!(missing, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_invalid_version() {
        let result = load_config_from_str(r#"{"version": "2.0"}"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = load_config_from_str(r#"{"version": "1.0", "worker_count": 0}"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_zero_workers_rejected_semantically() {
        let mut config = load_config_from_str(r#"{"version": "1.0"}"#).unwrap();
        config.worker_count = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_unknown_stage_rejected() {
        let result = load_config_from_str(
            r#"{"version": "1.0", "stages": {"sharpening": {"max_retries": 1}}}"#,
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidStage { stage, .. }) if stage == "sharpening"
        ));
    }

    #[test]
    fn test_ai_processing_retries_rejected() {
        let result = load_config_from_str(
            r#"{"version": "1.0", "stages": {"ai_processing": {"max_retries": 1}}}"#,
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidStage { stage, .. }) if stage == "ai_processing"
        ));
    }

    #[test]
    fn test_terminal_stage_rejected() {
        let result = load_config_from_str(
            r#"{"version": "1.0", "stages": {"completed": {"max_retries": 1}}}"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidStage { .. })));
    }

    #[test]
    fn test_max_delay_shorter_than_delay_rejected() {
        let result = load_config_from_str(
            r#"{"version": "1.0", "stages": {"fetching_image": {"max_retries": 1, "delay_ms": 500, "max_delay_ms": 100}}}"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidStage { .. })));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = load_config_from_str(r#"{"version": "1.0", "input_directory": "/in"}"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_invalid_json() {
        let result = load_config_from_str("{ not json");
        assert!(matches!(result, Err(ConfigError::ParseJson(_))));
    }
}
