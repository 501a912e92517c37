use std::collections::HashMap;
use std::time::Duration;

use crate::config::Config;
use crate::edit::ProcessingStage;
use crate::retry::RetryPolicy;

use super::stages::STAGES;

pub struct PipelineConfig {
    pub enhancement_enabled: bool,
    pub retry: HashMap<ProcessingStage, RetryPolicy>,
    pub ai_poll_interval: Duration,
    pub ai_timeout: Duration,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        let retry = STAGES
            .iter()
            .map(|spec| {
                let policy = config
                    .stage_retry(spec.stage)
                    .unwrap_or(spec.default_retry);
                (spec.stage, policy)
            })
            .collect();

        Self {
            enhancement_enabled: config.enhancer.enabled,
            retry,
            ai_poll_interval: Duration::from_millis(config.ai.poll_interval_ms),
            ai_timeout: Duration::from_secs(config.ai.timeout_secs),
        }
    }

    /// Retry policy configured for `stage`; stages without one run once.
    pub fn retry_policy(&self, stage: ProcessingStage) -> RetryPolicy {
        self.retry.get(&stage).copied().unwrap_or(RetryPolicy::NONE)
    }

    pub fn with_retry(mut self, stage: ProcessingStage, policy: RetryPolicy) -> Self {
        self.retry.insert(stage, policy);
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enhancement_enabled: true,
            retry: STAGES
                .iter()
                .map(|spec| (spec.stage, spec.default_retry))
                .collect(),
            ai_poll_interval: Duration::from_millis(500),
            ai_timeout: Duration::from_secs(300),
        }
    }
}
