//! Builds production adapter sets from configuration.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::config::{Config, EnhancerProvider};
use crate::error::ConfigError;
use crate::secrets::expand_home;

use super::{
    AdapterError, AdapterFactory, Adapters, FluxImageGenerator, FsObjectStore,
    GeminiPromptEnhancer, ObjectStore, OpenAiPromptEnhancer, PromptEnhancer,
};

struct EnhancerSettings {
    provider: EnhancerProvider,
    endpoint: String,
    model: String,
    api_key: SecretString,
    max_image_dimension: u32,
    timeout: Duration,
}

/// HTTP clients for the enhancer and generator over a shared filesystem
/// object store. Secrets are resolved once, when the factory is built.
pub struct HttpAdapterFactory {
    enhancer: Option<EnhancerSettings>,
    generator_endpoint: String,
    generator_key: SecretString,
    safety_tolerance: u8,
    generator_timeout: Duration,
    objects: Arc<FsObjectStore>,
}

impl HttpAdapterFactory {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let enhancer = if !config.enhancer.enabled {
            None
        } else if !config.enhancer.key.is_configured() {
            log::warn!("Prompt enhancement is enabled but no API key is configured; skipping it");
            None
        } else {
            log::info!(
                "Prompt enhancement via {:?} model {}",
                config.enhancer.provider,
                config.enhancer.model()
            );
            Some(EnhancerSettings {
                provider: config.enhancer.provider,
                endpoint: config.enhancer.endpoint().to_string(),
                model: config.enhancer.model().to_string(),
                api_key: config.enhancer.key.resolve("enhancer.api_key")?,
                max_image_dimension: config.enhancer.max_image_dimension,
                timeout: Duration::from_secs(config.enhancer.timeout_secs),
            })
        };

        let generator_key = config.generator.key.resolve("generator.api_key")?;

        let mut objects = FsObjectStore::new(expand_home(&config.storage.root.to_string_lossy()));
        if let Some(base) = &config.storage.public_base_url {
            objects = objects.with_public_base_url(base.clone());
        }

        Ok(Self {
            enhancer,
            generator_endpoint: config.generator.endpoint.clone(),
            generator_key,
            safety_tolerance: config.generator.safety_tolerance,
            generator_timeout: Duration::from_secs(config.generator.timeout_secs),
            objects: Arc::new(objects),
        })
    }

    /// The object store shared by every adapter set, for the submission side.
    pub fn object_store(&self) -> Arc<dyn ObjectStore> {
        self.objects.clone()
    }
}

impl AdapterFactory for HttpAdapterFactory {
    fn build(&self) -> Result<Adapters, AdapterError> {
        let enhancer = match &self.enhancer {
            Some(settings) => Some(build_enhancer(settings)?),
            None => None,
        };

        let generator = FluxImageGenerator::new(
            self.generator_endpoint.clone(),
            self.generator_key.clone(),
            self.safety_tolerance,
            self.generator_timeout,
        )?;

        Ok(Adapters {
            enhancer,
            generator: Box::new(generator),
            objects: Box::new(Arc::clone(&self.objects)),
        })
    }
}

fn build_enhancer(settings: &EnhancerSettings) -> Result<Box<dyn PromptEnhancer>, AdapterError> {
    Ok(match settings.provider {
        EnhancerProvider::OpenAi => Box::new(OpenAiPromptEnhancer::new(
            settings.endpoint.clone(),
            settings.model.clone(),
            settings.api_key.clone(),
            settings.max_image_dimension,
            settings.timeout,
        )?),
        EnhancerProvider::Gemini => Box::new(GeminiPromptEnhancer::new(
            &settings.endpoint,
            &settings.model,
            settings.api_key.clone(),
            settings.max_image_dimension,
            settings.timeout,
        )?),
    })
}
