//! Logging setup for binaries and tests.

use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    #[default]
    Pretty,
}

/// Installs the global tracing subscriber and routes `log` records into it.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Only the first
/// call has an effect.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let installed = match format {
            LogFormat::Json => tracing::subscriber::set_global_default(
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json()),
            ),
            LogFormat::Pretty => tracing::subscriber::set_global_default(
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty()),
            ),
        };
        if let Err(e) = installed {
            eprintln!("Tracing subscriber already installed: {}", e);
        }
        if let Err(e) = LogTracer::init() {
            eprintln!("Log bridge already installed: {}", e);
        }
    });
}
