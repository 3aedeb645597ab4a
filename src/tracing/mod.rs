//! Logging setup
//!
//! The crate logs through `tracing` macros. Binaries and tests that want the
//! output call [`init_logging`] once; `RUST_LOG` takes precedence over the
//! configured level.

use crate::error::{FeatureStoreError, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,feature_materializer=debug";

/// Output format of log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `warn,feature_materializer=debug`
    pub level: Option<String>,
    pub format: LogFormat,
    /// Colored output
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: LogFormat::default(),
            ansi: true,
        }
    }
}

impl LoggingConfig {
    fn filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let directive = self.level.as_deref().unwrap_or(DEFAULT_FILTER);
        EnvFilter::try_new(directive)
            .map_err(|e| FeatureStoreError::Config(format!("invalid log level `{}`: {}", directive, e)))
    }
}

/// Install the global subscriber
///
/// Fails instead of panicking when a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = config.filter()?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_ansi(config.ansi))
            .try_init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact().with_ansi(config.ansi))
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_ansi(false))
            .try_init(),
    };
    installed.map_err(|e| FeatureStoreError::Config(format!("failed to install logger: {}", e)))
}
