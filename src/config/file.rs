//! Configuration file support
//!
//! ## Example Configuration
//!
//! ```toml
//! # feature-materializer.toml
//!
//! [project]
//! name = "fraud"
//!
//! [engine]
//! warehouse_dir = "/var/lib/feature-materializer/warehouse"
//! default_parallelism = 4
//!
//! [kafka]
//! bootstrap_servers = "broker-1:9092"
//! security_protocol = "SSL"
//!
//! [kafka.extra]
//! acks = "all"
//!
//! [streaming]
//! output_mode = "append"
//! await_timeout_ms = 60000
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use super::MaterializerConfig;
use crate::error::{FeatureStoreError, Result};
use std::path::{Path, PathBuf};

/// File name searched by [`load_default`]
pub const CONFIG_FILE_NAME: &str = "feature-materializer.toml";

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<MaterializerConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        FeatureStoreError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;

    toml::from_str(&contents).map_err(|e| {
        FeatureStoreError::Config(format!("Failed to parse config file {:?}: {}", path, e))
    })
}

/// Candidate locations, in search order
///
/// 1. ./feature-materializer.toml
/// 2. ~/.config/feature-materializer/feature-materializer.toml
pub fn default_paths() -> Vec<PathBuf> {
    [
        PathBuf::from(CONFIG_FILE_NAME),
        dirs::config_dir()
            .map(|p| p.join("feature-materializer").join(CONFIG_FILE_NAME))
            .unwrap_or_default(),
    ]
    .into_iter()
    .filter(|p| !p.as_os_str().is_empty())
    .collect()
}

/// Try to load configuration from the default locations
pub fn load_default() -> Option<MaterializerConfig> {
    for path in default_paths() {
        if path.exists() {
            match load(&path) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {:?}", path);
                    return Some(config);
                }
                Err(e) => {
                    tracing::warn!("Failed to load config from {:?}: {}", path, e);
                }
            }
        }
    }

    None
}

/// Generate an example configuration file
pub fn generate_example() -> String {
    r#"# Feature materializer configuration
# Copy to feature-materializer.toml and customize as needed
#
# Environment variables override this file:
#   FM_PROJECT_NAME, FM_WAREHOUSE_DIR,
#   FM_KAFKA_BOOTSTRAP_SERVERS, FM_CHECKPOINT_ROOT

[project]
name = "default"

[engine]
# Root of tables and relative paths written by the local engine
warehouse_dir = "./warehouse"
# staging_dir = "./warehouse/.staging"
default_parallelism = 1

[kafka]
bootstrap_servers = "localhost:9092"
# security_protocol = "SSL"

[kafka.extra]
# acks = "all"

[streaming]
# checkpoint_root = "/Projects/default/Resources"
output_mode = "append"
# await_timeout_ms = 60000

[logging]
# level = "info,feature_materializer=debug"
format = "pretty"
ansi = true
"#
    .to_string()
}
