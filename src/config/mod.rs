//! Configuration for the feature materializer
//!
//! - `file` - TOML loading
//!
//! Configuration is layered with this precedence:
//! 1. **Environment variables** (highest priority) - `FM_*` prefix
//! 2. **Config file** - TOML, see [`MaterializerConfig::load_default`]
//! 3. **Built-in defaults** (lowest priority)
//!
//! Nothing here is global. Engine settings produced for a write, such as
//! connector credentials, live in a call-scoped
//! [`EngineConf`](crate::connector::EngineConf) instead.

pub mod file;

use crate::engine::{LocalEngine, Options};
use crate::error::{FeatureStoreError, Result};
use crate::featurestore::TrainingDatasetWriter;
use crate::sink::{
    BrokerWriter, FeatureGroupWriter, OfflineWriter, OnlineWriter, OutputMode, StreamWriteOptions,
    TimeTravelEngine,
};
use crate::tracing::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default project name
pub const DEFAULT_PROJECT: &str = "default";

/// Default warehouse directory of the local engine
pub const DEFAULT_WAREHOUSE_DIR: &str = "./warehouse";

/// Default number of part files per write
pub const DEFAULT_PARALLELISM: usize = 1;

/// Default broker address
pub const DEFAULT_BOOTSTRAP_SERVERS: &str = "localhost:9092";

/// Environment variables read by [`MaterializerConfig::apply_env_overrides`]
pub const ENV_PROJECT_NAME: &str = "FM_PROJECT_NAME";
pub const ENV_WAREHOUSE_DIR: &str = "FM_WAREHOUSE_DIR";
pub const ENV_KAFKA_BOOTSTRAP_SERVERS: &str = "FM_KAFKA_BOOTSTRAP_SERVERS";
pub const ENV_CHECKPOINT_ROOT: &str = "FM_CHECKPOINT_ROOT";

/// Complete materializer configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterializerConfig {
    pub project: ProjectConfig,
    pub engine: EngineConfig,
    pub kafka: KafkaConfig,
    pub streaming: StreamingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_PROJECT.to_string(),
        }
    }
}

/// Local execution engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub warehouse_dir: PathBuf,
    /// Where connector key files are staged; `<warehouse_dir>/.staging` when unset
    pub staging_dir: Option<PathBuf>,
    pub default_parallelism: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            warehouse_dir: PathBuf::from(DEFAULT_WAREHOUSE_DIR),
            staging_dir: None,
            default_parallelism: DEFAULT_PARALLELISM,
        }
    }
}

impl EngineConfig {
    pub fn local_engine(&self) -> LocalEngine {
        let engine =
            LocalEngine::new(&self.warehouse_dir).with_parallelism(self.default_parallelism);
        match &self.staging_dir {
            Some(dir) => engine.with_staging_dir(dir),
            None => engine,
        }
    }
}

/// Broker settings for the online sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub security_protocol: Option<String>,
    /// Additional producer properties, without the `kafka.` prefix
    pub extra: BTreeMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: DEFAULT_BOOTSTRAP_SERVERS.to_string(),
            security_protocol: None,
            extra: BTreeMap::new(),
        }
    }
}

impl KafkaConfig {
    /// Producer properties as write options, keyed `kafka.<property>`
    pub fn write_options(&self) -> Options {
        let mut options: Options = self
            .extra
            .iter()
            .map(|(k, v)| (format!("kafka.{}", k), v.clone()))
            .collect();
        options.insert(
            "kafka.bootstrap.servers".to_string(),
            self.bootstrap_servers.clone(),
        );
        if let Some(protocol) = &self.security_protocol {
            options.insert("kafka.security.protocol".to_string(), protocol.clone());
        }
        options
    }
}

/// Streaming write settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Checkpoint root; `/Projects/{project}/Resources` when unset
    pub checkpoint_root: Option<String>,
    pub output_mode: OutputMode,
    /// Timeout of `await_termination`; wait forever when unset
    pub await_timeout_ms: Option<u64>,
}

impl StreamingConfig {
    pub fn checkpoint_root(&self, project: &str) -> String {
        self.checkpoint_root
            .clone()
            .unwrap_or_else(|| format!("/Projects/{}/Resources", project))
    }

    /// Stream options seeded with the configured mode and timeout
    pub fn stream_write_options(&self) -> StreamWriteOptions {
        StreamWriteOptions {
            output_mode: self.output_mode,
            timeout: self.await_timeout_ms.map(Duration::from_millis),
            ..StreamWriteOptions::default()
        }
    }
}

impl MaterializerConfig {
    /// Load a config file, apply environment overrides and validate
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let mut config = file::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load), over the default locations
    ///
    /// Falls back to built-in defaults when no file is found.
    pub fn load_default() -> Result<Self> {
        let mut config = file::load_default().unwrap_or_default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup(ENV_PROJECT_NAME) {
            debug!(name = %name, "Project name from environment");
            self.project.name = name;
        }
        if let Some(dir) = lookup(ENV_WAREHOUSE_DIR) {
            self.engine.warehouse_dir = PathBuf::from(dir);
        }
        if let Some(servers) = lookup(ENV_KAFKA_BOOTSTRAP_SERVERS) {
            self.kafka.bootstrap_servers = servers;
        }
        if let Some(root) = lookup(ENV_CHECKPOINT_ROOT) {
            self.streaming.checkpoint_root = Some(root);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.project.name.trim().is_empty() {
            return Err(FeatureStoreError::Config(
                "project.name must not be empty".to_string(),
            ));
        }
        if self.engine.default_parallelism == 0 {
            return Err(FeatureStoreError::Config(
                "engine.default_parallelism must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Checkpoint root of streaming queries, as a local path
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.engine
            .local_engine()
            .resolve(&self.streaming.checkpoint_root(&self.project.name))
    }

    pub fn online_writer(&self, broker: Arc<dyn BrokerWriter>) -> OnlineWriter {
        OnlineWriter::new(broker)
            .with_kafka_options(self.kafka.write_options())
            .with_checkpoint_root(self.checkpoint_dir())
    }

    /// Feature group writer over the local engine
    pub fn feature_group_writer(
        &self,
        broker: Arc<dyn BrokerWriter>,
        time_travel: Arc<dyn TimeTravelEngine>,
    ) -> FeatureGroupWriter {
        let offline = OfflineWriter::new(Arc::new(self.engine.local_engine()), time_travel);
        FeatureGroupWriter::new(offline, self.online_writer(broker))
    }

    /// Training dataset writer over the local engine
    pub fn training_dataset_writer(&self) -> TrainingDatasetWriter {
        TrainingDatasetWriter::new(Arc::new(self.engine.local_engine()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_validate() {
        let config = MaterializerConfig::default();
        config.validate().unwrap();
        assert_eq!(
            config.streaming.checkpoint_root(&config.project.name),
            "/Projects/default/Resources"
        );
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = MaterializerConfig::default();
        config.project.name = "  ".into();
        assert!(matches!(config.validate(), Err(FeatureStoreError::Config(_))));

        let mut config = MaterializerConfig::default();
        config.engine.default_parallelism = 0;
        assert!(matches!(config.validate(), Err(FeatureStoreError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_PROJECT_NAME, "fraud"),
            (ENV_KAFKA_BOOTSTRAP_SERVERS, "broker-1:9092,broker-2:9092"),
        ]
        .into_iter()
        .collect();
        let mut config = MaterializerConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.project.name, "fraud");
        assert_eq!(
            config.streaming.checkpoint_root(&config.project.name),
            "/Projects/fraud/Resources"
        );
        assert_eq!(config.kafka.bootstrap_servers, "broker-1:9092,broker-2:9092");
        assert_eq!(config.engine.warehouse_dir, PathBuf::from(DEFAULT_WAREHOUSE_DIR));
    }

    #[test]
    fn test_kafka_write_options() {
        let mut kafka = KafkaConfig::default();
        kafka.security_protocol = Some("SSL".into());
        kafka.extra.insert("acks".into(), "all".into());
        let options = kafka.write_options();
        assert_eq!(options.get("kafka.acks").map(String::as_str), Some("all"));
        assert_eq!(
            options.get("kafka.bootstrap.servers").map(String::as_str),
            Some(DEFAULT_BOOTSTRAP_SERVERS)
        );
        assert_eq!(
            options.get("kafka.security.protocol").map(String::as_str),
            Some("SSL")
        );
    }

    #[test]
    fn test_checkpoint_dir_below_warehouse() {
        let mut config = MaterializerConfig::default();
        config.engine.warehouse_dir = PathBuf::from("/data/warehouse");
        assert_eq!(
            config.checkpoint_dir(),
            PathBuf::from("/Projects/default/Resources")
        );
        config.streaming.checkpoint_root = Some("hdfs:///Projects/p/Resources".into());
        assert_eq!(
            config.checkpoint_dir(),
            PathBuf::from("/data/warehouse/hdfs/Projects/p/Resources")
        );
    }

    #[test]
    fn test_stream_write_options() {
        let streaming = StreamingConfig {
            checkpoint_root: None,
            output_mode: OutputMode::Update,
            await_timeout_ms: Some(1500),
        };
        let options = streaming.stream_write_options();
        assert_eq!(options.output_mode, OutputMode::Update);
        assert_eq!(options.timeout, Some(Duration::from_millis(1500)));
        assert!(!options.await_termination);
    }
}
