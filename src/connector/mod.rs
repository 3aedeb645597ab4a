//! Storage connector adapter
//!
//! Before every physical read or write the adapter refetches the connector's
//! credentials, builds the engine configuration the connector needs and
//! rewrites the destination path where the connector's scheme requires it.
//!
//! The configuration is an [`EngineConf`] value handed to exactly one engine
//! call. Nothing is stored on the engine, so concurrent writes through
//! different connectors cannot observe each other's credentials.

pub mod adls;
pub mod gcs;
pub mod s3;

pub use adls::AdlsConnector;
pub use gcs::GcsConnector;
pub use s3::S3Connector;

use crate::engine::ExecutionEngine;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Engine configuration scoped to a single call
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EngineConf {
    entries: BTreeMap<String, String>,
}

impl EngineConf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key, replacing any previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Set a key only if it has no value yet
    pub fn set_if_unset(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.entry(key.into()).or_insert_with(|| value.into());
    }

    pub fn unset(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// Values carry credentials; only keys are printed
impl fmt::Debug for EngineConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// HopsFS, the cluster's own filesystem; needs no configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopsFsConnector {
    pub name: String,
}

/// JDBC source; paths pass through untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JdbcConnector {
    pub name: String,
    pub connection_string: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,
}

/// Where training dataset files are stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConnector {
    S3(S3Connector),
    Adls(AdlsConnector),
    Gcs(GcsConnector),
    HopsFs(HopsFsConnector),
    Jdbc(JdbcConnector),
}

impl Default for StorageConnector {
    fn default() -> Self {
        StorageConnector::HopsFs(HopsFsConnector::default())
    }
}

impl StorageConnector {
    pub fn name(&self) -> &str {
        match self {
            StorageConnector::S3(c) => &c.name,
            StorageConnector::Adls(c) => &c.name,
            StorageConnector::Gcs(c) => &c.name,
            StorageConnector::HopsFs(c) => &c.name,
            StorageConnector::Jdbc(c) => &c.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StorageConnector::S3(_) => "s3",
            StorageConnector::Adls(_) => "adls",
            StorageConnector::Gcs(_) => "gcs",
            StorageConnector::HopsFs(_) => "hopsfs",
            StorageConnector::Jdbc(_) => "jdbc",
        }
    }
}

/// Source of fresh connector credentials
///
/// Session tokens expire, so connectors are refetched before every use.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn refetch(&self, connector: &StorageConnector) -> Result<StorageConnector>;
}

/// Returns connectors unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticCredentials;

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn refetch(&self, connector: &StorageConnector) -> Result<StorageConnector> {
        Ok(connector.clone())
    }
}

/// Destination path and configuration for one engine call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedDestination {
    pub path: String,
    pub conf: EngineConf,
}

/// Prepares engine configuration from storage connectors
#[derive(Clone)]
pub struct ConnectorAdapter {
    engine: Arc<dyn ExecutionEngine>,
    credentials: Arc<dyn CredentialProvider>,
}

impl ConnectorAdapter {
    pub fn new(engine: Arc<dyn ExecutionEngine>) -> Self {
        Self {
            engine,
            credentials: Arc::new(StaticCredentials),
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Refetch the connector, then build the configuration for `path`
    pub async fn prepare(&self, connector: &StorageConnector, path: &str) -> Result<PreparedDestination> {
        let connector = self.credentials.refetch(connector).await?;
        let mut conf = EngineConf::new();
        let path = match &connector {
            StorageConnector::S3(c) => c.configure(path, &mut conf),
            StorageConnector::Adls(c) => c.configure(path, &mut conf),
            StorageConnector::Gcs(c) => c.configure(path, &mut conf, self.engine.as_ref()).await?,
            StorageConnector::HopsFs(_) | StorageConnector::Jdbc(_) => path.to_string(),
        };
        debug!(
            connector = connector.name(),
            kind = connector.kind(),
            path = %path,
            conf_keys = ?conf,
            "Prepared storage connector"
        );
        Ok(PreparedDestination { path, conf })
    }
}

impl fmt::Debug for ConnectorAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorAdapter").finish_non_exhaustive()
    }
}
