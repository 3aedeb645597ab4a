//! Google Cloud Storage through the Hadoop GCS connector

use super::EngineConf;
use crate::engine::ExecutionEngine;
use crate::error::Result;
use serde::{Deserialize, Serialize};

const PROPERTY_KEY_FILE: &str = "fs.gs.auth.service.account.json.keyfile";
const PROPERTY_ENCRYPTION_KEY: &str = "fs.gs.encryption.key";
const PROPERTY_ENCRYPTION_HASH: &str = "fs.gs.encryption.key.hash";
const PROPERTY_ALGORITHM: &str = "fs.gs.encryption.algorithm";
const PROPERTY_GCS_FS_KEY: &str = "fs.AbstractFileSystem.gs.impl";
const PROPERTY_GCS_FS_VALUE: &str = "com.google.cloud.hadoop.fs.gcs.GoogleHadoopFS";
const PROPERTY_GCS_ACCOUNT_ENABLE: &str = "google.cloud.auth.service.account.enable";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcsConnector {
    pub name: String,
    pub bucket: Option<String>,
    /// Service account key file on the cluster filesystem
    pub key_path: String,
    pub algorithm: Option<String>,
    pub encryption_key: Option<String>,
    pub encryption_key_hash: Option<String>,
}

impl GcsConnector {
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            ..Default::default()
        }
    }

    pub fn with_encryption(
        mut self,
        algorithm: impl Into<String>,
        key: impl Into<String>,
        key_hash: impl Into<String>,
    ) -> Self {
        self.algorithm = Some(algorithm.into());
        self.encryption_key = Some(key.into());
        self.encryption_key_hash = Some(key_hash.into());
        self
    }

    pub(crate) async fn configure(
        &self,
        path: &str,
        conf: &mut EngineConf,
        engine: &dyn ExecutionEngine,
    ) -> Result<String> {
        conf.set_if_unset(PROPERTY_GCS_FS_KEY, PROPERTY_GCS_FS_VALUE);
        conf.set_if_unset(PROPERTY_GCS_ACCOUNT_ENABLE, "true");

        let local_key = engine
            .stage_file(&format!("hdfs://{}", self.key_path))
            .await?;
        conf.set(PROPERTY_KEY_FILE, local_key.to_string_lossy());

        match self.algorithm.as_deref().filter(|a| !a.is_empty()) {
            Some(algorithm) => {
                conf.set(PROPERTY_ALGORITHM, algorithm);
                conf.set(
                    PROPERTY_ENCRYPTION_KEY,
                    self.encryption_key.clone().unwrap_or_default(),
                );
                conf.set(
                    PROPERTY_ENCRYPTION_HASH,
                    self.encryption_key_hash.clone().unwrap_or_default(),
                );
            }
            None => {
                conf.unset(PROPERTY_ALGORITHM);
                conf.unset(PROPERTY_ENCRYPTION_HASH);
                conf.unset(PROPERTY_ENCRYPTION_KEY);
            }
        }
        Ok(path.to_string())
    }
}
