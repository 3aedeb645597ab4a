//! Execution engine boundary
//!
//! The write core never moves bytes itself. Physical reads and writes go
//! through an [`ExecutionEngine`], which receives the dataset, a [`WriteSpec`]
//! describing format, options, save mode and partitioning, and the call-scoped
//! [`EngineConf`] prepared by the storage connector adapter.
//!
//! [`LocalEngine`] is a filesystem implementation used for local
//! materialization and in tests.

pub mod files;
pub mod format;
pub mod local;

pub use format::DataFormat;
pub use local::LocalEngine;

use crate::connector::EngineConf;
use crate::dataset::Dataset;
use crate::error::{FeatureStoreError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Reader/writer options, ordered for stable logging
pub type Options = BTreeMap<String, String>;

/// Behavior when the destination already holds data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    /// Add new files next to existing ones
    Append,
    /// Replace existing contents
    Overwrite,
    /// Fail if the destination is not empty
    #[default]
    ErrorIfExists,
    /// Do nothing if the destination is not empty
    Ignore,
}

impl fmt::Display for SaveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SaveMode::Append => "append",
            SaveMode::Overwrite => "overwrite",
            SaveMode::ErrorIfExists => "errorifexists",
            SaveMode::Ignore => "ignore",
        };
        f.write_str(s)
    }
}

impl FromStr for SaveMode {
    type Err = FeatureStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "append" => Ok(SaveMode::Append),
            "overwrite" => Ok(SaveMode::Overwrite),
            "errorifexists" | "error" | "default" => Ok(SaveMode::ErrorIfExists),
            "ignore" => Ok(SaveMode::Ignore),
            other => Err(FeatureStoreError::Config(format!(
                "unknown save mode: {}",
                other
            ))),
        }
    }
}

/// Where a write lands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A storage location
    Path(String),
    /// A named table of the warehouse
    Table(String),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Path(p) => write!(f, "path:{}", p),
            Destination::Table(t) => write!(f, "table:{}", t),
        }
    }
}

/// A physical write
#[derive(Debug, Clone, PartialEq)]
pub struct WriteSpec {
    pub format: DataFormat,
    pub options: Options,
    pub mode: SaveMode,
    pub partition_by: Vec<String>,
    pub destination: Destination,
}

impl WriteSpec {
    pub fn new(format: DataFormat, destination: Destination) -> Self {
        Self {
            format,
            options: Options::new(),
            mode: SaveMode::default(),
            partition_by: Vec::new(),
            destination,
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn with_mode(mut self, mode: SaveMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn partitioned_by(mut self, columns: Vec<String>) -> Self {
        self.partition_by = columns;
        self
    }
}

/// A physical read
#[derive(Debug, Clone, PartialEq)]
pub struct ReadSpec {
    pub format: DataFormat,
    pub options: Options,
    pub location: String,
}

/// Physical I/O performed on behalf of the write core
///
/// Every call receives the configuration it must use. Implementations must
/// not keep connector settings between calls.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Write a dataset
    async fn write(&self, dataset: &Dataset, spec: &WriteSpec, conf: &EngineConf) -> Result<()>;

    /// Read a dataset
    async fn read(&self, spec: &ReadSpec, conf: &EngineConf) -> Result<Dataset>;

    /// Copy a remote file to local storage, returning the local path
    async fn stage_file(&self, uri: &str) -> Result<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_mode_parse() {
        assert_eq!("Overwrite".parse::<SaveMode>().unwrap(), SaveMode::Overwrite);
        assert_eq!("error".parse::<SaveMode>().unwrap(), SaveMode::ErrorIfExists);
        assert!("merge".parse::<SaveMode>().is_err());
        assert_eq!(SaveMode::Append.to_string(), "append");
    }

    #[test]
    fn test_write_spec_builder() {
        let spec = WriteSpec::new(DataFormat::Hive, Destination::Table("fg_1".into()))
            .with_mode(SaveMode::Append)
            .partitioned_by(vec!["day".into()]);
        assert_eq!(spec.partition_by, vec!["day".to_string()]);
        assert_eq!(spec.destination.to_string(), "table:fg_1");
    }
}
