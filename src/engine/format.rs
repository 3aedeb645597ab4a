//! Data formats and their default read/write options

use super::Options;
use crate::error::{FeatureStoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// File or table format handled by the execution engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Csv,
    Tsv,
    Json,
    #[default]
    Parquet,
    Avro,
    Orc,
    #[serde(alias = "tfrecords")]
    TfRecord,
    Delta,
    Hudi,
    Hive,
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Tsv => "tsv",
            DataFormat::Json => "json",
            DataFormat::Parquet => "parquet",
            DataFormat::Avro => "avro",
            DataFormat::Orc => "orc",
            DataFormat::TfRecord => "tfrecord",
            DataFormat::Delta => "delta",
            DataFormat::Hudi => "hudi",
            DataFormat::Hive => "hive",
        }
    }

    /// Format handed to the engine; TSV is CSV with a tab delimiter
    pub fn engine_format(&self) -> DataFormat {
        match self {
            DataFormat::Tsv => DataFormat::Csv,
            other => *other,
        }
    }

    /// Formats that discover their own files below a location
    ///
    /// Reads of every other format need a recursive `/**` glob.
    pub fn handles_partitions(&self) -> bool {
        matches!(
            self,
            DataFormat::Delta | DataFormat::Parquet | DataFormat::Hudi | DataFormat::Orc
        )
    }

    /// Default options for writes
    pub fn write_defaults(&self) -> Options {
        match self {
            DataFormat::TfRecord => options(&[("recordType", "Example")]),
            DataFormat::Csv => options(&[("delimiter", ","), ("header", "true")]),
            DataFormat::Tsv => options(&[("delimiter", "\t"), ("header", "true")]),
            _ => Options::new(),
        }
    }

    /// Default options for reads
    pub fn read_defaults(&self) -> Options {
        match self {
            DataFormat::TfRecord => options(&[("recordType", "Example")]),
            DataFormat::Csv => options(&[
                ("delimiter", ","),
                ("header", "true"),
                ("inferSchema", "true"),
            ]),
            DataFormat::Tsv => options(&[
                ("delimiter", "\t"),
                ("header", "true"),
                ("inferSchema", "true"),
            ]),
            _ => Options::new(),
        }
    }

    /// Caller options merged key by key over the write defaults
    pub fn write_options(&self, user: &Options) -> Options {
        merge(self.write_defaults(), user)
    }

    /// Caller options merged key by key over the read defaults
    pub fn read_options(&self, user: &Options) -> Options {
        merge(self.read_defaults(), user)
    }

    /// Location to read from, with a recursive glob where needed
    pub fn read_location(&self, location: &str) -> String {
        if self.handles_partitions() {
            location.to_string()
        } else {
            format!("{}/**", location.trim_end_matches('/'))
        }
    }
}

fn options(pairs: &[(&str, &str)]) -> Options {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn merge(mut defaults: Options, user: &Options) -> Options {
    for (k, v) in user {
        defaults.insert(k.clone(), v.clone());
    }
    defaults
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataFormat {
    type Err = FeatureStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(DataFormat::Csv),
            "tsv" => Ok(DataFormat::Tsv),
            "json" => Ok(DataFormat::Json),
            "parquet" => Ok(DataFormat::Parquet),
            "avro" => Ok(DataFormat::Avro),
            "orc" => Ok(DataFormat::Orc),
            "tfrecord" | "tfrecords" => Ok(DataFormat::TfRecord),
            "delta" => Ok(DataFormat::Delta),
            "hudi" => Ok(DataFormat::Hudi),
            "hive" => Ok(DataFormat::Hive),
            other => Err(FeatureStoreError::Config(format!(
                "unsupported data format: {}",
                other
            ))),
        }
    }
}
