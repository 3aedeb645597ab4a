//! Feature definitions
//!
//! A feature is one typed column of a feature group or training dataset.
//! Types are carried as engine type strings (`bigint`, `array<double>`, ...)
//! because that is how they are stored in feature-store metadata.

use crate::dataset::DataType;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Feature of a feature group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    /// Feature name, always lower-case
    pub name: String,
    /// Engine type string
    pub feature_type: String,
    /// Part of the primary key
    pub primary: bool,
    /// Part of the partition key
    pub partition: bool,
    /// Description
    pub description: Option<String>,
    /// Pre-combine column for time-travel upserts
    pub hudi_precombine_key: bool,
}

impl Feature {
    /// Create a new feature
    pub fn new(name: impl Into<String>, feature_type: impl Into<String>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            feature_type: feature_type.into(),
            primary: false,
            partition: false,
            description: None,
            hudi_precombine_key: false,
        }
    }

    /// Mark as primary key
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Mark as partition key
    pub fn partition(mut self) -> Self {
        self.partition = true;
        self
    }

    /// Mark as pre-combine key
    pub fn precombine(mut self) -> Self {
        self.hudi_precombine_key = true;
        self
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Nested features are sub-encoded on the online wire
    pub fn is_complex(&self) -> bool {
        let upper = self.feature_type.trim_start().to_uppercase();
        upper.starts_with("ARRAY") || upper.starts_with("STRUCT") || upper.starts_with("MAP")
    }

    /// Parsed engine type
    pub fn data_type(&self) -> Result<DataType> {
        self.feature_type.parse()
    }
}

/// Feature of a training dataset, ordered by `index`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingDatasetFeature {
    pub name: String,
    pub feature_type: String,
    pub index: usize,
}

impl TrainingDatasetFeature {
    pub fn new(name: impl Into<String>, feature_type: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into().to_lowercase(),
            feature_type: feature_type.into(),
            index,
        }
    }
}
