//! Feature group metadata
//!
//! A [`FeatureGroupDescriptor`] is immutable for the duration of a write. Its
//! Avro schema is the canonical field order of the online wire value; complex
//! features are re-declared as nullable bytes in the encoded schema because
//! they are sub-encoded before being packed into the value record.

use super::statistics::StatisticsConfig;
use super::validation::{Expectation, ValidationType};
use super::Feature;
use crate::dataset::{Dataset, Field};
use crate::error::{FeatureStoreError, Result, SchemaError};
use crate::schema::avro::dataset_avro_schema;
use apache_avro::Schema as AvroSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeSet;

/// Table layout of the offline store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeTravelFormat {
    /// Plain partitioned table
    #[default]
    None,
    /// Versioned table written through the time-travel engine
    Hudi,
}

/// Metadata of a feature group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureGroupDescriptor {
    /// Feature group name
    pub name: String,
    /// Version
    pub version: u32,
    /// Features in declared order
    pub features: Vec<Feature>,
    /// Primary key feature names
    pub primary_key: BTreeSet<String>,
    /// Partition key feature names, in partition order
    pub partition_key: Vec<String>,
    /// Avro record schema as JSON
    pub avro_schema: String,
    /// Offline table layout
    pub time_travel_format: TimeTravelFormat,
    /// Online storage enabled
    pub online_enabled: bool,
    /// Group is fed by a continuous stream
    pub stream: bool,
    /// Online topic; defaults to `{name}_{version}_onlinefs`
    pub online_topic_name: Option<String>,
    /// Validation behavior on insert
    pub validation_type: ValidationType,
    /// Expectations evaluated on insert
    pub expectations: Vec<Expectation>,
    /// Statistics computed after insert
    pub statistics_config: StatisticsConfig,
}

impl FeatureGroupDescriptor {
    /// Start building a descriptor
    pub fn builder(name: impl Into<String>, version: u32) -> FeatureGroupBuilder {
        FeatureGroupBuilder::new(name, version)
    }

    /// Offline table name, `{name}_{version}`
    pub fn table_name(&self) -> String {
        format!("{}_{}", self.name, self.version)
    }

    /// Topic the online leg writes to
    pub fn topic_name(&self) -> String {
        self.online_topic_name
            .clone()
            .unwrap_or_else(|| format!("{}_onlinefs", self.table_name()))
    }

    pub fn is_time_travel(&self) -> bool {
        self.time_travel_format == TimeTravelFormat::Hudi
    }

    /// Names of features that need binary sub-encoding
    pub fn complex_features(&self) -> Vec<String> {
        self.features
            .iter()
            .filter(|f| f.is_complex())
            .map(|f| f.name.clone())
            .collect()
    }

    /// Primary key names in ascending name order
    pub fn sorted_primary_key(&self) -> Vec<&str> {
        self.primary_key.iter().map(String::as_str).collect()
    }

    pub fn feature(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name == name)
    }

    fn schema_json(&self) -> Result<JsonValue> {
        serde_json::from_str(&self.avro_schema).map_err(|e| {
            SchemaError::InvalidSchema(format!(
                "avro schema of {} is not valid JSON: {}",
                self.table_name(),
                e
            ))
            .into()
        })
    }

    fn avro_fields(&self) -> Result<Vec<JsonValue>> {
        let schema = self.schema_json()?;
        schema
            .get("fields")
            .and_then(JsonValue::as_array)
            .cloned()
            .ok_or_else(|| {
                SchemaError::InvalidSchema(format!(
                    "avro schema of {} is not a record schema",
                    self.table_name()
                ))
                .into()
            })
    }

    /// Field names of the Avro schema, in declared order
    pub fn avro_field_names(&self) -> Result<Vec<String>> {
        self.avro_fields()?
            .iter()
            .map(|f| {
                f.get("name")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        SchemaError::InvalidSchema("avro field without a name".to_string()).into()
                    })
            })
            .collect()
    }

    /// Avro schema of a single feature, as JSON
    pub fn feature_avro_schema(&self, feature: &str) -> Result<String> {
        self.avro_fields()?
            .iter()
            .find(|f| f.get("name").and_then(JsonValue::as_str) == Some(feature))
            .and_then(|f| f.get("type"))
            .map(JsonValue::to_string)
            .ok_or_else(|| {
                FeatureStoreError::Codec(format!(
                    "feature `{}` is not part of the avro schema of {}",
                    feature,
                    self.table_name()
                ))
            })
    }

    /// Schema of the online value record
    ///
    /// Complex features are replaced by `["null","bytes"]`.
    pub fn encoded_avro_schema(&self) -> Result<String> {
        let complex: BTreeSet<String> = self.complex_features().into_iter().collect();
        let mut schema = self.schema_json()?;
        if let Some(fields) = schema.get_mut("fields").and_then(JsonValue::as_array_mut) {
            for field in fields.iter_mut() {
                let is_complex = field
                    .get("name")
                    .and_then(JsonValue::as_str)
                    .is_some_and(|n| complex.contains(n));
                if is_complex {
                    field["type"] = json!(["null", "bytes"]);
                }
            }
        }
        Ok(schema.to_string())
    }

    /// Parsed Avro schema
    pub fn parsed_avro_schema(&self) -> Result<AvroSchema> {
        parse_avro(&self.avro_schema)
    }

    /// Parsed encoded Avro schema
    pub fn parsed_encoded_avro_schema(&self) -> Result<AvroSchema> {
        parse_avro(&self.encoded_avro_schema()?)
    }
}

pub(crate) fn parse_avro(schema: &str) -> Result<AvroSchema> {
    AvroSchema::parse_str(schema).map_err(|e| {
        SchemaError::InvalidSchema(format!("Invalid Avro schema: {}", e)).into()
    })
}

/// Avro schema for a dataset, used when a feature group is created from data
pub fn infer_avro_schema(name: &str, version: u32, dataset: &Dataset) -> Result<String> {
    dataset_avro_schema(dataset.schema(), &format!("{}_{}", name, version))
}

/// Builder for [`FeatureGroupDescriptor`]
#[derive(Debug, Clone)]
pub struct FeatureGroupBuilder {
    descriptor: FeatureGroupDescriptor,
    avro_schema: Option<String>,
}

impl FeatureGroupBuilder {
    fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            descriptor: FeatureGroupDescriptor {
                name: name.into(),
                version,
                features: Vec::new(),
                primary_key: BTreeSet::new(),
                partition_key: Vec::new(),
                avro_schema: String::new(),
                time_travel_format: TimeTravelFormat::None,
                online_enabled: false,
                stream: false,
                online_topic_name: None,
                validation_type: ValidationType::None,
                expectations: Vec::new(),
                statistics_config: StatisticsConfig::default(),
            },
            avro_schema: None,
        }
    }

    /// Add a feature; primary and partition flags feed the key sets
    pub fn with_feature(mut self, feature: Feature) -> Self {
        if feature.primary {
            self.descriptor.primary_key.insert(feature.name.clone());
        }
        if feature.partition {
            self.descriptor.partition_key.push(feature.name.clone());
        }
        self.descriptor.features.push(feature);
        self
    }

    pub fn with_features(self, features: impl IntoIterator<Item = Feature>) -> Self {
        features.into_iter().fold(self, Self::with_feature)
    }

    /// Use an explicit Avro schema instead of deriving one from the features
    pub fn with_avro_schema(mut self, schema: impl Into<String>) -> Self {
        self.avro_schema = Some(schema.into());
        self
    }

    pub fn with_time_travel_format(mut self, format: TimeTravelFormat) -> Self {
        self.descriptor.time_travel_format = format;
        self
    }

    pub fn online_enabled(mut self, enabled: bool) -> Self {
        self.descriptor.online_enabled = enabled;
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.descriptor.stream = stream;
        self
    }

    pub fn with_online_topic(mut self, topic: impl Into<String>) -> Self {
        self.descriptor.online_topic_name = Some(topic.into());
        self
    }

    pub fn with_validation(mut self, validation_type: ValidationType) -> Self {
        self.descriptor.validation_type = validation_type;
        self
    }

    pub fn with_expectation(mut self, expectation: Expectation) -> Self {
        self.descriptor.expectations.push(expectation);
        self
    }

    pub fn with_statistics_config(mut self, config: StatisticsConfig) -> Self {
        self.descriptor.statistics_config = config;
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<FeatureGroupDescriptor> {
        let mut descriptor = self.descriptor;
        let names: BTreeSet<&str> = descriptor.features.iter().map(|f| f.name.as_str()).collect();
        if names.len() != descriptor.features.len() {
            return Err(FeatureStoreError::Config(format!(
                "feature group {} declares duplicate features",
                descriptor.table_name()
            )));
        }
        if let Some(pk) = descriptor
            .primary_key
            .iter()
            .chain(descriptor.partition_key.iter())
            .find(|k| !names.contains(k.as_str()))
        {
            return Err(FeatureStoreError::Config(format!(
                "key `{}` is not a feature of {}",
                pk,
                descriptor.table_name()
            )));
        }

        descriptor.avro_schema = match self.avro_schema {
            Some(schema) => schema,
            None => {
                let fields = descriptor
                    .features
                    .iter()
                    .map(|f| Ok(Field::new(f.name.clone(), f.data_type()?)))
                    .collect::<Result<Vec<_>>>()?;
                dataset_avro_schema(&fields, &descriptor.table_name())?
            }
        };
        descriptor.parsed_avro_schema()?;
        Ok(descriptor)
    }
}
