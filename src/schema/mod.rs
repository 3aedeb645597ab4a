//! Schema handling
//!
//! - [`avro`]: the online wire encoding
//! - [`match_training_dataset_schema`]: positional comparison of a dataset
//!   against the stored schema of a training dataset
//! - `parse_schema_*`: derive feature metadata from a dataset
//!
//! Schema matching is positional on purpose. Consumers of a training dataset
//! address features by position, so a dataset whose columns are the right set
//! in the wrong order is rejected.

pub mod avro;

pub use avro::{
    decode_key, decode_value, encode_complex_fields, to_wire_format, EncodedRecord,
};

use crate::dataset::Field;
use crate::error::{Result, SchemaError};
use crate::featurestore::{Feature, TrainingDatasetFeature};

/// Compare dataset columns against stored features, position by position
///
/// Stored features are ordered by their index first. Names are compared
/// lower-cased on both sides.
pub fn match_training_dataset_schema(
    dataset_schema: &[Field],
    stored: &[TrainingDatasetFeature],
) -> Result<()> {
    let mut stored: Vec<&TrainingDatasetFeature> = stored.iter().collect();
    stored.sort_by_key(|f| f.index);

    if stored.len() != dataset_schema.len() {
        return Err(SchemaError::CountMismatch {
            expected: stored.len(),
            actual: dataset_schema.len(),
        }
        .into());
    }

    for (position, (expected, actual)) in stored.iter().zip(dataset_schema).enumerate() {
        if expected.name.to_lowercase() != actual.name.to_lowercase() {
            return Err(SchemaError::NameMismatch {
                expected: expected.name.clone(),
                position,
                actual: actual.name.clone(),
            }
            .into());
        }
    }
    Ok(())
}

/// Features of a feature group created from `dataset`
pub fn parse_schema_feature_group(dataset_schema: &[Field]) -> Vec<Feature> {
    dataset_schema
        .iter()
        .map(|f| Feature::new(f.name.to_lowercase(), f.data_type.simple_string()))
        .collect()
}

/// Features of a training dataset created from `dataset`, indexed by position
pub fn parse_schema_training_dataset(dataset_schema: &[Field]) -> Vec<TrainingDatasetFeature> {
    dataset_schema
        .iter()
        .enumerate()
        .map(|(index, f)| {
            TrainingDatasetFeature::new(f.name.to_lowercase(), f.data_type.simple_string(), index)
        })
        .collect()
}
