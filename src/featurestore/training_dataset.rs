//! Training dataset metadata

use super::transformations::TransformationFunctionRef;
use super::TrainingDatasetFeature;
use crate::connector::StorageConnector;
use crate::engine::DataFormat;
use crate::error::{FeatureStoreError, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Metadata of a training dataset
#[derive(Debug, Clone)]
pub struct TrainingDatasetDescriptor {
    /// Training dataset name
    pub name: String,
    /// Version
    pub version: u32,
    /// Features with their ordering index
    pub features: Vec<TrainingDatasetFeature>,
    /// Split name to relative weight
    pub splits: BTreeMap<String, f64>,
    /// Seed of the random split; drawn per call when absent
    pub seed: Option<u64>,
    /// Split the transformation statistics are computed on
    pub train_split: Option<String>,
    /// Feature name to attached transformation function
    pub transformation_functions: BTreeMap<String, TransformationFunctionRef>,
    /// File format
    pub data_format: DataFormat,
    /// Base location; splits are written below it
    pub location: String,
    /// Connector of the destination storage
    pub storage_connector: StorageConnector,
    /// Write a single file per split
    pub coalesce: bool,
}

impl TrainingDatasetDescriptor {
    /// Start building a descriptor
    pub fn builder(name: impl Into<String>, version: u32) -> TrainingDatasetBuilder {
        TrainingDatasetBuilder::new(name, version)
    }

    /// Features in declared index order
    pub fn sorted_features(&self) -> Vec<&TrainingDatasetFeature> {
        let mut features: Vec<&TrainingDatasetFeature> = self.features.iter().collect();
        features.sort_by_key(|f| f.index);
        features
    }

    /// Split names in ascending order, with their weights in the same order
    pub fn split_plan(&self) -> (Vec<String>, Vec<f64>) {
        self.splits
            .iter()
            .map(|(name, weight)| (name.clone(), *weight))
            .unzip()
    }

    pub fn has_splits(&self) -> bool {
        !self.splits.is_empty()
    }
}

/// Builder for [`TrainingDatasetDescriptor`]
#[derive(Debug, Clone)]
pub struct TrainingDatasetBuilder {
    descriptor: TrainingDatasetDescriptor,
}

impl TrainingDatasetBuilder {
    fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            descriptor: TrainingDatasetDescriptor {
                name: name.into(),
                version,
                features: Vec::new(),
                splits: BTreeMap::new(),
                seed: None,
                train_split: None,
                transformation_functions: BTreeMap::new(),
                data_format: DataFormat::Parquet,
                location: String::new(),
                storage_connector: StorageConnector::default(),
                coalesce: false,
            },
        }
    }

    pub fn with_feature(mut self, feature: TrainingDatasetFeature) -> Self {
        self.descriptor.features.push(feature);
        self
    }

    pub fn with_features(self, features: impl IntoIterator<Item = TrainingDatasetFeature>) -> Self {
        features.into_iter().fold(self, Self::with_feature)
    }

    pub fn with_split(mut self, name: impl Into<String>, weight: f64) -> Self {
        self.descriptor.splits.insert(name.into(), weight);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.descriptor.seed = Some(seed);
        self
    }

    pub fn with_train_split(mut self, name: impl Into<String>) -> Self {
        self.descriptor.train_split = Some(name.into());
        self
    }

    pub fn with_transformation_function(
        mut self,
        feature: impl Into<String>,
        function: TransformationFunctionRef,
    ) -> Self {
        self.descriptor
            .transformation_functions
            .insert(feature.into().to_lowercase(), function);
        self
    }

    pub fn with_transformation_functions(
        mut self,
        functions: BTreeMap<String, TransformationFunctionRef>,
    ) -> Self {
        for (feature, function) in functions {
            self = self.with_transformation_function(feature, function);
        }
        self
    }

    pub fn with_data_format(mut self, format: DataFormat) -> Self {
        self.descriptor.data_format = format;
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.descriptor.location = location.into();
        self
    }

    pub fn with_storage_connector(mut self, connector: StorageConnector) -> Self {
        self.descriptor.storage_connector = connector;
        self
    }

    pub fn coalesce(mut self, coalesce: bool) -> Self {
        self.descriptor.coalesce = coalesce;
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<TrainingDatasetDescriptor> {
        let td = self.descriptor;

        let mut names = BTreeSet::new();
        let mut indices = BTreeSet::new();
        for feature in &td.features {
            if !names.insert(feature.name.as_str()) || !indices.insert(feature.index) {
                return Err(FeatureStoreError::Config(format!(
                    "training dataset {} declares feature `{}` or index {} twice",
                    td.name, feature.name, feature.index
                )));
            }
        }

        if let Some((name, weight)) = td
            .splits
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(FeatureStoreError::Config(format!(
                "split `{}` has invalid weight {}",
                name, weight
            )));
        }
        if td.has_splits() && td.splits.values().sum::<f64>() <= 0.0 {
            return Err(FeatureStoreError::Config(
                "split weights must not all be zero".to_string(),
            ));
        }
        if let Some(train) = &td.train_split {
            if !td.splits.contains_key(train) {
                return Err(FeatureStoreError::Config(format!(
                    "train split `{}` is not one of the splits {:?}",
                    train,
                    td.splits.keys().collect::<Vec<_>>()
                )));
            }
        }
        if let Some(feature) = td
            .transformation_functions
            .keys()
            .find(|f| !names.contains(f.as_str()))
        {
            return Err(FeatureStoreError::Config(format!(
                "transformation function attached to unknown feature `{}`",
                feature
            )));
        }

        Ok(td)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> TrainingDatasetBuilder {
        TrainingDatasetDescriptor::builder("churn", 1)
            .with_feature(TrainingDatasetFeature::new("b", "int", 1))
            .with_feature(TrainingDatasetFeature::new("a", "int", 0))
    }

    #[test]
    fn test_sorted_features_and_split_plan() {
        let td = builder()
            .with_split("train", 0.8)
            .with_split("test", 0.2)
            .build()
            .unwrap();
        let names: Vec<&str> = td.sorted_features().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        let (splits, weights) = td.split_plan();
        assert_eq!(splits, vec!["test", "train"]);
        assert_eq!(weights, vec![0.2, 0.8]);
    }

    #[test]
    fn test_invalid_configurations() {
        assert!(builder().with_split("train", -1.0).build().is_err());
        assert!(builder()
            .with_split("train", 0.0)
            .with_split("test", 0.0)
            .build()
            .is_err());
        assert!(builder()
            .with_split("train", 1.0)
            .with_train_split("validation")
            .build()
            .is_err());
        assert!(builder()
            .with_transformation_function(
                "missing",
                TransformationFunctionRef::builtin("min_max_scaler", 1).unwrap()
            )
            .build()
            .is_err());
        assert!(builder()
            .with_feature(TrainingDatasetFeature::new("c", "int", 0))
            .build()
            .is_err());
    }
}
