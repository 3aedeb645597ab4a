//! Training dataset materialization
//!
//! One call of [`TrainingDatasetWriter::write`] runs the whole sequence:
//!
//! 1. normalize the input and check it against the stored feature schema
//! 2. split it, if the training dataset declares splits
//! 3. compute statistics once, from the train split when splits exist
//! 4. bind builtin transformation functions to those statistics
//! 5. apply all functions in one projection and restore feature order
//! 6. write each split below the training dataset location
//!
//! Steps 4 to 6 repeat per split with the same statistics.

use super::statistics::{Statistics, StatisticsEngine};
use super::transformations::TransformationEngine;
use super::TrainingDatasetDescriptor;
use crate::connector::ConnectorAdapter;
use crate::dataset::{DataFrameInput, Dataset};
use crate::engine::{Destination, ExecutionEngine, Options, ReadSpec, SaveMode, WriteSpec};
use crate::error::{FeatureStoreError, Result};
use crate::schema::match_training_dataset_schema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// One written split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitOutput {
    pub name: String,
    pub path: String,
    pub rows: usize,
}

/// What a materialization wrote
#[derive(Debug, Clone)]
pub struct MaterializationResult {
    pub splits: Vec<SplitOutput>,
    /// Statistics the builtin functions were bound to
    pub statistics: Option<Statistics>,
    /// Seed of the random split, when the dataset was split
    pub seed: Option<u64>,
}

impl MaterializationResult {
    pub fn split(&self, name: &str) -> Option<&SplitOutput> {
        self.splits.iter().find(|s| s.name == name)
    }
}

/// Materializes training datasets through an execution engine
#[derive(Clone)]
pub struct TrainingDatasetWriter {
    engine: Arc<dyn ExecutionEngine>,
    connectors: ConnectorAdapter,
    statistics: StatisticsEngine,
    transformations: TransformationEngine,
}

impl TrainingDatasetWriter {
    pub fn new(engine: Arc<dyn ExecutionEngine>) -> Self {
        Self {
            connectors: ConnectorAdapter::new(engine.clone()),
            engine,
            statistics: StatisticsEngine::default(),
            transformations: TransformationEngine::new(),
        }
    }

    pub fn with_connector_adapter(mut self, connectors: ConnectorAdapter) -> Self {
        self.connectors = connectors;
        self
    }

    pub fn with_statistics_engine(mut self, statistics: StatisticsEngine) -> Self {
        self.statistics = statistics;
        self
    }

    /// Materialize `input` as the training dataset `td`
    pub async fn write(
        &self,
        td: &TrainingDatasetDescriptor,
        input: DataFrameInput,
        user_write_options: &Options,
        save_mode: SaveMode,
    ) -> Result<MaterializationResult> {
        let mut dataset = input.normalize()?;
        if td.coalesce {
            dataset = dataset.coalesce(1);
        }
        match_training_dataset_schema(dataset.schema(), &td.features)?;

        let write_options = td.data_format.write_options(user_write_options);
        let builtin = self
            .transformations
            .builtin_features(&td.transformation_functions);
        info!(
            training_dataset = %td.name,
            version = td.version,
            format = %td.data_format,
            rows = dataset.num_rows(),
            builtin_features = ?builtin,
            "Materializing training dataset"
        );

        if !td.has_splits() {
            let statistics = if builtin.is_empty() {
                None
            } else {
                Some(
                    self.statistics
                        .compute_transformation_fn_statistics(td, &builtin, &dataset)
                        .await?,
                )
            };
            let path = format!("{}/{}", td.location, td.name);
            let output = self
                .write_split(td, &td.name, &dataset, statistics.as_ref(), &path, &write_options, save_mode)
                .await?;
            return Ok(MaterializationResult {
                splits: vec![output],
                statistics,
                seed: None,
            });
        }

        let (names, weights) = td.split_plan();
        let seed = td.seed.unwrap_or_else(rand::random);
        let splits = dataset.random_split(&weights, seed)?;
        debug!(
            training_dataset = %td.name,
            seed,
            sizes = ?splits.iter().map(Dataset::num_rows).collect::<Vec<_>>(),
            "Split dataset"
        );

        let statistics = if builtin.is_empty() {
            None
        } else {
            let train = td.train_split.as_deref().ok_or_else(|| {
                FeatureStoreError::Config(format!(
                    "Training dataset {} has builtin transformation functions but no train split",
                    td.name
                ))
            })?;
            let position = names.iter().position(|n| n == train).ok_or_else(|| {
                FeatureStoreError::Config(format!(
                    "Train split `{}` is not one of the splits {:?}",
                    train, names
                ))
            })?;
            Some(
                self.statistics
                    .compute_transformation_fn_statistics(td, &builtin, &splits[position])
                    .await?,
            )
        };

        let mut outputs = Vec::with_capacity(splits.len());
        for (name, split) in names.iter().zip(&splits) {
            let path = format!("{}/{}", td.location, name);
            outputs.push(
                self.write_split(td, name, split, statistics.as_ref(), &path, &write_options, save_mode)
                    .await?,
            );
        }
        Ok(MaterializationResult {
            splits: outputs,
            statistics,
            seed: Some(seed),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_split(
        &self,
        td: &TrainingDatasetDescriptor,
        name: &str,
        dataset: &Dataset,
        statistics: Option<&Statistics>,
        path: &str,
        options: &Options,
        save_mode: SaveMode,
    ) -> Result<SplitOutput> {
        let registry = self
            .transformations
            .populate_builtin_attached_fns(&td.transformation_functions, statistics)?;
        let transformed = self.transformations.apply(td, dataset, &registry)?;

        let prepared = self.connectors.prepare(&td.storage_connector, path).await?;
        let spec = WriteSpec::new(
            td.data_format.engine_format(),
            Destination::Path(prepared.path.clone()),
        )
        .with_options(options.clone())
        .with_mode(save_mode);
        self.engine.write(&transformed, &spec, &prepared.conf).await?;
        info!(
            training_dataset = %td.name,
            split = name,
            path = %prepared.path,
            rows = transformed.num_rows(),
            "Wrote split"
        );
        Ok(SplitOutput {
            name: name.to_string(),
            path: prepared.path,
            rows: transformed.num_rows(),
        })
    }

    /// Read back a split, or the whole training dataset when `split` is `None`
    pub async fn read(
        &self,
        td: &TrainingDatasetDescriptor,
        split: Option<&str>,
        read_options: &Options,
    ) -> Result<Dataset> {
        let path = match split {
            Some(name) if !td.splits.contains_key(name) => {
                return Err(FeatureStoreError::Config(format!(
                    "Training dataset {} has no split `{}`",
                    td.name, name
                )))
            }
            Some(name) => format!("{}/{}", td.location, name),
            None => format!("{}/{}", td.location, td.name),
        };
        let prepared = self.connectors.prepare(&td.storage_connector, &path).await?;
        let spec = ReadSpec {
            format: td.data_format.engine_format(),
            options: td.data_format.read_options(read_options),
            location: td.data_format.read_location(&prepared.path),
        };
        self.engine.read(&spec, &prepared.conf).await
    }
}

impl std::fmt::Debug for TrainingDatasetWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingDatasetWriter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DataType, Field, Value};
    use crate::engine::{DataFormat, LocalEngine};
    use crate::featurestore::{TrainingDatasetFeature, TransformationFunctionRef};
    use tempfile::TempDir;

    fn input(n: i64) -> DataFrameInput {
        Dataset::new(
            vec![
                Field::new("id", DataType::Long),
                Field::new("x", DataType::Double),
            ],
            (0..n)
                .map(|i| vec![Value::Long(i), Value::Double(i as f64)])
                .collect(),
        )
        .unwrap()
        .into()
    }

    fn td(dir: &TempDir) -> crate::featurestore::training_dataset::TrainingDatasetBuilder {
        TrainingDatasetDescriptor::builder("td", 1)
            .with_feature(TrainingDatasetFeature::new("id", "bigint", 0))
            .with_feature(TrainingDatasetFeature::new("x", "double", 1))
            .with_location(dir.path().join("td_1").to_string_lossy().to_string())
    }

    #[tokio::test]
    async fn test_write_without_splits_uses_full_dataset() {
        let dir = TempDir::new().unwrap();
        let writer = TrainingDatasetWriter::new(Arc::new(LocalEngine::new(dir.path())));
        let td = td(&dir)
            .with_transformation_function("x", TransformationFunctionRef::builtin("min_max_scaler", 1).unwrap())
            .build()
            .unwrap();
        let result = writer
            .write(&td, input(11), &Options::new(), SaveMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(result.splits.len(), 1);
        assert_eq!(result.splits[0].rows, 11);
        assert!(result.split("td").unwrap().path.ends_with("td_1/td"));
        let stats = result.statistics.unwrap();
        assert_eq!(stats.column("x").unwrap().max, Some(10.0));

        let read = writer.read(&td, None, &Options::new()).await.unwrap();
        let mut xs: Vec<f64> = read
            .column_values("x")
            .unwrap()
            .into_iter()
            .filter_map(Value::as_f64)
            .collect();
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(xs.first(), Some(&0.0));
        assert_eq!(xs.last(), Some(&1.0));
    }

    #[tokio::test]
    async fn test_builtin_without_train_split_is_config_error() {
        let dir = TempDir::new().unwrap();
        let writer = TrainingDatasetWriter::new(Arc::new(LocalEngine::new(dir.path())));
        let td = td(&dir)
            .with_split("a", 0.5)
            .with_split("b", 0.5)
            .with_transformation_function("x", TransformationFunctionRef::builtin("standard_scaler", 1).unwrap())
            .build()
            .unwrap();
        let err = writer
            .write(&td, input(10), &Options::new(), SaveMode::Overwrite)
            .await
            .unwrap_err();
        assert!(matches!(err, FeatureStoreError::Config(_)));
    }

    #[tokio::test]
    async fn test_tsv_splits_and_read_back() {
        let dir = TempDir::new().unwrap();
        let writer = TrainingDatasetWriter::new(Arc::new(LocalEngine::new(dir.path())));
        let td = td(&dir)
            .with_split("train", 0.7)
            .with_split("test", 0.3)
            .with_seed(7)
            .with_data_format(DataFormat::Tsv)
            .coalesce(true)
            .build()
            .unwrap();
        let result = writer
            .write(&td, input(50), &Options::new(), SaveMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(result.seed, Some(7));
        assert!(result.statistics.is_none());
        let total: usize = result.splits.iter().map(|s| s.rows).sum();
        assert_eq!(total, 50);
        assert_eq!(result.splits[0].name, "test");

        let train = writer.read(&td, Some("train"), &Options::new()).await.unwrap();
        assert_eq!(train.num_rows(), result.split("train").unwrap().rows);
        assert_eq!(train.field("id").unwrap().data_type, DataType::Long);
        assert!(writer.read(&td, Some("validation"), &Options::new()).await.is_err());
    }
}
