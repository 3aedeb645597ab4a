//! Offline sink

use super::time_travel::TimeTravelEngine;
use super::WriteOperation;
use crate::connector::EngineConf;
use crate::dataset::Dataset;
use crate::engine::{DataFormat, Destination, ExecutionEngine, Options, SaveMode, WriteSpec};
use crate::error::Result;
use crate::featurestore::FeatureGroupDescriptor;
use std::sync::Arc;
use tracing::{debug, info};

/// Writes feature group rows to the offline store
///
/// Time-travel groups are committed through the [`TimeTravelEngine`]; all
/// other groups are appended to a Hive table partitioned by the group's
/// partition keys.
#[derive(Clone)]
pub struct OfflineWriter {
    engine: Arc<dyn ExecutionEngine>,
    time_travel: Arc<dyn TimeTravelEngine>,
}

impl OfflineWriter {
    pub fn new(engine: Arc<dyn ExecutionEngine>, time_travel: Arc<dyn TimeTravelEngine>) -> Self {
        Self {
            engine,
            time_travel,
        }
    }

    pub async fn write(
        &self,
        feature_group: &FeatureGroupDescriptor,
        dataset: &Dataset,
        operation: WriteOperation,
        options: &Options,
        validation_id: Option<&str>,
    ) -> Result<()> {
        let table = feature_group.table_name();
        if feature_group.is_time_travel() {
            // Overwrite replaces the head in a single commit
            let commit = self
                .time_travel
                .save(feature_group, dataset, operation, options, validation_id)
                .await?;
            info!(
                table = %table,
                operation = %operation,
                commit_id = commit.commit_id,
                "Wrote to versioned offline storage"
            );
            return Ok(());
        }

        let mode = match operation {
            WriteOperation::Overwrite => SaveMode::Overwrite,
            _ => SaveMode::Append,
        };
        let spec = WriteSpec::new(DataFormat::Hive, Destination::Table(table.clone()))
            .with_options(options.clone())
            .with_mode(mode)
            .partitioned_by(feature_group.partition_key.clone());
        debug!(table = %table, mode = %mode, partitions = ?spec.partition_by, "Writing offline table");
        self.engine.write(dataset, &spec, &EngineConf::new()).await?;
        info!(table = %table, rows = dataset.num_rows(), "Wrote to offline storage");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DataType, Field, Value};
    use crate::engine::{LocalEngine, ReadSpec};
    use crate::featurestore::{Feature, TimeTravelFormat};
    use crate::sink::VersionedTableStore;
    use tempfile::TempDir;

    fn dataset() -> Dataset {
        Dataset::new(
            vec![
                Field::new("id", DataType::Long),
                Field::new("day", DataType::String),
            ],
            vec![
                vec![Value::Long(1), Value::String("mon".into())],
                vec![Value::Long(2), Value::String("tue".into())],
            ],
        )
        .unwrap()
    }

    fn fg(format: TimeTravelFormat) -> FeatureGroupDescriptor {
        FeatureGroupDescriptor::builder("events", 2)
            .with_feature(Feature::new("id", "bigint").primary())
            .with_feature(Feature::new("day", "string").partition())
            .with_time_travel_format(format)
            .build()
            .unwrap()
    }

    fn writer(dir: &TempDir) -> (OfflineWriter, Arc<LocalEngine>, Arc<VersionedTableStore>) {
        let engine = Arc::new(LocalEngine::new(dir.path()));
        let store = Arc::new(VersionedTableStore::new());
        (OfflineWriter::new(engine.clone(), store.clone()), engine, store)
    }

    #[tokio::test]
    async fn test_hive_table_append_and_overwrite() {
        let dir = TempDir::new().unwrap();
        let (writer, engine, store) = writer(&dir);
        let fg = fg(TimeTravelFormat::None);
        let read = ReadSpec {
            format: DataFormat::Hive,
            options: Options::new(),
            location: "events_2".into(),
        };

        for _ in 0..2 {
            writer
                .write(&fg, &dataset(), WriteOperation::Append, &Options::new(), None)
                .await
                .unwrap();
        }
        assert!(dir.path().join("events_2/day=mon").is_dir());
        let rows = engine.read(&read, &EngineConf::new()).await.unwrap();
        assert_eq!(rows.num_rows(), 4);

        writer
            .write(&fg, &dataset(), WriteOperation::Overwrite, &Options::new(), None)
            .await
            .unwrap();
        let rows = engine.read(&read, &EngineConf::new()).await.unwrap();
        assert_eq!(rows.num_rows(), 2);
        assert_eq!(store.commit_count("events_2"), 0);
    }

    #[tokio::test]
    async fn test_time_travel_overwrite_replaces_head() {
        let dir = TempDir::new().unwrap();
        let (writer, _, store) = writer(&dir);
        let fg = fg(TimeTravelFormat::Hudi);
        writer
            .write(&fg, &dataset(), WriteOperation::BulkInsert, &Options::new(), Some("val-1"))
            .await
            .unwrap();
        writer
            .write(&fg, &dataset().limit(1), WriteOperation::Overwrite, &Options::new(), None)
            .await
            .unwrap();

        let commits = store.commit_details(&fg, None).await.unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].kind, crate::sink::CommitKind::Insert);
        assert_eq!(commits[1].validation_id.as_deref(), Some("val-1"));
        assert_eq!(store.read(&fg, None).await.unwrap().num_rows(), 1);
        assert!(!dir.path().join("events_2").exists());
    }

    #[tokio::test]
    async fn test_failed_time_travel_overwrite_keeps_rows() {
        let dir = TempDir::new().unwrap();
        let (writer, _, store) = writer(&dir);
        let fg = fg(TimeTravelFormat::Hudi);
        writer
            .write(&fg, &dataset(), WriteOperation::Append, &Options::new(), None)
            .await
            .unwrap();

        let null_key = Dataset::new(
            vec![
                Field::new("id", DataType::Long),
                Field::new("day", DataType::String),
            ],
            vec![vec![Value::Null, Value::String("wed".into())]],
        )
        .unwrap();
        let result = writer
            .write(&fg, &null_key, WriteOperation::Overwrite, &Options::new(), None)
            .await;
        assert!(result.is_err());

        assert_eq!(store.commit_details(&fg, None).await.unwrap().len(), 1);
        assert_eq!(store.read(&fg, None).await.unwrap().num_rows(), 2);
    }
}
