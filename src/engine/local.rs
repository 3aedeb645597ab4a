//! Filesystem execution engine
//!
//! Locations are mapped below a warehouse root:
//!
//! - absolute paths and `file://` URIs are used as they are
//! - `scheme://rest` lands in `<root>/<scheme>/<rest>`
//! - relative paths and table names land in `<root>/<name>`
//!
//! Writes produce one part file per dataset partition plus a `_SUCCESS`
//! marker. Partitioned writes use `column=value` directories and drop the
//! partition columns from the part files, the way Hive tables are laid out.

use super::files::{self, FileContents};
use super::{DataFormat, Destination, ExecutionEngine, ReadSpec, SaveMode, WriteSpec};
use crate::connector::EngineConf;
use crate::dataset::{DataType, Dataset, Field, Value};
use crate::error::{FeatureStoreError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";
const SUCCESS_MARKER: &str = "_SUCCESS";

/// Execution engine writing to the local filesystem
#[derive(Debug, Clone)]
pub struct LocalEngine {
    root: PathBuf,
    staging_dir: PathBuf,
    max_parts: Option<usize>,
}

impl LocalEngine {
    /// Create an engine rooted at `root`; staged files go to `<root>/.staging`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let staging_dir = root.join(".staging");
        Self {
            root,
            staging_dir,
            max_parts: None,
        }
    }

    /// Cap the number of part files per write
    pub fn with_parallelism(mut self, parts: usize) -> Self {
        self.max_parts = Some(parts.max(1));
        self
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path of a location
    pub fn resolve(&self, location: &str) -> PathBuf {
        let location = location.strip_prefix("file://").unwrap_or(location);
        if Path::new(location).is_absolute() {
            return PathBuf::from(location);
        }
        match location.split_once("://") {
            Some((scheme, rest)) => self.root.join(scheme).join(rest.trim_start_matches('/')),
            None => self.root.join(location),
        }
    }

    fn destination_path(&self, destination: &Destination) -> PathBuf {
        match destination {
            Destination::Path(p) => self.resolve(p),
            Destination::Table(t) => self.root.join(t),
        }
    }
}

#[async_trait]
impl ExecutionEngine for LocalEngine {
    async fn write(&self, dataset: &Dataset, spec: &WriteSpec, conf: &EngineConf) -> Result<()> {
        let dir = self.destination_path(&spec.destination);
        info!(
            destination = %spec.destination,
            format = %spec.format,
            mode = %spec.mode,
            rows = dataset.num_rows(),
            conf_entries = conf.len(),
            "Writing dataset"
        );
        let dataset = match self.max_parts {
            Some(parts) => dataset.clone().coalesce(parts),
            None => dataset.clone(),
        };
        let spec = spec.clone();
        tokio::task::spawn_blocking(move || write_dataset(&dir, &dataset, &spec))
            .await
            .map_err(|e| FeatureStoreError::storage_msg(format!("write task failed: {}", e)))?
    }

    async fn read(&self, spec: &ReadSpec, conf: &EngineConf) -> Result<Dataset> {
        let location = spec.location.trim_end_matches("/**");
        let path = self.resolve(location);
        debug!(location = %spec.location, format = %spec.format, conf_entries = conf.len(), "Reading dataset");
        let spec = spec.clone();
        tokio::task::spawn_blocking(move || read_dataset(&path, &spec))
            .await
            .map_err(|e| FeatureStoreError::storage_msg(format!("read task failed: {}", e)))?
    }

    async fn stage_file(&self, uri: &str) -> Result<PathBuf> {
        let source = self.resolve(uri);
        let file_name = source
            .file_name()
            .ok_or_else(|| FeatureStoreError::storage_msg(format!("not a file: {}", uri)))?;
        if !tokio::fs::try_exists(&source).await? {
            return Err(FeatureStoreError::storage_msg(format!(
                "Path does not exist: {}",
                uri
            )));
        }
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let target = self.staging_dir.join(file_name);
        tokio::fs::copy(&source, &target).await?;
        debug!(uri, target = %target.display(), "Staged file");
        Ok(target)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('_') || n.starts_with('.'))
}

fn has_contents(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(false);
    }
    Ok(fs::read_dir(dir)?.next().is_some())
}

fn write_dataset(dir: &Path, dataset: &Dataset, spec: &WriteSpec) -> Result<()> {
    let extension = files::extension(spec.format)?;

    if has_contents(dir)? {
        match spec.mode {
            SaveMode::Append => {}
            SaveMode::Overwrite => fs::remove_dir_all(dir)?,
            SaveMode::ErrorIfExists => {
                return Err(FeatureStoreError::storage_msg(format!(
                    "path {} already exists",
                    dir.display()
                )))
            }
            SaveMode::Ignore => {
                debug!(path = %dir.display(), "Destination exists, ignoring write");
                return Ok(());
            }
        }
    }
    fs::create_dir_all(dir)?;

    if spec.partition_by.is_empty() {
        for (n, chunk) in dataset.partition_chunks().into_iter().enumerate() {
            write_part(dir, n, extension, spec, dataset.schema(), chunk)?;
        }
    } else {
        write_partitioned(dir, extension, dataset, spec)?;
    }
    fs::write(dir.join(SUCCESS_MARKER), b"")?;
    Ok(())
}

fn write_part(
    dir: &Path,
    n: usize,
    extension: &str,
    spec: &WriteSpec,
    schema: &[Field],
    rows: &[Vec<Value>],
) -> Result<()> {
    let path = dir.join(format!("part-{:05}-{}.{}", n, Uuid::new_v4(), extension));
    files::write_file(&path, spec.format, schema, rows, &spec.options)
}

fn partition_dir_value(value: &Value) -> String {
    value
        .cast_to_string()
        .unwrap_or_else(|| DEFAULT_PARTITION.to_string())
}

fn write_partitioned(dir: &Path, extension: &str, dataset: &Dataset, spec: &WriteSpec) -> Result<()> {
    let partition_idx = spec
        .partition_by
        .iter()
        .map(|c| {
            dataset.column_index(c).ok_or_else(|| {
                FeatureStoreError::Config(format!("partition column `{}` not found", c))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let data_idx: Vec<usize> = (0..dataset.num_columns())
        .filter(|i| !partition_idx.contains(i))
        .collect();
    let schema: Vec<Field> = data_idx
        .iter()
        .map(|&i| dataset.schema()[i].clone())
        .collect();

    let mut groups: BTreeMap<Vec<String>, Vec<Vec<Value>>> = BTreeMap::new();
    for row in dataset.rows() {
        let key = partition_idx
            .iter()
            .map(|&i| partition_dir_value(&row[i]))
            .collect();
        let values = data_idx.iter().map(|&i| row[i].clone()).collect();
        groups.entry(key).or_default().push(values);
    }

    for (key, rows) in groups {
        let mut part_dir = dir.to_path_buf();
        for (column, value) in spec.partition_by.iter().zip(&key) {
            part_dir.push(format!("{}={}", column, value));
        }
        fs::create_dir_all(&part_dir)?;
        write_part(&part_dir, 0, extension, spec, &schema, &rows)?;
    }
    Ok(())
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if is_hidden(&path) {
            continue;
        }
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn partition_values(root: &Path, file: &Path) -> Vec<(String, String)> {
    file.parent()
        .and_then(|p| p.strip_prefix(root).ok())
        .map(|rel| {
            rel.components()
                .filter_map(|c| c.as_os_str().to_str())
                .filter_map(|c| c.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_partition_value(raw: &str, data_type: &DataType) -> Value {
    if raw == DEFAULT_PARTITION {
        return Value::Null;
    }
    match data_type {
        DataType::Long => raw.parse().map(Value::Long).unwrap_or(Value::Null),
        DataType::Double => raw.parse().map(Value::Double).unwrap_or(Value::Null),
        _ => Value::String(raw.to_string()),
    }
}

fn infer_partition_type<'a>(values: impl Iterator<Item = &'a str>) -> DataType {
    let present: Vec<&str> = values.filter(|v| *v != DEFAULT_PARTITION).collect();
    if !present.is_empty() && present.iter().all(|v| v.parse::<i64>().is_ok()) {
        DataType::Long
    } else if !present.is_empty() && present.iter().all(|v| v.parse::<f64>().is_ok()) {
        DataType::Double
    } else {
        DataType::String
    }
}

fn read_dataset(path: &Path, spec: &ReadSpec) -> Result<Dataset> {
    if !path.exists() {
        return Err(FeatureStoreError::storage_msg(format!(
            "Path does not exist: {}",
            spec.location
        )));
    }
    let mut paths = Vec::new();
    if path.is_dir() {
        collect_files(path, &mut paths)?;
        paths.sort();
    } else {
        paths.push(path.to_path_buf());
    }

    let mut parts: Vec<(FileContents, Vec<(String, String)>)> = Vec::with_capacity(paths.len());
    for file in &paths {
        let contents = files::read_file(file, spec.format, &spec.options)?;
        parts.push((contents, partition_values(path, file)));
    }

    // Union of file columns by name in first-seen order, partition columns last
    let mut schema: Vec<Field> = Vec::new();
    for ((file_schema, _), _) in &parts {
        for field in file_schema {
            if !schema.iter().any(|f| f.name == field.name) {
                schema.push(field.clone());
            }
        }
    }
    let mut partition_columns: Vec<String> = Vec::new();
    for (_, values) in &parts {
        for (column, _) in values {
            if !partition_columns.contains(column) && !schema.iter().any(|f| &f.name == column) {
                partition_columns.push(column.clone());
            }
        }
    }
    let partition_types: Vec<DataType> = partition_columns
        .iter()
        .map(|column| {
            infer_partition_type(parts.iter().flat_map(|(_, values)| {
                values
                    .iter()
                    .filter(move |(k, _)| k == column)
                    .map(|(_, v)| v.as_str())
            }))
        })
        .collect();

    let mut rows = Vec::new();
    for ((file_schema, file_rows), values) in parts {
        let positions: Vec<Option<usize>> = schema
            .iter()
            .map(|f| file_schema.iter().position(|g| g.name == f.name))
            .collect();
        let extra: Vec<Value> = partition_columns
            .iter()
            .zip(&partition_types)
            .map(|(column, data_type)| {
                values
                    .iter()
                    .find(|(k, _)| k == column)
                    .map(|(_, v)| parse_partition_value(v, data_type))
                    .unwrap_or(Value::Null)
            })
            .collect();
        for row in file_rows {
            let mut out: Vec<Value> = positions
                .iter()
                .map(|p| p.map(|i| row[i].clone()).unwrap_or(Value::Null))
                .collect();
            out.extend(extra.iter().cloned());
            rows.push(out);
        }
    }
    schema.extend(
        partition_columns
            .into_iter()
            .zip(partition_types)
            .map(|(name, data_type)| Field::new(name, data_type)),
    );
    debug!(files = paths.len(), rows = rows.len(), "Read dataset");
    Dataset::new(schema, rows)
}

/// Formats the local engine can write; other formats need a cluster engine
pub fn supports(format: DataFormat) -> bool {
    files::extension(format).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Options;
    use tempfile::TempDir;

    fn dataset() -> Dataset {
        Dataset::new(
            vec![
                Field::new("id", DataType::Long),
                Field::new("day", DataType::String),
                Field::new("amount", DataType::Double),
            ],
            vec![
                vec![Value::Long(1), Value::String("mon".into()), Value::Double(1.5)],
                vec![Value::Long(2), Value::String("tue".into()), Value::Double(2.5)],
                vec![Value::Long(3), Value::Null, Value::Double(3.5)],
            ],
        )
        .unwrap()
    }

    fn read_spec(format: DataFormat, location: &str) -> ReadSpec {
        ReadSpec {
            format,
            options: format.read_options(&Options::new()),
            location: format.read_location(location),
        }
    }

    #[test]
    fn test_resolve() {
        let engine = LocalEngine::new("/warehouse");
        assert_eq!(engine.resolve("/tmp/td"), PathBuf::from("/tmp/td"));
        assert_eq!(engine.resolve("file:///tmp/td"), PathBuf::from("/tmp/td"));
        assert_eq!(
            engine.resolve("s3a://bucket/td/train"),
            PathBuf::from("/warehouse/s3a/bucket/td/train")
        );
        assert_eq!(
            engine.resolve("hdfs:///Projects/p/td"),
            PathBuf::from("/warehouse/hdfs/Projects/p/td")
        );
        assert_eq!(engine.resolve("td_1"), PathBuf::from("/warehouse/td_1"));
    }

    #[tokio::test]
    async fn test_write_and_read_parquet() {
        let dir = TempDir::new().unwrap();
        let engine = LocalEngine::new(dir.path());
        let data = dataset().repartition(2);
        let spec = WriteSpec::new(DataFormat::Parquet, Destination::Path("td/train".into()));
        engine.write(&data, &spec, &EngineConf::new()).await.unwrap();

        let out = dir.path().join("td/train");
        assert!(out.join(SUCCESS_MARKER).exists());
        let parts = fs::read_dir(&out)
            .unwrap()
            .filter(|e| !is_hidden(&e.as_ref().unwrap().path()))
            .count();
        assert_eq!(parts, 2);

        let read = engine
            .read(&read_spec(DataFormat::Parquet, "td/train"), &EngineConf::new())
            .await
            .unwrap();
        assert_eq!(read.num_rows(), 3);
        assert_eq!(read.columns(), vec!["id", "day", "amount"]);
    }

    #[tokio::test]
    async fn test_save_modes() {
        let dir = TempDir::new().unwrap();
        let engine = LocalEngine::new(dir.path());
        let conf = EngineConf::new();
        let spec = WriteSpec::new(DataFormat::Json, Destination::Path("out".into()));
        engine.write(&dataset(), &spec, &conf).await.unwrap();

        let err = engine.write(&dataset(), &spec, &conf).await.unwrap_err();
        assert!(matches!(err, FeatureStoreError::Storage(_)));

        let ignore = spec.clone().with_mode(SaveMode::Ignore);
        engine.write(&dataset(), &ignore, &conf).await.unwrap();

        let append = spec.clone().with_mode(SaveMode::Append);
        engine.write(&dataset(), &append, &conf).await.unwrap();
        let read = engine.read(&read_spec(DataFormat::Json, "out"), &conf).await.unwrap();
        assert_eq!(read.num_rows(), 6);

        let overwrite = spec.with_mode(SaveMode::Overwrite);
        engine.write(&dataset(), &overwrite, &conf).await.unwrap();
        let read = engine.read(&read_spec(DataFormat::Json, "out"), &conf).await.unwrap();
        assert_eq!(read.num_rows(), 3);
    }

    #[tokio::test]
    async fn test_partitioned_hive_table() {
        let dir = TempDir::new().unwrap();
        let engine = LocalEngine::new(dir.path());
        let spec = WriteSpec::new(DataFormat::Hive, Destination::Table("fg_1".into()))
            .with_mode(SaveMode::Append)
            .partitioned_by(vec!["day".into()]);
        engine.write(&dataset(), &spec, &EngineConf::new()).await.unwrap();

        assert!(dir.path().join("fg_1/day=mon").is_dir());
        assert!(dir.path().join("fg_1/day=__HIVE_DEFAULT_PARTITION__").is_dir());

        let read = engine
            .read(&read_spec(DataFormat::Hive, "fg_1"), &EngineConf::new())
            .await
            .unwrap();
        assert_eq!(read.columns(), vec!["id", "amount", "day"]);
        let days: Vec<&Value> = read.column_values("day").unwrap();
        assert!(days.contains(&&Value::Null));
        assert!(days.contains(&&Value::String("tue".into())));
    }

    #[tokio::test]
    async fn test_unsupported_format_and_missing_path() {
        let dir = TempDir::new().unwrap();
        let engine = LocalEngine::new(dir.path());
        let spec = WriteSpec::new(DataFormat::TfRecord, Destination::Path("tf".into()));
        let err = engine.write(&dataset(), &spec, &EngineConf::new()).await.unwrap_err();
        assert!(matches!(err, FeatureStoreError::UnsupportedType(_)));
        assert!(!supports(DataFormat::Delta));

        let err = engine
            .read(&read_spec(DataFormat::Csv, "nothing"), &EngineConf::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FeatureStoreError::Storage(_)));
    }

    #[tokio::test]
    async fn test_stage_file() {
        let dir = TempDir::new().unwrap();
        let engine = LocalEngine::new(dir.path());
        fs::create_dir_all(dir.path().join("hdfs/keys")).unwrap();
        fs::write(dir.path().join("hdfs/keys/sa.json"), b"{}").unwrap();

        let staged = engine.stage_file("hdfs:///keys/sa.json").await.unwrap();
        assert_eq!(staged, dir.path().join(".staging/sa.json"));
        assert!(staged.exists());
        assert!(engine.stage_file("hdfs:///keys/missing.json").await.is_err());
    }

    #[tokio::test]
    async fn test_parallelism_caps_part_files() {
        let dir = TempDir::new().unwrap();
        let engine = LocalEngine::new(dir.path()).with_parallelism(2);
        let spec = WriteSpec::new(DataFormat::Json, Destination::Path("capped".into()));
        engine
            .write(&dataset().repartition(8), &spec, &EngineConf::new())
            .await
            .unwrap();
        let parts = fs::read_dir(dir.path().join("capped"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| !is_hidden(&e.path()))
            .count();
        assert_eq!(parts, 2);
    }
}
