//! Versioned offline tables
//!
//! [`TimeTravelEngine`] is the boundary to a table format that keeps a commit
//! timeline. [`VersionedTableStore`] is an in-memory implementation: every
//! commit stores a full snapshot keyed by primary key, so reads as of any
//! commit are exact.

use super::WriteOperation;
use crate::dataset::{Dataset, Field, Value};
use crate::engine::Options;
use crate::error::{FeatureStoreError, Result};
use crate::featurestore::FeatureGroupDescriptor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Kind of a commit on the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitKind {
    Insert,
    Upsert,
    BulkInsert,
    Delete,
}

impl From<WriteOperation> for CommitKind {
    fn from(operation: WriteOperation) -> Self {
        match operation {
            WriteOperation::Append | WriteOperation::Overwrite => CommitKind::Insert,
            WriteOperation::Upsert => CommitKind::Upsert,
            WriteOperation::BulkInsert => CommitKind::BulkInsert,
        }
    }
}

/// Summary of one commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitDetails {
    pub commit_id: u64,
    pub committed_at: DateTime<Utc>,
    pub kind: CommitKind,
    pub rows_inserted: usize,
    pub rows_updated: usize,
    pub rows_deleted: usize,
    pub validation_id: Option<String>,
}

/// Table format that keeps a commit timeline
#[async_trait]
pub trait TimeTravelEngine: Send + Sync {
    /// Write rows as a new commit
    async fn save(
        &self,
        feature_group: &FeatureGroupDescriptor,
        dataset: &Dataset,
        operation: WriteOperation,
        options: &Options,
        validation_id: Option<&str>,
    ) -> Result<CommitDetails>;

    /// Remove every row as a new commit
    async fn delete_content(&self, feature_group: &FeatureGroupDescriptor) -> Result<CommitDetails>;

    /// Remove the rows whose primary keys appear in `keys` as a new commit
    async fn commit_delete(
        &self,
        feature_group: &FeatureGroupDescriptor,
        keys: &Dataset,
    ) -> Result<CommitDetails>;

    /// Commits, newest first
    async fn commit_details(
        &self,
        feature_group: &FeatureGroupDescriptor,
        limit: Option<usize>,
    ) -> Result<Vec<CommitDetails>>;

    /// Table contents as of a point in time, or the latest commit
    async fn read(
        &self,
        feature_group: &FeatureGroupDescriptor,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Dataset>;
}

type RowKey = Vec<String>;

#[derive(Debug, Clone)]
struct Commit {
    details: CommitDetails,
    schema: Arc<Vec<Field>>,
    rows: Arc<BTreeMap<RowKey, Vec<Value>>>,
}

#[derive(Debug, Default)]
struct Table {
    commits: Vec<Commit>,
    next_row: u64,
}

impl Table {
    fn head(&self) -> (Arc<Vec<Field>>, Arc<BTreeMap<RowKey, Vec<Value>>>) {
        match self.commits.last() {
            Some(c) => (c.schema.clone(), c.rows.clone()),
            None => (Arc::default(), Arc::default()),
        }
    }

    fn push(
        &mut self,
        kind: CommitKind,
        schema: Vec<Field>,
        rows: BTreeMap<RowKey, Vec<Value>>,
        counts: (usize, usize, usize),
        validation_id: Option<&str>,
    ) -> CommitDetails {
        let details = CommitDetails {
            commit_id: self.commits.len() as u64 + 1,
            committed_at: Utc::now(),
            kind,
            rows_inserted: counts.0,
            rows_updated: counts.1,
            rows_deleted: counts.2,
            validation_id: validation_id.map(str::to_string),
        };
        self.commits.push(Commit {
            details: details.clone(),
            schema: Arc::new(schema),
            rows: Arc::new(rows),
        });
        details
    }
}

/// In-memory [`TimeTravelEngine`]
#[derive(Debug, Default)]
pub struct VersionedTableStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl VersionedTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commits of a table
    pub fn commit_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .get(table)
            .map(|t| t.commits.len())
            .unwrap_or(0)
    }
}

/// Primary key columns of `dataset`, sorted by name
fn key_columns(feature_group: &FeatureGroupDescriptor, dataset: &Dataset) -> Result<Vec<usize>> {
    feature_group
        .sorted_primary_key()
        .into_iter()
        .map(|name| {
            dataset.column_index(name).ok_or_else(|| {
                FeatureStoreError::storage_msg(format!(
                    "primary key `{}` missing from write to {}",
                    name,
                    feature_group.table_name()
                ))
            })
        })
        .collect()
}

fn row_key(row: &[Value], key_idx: &[usize]) -> Result<RowKey> {
    key_idx
        .iter()
        .map(|&i| {
            row[i].cast_to_string().ok_or_else(|| {
                FeatureStoreError::InvalidData(format!("primary key value {} is not a scalar", row[i]))
            })
        })
        .collect()
}

/// Table schema widened with the dataset's new columns
fn evolve_schema(current: &[Field], incoming: &[Field]) -> Vec<Field> {
    let mut schema = current.to_vec();
    for field in incoming {
        if !schema.iter().any(|f| f.name == field.name) {
            schema.push(field.clone());
        }
    }
    schema
}

fn widen_rows(rows: &mut BTreeMap<RowKey, Vec<Value>>, width: usize) {
    for row in rows.values_mut() {
        row.resize(width, Value::Null);
    }
}

#[async_trait]
impl TimeTravelEngine for VersionedTableStore {
    async fn save(
        &self,
        feature_group: &FeatureGroupDescriptor,
        dataset: &Dataset,
        operation: WriteOperation,
        options: &Options,
        validation_id: Option<&str>,
    ) -> Result<CommitDetails> {
        let table_name = feature_group.table_name();
        let key_idx = key_columns(feature_group, dataset)?;
        let mut tables = self.tables.write();
        let table = tables.entry(table_name.clone()).or_default();

        let (schema, rows) = table.head();
        let schema = evolve_schema(&schema, dataset.schema());
        let mut rows = if operation == WriteOperation::Overwrite {
            BTreeMap::new()
        } else {
            rows.as_ref().clone()
        };
        widen_rows(&mut rows, schema.len());

        let positions: Vec<Option<usize>> = schema
            .iter()
            .map(|f| dataset.column_index(&f.name))
            .collect();
        let (mut inserted, mut updated) = (0, 0);
        for row in dataset.rows() {
            let key = if key_idx.is_empty() {
                table.next_row += 1;
                vec![format!("{:020}", table.next_row)]
            } else {
                row_key(row, &key_idx)?
            };
            let stored: Vec<Value> = positions
                .iter()
                .map(|p| p.map(|i| row[i].clone()).unwrap_or(Value::Null))
                .collect();
            match rows.insert(key, stored) {
                Some(_) => updated += 1,
                None => inserted += 1,
            }
        }

        let details = table.push(
            operation.into(),
            schema,
            rows,
            (inserted, updated, 0),
            validation_id,
        );
        info!(
            table = %table_name,
            commit_id = details.commit_id,
            inserted,
            updated,
            options = options.len(),
            "Committed to versioned table"
        );
        Ok(details)
    }

    async fn delete_content(&self, feature_group: &FeatureGroupDescriptor) -> Result<CommitDetails> {
        let table_name = feature_group.table_name();
        let mut tables = self.tables.write();
        let table = tables.entry(table_name.clone()).or_default();
        let (schema, rows) = table.head();
        let deleted = rows.len();
        let details = table.push(
            CommitKind::Delete,
            schema.as_ref().clone(),
            BTreeMap::new(),
            (0, 0, deleted),
            None,
        );
        debug!(table = %table_name, deleted, "Deleted table content");
        Ok(details)
    }

    async fn commit_delete(
        &self,
        feature_group: &FeatureGroupDescriptor,
        keys: &Dataset,
    ) -> Result<CommitDetails> {
        let key_idx = key_columns(feature_group, keys)?;
        if key_idx.is_empty() {
            return Err(FeatureStoreError::Config(format!(
                "feature group {} has no primary key to delete by",
                feature_group.table_name()
            )));
        }
        let mut tables = self.tables.write();
        let table = tables.get_mut(&feature_group.table_name()).ok_or_else(|| {
            FeatureStoreError::storage_msg(format!(
                "table {} has no commits",
                feature_group.table_name()
            ))
        })?;
        let (schema, rows) = table.head();
        let mut rows = rows.as_ref().clone();
        let mut deleted = 0;
        for row in keys.rows() {
            if rows.remove(&row_key(row, &key_idx)?).is_some() {
                deleted += 1;
            }
        }
        Ok(table.push(
            CommitKind::Delete,
            schema.as_ref().clone(),
            rows,
            (0, 0, deleted),
            None,
        ))
    }

    async fn commit_details(
        &self,
        feature_group: &FeatureGroupDescriptor,
        limit: Option<usize>,
    ) -> Result<Vec<CommitDetails>> {
        let tables = self.tables.read();
        let commits = tables
            .get(&feature_group.table_name())
            .map(|t| t.commits.as_slice())
            .unwrap_or_default();
        Ok(commits
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .map(|c| c.details.clone())
            .collect())
    }

    async fn read(
        &self,
        feature_group: &FeatureGroupDescriptor,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Dataset> {
        let tables = self.tables.read();
        let commit = tables
            .get(&feature_group.table_name())
            .and_then(|t| {
                t.commits
                    .iter()
                    .rev()
                    .find(|c| as_of.map_or(true, |ts| c.details.committed_at <= ts))
            })
            .ok_or_else(|| {
                FeatureStoreError::storage_msg(format!(
                    "no commit of {} at the requested time",
                    feature_group.table_name()
                ))
            })?;
        Dataset::new(
            commit.schema.as_ref().clone(),
            commit.rows.values().cloned().collect(),
        )
    }
}
