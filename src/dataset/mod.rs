//! In-memory tabular datasets
//!
//! A [`Dataset`] is the canonical tabular representation every write and
//! materialization call works on. It carries an ordered schema, row-major
//! values and a partition count that file writers use to decide how many part
//! files to produce.
//!
//! The relational operations the write core needs live here: column
//! selection, single-pass projection through registered functions, weighted
//! random split, coalesce and the empty-appended frame used when new features
//! are added to an existing group.

pub mod expr;
pub mod input;
pub mod split;
pub mod value;

pub use expr::{Expr, FunctionRegistry, Projection, ScalarFunction};
pub use input::{DataFrameInput, DatasetOutput, OutputKind};
pub use value::{DataType, Field, Value};

use crate::error::{FeatureStoreError, Result};
use std::collections::HashSet;

/// An ordered, typed, row-major table
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    schema: Vec<Field>,
    rows: Vec<Vec<Value>>,
    partitions: usize,
}

impl Dataset {
    /// Create a dataset, checking every row against the schema width
    pub fn new(schema: Vec<Field>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for field in &schema {
            if !seen.insert(field.name.as_str()) {
                return Err(FeatureStoreError::InvalidData(format!(
                    "duplicate column name: {}",
                    field.name
                )));
            }
        }
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != schema.len())
        {
            return Err(FeatureStoreError::InvalidData(format!(
                "row {} has {} values, schema has {} columns",
                i,
                row.len(),
                schema.len()
            )));
        }
        Ok(Self {
            schema,
            rows,
            partitions: 1,
        })
    }

    /// A dataset with the given schema and no rows
    pub fn empty(schema: Vec<Field>) -> Self {
        Self {
            schema,
            rows: Vec::new(),
            partitions: 1,
        }
    }

    pub fn schema(&self) -> &[Field] {
        &self.schema
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.schema.len()
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions
    }

    /// Column names in physical order
    pub fn columns(&self) -> Vec<&str> {
        self.schema.iter().map(|f| f.name.as_str()).collect()
    }

    /// Position of a column by exact name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.iter().position(|f| f.name == name)
    }

    /// Field for a column by exact name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.schema.iter().find(|f| f.name == name)
    }

    /// Values of one column, top to bottom
    pub fn column_values(&self, name: &str) -> Result<Vec<&Value>> {
        let idx = self.require_column(name)?;
        Ok(self.rows.iter().map(|row| &row[idx]).collect())
    }

    fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| {
            FeatureStoreError::InvalidData(format!(
                "column `{}` not found, available columns: [{}]",
                name,
                self.columns().join(", ")
            ))
        })
    }

    /// Project onto the named columns, in the given order
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Dataset> {
        let indices = names
            .iter()
            .map(|n| self.require_column(n.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let schema = indices.iter().map(|i| self.schema[*i].clone()).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|i| row[*i].clone()).collect())
            .collect();
        Ok(Dataset {
            schema,
            rows,
            partitions: self.partitions,
        })
    }

    /// Evaluate all projections in a single pass over the rows
    ///
    /// Every expression reads from the input row, never from the output of
    /// another projection in the same call.
    pub fn select_expr(
        &self,
        projections: &[Projection],
        registry: &FunctionRegistry,
    ) -> Result<Dataset> {
        let mut plan = Vec::with_capacity(projections.len());
        let mut schema = Vec::with_capacity(projections.len());
        let mut aliases = HashSet::new();
        for projection in projections {
            if !aliases.insert(projection.alias.as_str()) {
                return Err(FeatureStoreError::Config(format!(
                    "projection alias `{}` used more than once",
                    projection.alias
                )));
            }
            let idx = self.require_column(projection.source_column())?;
            let function = projection.resolve_function(registry)?;
            let source = &self.schema[idx];
            let data_type = function
                .map(|f| f.output_type())
                .unwrap_or_else(|| source.data_type.clone());
            schema.push(Field {
                name: projection.alias.clone(),
                data_type,
                nullable: source.nullable || function.is_some(),
            });
            plan.push((idx, function.cloned()));
        }

        let mut rows = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let mut out = Vec::with_capacity(plan.len());
            for (idx, function) in &plan {
                let value = match function {
                    Some(f) => f.invoke(&row[*idx])?,
                    None => row[*idx].clone(),
                };
                out.push(value);
            }
            rows.push(out);
        }

        Ok(Dataset {
            schema,
            rows,
            partitions: self.partitions,
        })
    }

    /// Replace the values of one column, keeping its position
    pub fn map_column<F>(&self, name: &str, data_type: DataType, mut f: F) -> Result<Dataset>
    where
        F: FnMut(&Value) -> Result<Value>,
    {
        let idx = self.require_column(name)?;
        let mut out = self.clone();
        out.schema[idx].data_type = data_type;
        for row in &mut out.rows {
            row[idx] = f(&row[idx])?;
        }
        Ok(out)
    }

    /// Lower-case every column name
    pub fn sanitize_names(mut self) -> Result<Dataset> {
        let mut seen = HashSet::new();
        for field in &mut self.schema {
            field.name = field.name.to_lowercase();
            if !seen.insert(field.name.clone()) {
                return Err(FeatureStoreError::InvalidData(format!(
                    "column names collide after lower-casing: {}",
                    field.name
                )));
            }
        }
        Ok(self)
    }

    /// Weighted random split, see [`split::random_split`]
    pub fn random_split(&self, weights: &[f64], seed: u64) -> Result<Vec<Dataset>> {
        split::random_split(self, weights, seed)
    }

    /// Reduce the number of partitions to at most `n`
    pub fn coalesce(mut self, n: usize) -> Dataset {
        self.partitions = self.partitions.min(n.max(1));
        self
    }

    /// Set the number of partitions
    pub fn repartition(mut self, n: usize) -> Dataset {
        self.partitions = n.max(1);
        self
    }

    /// Keep the first `n` rows
    pub fn limit(mut self, n: usize) -> Dataset {
        self.rows.truncate(n);
        self
    }

    /// Append a column filled with nulls
    pub fn with_null_column(mut self, name: impl Into<String>, data_type: DataType) -> Result<Dataset> {
        let name = name.into();
        if self.column_index(&name).is_some() {
            return Err(FeatureStoreError::InvalidData(format!(
                "column `{}` already exists",
                name
            )));
        }
        self.schema.push(Field::new(name, data_type));
        for row in &mut self.rows {
            row.push(Value::Null);
        }
        Ok(self)
    }

    /// Row slices per partition, in order; used by file writers
    pub fn partition_chunks(&self) -> Vec<&[Vec<Value>]> {
        if self.rows.is_empty() {
            return vec![&self.rows[..]];
        }
        let parts = self.partitions.min(self.rows.len()).max(1);
        let chunk = self.rows.len().div_ceil(parts);
        self.rows.chunks(chunk).collect()
    }
}

/// Empty frame with the current schema plus a typed null column per new feature
pub fn get_empty_appended_dataframe(dataset: &Dataset, new_features: &[Field]) -> Result<Dataset> {
    let mut out = dataset.clone().limit(0);
    for feature in new_features {
        out = out.with_null_column(feature.name.clone(), feature.data_type.clone())?;
    }
    Ok(out)
}
