//! Accepted input shapes and their normalization into a [`Dataset`]

use super::value::{DataType, Field, Value};
use super::Dataset;
use crate::error::{FeatureStoreError, Result};
use std::str::FromStr;

/// A tabular input in any of the supported representations
#[derive(Debug, Clone, PartialEq)]
pub enum DataFrameInput {
    /// Already in the engine representation
    Native(Dataset),
    /// Named columns, column-major
    Columns(Vec<(String, Vec<Value>)>),
    /// Unnamed rows; columns become `col_0 .. col_n`
    Rows(Vec<Vec<Value>>),
    /// Flat row-major values plus a shape; only two dimensions are accepted
    Array { shape: Vec<usize>, values: Vec<Value> },
}

impl From<Dataset> for DataFrameInput {
    fn from(dataset: Dataset) -> Self {
        DataFrameInput::Native(dataset)
    }
}

impl DataFrameInput {
    /// Convert into the canonical dataset with lower-cased column names
    pub fn normalize(self) -> Result<Dataset> {
        match self {
            DataFrameInput::Native(dataset) => dataset.sanitize_names(),
            DataFrameInput::Columns(columns) => normalize_columns(columns),
            DataFrameInput::Rows(rows) => normalize_rows(rows),
            DataFrameInput::Array { shape, values } => normalize_array(shape, values),
        }
    }

    /// Short name of the representation, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            DataFrameInput::Native(_) => "native",
            DataFrameInput::Columns(_) => "columns",
            DataFrameInput::Rows(_) => "rows",
            DataFrameInput::Array { .. } => "array",
        }
    }
}

fn infer_type<'a>(values: impl Iterator<Item = &'a Value>) -> DataType {
    values
        .filter_map(Value::data_type)
        .next()
        .unwrap_or(DataType::String)
}

fn positional_schema(rows: &[Vec<Value>], width: usize) -> Vec<Field> {
    (0..width)
        .map(|i| {
            Field::new(
                format!("col_{}", i),
                infer_type(rows.iter().map(|row| &row[i])),
            )
        })
        .collect()
}

fn normalize_columns(columns: Vec<(String, Vec<Value>)>) -> Result<Dataset> {
    let height = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
    if let Some((name, values)) = columns.iter().find(|(_, v)| v.len() != height) {
        return Err(FeatureStoreError::UnsupportedType(format!(
            "column `{}` has {} values, expected {}",
            name,
            values.len(),
            height
        )));
    }
    let schema: Vec<Field> = columns
        .iter()
        .map(|(name, values)| Field::new(name.to_lowercase(), infer_type(values.iter())))
        .collect();
    let mut rows: Vec<Vec<Value>> = (0..height)
        .map(|_| Vec::with_capacity(columns.len()))
        .collect();
    for (_, values) in columns {
        for (row, value) in rows.iter_mut().zip(values) {
            row.push(value);
        }
    }
    Dataset::new(schema, rows)
}

fn normalize_rows(rows: Vec<Vec<Value>>) -> Result<Dataset> {
    let width = rows.first().map(Vec::len).unwrap_or(0);
    if let Some(row) = rows.iter().find(|row| row.len() != width) {
        return Err(FeatureStoreError::UnsupportedType(format!(
            "ragged nested rows: expected {} values per row, found {}",
            width,
            row.len()
        )));
    }
    let schema = positional_schema(&rows, width);
    Dataset::new(schema, rows)
}

fn normalize_array(shape: Vec<usize>, values: Vec<Value>) -> Result<Dataset> {
    if shape.len() != 2 {
        return Err(FeatureStoreError::UnsupportedType(format!(
            "Cannot convert numpy array that do not have two dimensions to a dataframe. \
             The number of dimensions are: {}",
            shape.len()
        )));
    }
    let (height, width) = (shape[0], shape[1]);
    if height.checked_mul(width) != Some(values.len()) {
        return Err(FeatureStoreError::UnsupportedType(format!(
            "array of shape {:?} cannot hold {} values",
            shape,
            values.len()
        )));
    }
    let rows: Vec<Vec<Value>> = if width == 0 {
        vec![Vec::new(); height]
    } else {
        values.chunks(width).map(<[Value]>::to_vec).collect()
    };
    let schema = positional_schema(&rows, width);
    Dataset::new(schema, rows)
}

/// Requested output representation of a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Native,
    Columns,
    Array,
    Rows,
}

impl FromStr for OutputKind {
    type Err = FeatureStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "default" | "spark" | "native" => Ok(OutputKind::Native),
            "pandas" | "columns" => Ok(OutputKind::Columns),
            "numpy" | "array" => Ok(OutputKind::Array),
            "python" | "rows" => Ok(OutputKind::Rows),
            other => Err(FeatureStoreError::UnsupportedType(format!(
                "Dataframe type `{}` not supported on this platform.",
                other
            ))),
        }
    }
}

/// A dataset converted to the requested representation
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetOutput {
    Native(Dataset),
    Columns(Vec<(String, Vec<Value>)>),
    Array { shape: [usize; 2], values: Vec<Value> },
    Rows(Vec<Vec<Value>>),
}

impl Dataset {
    /// Convert into the requested output representation
    pub fn into_output(self, kind: OutputKind) -> DatasetOutput {
        match kind {
            OutputKind::Native => DatasetOutput::Native(self),
            OutputKind::Rows => DatasetOutput::Rows(self.into_rows()),
            OutputKind::Array => {
                let shape = [self.num_rows(), self.num_columns()];
                let values = self.into_rows().into_iter().flatten().collect();
                DatasetOutput::Array { shape, values }
            }
            OutputKind::Columns => {
                let names: Vec<String> = self.schema().iter().map(|f| f.name.clone()).collect();
                let mut columns: Vec<(String, Vec<Value>)> = names
                    .into_iter()
                    .map(|n| (n, Vec::with_capacity(self.num_rows())))
                    .collect();
                for row in self.into_rows() {
                    for (column, value) in columns.iter_mut().zip(row) {
                        column.1.push(value);
                    }
                }
                DatasetOutput::Columns(columns)
            }
        }
    }
}
