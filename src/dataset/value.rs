//! Cell values and column types

use crate::error::{FeatureStoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Struct(Vec<(String, Value)>),
}

impl Value {
    /// Returns true if this is `Value::Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Long(v) => Some(*v as f64),
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Cast to string the way the execution engine does
    ///
    /// Returns `None` for nulls and nested values, which have no scalar string form.
    pub fn cast_to_string(&self) -> Option<String> {
        match self {
            Value::Null | Value::Array(_) | Value::Map(_) | Value::Struct(_) => None,
            Value::Boolean(v) => Some(v.to_string()),
            Value::Int(v) => Some(v.to_string()),
            Value::Long(v) => Some(v.to_string()),
            // Debug formatting keeps the trailing ".0" on integral floats
            Value::Float(v) => Some(format!("{:?}", v)),
            Value::Double(v) => Some(format!("{:?}", v)),
            Value::String(v) => Some(v.clone()),
            Value::Bytes(v) => Some(String::from_utf8_lossy(v).into_owned()),
        }
    }

    /// Best-effort type of this value; `None` for nulls
    pub fn data_type(&self) -> Option<DataType> {
        Some(match self {
            Value::Null => return None,
            Value::Boolean(_) => DataType::Boolean,
            Value::Int(_) => DataType::Int,
            Value::Long(_) => DataType::Long,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::String(_) => DataType::String,
            Value::Bytes(_) => DataType::Binary,
            Value::Array(items) => DataType::Array(Box::new(
                items
                    .iter()
                    .find_map(Value::data_type)
                    .unwrap_or(DataType::String),
            )),
            Value::Map(entries) => DataType::Map(Box::new(
                entries
                    .values()
                    .find_map(Value::data_type)
                    .unwrap_or(DataType::String),
            )),
            Value::Struct(fields) => DataType::Struct(
                fields
                    .iter()
                    .map(|(name, v)| {
                        Field::new(name.clone(), v.data_type().unwrap_or(DataType::String))
                    })
                    .collect(),
            ),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}:{}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Struct(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}:{}", k, v)?;
                }
                write!(f, "}}")
            }
            scalar => write!(f, "{}", scalar.cast_to_string().unwrap_or_default()),
        }
    }
}

/// Column data type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    String,
    Binary,
    Array(Box<DataType>),
    /// Map with string keys
    Map(Box<DataType>),
    Struct(Vec<Field>),
}

impl DataType {
    /// Engine type string, e.g. `bigint` or `array<double>`
    pub fn simple_string(&self) -> String {
        match self {
            DataType::Boolean => "boolean".to_string(),
            DataType::Int => "int".to_string(),
            DataType::Long => "bigint".to_string(),
            DataType::Float => "float".to_string(),
            DataType::Double => "double".to_string(),
            DataType::String => "string".to_string(),
            DataType::Binary => "binary".to_string(),
            DataType::Array(inner) => format!("array<{}>", inner.simple_string()),
            DataType::Map(inner) => format!("map<string,{}>", inner.simple_string()),
            DataType::Struct(fields) => {
                let inner: Vec<String> = fields
                    .iter()
                    .map(|f| format!("{}:{}", f.name, f.data_type.simple_string()))
                    .collect();
                format!("struct<{}>", inner.join(","))
            }
        }
    }

    /// Nested types need a binary sub-encoding on the online wire
    pub fn is_complex(&self) -> bool {
        matches!(
            self,
            DataType::Array(_) | DataType::Map(_) | DataType::Struct(_)
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.simple_string())
    }
}

impl FromStr for DataType {
    type Err = FeatureStoreError;

    /// Parse an engine type string such as `array<struct<a:int>>`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let lower = s.to_lowercase();
        if let Some(inner) = strip_wrapper(s, &lower, "array") {
            return Ok(DataType::Array(Box::new(inner.parse()?)));
        }
        if let Some(inner) = strip_wrapper(s, &lower, "map") {
            let parts = split_top_level(inner, ',');
            if parts.len() != 2 {
                return Err(FeatureStoreError::UnsupportedType(format!(
                    "malformed map type: {}",
                    s
                )));
            }
            let key: DataType = parts[0].parse()?;
            if key != DataType::String {
                return Err(FeatureStoreError::UnsupportedType(format!(
                    "map keys must be strings: {}",
                    s
                )));
            }
            return Ok(DataType::Map(Box::new(parts[1].parse()?)));
        }
        if let Some(inner) = strip_wrapper(s, &lower, "struct") {
            let fields = split_top_level(inner, ',')
                .into_iter()
                .filter(|part| !part.trim().is_empty())
                .map(|part| {
                    let (name, ty) = part.split_once(':').ok_or_else(|| {
                        FeatureStoreError::UnsupportedType(format!(
                            "malformed struct field `{}` in {}",
                            part, s
                        ))
                    })?;
                    Ok(Field::new(name.trim(), ty.parse()?))
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(DataType::Struct(fields));
        }
        match lower.as_str() {
            "boolean" | "bool" => Ok(DataType::Boolean),
            "int" | "integer" | "smallint" | "tinyint" => Ok(DataType::Int),
            "bigint" | "long" => Ok(DataType::Long),
            "float" => Ok(DataType::Float),
            "double" => Ok(DataType::Double),
            "string" => Ok(DataType::String),
            "binary" | "bytes" => Ok(DataType::Binary),
            other => Err(FeatureStoreError::UnsupportedType(format!(
                "unsupported feature type: {}",
                other
            ))),
        }
    }
}

fn strip_wrapper<'a>(original: &'a str, lower: &str, name: &str) -> Option<&'a str> {
    let open = name.len();
    if lower.starts_with(name) && lower[open..].starts_with('<') && lower.ends_with('>') {
        Some(&original[open + 1..original.len() - 1])
    } else {
        None
    }
}

/// Split on `sep` outside of any `<...>` nesting
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Field {
    /// Create a nullable field
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    /// Mark the field as non-nullable
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}
