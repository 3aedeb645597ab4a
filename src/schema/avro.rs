//! Avro encoding for the online store
//!
//! The online wire unit is an [`EncodedRecord`]:
//!
//! - `key`: the primary key values cast to string, concatenated in ascending
//!   primary-key name order, encoded as a single Avro `string` datum
//! - `value`: every field of the feature group's Avro schema, in schema order,
//!   packed into one record datum of the encoded schema
//!
//! Complex features (arrays, maps, structs) are first encoded on their own
//! against their field schema and travel as nullable bytes inside the value
//! record. Both encodings are raw datums without container headers.

use crate::dataset::{DataType, Dataset, Field, Value};
use crate::error::{FeatureStoreError, Result};
use crate::featurestore::feature_group::parse_avro;
use crate::featurestore::FeatureGroupDescriptor;
use apache_avro::types::Value as AvroValue;
use apache_avro::{from_avro_datum, to_avro_datum, Schema as AvroSchema};
use bytes::Bytes;
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};

/// One key/value pair on the online topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    pub key: Bytes,
    pub value: Bytes,
}

fn codec_err(context: &str, e: apache_avro::Error) -> FeatureStoreError {
    FeatureStoreError::codec_msg(format!("{}: {}", context, e))
}

/// Convert a cell value into its Avro form, before schema resolution
pub fn to_avro_value(value: &Value) -> AvroValue {
    match value {
        Value::Null => AvroValue::Null,
        Value::Boolean(v) => AvroValue::Boolean(*v),
        Value::Int(v) => AvroValue::Int(*v),
        Value::Long(v) => AvroValue::Long(*v),
        Value::Float(v) => AvroValue::Float(*v),
        Value::Double(v) => AvroValue::Double(*v),
        Value::String(v) => AvroValue::String(v.clone()),
        Value::Bytes(v) => AvroValue::Bytes(v.clone()),
        Value::Array(items) => AvroValue::Array(items.iter().map(to_avro_value).collect()),
        Value::Map(entries) => AvroValue::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), to_avro_value(v)))
                .collect::<HashMap<_, _>>(),
        ),
        Value::Struct(fields) => AvroValue::Record(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), to_avro_value(v)))
                .collect(),
        ),
    }
}

/// Convert a decoded Avro value back into a cell value
pub fn from_avro_value(value: AvroValue) -> Result<Value> {
    Ok(match value {
        AvroValue::Null => Value::Null,
        AvroValue::Boolean(v) => Value::Boolean(v),
        AvroValue::Int(v) | AvroValue::Date(v) | AvroValue::TimeMillis(v) => Value::Int(v),
        AvroValue::Long(v)
        | AvroValue::TimeMicros(v)
        | AvroValue::TimestampMillis(v)
        | AvroValue::TimestampMicros(v)
        | AvroValue::LocalTimestampMillis(v)
        | AvroValue::LocalTimestampMicros(v) => Value::Long(v),
        AvroValue::Float(v) => Value::Float(v),
        AvroValue::Double(v) => Value::Double(v),
        AvroValue::String(v) | AvroValue::Enum(_, v) => Value::String(v),
        AvroValue::Bytes(v) | AvroValue::Fixed(_, v) => Value::Bytes(v),
        AvroValue::Union(_, inner) => from_avro_value(*inner)?,
        AvroValue::Array(items) => Value::Array(
            items
                .into_iter()
                .map(from_avro_value)
                .collect::<Result<Vec<_>>>()?,
        ),
        AvroValue::Map(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| Ok((k, from_avro_value(v)?)))
                .collect::<Result<BTreeMap<_, _>>>()?,
        ),
        AvroValue::Record(fields) => Value::Struct(
            fields
                .into_iter()
                .map(|(k, v)| Ok((k, from_avro_value(v)?)))
                .collect::<Result<Vec<_>>>()?,
        ),
        other => {
            return Err(FeatureStoreError::codec_msg(format!(
                "unsupported avro value: {:?}",
                other
            )))
        }
    })
}

/// Encode one value as a raw datum of `schema`
pub fn encode_datum(schema: &AvroSchema, value: &Value) -> Result<Vec<u8>> {
    let resolved = to_avro_value(value)
        .resolve(schema)
        .map_err(|e| codec_err("value does not match schema", e))?;
    to_avro_datum(schema, resolved).map_err(|e| codec_err("failed to encode datum", e))
}

/// Decode a raw datum of `schema`
pub fn decode_datum(schema: &AvroSchema, bytes: &[u8]) -> Result<Value> {
    let mut reader = bytes;
    let value = from_avro_datum(schema, &mut reader, None)
        .map_err(|e| codec_err("failed to decode datum", e))?;
    from_avro_value(value)
}

/// Replace every complex column by its Avro datum against the field schema
///
/// Nulls stay null and column order is preserved. A dataset without complex
/// features is returned unchanged.
pub fn encode_complex_fields(
    dataset: &Dataset,
    complex_features: &[String],
    feature_group: &FeatureGroupDescriptor,
) -> Result<Dataset> {
    let mut encoded = dataset.clone();
    for feature in complex_features {
        let schema = parse_avro(&feature_group.feature_avro_schema(feature)?)?;
        encoded = encoded.map_column(feature, DataType::Binary, |value| {
            if value.is_null() {
                Ok(Value::Null)
            } else {
                encode_datum(&schema, value).map(Value::Bytes)
            }
        })?;
    }
    Ok(encoded)
}

/// Key of one row: sorted primary key values, string cast and concatenated
pub fn encode_key(row: &[Value], key_indices: &[(usize, &str)]) -> Result<Bytes> {
    let mut key = String::new();
    for (idx, name) in key_indices {
        let part = row[*idx].cast_to_string().ok_or_else(|| {
            FeatureStoreError::codec_msg(format!(
                "primary key `{}` must be a non-null scalar, got {}",
                name, row[*idx]
            ))
        })?;
        key.push_str(&part);
    }
    to_avro_datum(&AvroSchema::String, AvroValue::String(key))
        .map(Bytes::from)
        .map_err(|e| codec_err("failed to encode key", e))
}

/// Encode a dataset whose complex fields are already sub-encoded
pub fn to_wire_format(
    dataset: &Dataset,
    feature_group: &FeatureGroupDescriptor,
) -> Result<Vec<EncodedRecord>> {
    let locate = |name: &str| {
        dataset.column_index(name).ok_or_else(|| {
            FeatureStoreError::codec_msg(format!(
                "feature `{}` of {} is missing from the dataset",
                name,
                feature_group.table_name()
            ))
        })
    };

    let key_indices = feature_group
        .sorted_primary_key()
        .into_iter()
        .map(|name| Ok((locate(name)?, name)))
        .collect::<Result<Vec<_>>>()?;
    let field_names = feature_group.avro_field_names()?;
    let value_indices = field_names
        .iter()
        .map(|name| locate(name))
        .collect::<Result<Vec<_>>>()?;
    let value_schema = feature_group.parsed_encoded_avro_schema()?;

    dataset
        .rows()
        .iter()
        .map(|row| {
            let key = encode_key(row, &key_indices)?;
            let record = AvroValue::Record(
                field_names
                    .iter()
                    .zip(&value_indices)
                    .map(|(name, idx)| (name.clone(), to_avro_value(&row[*idx])))
                    .collect(),
            );
            let resolved = record
                .resolve(&value_schema)
                .map_err(|e| codec_err("row does not match the encoded schema", e))?;
            let value = to_avro_datum(&value_schema, resolved)
                .map_err(|e| codec_err("failed to encode value", e))?;
            Ok(EncodedRecord {
                key,
                value: Bytes::from(value),
            })
        })
        .collect()
}

/// Decode an online key back into the concatenated key string
pub fn decode_key(bytes: &[u8]) -> Result<String> {
    match decode_datum(&AvroSchema::String, bytes)? {
        Value::String(s) => Ok(s),
        other => Err(FeatureStoreError::codec_msg(format!(
            "key decoded to a non-string value {}",
            other
        ))),
    }
}

/// Decode an online value into `(field, value)` pairs in schema order
///
/// Complex fields are decoded a second time against their field schema.
pub fn decode_value(
    bytes: &[u8],
    feature_group: &FeatureGroupDescriptor,
) -> Result<Vec<(String, Value)>> {
    let schema = feature_group.parsed_encoded_avro_schema()?;
    let fields = match decode_datum(&schema, bytes)? {
        Value::Struct(fields) => fields,
        other => {
            return Err(FeatureStoreError::codec_msg(format!(
                "value decoded to a non-record value {}",
                other
            )))
        }
    };
    let complex = feature_group.complex_features();
    fields
        .into_iter()
        .map(|(name, value)| match value {
            Value::Bytes(bytes) if complex.contains(&name) => {
                let field_schema = parse_avro(&feature_group.feature_avro_schema(&name)?)?;
                let decoded = decode_datum(&field_schema, &bytes)?;
                Ok((name, decoded))
            }
            other => Ok((name, other)),
        })
        .collect()
}

fn avro_name(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

fn avro_type(data_type: &DataType, path: &str) -> JsonValue {
    match data_type {
        DataType::Boolean => json!("boolean"),
        DataType::Int => json!("int"),
        DataType::Long => json!("long"),
        DataType::Float => json!("float"),
        DataType::Double => json!("double"),
        DataType::String => json!("string"),
        DataType::Binary => json!("bytes"),
        DataType::Array(inner) => json!({
            "type": "array",
            "items": nullable(inner, &format!("{}_item", path)),
        }),
        DataType::Map(inner) => json!({
            "type": "map",
            "values": nullable(inner, &format!("{}_value", path)),
        }),
        DataType::Struct(fields) => json!({
            "type": "record",
            "name": avro_name(path),
            "fields": record_fields(fields, path),
        }),
    }
}

fn nullable(data_type: &DataType, path: &str) -> JsonValue {
    json!(["null", avro_type(data_type, path)])
}

fn record_fields(fields: &[Field], path: &str) -> Vec<JsonValue> {
    fields
        .iter()
        .map(|f| {
            json!({
                "name": f.name,
                "type": nullable(&f.data_type, &format!("{}_{}", path, f.name)),
            })
        })
        .collect()
}

/// Record schema with one nullable field per column
pub fn dataset_avro_schema(fields: &[Field], name: &str) -> Result<String> {
    let schema = json!({
        "type": "record",
        "name": avro_name(name),
        "namespace": "featurestore",
        "fields": record_fields(fields, name),
    });
    let text = schema.to_string();
    parse_avro(&text)?;
    Ok(text)
}
