//! Per-format file encoding for the local engine
//!
//! Each function handles one file. Directory layout, save modes and
//! partitioning live in [`super::local`].

use super::{DataFormat, Options};
use crate::dataset::{DataType, Field, Value};
use crate::error::{FeatureStoreError, Result};
use crate::featurestore::feature_group::parse_avro;
use crate::schema::avro::{dataset_avro_schema, from_avro_value, to_avro_value};
use apache_avro::types::Value as AvroValue;
use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Float32Array, Float64Array, Int32Array,
    Int64Array, RecordBatch, StringArray,
};
use arrow::datatypes::{DataType as ArrowType, Field as ArrowField, Schema as ArrowSchema};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// Rows read from one file
pub(crate) type FileContents = (Vec<Field>, Vec<Vec<Value>>);

/// File extension of part files
pub(crate) fn extension(format: DataFormat) -> Result<&'static str> {
    match format.engine_format() {
        DataFormat::Csv => Ok("csv"),
        DataFormat::Json => Ok("json"),
        DataFormat::Avro => Ok("avro"),
        DataFormat::Parquet | DataFormat::Hive => Ok("parquet"),
        other => Err(unsupported(other)),
    }
}

fn unsupported(format: DataFormat) -> FeatureStoreError {
    FeatureStoreError::UnsupportedType(format!(
        "format `{}` is not supported by the local engine",
        format
    ))
}

fn storage<E: std::fmt::Display>(context: &str) -> impl FnOnce(E) -> FeatureStoreError + '_ {
    move |e| FeatureStoreError::storage_msg(format!("{}: {}", context, e))
}

/// Write one part file
pub(crate) fn write_file(
    path: &Path,
    format: DataFormat,
    schema: &[Field],
    rows: &[Vec<Value>],
    options: &Options,
) -> Result<()> {
    match format.engine_format() {
        DataFormat::Csv => write_csv(path, schema, rows, options),
        DataFormat::Json => write_json(path, schema, rows),
        DataFormat::Avro => write_avro(path, schema, rows),
        DataFormat::Parquet | DataFormat::Hive => write_parquet(path, schema, rows),
        other => Err(unsupported(other)),
    }
}

/// Read one part file
pub(crate) fn read_file(path: &Path, format: DataFormat, options: &Options) -> Result<FileContents> {
    match format.engine_format() {
        DataFormat::Csv => read_csv(path, options),
        DataFormat::Json => read_json(path),
        DataFormat::Avro => read_avro(path),
        DataFormat::Parquet | DataFormat::Hive => read_parquet(path),
        other => Err(unsupported(other)),
    }
}

fn option_flag(options: &Options, key: &str) -> bool {
    options
        .get(key)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

fn delimiter(options: &Options) -> Result<u8> {
    let d = options.get("delimiter").map(String::as_str).unwrap_or(",");
    match d.as_bytes() {
        [b] => Ok(*b),
        _ => Err(FeatureStoreError::Config(format!(
            "csv delimiter must be a single byte, got {:?}",
            d
        ))),
    }
}

fn write_csv(path: &Path, schema: &[Field], rows: &[Vec<Value>], options: &Options) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter(options)?)
        .has_headers(false)
        .from_path(path)
        .map_err(storage("Failed to create csv file"))?;
    if option_flag(options, "header") {
        writer
            .write_record(schema.iter().map(|f| f.name.as_str()))
            .map_err(storage("Failed to write csv header"))?;
    }
    for row in rows {
        writer
            .write_record(row.iter().map(|v| match v {
                Value::Null => String::new(),
                other => other.to_string(),
            }))
            .map_err(storage("Failed to write csv row"))?;
    }
    writer.flush().map_err(storage("Failed to flush csv file"))?;
    Ok(())
}

fn infer_csv_column(cells: &[Option<&str>]) -> DataType {
    let present: Vec<&str> = cells.iter().flatten().copied().collect();
    if present.is_empty() {
        DataType::String
    } else if present.iter().all(|c| c.parse::<i64>().is_ok()) {
        DataType::Long
    } else if present.iter().all(|c| c.parse::<f64>().is_ok()) {
        DataType::Double
    } else if present
        .iter()
        .all(|c| c.eq_ignore_ascii_case("true") || c.eq_ignore_ascii_case("false"))
    {
        DataType::Boolean
    } else {
        DataType::String
    }
}

fn parse_csv_cell(cell: Option<&str>, data_type: &DataType) -> Value {
    let Some(cell) = cell else {
        return Value::Null;
    };
    match data_type {
        DataType::Long => cell.parse().map(Value::Long).unwrap_or(Value::Null),
        DataType::Double => cell.parse().map(Value::Double).unwrap_or(Value::Null),
        DataType::Boolean => Value::Boolean(cell.eq_ignore_ascii_case("true")),
        _ => Value::String(cell.to_string()),
    }
}

fn read_csv(path: &Path, options: &Options) -> Result<FileContents> {
    let header = option_flag(options, "header");
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter(options)?)
        .has_headers(header)
        .flexible(false)
        .from_path(path)
        .map_err(storage("Failed to open csv file"))?;

    let mut records = Vec::new();
    for record in reader.records() {
        records.push(record.map_err(storage("Failed to read csv row"))?);
    }
    let names: Vec<String> = if header {
        reader
            .headers()
            .map_err(storage("Failed to read csv header"))?
            .iter()
            .map(str::to_string)
            .collect()
    } else {
        let width = records.first().map(|r| r.len()).unwrap_or(0);
        (0..width).map(|i| format!("_c{}", i)).collect()
    };

    let cells: Vec<Vec<Option<&str>>> = records
        .iter()
        .map(|r| r.iter().map(|c| (!c.is_empty()).then_some(c)).collect())
        .collect();
    let infer = option_flag(options, "inferSchema");
    let schema: Vec<Field> = names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let data_type = if infer {
                let column: Vec<Option<&str>> = cells.iter().map(|row| row[i]).collect();
                infer_csv_column(&column)
            } else {
                DataType::String
            };
            Field::new(name, data_type)
        })
        .collect();
    let rows = cells
        .iter()
        .map(|row| {
            row.iter()
                .zip(&schema)
                .map(|(cell, field)| parse_csv_cell(*cell, &field.data_type))
                .collect()
        })
        .collect();
    Ok((schema, rows))
}

fn to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Null => Json::Null,
        Value::Boolean(v) => Json::Bool(*v),
        Value::Int(v) => Json::from(*v),
        Value::Long(v) => Json::from(*v),
        Value::Float(v) => serde_json::Number::from_f64(*v as f64)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Double(v) => serde_json::Number::from_f64(*v)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::String(v) => Json::String(v.clone()),
        Value::Bytes(v) => Json::Array(v.iter().map(|b| Json::from(*b)).collect()),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
        Value::Struct(fields) => Json::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
    }
}

fn from_json(value: serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match value {
        Json::Null => Value::Null,
        Json::Bool(v) => Value::Boolean(v),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Long(i),
            None => n.as_f64().map(Value::Double).unwrap_or(Value::Null),
        },
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::Array(items.into_iter().map(from_json).collect()),
        Json::Object(fields) => Value::Struct(
            fields
                .into_iter()
                .map(|(k, v)| (k, from_json(v)))
                .collect(),
        ),
    }
}

fn write_json(path: &Path, schema: &[Field], rows: &[Vec<Value>]) -> Result<()> {
    let file = File::create(path).map_err(storage("Failed to create json file"))?;
    let mut out = BufWriter::new(file);
    for row in rows {
        let object: serde_json::Map<String, serde_json::Value> = schema
            .iter()
            .zip(row)
            .map(|(f, v)| (f.name.clone(), to_json(v)))
            .collect();
        serde_json::to_writer(&mut out, &object)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Column types from the first non-null value; integers widen to double
/// when a column mixes both
fn infer_columns(names: &[String], rows: &mut [Vec<Value>]) -> Vec<Field> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let mut data_type = None;
            let mut widen = false;
            for row in rows.iter() {
                match (row[i].data_type(), &data_type) {
                    (None, _) => {}
                    (Some(t), None) => data_type = Some(t),
                    (Some(DataType::Double), Some(DataType::Long))
                    | (Some(DataType::Long), Some(DataType::Double)) => widen = true,
                    _ => {}
                }
            }
            if widen {
                for row in rows.iter_mut() {
                    if let Value::Long(v) = row[i] {
                        row[i] = Value::Double(v as f64);
                    }
                }
                data_type = Some(DataType::Double);
            }
            Field::new(name.clone(), data_type.unwrap_or(DataType::String))
        })
        .collect()
}

fn read_json(path: &Path) -> Result<FileContents> {
    let file = File::open(path).map_err(storage("Failed to open json file"))?;
    let mut objects = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let object: BTreeMap<String, serde_json::Value> = serde_json::from_str(&line)?;
        objects.push(object);
    }
    let mut names: Vec<String> = Vec::new();
    for object in &objects {
        for key in object.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
    }
    let mut rows: Vec<Vec<Value>> = objects
        .into_iter()
        .map(|mut object| {
            names
                .iter()
                .map(|n| object.remove(n).map(from_json).unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    let schema = infer_columns(&names, &mut rows);
    Ok((schema, rows))
}

fn write_avro(path: &Path, schema: &[Field], rows: &[Vec<Value>]) -> Result<()> {
    let avro_schema = parse_avro(&dataset_avro_schema(schema, "record")?)?;
    let file = File::create(path).map_err(storage("Failed to create avro file"))?;
    let mut writer = apache_avro::Writer::new(&avro_schema, BufWriter::new(file));
    for row in rows {
        let record = AvroValue::Record(
            schema
                .iter()
                .zip(row)
                .map(|(f, v)| (f.name.clone(), to_avro_value(v)))
                .collect(),
        );
        let resolved = record
            .resolve(&avro_schema)
            .map_err(|e| FeatureStoreError::codec_msg(format!("row does not match schema: {}", e)))?;
        writer
            .append(resolved)
            .map_err(storage("Failed to append avro record"))?;
    }
    writer
        .into_inner()
        .map_err(storage("Failed to flush avro file"))?
        .flush()?;
    Ok(())
}

fn read_avro(path: &Path) -> Result<FileContents> {
    let file = File::open(path).map_err(storage("Failed to open avro file"))?;
    let reader = apache_avro::Reader::new(BufReader::new(file))
        .map_err(storage("Failed to read avro header"))?;
    let mut names: Vec<String> = Vec::new();
    let mut rows = Vec::new();
    for value in reader {
        let value = value.map_err(storage("Failed to read avro record"))?;
        match from_avro_value(value)? {
            Value::Struct(fields) => {
                if names.is_empty() {
                    names = fields.iter().map(|(k, _)| k.clone()).collect();
                }
                rows.push(fields.into_iter().map(|(_, v)| v).collect::<Vec<_>>());
            }
            other => {
                return Err(FeatureStoreError::codec_msg(format!(
                    "avro file holds non-record value {}",
                    other
                )))
            }
        }
    }
    let schema = infer_columns(&names, &mut rows);
    Ok((schema, rows))
}

fn arrow_type(field: &Field) -> Result<ArrowType> {
    Ok(match field.data_type {
        DataType::Boolean => ArrowType::Boolean,
        DataType::Int => ArrowType::Int32,
        DataType::Long => ArrowType::Int64,
        DataType::Float => ArrowType::Float32,
        DataType::Double => ArrowType::Float64,
        DataType::String => ArrowType::Utf8,
        DataType::Binary => ArrowType::Binary,
        ref nested => {
            return Err(FeatureStoreError::UnsupportedType(format!(
                "column `{}` of type {} cannot be written to parquet by the local engine",
                field.name, nested
            )))
        }
    })
}

fn type_error(field: &Field, value: &Value) -> FeatureStoreError {
    FeatureStoreError::InvalidData(format!(
        "value {} does not fit column `{}` of type {}",
        value, field.name, field.data_type
    ))
}

fn arrow_column(field: &Field, rows: &[Vec<Value>], idx: usize) -> Result<ArrayRef> {
    let values = rows.iter().map(|r| &r[idx]);
    Ok(match field.data_type {
        DataType::Boolean => Arc::new(
            values
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Boolean(b) => Ok(Some(*b)),
                    other => Err(type_error(field, other)),
                })
                .collect::<Result<BooleanArray>>()?,
        ),
        DataType::Int => Arc::new(
            values
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Int(i) => Ok(Some(*i)),
                    other => Err(type_error(field, other)),
                })
                .collect::<Result<Int32Array>>()?,
        ),
        DataType::Long => Arc::new(
            values
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Int(i) => Ok(Some(*i as i64)),
                    Value::Long(i) => Ok(Some(*i)),
                    other => Err(type_error(field, other)),
                })
                .collect::<Result<Int64Array>>()?,
        ),
        DataType::Float => Arc::new(
            values
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Float(f) => Ok(Some(*f)),
                    other => Err(type_error(field, other)),
                })
                .collect::<Result<Float32Array>>()?,
        ),
        DataType::Double => Arc::new(
            values
                .map(|v| match v {
                    Value::Null => Ok(None),
                    other => other.as_f64().map(Some).ok_or_else(|| type_error(field, other)),
                })
                .collect::<Result<Float64Array>>()?,
        ),
        DataType::String => Arc::new(
            values
                .map(|v| Ok(v.cast_to_string()))
                .collect::<Result<StringArray>>()?,
        ),
        DataType::Binary => Arc::new(
            values
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Bytes(b) => Ok(Some(b.clone())),
                    other => Err(type_error(field, other)),
                })
                .collect::<Result<BinaryArray>>()?,
        ),
        _ => return Err(type_error(field, &Value::Null)),
    })
}

fn write_parquet(path: &Path, schema: &[Field], rows: &[Vec<Value>]) -> Result<()> {
    let arrow_fields = schema
        .iter()
        .map(|f| Ok(ArrowField::new(&f.name, arrow_type(f)?, true)))
        .collect::<Result<Vec<_>>>()?;
    let arrow_schema = Arc::new(ArrowSchema::new(arrow_fields));
    let columns = schema
        .iter()
        .enumerate()
        .map(|(i, f)| arrow_column(f, rows, i))
        .collect::<Result<Vec<_>>>()?;
    let batch = RecordBatch::try_new(arrow_schema.clone(), columns)
        .map_err(storage("Failed to create record batch"))?;

    let file = File::create(path).map_err(storage("Failed to create parquet file"))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(BufWriter::new(file), arrow_schema, Some(props))
        .map_err(storage("Failed to create writer"))?;
    writer
        .write(&batch)
        .map_err(storage("Failed to write batch"))?;
    writer
        .close()
        .map_err(storage("Failed to close parquet file"))?;
    Ok(())
}

macro_rules! read_column {
    ($array:expr, $ty:ty, $conv:expr) => {{
        let typed = $array
            .as_any()
            .downcast_ref::<$ty>()
            .ok_or_else(|| FeatureStoreError::storage_msg("unexpected parquet column layout"))?;
        (0..typed.len())
            .map(|i| {
                if typed.is_null(i) {
                    Value::Null
                } else {
                    $conv(typed.value(i))
                }
            })
            .collect::<Vec<Value>>()
    }};
}

fn read_parquet(path: &Path) -> Result<FileContents> {
    let file = File::open(path).map_err(storage("Failed to open file"))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(storage("Failed to create reader"))?;
    let arrow_schema = builder.schema().clone();
    let schema = arrow_schema
        .fields()
        .iter()
        .map(|f| {
            let data_type = match f.data_type() {
                ArrowType::Boolean => DataType::Boolean,
                ArrowType::Int32 => DataType::Int,
                ArrowType::Int64 => DataType::Long,
                ArrowType::Float32 => DataType::Float,
                ArrowType::Float64 => DataType::Double,
                ArrowType::Utf8 => DataType::String,
                ArrowType::Binary => DataType::Binary,
                other => {
                    return Err(FeatureStoreError::UnsupportedType(format!(
                        "parquet column `{}` has unsupported type {}",
                        f.name(),
                        other
                    )))
                }
            };
            Ok(Field::new(f.name().clone(), data_type))
        })
        .collect::<Result<Vec<_>>>()?;
    let reader = builder.build().map_err(storage("Failed to build reader"))?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(storage("Failed to read batch"))?;
        let mut columns = Vec::with_capacity(schema.len());
        for (field, array) in schema.iter().zip(batch.columns()) {
            let column = match field.data_type {
                DataType::Boolean => read_column!(array, BooleanArray, Value::Boolean),
                DataType::Int => read_column!(array, Int32Array, Value::Int),
                DataType::Long => read_column!(array, Int64Array, Value::Long),
                DataType::Float => read_column!(array, Float32Array, Value::Float),
                DataType::Double => read_column!(array, Float64Array, Value::Double),
                DataType::String => {
                    read_column!(array, StringArray, |s: &str| Value::String(s.to_string()))
                }
                _ => read_column!(array, BinaryArray, |b: &[u8]| Value::Bytes(b.to_vec())),
            };
            columns.push(column);
        }
        for i in 0..batch.num_rows() {
            rows.push(columns.iter().map(|c| c[i].clone()).collect());
        }
    }
    Ok((schema, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn schema() -> Vec<Field> {
        vec![
            Field::new("id", DataType::Long),
            Field::new("score", DataType::Double),
            Field::new("name", DataType::String),
        ]
    }

    fn rows() -> Vec<Vec<Value>> {
        vec![
            vec![Value::Long(1), Value::Double(0.5), Value::String("a,b".into())],
            vec![Value::Long(2), Value::Null, Value::String("c".into())],
        ]
    }

    #[test]
    fn test_parquet_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("part.parquet");
        write_file(&path, DataFormat::Parquet, &schema(), &rows(), &Options::new()).unwrap();
        let (read_schema, read_rows) = read_file(&path, DataFormat::Parquet, &Options::new()).unwrap();
        assert_eq!(read_schema, schema());
        assert_eq!(read_rows, rows());
    }

    #[test]
    fn test_csv_file_with_header_and_inference() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("part.csv");
        let options = DataFormat::Csv.read_options(&Options::new());
        write_file(&path, DataFormat::Csv, &schema(), &rows(), &options).unwrap();
        let (read_schema, read_rows) = read_file(&path, DataFormat::Csv, &options).unwrap();
        assert_eq!(read_schema, schema());
        assert_eq!(read_rows, rows());
    }

    #[test]
    fn test_tsv_without_inference_reads_strings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("part.csv");
        let options = DataFormat::Tsv.write_options(&Options::new());
        write_file(&path, DataFormat::Tsv, &schema(), &rows(), &options).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("id\tscore\tname\n"));
        let (read_schema, _) = read_file(&path, DataFormat::Tsv, &options).unwrap();
        assert!(read_schema.iter().all(|f| f.data_type == DataType::String));
    }

    #[test]
    fn test_json_and_avro_files() {
        let dir = TempDir::new().unwrap();
        for format in [DataFormat::Json, DataFormat::Avro] {
            let path = dir.path().join(format!("part.{}", format));
            write_file(&path, format, &schema(), &rows(), &Options::new()).unwrap();
            let (_, read_rows) = read_file(&path, format, &Options::new()).unwrap();
            assert_eq!(read_rows.len(), 2, "{}", format);
        }
    }

    #[test]
    fn test_nested_parquet_unsupported() {
        let dir = TempDir::new().unwrap();
        let schema = vec![Field::new("a", DataType::Array(Box::new(DataType::Int)))];
        let err = write_file(
            &dir.path().join("x.parquet"),
            DataFormat::Parquet,
            &schema,
            &[],
            &Options::new(),
        )
        .unwrap_err();
        assert!(matches!(err, FeatureStoreError::UnsupportedType(_)));
        assert!(extension(DataFormat::TfRecord).is_err());
    }
}
