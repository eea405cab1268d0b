//! Byte formats for cache entries.
//!
//! Parquet is the default and is what other readers of the bucket (DuckDB,
//! pandas) expect. Entry metadata travels in the Parquet key-value metadata;
//! the JSON format wraps the table in an envelope instead.

use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{Array as _, ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, StorageError};
use crate::table::Table;

const META_VIEW: &str = "zombie_squirrel.view";
const META_KEY: &str = "zombie_squirrel.key";
const META_CREATED_AT: &str = "zombie_squirrel.created_at";

/// Serialized representation of cached tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
  #[default]
  Parquet,
  Json,
}

impl TableFormat {
  pub fn extension(&self) -> &'static str {
    match self {
      TableFormat::Parquet => "pqt",
      TableFormat::Json => "tbl.json",
    }
  }
}

impl FromStr for TableFormat {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "parquet" | "pqt" => Ok(TableFormat::Parquet),
      "json" => Ok(TableFormat::Json),
      other => Err(ConfigError::UnknownFormat(other.to_string())),
    }
  }
}

/// A cached table and the metadata stored alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub view: String,
  pub key: String,
  pub created_at: DateTime<Utc>,
  pub table: Table,
}

impl CacheEntry {
  pub fn new(view: &str, key: &str, table: Table) -> Self {
    Self {
      view: view.to_string(),
      key: key.to_string(),
      created_at: Utc::now(),
      table,
    }
  }
}

/// Column metadata document written next to each view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnsDocument {
  pub columns: Vec<String>,
}

pub fn encode(entry: &CacheEntry, format: TableFormat) -> Result<Bytes, StorageError> {
  match format {
    TableFormat::Parquet => encode_parquet(entry),
    TableFormat::Json => serde_json::to_vec(entry)
      .map(Bytes::from)
      .map_err(|e| StorageError::Encode(e.to_string())),
  }
}

pub fn decode(bytes: Bytes, format: TableFormat) -> Result<CacheEntry, StorageError> {
  match format {
    TableFormat::Parquet => decode_parquet(bytes),
    TableFormat::Json => {
      serde_json::from_slice(&bytes).map_err(|e| StorageError::Decode(e.to_string()))
    }
  }
}

fn encode_parquet(entry: &CacheEntry) -> Result<Bytes, StorageError> {
  let table = &entry.table;
  if table.columns().is_empty() {
    return Err(StorageError::Encode("table has no columns".to_string()));
  }

  let schema = Arc::new(Schema::new(
    table
      .columns()
      .iter()
      .map(|name| Field::new(name, DataType::Utf8, true))
      .collect::<Vec<_>>(),
  ));

  let arrays: Vec<ArrayRef> = (0..table.columns().len())
    .map(|idx| {
      let values: Vec<Option<&str>> = table.rows().iter().map(|r| r[idx].as_deref()).collect();
      Arc::new(StringArray::from(values)) as ArrayRef
    })
    .collect();

  let batch = RecordBatch::try_new(schema.clone(), arrays)
    .map_err(|e| StorageError::Encode(format!("record batch build failed: {e}")))?;

  let props = WriterProperties::builder()
    .set_key_value_metadata(Some(vec![
      KeyValue::new("created_by".to_string(), "zombie-squirrel".to_string()),
      KeyValue::new(META_VIEW.to_string(), entry.view.clone()),
      KeyValue::new(META_KEY.to_string(), entry.key.clone()),
      KeyValue::new(META_CREATED_AT.to_string(), entry.created_at.to_rfc3339()),
    ]))
    .build();

  let mut cursor = Cursor::new(Vec::<u8>::new());
  let mut writer = ArrowWriter::try_new(&mut cursor, schema, Some(props))
    .map_err(|e| StorageError::Encode(format!("parquet writer init failed: {e}")))?;
  writer
    .write(&batch)
    .map_err(|e| StorageError::Encode(format!("parquet write failed: {e}")))?;
  writer
    .close()
    .map_err(|e| StorageError::Encode(format!("parquet close failed: {e}")))?;

  Ok(Bytes::from(cursor.into_inner()))
}

fn decode_parquet(bytes: Bytes) -> Result<CacheEntry, StorageError> {
  let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)
    .map_err(|e| StorageError::Decode(format!("parquet reader init failed: {e}")))?;

  let metadata = builder
    .metadata()
    .file_metadata()
    .key_value_metadata()
    .cloned()
    .unwrap_or_default();
  let lookup = |name: &str| {
    metadata
      .iter()
      .find(|kv| kv.key == name)
      .and_then(|kv| kv.value.clone())
      .unwrap_or_default()
  };

  let created_at = DateTime::parse_from_rfc3339(&lookup(META_CREATED_AT))
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| StorageError::Decode(format!("bad created_at metadata: {e}")))?;

  let columns: Vec<String> = builder
    .schema()
    .fields()
    .iter()
    .map(|f| f.name().clone())
    .collect();

  let reader = builder
    .build()
    .map_err(|e| StorageError::Decode(format!("parquet reader build failed: {e}")))?;

  let mut table = Table::new(columns.clone());
  for batch in reader {
    let batch =
      batch.map_err(|e| StorageError::Decode(format!("parquet read batch failed: {e}")))?;

    let arrays = (0..batch.num_columns())
      .map(|idx| {
        batch
          .column(idx)
          .as_any()
          .downcast_ref::<StringArray>()
          .ok_or_else(|| StorageError::Decode(format!("column '{}' is not utf8", columns[idx])))
      })
      .collect::<Result<Vec<_>, _>>()?;

    for row in 0..batch.num_rows() {
      table.push_row(
        arrays
          .iter()
          .map(|arr| (!arr.is_null(row)).then(|| arr.value(row).to_string()))
          .collect(),
      );
    }
  }

  Ok(CacheEntry {
    view: lookup(META_VIEW),
    key: lookup(META_KEY),
    created_at,
    table,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry() -> CacheEntry {
    let table = Table::from_rows(
      vec!["name".into(), "source_data".into()],
      vec![
        vec![Some("derived-1".into()), Some("raw-1, raw-2".into())],
        vec![Some("derived-2".into()), Some(String::new())],
        vec![Some("derived-3".into()), None],
      ],
    )
    .unwrap();
    CacheEntry::new("source_data", "source_data", table)
  }

  #[test]
  fn test_parquet_keeps_nulls_apart_from_empty_strings() {
    let original = entry();
    let bytes = encode(&original, TableFormat::Parquet).unwrap();
    assert_eq!(&bytes[..4], b"PAR1");

    let decoded = decode(bytes, TableFormat::Parquet).unwrap();
    assert_eq!(decoded.table, original.table);
    assert_eq!(decoded.table.value(1, "source_data"), Some(""));
    assert_eq!(decoded.table.value(2, "source_data"), None);
    assert_eq!(decoded.view, "source_data");
    assert_eq!(decoded.created_at.timestamp(), original.created_at.timestamp());
  }

  #[test]
  fn test_parquet_empty_table_keeps_schema() {
    let original = CacheEntry::new("qc", "qc/abc", Table::new(["asset_name", "name"]));
    let bytes = encode(&original, TableFormat::Parquet).unwrap();
    let decoded = decode(bytes, TableFormat::Parquet).unwrap();
    assert!(decoded.table.is_empty());
    assert_eq!(decoded.table.columns(), &["asset_name", "name"]);
    assert_eq!(decoded.key, "qc/abc");
  }

  #[test]
  fn test_json_entry_is_exact() {
    let original = entry();
    let bytes = encode(&original, TableFormat::Json).unwrap();
    assert_eq!(decode(bytes, TableFormat::Json).unwrap(), original);
  }

  #[test]
  fn test_garbage_fails_to_decode() {
    let garbage = Bytes::from_static(b"not a table");
    assert!(matches!(
      decode(garbage.clone(), TableFormat::Parquet),
      Err(StorageError::Decode(_))
    ));
    assert!(matches!(
      decode(garbage, TableFormat::Json),
      Err(StorageError::Decode(_))
    ));
  }

  #[test]
  fn test_zero_column_table_is_rejected() {
    let empty = CacheEntry::new("qc", "qc", Table::default());
    assert!(matches!(
      encode(&empty, TableFormat::Parquet),
      Err(StorageError::Encode(_))
    ));
  }

  #[test]
  fn test_format_parsing() {
    assert_eq!("Parquet".parse::<TableFormat>().unwrap(), TableFormat::Parquet);
    assert_eq!("json".parse::<TableFormat>().unwrap(), TableFormat::Json);
    assert!("csv".parse::<TableFormat>().is_err());
  }
}
