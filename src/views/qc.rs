//! Quality-control metrics of every asset of the requested subjects.
//!
//! Nested values (objects and lists) are stored as `json:`-prefixed JSON
//! strings so the table stays flat.

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::table_from;
use crate::error::SourceError;
use crate::keys::Params;
use crate::source::{get_path, get_string, MetadataSource};
use crate::table::Table;

pub const COLUMNS: &[&str] = &[
  "asset_name",
  "subject_id",
  "object_type",
  "name",
  "stage",
  "modality",
  "value",
  "status_history",
  "tags",
  "description",
  "reference",
  "evaluated_assets",
];

/// Columns taken from the metric object itself.
const METRIC_FIELDS: &[&str] = &[
  "object_type",
  "name",
  "stage",
  "modality",
  "value",
  "status_history",
  "tags",
  "description",
  "reference",
  "evaluated_assets",
];

const JSON_PREFIX: &str = "json:";

/// Flatten a JSON value into a table cell.
pub fn encode_value(value: &Value) -> Option<String> {
  match value {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    Value::Object(_) | Value::Array(_) => Some(format!("{}{}", JSON_PREFIX, value)),
    other => Some(other.to_string()),
  }
}

/// Inverse of [`encode_value`] for nested values; other strings come back
/// as JSON strings.
pub fn decode_value(cell: &str) -> Value {
  cell
    .strip_prefix(JSON_PREFIX)
    .and_then(|raw| serde_json::from_str(raw).ok())
    .unwrap_or_else(|| Value::String(cell.to_string()))
}

pub fn fetch<'a>(
  source: &'a dyn MetadataSource,
  params: &'a Params,
  _previous: Option<&'a Table>,
) -> BoxFuture<'a, Result<Table, SourceError>> {
  Box::pin(async move {
    let subject_ids = params.as_list();
    let records = source
      .retrieve(
        json!({"subject.subject_id": {"$in": subject_ids}}),
        json!({"_id": 1, "name": 1, "subject.subject_id": 1, "quality_control": 1}),
        0,
      )
      .await?;

    if records.is_empty() {
      warn!(acorn = "qc", subjects = %params, "No records found");
    }

    let mut rows = Vec::new();
    for record in &records {
      let asset_name = get_string(record, "name");
      let subject_id = get_string(record, "subject.subject_id");
      let Some(metrics) = get_path(record, "quality_control.metrics").and_then(Value::as_array)
      else {
        continue;
      };

      for metric in metrics {
        if let Some(fields) = metric.as_object() {
          let unknown: Vec<&String> = fields
            .keys()
            .filter(|k| !METRIC_FIELDS.contains(&k.as_str()))
            .collect();
          if !unknown.is_empty() {
            debug!(acorn = "qc", ?unknown, "Dropping unknown metric fields");
          }
        }

        let mut row = vec![asset_name.clone(), subject_id.clone()];
        row.extend(
          METRIC_FIELDS
            .iter()
            .map(|field| metric.get(*field).and_then(encode_value)),
        );
        rows.push(row);
      }
    }

    if rows.is_empty() && !records.is_empty() {
      warn!(acorn = "qc", subjects = %params, "No quality_control metrics found");
    }

    let mut table = table_from(COLUMNS, rows)?;
    table.sort_by_column("asset_name");
    Ok(table)
  })
}

/// Keep the rows of the requested assets. Names that are not present are
/// reported in the log.
pub fn filter_by_asset_names<S: AsRef<str>>(table: &Table, asset_names: &[S]) -> Table {
  let wanted: Vec<&str> = asset_names.iter().map(AsRef::as_ref).collect();
  let available = table.column("asset_name").unwrap_or_default();

  let missing: Vec<&str> = wanted
    .iter()
    .copied()
    .filter(|name| !available.contains(&Some(*name)))
    .collect();
  if !missing.is_empty() {
    warn!(acorn = "qc", ?missing, "Requested assets not found in cache");
  }

  let Some(idx) = table.column_index("asset_name") else {
    return table.filter_rows(|_| false);
  };
  table.filter_rows(|row| {
    row[idx]
      .as_deref()
      .is_some_and(|name| wanted.contains(&name))
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source::MemorySource;

  fn source() -> MemorySource {
    MemorySource::new(vec![
      json!({
        "_id": "id-1",
        "name": "asset-1",
        "subject": {"subject_id": "sub-1"},
        "quality_control": {"metrics": [
          {
            "object_type": "QC metric",
            "name": "Unit drift",
            "stage": "Processing",
            "modality": {"name": "Electrophysiology", "abbreviation": "ecephys"},
            "value": {"value": "pass", "status": "Pass"},
            "tags": null,
            "status_history": [{"status": "Pass", "evaluator": "user"}],
            "custom": 1
          },
          {"object_type": "QC metric", "name": "Frame count", "value": 3000}
        ]}
      }),
      json!({"_id": "id-2", "name": "asset-2", "subject": {"subject_id": "sub-2"}}),
      json!({
        "_id": "id-3",
        "name": "asset-3",
        "subject": {"subject_id": "sub-2"},
        "quality_control": {"metrics": [{"name": "Exposure", "value": true}]}
      }),
    ])
  }

  #[test]
  fn test_encode_decode_values() {
    assert_eq!(encode_value(&json!({"key": "value"})), Some("json:{\"key\":\"value\"}".into()));
    assert_eq!(encode_value(&json!("plain")), Some("plain".into()));
    assert_eq!(encode_value(&json!(42)), Some("42".into()));
    assert_eq!(encode_value(&Value::Null), None);

    let nested = json!({"status": "pass", "nested": {"count": 42}});
    let cell = encode_value(&nested).unwrap();
    assert_eq!(decode_value(&cell), nested);
    assert_eq!(decode_value("not_prefixed"), json!("not_prefixed"));
  }

  #[tokio::test]
  async fn test_one_row_per_metric() {
    let table = fetch(&source(), &Params::ids(["sub-1"]), None).await.unwrap();

    assert_eq!(table.len(), 2);
    assert_eq!(table.value(0, "asset_name"), Some("asset-1"));
    assert_eq!(table.value(0, "subject_id"), Some("sub-1"));
    assert_eq!(table.value(0, "name"), Some("Unit drift"));
    assert_eq!(
      decode_value(table.value(0, "value").unwrap())["status"],
      json!("Pass")
    );
    assert_eq!(table.value(0, "tags"), None);
    assert_eq!(table.value(1, "value"), Some("3000"));
  }

  #[tokio::test]
  async fn test_several_subjects_and_records_without_qc() {
    let table = fetch(&source(), &Params::ids(["sub-2", "sub-1"]), None)
      .await
      .unwrap();
    assert_eq!(table.len(), 3);

    let empty = fetch(&source(), &Params::ids(["sub-9"]), None).await.unwrap();
    assert!(empty.is_empty());
    assert_eq!(empty.columns().len(), COLUMNS.len());
  }

  #[tokio::test]
  async fn test_filter_by_asset_names() {
    let table = fetch(&source(), &Params::ids(["sub-1", "sub-2"]), None)
      .await
      .unwrap();

    let filtered = filter_by_asset_names(&table, &["asset-3", "asset-missing"]);
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered.value(0, "name"), Some("Exposure"));

    let none = filter_by_asset_names(&table, &["asset-missing"]);
    assert!(none.is_empty());
  }

  #[tokio::test]
  async fn test_rows_are_ordered_by_asset_name() {
    let source = MemorySource::new(vec![
      json!({
        "_id": "id-b",
        "name": "asset-b",
        "subject": {"subject_id": "sub-1"},
        "quality_control": {"metrics": [{"name": "late"}, {"name": "later"}]}
      }),
      json!({
        "_id": "id-a",
        "name": "asset-a",
        "subject": {"subject_id": "sub-1"},
        "quality_control": {"metrics": [{"name": "early"}]}
      }),
    ]);
    let table = fetch(&source, &Params::ids(["sub-1"]), None).await.unwrap();

    assert_eq!(table.column_values("asset_name"), vec!["asset-a", "asset-b", "asset-b"]);
    // metrics of one asset keep their recorded order
    assert_eq!(table.column_values("name"), vec!["early", "late", "later"]);
  }
}
