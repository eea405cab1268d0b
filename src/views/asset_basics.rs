//! Basic per-asset metadata, refreshed incrementally.
//!
//! Only records whose `_last_modified` differs from the previously cached
//! table are fetched again. Records that disappeared from the database are
//! dropped from the table.

use std::collections::{HashMap, HashSet};

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{ids_filter, table_from};
use crate::error::SourceError;
use crate::keys::Params;
use crate::source::{get_path, get_string, MetadataSource};
use crate::table::Table;

pub const COLUMNS: &[&str] = &[
  "_id",
  "_last_modified",
  "modalities",
  "project_name",
  "data_level",
  "subject_id",
  "acquisition_start_time",
  "acquisition_end_time",
  "code_ocean",
  "process_date",
  "genotype",
  "location",
  "name",
];

const FIELDS: &[&str] = &[
  "_id",
  "_last_modified",
  "data_description.modalities",
  "data_description.project_name",
  "data_description.data_level",
  "subject.subject_id",
  "acquisition.acquisition_start_time",
  "acquisition.acquisition_end_time",
  "processing.data_processes.start_date_time",
  "subject.subject_details.genotype",
  "other_identifiers",
  "location",
  "name",
];

/// Records per detail request.
const BATCH_SIZE: usize = 100;

pub fn fetch<'a>(
  source: &'a dyn MetadataSource,
  params: &'a Params,
  previous: Option<&'a Table>,
) -> BoxFuture<'a, Result<Table, SourceError>> {
  Box::pin(async move {
    let listing = source
      .retrieve(
        ids_filter("data_description.project_name", params),
        json!({"_id": 1, "_last_modified": 1}),
        0,
      )
      .await?;

    let cached = previous
      .filter(|t| t.check_schema(COLUMNS).is_ok())
      .map(index_rows)
      .unwrap_or_default();

    let mut unchanged_ids = HashSet::new();
    let mut changed_ids = Vec::new();
    for record in &listing {
      let Some(id) = get_string(record, "_id") else {
        continue;
      };
      let last_modified = get_string(record, "_last_modified");
      let unchanged = cached
        .get(id.as_str())
        .is_some_and(|row| row[1] == last_modified);
      if unchanged {
        unchanged_ids.insert(id);
      } else {
        changed_ids.push(id);
      }
    }

    info!(
      total = listing.len(),
      changed = changed_ids.len(),
      "Refreshing asset basics"
    );

    let projection: serde_json::Map<String, Value> =
      FIELDS.iter().map(|f| (f.to_string(), json!(1))).collect();

    let mut rows: Vec<Vec<Option<String>>> = cached
      .iter()
      .filter(|(id, _)| unchanged_ids.contains(**id))
      .map(|(_, row)| row.to_vec())
      .collect();

    for (batch_no, batch) in changed_ids.chunks(BATCH_SIZE).enumerate() {
      debug!(batch = batch_no + 1, size = batch.len(), "Fetching asset batch");
      let records = source
        .retrieve(
          json!({"_id": {"$in": batch}}),
          Value::Object(projection.clone()),
          0,
        )
        .await?;
      rows.extend(records.iter().map(flatten));
    }

    let mut table = table_from(COLUMNS, rows)?;
    table.sort_by_column("_id");
    Ok(table)
  })
}

/// Cached rows keyed by `_id`.
fn index_rows(table: &Table) -> HashMap<&str, &[Option<String>]> {
  table
    .rows()
    .iter()
    .filter_map(|row| Some((row[0].as_deref()?, row.as_slice())))
    .collect()
}

fn flatten(record: &Value) -> Vec<Option<String>> {
  let modalities = get_path(record, "data_description.modalities")
    .and_then(Value::as_array)
    .map(|list| {
      list
        .iter()
        .filter_map(|m| m.get("abbreviation").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(", ")
    })
    .unwrap_or_default();

  let process_date = get_path(record, "processing.data_processes")
    .and_then(Value::as_array)
    .and_then(|processes| processes.last())
    .and_then(|p| p.get("start_date_time"))
    .and_then(Value::as_str)
    .and_then(|dt| dt.split('T').next())
    .map(String::from);

  let code_ocean = get_path(record, "other_identifiers.Code Ocean").and_then(|v| match v {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    Value::Array(items) => Some(
      items
        .iter()
        .map(|i| i.as_str().map(String::from).unwrap_or_else(|| i.to_string()))
        .collect::<Vec<_>>()
        .join(", "),
    ),
    other => Some(other.to_string()),
  });

  vec![
    get_string(record, "_id"),
    get_string(record, "_last_modified"),
    Some(modalities),
    get_string(record, "data_description.project_name"),
    get_string(record, "data_description.data_level"),
    get_string(record, "subject.subject_id"),
    get_string(record, "acquisition.acquisition_start_time"),
    get_string(record, "acquisition.acquisition_end_time"),
    code_ocean,
    process_date,
    get_string(record, "subject.subject_details.genotype"),
    get_string(record, "location"),
    get_string(record, "name"),
  ]
}
