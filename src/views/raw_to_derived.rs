//! Raw records mapped to the derived records built from them.

use std::collections::HashMap;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::debug;

use super::table_from;
use crate::error::SourceError;
use crate::keys::Params;
use crate::source::{get_string, get_string_list, MetadataSource};
use crate::table::Table;

pub const COLUMNS: &[&str] = &["name", "derived_records"];

pub fn fetch<'a>(
  source: &'a dyn MetadataSource,
  params: &'a Params,
  _previous: Option<&'a Table>,
) -> BoxFuture<'a, Result<Table, SourceError>> {
  Box::pin(async move {
    let mut raw_filter = json!({"data_description.data_level": "raw"});
    if let Params::Ids(_) = params {
      raw_filter["name"] = json!({"$in": params.as_list()});
    }

    let raw_records = source.retrieve(raw_filter, json!({"name": 1}), 0).await?;

    let raw_names: Vec<String> = raw_records
      .iter()
      .filter_map(|r| get_string(r, "name"))
      .collect();
    let mut derived: HashMap<&str, Vec<String>> =
      raw_names.iter().map(|n| (n.as_str(), Vec::new())).collect();

    let derived_records = source
      .retrieve(
        json!({"data_description.data_level": "derived"}),
        json!({"name": 1, "data_description.source_data": 1}),
        0,
      )
      .await?;

    for record in &derived_records {
      let Some(derived_name) = get_string(record, "name") else {
        continue;
      };
      for source_name in get_string_list(record, "data_description.source_data") {
        if let Some(list) = derived.get_mut(source_name.as_str()) {
          list.push(derived_name.clone());
        }
      }
    }

    let rows = raw_names
      .iter()
      .map(|name| {
        let derived_names = derived.get(name.as_str()).cloned().unwrap_or_default();
        debug!(raw = %name, derived = derived_names.len(), "Processed raw record");
        vec![Some(name.clone()), Some(derived_names.join(", "))]
      })
      .collect();

    let mut table = table_from(COLUMNS, rows)?;
    table.sort_by_column("name");
    Ok(table)
  })
}
