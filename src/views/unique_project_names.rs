//! Distinct project names across all records.

use futures::future::BoxFuture;
use serde_json::json;

use super::table_from;
use crate::error::SourceError;
use crate::keys::Params;
use crate::source::{get_string, MetadataSource};
use crate::table::Table;

pub const COLUMNS: &[&str] = &["project_name"];

pub fn fetch<'a>(
  source: &'a dyn MetadataSource,
  _params: &'a Params,
  _previous: Option<&'a Table>,
) -> BoxFuture<'a, Result<Table, SourceError>> {
  Box::pin(async move {
    let docs = source
      .aggregate(json!([
        {"$group": {"_id": "$data_description.project_name"}},
        {"$project": {"project_name": "$_id", "_id": 0}}
      ]))
      .await?;

    let rows = docs
      .iter()
      .map(|doc| vec![get_string(doc, "project_name")])
      .collect();

    let mut table = table_from(COLUMNS, rows)?;
    table.sort_by_column("project_name");
    Ok(table)
  })
}
