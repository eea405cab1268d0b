//! Upstream source data of each record.

use futures::future::BoxFuture;
use serde_json::json;
use tracing::debug;

use super::{ids_filter, table_from};
use crate::error::SourceError;
use crate::keys::Params;
use crate::source::{get_string, get_string_list, MetadataSource};
use crate::table::Table;

pub const COLUMNS: &[&str] = &["name", "source_data"];

pub fn fetch<'a>(
  source: &'a dyn MetadataSource,
  params: &'a Params,
  _previous: Option<&'a Table>,
) -> BoxFuture<'a, Result<Table, SourceError>> {
  Box::pin(async move {
    let records = source
      .retrieve(
        ids_filter("name", params),
        json!({"name": 1, "data_description.source_data": 1}),
        0,
      )
      .await?;
    debug!(records = records.len(), "Retrieved source data records");

    let rows = records
      .iter()
      .map(|record| {
        vec![
          get_string(record, "name"),
          Some(get_string_list(record, "data_description.source_data").join(", ")),
        ]
      })
      .collect();

    let mut table = table_from(COLUMNS, rows)?;
    table.sort_by_column("name");
    Ok(table)
  })
}
