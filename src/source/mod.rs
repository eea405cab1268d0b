//! The metadata database as seen by the views.
//!
//! Records are raw JSON documents; filters, projections and aggregation
//! pipelines use MongoDB syntax.

mod docdb;
mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SourceError;

pub use docdb::DocDbClient;
pub use memory::MemorySource;

/// Read access to the metadata database.
#[async_trait]
pub trait MetadataSource: Send + Sync {
  /// Find records matching `filter`. A `limit` of 0 returns every match.
  async fn retrieve(
    &self,
    filter: Value,
    projection: Value,
    limit: u64,
  ) -> Result<Vec<Value>, SourceError>;

  /// Run an aggregation pipeline.
  async fn aggregate(&self, pipeline: Value) -> Result<Vec<Value>, SourceError>;
}

/// Resolve a dotted path (`data_description.project_name`) in a document.
pub fn get_path<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
  path
    .split('.')
    .try_fold(record, |value, segment| value.get(segment))
}

/// String at a dotted path; non-string scalars are stringified and nulls
/// are `None`.
pub fn get_string(record: &Value, path: &str) -> Option<String> {
  match get_path(record, path)? {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    other => Some(other.to_string()),
  }
}

/// String items of an array at a dotted path.
pub fn get_string_list(record: &Value, path: &str) -> Vec<String> {
  get_path(record, path)
    .and_then(Value::as_array)
    .map(|items| {
      items
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_dotted_paths() {
    let record = json!({
      "subject": { "subject_id": "123", "age": 4 },
      "data_description": { "source_data": ["a", 3, "b"] }
    });

    assert_eq!(get_string(&record, "subject.subject_id"), Some("123".into()));
    assert_eq!(get_string(&record, "subject.age"), Some("4".into()));
    assert_eq!(get_string(&record, "subject.missing"), None);
    assert_eq!(
      get_string_list(&record, "data_description.source_data"),
      vec!["a".to_string(), "b".to_string()]
    );
    assert!(get_string_list(&record, "nope").is_empty());
  }
}
