use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{get_path, MetadataSource};
use crate::error::SourceError;

/// In-memory metadata database.
///
/// Understands the subset of MongoDB used by the views: equality and `$in`
/// filters on dotted paths, inclusion projections, and `$match`, `$group`
/// and `$project` aggregation stages. Counts calls and can be told to fail
/// any request whose filter or pipeline mentions a given string.
#[derive(Debug, Default)]
pub struct MemorySource {
  records: RwLock<Vec<Value>>,
  fail_on: RwLock<Vec<String>>,
  calls: AtomicUsize,
}

impl MemorySource {
  pub fn new(records: Vec<Value>) -> Self {
    Self {
      records: RwLock::new(records),
      ..Self::default()
    }
  }

  /// Replace every record.
  pub fn set_records(&self, records: Vec<Value>) {
    if let Ok(mut guard) = self.records.write() {
      *guard = records;
    }
  }

  /// Fail every request whose query text contains `needle`.
  pub fn fail_on(&self, needle: impl Into<String>) {
    if let Ok(mut guard) = self.fail_on.write() {
      guard.push(needle.into());
    }
  }

  /// Stop injecting failures.
  pub fn clear_failures(&self) {
    if let Ok(mut guard) = self.fail_on.write() {
      guard.clear();
    }
  }

  /// Number of `retrieve` and `aggregate` calls served so far.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  fn begin(&self, query: &Value) -> Result<Vec<Value>, SourceError> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    let text = query.to_string();
    let fail_on = self
      .fail_on
      .read()
      .map_err(|e| SourceError::new(format!("Lock poisoned: {}", e)))?;
    if let Some(needle) = fail_on.iter().find(|n| text.contains(n.as_str())) {
      return Err(SourceError::new(format!("injected failure for '{}'", needle)));
    }

    self
      .records
      .read()
      .map(|records| records.clone())
      .map_err(|e| SourceError::new(format!("Lock poisoned: {}", e)))
  }
}

#[async_trait]
impl MetadataSource for MemorySource {
  async fn retrieve(
    &self,
    filter: Value,
    projection: Value,
    limit: u64,
  ) -> Result<Vec<Value>, SourceError> {
    let records = self.begin(&filter)?;

    let mut matched: Vec<Value> = records
      .iter()
      .filter(|r| matches_filter(r, &filter))
      .map(|r| project(r, &projection))
      .collect();

    if limit > 0 {
      matched.truncate(limit as usize);
    }
    Ok(matched)
  }

  async fn aggregate(&self, pipeline: Value) -> Result<Vec<Value>, SourceError> {
    let mut docs = self.begin(&pipeline)?;

    let stages = pipeline
      .as_array()
      .ok_or_else(|| SourceError::new("pipeline must be a list of stages"))?;

    for stage in stages {
      if let Some(filter) = stage.get("$match") {
        docs.retain(|d| matches_filter(d, filter));
      } else if let Some(group) = stage.get("$group") {
        docs = group_by(&docs, group)?;
      } else if let Some(spec) = stage.get("$project") {
        docs = docs.iter().map(|d| project_stage(d, spec)).collect();
      } else {
        return Err(SourceError::new(format!("unsupported stage {}", stage)));
      }
    }

    Ok(docs)
  }
}

fn lookup(record: &Value, path: &str) -> Value {
  get_path(record, path).cloned().unwrap_or(Value::Null)
}

fn matches_filter(record: &Value, filter: &Value) -> bool {
  let Some(conditions) = filter.as_object() else {
    return true;
  };

  conditions.iter().all(|(path, condition)| {
    let value = lookup(record, path);
    match condition.get("$in").and_then(Value::as_array) {
      Some(options) => options.contains(&value),
      None => &value == condition,
    }
  })
}

/// Inclusion projection. `_id` is kept unless excluded explicitly.
fn project(record: &Value, projection: &Value) -> Value {
  let Some(fields) = projection.as_object().filter(|f| !f.is_empty()) else {
    return record.clone();
  };

  let mut out = Value::Object(Map::new());
  let keep_id = fields.get("_id").map(|v| v != &Value::from(0)).unwrap_or(true);
  if keep_id {
    if let Some(id) = record.get("_id") {
      insert_path(&mut out, "_id", id.clone());
    }
  }

  for (path, include) in fields {
    if path == "_id" || include == &Value::from(0) {
      continue;
    }
    if let Some((prefix, value)) = projected(record, path) {
      insert_path(&mut out, &prefix, value);
    }
  }
  out
}

/// Value selected by a projection path. A path that runs into an array
/// selects the whole array.
fn projected(record: &Value, path: &str) -> Option<(String, Value)> {
  let mut current = record;
  let mut taken: Vec<&str> = Vec::new();
  for segment in path.split('.') {
    if current.is_array() {
      break;
    }
    current = current.get(segment)?;
    taken.push(segment);
  }
  Some((taken.join("."), current.clone()))
}

fn insert_path(target: &mut Value, path: &str, value: Value) {
  let mut segments: Vec<&str> = path.split('.').collect();
  let Some(last) = segments.pop() else {
    return;
  };

  let mut cursor = target;
  for segment in segments {
    cursor = match cursor {
      Value::Object(map) => map
        .entry(segment.to_string())
        .or_insert_with(|| Value::Object(Map::new())),
      _ => return,
    };
  }
  if let Some(map) = cursor.as_object_mut() {
    map.insert(last.to_string(), value);
  }
}

/// `{"_id": "$path"}` groups: one output document per distinct value.
fn group_by(docs: &[Value], group: &Value) -> Result<Vec<Value>, SourceError> {
  let key_path = group
    .get("_id")
    .and_then(Value::as_str)
    .and_then(|s| s.strip_prefix('$'))
    .ok_or_else(|| SourceError::new(format!("unsupported $group {}", group)))?;

  let mut keys: Vec<Value> = Vec::new();
  for doc in docs {
    let key = lookup(doc, key_path);
    if !keys.contains(&key) {
      keys.push(key);
    }
  }

  Ok(
    keys
      .into_iter()
      .map(|key| serde_json::json!({ "_id": key }))
      .collect(),
  )
}

/// `$project` stage: `"$path"` renames, `0` drops, `1` keeps.
fn project_stage(doc: &Value, spec: &Value) -> Value {
  let Some(fields) = spec.as_object() else {
    return doc.clone();
  };

  let mut out = Value::Object(Map::new());
  let keep_id = fields.get("_id").map(|v| v != &Value::from(0)).unwrap_or(true);
  if keep_id {
    if let Some(id) = doc.get("_id") {
      insert_path(&mut out, "_id", id.clone());
    }
  }

  for (name, rule) in fields {
    if name == "_id" {
      continue;
    }
    if let Some(source) = rule.as_str().and_then(|s| s.strip_prefix('$')) {
      insert_path(&mut out, name, lookup(doc, source));
    } else if rule != &Value::from(0) {
      insert_path(&mut out, name, lookup(doc, name));
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn source() -> MemorySource {
    MemorySource::new(vec![
      json!({"_id": "1", "name": "a", "subject": {"subject_id": "s1"}, "extra": true}),
      json!({"_id": "2", "name": "b", "subject": {"subject_id": "s2"}}),
      json!({"_id": "3", "name": "c", "subject": {"subject_id": "s1"}}),
    ])
  }

  #[tokio::test]
  async fn test_retrieve_filters_and_projects() {
    let source = source();
    let records = source
      .retrieve(
        json!({"subject.subject_id": {"$in": ["s1"]}}),
        json!({"name": 1}),
        0,
      )
      .await
      .unwrap();

    assert_eq!(records, vec![json!({"_id": "1", "name": "a"}), json!({"_id": "3", "name": "c"})]);
    assert_eq!(source.calls(), 1);
  }

  #[tokio::test]
  async fn test_retrieve_respects_limit_and_equality() {
    let source = source();
    let records = source.retrieve(json!({}), json!({}), 2).await.unwrap();
    assert_eq!(records.len(), 2);

    let records = source
      .retrieve(json!({"name": "b"}), json!({}), 0)
      .await
      .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["_id"], "2");
  }

  #[tokio::test]
  async fn test_group_and_project_pipeline() {
    let source = source();
    let docs = source
      .aggregate(json!([
        {"$group": {"_id": "$subject.subject_id"}},
        {"$project": {"subject_id": "$_id", "_id": 0}}
      ]))
      .await
      .unwrap();

    assert_eq!(docs, vec![json!({"subject_id": "s1"}), json!({"subject_id": "s2"})]);
  }

  #[tokio::test]
  async fn test_injected_failure() {
    let source = source();
    source.fail_on("s2");

    let err = source
      .retrieve(json!({"subject.subject_id": {"$in": ["s2"]}}), json!({}), 0)
      .await
      .unwrap_err();
    assert!(err.message.contains("s2"));

    assert!(source
      .retrieve(json!({"subject.subject_id": {"$in": ["s1"]}}), json!({}), 0)
      .await
      .is_ok());

    source.clear_failures();
    assert!(source
      .retrieve(json!({"subject.subject_id": {"$in": ["s2"]}}), json!({}), 0)
      .await
      .is_ok());
  }
}
