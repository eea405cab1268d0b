use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use super::storage::CacheStorage;
use crate::error::StorageError;

/// In-memory storage, scoped to the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  objects: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
  fn name(&self) -> &'static str {
    "MemoryTree"
  }

  async fn exists(&self, key: &str) -> Result<bool, StorageError> {
    let objects = self
      .objects
      .read()
      .map_err(|e| StorageError::Poisoned(e.to_string()))?;
    Ok(objects.contains_key(key))
  }

  async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
    let objects = self
      .objects
      .read()
      .map_err(|e| StorageError::Poisoned(e.to_string()))?;
    Ok(objects.get(key).cloned())
  }

  async fn put(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
    let mut objects = self
      .objects
      .write()
      .map_err(|e| StorageError::Poisoned(e.to_string()))?;
    objects.insert(key.to_string(), data);
    Ok(())
  }

  async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
    let objects = self
      .objects
      .read()
      .map_err(|e| StorageError::Poisoned(e.to_string()))?;
    let mut keys: Vec<String> = objects
      .keys()
      .filter(|k| k.starts_with(prefix))
      .cloned()
      .collect();
    keys.sort();
    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[tokio::test]
  async fn test_read_your_writes_and_overwrite() {
    let storage = MemoryStorage::new();
    assert!(!storage.exists("a/zs_x.pqt").await.unwrap());
    assert_eq!(storage.get("a/zs_x.pqt").await.unwrap(), None);

    storage.put("a/zs_x.pqt", Bytes::from_static(b"one")).await.unwrap();
    assert!(storage.exists("a/zs_x.pqt").await.unwrap());
    assert_eq!(
      storage.get("a/zs_x.pqt").await.unwrap(),
      Some(Bytes::from_static(b"one"))
    );

    storage.put("a/zs_x.pqt", Bytes::from_static(b"two")).await.unwrap();
    assert_eq!(
      storage.get("a/zs_x.pqt").await.unwrap(),
      Some(Bytes::from_static(b"two"))
    );
  }

  #[tokio::test]
  async fn test_list_is_a_plain_string_prefix() {
    let storage = MemoryStorage::new();
    for key in ["c/zs_qc/2.pqt", "c/zs_qc/1.pqt", "c/zs_qc.json", "c/zs_asset_basics.pqt"] {
      storage.put(key, Bytes::new()).await.unwrap();
    }

    assert_eq!(
      storage.list("c/zs_qc").await.unwrap(),
      vec!["c/zs_qc.json", "c/zs_qc/1.pqt", "c/zs_qc/2.pqt"]
    );
    assert!(storage.list("d/").await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_concurrent_writes_to_distinct_keys() {
    let storage = Arc::new(MemoryStorage::new());
    let handles: Vec<_> = (0..16)
      .map(|i| {
        let storage = Arc::clone(&storage);
        tokio::spawn(async move {
          let key = format!("k/{}", i);
          storage.put(&key, Bytes::from(key.clone())).await.unwrap();
          storage.get(&key).await.unwrap()
        })
      })
      .collect();

    for (i, handle) in handles.into_iter().enumerate() {
      let read = handle.await.unwrap();
      assert_eq!(read, Some(Bytes::from(format!("k/{}", i))));
    }
    assert_eq!(storage.list("k/").await.unwrap().len(), 16);
  }
}
