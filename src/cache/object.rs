use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};

use super::storage::CacheStorage;
use crate::error::StorageError;

const NAME: &str = "S3Tree";

/// Storage on an object store bucket (S3 in production).
///
/// Keys map one-to-one onto object paths. The object store lists by path
/// segment, so `list` lists the enclosing directory and filters by string
/// prefix.
#[derive(Clone)]
pub struct ObjectStorage {
  store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for ObjectStorage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ObjectStorage")
      .field("store", &self.store.to_string())
      .finish()
  }
}

impl ObjectStorage {
  pub fn new(store: Arc<dyn ObjectStore>) -> Self {
    Self { store }
  }

  /// S3 bucket with credentials and region taken from the standard AWS
  /// environment variables.
  pub fn s3(bucket: &str) -> Result<Self, StorageError> {
    let store = AmazonS3Builder::from_env()
      .with_bucket_name(bucket)
      .build()
      .map_err(|e| StorageError::backend(NAME, bucket, e))?;
    Ok(Self::new(Arc::new(store)))
  }
}

#[async_trait]
impl CacheStorage for ObjectStorage {
  fn name(&self) -> &'static str {
    NAME
  }

  async fn exists(&self, key: &str) -> Result<bool, StorageError> {
    match self.store.head(&Path::from(key)).await {
      Ok(_) => Ok(true),
      Err(object_store::Error::NotFound { .. }) => Ok(false),
      Err(e) => Err(StorageError::backend(NAME, key, e)),
    }
  }

  async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
    let result = match self.store.get(&Path::from(key)).await {
      Ok(result) => result,
      Err(object_store::Error::NotFound { .. }) => return Ok(None),
      Err(e) => return Err(StorageError::backend(NAME, key, e)),
    };

    let bytes = result
      .bytes()
      .await
      .map_err(|e| StorageError::backend(NAME, key, e))?;
    Ok(Some(bytes))
  }

  async fn put(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
    self
      .store
      .put(&Path::from(key), PutPayload::from(data))
      .await
      .map_err(|e| StorageError::backend(NAME, key, e))?;
    Ok(())
  }

  async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
    let directory = prefix.rsplit_once('/').map(|(dir, _)| Path::from(dir));

    let objects: Vec<_> = self
      .store
      .list(directory.as_ref())
      .try_collect()
      .await
      .map_err(|e| StorageError::backend(NAME, prefix, e))?;

    let mut keys: Vec<String> = objects
      .into_iter()
      .map(|meta| meta.location.to_string())
      .filter(|k| k.starts_with(prefix))
      .collect();
    keys.sort();
    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use object_store::memory::InMemory;

  fn storage() -> ObjectStorage {
    ObjectStorage::new(Arc::new(InMemory::new()))
  }

  #[tokio::test]
  async fn test_missing_object_is_none() {
    let storage = storage();
    assert!(!storage.exists("caches/zs_qc.pqt").await.unwrap());
    assert_eq!(storage.get("caches/zs_qc.pqt").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_put_then_get_and_overwrite() {
    let storage = storage();
    storage
      .put("caches/zs_source_data.pqt", Bytes::from_static(b"v1"))
      .await
      .unwrap();
    storage
      .put("caches/zs_source_data.pqt", Bytes::from_static(b"v2"))
      .await
      .unwrap();

    assert!(storage.exists("caches/zs_source_data.pqt").await.unwrap());
    assert_eq!(
      storage.get("caches/zs_source_data.pqt").await.unwrap(),
      Some(Bytes::from_static(b"v2"))
    );
  }

  #[tokio::test]
  async fn test_list_filters_by_string_prefix() {
    let storage = storage();
    for key in [
      "caches/zs_qc/bbb.pqt",
      "caches/zs_qc/aaa.pqt",
      "caches/zs_qc.json",
      "caches/zs_asset_basics.pqt",
      "other/zs_qc.pqt",
    ] {
      storage.put(key, Bytes::from_static(b"x")).await.unwrap();
    }

    assert_eq!(
      storage.list("caches/zs_qc").await.unwrap(),
      vec!["caches/zs_qc.json", "caches/zs_qc/aaa.pqt", "caches/zs_qc/bbb.pqt"]
    );
    assert_eq!(storage.list("caches/").await.unwrap().len(), 4);
  }
}
