//! Cache storage trait.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;

/// Trait for cache storage backends.
///
/// Keys are flat strings; a `/` inside a key carries no meaning. A `put`
/// fully replaces the previous content and is visible to the next `get`
/// from the same process. Implementations must allow concurrent access.
#[async_trait]
pub trait CacheStorage: Send + Sync {
  /// Backend label used in logs.
  fn name(&self) -> &'static str;

  /// Whether an entry exists for `key`.
  async fn exists(&self, key: &str) -> Result<bool, StorageError>;

  /// Read an entry. `Ok(None)` means there is no entry for `key`.
  async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError>;

  /// Write an entry, replacing any previous content.
  async fn put(&self, key: &str, data: Bytes) -> Result<(), StorageError>;

  /// Keys starting with `prefix`, sorted.
  async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
