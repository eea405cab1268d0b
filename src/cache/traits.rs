//! Core types shared by the cache layer and its callers.

use chrono::{DateTime, Utc};

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the served entry was written
  pub cached_at: DateTime<Utc>,
}

impl<T> CacheResult<T> {
  /// Data just fetched from the metadata database and written to the cache.
  pub fn from_source(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Source,
      cached_at,
    }
  }

  /// Data read from an existing cache entry.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at,
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
      cached_at: self.cached_at,
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Served from the backend
  Cache,
  /// Fetched from the metadata database and written through
  Source,
}
