//! Error taxonomy for the cache.
//!
//! `ConfigError` is fatal at startup. `SourceError` and `StorageError` are
//! recoverable and are isolated per query during a sync. "No entry for this
//! key" is never an error: storage reads return `Ok(None)` instead.

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error returned by the public API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Source(#[from] SourceError),

  #[error(transparent)]
  Storage(#[from] StorageError),

  /// The parameters do not fit the parameter shape of the view.
  #[error("invalid query: {0}")]
  InvalidQuery(String),
}

/// Unrecognized or missing configuration. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("no cache backend selected; set FOREST_TYPE to S3 or MEMORY")]
  MissingBackend,

  #[error("unrecognized cache backend '{0}'; expected S3 or MEMORY")]
  UnknownBackend(String),

  #[error("unrecognized table format '{0}'; expected parquet or json")]
  UnknownFormat(String),

  #[error("config file not found: {0}")]
  FileNotFound(String),

  #[error("failed to read config file {path}: {message}")]
  Unreadable { path: String, message: String },

  #[error("invalid configuration: {0}")]
  Invalid(String),
}

/// The metadata database failed, timed out, or answered with something
/// that could not be turned into a table.
#[derive(Debug, thiserror::Error)]
#[error("source unavailable: {message}")]
pub struct SourceError {
  pub message: String,
}

impl SourceError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// Backend I/O or (de)serialization failure.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  #[error("{backend} failed on '{key}': {message}")]
  Backend {
    backend: &'static str,
    key: String,
    message: String,
  },

  #[error("failed to encode cache entry: {0}")]
  Encode(String),

  #[error("failed to decode cache entry: {0}")]
  Decode(String),

  #[error("lock poisoned: {0}")]
  Poisoned(String),
}

impl StorageError {
  pub fn backend(backend: &'static str, key: &str, message: impl std::fmt::Display) -> Self {
    Self::Backend {
      backend,
      key: key.to_string(),
      message: message.to_string(),
    }
  }
}
