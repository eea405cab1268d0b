use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::cache::{CacheStorage, MemoryStorage, ObjectStorage};
use crate::codec::TableFormat;
use crate::error::{ConfigError, Result};
use crate::keys::Layout;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub forest: ForestConfig,
  pub metadata: MetadataConfig,
  pub sync: SyncConfig,
  pub log: LogConfig,
}

/// Which backend holds the cache ("forest").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
  /// Flat S3 bucket shared by every process
  S3,
  /// Process-local map, for tests and one-off runs
  Memory,
}

impl FromStr for BackendKind {
  type Err = ConfigError;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.trim().to_uppercase().as_str() {
      "S3" => Ok(BackendKind::S3),
      "MEMORY" => Ok(BackendKind::Memory),
      "" => Err(ConfigError::MissingBackend),
      _ => Err(ConfigError::UnknownBackend(s.to_string())),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
  /// S3 or MEMORY. FOREST_TYPE takes precedence.
  #[serde(rename = "type")]
  pub kind: Option<String>,
  pub bucket: String,
  pub prefix: String,
  #[serde(deserialize_with = "deserialize_format")]
  pub format: TableFormat,
}

impl Default for ForestConfig {
  fn default() -> Self {
    Self {
      kind: None,
      bucket: "aind-scratch-data".to_string(),
      prefix: "application-caches".to_string(),
      format: TableFormat::default(),
    }
  }
}

fn deserialize_format<'de, D>(deserializer: D) -> std::result::Result<TableFormat, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let s = String::deserialize(deserializer)?;
  s.parse().map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
  /// Host of the metadata REST API; may include a scheme
  pub host: String,
  pub version: String,
  pub database: String,
  pub collection: String,
  pub timeout_secs: u64,
  /// Records per request when paginating
  pub page_size: u64,
}

impl Default for MetadataConfig {
  fn default() -> Self {
    Self {
      host: "api.allenneuraldynamics.org".to_string(),
      version: "v2".to_string(),
      database: "metadata_index".to_string(),
      collection: "data_assets".to_string(),
      timeout_secs: 120,
      page_size: 500,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub concurrency: usize,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self { concurrency: 1 }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Default filter directive; RUST_LOG overrides it
  pub level: Option<String>,
  /// When set, logs also go to a daily rolling file in this directory
  pub dir: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./zombie-squirrel.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/zombie-squirrel/config.yaml
  ///
  /// Without a file every section takes its default.
  pub fn load(explicit_path: Option<&Path>) -> std::result::Result<Self, ConfigError> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(ConfigError::FileNotFound(p.display().to_string()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    config.apply_overrides(|name| std::env::var(name).ok());
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("zombie-squirrel.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("zombie-squirrel").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> std::result::Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;

    Self::from_yaml_str(&contents)
  }

  pub fn from_yaml_str(contents: &str) -> std::result::Result<Self, ConfigError> {
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    serde_yaml::from_str(contents).map_err(|e| ConfigError::Invalid(e.to_string()))
  }

  /// Apply FOREST_TYPE, ZS_BUCKET, ZS_PREFIX and ZS_METADATA_HOST.
  pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(kind) = lookup("FOREST_TYPE") {
      self.forest.kind = Some(kind);
    }
    if let Some(bucket) = lookup("ZS_BUCKET") {
      self.forest.bucket = bucket;
    }
    if let Some(prefix) = lookup("ZS_PREFIX") {
      self.forest.prefix = prefix;
    }
    if let Some(host) = lookup("ZS_METADATA_HOST") {
      self.metadata.host = host;
    }
  }

  /// The selected backend. Missing or unrecognized values are fatal.
  pub fn backend(&self) -> std::result::Result<BackendKind, ConfigError> {
    self
      .forest
      .kind
      .as_deref()
      .ok_or(ConfigError::MissingBackend)?
      .parse()
  }

  pub fn layout(&self) -> Layout {
    Layout::new(self.forest.prefix.clone(), self.forest.format)
  }

  /// Construct the selected backend.
  pub fn build_storage(&self) -> Result<Arc<dyn CacheStorage>> {
    let storage: Arc<dyn CacheStorage> = match self.backend()? {
      BackendKind::Memory => Arc::new(MemoryStorage::new()),
      BackendKind::S3 => {
        if self.forest.bucket.trim().is_empty() {
          return Err(ConfigError::Invalid("forest.bucket must not be empty".to_string()).into());
        }
        Arc::new(ObjectStorage::s3(&self.forest.bucket)?)
      }
    };
    Ok(storage)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |name: &str| map.get(name).cloned()
  }

  #[test]
  fn test_defaults_without_file() {
    let config = Config::from_yaml_str("").unwrap();
    assert_eq!(config.forest.bucket, "aind-scratch-data");
    assert_eq!(config.forest.prefix, "application-caches");
    assert_eq!(config.forest.format, TableFormat::Parquet);
    assert_eq!(config.metadata.page_size, 500);
    assert_eq!(config.sync.concurrency, 1);
    assert!(matches!(config.backend(), Err(ConfigError::MissingBackend)));
  }

  #[test]
  fn test_partial_file_keeps_other_defaults() {
    let config = Config::from_yaml_str(
      "forest:\n  type: memory\n  format: json\nmetadata:\n  host: http://localhost:8080\n",
    )
    .unwrap();
    assert_eq!(config.backend().unwrap(), BackendKind::Memory);
    assert_eq!(config.forest.format, TableFormat::Json);
    assert_eq!(config.forest.bucket, "aind-scratch-data");
    assert_eq!(config.metadata.host, "http://localhost:8080");
    assert_eq!(config.metadata.version, "v2");
  }

  #[test]
  fn test_invalid_values_are_rejected() {
    assert!(matches!(
      Config::from_yaml_str("forest:\n  format: csv\n"),
      Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
      Config::from_yaml_str("sync: [1, 2"),
      Err(ConfigError::Invalid(_))
    ));
  }

  #[test]
  fn test_forest_type_is_case_insensitive_and_overrides_file() {
    let mut config = Config::from_yaml_str("forest:\n  type: s3\n").unwrap();
    config.apply_overrides(env(&[("FOREST_TYPE", "Memory"), ("ZS_PREFIX", "/tmp-caches/")]));

    assert_eq!(config.backend().unwrap(), BackendKind::Memory);
    assert_eq!(
      config.layout(),
      Layout::new("tmp-caches", TableFormat::Parquet)
    );
  }

  #[test]
  fn test_unknown_backend_is_config_error() {
    let mut config = Config::default();
    config.apply_overrides(env(&[("FOREST_TYPE", "REDSHIFT")]));
    assert!(matches!(config.backend(), Err(ConfigError::UnknownBackend(_))));
    assert!(config.build_storage().is_err());

    config.apply_overrides(env(&[("FOREST_TYPE", " ")]));
    assert!(matches!(config.backend(), Err(ConfigError::MissingBackend)));
  }

  #[tokio::test]
  async fn test_memory_backend_builds() {
    let mut config = Config::default();
    config.apply_overrides(env(&[("FOREST_TYPE", "MEMORY")]));
    let storage = config.build_storage().unwrap();
    assert_eq!(storage.name(), "MemoryTree");
    assert!(!storage.exists("anything").await.unwrap());
  }

  #[test]
  fn test_missing_explicit_file() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound(_)));
  }
}
