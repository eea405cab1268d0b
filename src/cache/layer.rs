//! Fetch-or-populate engine.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::storage::CacheStorage;
use super::traits::CacheResult;
use crate::codec::{self, CacheEntry, ColumnsDocument};
use crate::error::{Result, StorageError};
use crate::keys::{Layout, Query};
use crate::source::MetadataSource;
use crate::table::Table;
use crate::views::{self, View};

/// Cache layer that serves view tables from storage and populates missing
/// entries from the metadata database.
///
/// Writes go straight through to the backend; there is no expiry. An entry
/// only changes when a query is populated again with `force_refresh`.
#[derive(Clone)]
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  layout: Layout,
  source: Arc<dyn MetadataSource>,
}

impl CacheLayer {
  pub fn new(
    storage: Arc<dyn CacheStorage>,
    layout: Layout,
    source: Arc<dyn MetadataSource>,
  ) -> Self {
    Self {
      storage,
      layout,
      source,
    }
  }

  pub fn storage(&self) -> &Arc<dyn CacheStorage> {
    &self.storage
  }

  pub fn layout(&self) -> &Layout {
    &self.layout
  }

  /// Return the table for `query`, fetching and storing it when there is no
  /// usable entry or when `force_refresh` is set.
  ///
  /// If the fetch fails nothing is written and any previous entry stays in
  /// place. An entry that cannot be decoded, or whose columns no longer match
  /// the view, is treated as missing.
  pub async fn get_or_populate(
    &self,
    query: &Query,
    force_refresh: bool,
  ) -> Result<CacheResult<Table>> {
    let view = query.view();
    let key = query.cache_key();
    let path = self.layout.object_path(&key);
    let tree = self.storage.name();

    let def = views::resolve(view);
    let previous = if force_refresh && !def.uses_previous {
      None
    } else {
      self.read_entry(view, &path).await?
    };

    if !force_refresh {
      if let Some(entry) = previous {
        info!(tree, acorn = %view, key = %key, rows = entry.table.len(), "Cache hit");
        return Ok(CacheResult::from_cache(entry.table, entry.created_at));
      }
      info!(tree, acorn = %view, key = %key, "Cache miss, fetching from metadata database");
    } else {
      info!(tree, acorn = %view, key = %key, "Refreshing from metadata database");
    }

    let table = (def.fetch)(
      self.source.as_ref(),
      query.params(),
      previous.as_ref().map(|entry| &entry.table),
    )
    .await?;
    table.check_schema(def.columns)?;

    let entry = CacheEntry::new(view.name(), key.as_str(), table);
    let bytes = codec::encode(&entry, self.layout.format())?;
    self.storage.put(&path, bytes).await?;
    info!(tree, acorn = %view, key = %key, rows = entry.table.len(), "Stored");

    if let Err(e) = self.write_columns(view).await {
      warn!(tree, acorn = %view, error = %e, "Failed to store column metadata");
    }

    Ok(CacheResult::from_source(entry.table, entry.created_at))
  }

  /// The stored entry for `query`, if there is a usable one. Never fetches.
  pub async fn read(&self, query: &Query) -> Result<Option<CacheResult<Table>>> {
    let path = self.layout.object_path(&query.cache_key());
    let entry = self.read_entry(query.view(), &path).await?;
    Ok(entry.map(|entry| CacheResult::from_cache(entry.table, entry.created_at)))
  }

  /// Whether an entry exists for `query`. Does not touch the metadata
  /// database.
  pub async fn is_cached(&self, query: &Query) -> Result<bool> {
    let path = self.layout.object_path(&query.cache_key());
    Ok(self.storage.exists(&path).await?)
  }

  /// Column names of a view, from the stored column document when present.
  pub async fn columns(&self, view: View) -> Result<Vec<String>> {
    let path = self.layout.columns_path(view);
    let stored = match self.storage.get(&path).await? {
      Some(bytes) => match serde_json::from_slice::<ColumnsDocument>(&bytes) {
        Ok(doc) => Some(doc.columns),
        Err(e) => {
          warn!(acorn = %view, error = %e, "Ignoring unreadable column metadata");
          None
        }
      },
      None => None,
    };

    Ok(stored.unwrap_or_else(|| view.columns().iter().map(|c| c.to_string()).collect()))
  }

  /// Cache keys stored for a view, sorted.
  pub async fn cached_keys(&self, view: View) -> Result<Vec<String>> {
    let paths = self.storage.list(&self.layout.view_prefix(view)).await?;
    let name = view.name();

    Ok(
      paths
        .iter()
        .filter_map(|path| self.layout.key_from_path(path))
        .filter(|key| key == name || key.starts_with(&format!("{}/", name)))
        .collect(),
    )
  }

  async fn read_entry(&self, view: View, path: &str) -> Result<Option<CacheEntry>> {
    let Some(bytes) = self.storage.get(path).await? else {
      return Ok(None);
    };

    match codec::decode(bytes, self.layout.format()) {
      Ok(entry) if entry.table.check_schema(view.columns()).is_ok() => Ok(Some(entry)),
      Ok(_) => {
        warn!(acorn = %view, path, "Cached columns differ from the view, repopulating");
        Ok(None)
      }
      Err(e) => {
        warn!(acorn = %view, path, error = %e, "Cached entry is unreadable, repopulating");
        Ok(None)
      }
    }
  }

  async fn write_columns(&self, view: View) -> std::result::Result<(), StorageError> {
    let doc = ColumnsDocument {
      columns: view.columns().iter().map(|c| c.to_string()).collect(),
    };
    let bytes = serde_json::to_vec(&doc).map_err(|e| StorageError::Encode(e.to_string()))?;
    debug!(acorn = %view, "Storing column metadata");
    self
      .storage
      .put(&self.layout.columns_path(view), Bytes::from(bytes))
      .await
  }
}
