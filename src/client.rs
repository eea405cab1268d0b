//! Typed query surface over the cache layer.

use std::sync::Arc;

use crate::cache::{CacheLayer, CacheStorage};
use crate::config::Config;
use crate::error::Result;
use crate::keys::{Params, Query};
use crate::source::{DocDbClient, MetadataSource};
use crate::table::Table;
use crate::views::{filter_by_asset_names, View};

/// Metadata client with transparent caching.
///
/// Every method answers from the cache when an entry exists and otherwise
/// fetches from the metadata database and stores the result. Pass
/// `force_refresh` to always fetch and overwrite.
#[derive(Clone)]
pub struct CachedMetadataClient {
  cache: CacheLayer,
}

impl CachedMetadataClient {
  /// Build the backend and the REST client described by `config`.
  pub fn from_config(config: &Config) -> Result<Self> {
    let storage = config.build_storage()?;
    let source = DocDbClient::new(&config.metadata)?;
    Ok(Self::new(storage, config, Arc::new(source)))
  }

  pub fn new(
    storage: Arc<dyn CacheStorage>,
    config: &Config,
    source: Arc<dyn MetadataSource>,
  ) -> Self {
    Self::with_layer(CacheLayer::new(storage, config.layout(), source))
  }

  pub fn with_layer(cache: CacheLayer) -> Self {
    Self { cache }
  }

  pub fn layer(&self) -> &CacheLayer {
    &self.cache
  }

  /// Fetch any view. An empty `ids` means the whole view.
  pub async fn get(&self, view: View, ids: &[String], force_refresh: bool) -> Result<Table> {
    self.table(view, Params::ids(ids), force_refresh).await
  }

  /// Every distinct project name.
  pub async fn unique_project_names(&self, force_refresh: bool) -> Result<Vec<String>> {
    let table = self
      .table(View::UniqueProjectNames, Params::All, force_refresh)
      .await?;
    Ok(table.column_values("project_name"))
  }

  /// Every distinct subject id.
  pub async fn unique_subject_ids(&self, force_refresh: bool) -> Result<Vec<String>> {
    let table = self
      .table(View::UniqueSubjectIds, Params::All, force_refresh)
      .await?;
    Ok(table.column_values("subject_id"))
  }

  /// Basic asset metadata, optionally limited to some projects.
  pub async fn asset_basics(&self, project_names: &[String], force_refresh: bool) -> Result<Table> {
    self
      .table(View::AssetBasics, Params::ids(project_names), force_refresh)
      .await
  }

  /// Source data of derived records, optionally limited to some names.
  pub async fn source_data(&self, names: &[String], force_refresh: bool) -> Result<Table> {
    self
      .table(View::SourceData, Params::ids(names), force_refresh)
      .await
  }

  /// Derived records of raw records, optionally limited to some raw names.
  pub async fn raw_to_derived(&self, raw_names: &[String], force_refresh: bool) -> Result<Table> {
    self
      .table(View::RawToDerived, Params::ids(raw_names), force_refresh)
      .await
  }

  /// QC metrics of every asset of the given subjects.
  pub async fn qc(&self, subject_ids: &[String], force_refresh: bool) -> Result<Table> {
    self
      .table(View::Qc, Params::ids(subject_ids), force_refresh)
      .await
  }

  /// QC metrics of one subject, limited to the named assets.
  pub async fn qc_for_assets(
    &self,
    subject_id: &str,
    asset_names: &[String],
    force_refresh: bool,
  ) -> Result<Table> {
    let table = self
      .table(View::Qc, Params::ids([subject_id]), force_refresh)
      .await?;
    Ok(filter_by_asset_names(&table, asset_names))
  }

  /// Column names of a view.
  pub async fn columns(&self, view: View) -> Result<Vec<String>> {
    self.cache.columns(view).await
  }

  async fn table(&self, view: View, params: Params, force_refresh: bool) -> Result<Table> {
    let query = Query::new(view, params)?;
    let result = self.cache.get_or_populate(&query, force_refresh).await?;
    Ok(result.data)
  }
}
