//! Query normalization, cache keys and the object layout.
//!
//! Keys are `{view}` for queries without identifiers and
//! `{view}/{sha256 of the sorted identifiers}` otherwise. View names never
//! contain `/`, so keys of different views cannot overlap.

use std::collections::BTreeSet;
use std::fmt;

use sha2::{Digest, Sha256};

use crate::codec::TableFormat;
use crate::error::{Error, Result};
use crate::views::{ParamShape, View};

/// Normalized query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Params {
  /// No identifiers: the whole view.
  All,
  /// A sorted, deduplicated set of identifiers.
  Ids(BTreeSet<String>),
}

impl Params {
  /// Normalize a list of identifiers. Whitespace is trimmed and empty
  /// strings are dropped.
  pub fn ids<I, S>(ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    Params::Ids(
      ids
        .into_iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect(),
    )
  }

  /// Identifiers as a slice-friendly list; empty for `All`.
  pub fn as_list(&self) -> Vec<&str> {
    match self {
      Params::All => Vec::new(),
      Params::Ids(ids) => ids.iter().map(String::as_str).collect(),
    }
  }

  fn is_empty_ids(&self) -> bool {
    matches!(self, Params::Ids(ids) if ids.is_empty())
  }
}

impl fmt::Display for Params {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Params::All => write!(f, "*"),
      Params::Ids(ids) => {
        let list: Vec<&str> = ids.iter().map(String::as_str).collect();
        write!(f, "[{}]", list.join(", "))
      }
    }
  }
}

/// A view plus normalized parameters; the unit of cache addressing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
  view: View,
  params: Params,
}

impl Query {
  /// Build a query, checking the parameters against the view's shape.
  ///
  /// An empty identifier list is treated as "no identifiers".
  pub fn new(view: View, params: Params) -> Result<Self> {
    let params = if params.is_empty_ids() {
      Params::All
    } else {
      params
    };

    match (view.param_shape(), &params) {
      (ParamShape::None, Params::Ids(_)) => Err(Error::InvalidQuery(format!(
        "{} takes no parameters",
        view.name()
      ))),
      (ParamShape::RequiredIds, Params::All) => Err(Error::InvalidQuery(format!(
        "{} requires at least one identifier",
        view.name()
      ))),
      _ => Ok(Self { view, params }),
    }
  }

  /// Query for the whole view.
  pub fn all(view: View) -> Result<Self> {
    Self::new(view, Params::All)
  }

  pub fn view(&self) -> View {
    self.view
  }

  pub fn params(&self) -> &Params {
    &self.params
  }

  /// Derive the cache key for this query.
  pub fn cache_key(&self) -> CacheKey {
    match &self.params {
      Params::All => CacheKey(self.view.name().to_string()),
      Params::Ids(ids) => {
        let list: Vec<&str> = ids.iter().map(String::as_str).collect();
        // A JSON array is an unambiguous encoding of the list
        let canonical = serde_json::to_string(&list).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        CacheKey(format!(
          "{}/{}",
          self.view.name(),
          hex::encode(hasher.finalize())
        ))
      }
    }
  }

  /// Human-readable description for logs and reports.
  pub fn description(&self) -> String {
    match &self.params {
      Params::All => self.view.name().to_string(),
      Params::Ids(_) => format!("{} {}", self.view.name(), self.params),
    }
  }
}

/// Deterministic address of a cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Maps cache keys to object paths in the flat namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
  prefix: String,
  format: TableFormat,
}

impl Layout {
  pub fn new(prefix: impl Into<String>, format: TableFormat) -> Self {
    let prefix = prefix.into().trim_matches('/').to_string();
    Self { prefix, format }
  }

  pub fn format(&self) -> TableFormat {
    self.format
  }

  /// `{prefix}/zs_{key}.{ext}`
  pub fn object_path(&self, key: &CacheKey) -> String {
    self.join(&format!("zs_{}.{}", key, self.format.extension()))
  }

  /// Location of the column metadata document for a view. All QC entries
  /// share one document.
  pub fn columns_path(&self, view: View) -> String {
    self.join(&format!("zs_{}.json", view.name()))
  }

  /// Prefix that every object of a view starts with.
  pub fn view_prefix(&self, view: View) -> String {
    self.join(&format!("zs_{}", view.name()))
  }

  /// Cache key of an object path written by this layout, if it is one.
  pub fn key_from_path(&self, path: &str) -> Option<String> {
    let name = if self.prefix.is_empty() {
      path
    } else {
      path.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?
    };
    let suffix = format!(".{}", self.format.extension());
    name
      .strip_prefix("zs_")?
      .strip_suffix(suffix.as_str())
      .map(String::from)
  }

  fn join(&self, name: &str) -> String {
    if self.prefix.is_empty() {
      name.to_string()
    } else {
      format!("{}/{}", self.prefix, name)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn qc(ids: &[&str]) -> Query {
    Query::new(View::Qc, Params::ids(ids)).unwrap()
  }

  #[test]
  fn test_key_is_deterministic() {
    let a = qc(&["rec-1", "rec-2"]).cache_key();
    let b = qc(&["rec-1", "rec-2"]).cache_key();
    assert_eq!(a, b);
    assert!(a.as_str().starts_with("qc/"));
    assert_eq!(a.as_str().len(), "qc/".len() + 64);
  }

  #[test]
  fn test_key_normalizes_order_and_duplicates() {
    let ab = qc(&["a", "b"]).cache_key();
    assert_eq!(ab, qc(&["b", "a"]).cache_key());
    assert_eq!(ab, qc(&["a", "a", "b"]).cache_key());
    assert_eq!(ab, qc(&[" a", "b ", ""]).cache_key());
    assert_ne!(ab, qc(&["a"]).cache_key());
  }

  #[test]
  fn test_single_id_and_one_element_list_match() {
    let single = Query::new(View::Qc, Params::ids(["sub-1"])).unwrap();
    let list = Query::new(View::Qc, Params::ids(vec!["sub-1".to_string()])).unwrap();
    assert_eq!(single.cache_key(), list.cache_key());
  }

  #[test]
  fn test_views_never_share_keys() {
    let mut keys = Vec::new();
    for view in View::ALL {
      if view.param_shape() != ParamShape::RequiredIds {
        keys.push(Query::all(view).unwrap().cache_key());
      }
      if view.param_shape() != ParamShape::None {
        keys.push(Query::new(view, Params::ids(["x"])).unwrap().cache_key());
        keys.push(Query::new(view, Params::ids(["x", "y"])).unwrap().cache_key());
      }
    }
    let unique: BTreeSet<_> = keys.iter().collect();
    assert_eq!(unique.len(), keys.len());

    for key in &keys {
      let owners = View::ALL
        .iter()
        .filter(|v| {
          let name = v.name();
          key.as_str() == name || key.as_str().starts_with(&format!("{}/", name))
        })
        .count();
      assert_eq!(owners, 1, "key {} belongs to {} views", key, owners);
    }
  }

  #[test]
  fn test_zero_parameter_views_use_fixed_key() {
    let key = Query::all(View::UniqueProjectNames).unwrap().cache_key();
    assert_eq!(key.as_str(), "unique_project_names");
  }

  #[test]
  fn test_shape_validation() {
    assert!(matches!(
      Query::new(View::UniqueSubjectIds, Params::ids(["a"])),
      Err(Error::InvalidQuery(_))
    ));
    assert!(matches!(Query::all(View::Qc), Err(Error::InvalidQuery(_))));
    assert!(matches!(
      Query::new(View::Qc, Params::ids(Vec::<String>::new())),
      Err(Error::InvalidQuery(_))
    ));
    // An empty filter on an optional view is the whole view
    let q = Query::new(View::AssetBasics, Params::ids(Vec::<String>::new())).unwrap();
    assert_eq!(q.params(), &Params::All);
  }

  #[test]
  fn test_layout_paths() {
    let layout = Layout::new("application-caches/", TableFormat::Parquet);
    let key = Query::all(View::AssetBasics).unwrap().cache_key();
    assert_eq!(
      layout.object_path(&key),
      "application-caches/zs_asset_basics.pqt"
    );
    assert_eq!(
      layout.columns_path(View::Qc),
      "application-caches/zs_qc.json"
    );

    let bare = Layout::new("", TableFormat::Json);
    assert_eq!(bare.object_path(&key), "zs_asset_basics.tbl.json");
  }

  #[test]
  fn test_key_from_path_inverts_object_path() {
    let layout = Layout::new("caches", TableFormat::Parquet);
    let key = qc(&["sub-1"]).cache_key();
    assert_eq!(
      layout.key_from_path(&layout.object_path(&key)).as_deref(),
      Some(key.as_str())
    );
    assert_eq!(layout.key_from_path(&layout.columns_path(View::Qc)), None);
    assert_eq!(layout.key_from_path("elsewhere/zs_qc.pqt"), None);
  }
}
