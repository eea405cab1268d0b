//! View registry: the six named views, their schemas, and the functions
//! that build them from the metadata database.
//!
//! The registry is a `match` on [`View`]; nothing is registered at runtime.

mod asset_basics;
mod qc;
mod raw_to_derived;
mod source_data;
mod unique_project_names;
mod unique_subject_ids;

use std::fmt;
use std::str::FromStr;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::{Error, SourceError};
use crate::keys::Params;
use crate::source::MetadataSource;
use crate::table::Table;

pub use qc::{decode_value, encode_value, filter_by_asset_names};

/// One of the named logical views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
  UniqueProjectNames,
  UniqueSubjectIds,
  AssetBasics,
  SourceData,
  RawToDerived,
  Qc,
}

/// What parameters a view accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamShape {
  /// No parameters.
  None,
  /// Optional identifier filter.
  OptionalIds,
  /// One or more identifiers.
  RequiredIds,
}

impl View {
  pub const ALL: [View; 6] = [
    View::UniqueProjectNames,
    View::UniqueSubjectIds,
    View::AssetBasics,
    View::SourceData,
    View::RawToDerived,
    View::Qc,
  ];

  /// Stable name used in cache keys and object paths.
  pub fn name(&self) -> &'static str {
    match self {
      View::UniqueProjectNames => "unique_project_names",
      View::UniqueSubjectIds => "unique_subject_ids",
      View::AssetBasics => "asset_basics",
      View::SourceData => "source_data",
      View::RawToDerived => "raw_to_derived",
      View::Qc => "qc",
    }
  }

  /// Short aliases accepted on the command line.
  fn aliases(&self) -> &'static [&'static str] {
    match self {
      View::UniqueProjectNames => &["upn"],
      View::UniqueSubjectIds => &["usi"],
      View::AssetBasics => &["basics"],
      View::SourceData => &["d2r"],
      View::RawToDerived => &["r2d"],
      View::Qc => &[],
    }
  }

  pub fn param_shape(&self) -> ParamShape {
    match self {
      View::UniqueProjectNames | View::UniqueSubjectIds => ParamShape::None,
      View::AssetBasics | View::SourceData | View::RawToDerived => ParamShape::OptionalIds,
      View::Qc => ParamShape::RequiredIds,
    }
  }

  /// Fixed column schema of the view's table.
  pub fn columns(&self) -> &'static [&'static str] {
    resolve(*self).columns
  }
}

impl fmt::Display for View {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for View {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let wanted = s.trim().to_lowercase().replace('-', "_");
    View::ALL
      .into_iter()
      .find(|v| v.name() == wanted || v.aliases().contains(&wanted.as_str()))
      .ok_or_else(|| Error::InvalidQuery(format!("unknown view '{}'", s)))
  }
}

/// Builds a view's table from the metadata database. The third argument is
/// the previously cached table for the same query, if any.
pub type FetchFn = for<'a> fn(
  &'a dyn MetadataSource,
  &'a Params,
  Option<&'a Table>,
) -> BoxFuture<'a, Result<Table, SourceError>>;

/// Registry entry for a view.
#[derive(Clone, Copy)]
pub struct ViewDef {
  pub fetch: FetchFn,
  pub columns: &'static [&'static str],
  /// Whether `fetch` reads the previously cached table
  pub uses_previous: bool,
}

impl fmt::Debug for ViewDef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ViewDef")
      .field("columns", &self.columns)
      .field("uses_previous", &self.uses_previous)
      .finish_non_exhaustive()
  }
}

/// Look up the fetch function and schema of a view.
pub fn resolve(view: View) -> ViewDef {
  match view {
    View::UniqueProjectNames => ViewDef {
      fetch: unique_project_names::fetch,
      columns: unique_project_names::COLUMNS,
      uses_previous: false,
    },
    View::UniqueSubjectIds => ViewDef {
      fetch: unique_subject_ids::fetch,
      columns: unique_subject_ids::COLUMNS,
      uses_previous: false,
    },
    View::AssetBasics => ViewDef {
      fetch: asset_basics::fetch,
      columns: asset_basics::COLUMNS,
      uses_previous: true,
    },
    View::SourceData => ViewDef {
      fetch: source_data::fetch,
      columns: source_data::COLUMNS,
      uses_previous: false,
    },
    View::RawToDerived => ViewDef {
      fetch: raw_to_derived::fetch,
      columns: raw_to_derived::COLUMNS,
      uses_previous: false,
    },
    View::Qc => ViewDef {
      fetch: qc::fetch,
      columns: qc::COLUMNS,
      uses_previous: false,
    },
  }
}

/// `$in` filter on a field for the identifiers in `params`, or an empty
/// filter for `Params::All`.
pub(crate) fn ids_filter(field: &str, params: &Params) -> serde_json::Value {
  match params {
    Params::All => serde_json::json!({}),
    Params::Ids(_) => serde_json::json!({ field: { "$in": params.as_list() } }),
  }
}

/// Build a table from one row of optional values per record, checking the
/// width against `columns`.
pub(crate) fn table_from(
  columns: &[&str],
  rows: Vec<Vec<Option<String>>>,
) -> Result<Table, SourceError> {
  Table::from_rows(columns.iter().map(|c| c.to_string()).collect(), rows)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_view_names_and_aliases() {
    assert_eq!("qc".parse::<View>().unwrap(), View::Qc);
    assert_eq!("r2d".parse::<View>().unwrap(), View::RawToDerived);
    assert_eq!(
      "unique-project-names".parse::<View>().unwrap(),
      View::UniqueProjectNames
    );
    assert!("nope".parse::<View>().is_err());
  }

  #[test]
  fn test_view_names_are_distinct_and_slash_free() {
    let mut names: Vec<&str> = View::ALL.iter().map(|v| v.name()).collect();
    assert!(names.iter().all(|n| !n.contains('/')));
    names.sort();
    names.dedup();
    assert_eq!(names.len(), View::ALL.len());
  }

  #[test]
  fn test_every_view_has_a_schema() {
    for view in View::ALL {
      assert!(!view.columns().is_empty(), "{} has no columns", view);
    }
  }
}
