//! Tabular values that cross the cache boundary.
//!
//! A `Table` is an ordered list of named, nullable UTF-8 columns and rows of
//! the same width. Every view produces string columns, so a single column
//! type keeps serialization exact.

use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// Schema-tagged table of nullable strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct Table {
  columns: Vec<String>,
  rows: Vec<Vec<Option<String>>>,
}

/// Deserialized form of [`Table`] before the row widths are checked.
#[derive(Deserialize)]
struct RawTable {
  columns: Vec<String>,
  rows: Vec<Vec<Option<String>>>,
}

impl TryFrom<RawTable> for Table {
  type Error = SourceError;

  fn try_from(raw: RawTable) -> Result<Self, Self::Error> {
    Table::from_rows(raw.columns, raw.rows)
  }
}

impl Table {
  /// Create an empty table with the given column names.
  pub fn new<I, S>(columns: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      columns: columns.into_iter().map(Into::into).collect(),
      rows: Vec::new(),
    }
  }

  /// Build a table from columns and rows, checking that every row has one
  /// value per column.
  pub fn from_rows(
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
  ) -> Result<Self, SourceError> {
    if let Some(bad) = rows.iter().position(|r| r.len() != columns.len()) {
      return Err(SourceError::new(format!(
        "row {} has {} values, expected {}",
        bad,
        rows[bad].len(),
        columns.len()
      )));
    }
    Ok(Self { columns, rows })
  }

  /// Append a row. Missing trailing values are filled with nulls and extra
  /// values are dropped.
  pub fn push_row(&mut self, mut row: Vec<Option<String>>) {
    row.resize(self.columns.len(), None);
    self.rows.push(row);
  }

  pub fn columns(&self) -> &[String] {
    &self.columns
  }

  pub fn rows(&self) -> &[Vec<Option<String>>] {
    &self.rows
  }

  pub fn len(&self) -> usize {
    self.rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  pub fn column_index(&self, name: &str) -> Option<usize> {
    self.columns.iter().position(|c| c == name)
  }

  /// All values of a column, or `None` if the column does not exist.
  pub fn column(&self, name: &str) -> Option<Vec<Option<&str>>> {
    let idx = self.column_index(name)?;
    Some(self.rows.iter().map(|r| r[idx].as_deref()).collect())
  }

  /// Non-null values of a column, in row order.
  pub fn column_values(&self, name: &str) -> Vec<String> {
    self
      .column(name)
      .unwrap_or_default()
      .into_iter()
      .flatten()
      .map(String::from)
      .collect()
  }

  /// Value of `column` in row `row`.
  pub fn value(&self, row: usize, column: &str) -> Option<&str> {
    let idx = self.column_index(column)?;
    self.rows.get(row)?.get(idx)?.as_deref()
  }

  /// Keep rows for which the predicate holds.
  pub fn filter_rows<F>(&self, mut keep: F) -> Table
  where
    F: FnMut(&[Option<String>]) -> bool,
  {
    Table {
      columns: self.columns.clone(),
      rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
    }
  }

  /// Sort rows by a column (nulls first). Unknown columns leave the order
  /// unchanged.
  pub fn sort_by_column(&mut self, name: &str) {
    if let Some(idx) = self.column_index(name) {
      self.rows.sort_by(|a, b| a[idx].cmp(&b[idx]));
    }
  }

  /// Check that the table carries exactly the expected columns, in order.
  pub fn check_schema(&self, expected: &[&str]) -> Result<(), SourceError> {
    if self.columns.iter().map(String::as_str).eq(expected.iter().copied()) {
      Ok(())
    } else {
      Err(SourceError::new(format!(
        "unexpected columns {:?}, expected {:?}",
        self.columns, expected
      )))
    }
  }

  /// Render as tab-separated values with a header line.
  pub fn to_tsv(&self) -> String {
    let mut out = self.columns.join("\t");
    out.push('\n');
    for row in &self.rows {
      let line: Vec<&str> = row.iter().map(|v| v.as_deref().unwrap_or("")).collect();
      out.push_str(&line.join("\t"));
      out.push('\n');
    }
    out
  }
}
