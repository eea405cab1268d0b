//! Bulk refresh of every view ("hiding acorns").

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::cache::CacheLayer;
use crate::error::{Error, Result, SourceError};
use crate::keys::{Params, Query};
use crate::views::{ParamShape, View};

/// What to sync and how.
#[derive(Debug, Clone)]
pub struct SyncOptions {
  /// Views to sync, in order. Duplicates are ignored.
  pub views: Vec<View>,
  /// Fetch and overwrite even when an entry exists
  pub force_refresh: bool,
  /// Queries in flight at once
  pub concurrency: usize,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self {
      views: View::ALL.to_vec(),
      force_refresh: true,
      concurrency: 1,
    }
  }
}

/// A query that could not be synced.
#[derive(Debug)]
pub struct SyncFailure {
  pub view: View,
  pub params: Params,
  pub error: Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  AllSucceeded,
  PartialFailure,
}

#[derive(Debug, Default)]
pub struct SyncReport {
  pub succeeded: usize,
  pub failed: usize,
  /// In enumeration order
  pub failures: Vec<SyncFailure>,
}

impl SyncReport {
  pub fn outcome(&self) -> SyncOutcome {
    if self.failed == 0 {
      SyncOutcome::AllSucceeded
    } else {
      SyncOutcome::PartialFailure
    }
  }

  fn record(&mut self, query: &Query, result: Result<usize>) {
    match result {
      Ok(rows) => {
        info!(acorn = %query.view(), params = %query.params(), rows, "Hidden");
        self.succeeded += 1;
      }
      Err(e) => self.fail(query.view(), query.params().clone(), e),
    }
  }

  fn fail(&mut self, view: View, params: Params, error: Error) {
    error!(acorn = %view, %params, error = %error, "Failed to hide acorn");
    self.failed += 1;
    self.failures.push(SyncFailure {
      view,
      params,
      error,
    });
  }
}

/// Populate the cache for every query of the selected views.
///
/// Queries are isolated from each other: a failure is logged and recorded
/// and the remaining queries still run. QC entries are enumerated per
/// subject id; if the subject ids cannot be read, QC is skipped and the
/// failure recorded.
pub async fn hide_acorns(cache: &CacheLayer, options: &SyncOptions) -> SyncReport {
  let mut views: Vec<View> = Vec::new();
  for view in &options.views {
    if !views.contains(view) {
      views.push(*view);
    }
  }

  info!(
    tree = cache.storage().name(),
    views = views.len(),
    force = options.force_refresh,
    "Hiding acorns"
  );

  let mut report = SyncReport::default();

  let (per_subject, whole): (Vec<View>, Vec<View>) = views
    .into_iter()
    .partition(|v| v.param_shape() == ParamShape::RequiredIds);

  let mut queries = Vec::new();
  for view in whole {
    match Query::all(view) {
      Ok(query) => queries.push(query),
      Err(e) => report.fail(view, Params::All, e),
    }
  }
  let (synced, failed) = run(cache, queries, options, &mut report).await;

  if !per_subject.is_empty() {
    // Subject ids hidden above are current. If hiding them failed, fall back
    // to the stored entry without asking the database again.
    let ids = if failed.contains(&View::UniqueSubjectIds) {
      stored_subject_ids(cache).await
    } else {
      let refresh = options.force_refresh && !synced.contains(&View::UniqueSubjectIds);
      subject_ids(cache, refresh).await
    };
    match ids {
      Ok(ids) => {
        info!(subjects = ids.len(), "Enumerated subjects");
        let mut queries = Vec::new();
        for view in per_subject {
          for id in &ids {
            match Query::new(view, Params::ids([id])) {
              Ok(query) => queries.push(query),
              Err(e) => report.fail(view, Params::ids([id]), e),
            }
          }
        }
        run(cache, queries, options, &mut report).await;
      }
      Err(e) => {
        warn!(error = %e, "Could not enumerate subjects, skipping QC");
        let message = e.to_string();
        let mut first = Some(e);
        for view in per_subject {
          let error = first
            .take()
            .unwrap_or_else(|| SourceError::new(message.clone()).into());
          report.fail(view, Params::All, error);
        }
      }
    }
  }

  info!(
    succeeded = report.succeeded,
    failed = report.failed,
    "Finished hiding acorns"
  );
  report
}

/// Run queries with bounded concurrency, in order. Returns the views whose
/// every query succeeded and the views with at least one failed query.
async fn run(
  cache: &CacheLayer,
  queries: Vec<Query>,
  options: &SyncOptions,
  report: &mut SyncReport,
) -> (Vec<View>, Vec<View>) {
  let force = options.force_refresh;
  let results: Vec<(Query, Result<usize>)> = stream::iter(queries)
    .map(move |query| async move {
      let result = cache
        .get_or_populate(&query, force)
        .await
        .map(|r| r.data.len());
      (query, result)
    })
    .buffered(options.concurrency.max(1))
    .collect()
    .await;

  let mut ok_views: Vec<View> = Vec::new();
  let mut failed_views: Vec<View> = Vec::new();
  for (query, result) in results {
    let view = query.view();
    if result.is_ok() {
      if !ok_views.contains(&view) {
        ok_views.push(view);
      }
    } else if !failed_views.contains(&view) {
      failed_views.push(view);
    }
    report.record(&query, result);
  }

  ok_views.retain(|v| !failed_views.contains(v));
  (ok_views, failed_views)
}

async fn subject_ids(cache: &CacheLayer, force_refresh: bool) -> Result<Vec<String>> {
  let query = Query::all(View::UniqueSubjectIds)?;
  let result = cache.get_or_populate(&query, force_refresh).await?;
  Ok(result.data.column_values("subject_id"))
}

async fn stored_subject_ids(cache: &CacheLayer) -> Result<Vec<String>> {
  let query = Query::all(View::UniqueSubjectIds)?;
  match cache.read(&query).await? {
    Some(result) => {
      warn!(cached_at = %result.cached_at, "Using stored subject ids");
      Ok(result.data.column_values("subject_id"))
    }
    None => Err(SourceError::new("subject ids could not be fetched and none are stored").into()),
  }
}
