//! The matrix pipeline: repackage vendor-published archives, one task per
//! matrix row.
//!
//! Rows are independent. Each runs in its own work subdirectory, a semaphore
//! bounds how many run at once, and a failing row is recorded in the
//! [`MatrixReport`] without affecting the others.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::{AtStep, PipelineError, Step, WorkDir};
use crate::archive::create_archive_async;
use crate::config::MatrixEntry;
use crate::consts::ARCHIVE_EXTENSION;
use crate::fetch::{download, unpack_archive_async, verify_version};
use crate::target::StorageKey;
use crate::upload::{ObjectStore, UploadReceipt};

#[derive(Debug, Clone)]
pub struct MatrixOptions {
  /// Rows processed concurrently.
  pub jobs: usize,
  /// Kept scratch directory; a temporary one is used when absent.
  pub work_dir: Option<PathBuf>,
}

impl Default for MatrixOptions {
  fn default() -> Self {
    Self {
      jobs: 4,
      work_dir: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RowStatus {
  Uploaded { location: String, size: u64 },
  Failed { step: Step, error: String },
}

/// The outcome of one matrix row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowOutcome {
  pub key: StorageKey,
  pub target: String,
  pub url: String,
  #[serde(flatten)]
  pub status: RowStatus,
}

impl RowOutcome {
  fn new(entry: &MatrixEntry, result: Result<UploadReceipt, PipelineError>) -> Self {
    let status = match result {
      Ok(receipt) => RowStatus::Uploaded {
        location: receipt.location,
        size: receipt.size,
      },
      Err(err) => RowStatus::Failed {
        step: err.step,
        error: error_chain(&err),
      },
    };
    Self {
      key: entry.storage_key(),
      target: entry.target.to_string(),
      url: entry.url.clone(),
      status,
    }
  }

  pub fn is_success(&self) -> bool {
    matches!(self.status, RowStatus::Uploaded { .. })
  }
}

/// `step failed: cause: cause...`
fn error_chain(err: &PipelineError) -> String {
  let mut message = err.to_string();
  let mut source = std::error::Error::source(err);
  while let Some(cause) = source {
    message.push_str(": ");
    message.push_str(&cause.to_string());
    source = cause.source();
  }
  message
}

/// Outcomes of a matrix run, in matrix order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatrixReport {
  pub rows: Vec<RowOutcome>,
}

impl MatrixReport {
  pub fn succeeded(&self) -> impl Iterator<Item = &RowOutcome> {
    self.rows.iter().filter(|r| r.is_success())
  }

  pub fn failed(&self) -> impl Iterator<Item = &RowOutcome> {
    self.rows.iter().filter(|r| !r.is_success())
  }

  pub fn is_success(&self) -> bool {
    self.rows.iter().all(RowOutcome::is_success)
  }
}

/// Package every entry and upload it to `store`.
///
/// Only failing to set up the work directory aborts the run; every row error
/// is captured in the returned report.
pub async fn run_matrix<S>(
  entries: Vec<MatrixEntry>,
  store: Arc<S>,
  client: reqwest::Client,
  options: &MatrixOptions,
) -> Result<MatrixReport, PipelineError>
where
  S: ObjectStore + 'static,
{
  let work = WorkDir::create(options.work_dir.as_deref()).at(Step::Prepare)?;
  let work_path = work.path().to_path_buf();
  let semaphore = Arc::new(Semaphore::new(options.jobs.max(1)));

  info!(rows = entries.len(), jobs = options.jobs, store = %store.describe(), "starting matrix run");

  let mut join_set = JoinSet::new();
  for (index, entry) in entries.iter().enumerate() {
    let entry = entry.clone();
    let store = store.clone();
    let client = client.clone();
    let work_path = work_path.clone();
    let semaphore = semaphore.clone();

    join_set.spawn(async move {
      let _permit = semaphore.acquire_owned().await;
      let result = package_entry(&entry, store.as_ref(), &client, &work_path).await;
      (index, RowOutcome::new(&entry, result))
    });
  }

  let mut outcomes: Vec<Option<RowOutcome>> = vec![None; entries.len()];
  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok((index, outcome)) => {
        match &outcome.status {
          RowStatus::Uploaded { location, .. } => info!(key = %outcome.key, location = %location, "row uploaded"),
          RowStatus::Failed { step, error } => warn!(key = %outcome.key, step = %step, error = %error, "row failed"),
        }
        outcomes[index] = Some(outcome);
      }
      Err(e) => error!(error = %e, "matrix task panicked"),
    }
  }

  let rows = outcomes
    .into_iter()
    .zip(&entries)
    .map(|(outcome, entry)| {
      outcome.unwrap_or_else(|| RowOutcome {
        key: entry.storage_key(),
        target: entry.target.to_string(),
        url: entry.url.clone(),
        status: RowStatus::Failed {
          step: Step::Prepare,
          error: "task panicked".to_string(),
        },
      })
    })
    .collect();

  let report = MatrixReport { rows };
  info!(
    succeeded = report.succeeded().count(),
    failed = report.failed().count(),
    "matrix run finished"
  );
  Ok(report)
}

/// Download, unpack, check, archive and upload one row.
async fn package_entry<S: ObjectStore>(
  entry: &MatrixEntry,
  store: &S,
  client: &reqwest::Client,
  work: &Path,
) -> Result<UploadReceipt, PipelineError> {
  let key = entry.storage_key();
  let version = entry.target.version();
  info!(target = %entry.target, url = %entry.url, "packaging row");

  let row_dir = work.join(key.slug());
  if row_dir.exists() {
    tokio::fs::remove_dir_all(&row_dir).await.at(Step::Prepare)?;
  }
  let downloads = row_dir.join("downloads");
  let bundle = row_dir.join("bundle");

  let fetched = download(client, &entry.url, &downloads, entry.sha256.as_deref())
    .await
    .at(Step::Fetch)?;
  let unpacked = unpack_archive_async(fetched.path.clone(), bundle.clone())
    .await
    .at(Step::Unpack)?;
  verify_version(&fetched.path, &unpacked, version).at(Step::VerifyVersion)?;

  let archive_path = row_dir.join(format!("{}.{ARCHIVE_EXTENSION}", key.slug()));
  create_archive_async(bundle, archive_path.clone())
    .await
    .at(Step::Archive)?;
  store.put_file(&key, &archive_path).await.at(Step::Upload)
}
