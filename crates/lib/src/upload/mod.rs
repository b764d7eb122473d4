//! Object storage for finished bundles.
//!
//! An [`ObjectStore`] takes an archive on disk and places it under its
//! [`StorageKey`], replacing whatever was there. [`S3Store`] talks to any
//! S3-compatible endpoint; [`DirStore`] writes the same layout to a local
//! directory.

mod dir;
mod s3;

use std::future::Future;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::config::Credentials;
use crate::target::StorageKey;

pub use dir::DirStore;
pub use s3::S3Store;

#[derive(Debug, Error)]
pub enum UploadError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("storage rejected {key} (status {}, code {}): {message}", fmt_opt(.status), fmt_opt(.code))]
  Rejected {
    key: StorageKey,
    status: Option<u16>,
    code: Option<String>,
    message: String,
  },
}

fn fmt_opt<T: std::fmt::Display>(value: &Option<T>) -> String {
  value.as_ref().map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

/// Where an upload landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
  pub key: StorageKey,
  /// `s3://bucket/key` or a local path.
  pub location: String,
  pub size: u64,
}

/// Destination for bundle archives.
pub trait ObjectStore: Send + Sync {
  /// Store the file at `path` under `key`, overwriting any existing object.
  fn put_file(&self, key: &StorageKey, path: &Path) -> impl Future<Output = Result<UploadReceipt, UploadError>> + Send;

  /// Human-readable destination, for logs.
  fn describe(&self) -> String;
}

/// The store a run uploads to.
#[derive(Debug, Clone)]
pub enum Store {
  S3(S3Store),
  Dir(DirStore),
}

impl Store {
  /// A local directory store when `output_dir` is given, otherwise S3 with
  /// the given credentials.
  pub fn select(output_dir: Option<&Path>, credentials: Option<&Credentials>) -> Option<Self> {
    match (output_dir, credentials) {
      (Some(dir), _) => Some(Self::Dir(DirStore::new(dir))),
      (None, Some(credentials)) => Some(Self::S3(S3Store::new(credentials))),
      (None, None) => None,
    }
  }
}

impl ObjectStore for Store {
  async fn put_file(&self, key: &StorageKey, path: &Path) -> Result<UploadReceipt, UploadError> {
    match self {
      Self::S3(store) => store.put_file(key, path).await,
      Self::Dir(store) => store.put_file(key, path).await,
    }
  }

  fn describe(&self) -> String {
    match self {
      Self::S3(store) => store.describe(),
      Self::Dir(store) => store.describe(),
    }
  }
}
