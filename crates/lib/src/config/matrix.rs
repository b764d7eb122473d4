//! The packaging matrix for vendor-published binaries.
//!
//! A matrix is a JSON document listing one row per (database, version,
//! platform, arch) together with the download URL of the vendor archive:
//!
//! ```json
//! { "targets": [
//!   { "database": "mongodb", "version": "8.0.4", "platform": "linux", "arch": "x86_64",
//!     "url": "https://fastdl.mongodb.org/linux/mongodb-linux-x86_64-ubuntu2204-{version}.tgz" }
//! ] }
//! ```
//!
//! `url` may use the placeholders `{version}`, `{major}`, `{platform}` and
//! `{arch}`. Every row is checked before anything is downloaded and all
//! problems are reported together.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::ConfigError;
use crate::consts::DEFAULT_MATRIX_JSON;
use crate::platform::{Arch, Os, Platform};
use crate::target::{BuildTarget, Database, StorageKey};

/// One problem found while validating a matrix. Rows are numbered from 1.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatrixProblem {
  #[error("matrix has no targets")]
  Empty,

  #[error("row {row}: {message}")]
  InvalidField { row: usize, message: String },

  #[error("row {row}: postgresql is built from source by `dbbundle postgres`, not by the matrix")]
  SourceOnlyDatabase { row: usize },

  #[error("row {row}: invalid url '{url}': {message}")]
  InvalidUrl { row: usize, url: String, message: String },

  #[error("row {row}: sha256 must be 64 lowercase hex characters")]
  InvalidSha256 { row: usize },

  #[error("row {row}: storage key {key} already produced by row {first_row}")]
  DuplicateKey { row: usize, first_row: usize, key: StorageKey },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMatrix {
  targets: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntry {
  database: String,
  version: String,
  platform: String,
  arch: String,
  url: String,
  #[serde(default)]
  sha256: Option<String>,
}

/// A validated matrix row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixEntry {
  pub target: BuildTarget,
  /// Download URL with placeholders expanded.
  pub url: String,
  pub sha256: Option<String>,
}

impl MatrixEntry {
  pub fn storage_key(&self) -> StorageKey {
    self.target.storage_key()
  }
}

impl fmt::Display for MatrixEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.target)
  }
}

/// A validated list of matrix rows with unique storage keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix {
  entries: Vec<MatrixEntry>,
}

impl Matrix {
  /// The matrix shipped with the tool.
  pub fn builtin() -> Result<Self, ConfigError> {
    Self::from_json(DEFAULT_MATRIX_JSON, "built-in matrix")
  }

  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&content, &path.display().to_string())
  }

  /// Parse and validate a matrix document. `origin` names the document in errors.
  pub fn from_json(content: &str, origin: &str) -> Result<Self, ConfigError> {
    let raw: RawMatrix = serde_json::from_str(content).map_err(|source| ConfigError::Parse {
      origin: origin.to_string(),
      source,
    })?;

    let mut problems = Vec::new();
    let mut entries = Vec::new();
    let mut seen: HashMap<StorageKey, usize> = HashMap::new();

    if raw.targets.is_empty() {
      problems.push(MatrixProblem::Empty);
    }

    for (idx, raw_entry) in raw.targets.into_iter().enumerate() {
      let row = idx + 1;
      let Some(entry) = validate_entry(row, raw_entry, &mut problems) else {
        continue;
      };

      let key = entry.storage_key();
      if let Some(&first_row) = seen.get(&key) {
        problems.push(MatrixProblem::DuplicateKey { row, first_row, key });
        continue;
      }
      seen.insert(key, row);
      entries.push(entry);
    }

    if !problems.is_empty() {
      return Err(ConfigError::InvalidMatrix(problems));
    }

    debug!(origin = %origin, targets = entries.len(), "loaded matrix");
    Ok(Self { entries })
  }

  pub fn entries(&self) -> &[MatrixEntry] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Keep only rows for the given database.
  pub fn retain_database(&mut self, database: Database) {
    self.entries.retain(|e| e.target.database() == database);
  }

  pub fn into_entries(self) -> Vec<MatrixEntry> {
    self.entries
  }
}

/// Validate one row, pushing every problem found. Returns the entry only if the row is clean.
fn validate_entry(row: usize, raw: RawEntry, problems: &mut Vec<MatrixProblem>) -> Option<MatrixEntry> {
  let before = problems.len();
  let mut invalid = |message: String| problems.push(MatrixProblem::InvalidField { row, message });

  let database = raw.database.parse::<Database>().map_err(|e| invalid(e.to_string())).ok();
  let os = raw.platform.parse::<Os>().map_err(|e| invalid(e.to_string())).ok();
  let arch = raw.arch.parse::<Arch>().map_err(|e| invalid(e.to_string())).ok();

  if database == Some(Database::Postgresql) {
    problems.push(MatrixProblem::SourceOnlyDatabase { row });
  }

  let target = match (database, os, arch) {
    (Some(database), Some(os), Some(arch)) => {
      match BuildTarget::new(database, raw.version.clone(), Platform::new(os, arch)) {
        Ok(target) => Some(target),
        Err(e) => {
          problems.push(MatrixProblem::InvalidField {
            row,
            message: e.to_string(),
          });
          None
        }
      }
    }
    _ => None,
  };

  let url = target.as_ref().map(|t| expand_url(&raw.url, t));
  if let Some(url) = &url {
    if let Err(message) = check_url(url) {
      problems.push(MatrixProblem::InvalidUrl {
        row,
        url: url.clone(),
        message,
      });
    }
  }

  let sha256 = raw.sha256.filter(|s| !s.is_empty());
  if let Some(sha) = &sha256 {
    if sha.len() != 64 || !sha.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
      problems.push(MatrixProblem::InvalidSha256 { row });
    }
  }

  if problems.len() != before {
    return None;
  }

  Some(MatrixEntry {
    target: target?,
    url: url?,
    sha256,
  })
}

/// Expand `{version}`, `{major}`, `{platform}` and `{arch}` in a URL template.
pub fn expand_url(template: &str, target: &BuildTarget) -> String {
  template
    .replace("{version}", target.version())
    .replace("{major}", target.major_version())
    .replace("{platform}", target.os().as_str())
    .replace("{arch}", target.arch().as_str())
}

fn check_url(url: &str) -> Result<(), String> {
  if url.contains(['{', '}']) {
    return Err("unresolved placeholder".to_string());
  }
  let parsed = Url::parse(url).map_err(|e| e.to_string())?;
  if !matches!(parsed.scheme(), "http" | "https") {
    return Err(format!("unsupported scheme '{}'", parsed.scheme()));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn problems_of(doc: &str) -> Vec<MatrixProblem> {
    match Matrix::from_json(doc, "test") {
      Err(ConfigError::InvalidMatrix(problems)) => problems,
      other => panic!("expected invalid matrix, got {other:?}"),
    }
  }

  #[test]
  fn builtin_matrix_is_valid() {
    let matrix = Matrix::builtin().unwrap();
    assert!(!matrix.is_empty());
    assert!(
      matrix
        .entries()
        .iter()
        .all(|e| e.target.database() != Database::Postgresql)
    );
  }

  #[test]
  fn expands_placeholders() {
    let doc = r#"{ "targets": [
      { "database": "mongodb", "version": "8.0.4", "platform": "linux", "arch": "arm64",
        "url": "https://example.com/{major}/mongo-{platform}-{arch}-{version}.tgz" }
    ] }"#;
    let matrix = Matrix::from_json(doc, "test").unwrap();
    assert_eq!(
      matrix.entries()[0].url,
      "https://example.com/8/mongo-linux-arm64-8.0.4.tgz"
    );
    assert_eq!(matrix.entries()[0].storage_key().as_str(), "mongodb/8/linux/arm64.tar.gz");
  }

  #[test]
  fn reports_every_problem() {
    let doc = r#"{ "targets": [
      { "database": "mysql", "version": "8.0", "platform": "linux", "arch": "arm64", "url": "https://x/a.tgz" },
      { "database": "redis", "version": "latest", "platform": "bsd", "arch": "armv7", "url": "https://x/b.tgz" },
      { "database": "postgresql", "version": "17.5", "platform": "linux", "arch": "arm64", "url": "https://x/c.tgz" },
      { "database": "redis", "version": "7.4.0", "platform": "linux", "arch": "arm64", "url": "ftp://x/d.tgz" }
    ] }"#;
    let problems = problems_of(doc);

    assert!(problems.contains(&MatrixProblem::SourceOnlyDatabase { row: 3 }));
    assert!(problems.iter().any(|p| matches!(p, MatrixProblem::InvalidUrl { row: 4, .. })));
    let row_two = problems
      .iter()
      .filter(|p| matches!(p, MatrixProblem::InvalidField { row: 2, .. }))
      .count();
    assert_eq!(row_two, 2, "platform and arch are both reported: {problems:?}");
    assert!(problems.iter().any(|p| matches!(p, MatrixProblem::InvalidField { row: 1, .. })));
  }

  #[test]
  fn rejects_duplicate_keys_across_patch_versions() {
    let doc = r#"{ "targets": [
      { "database": "mongodb", "version": "8.0.4", "platform": "macos", "arch": "arm64", "url": "https://x/a.tgz" },
      { "database": "mongodb", "version": "8.0.5", "platform": "macos", "arch": "arm64", "url": "https://x/b.tgz" }
    ] }"#;
    let problems = problems_of(doc);
    assert!(matches!(
      problems.as_slice(),
      [MatrixProblem::DuplicateKey { row: 2, first_row: 1, .. }]
    ));
  }

  #[test]
  fn rejects_empty_matrix() {
    assert_eq!(problems_of(r#"{ "targets": [] }"#), vec![MatrixProblem::Empty]);
  }

  #[test]
  fn rejects_unknown_placeholder() {
    let doc = r#"{ "targets": [
      { "database": "redis", "version": "7.4.0", "platform": "linux", "arch": "arm64", "url": "https://x/{distro}.tgz" }
    ] }"#;
    assert!(matches!(
      problems_of(doc).as_slice(),
      [MatrixProblem::InvalidUrl { row: 1, .. }]
    ));
  }

  #[test]
  fn rejects_malformed_sha256() {
    let doc = r#"{ "targets": [
      { "database": "redis", "version": "7.4.0", "platform": "linux", "arch": "arm64",
        "url": "https://x/r.tgz", "sha256": "ABC" }
    ] }"#;
    assert_eq!(problems_of(doc), vec![MatrixProblem::InvalidSha256 { row: 1 }]);
  }

  #[test]
  fn retain_database_filters_rows() {
    let mut matrix = Matrix::builtin().unwrap();
    matrix.retain_database(Database::Redis);
    assert!(matrix.entries().iter().all(|e| e.target.database() == Database::Redis));
  }
}
