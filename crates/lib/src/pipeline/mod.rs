//! The two packaging pipelines and what they share.
//!
//! Both pipelines are a fixed sequence of [`Step`]s. Any step error is
//! wrapped in a [`PipelineError`] that names the step, and the pipeline stops
//! there.

pub mod matrix;
pub mod postgres;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::TempDir;
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::compile::CompileError;
use crate::consts::APP_NAME;
use crate::fetch::FetchError;
use crate::fixup::FixupError;
use crate::target::TargetError;
use crate::upload::UploadError;

pub use matrix::{MatrixOptions, MatrixReport, RowOutcome, RowStatus, run_matrix};
pub use postgres::{PostgresOptions, PostgresPipeline, PostgresReport};

/// One stage of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
  Prepare,
  Fetch,
  Unpack,
  VerifyVersion,
  Compile,
  Fixup,
  Verify,
  Strip,
  Archive,
  Upload,
}

impl Step {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Prepare => "prepare",
      Self::Fetch => "fetch",
      Self::Unpack => "unpack",
      Self::VerifyVersion => "version check",
      Self::Compile => "compile",
      Self::Fixup => "fixup",
      Self::Verify => "portability check",
      Self::Strip => "strip",
      Self::Archive => "archive",
      Self::Upload => "upload",
    }
  }
}

impl fmt::Display for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The error a step failed with.
#[derive(Debug, Error)]
pub enum StepError {
  #[error(transparent)]
  Target(#[from] TargetError),
  #[error(transparent)]
  Fetch(#[from] FetchError),
  #[error(transparent)]
  Compile(#[from] CompileError),
  #[error(transparent)]
  Fixup(#[from] FixupError),
  #[error(transparent)]
  Archive(#[from] ArchiveError),
  #[error(transparent)]
  Upload(#[from] UploadError),
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
#[error("{step} failed")]
pub struct PipelineError {
  pub step: Step,
  #[source]
  pub source: StepError,
}

/// Attach the failing step to a step's result.
pub(crate) trait AtStep<T> {
  fn at(self, step: Step) -> Result<T, PipelineError>;
}

impl<T, E: Into<StepError>> AtStep<T> for Result<T, E> {
  fn at(self, step: Step) -> Result<T, PipelineError> {
    self.map_err(|e| PipelineError {
      step,
      source: e.into(),
    })
  }
}

/// Scratch space for a run: a caller-chosen directory that is kept, or a
/// temporary one removed on drop.
#[derive(Debug)]
pub enum WorkDir {
  Kept(PathBuf),
  Temp(TempDir),
}

impl WorkDir {
  pub fn create(requested: Option<&Path>) -> std::io::Result<Self> {
    match requested {
      Some(dir) => {
        std::fs::create_dir_all(dir)?;
        Ok(Self::Kept(dunce::canonicalize(dir)?))
      }
      None => Ok(Self::Temp(
        tempfile::Builder::new().prefix(&format!("{APP_NAME}-")).tempdir()?,
      )),
    }
  }

  pub fn path(&self) -> &Path {
    match self {
      Self::Kept(path) => path,
      Self::Temp(dir) => dir.path(),
    }
  }

  /// A fresh, empty subdirectory.
  pub fn fresh_subdir(&self, name: &str) -> std::io::Result<PathBuf> {
    let dir = self.path().join(name);
    if dir.exists() {
      std::fs::remove_dir_all(&dir)?;
    }
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
  }
}
