//! Run configuration: object storage credentials and the packaging matrix.
//!
//! Both are loaded once at process start and validated completely before any
//! network activity begins.

pub mod credentials;
pub mod matrix;

use std::path::PathBuf;

use thiserror::Error;

pub use credentials::Credentials;
pub use matrix::{Matrix, MatrixEntry, MatrixProblem};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("missing credential field '{field}' (set it in the credentials file or {env_var})")]
  MissingField { field: &'static str, env_var: String },

  #[error("invalid storage endpoint '{endpoint}': {message}")]
  InvalidEndpoint { endpoint: String, message: String },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {origin}: {source}")]
  Parse {
    origin: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid matrix:\n{}", format_problems(.0))]
  InvalidMatrix(Vec<MatrixProblem>),
}

fn format_problems(problems: &[MatrixProblem]) -> String {
  problems
    .iter()
    .map(|p| format!("  - {p}"))
    .collect::<Vec<_>>()
    .join("\n")
}
