mod info;
mod key;
mod matrix;
mod postgres;

pub use info::cmd_info;
pub use key::cmd_key;
pub use matrix::{MatrixCommand, cmd_matrix};
pub use postgres::{PostgresCommand, cmd_postgres};

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use dbbundle_lib::config::Credentials;
use dbbundle_lib::upload::{ObjectStore, Store};

/// Pick where archives go. Credentials are loaded and validated here, before
/// any network activity; a local output directory needs none.
fn open_store(output_dir: Option<&Path>, credentials_file: Option<&Path>) -> Result<Store> {
  let credentials = match (output_dir, credentials_file) {
    (Some(_), _) => None,
    (None, Some(path)) => {
      Some(Credentials::from_file(path).with_context(|| format!("Failed to load credentials from {}", path.display()))?)
    }
    (None, None) => Some(Credentials::from_env().context("Failed to load credentials from the environment")?),
  };

  let store = Store::select(output_dir, credentials.as_ref()).context("No output directory or credentials given")?;
  debug!(store = %store.describe(), "selected object store");
  Ok(store)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}
