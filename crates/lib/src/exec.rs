//! External tool invocation.
//!
//! Every binary-inspection and editing step shells out to the platform's own
//! tools (`otool`, `install_name_tool`, `readelf`, `patchelf`, `strip`). This
//! module runs them and turns a non-zero exit into a [`ToolError`].

use std::ffi::OsStr;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::consts::SOURCE_DATE_EPOCH;

#[derive(Debug, Error)]
pub enum ToolError {
  #[error("failed to start {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("{program} exited with code {code:?}: {stderr}")]
  Failed {
    program: String,
    code: Option<i32>,
    stderr: String,
  },
}

/// Run a tool to completion and return its stdout.
///
/// The tool inherits the caller's environment, with `LC_ALL=C` so output
/// parsing is locale independent and `SOURCE_DATE_EPOCH` set for tools that
/// embed timestamps.
pub async fn run_tool<I, S>(program: &str, args: I) -> Result<String, ToolError>
where
  I: IntoIterator<Item = S>,
  S: AsRef<OsStr>,
{
  let mut command = Command::new(program);
  command
    .args(args)
    .env("LC_ALL", "C")
    .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH)
    .kill_on_drop(true);

  debug!(program = %program, command = ?command.as_std(), "spawning tool");

  let output = command.output().await.map_err(|source| ToolError::Spawn {
    program: program.to_string(),
    source,
  })?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "tool stdout");
    }

    return Err(ToolError::Failed {
      program: program.to_string(),
      code: output.status.code(),
      stderr,
    });
  }

  let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
  Ok(stdout)
}
