//! Implementation of the `dbbundle postgres` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use dbbundle_lib::pipeline::{PostgresOptions, PostgresPipeline};
use dbbundle_lib::{Arch, Platform};

use super::{open_store, runtime};
use crate::output::{format_bytes, print_info, print_stat, print_success, symbols};

pub struct PostgresCommand {
  pub arch: Arch,
  pub version: String,
  pub source_url: String,
  pub credentials: Option<PathBuf>,
  pub output_dir: Option<PathBuf>,
  pub work_dir: Option<PathBuf>,
  pub jobs: usize,
}

/// Build one PostgreSQL bundle for the host OS and upload it.
///
/// The target and the storage credentials are validated before anything is
/// downloaded.
pub fn cmd_postgres(command: PostgresCommand) -> Result<()> {
  let host = Platform::current().context("Unsupported host platform")?;

  let mut options = PostgresOptions::new(command.arch);
  options.version = command.version;
  options.source_base_url = command.source_url;
  options.work_dir = command.work_dir;
  options.jobs = command.jobs;

  let client = reqwest::Client::new();
  let pipeline = PostgresPipeline::new(options, host, client)?;
  let store = open_store(command.output_dir.as_deref(), command.credentials.as_deref())?;

  print_info(&format!(
    "Building {} {} {}",
    pipeline.target(),
    symbols::ARROW,
    pipeline.storage_key()
  ));

  let rt = runtime()?;
  let report = rt.block_on(pipeline.run(&store))?;

  print_success(&format!("Published {}", report.receipt.key));
  print_stat("Location", &report.receipt.location);
  print_stat("Size", &format_bytes(report.archive.size));
  print_stat("Binaries", &report.fixup.binaries.to_string());
  print_stat("Edited", &report.fixup.edited.to_string());
  print_stat("Bundled libraries", &report.fixup.bundled_libraries.len().to_string());
  print_stat("Stripped", &report.stripped.to_string());

  Ok(())
}
