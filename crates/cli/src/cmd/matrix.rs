//! Implementation of the `dbbundle matrix` command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use dbbundle_lib::Database;
use dbbundle_lib::config::Matrix;
use dbbundle_lib::pipeline::{MatrixOptions, MatrixReport, run_matrix};

use super::{open_store, runtime};
use crate::output::{OutputFormat, print_failure, print_info, print_json, print_success, row_summary, symbols};

pub struct MatrixCommand {
  pub matrix: Option<PathBuf>,
  pub database: Option<Database>,
  pub credentials: Option<PathBuf>,
  pub output_dir: Option<PathBuf>,
  pub work_dir: Option<PathBuf>,
  pub jobs: usize,
  pub check: bool,
  pub format: OutputFormat,
}

pub fn cmd_matrix(command: MatrixCommand) -> Result<()> {
  let mut matrix = match &command.matrix {
    Some(path) => Matrix::from_file(path)?,
    None => Matrix::builtin().context("Built-in matrix is invalid")?,
  };
  if let Some(database) = command.database {
    matrix.retain_database(database);
  }

  if command.check {
    return print_plan(&matrix, command.format);
  }

  if matrix.is_empty() {
    bail!("No matrix rows to process");
  }

  let store = open_store(command.output_dir.as_deref(), command.credentials.as_deref())?;
  let options = MatrixOptions {
    jobs: command.jobs,
    work_dir: command.work_dir,
  };

  let rt = runtime()?;
  let report = rt.block_on(run_matrix(
    matrix.into_entries(),
    Arc::new(store),
    reqwest::Client::new(),
    &options,
  ))?;

  if command.format.is_json() {
    print_json(&report)?;
  } else {
    print_report(&report);
  }

  let failed = report.failed().count();
  if failed > 0 {
    bail!("{} of {} matrix rows failed", failed, report.rows.len());
  }
  Ok(())
}

fn print_plan(matrix: &Matrix, format: OutputFormat) -> Result<()> {
  if format.is_json() {
    let rows: Vec<_> = matrix
      .entries()
      .iter()
      .map(|entry| {
        serde_json::json!({
          "key": entry.storage_key(),
          "target": entry.target.to_string(),
          "url": entry.url,
          "sha256": entry.sha256,
        })
      })
      .collect();
    return print_json(&serde_json::json!({ "rows": rows }));
  }

  print_success(&format!("Matrix is valid ({} rows)", matrix.len()));
  for entry in matrix.entries() {
    println!("  {} {} {}", entry.storage_key(), symbols::ARROW, entry.url);
  }
  Ok(())
}

fn print_report(report: &MatrixReport) {
  println!();
  for row in &report.rows {
    if row.is_success() {
      print_success(&row_summary(row));
    } else {
      print_failure(&row_summary(row));
    }
  }
  println!();
  print_info(&format!(
    "{} uploaded, {} failed",
    report.succeeded().count(),
    report.failed().count()
  ));
}
