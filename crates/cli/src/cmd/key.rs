use anyhow::{Context, Result};

use dbbundle_lib::{Arch, BuildTarget, Database, Os, Platform};

/// Print the storage key a target is uploaded under.
pub fn cmd_key(database: Database, version: &str, os: Os, arch: Arch) -> Result<()> {
  let target = BuildTarget::new(database, version, Platform::new(os, arch)).context("Invalid target")?;
  println!("{}", target.storage_key());
  Ok(())
}
