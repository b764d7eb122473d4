//! ELF editing through `readelf` and `patchelf`.

use std::ffi::OsStr;
use std::path::Path;

use crate::exec::{ToolError, run_tool};

use super::editor::LinkEditor;

#[derive(Debug, Clone)]
pub struct ElfEditor {
  strip_program: String,
}

impl ElfEditor {
  pub fn new(strip_program: impl Into<String>) -> Self {
    Self {
      strip_program: strip_program.into(),
    }
  }

  async fn dynamic_section(&self, binary: &Path) -> Result<String, ToolError> {
    run_tool("readelf", [OsStr::new("-d"), binary.as_os_str()]).await
  }
}

impl LinkEditor for ElfEditor {
  async fn dependencies(&self, binary: &Path) -> Result<Vec<String>, ToolError> {
    Ok(parse_needed(&self.dynamic_section(binary).await?))
  }

  async fn search_paths(&self, binary: &Path) -> Result<Vec<String>, ToolError> {
    Ok(parse_search_paths(&self.dynamic_section(binary).await?))
  }

  async fn install_name(&self, _binary: &Path) -> Result<Option<String>, ToolError> {
    Ok(None)
  }

  async fn change_dependency(&self, binary: &Path, old: &str, new: &str) -> Result<(), ToolError> {
    run_tool(
      "patchelf",
      [OsStr::new("--replace-needed"), OsStr::new(old), OsStr::new(new), binary.as_os_str()],
    )
    .await
    .map(|_| ())
  }

  async fn set_search_paths(&self, binary: &Path, paths: &[String]) -> Result<(), ToolError> {
    if paths.is_empty() {
      return run_tool("patchelf", [OsStr::new("--remove-rpath"), binary.as_os_str()])
        .await
        .map(|_| ());
    }
    let joined = paths.join(":");
    run_tool(
      "patchelf",
      [OsStr::new("--set-rpath"), OsStr::new(&joined), binary.as_os_str()],
    )
    .await
    .map(|_| ())
  }

  async fn set_install_name(&self, _binary: &Path, _name: &str) -> Result<(), ToolError> {
    Ok(())
  }

  async fn strip_debug(&self, binary: &Path) -> Result<(), ToolError> {
    run_tool(&self.strip_program, [OsStr::new("--strip-debug"), binary.as_os_str()])
      .await
      .map(|_| ())
  }

  async fn finalize(&self, _binary: &Path) -> Result<(), ToolError> {
    Ok(())
  }
}

/// Bracketed value of a `readelf -d` row, e.g. `[libpq.so.5]`.
fn bracketed(line: &str) -> Option<&str> {
  let start = line.find('[')?;
  let end = line.rfind(']')?;
  (end > start).then(|| &line[start + 1..end])
}

/// `DT_NEEDED` entries in order.
pub(crate) fn parse_needed(output: &str) -> Vec<String> {
  output
    .lines()
    .filter(|l| l.contains("(NEEDED)"))
    .filter_map(bracketed)
    .map(str::to_string)
    .collect()
}

/// `DT_RUNPATH` entries, falling back to `DT_RPATH`. The loader ignores
/// `DT_RPATH` when `DT_RUNPATH` is present.
pub(crate) fn parse_search_paths(output: &str) -> Vec<String> {
  let find = |tag: &str| {
    output
      .lines()
      .find(|l| l.contains(tag))
      .and_then(bracketed)
      .map(|value| {
        value
          .split(':')
          .filter(|p| !p.is_empty())
          .map(str::to_string)
          .collect::<Vec<_>>()
      })
  };
  find("(RUNPATH)").or_else(|| find("(RPATH)")).unwrap_or_default()
}
