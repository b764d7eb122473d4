//! Mach-O editing through `otool`, `install_name_tool` and `codesign`.

use std::ffi::OsStr;
use std::path::Path;

use crate::exec::{ToolError, run_tool};

use super::editor::LinkEditor;

#[derive(Debug, Clone)]
pub struct MachoEditor {
  strip_program: String,
}

impl MachoEditor {
  pub fn new(strip_program: impl Into<String>) -> Self {
    Self {
      strip_program: strip_program.into(),
    }
  }
}

impl LinkEditor for MachoEditor {
  async fn dependencies(&self, binary: &Path) -> Result<Vec<String>, ToolError> {
    let listing = run_tool("otool", [OsStr::new("-L"), binary.as_os_str()]).await?;
    let id = self.install_name(binary).await?;
    Ok(
      parse_load_commands(&listing)
        .into_iter()
        .filter(|dep| Some(dep) != id.as_ref())
        .collect(),
    )
  }

  async fn search_paths(&self, binary: &Path) -> Result<Vec<String>, ToolError> {
    let commands = run_tool("otool", [OsStr::new("-l"), binary.as_os_str()]).await?;
    Ok(parse_rpaths(&commands))
  }

  async fn install_name(&self, binary: &Path) -> Result<Option<String>, ToolError> {
    let output = run_tool("otool", [OsStr::new("-D"), binary.as_os_str()]).await?;
    Ok(parse_install_name(&output))
  }

  async fn change_dependency(&self, binary: &Path, old: &str, new: &str) -> Result<(), ToolError> {
    run_tool(
      "install_name_tool",
      [OsStr::new("-change"), OsStr::new(old), OsStr::new(new), binary.as_os_str()],
    )
    .await
    .map(|_| ())
  }

  async fn set_search_paths(&self, binary: &Path, paths: &[String]) -> Result<(), ToolError> {
    let existing = self.search_paths(binary).await?;
    let mut args: Vec<&OsStr> = Vec::new();
    for old in existing.iter().filter(|p| !paths.contains(p)) {
      args.extend([OsStr::new("-delete_rpath"), OsStr::new(old.as_str())]);
    }
    for new in paths.iter().filter(|p| !existing.contains(p)) {
      args.extend([OsStr::new("-add_rpath"), OsStr::new(new.as_str())]);
    }
    if args.is_empty() {
      return Ok(());
    }
    args.push(binary.as_os_str());
    run_tool("install_name_tool", args).await.map(|_| ())
  }

  async fn set_install_name(&self, binary: &Path, name: &str) -> Result<(), ToolError> {
    run_tool(
      "install_name_tool",
      [OsStr::new("-id"), OsStr::new(name), binary.as_os_str()],
    )
    .await
    .map(|_| ())
  }

  async fn strip_debug(&self, binary: &Path) -> Result<(), ToolError> {
    run_tool(&self.strip_program, [OsStr::new("-S"), binary.as_os_str()])
      .await
      .map(|_| ())
  }

  /// Editing load commands invalidates the code signature; arm64 refuses to
  /// load unsigned code, so re-sign ad hoc.
  async fn finalize(&self, binary: &Path) -> Result<(), ToolError> {
    run_tool(
      "codesign",
      [
        OsStr::new("--force"),
        OsStr::new("--sign"),
        OsStr::new("-"),
        binary.as_os_str(),
      ],
    )
    .await
    .map(|_| ())
  }
}

/// Library paths from `otool -L` output.
///
/// Header lines (the file name, or `(architecture ...)` for universal
/// binaries) end with a colon; every other line is
/// `<path> (compatibility version ..., current version ...)`.
pub(crate) fn parse_load_commands(output: &str) -> Vec<String> {
  let mut libraries: Vec<String> = Vec::new();
  for line in output.lines() {
    let line = line.trim();
    if line.is_empty() || line.ends_with(':') {
      continue;
    }
    let path = match line.rfind(" (") {
      Some(idx) => &line[..idx],
      None => line,
    };
    if !libraries.iter().any(|l| l == path) {
      libraries.push(path.to_string());
    }
  }
  libraries
}

/// The install name from `otool -D` output, absent for executables.
pub(crate) fn parse_install_name(output: &str) -> Option<String> {
  output
    .lines()
    .map(str::trim)
    .filter(|l| !l.is_empty() && !l.ends_with(':'))
    .next_back()
    .map(str::to_string)
}

/// `LC_RPATH` entries from `otool -l` output:
///
/// ```text
/// Load command 12
///           cmd LC_RPATH
///       cmdsize 32
///          path @loader_path/../lib (offset 12)
/// ```
pub(crate) fn parse_rpaths(output: &str) -> Vec<String> {
  let mut rpaths = Vec::new();
  let mut in_rpath = false;
  for line in output.lines() {
    let line = line.trim();
    if let Some(cmd) = line.strip_prefix("cmd ") {
      in_rpath = cmd.trim() == "LC_RPATH";
      continue;
    }
    if !in_rpath {
      continue;
    }
    if let Some(rest) = line.strip_prefix("path ") {
      let path = match rest.rfind(" (offset") {
        Some(idx) => &rest[..idx],
        None => rest,
      };
      rpaths.push(path.trim().to_string());
      in_rpath = false;
    }
  }
  rpaths
}

#[cfg(test)]
mod tests {
  use super::*;

  const OTOOL_L: &str = "/b/lib/libpq.5.dylib:
\t/b/lib/libpq.5.dylib (compatibility version 5.0.0, current version 5.17.0)
\t/usr/lib/libSystem.B.dylib (compatibility version 1.0.0, current version 1345.100.2)
";

  const OTOOL_L_UNIVERSAL: &str = "/b/bin/psql (architecture x86_64):
\t/work/install/lib/libpq.5.dylib (compatibility version 5.0.0, current version 5.17.0)
\t/usr/lib/libSystem.B.dylib (compatibility version 1.0.0, current version 1345.100.2)
/b/bin/psql (architecture arm64):
\t/work/install/lib/libpq.5.dylib (compatibility version 5.0.0, current version 5.17.0)
\t/usr/lib/libSystem.B.dylib (compatibility version 1.0.0, current version 1345.100.2)
";

  const OTOOL_LOAD_COMMANDS: &str = "/b/bin/psql:
Load command 11
          cmd LC_LOAD_DYLIB
      cmdsize 56
         name /usr/lib/libSystem.B.dylib (offset 24)
Load command 12
          cmd LC_RPATH
      cmdsize 48
         path /work/install/lib (offset 12)
Load command 13
          cmd LC_RPATH
      cmdsize 32
         path @loader_path/../lib (offset 12)
Load command 14
          cmd LC_FUNCTION_STARTS
      cmdsize 16
      dataoff 49152
";

  #[test]
  fn parses_library_listing() {
    assert_eq!(
      parse_load_commands(OTOOL_L),
      vec!["/b/lib/libpq.5.dylib", "/usr/lib/libSystem.B.dylib"]
    );
  }

  #[test]
  fn universal_listing_is_deduplicated() {
    assert_eq!(
      parse_load_commands(OTOOL_L_UNIVERSAL),
      vec!["/work/install/lib/libpq.5.dylib", "/usr/lib/libSystem.B.dylib"]
    );
  }

  #[test]
  fn parses_install_name() {
    assert_eq!(
      parse_install_name("/b/lib/libpq.5.dylib:\n/work/install/lib/libpq.5.dylib"),
      Some("/work/install/lib/libpq.5.dylib".to_string())
    );
    assert_eq!(parse_install_name("/b/bin/psql:"), None);
  }

  #[test]
  fn parses_only_rpath_commands() {
    assert_eq!(
      parse_rpaths(OTOOL_LOAD_COMMANDS),
      vec!["/work/install/lib", "@loader_path/../lib"]
    );
    assert!(parse_rpaths("/b/bin/psql:\nLoad command 0\n      cmd LC_SEGMENT_64\n").is_empty());
  }
}
