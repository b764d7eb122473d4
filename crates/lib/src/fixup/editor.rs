use std::path::Path;

use crate::exec::ToolError;
use crate::platform::Os;

use super::elf::ElfEditor;
use super::macho::MachoEditor;

/// Reads and edits the dynamic-linking records of one binary format.
///
/// Entries are returned exactly as recorded in the binary, so they can be
/// passed back unchanged when rewriting.
#[allow(async_fn_in_trait)]
pub trait LinkEditor {
  /// Shared libraries the binary records as direct dependencies.
  async fn dependencies(&self, binary: &Path) -> Result<Vec<String>, ToolError>;

  /// Runtime search paths (`LC_RPATH`, `DT_RUNPATH`/`DT_RPATH`).
  async fn search_paths(&self, binary: &Path) -> Result<Vec<String>, ToolError>;

  /// The library's own install name, for formats that record one.
  async fn install_name(&self, binary: &Path) -> Result<Option<String>, ToolError>;

  async fn change_dependency(&self, binary: &Path, old: &str, new: &str) -> Result<(), ToolError>;

  /// Replace the binary's search paths with `paths`.
  async fn set_search_paths(&self, binary: &Path, paths: &[String]) -> Result<(), ToolError>;

  async fn set_install_name(&self, binary: &Path, name: &str) -> Result<(), ToolError>;

  async fn strip_debug(&self, binary: &Path) -> Result<(), ToolError>;

  /// Called once after a binary has been edited.
  async fn finalize(&self, binary: &Path) -> Result<(), ToolError>;
}

/// The editor for the platform a bundle is built for.
#[derive(Debug, Clone)]
pub enum PlatformEditor {
  Macho(MachoEditor),
  Elf(ElfEditor),
}

impl PlatformEditor {
  pub fn for_os(os: Os, strip_program: impl Into<String>) -> Self {
    match os {
      Os::MacOs => Self::Macho(MachoEditor::new(strip_program)),
      Os::Linux => Self::Elf(ElfEditor::new(strip_program)),
    }
  }
}

impl LinkEditor for PlatformEditor {
  async fn dependencies(&self, binary: &Path) -> Result<Vec<String>, ToolError> {
    match self {
      Self::Macho(e) => e.dependencies(binary).await,
      Self::Elf(e) => e.dependencies(binary).await,
    }
  }

  async fn search_paths(&self, binary: &Path) -> Result<Vec<String>, ToolError> {
    match self {
      Self::Macho(e) => e.search_paths(binary).await,
      Self::Elf(e) => e.search_paths(binary).await,
    }
  }

  async fn install_name(&self, binary: &Path) -> Result<Option<String>, ToolError> {
    match self {
      Self::Macho(e) => e.install_name(binary).await,
      Self::Elf(e) => e.install_name(binary).await,
    }
  }

  async fn change_dependency(&self, binary: &Path, old: &str, new: &str) -> Result<(), ToolError> {
    match self {
      Self::Macho(e) => e.change_dependency(binary, old, new).await,
      Self::Elf(e) => e.change_dependency(binary, old, new).await,
    }
  }

  async fn set_search_paths(&self, binary: &Path, paths: &[String]) -> Result<(), ToolError> {
    match self {
      Self::Macho(e) => e.set_search_paths(binary, paths).await,
      Self::Elf(e) => e.set_search_paths(binary, paths).await,
    }
  }

  async fn set_install_name(&self, binary: &Path, name: &str) -> Result<(), ToolError> {
    match self {
      Self::Macho(e) => e.set_install_name(binary, name).await,
      Self::Elf(e) => e.set_install_name(binary, name).await,
    }
  }

  async fn strip_debug(&self, binary: &Path) -> Result<(), ToolError> {
    match self {
      Self::Macho(e) => e.strip_debug(binary).await,
      Self::Elf(e) => e.strip_debug(binary).await,
    }
  }

  async fn finalize(&self, binary: &Path) -> Result<(), ToolError> {
    match self {
      Self::Macho(e) => e.finalize(binary).await,
      Self::Elf(e) => e.finalize(binary).await,
    }
  }
}
