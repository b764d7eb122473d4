//! Portability fixup: make an installed tree runnable from any directory.
//!
//! Every executable and shared library in a bundle is inspected through a
//! [`LinkEditor`]. Dependencies that live in the build tree but outside the
//! bundle are copied into the bundle's `lib/` directory, and every load path
//! is rewritten relative to the referencing binary:
//!
//! - macOS: each dependency entry becomes `@loader_path/<rel>/<name>` and
//!   library install names become `@loader_path/<name>`. Edited binaries are
//!   re-signed.
//! - Linux: the search path becomes `$ORIGIN/<rel>` for every directory a
//!   dependency was found in, `lib/` first.
//!
//! [`verify_portable`] then rejects the bundle if any binary still mentions
//! the build tree or a non-system absolute path. Running [`make_portable`]
//! on an already-portable bundle edits nothing.

mod editor;
mod elf;
mod macho;
mod policy;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::consts::BUNDLE_LIB_DIR;
use crate::exec::ToolError;
use crate::platform::Os;
use crate::util::hash::hash_file;

pub use editor::{LinkEditor, PlatformEditor};
pub use elf::ElfEditor;
pub use macho::MachoEditor;
pub use policy::{RelocationPolicy, relative_path};

#[derive(Debug, Error)]
pub enum FixupError {
  #[error(transparent)]
  Tool(#[from] ToolError),

  #[error("io error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to walk bundle: {0}")]
  Walk(String),

  #[error("cannot bundle {source_path}: {dest} already holds a different library")]
  LibraryConflict { source_path: PathBuf, dest: PathBuf },

  #[error("bundle references paths that only exist on the build machine:\n{}", format_violations(.violations))]
  NonPortablePath { violations: Vec<Violation> },
}

fn io_at(path: &Path) -> impl FnOnce(io::Error) -> FixupError + use<> {
  let path = path.to_path_buf();
  move |source| FixupError::Io { path, source }
}

fn format_violations(violations: &[Violation]) -> String {
  violations
    .iter()
    .map(|v| format!("  {v}"))
    .collect::<Vec<_>>()
    .join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
  Dependency,
  SearchPath,
  InstallName,
  Symlink,
}

impl fmt::Display for ViolationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Dependency => "dependency",
      Self::SearchPath => "search path",
      Self::InstallName => "install name",
      Self::Symlink => "symlink",
    };
    f.write_str(s)
  }
}

/// A non-portable reference found during verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
  /// Path of the offending file, relative to the bundle root.
  pub file: PathBuf,
  pub kind: ViolationKind,
  pub entry: String,
}

impl fmt::Display for Violation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {} {}", self.file.display(), self.kind, self.entry)
  }
}

/// Summary of a [`make_portable`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixupReport {
  /// Binaries inspected, including libraries copied in during the run.
  pub binaries: usize,
  /// Binaries whose records were changed.
  pub edited: usize,
  /// Libraries copied into the bundle, relative to its root.
  pub bundled_libraries: Vec<PathBuf>,
}

/// An installed tree that is to be shipped as one relocatable unit.
#[derive(Debug, Clone)]
pub struct Bundle {
  root: PathBuf,
}

impl Bundle {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn lib_dir(&self) -> PathBuf {
    self.root.join(BUNDLE_LIB_DIR)
  }

  /// Every regular file in the bundle whose header marks it as a binary for
  /// `policy`'s platform, in path order. Symlinks are not followed.
  pub fn binaries(&self, policy: RelocationPolicy) -> Result<Vec<PathBuf>, FixupError> {
    let mut binaries = Vec::new();
    for entry in WalkDir::new(&self.root).sort_by_file_name() {
      let entry = entry.map_err(|e| FixupError::Walk(e.to_string()))?;
      if !entry.file_type().is_file() {
        continue;
      }
      if is_binary_file(entry.path(), policy)? {
        binaries.push(entry.into_path());
      }
    }
    Ok(binaries)
  }
}

fn is_binary_file(path: &Path, policy: RelocationPolicy) -> Result<bool, FixupError> {
  let mut header = Vec::with_capacity(4);
  File::open(path)
    .and_then(|f| f.take(4).read_to_end(&mut header))
    .map_err(io_at(path))?;
  Ok(policy.is_binary(&header))
}

#[cfg(unix)]
fn ensure_writable(path: &Path) -> Result<(), FixupError> {
  use std::os::unix::fs::PermissionsExt;
  let mut perms = fs::metadata(path).map_err(io_at(path))?.permissions();
  if perms.mode() & 0o200 == 0 {
    perms.set_mode(perms.mode() | 0o200);
    fs::set_permissions(path, perms).map_err(io_at(path))?;
  }
  Ok(())
}

#[cfg(not(unix))]
fn ensure_writable(_path: &Path) -> Result<(), FixupError> {
  Ok(())
}

/// The build root as written by the toolchain and in canonical form; on
/// macOS temporary directories differ between the two (`/var` vs `/private/var`).
fn build_root_forms(build_root: &Path) -> Vec<PathBuf> {
  let mut forms = vec![build_root.to_path_buf()];
  if let Ok(canonical) = dunce::canonicalize(build_root)
    && canonical != build_root
  {
    forms.push(canonical);
  }
  forms
}

fn is_portable(policy: RelocationPolicy, entry: &str, build_roots: &[PathBuf]) -> bool {
  build_roots.iter().all(|root| policy.is_portable_entry(entry, root))
}

/// Expand a token-relative or absolute entry to a path on disk.
fn expand(entry: &str, origin: &Path, policy: RelocationPolicy) -> Option<PathBuf> {
  if let Some(rest) = entry.strip_prefix(policy.token()) {
    return Some(origin.join(rest.trim_start_matches('/')));
  }
  entry.starts_with('/').then(|| PathBuf::from(entry))
}

/// Locate the file a dependency entry refers to, the way the dynamic linker
/// would: absolute and token-relative entries directly, `@rpath/` entries and
/// bare sonames through the binary's search paths and then the bundle's lib/.
fn resolve_dependency(
  entry: &str,
  binary: &Path,
  search_paths: &[String],
  lib_dir: &Path,
  policy: RelocationPolicy,
) -> Option<PathBuf> {
  let origin = binary.parent()?;
  if entry.starts_with('/') || entry.starts_with(policy.token()) {
    return expand(entry, origin, policy).filter(|p| p.exists());
  }

  let name = match entry.strip_prefix("@rpath/") {
    Some(name) => name,
    None if entry.contains('/') => return None,
    None => entry,
  };

  search_paths
    .iter()
    .filter_map(|p| expand(p, origin, policy))
    .chain(std::iter::once(lib_dir.to_path_buf()))
    .map(|dir| dir.join(name))
    .find(|candidate| candidate.exists())
}

fn file_name_of(entry: &str) -> &str {
  entry.rsplit('/').next().unwrap_or(entry)
}

/// Rewrite every binary in `bundle` so it loads its libraries relative to its
/// own location, copying libraries from elsewhere in `build_root` into the
/// bundle's lib/ directory.
///
/// Dependencies outside `build_root` that are not part of the bundle (system
/// libraries, or anything else on the build host) are left as they are;
/// [`verify_portable`] decides whether they are acceptable.
pub async fn make_portable<E: LinkEditor>(
  bundle: &Bundle,
  build_root: &Path,
  policy: RelocationPolicy,
  editor: &E,
) -> Result<FixupReport, FixupError> {
  let root = dunce::canonicalize(bundle.root()).map_err(io_at(bundle.root()))?;
  let build_root = dunce::canonicalize(build_root).map_err(io_at(build_root))?;
  let lib_dir = root.join(BUNDLE_LIB_DIR);
  fs::create_dir_all(&lib_dir).map_err(io_at(&lib_dir))?;

  let mut queue: VecDeque<PathBuf> = Bundle::new(&root).binaries(policy)?.into();
  let mut seen: HashSet<PathBuf> = queue.iter().cloned().collect();
  // Canonical source path -> copy inside lib/.
  let mut bundled: HashMap<PathBuf, PathBuf> = HashMap::new();
  let mut report = FixupReport::default();
  let build_roots = [build_root.clone()];

  info!(bundle = ?root, binaries = queue.len(), os = %policy.os(), "making bundle portable");

  while let Some(binary) = queue.pop_front() {
    report.binaries += 1;
    let origin = binary.parent().unwrap_or(&root).to_path_buf();
    let dependencies = editor.dependencies(&binary).await?;
    let search_paths = editor.search_paths(&binary).await?;

    let mut edited = false;
    let mut library_dirs: Vec<PathBuf> = vec![lib_dir.clone()];

    for dep in &dependencies {
      let Some(resolved) = resolve_dependency(dep, &binary, &search_paths, &lib_dir, policy) else {
        debug!(binary = ?binary, dependency = %dep, "dependency not resolved in build tree, leaving as is");
        continue;
      };
      let real = dunce::canonicalize(&resolved).map_err(io_at(&resolved))?;

      let target = if real.starts_with(&root) {
        let parent = resolved.parent().unwrap_or(&root);
        let parent = dunce::canonicalize(parent).map_err(io_at(parent))?;
        parent.join(file_name_of(dep))
      } else if real.starts_with(&build_root) {
        match bundled.get(&real) {
          Some(dest) => dest.clone(),
          None => {
            let dest = lib_dir.join(file_name_of(dep));
            copy_into_bundle(&real, &dest)?;
            if seen.insert(dest.clone()) {
              report
                .bundled_libraries
                .push(dest.strip_prefix(&root).unwrap_or(&dest).to_path_buf());
              queue.push_back(dest.clone());
            }
            bundled.insert(real, dest.clone());
            dest
          }
        }
      } else {
        continue;
      };

      let target_dir = target.parent().unwrap_or(&lib_dir).to_path_buf();
      let rel_dir = relative_path(&origin, &target_dir);
      // A library reached under an alias is referenced by the name its copy
      // was given in lib/.
      let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name_of(dep).to_string());

      if policy.rewrites_dependency_entries() {
        let new = format!("{}/{}", policy.relative_reference(&rel_dir), name);
        if &new != dep {
          ensure_writable(&binary)?;
          editor.change_dependency(&binary, dep, &new).await?;
          debug!(binary = ?binary, from = %dep, to = %new, "rewrote dependency");
          edited = true;
        }
      } else {
        if dep != &name {
          ensure_writable(&binary)?;
          editor.change_dependency(&binary, dep, &name).await?;
          debug!(binary = ?binary, from = %dep, to = %name, "rewrote dependency");
          edited = true;
        }
        if !library_dirs.contains(&target_dir) {
          library_dirs.push(target_dir);
        }
      }
    }

    let mut desired: Vec<String> = Vec::new();
    // Files without dynamic linking (static executables, data with an ELF
    // header) have nothing to search and may lack a .dynamic section.
    let links_dynamically = !dependencies.is_empty() || !search_paths.is_empty();
    if policy.os() == Os::Linux && links_dynamically {
      for dir in &library_dirs {
        let reference = policy.relative_reference(&relative_path(&origin, dir));
        if !desired.contains(&reference) {
          desired.push(reference);
        }
      }
    }
    for existing in &search_paths {
      if is_portable(policy, existing, &build_roots) && !desired.contains(existing) {
        desired.push(existing.clone());
      }
    }
    if desired != search_paths {
      ensure_writable(&binary)?;
      editor.set_search_paths(&binary, &desired).await?;
      debug!(binary = ?binary, search_paths = ?desired, "set search paths");
      edited = true;
    }

    if let Some(id) = editor.install_name(&binary).await?
      && !is_portable(policy, &id, &build_roots)
    {
      let new_id = format!("{}/{}", policy.token(), file_name_of(&id));
      ensure_writable(&binary)?;
      editor.set_install_name(&binary, &new_id).await?;
      debug!(binary = ?binary, from = %id, to = %new_id, "rewrote install name");
      edited = true;
    }

    if edited {
      editor.finalize(&binary).await?;
      report.edited += 1;
    }
  }

  info!(
    binaries = report.binaries,
    edited = report.edited,
    bundled = report.bundled_libraries.len(),
    "bundle is relocatable"
  );
  Ok(report)
}

fn copy_into_bundle(source: &Path, dest: &Path) -> Result<(), FixupError> {
  if dest.exists() {
    let same = hash_file(source).map_err(io_at(source))? == hash_file(dest).map_err(io_at(dest))?;
    if !same {
      return Err(FixupError::LibraryConflict {
        source_path: source.to_path_buf(),
        dest: dest.to_path_buf(),
      });
    }
    return Ok(());
  }
  fs::copy(source, dest).map_err(io_at(dest))?;
  ensure_writable(dest)?;
  info!(source = ?source, dest = ?dest, "bundled library");
  Ok(())
}

/// A bundle that passed [`verify_portable`].
#[derive(Debug)]
pub struct VerifiedBundle<'a> {
  bundle: &'a Bundle,
  binaries: Vec<PathBuf>,
}

impl VerifiedBundle<'_> {
  pub fn bundle(&self) -> &Bundle {
    self.bundle
  }

  pub fn binaries(&self) -> &[PathBuf] {
    &self.binaries
  }
}

/// Check every binary and symlink in the bundle for references to the build
/// machine. All violations are collected before failing.
pub async fn verify_portable<'a, E: LinkEditor>(
  bundle: &'a Bundle,
  build_root: &Path,
  policy: RelocationPolicy,
  editor: &E,
) -> Result<VerifiedBundle<'a>, FixupError> {
  let build_roots = build_root_forms(build_root);
  let binaries = bundle.binaries(policy)?;
  let mut violations = Vec::new();

  let relative = |path: &Path| path.strip_prefix(bundle.root()).unwrap_or(path).to_path_buf();

  for binary in &binaries {
    let mut check = |kind: ViolationKind, entry: String| {
      if !is_portable(policy, &entry, &build_roots) {
        violations.push(Violation {
          file: relative(binary),
          kind,
          entry,
        });
      }
    };
    for dep in editor.dependencies(binary).await? {
      check(ViolationKind::Dependency, dep);
    }
    for path in editor.search_paths(binary).await? {
      check(ViolationKind::SearchPath, path);
    }
    if let Some(id) = editor.install_name(binary).await? {
      check(ViolationKind::InstallName, id);
    }
  }

  for entry in WalkDir::new(bundle.root()).sort_by_file_name() {
    let entry = entry.map_err(|e| FixupError::Walk(e.to_string()))?;
    if !entry.path_is_symlink() {
      continue;
    }
    let target = fs::read_link(entry.path()).map_err(io_at(entry.path()))?;
    let target = target.to_string_lossy();
    let leaks_build_root = build_roots.iter().any(|r| target.contains(r.to_string_lossy().as_ref()));
    let absolute_non_system = target.starts_with('/') && !policy.system_prefixes().iter().any(|p| target.starts_with(p));
    if leaks_build_root || absolute_non_system {
      violations.push(Violation {
        file: relative(entry.path()),
        kind: ViolationKind::Symlink,
        entry: target.into_owned(),
      });
    }
  }

  if !violations.is_empty() {
    return Err(FixupError::NonPortablePath { violations });
  }

  info!(bundle = ?bundle.root(), binaries = binaries.len(), "bundle verified portable");
  Ok(VerifiedBundle { bundle, binaries })
}

/// Remove debug symbols from every binary of a verified bundle, on platforms
/// whose policy calls for it. Returns the number of binaries stripped.
pub async fn strip_bundle<E: LinkEditor>(
  verified: &VerifiedBundle<'_>,
  policy: RelocationPolicy,
  editor: &E,
) -> Result<usize, FixupError> {
  if !policy.strips_debug_symbols() {
    return Ok(0);
  }
  for binary in verified.binaries() {
    ensure_writable(binary)?;
    editor.strip_debug(binary).await?;
  }
  info!(binaries = verified.binaries().len(), "stripped debug symbols");
  Ok(verified.binaries().len())
}
