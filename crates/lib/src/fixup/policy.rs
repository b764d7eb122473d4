use std::path::{Component, Path, PathBuf};

use crate::platform::Os;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

const MACHO_MAGICS: [[u8; 4]; 6] = [
  [0xcf, 0xfa, 0xed, 0xfe], // 64-bit, little endian
  [0xce, 0xfa, 0xed, 0xfe], // 32-bit, little endian
  [0xfe, 0xed, 0xfa, 0xcf], // 64-bit, big endian
  [0xfe, 0xed, 0xfa, 0xce], // 32-bit, big endian
  [0xca, 0xfe, 0xba, 0xbe], // universal
  [0xca, 0xfe, 0xba, 0xbf], // universal, 64-bit offsets
];

const MACOS_SYSTEM_PREFIXES: &[&str] = &["/usr/lib/", "/System/Library/"];
const LINUX_SYSTEM_PREFIXES: &[&str] = &["/lib/", "/lib64/", "/usr/lib/", "/usr/lib64/"];

/// How load paths are made relative on one platform.
///
/// | Platform | Mechanism | Relative token |
/// |---|---|---|
/// | macOS | rewrite load commands | `@loader_path` |
/// | Linux | set the dynamic section search path | `$ORIGIN` |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationPolicy {
  os: Os,
}

impl RelocationPolicy {
  pub fn for_os(os: Os) -> Self {
    Self { os }
  }

  pub fn os(&self) -> Os {
    self.os
  }

  /// The token the dynamic linker expands to the referencing binary's directory.
  pub fn token(&self) -> &'static str {
    match self.os {
      Os::MacOs => "@loader_path",
      Os::Linux => "$ORIGIN",
    }
  }

  /// Directories whose libraries are assumed present on every target machine.
  pub fn system_prefixes(&self) -> &'static [&'static str] {
    match self.os {
      Os::MacOs => MACOS_SYSTEM_PREFIXES,
      Os::Linux => LINUX_SYSTEM_PREFIXES,
    }
  }

  /// Whether each dependency entry is rewritten (macOS) rather than resolved
  /// through the search path (Linux).
  pub fn rewrites_dependency_entries(&self) -> bool {
    matches!(self.os, Os::MacOs)
  }

  pub fn strips_debug_symbols(&self) -> bool {
    matches!(self.os, Os::Linux)
  }

  /// Whether a file header belongs to a binary this platform loads.
  pub fn is_binary(&self, header: &[u8]) -> bool {
    let Some(magic) = header.get(..4) else {
      return false;
    };
    match self.os {
      Os::Linux => magic == ELF_MAGIC,
      Os::MacOs => MACHO_MAGICS.iter().any(|m| magic == m),
    }
  }

  /// Render `relative_dir` as a token-relative reference (`$ORIGIN/../lib`).
  pub fn relative_reference(&self, relative_dir: &Path) -> String {
    let rel = to_slash(relative_dir);
    if rel.is_empty() {
      self.token().to_string()
    } else {
      format!("{}/{}", self.token(), rel)
    }
  }

  /// Whether a recorded load path, search path or install name resolves the
  /// same way after the bundle is moved.
  ///
  /// Portable entries are token-relative, `@rpath`/`@executable_path` relative
  /// on macOS, bare sonames, or absolute paths under a system prefix. Anything
  /// mentioning `build_root` is never portable.
  pub fn is_portable_entry(&self, entry: &str, build_root: &Path) -> bool {
    let build_root = build_root.to_string_lossy();
    if !build_root.is_empty() && entry.contains(build_root.as_ref()) {
      return false;
    }
    if entry.starts_with(self.token()) {
      return true;
    }
    if self.os == Os::MacOs && (entry.starts_with("@rpath/") || entry.starts_with("@executable_path/")) {
      return true;
    }
    if entry.starts_with('/') {
      return self.system_prefixes().iter().any(|p| entry.starts_with(p));
    }
    !entry.contains('/') && !entry.is_empty()
  }
}

/// Relative path from the directory `from_dir` to `to`. Both must be absolute
/// and normalised.
pub fn relative_path(from_dir: &Path, to: &Path) -> PathBuf {
  let from: Vec<Component<'_>> = from_dir.components().collect();
  let to: Vec<Component<'_>> = to.components().collect();
  let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

  let mut rel = PathBuf::new();
  for _ in common..from.len() {
    rel.push("..");
  }
  for component in &to[common..] {
    rel.push(component.as_os_str());
  }
  rel
}

fn to_slash(path: &Path) -> String {
  path
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}

#[cfg(test)]
mod tests {
  use super::*;

  const BUILD: &str = "/home/builder/work";

  #[test]
  fn tokens_per_platform() {
    assert_eq!(RelocationPolicy::for_os(Os::MacOs).token(), "@loader_path");
    assert_eq!(RelocationPolicy::for_os(Os::Linux).token(), "$ORIGIN");
  }

  #[test]
  fn relative_references() {
    let linux = RelocationPolicy::for_os(Os::Linux);
    assert_eq!(linux.relative_reference(Path::new("../lib")), "$ORIGIN/../lib");
    assert_eq!(linux.relative_reference(Path::new("")), "$ORIGIN");

    let macos = RelocationPolicy::for_os(Os::MacOs);
    assert_eq!(macos.relative_reference(Path::new("..")), "@loader_path/..");
  }

  #[test]
  fn relative_path_between_bundle_dirs() {
    let root = Path::new("/b");
    assert_eq!(relative_path(&root.join("bin"), &root.join("lib")), PathBuf::from("../lib"));
    assert_eq!(relative_path(&root.join("lib"), &root.join("lib")), PathBuf::new());
    assert_eq!(
      relative_path(&root.join("lib/postgresql"), &root.join("lib")),
      PathBuf::from("..")
    );
    assert_eq!(
      relative_path(&root.join("share/bin"), &root.join("lib/extra")),
      PathBuf::from("../../lib/extra")
    );
  }

  #[test]
  fn portable_entries_linux() {
    let policy = RelocationPolicy::for_os(Os::Linux);
    let build = Path::new(BUILD);
    assert!(policy.is_portable_entry("libpq.so.5", build));
    assert!(policy.is_portable_entry("$ORIGIN/../lib", build));
    assert!(policy.is_portable_entry("/lib/x86_64-linux-gnu/libc.so.6", build));
    assert!(!policy.is_portable_entry("/home/builder/work/install/lib", build));
    assert!(!policy.is_portable_entry("/opt/local/lib", build));
    assert!(!policy.is_portable_entry("lib/libpq.so.5", build));
    assert!(!policy.is_portable_entry("", build));
  }

  #[test]
  fn portable_entries_macos() {
    let policy = RelocationPolicy::for_os(Os::MacOs);
    let build = Path::new(BUILD);
    assert!(policy.is_portable_entry("@loader_path/../lib/libpq.5.dylib", build));
    assert!(policy.is_portable_entry("@rpath/libfoo.dylib", build));
    assert!(policy.is_portable_entry("/usr/lib/libSystem.B.dylib", build));
    assert!(!policy.is_portable_entry("/opt/homebrew/lib/libicuuc.dylib", build));
    assert!(!policy.is_portable_entry(
      "/home/builder/work/install/lib/libpq.5.dylib",
      build
    ));
  }

  #[test]
  fn binary_magic_detection() {
    let linux = RelocationPolicy::for_os(Os::Linux);
    let macos = RelocationPolicy::for_os(Os::MacOs);
    assert!(linux.is_binary(b"\x7fELF\x02\x01"));
    assert!(!linux.is_binary(b"#!/bin/sh"));
    assert!(!linux.is_binary(b"\x7f"));
    assert!(macos.is_binary(&[0xcf, 0xfa, 0xed, 0xfe, 0x07]));
    assert!(macos.is_binary(&[0xca, 0xfe, 0xba, 0xbe]));
    assert!(!macos.is_binary(b"\x7fELF"));
  }
}
