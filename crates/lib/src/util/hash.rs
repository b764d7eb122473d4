//! SHA-256 helpers for comparing library copies and fingerprinting bundles.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// A SHA-256 digest, displayed as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
  pub fn to_hex(&self) -> String {
    hex::encode(self.0)
  }
}

impl fmt::Display for ContentHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.to_hex())
  }
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(Sha256::digest(data).into())
}

pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
  let mut reader = BufReader::new(File::open(path)?);
  let mut hasher = Sha256::new();
  io::copy(&mut reader, &mut hasher)?;
  Ok(ContentHash(hasher.finalize().into()))
}

/// Fingerprint a directory tree: relative paths, file contents and symlink
/// targets. Timestamps and permissions are not included.
pub fn hash_tree(root: &Path) -> io::Result<ContentHash> {
  let mut hasher = Sha256::new();
  for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(root).map_err(io::Error::other)?;
    let file_type = entry.file_type();

    let record = if file_type.is_symlink() {
      format!("L {} {}", rel.display(), std::fs::read_link(entry.path())?.display())
    } else if file_type.is_dir() {
      format!("D {}", rel.display())
    } else if file_type.is_file() {
      format!("F {} {}", rel.display(), hash_file(entry.path())?)
    } else {
      continue;
    };
    hasher.update(record.as_bytes());
    hasher.update(b"\n");
  }
  Ok(ContentHash(hasher.finalize().into()))
}
