//! Source and vendor archive acquisition.
//!
//! Downloads are streamed to disk while their SHA-256 is computed, then
//! unpacked with the archive's single top-level directory stripped. Failures
//! are fatal: nothing is retried beyond what the HTTP client does itself.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::util::hash::hash_bytes;

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("request to {url} failed: {message}")]
  Request { url: String, message: String },

  #[error("{url} returned HTTP {status}")]
  Status { url: String, status: u16 },

  #[error("hash mismatch for {url}: expected {expected}, got {actual}")]
  HashMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  #[error("unsupported archive format: {0}")]
  UnsupportedArchive(String),

  #[error("failed to unpack {path}: {message}")]
  Unpack { path: PathBuf, message: String },

  #[error("archive {archive} does not look like version {version} (top-level directory: {top_level:?})")]
  VersionMismatch {
    archive: String,
    version: String,
    top_level: Option<String>,
  },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// A completed download.
#[derive(Debug, Clone)]
pub struct Download {
  pub url: String,
  pub path: PathBuf,
  pub size: u64,
  pub sha256: String,
}

/// URL of a PostgreSQL source release below `base_url`.
pub fn postgres_source_url(base_url: &str, version: &str) -> String {
  format!(
    "{}/v{version}/postgresql-{version}.tar.gz",
    base_url.trim_end_matches('/')
  )
}

/// Download `url` into `dest_dir`, verifying `expected_sha256` when given.
///
/// The body is written to a `.part` file and renamed once complete, so a
/// failed download never leaves a file under the final name.
pub async fn download(
  client: &reqwest::Client,
  url: &str,
  dest_dir: &Path,
  expected_sha256: Option<&str>,
) -> Result<Download, FetchError> {
  info!(url = %url, "fetching URL");

  tokio::fs::create_dir_all(dest_dir).await?;
  let dest_path = dest_dir.join(url_to_filename(url));
  let part_path = dest_path.with_extension("part");

  let request_error = |e: reqwest::Error| FetchError::Request {
    url: url.to_string(),
    message: e.to_string(),
  };

  let mut response = client.get(url).send().await.map_err(request_error)?;

  if !response.status().is_success() {
    return Err(FetchError::Status {
      url: url.to_string(),
      status: response.status().as_u16(),
    });
  }

  let mut file = tokio::fs::File::create(&part_path).await?;
  let mut hasher = Sha256::new();
  let mut size = 0u64;

  while let Some(chunk) = response.chunk().await.map_err(request_error)? {
    hasher.update(&chunk);
    file.write_all(&chunk).await?;
    size += chunk.len() as u64;
  }
  file.flush().await?;
  drop(file);

  let actual = hex::encode(hasher.finalize());
  if let Some(expected) = expected_sha256 {
    if actual != expected {
      let _ = tokio::fs::remove_file(&part_path).await;
      return Err(FetchError::HashMismatch {
        url: url.to_string(),
        expected: expected.to_string(),
        actual,
      });
    }
    debug!(sha256 = %expected, "hash verified");
  }

  tokio::fs::rename(&part_path, &dest_path).await?;
  info!(path = ?dest_path, size, "download complete");

  Ok(Download {
    url: url.to_string(),
    path: dest_path,
    size,
    sha256: actual,
  })
}

/// Convert a URL to a safe filename.
///
/// Takes the last path component and sanitizes it. Falls back to hash of URL
/// if no suitable filename can be extracted.
fn url_to_filename(url: &str) -> String {
  if let Some(filename) = url.rsplit('/').next() {
    let filename = filename.split('?').next().unwrap_or(filename);

    let sanitized: String = filename
      .chars()
      .map(|c| {
        if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
          c
        } else {
          '_'
        }
      })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
      return sanitized;
    }
  }

  format!("download_{}", &hash_bytes(url.as_bytes()).to_hex()[..16])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
  TarGz,
  Tar,
  Zip,
}

impl ArchiveKind {
  fn from_path(path: &Path) -> Result<Self, FetchError> {
    let name = path
      .file_name()
      .and_then(|n| n.to_str())
      .ok_or_else(|| FetchError::UnsupportedArchive(path.display().to_string()))?;

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
      Ok(Self::TarGz)
    } else if name.ends_with(".tar") {
      Ok(Self::Tar)
    } else if name.ends_with(".zip") {
      Ok(Self::Zip)
    } else {
      Err(FetchError::UnsupportedArchive(name.to_string()))
    }
  }
}

/// Result of unpacking an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unpacked {
  /// Name of the top-level directory that was stripped, if the archive had exactly one.
  pub top_level: Option<String>,
  pub entries: usize,
}

/// Unpack an archive to the destination directory
///
/// Supports:
/// - `.tar.gz` / `.tgz`
/// - `.tar`
/// - `.zip`
///
/// When every entry lives below one top-level directory, that directory is
/// stripped so `dest` holds its contents.
pub fn unpack_archive(archive_path: &Path, dest: &Path) -> Result<Unpacked, FetchError> {
  let kind = ArchiveKind::from_path(archive_path)?;
  fs::create_dir_all(dest)?;
  let root = dunce::canonicalize(dest)?;

  let unpack_error = |e: &dyn std::fmt::Display| FetchError::Unpack {
    path: archive_path.to_path_buf(),
    message: e.to_string(),
  };

  // First pass: find the shared top-level directory, if any.
  let names = match kind {
    ArchiveKind::TarGz | ArchiveKind::Tar => {
      let mut archive = tar::Archive::new(open_tar(archive_path, kind)?);
      let mut names = Vec::new();
      for entry in archive.entries()? {
        let entry = entry?;
        names.push(entry.path()?.into_owned());
      }
      names
    }
    ArchiveKind::Zip => {
      let archive = zip::ZipArchive::new(BufReader::new(File::open(archive_path)?)).map_err(|e| unpack_error(&e))?;
      archive.file_names().map(PathBuf::from).collect()
    }
  };
  let top_level = common_top_level(&names);
  let strip = usize::from(top_level.is_some());

  let mut count = 0;
  match kind {
    ArchiveKind::TarGz | ArchiveKind::Tar => {
      let mut archive = tar::Archive::new(open_tar(archive_path, kind)?);
      for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let Some(dest_path) = destination(&root, &path, strip).map_err(|m| unpack_error(&m))? else {
          continue;
        };
        ensure_inside(&root, &dest_path).map_err(|m| unpack_error(&m))?;
        if let Some(parent) = dest_path.parent() {
          fs::create_dir_all(parent)?;
        }
        remove_symlink(&dest_path)?;

        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
          let link_name = entry
            .link_name()?
            .ok_or_else(|| unpack_error(&format!("link '{}' has no target", path.display())))?
            .into_owned();

          if entry_type.is_hard_link() {
            // Hard link targets name another member of the archive.
            let source = destination(&root, &link_name, strip)
              .map_err(|m| unpack_error(&m))?
              .ok_or_else(|| unpack_error(&format!("hard link '{}' targets the archive root", path.display())))?;
            ensure_inside(&root, &source).map_err(|m| unpack_error(&m))?;
            fs::hard_link(&source, &dest_path)?;
            count += 1;
            continue;
          }

          if !link_stays_inside(&root, &dest_path, &link_name) {
            return Err(unpack_error(&format!(
              "symlink '{}' -> '{}' escapes the destination",
              path.display(),
              link_name.display()
            )));
          }
        }

        entry.unpack(&dest_path)?;
        count += 1;
      }
    }
    ArchiveKind::Zip => {
      let mut archive = zip::ZipArchive::new(BufReader::new(File::open(archive_path)?)).map_err(|e| unpack_error(&e))?;
      for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| unpack_error(&e))?;
        let path = file
          .enclosed_name()
          .ok_or_else(|| unpack_error(&format!("unsafe entry name '{}'", file.name())))?;
        let Some(dest_path) = destination(&root, &path, strip).map_err(|m| unpack_error(&m))? else {
          continue;
        };
        ensure_inside(&root, &dest_path).map_err(|m| unpack_error(&m))?;
        if let Some(parent) = dest_path.parent() {
          fs::create_dir_all(parent)?;
        }
        remove_symlink(&dest_path)?;

        if file.is_dir() {
          fs::create_dir_all(&dest_path)?;
        } else if file.is_symlink() {
          let mut target = String::new();
          file.read_to_string(&mut target)?;
          if !link_stays_inside(&root, &dest_path, Path::new(&target)) {
            return Err(unpack_error(&format!(
              "symlink '{}' -> '{}' escapes the destination",
              path.display(),
              target
            )));
          }
          make_symlink(&target, &dest_path)?;
        } else {
          let mut outfile = File::create(&dest_path)?;
          std::io::copy(&mut file, &mut outfile)?;

          #[cfg(unix)]
          {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
              fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode & 0o7777))?;
            }
          }
        }
        count += 1;
      }
    }
  }

  info!(archive = ?archive_path, dest = ?dest, entries = count, "unpacked archive");
  Ok(Unpacked {
    top_level,
    entries: count,
  })
}

/// Unpack on the blocking thread pool.
pub async fn unpack_archive_async(archive_path: PathBuf, dest: PathBuf) -> Result<Unpacked, FetchError> {
  let path = archive_path.clone();
  tokio::task::spawn_blocking(move || unpack_archive(&archive_path, &dest))
    .await
    .map_err(|e| FetchError::Unpack {
      path,
      message: e.to_string(),
    })?
}

/// Check that a fetched archive is the release that was asked for.
///
/// The version must appear in the stripped top-level directory name or in the
/// archive's file name.
pub fn verify_version(archive_path: &Path, unpacked: &Unpacked, version: &str) -> Result<(), FetchError> {
  let archive = archive_path
    .file_name()
    .map(|n| n.to_string_lossy().to_string())
    .unwrap_or_default();

  let in_top_level = unpacked.top_level.as_deref().is_some_and(|t| t.contains(version));
  if in_top_level || archive.contains(version) {
    return Ok(());
  }

  Err(FetchError::VersionMismatch {
    archive,
    version: version.to_string(),
    top_level: unpacked.top_level.clone(),
  })
}

fn open_tar(path: &Path, kind: ArchiveKind) -> Result<Box<dyn Read>, FetchError> {
  let reader = BufReader::new(File::open(path)?);
  Ok(match kind {
    ArchiveKind::TarGz => Box::new(GzDecoder::new(reader)),
    _ => Box::new(reader),
  })
}

/// The single directory every entry lives under, if there is one.
fn common_top_level(names: &[PathBuf]) -> Option<String> {
  let mut tops = BTreeSet::new();
  let mut nested = false;
  for name in names {
    let mut components = name.components().filter(|c| !matches!(c, Component::CurDir));
    let first = components.next()?;
    tops.insert(first.as_os_str().to_string_lossy().to_string());
    nested |= components.next().is_some();
  }

  if tops.len() == 1 && nested {
    tops.into_iter().next()
  } else {
    None
  }
}

/// Where an entry lands below `dest` after stripping `strip` leading components.
///
/// Returns `Ok(None)` for the stripped directory itself and an error for
/// entries that would escape `dest`.
fn destination(dest: &Path, path: &Path, strip: usize) -> Result<Option<PathBuf>, String> {
  let mut relative = PathBuf::new();
  for component in path
    .components()
    .filter(|c| !matches!(c, Component::CurDir))
    .skip(strip)
  {
    match component {
      Component::Normal(part) => relative.push(part),
      _ => return Err(format!("entry '{}' escapes the destination", path.display())),
    }
  }

  if relative.as_os_str().is_empty() {
    return Ok(None);
  }
  Ok(Some(dest.join(relative)))
}

/// Fail if `path` would be written through a symlink that leads outside `root`.
fn ensure_inside(root: &Path, path: &Path) -> Result<(), String> {
  let mut ancestor = path.parent();
  while let Some(dir) = ancestor {
    if dir.exists() {
      let real = dunce::canonicalize(dir).map_err(|e| format!("{}: {e}", dir.display()))?;
      if real.starts_with(root) {
        return Ok(());
      }
      break;
    }
    ancestor = dir.parent();
  }
  Err(format!("entry '{}' resolves outside the destination", path.display()))
}

/// Whether a symlink at `link` pointing to `target` stays below `root`,
/// resolving `..` against the link's own directory.
fn link_stays_inside(root: &Path, link: &Path, target: &Path) -> bool {
  let Ok(rel) = link.parent().unwrap_or(root).strip_prefix(root) else {
    return false;
  };
  let mut depth = rel.components().count();
  for component in target.components() {
    match component {
      Component::Normal(_) => depth += 1,
      Component::CurDir => {}
      Component::ParentDir => {
        if depth == 0 {
          return false;
        }
        depth -= 1;
      }
      Component::RootDir | Component::Prefix(_) => return false,
    }
  }
  true
}

/// An existing symlink at an entry's path is replaced, never written through.
fn remove_symlink(path: &Path) -> std::io::Result<()> {
  match fs::symlink_metadata(path) {
    Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(path),
    _ => Ok(()),
  }
}

#[cfg(unix)]
fn make_symlink(target: &str, link: &Path) -> std::io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn make_symlink(target: &str, link: &Path) -> std::io::Result<()> {
  fs::write(link, target)
}
