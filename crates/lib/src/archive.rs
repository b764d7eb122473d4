//! Bundle archival as `.tar.gz`.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use thiserror::Error;
use tracing::info;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("{path} is not a directory")]
  NotADirectory { path: PathBuf },

  #[error("failed to walk {path}: {message}")]
  Walk { path: PathBuf, message: String },

  #[error("failed to write archive {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to add {path} to archive: {source}")]
  Append {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Result of [`create_archive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
  pub path: PathBuf,
  /// Files, directories and symlinks written.
  pub entries: usize,
  /// Compressed size in bytes.
  pub size: u64,
}

/// Write `root` as a gzip tarball at `dest`.
///
/// Member names are relative to `root` and written in sorted order.
/// Permissions are preserved and symlinks are stored as links, not followed.
pub fn create_archive(root: &Path, dest: &Path) -> Result<ArchiveSummary, ArchiveError> {
  if !root.is_dir() {
    return Err(ArchiveError::NotADirectory {
      path: root.to_path_buf(),
    });
  }

  let write_err = |source| ArchiveError::Write {
    path: dest.to_path_buf(),
    source,
  };

  if let Some(parent) = dest.parent() {
    fs::create_dir_all(parent).map_err(write_err)?;
  }
  let file = File::create(dest).map_err(write_err)?;
  let mut builder = tar::Builder::new(GzEncoder::new(BufWriter::new(file), Compression::default()));
  builder.mode(tar::HeaderMode::Complete);
  builder.follow_symlinks(false);

  let mut entries = 0;
  for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
    let entry = entry.map_err(|e| ArchiveError::Walk {
      path: root.to_path_buf(),
      message: e.to_string(),
    })?;
    let name = entry.path().strip_prefix(root).unwrap_or(entry.path());
    builder
      .append_path_with_name(entry.path(), name)
      .map_err(|source| ArchiveError::Append {
        path: entry.path().to_path_buf(),
        source,
      })?;
    entries += 1;
  }

  let encoder = builder.into_inner().map_err(write_err)?;
  let writer = encoder.finish().map_err(write_err)?;
  writer.into_inner().map_err(|e| write_err(e.into_error()))?;

  let size = fs::metadata(dest).map_err(write_err)?.len();
  info!(archive = ?dest, entries, size, "archive written");

  Ok(ArchiveSummary {
    path: dest.to_path_buf(),
    entries,
    size,
  })
}

/// [`create_archive`] on the blocking thread pool.
pub async fn create_archive_async(root: PathBuf, dest: PathBuf) -> Result<ArchiveSummary, ArchiveError> {
  let fallback = dest.clone();
  tokio::task::spawn_blocking(move || create_archive(&root, &dest))
    .await
    .map_err(|e| ArchiveError::Write {
      path: fallback,
      source: io::Error::other(e),
    })?
}
