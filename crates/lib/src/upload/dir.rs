use std::path::{Path, PathBuf};

use tracing::info;

use super::{ObjectStore, UploadError, UploadReceipt};
use crate::target::StorageKey;

/// Writes objects to `<root>/<key>`.
#[derive(Debug, Clone)]
pub struct DirStore {
  root: PathBuf,
}

impl DirStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn path_for(&self, key: &StorageKey) -> PathBuf {
    self.root.join(key.as_str())
  }
}

impl ObjectStore for DirStore {
  async fn put_file(&self, key: &StorageKey, path: &Path) -> Result<UploadReceipt, UploadError> {
    let dest = self.path_for(key);
    let write_err = |source| UploadError::Write {
      path: dest.clone(),
      source,
    };

    if let Some(parent) = dest.parent() {
      tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    // Copy beside the destination, then rename over it.
    let partial = dest.with_extension("gz.part");
    let size = tokio::fs::copy(path, &partial).await.map_err(|source| UploadError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    tokio::fs::rename(&partial, &dest).await.map_err(write_err)?;

    info!(key = %key, dest = ?dest, size, "stored bundle");
    Ok(UploadReceipt {
      key: key.clone(),
      location: dest.display().to_string(),
      size,
    })
  }

  fn describe(&self) -> String {
    self.root.display().to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{Arch, Database, Os, Platform};
  use tempfile::TempDir;
  use tracing_test::traced_test;

  #[tokio::test]
  #[traced_test]
  async fn writes_under_key_and_overwrites() {
    let temp = TempDir::new().unwrap();
    let store = DirStore::new(temp.path().join("out"));
    let key = StorageKey::new(Database::Mongodb, "8", Platform::new(Os::MacOs, Arch::Arm64));

    let first = temp.path().join("first.tar.gz");
    std::fs::write(&first, b"first").unwrap();
    let receipt = store.put_file(&key, &first).await.unwrap();

    let dest = temp.path().join("out/mongodb/8/macos/arm64.tar.gz");
    assert_eq!(receipt.location, dest.display().to_string());
    assert_eq!(receipt.size, 5);
    assert_eq!(std::fs::read(&dest).unwrap(), b"first");

    let second = temp.path().join("second.tar.gz");
    std::fs::write(&second, b"second run").unwrap();
    store.put_file(&key, &second).await.unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"second run");
    assert!(!dest.with_extension("gz.part").exists());
    assert!(logs_contain("stored bundle"));
  }

  #[tokio::test]
  async fn missing_source_is_read_error() {
    let temp = TempDir::new().unwrap();
    let store = DirStore::new(temp.path());
    let key = StorageKey::new(Database::Redis, "7", Platform::new(Os::Linux, Arch::X86_64));

    let err = store.put_file(&key, &temp.path().join("missing.tar.gz")).await.unwrap_err();
    assert!(matches!(err, UploadError::Read { .. }));
  }
}
