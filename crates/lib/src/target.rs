//! Build targets and the storage keys derived from them.
//!
//! A [`BuildTarget`] names one artifact: a database release for one OS and
//! architecture. Its [`StorageKey`] is the object path the tarball is uploaded
//! to, `{database}/{major_version}/{platform}/{arch}.tar.gz`. Patch releases of
//! the same major version share a key, so a newer build replaces the older one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::ARCHIVE_EXTENSION;
use crate::platform::{Arch, Os, Platform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
  Postgresql,
  Mongodb,
  Redis,
}

impl Database {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Postgresql => "postgresql",
      Self::Mongodb => "mongodb",
      Self::Redis => "redis",
    }
  }
}

impl fmt::Display for Database {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Database {
  type Err = TargetError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "postgresql" => Ok(Self::Postgresql),
      "mongodb" => Ok(Self::Mongodb),
      "redis" => Ok(Self::Redis),
      other => Err(TargetError::UnknownDatabase(other.to_string())),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
  #[error("unknown database '{0}' (expected one of: postgresql, mongodb, redis)")]
  UnknownDatabase(String),

  #[error("version '{0}' does not start with a numeric major version")]
  InvalidVersion(String),
}

/// Returns the major version bucket of a release string.
///
/// The major version is the leading run of digits: `17.5` is `17`, `18beta1`
/// is `18` and `7.4.0-v1` is `7`.
pub fn major_version(version: &str) -> Result<&str, TargetError> {
  let end = version.find(|c: char| !c.is_ascii_digit()).unwrap_or(version.len());
  let major = &version[..end];

  if major.is_empty() {
    return Err(TargetError::InvalidVersion(version.to_string()));
  }

  Ok(major)
}

/// One artifact to produce: a database release for a single platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildTarget {
  database: Database,
  version: String,
  platform: Platform,
}

impl BuildTarget {
  /// Creates a target, rejecting versions without a numeric major component.
  pub fn new(database: Database, version: impl Into<String>, platform: Platform) -> Result<Self, TargetError> {
    let version = version.into();
    major_version(&version)?;
    Ok(Self {
      database,
      version,
      platform,
    })
  }

  pub fn database(&self) -> Database {
    self.database
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn platform(&self) -> Platform {
    self.platform
  }

  pub fn os(&self) -> Os {
    self.platform.os
  }

  pub fn arch(&self) -> Arch {
    self.platform.arch
  }

  pub fn major_version(&self) -> &str {
    // Validated in `new`.
    major_version(&self.version).unwrap_or(&self.version)
  }

  pub fn storage_key(&self) -> StorageKey {
    StorageKey::new(self.database, self.major_version(), self.platform)
  }
}

impl fmt::Display for BuildTarget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {} ({})", self.database, self.version, self.platform)
  }
}

/// Object key a bundle is uploaded to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
  pub fn new(database: Database, major_version: &str, platform: Platform) -> Self {
    Self(format!(
      "{}/{}/{}/{}.{}",
      database, major_version, platform.os, platform.arch, ARCHIVE_EXTENSION
    ))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// A file-name-safe rendering of the key, used for per-target work directories.
  pub fn slug(&self) -> String {
    self
      .0
      .trim_end_matches(&format!(".{ARCHIVE_EXTENSION}"))
      .replace('/', "-")
  }
}

impl fmt::Display for StorageKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn postgres_macos_arm64_key() {
    let target = BuildTarget::new(Database::Postgresql, "17.5", Platform::new(Os::MacOs, Arch::Arm64)).unwrap();
    assert_eq!(target.storage_key().as_str(), "postgresql/17/macos/arm64.tar.gz");
  }

  #[test]
  fn patch_releases_share_a_key() {
    let platform = Platform::new(Os::Linux, Arch::X86_64);
    let a = BuildTarget::new(Database::Mongodb, "8.0.4", platform).unwrap();
    let b = BuildTarget::new(Database::Mongodb, "8.2.1", platform).unwrap();
    assert_eq!(a.storage_key(), b.storage_key());
    assert_eq!(a.storage_key().as_str(), "mongodb/8/linux/x86_64.tar.gz");
  }

  #[test]
  fn key_depends_on_every_component() {
    let base = BuildTarget::new(Database::Redis, "7.4.0-v1", Platform::new(Os::Linux, Arch::Arm64)).unwrap();
    let other_arch = BuildTarget::new(Database::Redis, "7.4.0-v1", Platform::new(Os::Linux, Arch::X86_64)).unwrap();
    let other_os = BuildTarget::new(Database::Redis, "7.4.0-v1", Platform::new(Os::MacOs, Arch::Arm64)).unwrap();
    let other_db = BuildTarget::new(Database::Mongodb, "7.4.0", Platform::new(Os::Linux, Arch::Arm64)).unwrap();

    assert_eq!(base.storage_key().as_str(), "redis/7/linux/arm64.tar.gz");
    assert_ne!(base.storage_key(), other_arch.storage_key());
    assert_ne!(base.storage_key(), other_os.storage_key());
    assert_ne!(base.storage_key(), other_db.storage_key());
  }

  #[test]
  fn major_version_parsing() {
    assert_eq!(major_version("17.5").unwrap(), "17");
    assert_eq!(major_version("8.0.4").unwrap(), "8");
    assert_eq!(major_version("7.4.0-v1").unwrap(), "7");
    assert_eq!(major_version("16").unwrap(), "16");
    assert!(major_version("latest").is_err());
    assert!(major_version("").is_err());
    assert_eq!(major_version("18beta1").unwrap(), "18");
  }

  #[test]
  fn slug_is_path_free() {
    let key = StorageKey::new(Database::Postgresql, "17", Platform::new(Os::Linux, Arch::Arm64));
    assert_eq!(key.slug(), "postgresql-17-linux-arm64");
  }
}
