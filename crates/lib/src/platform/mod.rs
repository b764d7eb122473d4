pub mod arch;
pub mod os;

pub use arch::Arch;
pub use os::Os;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParsePlatformError {
  #[error("unsupported architecture '{0}' (expected one of: arm64, x86_64)")]
  UnknownArch(String),

  #[error("unsupported platform '{0}' (expected one of: macos, linux)")]
  UnknownOs(String),
}

/// Platform identifier combining OS and architecture (e.g., "macos/arm64")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
  pub os: Os,
  pub arch: Arch,
}

impl Platform {
  /// Create a new platform identifier
  pub fn new(os: Os, arch: Arch) -> Self {
    Self { os, arch }
  }

  /// Detect the current platform at runtime
  ///
  /// Returns `None` if the OS or architecture is not supported
  pub fn current() -> Option<Self> {
    Some(Self {
      os: Os::current()?,
      arch: Arch::current()?,
    })
  }

  /// The same OS on a different architecture.
  pub fn with_arch(self, arch: Arch) -> Self {
    Self { arch, ..self }
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.os, self.arch)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_matches_storage_layout() {
    let platform = Platform::new(Os::MacOs, Arch::Arm64);
    assert_eq!(platform.to_string(), "macos/arm64");

    let platform = Platform::new(Os::Linux, Arch::X86_64);
    assert_eq!(platform.to_string(), "linux/x86_64");
  }

  #[test]
  fn with_arch_keeps_os() {
    let host = Platform::new(Os::Linux, Arch::X86_64);
    assert_eq!(host.with_arch(Arch::Arm64), Platform::new(Os::Linux, Arch::Arm64));
  }
}
