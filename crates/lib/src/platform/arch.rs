use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ParsePlatformError;

/// CPU architectures bundles are produced for.
///
/// The string forms are the spellings used in storage keys and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Arch {
  #[serde(rename = "x86_64")]
  X86_64,
  #[serde(rename = "arm64")]
  Arm64,
}

impl Arch {
  /// Detect the current CPU architecture at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::ARCH {
      "x86_64" => Some(Self::X86_64),
      "aarch64" => Some(Self::Arm64),
      _ => None,
    }
  }

  /// Returns the identifier used in storage keys
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86_64",
      Self::Arm64 => "arm64",
    }
  }

  /// Architecture component of GNU target triples (`aarch64-linux-gnu`).
  pub fn gnu_name(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86_64",
      Self::Arm64 => "aarch64",
    }
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Arch {
  type Err = ParsePlatformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "x86_64" => Ok(Self::X86_64),
      "arm64" => Ok(Self::Arm64),
      other => Err(ParsePlatformError::UnknownArch(other.to_string())),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_only_storage_spellings() {
    assert_eq!("arm64".parse::<Arch>().unwrap(), Arch::Arm64);
    assert_eq!("x86_64".parse::<Arch>().unwrap(), Arch::X86_64);
    assert!("armv7".parse::<Arch>().is_err());
    assert!("aarch64".parse::<Arch>().is_err());
  }

  #[test]
  fn gnu_name_uses_aarch64() {
    assert_eq!(Arch::Arm64.gnu_name(), "aarch64");
  }
}
