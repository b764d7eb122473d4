use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ParsePlatformError;

/// Operating systems bundles are produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
  Linux,
  MacOs,
}

impl Os {
  /// Detect the current operating system at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      _ => None,
    }
  }

  /// Returns the lowercase string identifier for this OS
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "macos",
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Os {
  type Err = ParsePlatformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "linux" => Ok(Self::Linux),
      "macos" => Ok(Self::MacOs),
      other => Err(ParsePlatformError::UnknownOs(other.to_string())),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn macos_uses_macos_identifier() {
    // Storage keys spell the platform "macos", not "darwin"
    assert_eq!(Os::MacOs.as_str(), "macos");
    assert_eq!(serde_json::to_string(&Os::MacOs).unwrap(), "\"macos\"");
  }

  #[test]
  fn rejects_unknown_os() {
    assert!("windows".parse::<Os>().is_err());
  }
}
