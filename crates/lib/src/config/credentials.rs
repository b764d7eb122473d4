//! Object storage credentials.
//!
//! Credentials come from a JSON file or from `DBBUNDLE_S3_*` environment
//! variables. All four of access key id, secret access key, bucket and endpoint
//! are required; the region is optional.

use std::fmt;
use std::path::Path;

use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use super::ConfigError;
use crate::consts::{CREDENTIALS_ENV_PREFIX, DEFAULT_S3_REGION};

/// Validated object storage credentials.
///
/// Loaded once per run and passed explicitly to the store that needs them.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
  pub access_key_id: String,
  pub secret_access_key: String,
  pub bucket: String,
  pub endpoint: String,
  pub region: String,
}

impl fmt::Debug for Credentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Credentials")
      .field("access_key_id", &self.access_key_id)
      .field("secret_access_key", &"<redacted>")
      .field("bucket", &self.bucket)
      .field("endpoint", &self.endpoint)
      .field("region", &self.region)
      .finish()
  }
}

/// Credentials as written by the user, before validation.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCredentials {
  access_key_id: Option<String>,
  secret_access_key: Option<String>,
  bucket: Option<String>,
  endpoint: Option<String>,
  region: Option<String>,
}

impl Credentials {
  /// Load credentials from a JSON file.
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&content, &path.display().to_string())
  }

  /// Parse credentials from a JSON document. `origin` names the document in errors.
  pub fn from_json(content: &str, origin: &str) -> Result<Self, ConfigError> {
    let raw: RawCredentials = serde_json::from_str(content).map_err(|source| ConfigError::Parse {
      origin: origin.to_string(),
      source,
    })?;
    debug!(origin = %origin, "loaded credentials document");
    Self::validate(raw)
  }

  /// Load credentials from `DBBUNDLE_S3_*` environment variables.
  pub fn from_env() -> Result<Self, ConfigError> {
    let var = |field: &str| std::env::var(env_var_name(field)).ok();
    let raw = RawCredentials {
      access_key_id: var("access_key_id"),
      secret_access_key: var("secret_access_key"),
      bucket: var("bucket"),
      endpoint: var("endpoint"),
      region: var("region"),
    };
    Self::validate(raw)
  }

  fn validate(raw: RawCredentials) -> Result<Self, ConfigError> {
    let access_key_id = required("access_key_id", raw.access_key_id)?;
    let secret_access_key = required("secret_access_key", raw.secret_access_key)?;
    let bucket = required("bucket", raw.bucket)?;
    let endpoint = required("endpoint", raw.endpoint)?;

    let url = Url::parse(&endpoint).map_err(|e| ConfigError::InvalidEndpoint {
      endpoint: endpoint.clone(),
      message: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
      return Err(ConfigError::InvalidEndpoint {
        endpoint,
        message: format!("unsupported scheme '{}'", url.scheme()),
      });
    }

    let region = raw
      .region
      .map(|r| r.trim().to_string())
      .filter(|r| !r.is_empty())
      .unwrap_or_else(|| DEFAULT_S3_REGION.to_string());

    Ok(Self {
      access_key_id,
      secret_access_key,
      bucket,
      endpoint,
      region,
    })
  }
}

fn env_var_name(field: &str) -> String {
  format!("{}{}", CREDENTIALS_ENV_PREFIX, field.to_uppercase())
}

fn required(field: &'static str, value: Option<String>) -> Result<String, ConfigError> {
  match value.map(|v| v.trim().to_string()) {
    Some(v) if !v.is_empty() => Ok(v),
    _ => Err(ConfigError::MissingField {
      field,
      env_var: env_var_name(field),
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::TempDir;

  const FULL: &str = r#"{
    "access_key_id": "AKIA123",
    "secret_access_key": "s3cr3t",
    "bucket": "db-bundles",
    "endpoint": "https://s3.example.com"
  }"#;

  #[test]
  fn parses_complete_document() {
    let creds = Credentials::from_json(FULL, "test").unwrap();
    assert_eq!(creds.bucket, "db-bundles");
    assert_eq!(creds.region, DEFAULT_S3_REGION);
  }

  #[test]
  fn missing_field_is_named() {
    let doc = r#"{ "access_key_id": "a", "secret_access_key": "b", "endpoint": "https://x" }"#;
    let err = Credentials::from_json(doc, "test").unwrap_err();
    assert!(matches!(err, ConfigError::MissingField { field: "bucket", .. }));
    assert!(err.to_string().contains("DBBUNDLE_S3_BUCKET"));
  }

  #[test]
  fn blank_field_counts_as_missing() {
    let doc = r#"{ "access_key_id": "  ", "secret_access_key": "b", "bucket": "c", "endpoint": "https://x" }"#;
    let err = Credentials::from_json(doc, "test").unwrap_err();
    assert!(matches!(err, ConfigError::MissingField { field: "access_key_id", .. }));
  }

  #[test]
  fn rejects_non_http_endpoint() {
    let doc = r#"{ "access_key_id": "a", "secret_access_key": "b", "bucket": "c", "endpoint": "ftp://x" }"#;
    let err = Credentials::from_json(doc, "test").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidEndpoint { .. }));
  }

  #[test]
  fn rejects_unknown_fields() {
    let doc = r#"{ "access_key": "a" }"#;
    assert!(matches!(
      Credentials::from_json(doc, "test"),
      Err(ConfigError::Parse { .. })
    ));
  }

  #[test]
  fn debug_redacts_secret() {
    let creds = Credentials::from_json(FULL, "test").unwrap();
    let rendered = format!("{creds:?}");
    assert!(!rendered.contains("s3cr3t"));
    assert!(rendered.contains("<redacted>"));
  }

  #[test]
  fn from_file_reads_json() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("credentials.json");
    std::fs::write(&path, FULL).unwrap();
    assert_eq!(Credentials::from_file(&path).unwrap().access_key_id, "AKIA123");
  }

  #[test]
  fn from_file_missing_is_read_error() {
    let temp = TempDir::new().unwrap();
    let err = Credentials::from_file(&temp.path().join("nope.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
  }

  #[test]
  #[serial]
  fn from_env_reads_prefixed_variables() {
    temp_env::with_vars(
      [
        ("DBBUNDLE_S3_ACCESS_KEY_ID", Some("env-key")),
        ("DBBUNDLE_S3_SECRET_ACCESS_KEY", Some("env-secret")),
        ("DBBUNDLE_S3_BUCKET", Some("env-bucket")),
        ("DBBUNDLE_S3_ENDPOINT", Some("http://127.0.0.1:9000")),
        ("DBBUNDLE_S3_REGION", Some("auto")),
      ],
      || {
        let creds = Credentials::from_env().unwrap();
        assert_eq!(creds.access_key_id, "env-key");
        assert_eq!(creds.region, "auto");
      },
    );
  }

  #[test]
  #[serial]
  fn from_env_missing_endpoint() {
    temp_env::with_vars(
      [
        ("DBBUNDLE_S3_ACCESS_KEY_ID", Some("env-key")),
        ("DBBUNDLE_S3_SECRET_ACCESS_KEY", Some("env-secret")),
        ("DBBUNDLE_S3_BUCKET", Some("env-bucket")),
        ("DBBUNDLE_S3_ENDPOINT", None),
      ],
      || {
        let err = Credentials::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "endpoint", .. }));
      },
    );
  }
}
