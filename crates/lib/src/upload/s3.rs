use std::path::Path;

use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials as StaticCredentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use super::{ObjectStore, UploadError, UploadReceipt};
use crate::config::Credentials;
use crate::consts::APP_NAME;
use crate::target::StorageKey;

/// An S3-compatible bucket addressed path-style at a custom endpoint.
#[derive(Debug, Clone)]
pub struct S3Store {
  client: Client,
  bucket: String,
}

impl S3Store {
  /// Build a client from explicit credentials. No ambient AWS configuration
  /// (profiles, instance metadata) is consulted.
  pub fn new(credentials: &Credentials) -> Self {
    debug!(bucket = %credentials.bucket, endpoint = %credentials.endpoint, "creating s3 store");

    let provider = StaticCredentials::new(
      &credentials.access_key_id,
      &credentials.secret_access_key,
      None,
      None,
      APP_NAME,
    );
    let config = Builder::new()
      .behavior_version(BehaviorVersion::latest())
      .region(Region::new(credentials.region.clone()))
      .endpoint_url(&credentials.endpoint)
      .force_path_style(true)
      .credentials_provider(provider)
      .build();

    Self {
      client: Client::from_conf(config),
      bucket: credentials.bucket.clone(),
    }
  }

  pub fn bucket(&self) -> &str {
    &self.bucket
  }
}

fn rejected(key: &StorageKey, err: SdkError<PutObjectError, HttpResponse>) -> UploadError {
  let status = err.raw_response().map(|r| r.status().as_u16());
  let code = err.code().map(str::to_string);
  let message = err
    .message()
    .map(str::to_string)
    .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
  UploadError::Rejected {
    key: key.clone(),
    status,
    code,
    message,
  }
}

impl ObjectStore for S3Store {
  async fn put_file(&self, key: &StorageKey, path: &Path) -> Result<UploadReceipt, UploadError> {
    let read_err = |source| UploadError::Read {
      path: path.to_path_buf(),
      source,
    };
    let size = tokio::fs::metadata(path).await.map_err(read_err)?.len();
    let body = ByteStream::from_path(path)
      .await
      .map_err(|e| read_err(std::io::Error::other(e)))?;

    debug!(key = %key, bucket = %self.bucket, size, "uploading bundle");
    self
      .client
      .put_object()
      .bucket(&self.bucket)
      .key(key.as_str())
      .content_type("application/gzip")
      .body(body)
      .send()
      .await
      .map_err(|e| rejected(key, e))?;

    let location = format!("s3://{}/{}", self.bucket, key);
    info!(key = %key, location = %location, size, "uploaded bundle");
    Ok(UploadReceipt {
      key: key.clone(),
      location,
      size,
    })
  }

  fn describe(&self) -> String {
    format!("s3://{}", self.bucket)
  }
}
