//! The manual PostgreSQL pipeline: build from source for the host OS and a
//! chosen architecture, make the install relocatable, archive and upload.

use std::path::PathBuf;

use tracing::info;

use super::{AtStep, PipelineError, Step, WorkDir};
use crate::archive::{ArchiveSummary, create_archive_async};
use crate::compile::{BuildFlags, CompileError, compile_postgres, reset_log};
use crate::consts::{ARCHIVE_EXTENSION, DEFAULT_POSTGRES_VERSION, POSTGRES_SOURCE_BASE_URL};
use crate::fetch::{download, postgres_source_url, unpack_archive_async, verify_version};
use crate::fixup::{Bundle, FixupReport, PlatformEditor, RelocationPolicy, make_portable, strip_bundle, verify_portable};
use crate::platform::{Arch, Platform};
use crate::target::{BuildTarget, Database, StorageKey};
use crate::upload::{ObjectStore, UploadReceipt};

#[derive(Debug, Clone)]
pub struct PostgresOptions {
  pub version: String,
  pub arch: Arch,
  pub source_base_url: String,
  /// Kept scratch directory; a temporary one is used when absent.
  pub work_dir: Option<PathBuf>,
  pub jobs: usize,
}

impl PostgresOptions {
  pub fn new(arch: Arch) -> Self {
    Self {
      version: DEFAULT_POSTGRES_VERSION.to_string(),
      arch,
      source_base_url: POSTGRES_SOURCE_BASE_URL.to_string(),
      work_dir: None,
      jobs: 1,
    }
  }
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct PostgresReport {
  pub target: BuildTarget,
  pub fixup: FixupReport,
  pub stripped: usize,
  pub archive: ArchiveSummary,
  pub receipt: UploadReceipt,
}

#[derive(Debug)]
pub struct PostgresPipeline {
  target: BuildTarget,
  host: Platform,
  flags: BuildFlags,
  options: PostgresOptions,
  client: reqwest::Client,
}

impl PostgresPipeline {
  /// Plan a build on `host`. The target OS is always the host's; only the
  /// architecture may differ.
  ///
  /// Everything that can be rejected without touching the network is checked
  /// here: the version, and whether the host can build the target.
  pub fn new(options: PostgresOptions, host: Platform, client: reqwest::Client) -> Result<Self, PipelineError> {
    let platform = host.with_arch(options.arch);
    let target = BuildTarget::new(Database::Postgresql, options.version.clone(), platform).at(Step::Prepare)?;
    let flags = BuildFlags::for_target(platform, host).at(Step::Compile)?;
    Ok(Self {
      target,
      host,
      flags,
      options,
      client,
    })
  }

  pub fn target(&self) -> &BuildTarget {
    &self.target
  }

  pub fn storage_key(&self) -> StorageKey {
    self.target.storage_key()
  }

  pub fn source_url(&self) -> String {
    postgres_source_url(&self.options.source_base_url, self.target.version())
  }

  pub async fn run<S: ObjectStore>(&self, store: &S) -> Result<PostgresReport, PipelineError> {
    let target = &self.target;
    let platform = target.platform();
    let key = self.storage_key();
    info!(target = %target, host = %self.host, key = %key, "starting postgresql pipeline");

    let work = WorkDir::create(self.options.work_dir.as_deref()).at(Step::Prepare)?;
    let downloads = work.fresh_subdir("downloads").at(Step::Prepare)?;
    let source = work.fresh_subdir("source").at(Step::Prepare)?;
    let install = work.fresh_subdir(&key.slug()).at(Step::Prepare)?;

    let fetched = download(&self.client, &self.source_url(), &downloads, None)
      .await
      .at(Step::Fetch)?;
    let unpacked = unpack_archive_async(fetched.path.clone(), source.clone())
      .await
      .at(Step::Unpack)?;
    verify_version(&fetched.path, &unpacked, target.version()).at(Step::VerifyVersion)?;

    let log = work.path().join("build.log");
    reset_log(&log).map_err(CompileError::from).at(Step::Compile)?;
    compile_postgres(&source, &install, &self.flags, self.options.jobs, &log)
      .await
      .at(Step::Compile)?;

    let bundle = Bundle::new(&install);
    let policy = RelocationPolicy::for_os(platform.os);
    let editor = PlatformEditor::for_os(platform.os, self.flags.strip_program());
    let fixup = make_portable(&bundle, work.path(), policy, &editor)
      .await
      .at(Step::Fixup)?;
    let verified = verify_portable(&bundle, work.path(), policy, &editor)
      .await
      .at(Step::Verify)?;
    let stripped = strip_bundle(&verified, policy, &editor).await.at(Step::Strip)?;

    let archive_path = work.path().join(format!("{}.{ARCHIVE_EXTENSION}", key.slug()));
    let archive = create_archive_async(install.clone(), archive_path.clone())
      .await
      .at(Step::Archive)?;
    let receipt = store.put_file(&key, &archive_path).await.at(Step::Upload)?;

    info!(key = %key, location = %receipt.location, "postgresql bundle published");
    Ok(PostgresReport {
      target: target.clone(),
      fixup,
      stripped,
      archive,
      receipt,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::Os;
  use crate::upload::DirStore;
  use tempfile::TempDir;

  #[test]
  fn target_uses_host_os_and_requested_arch() {
    let host = Platform::new(Os::MacOs, Arch::Arm64);
    let pipeline = PostgresPipeline::new(PostgresOptions::new(Arch::Arm64), host, reqwest::Client::new()).unwrap();
    assert_eq!(pipeline.storage_key().as_str(), "postgresql/17/macos/arm64.tar.gz");
    assert_eq!(
      pipeline.source_url(),
      "https://ftp.postgresql.org/pub/source/v17.5/postgresql-17.5.tar.gz"
    );

    let host = Platform::new(Os::Linux, Arch::X86_64);
    let pipeline = PostgresPipeline::new(PostgresOptions::new(Arch::Arm64), host, reqwest::Client::new()).unwrap();
    assert_eq!(pipeline.storage_key().as_str(), "postgresql/17/linux/arm64.tar.gz");
  }

  #[test]
  fn invalid_version_is_rejected_before_running() {
    let mut options = PostgresOptions::new(Arch::X86_64);
    options.version = "latest".to_string();
    let host = Platform::new(Os::Linux, Arch::X86_64);
    let err = PostgresPipeline::new(options, host, reqwest::Client::new()).unwrap_err();
    assert_eq!(err.step, Step::Prepare);
  }

  #[tokio::test]
  async fn missing_release_fails_at_fetch_and_uploads_nothing() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/v17.5/postgresql-17.5.tar.gz")
      .with_status(404)
      .create_async()
      .await;

    let temp = TempDir::new().unwrap();
    let mut options = PostgresOptions::new(Arch::X86_64);
    options.source_base_url = server.url();
    options.work_dir = Some(temp.path().join("work"));
    let host = Platform::new(Os::Linux, Arch::X86_64);
    let pipeline = PostgresPipeline::new(options, host, reqwest::Client::new()).unwrap();

    let out = temp.path().join("out");
    let err = pipeline.run(&DirStore::new(&out)).await.unwrap_err();

    assert_eq!(err.step, Step::Fetch);
    assert!(!out.exists());
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn failing_configure_stops_before_upload() {
    let mut server = mockito::Server::new_async().await;
    let configure: &[u8] = b"#!/bin/sh\necho 'configure: error: C compiler cannot create executables' >&2\nexit 77\n";
    let body = crate::util::testutil::tar_gz_bytes(&[("postgresql-17.5/configure", configure, 0o755)]);
    server
      .mock("GET", "/v17.5/postgresql-17.5.tar.gz")
      .with_status(200)
      .with_body(body)
      .create_async()
      .await;

    let temp = TempDir::new().unwrap();
    let mut options = PostgresOptions::new(Arch::X86_64);
    options.source_base_url = server.url();
    options.work_dir = Some(temp.path().join("work"));
    let host = Platform::new(Os::Linux, Arch::X86_64);
    let pipeline = PostgresPipeline::new(options, host, reqwest::Client::new()).unwrap();

    let out = temp.path().join("out");
    let err = pipeline.run(&DirStore::new(&out)).await.unwrap_err();

    assert_eq!(err.step, Step::Compile);
    let message = std::error::Error::source(&err).unwrap().to_string();
    assert!(message.contains("C compiler cannot create executables"), "{message}");
    assert!(!out.exists());
  }
}
