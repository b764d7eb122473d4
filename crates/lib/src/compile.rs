//! PostgreSQL configure/make driver.
//!
//! The build is configured without readline, zlib, OpenSSL and ICU so the only
//! shared libraries left to bundle are PostgreSQL's own. Cross-architecture
//! builds add target flags; cross-OS builds are not supported.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::consts::{COMPILE_LOG_TAIL_LINES, MACOS_MIN_VERSION_ARM64, MACOS_MIN_VERSION_X86_64, SOURCE_DATE_EPOCH};
use crate::platform::{Arch, Os, Platform};

/// Optional dependencies left out of the build.
const DISABLED_FEATURES: [&str; 4] = ["--without-readline", "--without-zlib", "--without-openssl", "--without-icu"];

#[derive(Debug, Error)]
pub enum CompileError {
  #[error("cannot build for {target} on a {host} host")]
  UnsupportedHost { target: Platform, host: Platform },

  #[error("{step} failed with exit code {code:?}; last build log lines:\n{log_tail}")]
  StepFailed {
    step: &'static str,
    code: Option<i32>,
    log_tail: String,
  },

  #[error("failed to start {step}: {source}")]
  Spawn {
    step: &'static str,
    #[source]
    source: std::io::Error,
  },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Target-specific configure arguments and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFlags {
  pub configure_args: Vec<String>,
  pub env: BTreeMap<String, String>,
  /// Binutils prefix for cross toolchains, e.g. `aarch64-linux-gnu-`.
  pub tool_prefix: Option<String>,
}

impl BuildFlags {
  /// Flags for building `target` on `host`.
  pub fn for_target(target: Platform, host: Platform) -> Result<Self, CompileError> {
    if target.os != host.os {
      return Err(CompileError::UnsupportedHost { target, host });
    }

    let mut configure_args: Vec<String> = DISABLED_FEATURES.iter().map(|s| s.to_string()).collect();
    let mut env = BTreeMap::new();
    let mut tool_prefix = None;
    let cross = target.arch != host.arch;

    match target.os {
      Os::MacOs => {
        let min_version = match target.arch {
          Arch::Arm64 => MACOS_MIN_VERSION_ARM64,
          Arch::X86_64 => MACOS_MIN_VERSION_X86_64,
        };
        let flags = format!("-arch {} -mmacosx-version-min={}", target.arch, min_version);
        env.insert("CFLAGS".to_string(), flags.clone());
        env.insert("LDFLAGS".to_string(), flags);
        env.insert("MACOSX_DEPLOYMENT_TARGET".to_string(), min_version.to_string());
        if cross {
          configure_args.push(format!("--host={}-apple-darwin", target.arch.gnu_name()));
        }
      }
      Os::Linux => {
        if cross {
          let triple = format!("{}-linux-gnu", target.arch.gnu_name());
          configure_args.push(format!("--host={triple}"));
          env.insert("CC".to_string(), format!("{triple}-gcc"));
          tool_prefix = Some(format!("{triple}-"));
        }
      }
    }

    Ok(Self {
      configure_args,
      env,
      tool_prefix,
    })
  }

  /// The `strip` binary matching the target.
  pub fn strip_program(&self) -> String {
    format!("{}strip", self.tool_prefix.as_deref().unwrap_or(""))
  }
}

/// Configure, build and install PostgreSQL from `source_dir` into `install_dir`.
///
/// All tool output is appended to `log_path`; a failing step reports the last
/// lines of that log.
pub async fn compile_postgres(
  source_dir: &Path,
  install_dir: &Path,
  flags: &BuildFlags,
  jobs: usize,
  log_path: &Path,
) -> Result<(), CompileError> {
  info!(source = ?source_dir, install = ?install_dir, jobs, "compiling postgresql");

  let mut configure_args = vec![format!("--prefix={}", install_dir.display())];
  configure_args.extend(flags.configure_args.iter().cloned());

  run_step("configure", "./configure", &configure_args, source_dir, &flags.env, log_path).await?;
  run_step("make", "make", &[format!("-j{}", jobs.max(1))], source_dir, &flags.env, log_path).await?;
  run_step("make install", "make", &["install".to_string()], source_dir, &flags.env, log_path).await?;

  info!(install = ?install_dir, "postgresql installed");
  Ok(())
}

async fn run_step(
  step: &'static str,
  program: &str,
  args: &[String],
  cwd: &Path,
  env: &BTreeMap<String, String>,
  log_path: &Path,
) -> Result<(), CompileError> {
  let mut log = OpenOptions::new().create(true).append(true).open(log_path)?;
  writeln!(log, "==> {step}: {program} {}", args.join(" "))?;
  let stderr_log = log.try_clone()?;

  let mut command = Command::new(program);
  command
    .args(args)
    .current_dir(cwd)
    .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH)
    .envs(env)
    .stdin(Stdio::null())
    .stdout(Stdio::from(log))
    .stderr(Stdio::from(stderr_log))
    .kill_on_drop(true);

  debug!(step, program, ?args, "running build step");

  let status = command
    .status()
    .await
    .map_err(|source| CompileError::Spawn { step, source })?;

  if !status.success() {
    let log = std::fs::read(log_path).unwrap_or_default();
    return Err(CompileError::StepFailed {
      step,
      code: status.code(),
      log_tail: tail_lines(&String::from_utf8_lossy(&log), COMPILE_LOG_TAIL_LINES),
    });
  }

  Ok(())
}

/// The last `n` lines of `text`.
fn tail_lines(text: &str, n: usize) -> String {
  let lines: Vec<&str> = text.lines().collect();
  let start = lines.len().saturating_sub(n);
  lines[start..].join("\n")
}

/// Create the build log, truncating any earlier run's log.
pub fn reset_log(log_path: &Path) -> std::io::Result<()> {
  File::create(log_path).map(|_| ())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn linux(arch: Arch) -> Platform {
    Platform::new(Os::Linux, arch)
  }

  fn macos(arch: Arch) -> Platform {
    Platform::new(Os::MacOs, arch)
  }

  #[test]
  fn always_disables_optional_dependencies() {
    let flags = BuildFlags::for_target(linux(Arch::X86_64), linux(Arch::X86_64)).unwrap();
    for feature in DISABLED_FEATURES {
      assert!(flags.configure_args.iter().any(|a| a == feature), "missing {feature}");
    }
    assert_eq!(flags.tool_prefix, None);
    assert_eq!(flags.strip_program(), "strip");
  }

  #[test]
  fn linux_cross_uses_gnu_triple() {
    let flags = BuildFlags::for_target(linux(Arch::Arm64), linux(Arch::X86_64)).unwrap();
    assert!(flags.configure_args.contains(&"--host=aarch64-linux-gnu".to_string()));
    assert_eq!(flags.env.get("CC").map(String::as_str), Some("aarch64-linux-gnu-gcc"));
    assert_eq!(flags.strip_program(), "aarch64-linux-gnu-strip");
  }

  #[test]
  fn macos_sets_arch_and_minimum_version() {
    let flags = BuildFlags::for_target(macos(Arch::Arm64), macos(Arch::Arm64)).unwrap();
    assert_eq!(
      flags.env.get("CFLAGS").map(String::as_str),
      Some("-arch arm64 -mmacosx-version-min=11.0")
    );
    assert_eq!(flags.env.get("MACOSX_DEPLOYMENT_TARGET").map(String::as_str), Some("11.0"));
    assert!(!flags.configure_args.iter().any(|a| a.starts_with("--host")));

    let cross = BuildFlags::for_target(macos(Arch::X86_64), macos(Arch::Arm64)).unwrap();
    assert!(cross.configure_args.contains(&"--host=x86_64-apple-darwin".to_string()));
    assert_eq!(
      cross.env.get("LDFLAGS").map(String::as_str),
      Some("-arch x86_64 -mmacosx-version-min=10.15")
    );
  }

  #[test]
  fn rejects_cross_os() {
    let err = BuildFlags::for_target(macos(Arch::Arm64), linux(Arch::Arm64)).unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedHost { .. }));
  }

  #[test]
  fn tail_keeps_last_lines() {
    let text = (1..=100).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
    let tail = tail_lines(&text, 3);
    assert_eq!(tail, "98\n99\n100");
    assert_eq!(tail_lines("one\ntwo", 10), "one\ntwo");
  }

  #[cfg(unix)]
  fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn failing_configure_reports_log_tail() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    std::fs::create_dir(&source).unwrap();
    write_script(
      &source.join("configure"),
      "echo checking for gcc... yes\necho 'configure: error: no acceptable C compiler' >&2\nexit 1",
    );
    let log = temp.path().join("build.log");
    reset_log(&log).unwrap();

    let flags = BuildFlags::for_target(linux(Arch::X86_64), linux(Arch::X86_64)).unwrap();
    let err = compile_postgres(&source, &temp.path().join("install"), &flags, 2, &log)
      .await
      .unwrap_err();

    match err {
      CompileError::StepFailed { step, code, log_tail } => {
        assert_eq!(step, "configure");
        assert_eq!(code, Some(1));
        assert!(log_tail.contains("no acceptable C compiler"));
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn configure_receives_prefix_and_flags() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    std::fs::create_dir(&source).unwrap();
    write_script(&source.join("configure"), "echo \"$@\" > configure.args");
    // A Makefile whose targets succeed without compiling anything.
    std::fs::write(source.join("Makefile"), "all:\n\t@true\ninstall:\n\t@true\n").unwrap();
    let log = temp.path().join("build.log");

    let install = temp.path().join("install");
    let flags = BuildFlags::for_target(linux(Arch::X86_64), linux(Arch::X86_64)).unwrap();
    compile_postgres(&source, &install, &flags, 1, &log).await.unwrap();

    let args = std::fs::read_to_string(source.join("configure.args")).unwrap();
    assert!(args.contains(&format!("--prefix={}", install.display())));
    assert!(args.contains("--without-icu"));
    let log = std::fs::read_to_string(&log).unwrap();
    assert!(log.contains("==> make install"));
  }
}
