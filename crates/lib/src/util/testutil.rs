//! Test utilities for dbbundle-lib.
//!
//! Helpers for building fixture binaries and archives without a toolchain.

use std::io::Write;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;

/// Write a file with the given content and permission bits, creating parents.
pub fn write_file(path: &Path, content: &[u8], mode: u32) {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(path, content).unwrap();
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
  }
  #[cfg(not(unix))]
  let _ = mode;
}

/// Build an in-memory `.tar.gz` from `(path, content, mode)` triples.
pub fn tar_gz_bytes(files: &[(&str, &[u8], u32)]) -> Vec<u8> {
  let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
  for (path, content, mode) in files {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(*mode);
    header.set_entry_type(tar::EntryType::Regular);
    builder.append_data(&mut header, path, *content).unwrap();
  }
  builder.into_inner().unwrap().finish().unwrap()
}

/// Build an in-memory `.zip` from `(path, content, mode)` triples.
pub fn zip_bytes(files: &[(&str, &[u8], u32)]) -> Vec<u8> {
  let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
  for (path, content, mode) in files {
    let options = zip::write::SimpleFileOptions::default().unix_permissions(*mode);
    writer.start_file(*path, options).unwrap();
    writer.write_all(content).unwrap();
  }
  writer.finish().unwrap().into_inner()
}
