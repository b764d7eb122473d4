//! Shared fixtures for the integration tests.

use std::io::{Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;

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

/// Read one member of a bundle archive.
pub fn archive_member(archive: &Path, name: &str) -> Vec<u8> {
  let file = std::fs::File::open(archive).unwrap();
  let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(file));
  for entry in tar.entries().unwrap() {
    let mut entry = entry.unwrap();
    if entry.path().unwrap().as_ref() == Path::new(name) {
      let mut content = Vec::new();
      entry.read_to_end(&mut content).unwrap();
      return content;
    }
  }
  panic!("{name} not found in {}", archive.display());
}
