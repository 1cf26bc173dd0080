//! Implementation of the `pybundle inspect` command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pybundle_archive::{ArchiveReader, EntryKind, PythonVersion};
use serde::Serialize;

use crate::output::{OutputFormat, format_bytes, print_info, print_json, print_stat, truncate_hash};

#[derive(Debug, Serialize)]
struct InspectOutput {
  archive: PathBuf,
  start: u64,
  python: Option<PythonVersion>,
  index_digest: String,
  entries: Vec<EntryOutput>,
}

#[derive(Debug, Serialize)]
struct EntryOutput {
  name: String,
  kind: EntryKind,
  size: u64,
  stored: u64,
  compressed: bool,
  package: bool,
  sourceless: bool,
  external: bool,
  checksum: String,
}

/// The archive file behind a bundle path: a onedir directory resolves to its
/// `<name>.pkg` sidecar, anything else is opened as is.
pub(super) fn archive_file(path: &Path) -> PathBuf {
  if path.is_dir()
    && let Some(name) = path.file_name()
  {
    let mut sidecar = name.to_os_string();
    sidecar.push(".pkg");
    return path.join(sidecar);
  }
  path.to_path_buf()
}

pub(super) fn open(path: &Path) -> Result<ArchiveReader> {
  let file = archive_file(path);
  ArchiveReader::open(&file).with_context(|| format!("Failed to open archive {}", file.display()))
}

pub fn cmd_inspect(path: &Path, output: OutputFormat) -> Result<()> {
  let reader = open(path)?;

  let entries: Vec<EntryOutput> = reader
    .records()
    .iter()
    .map(|r| EntryOutput {
      name: r.name.clone(),
      kind: r.kind,
      size: r.uncompressed_len,
      stored: if r.external { 0 } else { r.compressed_len },
      compressed: r.compressed,
      package: r.package,
      sourceless: r.sourceless,
      external: r.external,
      checksum: r.checksum_hex(),
    })
    .collect();

  if output.is_json() {
    return print_json(&InspectOutput {
      archive: reader.path().to_path_buf(),
      start: reader.start(),
      python: reader.trailer().python,
      index_digest: hex::encode(reader.trailer().index_digest),
      entries,
    });
  }

  print_stat("Archive", &reader.path().display().to_string());
  print_stat("Starts at", &reader.start().to_string());
  if let Some(python) = reader.trailer().python {
    print_stat("Python", &python.to_string());
  }
  print_stat("Index digest", truncate_hash(&hex::encode(reader.trailer().index_digest)));
  println!();
  for entry in &entries {
    let flags = format!(
      "{}{}{}{}",
      if entry.compressed { "z" } else { "-" },
      if entry.package { "p" } else { "-" },
      if entry.sourceless { "c" } else { "-" },
      if entry.external { "x" } else { "-" }
    );
    println!(
      "{:<20} {flags} {:>10} {:>10}  {}",
      entry.kind.as_str(),
      format_bytes(entry.size),
      format_bytes(entry.stored),
      entry.name
    );
  }
  println!();
  print_info(&format!("{} entries", entries.len()));
  Ok(())
}
