//! Append-only archive construction.
//!
//! Entries are written in the order they are added; the index and trailer are
//! only written by [`ArchiveWriter::finish`], so an interrupted write leaves a
//! file without a trailer, which readers reject outright.

use std::collections::HashSet;
use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use serde::Serialize;

use crate::error::ArchiveError;
use crate::format::{COMPRESSION_LEVEL, DIGEST_LEN, EntryKind, FORMAT_VERSION, IndexRecord, Trailer, digest, flags};
use crate::python::PythonVersion;

/// How a single entry should be stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryOptions {
  pub compress: bool,
  pub package: bool,
  pub external: bool,
  pub sourceless: bool,
}

/// An entry whose checksum and (optional) compression are already computed.
///
/// Preparation is pure and independent per entry, so callers may prepare in
/// parallel and add the results to the writer in a fixed order.
#[derive(Debug, Clone)]
pub struct PreparedEntry {
  pub name: String,
  pub kind: EntryKind,
  pub package: bool,
  pub sourceless: bool,
  pub compressed: bool,
  pub external: bool,
  pub uncompressed_len: u64,
  pub checksum: [u8; DIGEST_LEN],
  pub stored: Vec<u8>,
}

/// Checksum and optionally compress `data`.
pub fn prepare_entry(name: &str, kind: EntryKind, data: &[u8], options: EntryOptions) -> Result<PreparedEntry, ArchiveError> {
  let checksum = digest(data);
  let stored = if options.external {
    Vec::new()
  } else if options.compress {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(COMPRESSION_LEVEL));
    encoder.write_all(data)?;
    encoder.finish()?
  } else {
    data.to_vec()
  };

  Ok(PreparedEntry {
    name: name.to_string(),
    kind,
    package: options.package,
    sourceless: options.sourceless,
    compressed: options.compress && !options.external,
    external: options.external,
    uncompressed_len: data.len() as u64,
    checksum,
    stored,
  })
}

/// Figures describing a finished archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
  pub entry_count: u32,
  pub payload_len: u64,
  pub index_len: u64,
  pub archive_len: u64,
  pub index_digest: String,
}

pub struct ArchiveWriter<W: Write> {
  out: W,
  position: u64,
  records: Vec<IndexRecord>,
  names: HashSet<String>,
  python: Option<PythonVersion>,
}

impl<W: Write> ArchiveWriter<W> {
  pub fn new(out: W) -> Self {
    Self {
      out,
      position: 0,
      records: Vec::new(),
      names: HashSet::new(),
      python: None,
    }
  }

  /// Record the interpreter version the bundle targets in the trailer.
  pub fn with_python(mut self, python: Option<PythonVersion>) -> Self {
    self.python = python;
    self
  }

  /// Convenience wrapper around [`prepare_entry`] + [`ArchiveWriter::add_prepared`].
  pub fn add(&mut self, name: &str, kind: EntryKind, data: &[u8], options: EntryOptions) -> Result<(), ArchiveError> {
    let prepared = prepare_entry(name, kind, data, options)?;
    self.add_prepared(prepared)
  }

  pub fn add_prepared(&mut self, entry: PreparedEntry) -> Result<(), ArchiveError> {
    if !self.names.insert(entry.name.clone()) {
      return Err(ArchiveError::DuplicateEntry(entry.name));
    }
    crate::format::relative_path_for(&entry.name, entry.kind, flags::layout(entry.package, entry.sourceless))?;

    let payload_offset = self.position;
    let stored_len = entry.stored.len() as u64;
    if !entry.external {
      self.out.write_all(&entry.stored)?;
      self.position += stored_len;
    }

    self.records.push(IndexRecord {
      name: entry.name,
      kind: entry.kind,
      compressed: entry.compressed,
      package: entry.package,
      external: entry.external,
      sourceless: entry.sourceless,
      uncompressed_len: entry.uncompressed_len,
      compressed_len: if entry.external { 0 } else { stored_len },
      payload_offset: if entry.external { 0 } else { payload_offset },
      checksum: entry.checksum,
    });
    Ok(())
  }

  pub fn records(&self) -> &[IndexRecord] {
    &self.records
  }

  /// Write the index and the trailer, returning the underlying writer.
  pub fn finish(mut self) -> Result<(W, ArchiveSummary), ArchiveError> {
    let mut index = Vec::new();
    for record in &self.records {
      record.encode_into(&mut index)?;
    }
    let entry_count =
      u32::try_from(self.records.len()).map_err(|_| ArchiveError::Corrupt("too many entries".to_string()))?;
    let index_digest = digest(&index);
    let trailer = Trailer {
      version: FORMAT_VERSION,
      python: self.python,
      entry_count,
      index_offset: self.position,
      index_length: index.len() as u64,
      index_digest,
    };

    self.out.write_all(&index)?;
    self.out.write_all(&trailer.encode())?;
    self.out.flush()?;

    let summary = ArchiveSummary {
      entry_count,
      payload_len: self.position,
      index_len: index.len() as u64,
      archive_len: trailer.archive_len().unwrap_or(u64::MAX),
      index_digest: hex::encode(index_digest),
    };
    Ok((self.out, summary))
  }
}
