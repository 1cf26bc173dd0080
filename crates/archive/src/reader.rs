//! Random-access archive reading.
//!
//! The reader locates the trailer from the end of the file, checks the index
//! digest and validates every record's bounds before handing anything out.
//! All offsets are checked arithmetic; a damaged archive produces an error,
//! never an out-of-bounds read.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use tracing::debug;

use crate::error::ArchiveError;
use crate::format::{Cursor, IndexRecord, TRAILER_LEN, Trailer, digest};
use crate::resources::EmbeddedRef;

pub struct ArchiveReader {
  path: PathBuf,
  file: File,
  start: u64,
  trailer: Trailer,
  records: Vec<IndexRecord>,
  by_name: HashMap<String, usize>,
}

impl std::fmt::Debug for ArchiveReader {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ArchiveReader")
      .field("path", &self.path)
      .field("start", &self.start)
      .field("entries", &self.records.len())
      .finish()
  }
}

impl ArchiveReader {
  /// Open the archive that ends at the end of `path`.
  ///
  /// Works for standalone archives and for archives appended to a launcher.
  pub fn open(path: &Path) -> Result<Self, ArchiveError> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    if file_len < TRAILER_LEN as u64 {
      return Err(ArchiveError::Truncated(format!(
        "{} is {file_len} bytes, smaller than a trailer",
        path.display()
      )));
    }

    let mut raw = [0u8; TRAILER_LEN];
    file.seek(SeekFrom::Start(file_len - TRAILER_LEN as u64))?;
    file.read_exact(&mut raw)?;
    let trailer = Trailer::decode(&raw)?;

    let archive_len = trailer
      .archive_len()
      .filter(|len| *len <= file_len)
      .ok_or_else(|| ArchiveError::Corrupt("trailer offsets point outside the file".to_string()))?;
    let start = file_len - archive_len;

    let index_len = usize::try_from(trailer.index_length)
      .map_err(|_| ArchiveError::Corrupt("index length does not fit in memory".to_string()))?;
    let mut index = vec![0u8; index_len];
    file.seek(SeekFrom::Start(start + trailer.index_offset))?;
    file.read_exact(&mut index)?;

    if digest(&index) != trailer.index_digest {
      return Err(ArchiveError::Corrupt("index digest mismatch".to_string()));
    }

    let records = parse_index(&index, &trailer)?;
    let mut by_name = HashMap::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
      if by_name.insert(record.name.clone(), i).is_some() {
        return Err(ArchiveError::Corrupt(format!("duplicate entry '{}'", record.name)));
      }
    }

    debug!(path = %path.display(), start, entries = records.len(), "opened archive");

    Ok(Self {
      path: path.to_path_buf(),
      file,
      start,
      trailer,
      records,
      by_name,
    })
  }

  /// Open an archive addressed as `path?offset`, requiring it to start at
  /// exactly that offset.
  pub fn open_at(reference: &EmbeddedRef) -> Result<Self, ArchiveError> {
    let reader = Self::open(&reference.path)?;
    if reader.start != reference.offset {
      return Err(ArchiveError::Corrupt(format!(
        "archive in {} starts at {}, not {}",
        reference.path.display(),
        reader.start,
        reference.offset
      )));
    }
    Ok(reader)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Absolute file offset of the first payload byte.
  pub fn start(&self) -> u64 {
    self.start
  }

  pub fn trailer(&self) -> &Trailer {
    &self.trailer
  }

  pub fn records(&self) -> &[IndexRecord] {
    &self.records
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  /// Logical names in index order.
  pub fn contents(&self) -> Vec<&str> {
    self.records.iter().map(|r| r.name.as_str()).collect()
  }

  pub fn get(&self, name: &str) -> Option<&IndexRecord> {
    self.by_name.get(name).map(|&i| &self.records[i])
  }

  /// Absolute offset of a record's payload within the file.
  pub fn absolute_offset(&self, record: &IndexRecord) -> u64 {
    self.start + record.payload_offset
  }

  /// Raw stored bytes (possibly compressed) of an in-archive record.
  pub fn read_stored(&self, record: &IndexRecord) -> Result<Vec<u8>, ArchiveError> {
    if record.external {
      return Err(ArchiveError::ExternalPayload(record.name.clone()));
    }
    let len = usize::try_from(record.compressed_len)
      .map_err(|_| ArchiveError::Corrupt(format!("entry '{}' is too large", record.name)))?;
    let mut buf = vec![0u8; len];
    let mut file = &self.file;
    file.seek(SeekFrom::Start(self.absolute_offset(record)))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
  }

  /// Decompressed, checksum-verified bytes of an in-archive record.
  pub fn read(&self, record: &IndexRecord) -> Result<Vec<u8>, ArchiveError> {
    let stored = self.read_stored(record)?;
    decode_payload(record, stored)
  }

  pub fn read_named(&self, name: &str) -> Result<Vec<u8>, ArchiveError> {
    let record = self.get(name).ok_or_else(|| ArchiveError::NotFound(name.to_string()))?;
    self.read(record)
  }

  /// Write one record below `root`, returning the written path.
  pub fn extract(&self, record: &IndexRecord, root: &Path) -> Result<PathBuf, ArchiveError> {
    let data = self.read(record)?;
    let dest = root.join(record.relative_path()?);
    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent).map_err(|source| ArchiveError::Write {
        path: parent.to_path_buf(),
        source,
      })?;
    }
    fs::write(&dest, &data).map_err(|source| ArchiveError::Write {
      path: dest.clone(),
      source,
    })?;
    if record.kind.is_native() {
      make_executable(&dest)?;
    }
    Ok(dest)
  }

  /// Extract every in-archive record below `root`, in index order.
  pub fn extract_all(&self, root: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    self
      .records
      .iter()
      .filter(|r| !r.external)
      .map(|r| self.extract(r, root))
      .collect()
  }
}

/// Decompress (if needed) and verify stored bytes against their record.
pub fn decode_payload(record: &IndexRecord, stored: Vec<u8>) -> Result<Vec<u8>, ArchiveError> {
  let data = if record.compressed {
    let limit = record.uncompressed_len.saturating_add(1);
    let mut out = Vec::new();
    ZlibDecoder::new(stored.as_slice())
      .take(limit)
      .read_to_end(&mut out)
      .map_err(|e| ArchiveError::Corrupt(format!("entry '{}' fails to decompress: {e}", record.name)))?;
    out
  } else {
    stored
  };

  if data.len() as u64 != record.uncompressed_len {
    return Err(ArchiveError::Corrupt(format!(
      "entry '{}' has {} bytes, index says {}",
      record.name,
      data.len(),
      record.uncompressed_len
    )));
  }
  if digest(&data) != record.checksum {
    return Err(ArchiveError::ChecksumMismatch {
      name: record.name.clone(),
    });
  }
  Ok(data)
}

fn parse_index(index: &[u8], trailer: &Trailer) -> Result<Vec<IndexRecord>, ArchiveError> {
  let mut cursor = Cursor::new(index);
  let mut records = Vec::new();

  for _ in 0..trailer.entry_count {
    let record = IndexRecord::decode(&mut cursor)?;
    record.relative_path()?;
    if !record.external {
      let end = record
        .payload_offset
        .checked_add(record.compressed_len)
        .ok_or_else(|| ArchiveError::Corrupt(format!("entry '{}' offset overflows", record.name)))?;
      if end > trailer.index_offset {
        return Err(ArchiveError::Corrupt(format!(
          "entry '{}' extends past the payload segment",
          record.name
        )));
      }
      if !record.compressed && record.compressed_len != record.uncompressed_len {
        return Err(ArchiveError::Corrupt(format!(
          "stored entry '{}' has mismatched lengths",
          record.name
        )));
      }
    }
    records.push(record);
  }

  if cursor.remaining() != 0 {
    return Err(ArchiveError::Corrupt(format!(
      "{} unexpected bytes after the last index record",
      cursor.remaining()
    )));
  }
  Ok(records)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), ArchiveError> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|source| ArchiveError::Write {
    path: path.to_path_buf(),
    source,
  })
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), ArchiveError> {
  Ok(())
}
