//! Binary layout of the archive.
//!
//! An archive is three consecutive segments:
//!
//! ```text
//! [payload bytes ...][index records ...][trailer (64 bytes)]
//! ```
//!
//! All integers are big-endian. Offsets stored in the index and the trailer are
//! relative to the first payload byte (the archive start). Because the index
//! directly follows the payload and the trailer directly follows the index, the
//! archive start can always be derived from the trailer position alone:
//! `start = trailer_pos - index_offset - index_length`. Prepending a launcher
//! to the archive is therefore a pure byte-append.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ArchiveError;
use crate::python::PythonVersion;

/// Trailer magic.
pub const MAGIC: [u8; 8] = *b"PYBNDL\r\n";

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

/// Size of the fixed trailer at the end of the file.
pub const TRAILER_LEN: usize = 64;

/// zlib level used for compressed entries.
pub const COMPRESSION_LEVEL: u32 = 6;

/// Size of a SHA-256 digest.
pub const DIGEST_LEN: usize = 32;

/// Fixed bytes in an index record, excluding the name itself.
const RECORD_FIXED_LEN: usize = 2 + 1 + 1 + 8 + 8 + 8 + DIGEST_LEN;

/// What an archive entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
  PureModule,
  ExtensionNative,
  Data,
  BinaryDependency,
  EmbeddedInterpreter,
}

impl EntryKind {
  pub fn tag(self) -> u8 {
    match self {
      EntryKind::PureModule => 1,
      EntryKind::ExtensionNative => 2,
      EntryKind::Data => 3,
      EntryKind::BinaryDependency => 4,
      EntryKind::EmbeddedInterpreter => 5,
    }
  }

  pub fn from_tag(tag: u8) -> Option<Self> {
    match tag {
      1 => Some(EntryKind::PureModule),
      2 => Some(EntryKind::ExtensionNative),
      3 => Some(EntryKind::Data),
      4 => Some(EntryKind::BinaryDependency),
      5 => Some(EntryKind::EmbeddedInterpreter),
      _ => None,
    }
  }

  /// Kinds the operating system loads directly and which must therefore exist
  /// as real files at run time.
  pub fn is_native(self) -> bool {
    matches!(
      self,
      EntryKind::ExtensionNative | EntryKind::BinaryDependency | EntryKind::EmbeddedInterpreter
    )
  }

  pub fn as_str(self) -> &'static str {
    match self {
      EntryKind::PureModule => "pure-module",
      EntryKind::ExtensionNative => "extension-native",
      EntryKind::Data => "data",
      EntryKind::BinaryDependency => "binary-dependency",
      EntryKind::EmbeddedInterpreter => "embedded-interpreter",
    }
  }
}

impl fmt::Display for EntryKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Per-entry flag bits.
pub mod flags {
  pub const COMPRESSED: u8 = 0b0000_0001;
  pub const PACKAGE: u8 = 0b0000_0010;
  pub const EXTERNAL: u8 = 0b0000_0100;
  /// Pure module stored as compiled bytecode (`.pyc`) instead of source.
  pub const SOURCELESS: u8 = 0b0000_1000;
  pub const KNOWN: u8 = COMPRESSED | PACKAGE | EXTERNAL | SOURCELESS;

  /// The bits that decide where a pure module lives on disk.
  pub fn layout(package: bool, sourceless: bool) -> u8 {
    let mut bits = 0;
    if package {
      bits |= PACKAGE;
    }
    if sourceless {
      bits |= SOURCELESS;
    }
    bits
  }
}

/// One fixed-layout index record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
  pub name: String,
  pub kind: EntryKind,
  pub compressed: bool,
  pub package: bool,
  /// Payload lives next to the archive at [`IndexRecord::relative_path`].
  pub external: bool,
  pub sourceless: bool,
  pub uncompressed_len: u64,
  pub compressed_len: u64,
  pub payload_offset: u64,
  pub checksum: [u8; DIGEST_LEN],
}

impl IndexRecord {
  fn flag_bits(&self) -> u8 {
    let mut bits = flags::layout(self.package, self.sourceless);
    if self.compressed {
      bits |= flags::COMPRESSED;
    }
    if self.external {
      bits |= flags::EXTERNAL;
    }
    bits
  }

  /// Number of payload bytes this record occupies inside the archive.
  pub fn stored_len(&self) -> u64 {
    if self.external { 0 } else { self.compressed_len }
  }

  pub fn checksum_hex(&self) -> String {
    hex::encode(self.checksum)
  }

  /// File-system location of the entry relative to the bundle root.
  ///
  /// Pure modules are stored under their dotted name (`pkg.mod`) and map to
  /// `pkg/mod.py`, or `pkg/mod/__init__.py` for packages (`.pyc` when
  /// sourceless). Every other kind is already named by its relative path.
  pub fn relative_path(&self) -> Result<PathBuf, ArchiveError> {
    relative_path_for(&self.name, self.kind, flags::layout(self.package, self.sourceless))
  }

  pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), ArchiveError> {
    let name = self.name.as_bytes();
    let name_len = u16::try_from(name.len()).map_err(|_| ArchiveError::Corrupt(format!("entry name too long: {}", self.name)))?;
    out.extend_from_slice(&name_len.to_be_bytes());
    out.extend_from_slice(name);
    out.push(self.kind.tag());
    out.push(self.flag_bits());
    out.extend_from_slice(&self.uncompressed_len.to_be_bytes());
    out.extend_from_slice(&self.compressed_len.to_be_bytes());
    out.extend_from_slice(&self.payload_offset.to_be_bytes());
    out.extend_from_slice(&self.checksum);
    Ok(())
  }

  /// Decode one record from the front of `cursor`.
  pub fn decode(cursor: &mut Cursor<'_>) -> Result<Self, ArchiveError> {
    let name_len = usize::from(cursor.u16()?);
    let name_bytes = cursor.take(name_len)?;
    let name = std::str::from_utf8(name_bytes)
      .map_err(|_| ArchiveError::Corrupt("entry name is not valid UTF-8".to_string()))?
      .to_string();
    let kind_tag = cursor.u8()?;
    let kind = EntryKind::from_tag(kind_tag)
      .ok_or_else(|| ArchiveError::Corrupt(format!("unknown entry kind {kind_tag} for '{name}'")))?;
    let bits = cursor.u8()?;
    if bits & !flags::KNOWN != 0 {
      return Err(ArchiveError::Corrupt(format!("unknown flags {bits:#04x} for '{name}'")));
    }
    let uncompressed_len = cursor.u64()?;
    let compressed_len = cursor.u64()?;
    let payload_offset = cursor.u64()?;
    let mut checksum = [0u8; DIGEST_LEN];
    checksum.copy_from_slice(cursor.take(DIGEST_LEN)?);

    Ok(IndexRecord {
      name,
      kind,
      compressed: bits & flags::COMPRESSED != 0,
      package: bits & flags::PACKAGE != 0,
      external: bits & flags::EXTERNAL != 0,
      sourceless: bits & flags::SOURCELESS != 0,
      uncompressed_len,
      compressed_len,
      payload_offset,
      checksum,
    })
  }

  /// Encoded size of this record in bytes.
  pub fn encoded_len(&self) -> usize {
    RECORD_FIXED_LEN + self.name.len()
  }
}

/// The fixed-size block at the very end of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
  pub version: u16,
  /// Interpreter the bundle was built for, when the builder knew it.
  pub python: Option<PythonVersion>,
  pub entry_count: u32,
  pub index_offset: u64,
  pub index_length: u64,
  pub index_digest: [u8; DIGEST_LEN],
}

impl Trailer {
  pub fn encode(&self) -> [u8; TRAILER_LEN] {
    let mut out = [0u8; TRAILER_LEN];
    out[0..8].copy_from_slice(&MAGIC);
    out[8..10].copy_from_slice(&self.version.to_be_bytes());
    out[10..12].copy_from_slice(&PythonVersion::encode(self.python).to_be_bytes());
    out[12..16].copy_from_slice(&self.entry_count.to_be_bytes());
    out[16..24].copy_from_slice(&self.index_offset.to_be_bytes());
    out[24..32].copy_from_slice(&self.index_length.to_be_bytes());
    out[32..64].copy_from_slice(&self.index_digest);
    out
  }

  pub fn decode(bytes: &[u8]) -> Result<Self, ArchiveError> {
    if bytes.len() != TRAILER_LEN {
      return Err(ArchiveError::Truncated(format!(
        "trailer needs {TRAILER_LEN} bytes, found {}",
        bytes.len()
      )));
    }
    let mut cursor = Cursor::new(bytes);
    if cursor.take(MAGIC.len())? != MAGIC {
      return Err(ArchiveError::BadMagic);
    }
    let version = cursor.u16()?;
    if version != FORMAT_VERSION {
      return Err(ArchiveError::UnsupportedVersion(version));
    }
    let python = PythonVersion::decode(cursor.u16()?);
    let entry_count = cursor.u32()?;
    let index_offset = cursor.u64()?;
    let index_length = cursor.u64()?;
    let mut index_digest = [0u8; DIGEST_LEN];
    index_digest.copy_from_slice(cursor.take(DIGEST_LEN)?);

    Ok(Trailer {
      version,
      python,
      entry_count,
      index_offset,
      index_length,
      index_digest,
    })
  }

  /// Total archive length (payload + index + trailer).
  pub fn archive_len(&self) -> Option<u64> {
    self
      .index_offset
      .checked_add(self.index_length)?
      .checked_add(TRAILER_LEN as u64)
  }
}

/// Bounds-checked big-endian reader over a byte slice.
///
/// Every read either returns the requested bytes or a `Truncated` error;
/// it never indexes past the end of the slice.
pub struct Cursor<'a> {
  bytes: &'a [u8],
  pos: usize,
}

impl<'a> Cursor<'a> {
  pub fn new(bytes: &'a [u8]) -> Self {
    Self { bytes, pos: 0 }
  }

  pub fn remaining(&self) -> usize {
    self.bytes.len() - self.pos
  }

  pub fn take(&mut self, len: usize) -> Result<&'a [u8], ArchiveError> {
    let end = self
      .pos
      .checked_add(len)
      .filter(|end| *end <= self.bytes.len())
      .ok_or_else(|| ArchiveError::Truncated(format!("needed {len} bytes at offset {}", self.pos)))?;
    let slice = &self.bytes[self.pos..end];
    self.pos = end;
    Ok(slice)
  }

  pub fn u8(&mut self) -> Result<u8, ArchiveError> {
    Ok(self.take(1)?[0])
  }

  pub fn u16(&mut self) -> Result<u16, ArchiveError> {
    let mut buf = [0u8; 2];
    buf.copy_from_slice(self.take(2)?);
    Ok(u16::from_be_bytes(buf))
  }

  pub fn u32(&mut self) -> Result<u32, ArchiveError> {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(self.take(4)?);
    Ok(u32::from_be_bytes(buf))
  }

  pub fn u64(&mut self) -> Result<u64, ArchiveError> {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(self.take(8)?);
    Ok(u64::from_be_bytes(buf))
  }
}

/// SHA-256 of `data`.
pub fn digest(data: &[u8]) -> [u8; DIGEST_LEN] {
  let mut out = [0u8; DIGEST_LEN];
  out.copy_from_slice(&Sha256::digest(data));
  out
}

/// Map a logical name to its path below the bundle root.
///
/// `layout` carries the [`flags::PACKAGE`] and [`flags::SOURCELESS`] bits of
/// the entry; other bits are ignored.
pub fn relative_path_for(name: &str, kind: EntryKind, layout: u8) -> Result<PathBuf, ArchiveError> {
  let path = if kind == EntryKind::PureModule {
    if name.is_empty() || name.split('.').any(|part| part.is_empty()) || name.contains(['/', '\\']) {
      return Err(ArchiveError::UnsafeName(name.to_string()));
    }
    let extension = if layout & flags::SOURCELESS != 0 { "pyc" } else { "py" };
    let mut path: PathBuf = name.split('.').collect();
    if layout & flags::PACKAGE != 0 {
      path.push("__init__");
    }
    path.set_extension(extension);
    path
  } else {
    PathBuf::from(name)
  };
  validate_relative(&path).map_err(|_| ArchiveError::UnsafeName(name.to_string()))?;
  Ok(path)
}

/// Reject paths that are absolute or climb out of their root.
pub fn validate_relative(path: &Path) -> Result<(), ArchiveError> {
  if path.as_os_str().is_empty() {
    return Err(ArchiveError::UnsafeName(String::new()));
  }
  for component in path.components() {
    match component {
      Component::Normal(_) => {}
      Component::CurDir => {}
      _ => return Err(ArchiveError::UnsafeName(path.display().to_string())),
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_record() -> IndexRecord {
    IndexRecord {
      name: "pkg.mod".to_string(),
      kind: EntryKind::PureModule,
      compressed: true,
      package: false,
      external: false,
      sourceless: false,
      uncompressed_len: 120,
      compressed_len: 80,
      payload_offset: 16,
      checksum: digest(b"payload"),
    }
  }

  #[test]
  fn trailer_is_fixed_size_and_starts_with_magic() {
    let trailer = Trailer {
      version: FORMAT_VERSION,
      python: Some(PythonVersion::new(3, 12)),
      entry_count: 3,
      index_offset: 100,
      index_length: 40,
      index_digest: digest(b"index"),
    };
    let bytes = trailer.encode();
    assert_eq!(bytes.len(), TRAILER_LEN);
    assert_eq!(&bytes[..8], &MAGIC);
    assert_eq!(Trailer::decode(&bytes).unwrap(), trailer);
    assert_eq!(trailer.archive_len(), Some(100 + 40 + 64));
    assert_eq!(&bytes[10..12], &[3, 12]);
  }

  #[test]
  fn trailer_rejects_wrong_magic_and_version() {
    let mut bytes = Trailer {
      version: FORMAT_VERSION,
      python: None,
      entry_count: 0,
      index_offset: 0,
      index_length: 0,
      index_digest: [0; DIGEST_LEN],
    }
    .encode();

    let mut bad_magic = bytes;
    bad_magic[0] = b'X';
    assert!(matches!(Trailer::decode(&bad_magic), Err(ArchiveError::BadMagic)));

    bytes[8..10].copy_from_slice(&99u16.to_be_bytes());
    assert!(matches!(Trailer::decode(&bytes), Err(ArchiveError::UnsupportedVersion(99))));
  }

  #[test]
  fn record_encoding_has_documented_length() {
    let record = sample_record();
    let mut buf = Vec::new();
    record.encode_into(&mut buf).unwrap();
    assert_eq!(buf.len(), record.encoded_len());

    let mut cursor = Cursor::new(&buf);
    assert_eq!(IndexRecord::decode(&mut cursor).unwrap(), record);
    assert_eq!(cursor.remaining(), 0);
  }

  #[test]
  fn truncated_record_reports_truncation() {
    let mut buf = Vec::new();
    sample_record().encode_into(&mut buf).unwrap();
    buf.pop();
    let mut cursor = Cursor::new(&buf);
    assert!(matches!(
      IndexRecord::decode(&mut cursor),
      Err(ArchiveError::Truncated(_))
    ));
  }

  #[test]
  fn unknown_kind_tag_is_corrupt() {
    let mut buf = Vec::new();
    sample_record().encode_into(&mut buf).unwrap();
    // kind tag sits right after the 2-byte length and the name
    let kind_pos = 2 + "pkg.mod".len();
    buf[kind_pos] = 42;
    let mut cursor = Cursor::new(&buf);
    assert!(matches!(IndexRecord::decode(&mut cursor), Err(ArchiveError::Corrupt(_))));
  }

  #[test]
  fn module_names_map_to_source_paths() {
    assert_eq!(
      relative_path_for("pkg.mod", EntryKind::PureModule, 0).unwrap(),
      PathBuf::from("pkg").join("mod.py")
    );
    assert_eq!(
      relative_path_for("pkg", EntryKind::PureModule, flags::PACKAGE).unwrap(),
      PathBuf::from("pkg").join("__init__.py")
    );
    assert_eq!(
      relative_path_for("lib/libz.so.1", EntryKind::BinaryDependency, 0).unwrap(),
      PathBuf::from("lib/libz.so.1")
    );
  }

  #[test]
  fn sourceless_modules_map_to_bytecode_paths() {
    assert_eq!(
      relative_path_for("pkg.mod", EntryKind::PureModule, flags::SOURCELESS).unwrap(),
      PathBuf::from("pkg").join("mod.pyc")
    );
    assert_eq!(
      relative_path_for("pkg", EntryKind::PureModule, flags::layout(true, true)).unwrap(),
      PathBuf::from("pkg").join("__init__.pyc")
    );

    let mut record = sample_record();
    record.sourceless = true;
    let mut buf = Vec::new();
    record.encode_into(&mut buf).unwrap();
    let decoded = IndexRecord::decode(&mut Cursor::new(&buf)).unwrap();
    assert!(decoded.sourceless);
    assert_eq!(decoded.relative_path().unwrap(), PathBuf::from("pkg").join("mod.pyc"));
  }

  #[test]
  fn escaping_names_are_rejected() {
    assert!(relative_path_for("../evil", EntryKind::Data, 0).is_err());
    assert!(relative_path_for("/etc/passwd", EntryKind::Data, 0).is_err());
    assert!(relative_path_for("a..b", EntryKind::PureModule, 0).is_err());
    assert!(relative_path_for("", EntryKind::Data, 0).is_err());
  }
}
