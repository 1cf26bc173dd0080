//! Run-time resource resolution for a frozen bundle.
//!
//! This is the interpreter-facing side of the embedding contract. The
//! bootloader publishes exactly one environment marker, [`ENV_BUNDLE_DIR`],
//! pointing at the bundle root, and a [`ResourceMap`] manifest in that root.
//! An interpreter's import machinery loads the map once at start-up and asks it
//! for modules and data by logical name before falling back to its normal disk
//! search. Nothing here is global state: callers own the map they load.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;
use crate::format::{DIGEST_LEN, EntryKind, IndexRecord, digest};
use crate::python::PythonVersion;
use crate::reader::{ArchiveReader, decode_payload};

/// Environment variable naming the bundle root of a running frozen app.
pub const ENV_BUNDLE_DIR: &str = "PYBUNDLE_BUNDLE_DIR";

/// File name of the resource manifest inside the bundle root.
pub const MANIFEST_NAME: &str = ".pybundle-resources.json";

const MANIFEST_VERSION: u32 = 1;

/// A `path?offset` reference to bytes embedded inside a larger file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedRef {
  pub path: PathBuf,
  pub offset: u64,
}

impl EmbeddedRef {
  /// Split `path?offset`. A `?` that is not followed by a number is part of
  /// the path (Windows `\\?\` prefixes, for example), giving offset 0.
  pub fn parse(reference: &str) -> Self {
    if let Some((path, offset)) = reference.rsplit_once('?')
      && let Ok(offset) = offset.parse::<u64>()
    {
      return Self {
        path: PathBuf::from(path),
        offset,
      };
    }
    Self {
      path: PathBuf::from(reference),
      offset: 0,
    }
  }
}

impl fmt::Display for EmbeddedRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}?{}", self.path.display(), self.offset)
  }
}

/// Where the bytes of a resource live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "location", rename_all = "kebab-case")]
pub enum Location {
  /// A regular file, relative to the bundle root.
  File { path: PathBuf },
  /// Bytes inside an archive file, as `archive?offset` relative to the root.
  Archived {
    reference: String,
    length: u64,
    compressed: bool,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
  pub kind: EntryKind,
  #[serde(default)]
  pub package: bool,
  #[serde(default)]
  pub sourceless: bool,
  pub size: u64,
  pub checksum: String,
  #[serde(flatten)]
  pub location: Location,
}

/// Logical name -> location table for one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMap {
  pub version: u32,
  pub entry_point: Option<String>,
  pub interpreter: Option<String>,
  /// Interpreter version the bundle targets.
  #[serde(default)]
  pub python: Option<PythonVersion>,
  pub resources: BTreeMap<String, Resource>,
  #[serde(skip)]
  root: PathBuf,
}

impl ResourceMap {
  /// Map for an archive whose every entry was extracted below `root`.
  pub fn extracted(reader: &ArchiveReader, root: &Path) -> Result<Self, ArchiveError> {
    let mut map = Self::empty(reader, root);
    for record in reader.records() {
      let location = Location::File {
        path: record.relative_path()?,
      };
      map.insert(record, location);
    }
    Ok(map)
  }

  /// Map for an archive used in place: external records resolve to loose files
  /// below `root`, the rest to offsets inside `archive` (relative to `root`).
  pub fn mapped(reader: &ArchiveReader, root: &Path, archive: &Path) -> Result<Self, ArchiveError> {
    let mut map = Self::empty(reader, root);
    for record in reader.records() {
      let location = if record.external {
        Location::File {
          path: record.relative_path()?,
        }
      } else {
        let reference = EmbeddedRef {
          path: archive.to_path_buf(),
          offset: reader.absolute_offset(record),
        };
        Location::Archived {
          reference: reference.to_string(),
          length: record.compressed_len,
          compressed: record.compressed,
        }
      };
      map.insert(record, location);
    }
    Ok(map)
  }

  fn empty(reader: &ArchiveReader, root: &Path) -> Self {
    let records = reader.records();
    Self {
      version: MANIFEST_VERSION,
      entry_point: entry_point(records).map(|r| r.name.clone()),
      interpreter: records
        .iter()
        .find(|r| r.kind == EntryKind::EmbeddedInterpreter)
        .map(|r| r.name.clone()),
      python: reader.trailer().python,
      resources: BTreeMap::new(),
      root: root.to_path_buf(),
    }
  }

  fn insert(&mut self, record: &IndexRecord, location: Location) {
    self.resources.insert(
      record.name.clone(),
      Resource {
        kind: record.kind,
        package: record.package,
        sourceless: record.sourceless,
        size: record.uncompressed_len,
        checksum: record.checksum_hex(),
        location,
      },
    );
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Write the manifest into the bundle root.
  pub fn write(&self) -> Result<PathBuf, ArchiveError> {
    let path = self.root.join(MANIFEST_NAME);
    let json = serde_json::to_vec_pretty(self).map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
    fs::write(&path, json).map_err(|source| ArchiveError::Write {
      path: path.clone(),
      source,
    })?;
    Ok(path)
  }

  /// Load the manifest stored in `root`.
  pub fn load(root: &Path) -> Result<Self, ArchiveError> {
    let bytes = fs::read(root.join(MANIFEST_NAME))?;
    let mut map: Self = serde_json::from_slice(&bytes)
      .map_err(|e| ArchiveError::Corrupt(format!("resource manifest: {e}")))?;
    if map.version != MANIFEST_VERSION {
      return Err(ArchiveError::Corrupt(format!(
        "resource manifest version {} is not supported",
        map.version
      )));
    }
    map.root = root.to_path_buf();
    Ok(map)
  }

  /// Load the manifest of the bundle this process runs in, if any.
  pub fn from_env() -> Result<Option<Self>, ArchiveError> {
    match std::env::var_os(ENV_BUNDLE_DIR) {
      Some(root) => Self::load(Path::new(&root)).map(Some),
      None => Ok(None),
    }
  }

  pub fn resolve(&self, name: &str) -> Option<&Resource> {
    self.resources.get(name)
  }

  /// Absolute path of a resource that exists as a file.
  pub fn path_of(&self, name: &str) -> Option<PathBuf> {
    match &self.resolve(name)?.location {
      Location::File { path } => Some(self.root.join(path)),
      Location::Archived { .. } => None,
    }
  }

  /// Look a module up by dotted name: pure modules first, then extensions.
  pub fn find_module(&self, module: &str) -> Option<(&str, &Resource)> {
    if let Some((name, resource)) = self.resources.get_key_value(module)
      && resource.kind == EntryKind::PureModule
    {
      return Some((name.as_str(), resource));
    }
    self
      .resources
      .iter()
      .filter(|(_, r)| r.kind == EntryKind::ExtensionNative)
      .find(|(name, _)| extension_module_name(name).as_deref() == Some(module))
      .map(|(name, r)| (name.as_str(), r))
  }

  /// Read a resource's bytes, verifying its checksum.
  pub fn read(&self, name: &str) -> Result<Vec<u8>, ArchiveError> {
    let resource = self.resolve(name).ok_or_else(|| ArchiveError::NotFound(name.to_string()))?;
    let checksum = decode_checksum(name, &resource.checksum)?;

    match &resource.location {
      Location::File { path } => {
        let data = fs::read(self.root.join(path))?;
        if digest(&data) != checksum {
          return Err(ArchiveError::ChecksumMismatch { name: name.to_string() });
        }
        Ok(data)
      }
      Location::Archived {
        reference,
        length,
        compressed,
      } => {
        let reference = EmbeddedRef::parse(reference);
        let len = usize::try_from(*length).map_err(|_| ArchiveError::Corrupt(format!("entry '{name}' is too large")))?;
        let mut stored = vec![0u8; len];
        let mut file = File::open(self.root.join(&reference.path))?;
        file.seek(SeekFrom::Start(reference.offset))?;
        file.read_exact(&mut stored)?;

        let record = IndexRecord {
          name: name.to_string(),
          kind: resource.kind,
          compressed: *compressed,
          package: resource.package,
          external: false,
          sourceless: resource.sourceless,
          uncompressed_len: resource.size,
          compressed_len: *length,
          payload_offset: reference.offset,
          checksum,
        };
        decode_payload(&record, stored)
      }
    }
  }
}

/// The entry-point script: the first pure module in index order.
pub fn entry_point(records: &[IndexRecord]) -> Option<&IndexRecord> {
  records.iter().find(|r| r.kind == EntryKind::PureModule)
}

/// `pkg/fast.cpython-311-x86_64-linux-gnu.so` -> `pkg.fast`.
pub fn extension_module_name(logical: &str) -> Option<String> {
  let path = Path::new(logical);
  let file_name = path.file_name()?.to_str()?;
  let stem = file_name.split('.').next().filter(|s| !s.is_empty())?;
  let mut parts: Vec<String> = Vec::new();
  if let Some(parent) = path.parent() {
    for component in parent.components() {
      parts.push(component.as_os_str().to_str()?.to_string());
    }
  }
  parts.push(stem.to_string());
  Some(parts.join("."))
}

fn decode_checksum(name: &str, hex_digest: &str) -> Result<[u8; DIGEST_LEN], ArchiveError> {
  let bytes = hex::decode(hex_digest).map_err(|_| ArchiveError::Corrupt(format!("bad checksum for '{name}'")))?;
  let mut out = [0u8; DIGEST_LEN];
  if bytes.len() != DIGEST_LEN {
    return Err(ArchiveError::Corrupt(format!("bad checksum length for '{name}'")));
  }
  out.copy_from_slice(&bytes);
  Ok(out)
}
