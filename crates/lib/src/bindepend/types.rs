use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinaryFormat {
  Elf,
  MachO,
  Pe,
}

/// Linkage facts read from one native binary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryInfo {
  pub format: Option<BinaryFormat>,
  /// Machine/CPU identifiers as printed by the inspection tool. Fat Mach-O
  /// binaries list one per slice.
  pub machines: Vec<String>,
  /// `ELF32`/`ELF64` for ELF files.
  pub class: Option<String>,
  /// Linked library names, exactly as recorded in the binary.
  pub needed: Vec<String>,
  /// ELF `DT_RPATH` or Mach-O `LC_RPATH` entries.
  pub rpath: Vec<String>,
  /// ELF `DT_RUNPATH` entries.
  pub runpath: Vec<String>,
}

/// A native library resolved on the build host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLibrary {
  /// Name the library is bundled under (its file name as linked).
  pub name: String,
  pub path: PathBuf,
  /// Binary whose linkage pulled this library in.
  pub needed_by: PathBuf,
}

/// A non-fatal problem scanning one binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanWarning {
  pub binary: PathBuf,
  pub message: String,
}

/// Outcome of scanning a set of binaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
  /// Libraries in discovery order, one per bundled name.
  pub libraries: Vec<ResolvedLibrary>,
  pub warnings: Vec<ScanWarning>,
}

#[derive(Debug, Error)]
pub enum ScanError {
  #[error("library '{library}' needed by {needed_by} cannot be found", needed_by = .needed_by.display())]
  UnresolvedLibrary { library: String, needed_by: PathBuf },

  #[error(
    "library '{name}' resolves to both {first} and {second}",
    first = .first.display(),
    second = .second.display()
  )]
  LibraryCollision {
    name: String,
    first: PathBuf,
    second: PathBuf,
  },

  #[error("{path} is built for {found}, not {expected}", path = .path.display())]
  AbiMismatch {
    path: PathBuf,
    found: String,
    expected: String,
  },

  #[error("required tool '{tool}' is not installed")]
  ToolMissing { tool: String },

  #[error("{tool} timed out after {}s", .timeout.as_secs())]
  Timeout { tool: String, timeout: Duration },

  #[error("{tool} failed on {path}: {message}", path = .path.display())]
  ToolFailed {
    tool: String,
    path: PathBuf,
    message: String,
  },

  #[error("failed to run {tool}: {source}")]
  Spawn {
    tool: String,
    #[source]
    source: io::Error,
  },

  #[error("cannot read {path}: {source}", path = .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Cache(#[from] CacheError),
}

impl ScanError {
  /// Errors confined to one binary; the rest of the scan carries on.
  pub fn is_local(&self) -> bool {
    matches!(self, Self::Timeout { .. } | Self::ToolFailed { .. })
  }
}
