use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while writing or reading an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("archive is truncated: {0}")]
  Truncated(String),

  #[error("no archive trailer found (bad magic)")]
  BadMagic,

  #[error("unsupported archive format version {0}")]
  UnsupportedVersion(u16),

  #[error("archive is corrupt: {0}")]
  Corrupt(String),

  #[error("checksum mismatch for entry '{name}'")]
  ChecksumMismatch { name: String },

  #[error("duplicate entry name '{0}'")]
  DuplicateEntry(String),

  #[error("entry not found: {0}")]
  NotFound(String),

  #[error("entry name '{0}' escapes the bundle root")]
  UnsafeName(String),

  #[error("entry '{0}' is stored outside the archive")]
  ExternalPayload(String),

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

impl ArchiveError {
  /// True when the error means the archive bytes themselves are damaged or
  /// missing, as opposed to an I/O failure on the host.
  pub fn is_corrupt(&self) -> bool {
    matches!(
      self,
      ArchiveError::Truncated(_)
        | ArchiveError::BadMagic
        | ArchiveError::UnsupportedVersion(_)
        | ArchiveError::Corrupt(_)
        | ArchiveError::ChecksumMismatch { .. }
        | ArchiveError::UnsafeName(_)
    )
  }
}
