use std::io;
use std::path::PathBuf;

use pybundle_archive::{ArchiveError, PythonVersion};
use thiserror::Error;

/// Exit code for a missing or damaged archive.
pub const EXIT_ARCHIVE_CORRUPT: i32 = 250;

/// Exit code for a failure while unpacking the archive.
pub const EXIT_EXTRACTION_FAILED: i32 = 251;

/// Exit code for an interpreter that cannot be found or started.
pub const EXIT_INTERPRETER_FAILED: i32 = 252;

/// Fatal run-time failures. Messages stay short: the person reading them runs
/// the app, they did not build it.
#[derive(Debug, Error)]
pub enum BootError {
  #[error("cannot locate own executable: {0}")]
  Executable(#[source] io::Error),

  #[error("bundle archive in {path} is missing or damaged: {source}", path = .path.display())]
  ArchiveCorrupt {
    path: PathBuf,
    #[source]
    source: ArchiveError,
  },

  #[error("bundle has no entry script")]
  NoEntryPoint,

  #[error("cannot unpack bundle: {0}")]
  Extraction(#[source] ArchiveError),

  #[error("cannot create extraction directory in {path}: {source}", path = .path.display())]
  TempDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("bundle has no interpreter and none was found on PATH")]
  NoInterpreter,

  #[error("bundle needs python {required} and no matching interpreter was found on PATH")]
  InterpreterMismatch { required: PythonVersion },

  #[error("cannot start interpreter {path}: {source}", path = .path.display())]
  InterpreterLoad {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl BootError {
  /// The process exit code reserved for this failure class.
  pub fn exit_code(&self) -> i32 {
    match self {
      BootError::Executable(_) | BootError::ArchiveCorrupt { .. } | BootError::NoEntryPoint => EXIT_ARCHIVE_CORRUPT,
      BootError::Extraction(_) | BootError::TempDir { .. } => EXIT_EXTRACTION_FAILED,
      BootError::NoInterpreter | BootError::InterpreterMismatch { .. } | BootError::InterpreterLoad { .. } => {
        EXIT_INTERPRETER_FAILED
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn failure_classes_have_distinct_codes() {
    let corrupt = BootError::ArchiveCorrupt {
      path: PathBuf::from("app"),
      source: ArchiveError::BadMagic,
    };
    let extraction = BootError::Extraction(ArchiveError::ChecksumMismatch { name: "x".to_string() });
    let interpreter = BootError::NoInterpreter;
    let mismatch = BootError::InterpreterMismatch {
      required: PythonVersion::new(3, 12),
    };

    assert_eq!(corrupt.exit_code(), 250);
    assert_eq!(extraction.exit_code(), 251);
    assert_eq!(interpreter.exit_code(), 252);
    assert_eq!(mismatch.exit_code(), 252);
    assert!(mismatch.to_string().contains("python 3.12"));
  }
}
