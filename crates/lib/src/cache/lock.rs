//! File-based cache locking for single-writer access.
//!
//! The lock is a file created with `create_new`: it either did not exist and
//! is now ours, or somebody else holds it. A lock left behind by a crashed
//! build is indistinguishable from a live one, so both refuse the new build
//! and the user is told which file to remove.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const LOCK_FILENAME: &str = ".lock";
const LOCK_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub cache: PathBuf,
}

#[derive(Debug, Error)]
pub enum CacheLockError {
  #[error(
    "Build cache is locked by another build: {command} (PID {pid}, started {started_at})\n\
             If you're sure no pybundle process is running, remove the lock file:\n  {lock_path}",
    lock_path = .lock_path.display()
  )]
  Contention {
    command: String,
    pid: u32,
    started_at: String,
    lock_path: PathBuf,
  },

  #[error(
    "Build cache is locked (could not read lock metadata)\n\
             If you're sure no pybundle process is running, remove the lock file:\n  {lock_path}",
    lock_path = .lock_path.display()
  )]
  ContentionUnknown { lock_path: PathBuf },

  #[error("Failed to create cache directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("Failed to create lock file: {0}")]
  CreateFile(#[source] io::Error),

  #[error("Failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),
}

/// Exclusive hold on a cache directory, released on drop.
#[derive(Debug)]
pub struct CacheLock {
  lock_path: PathBuf,
}

impl CacheLock {
  pub fn acquire(cache: &Path, command: &str) -> Result<Self, CacheLockError> {
    let lock_path = cache.join(LOCK_FILENAME);

    if !cache.exists() {
      fs::create_dir_all(cache).map_err(CacheLockError::CreateDir)?;
    }

    let file = match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
      Ok(file) => file,
      Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
        return Err(Self::read_contention_error(&lock_path));
      }
      Err(err) => return Err(CacheLockError::CreateFile(err)),
    };

    let lock = CacheLock { lock_path };
    Self::write_metadata(file, command, cache)?;
    debug!(path = %lock.lock_path.display(), "acquired cache lock");
    Ok(lock)
  }

  fn write_metadata(file: File, command: &str, cache: &Path) -> Result<(), CacheLockError> {
    let metadata = LockMetadata {
      version: LOCK_VERSION,
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      command: command.to_string(),
      cache: cache.to_path_buf(),
    };

    let mut writer = io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &metadata)
      .map_err(|e| CacheLockError::WriteMetadata(io::Error::other(e)))?;
    writer.flush().map_err(CacheLockError::WriteMetadata)?;

    Ok(())
  }

  fn read_contention_error(lock_path: &Path) -> CacheLockError {
    if let Ok(mut file) = File::open(lock_path) {
      let mut contents = String::new();
      if file.read_to_string(&mut contents).is_ok()
        && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
      {
        let started_at = format!("Unix timestamp {}", metadata.started_at_unix);

        return CacheLockError::Contention {
          command: metadata.command,
          pid: metadata.pid,
          started_at,
          lock_path: lock_path.to_path_buf(),
        };
      }
    }

    CacheLockError::ContentionUnknown {
      lock_path: lock_path.to_path_buf(),
    }
  }

  /// Reads the metadata this lock wrote.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    let contents = fs::read_to_string(&self.lock_path)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

impl Drop for CacheLock {
  fn drop(&mut self) {
    if let Err(err) = fs::remove_file(&self.lock_path) {
      warn!(path = %self.lock_path.display(), error = %err, "failed to release cache lock");
    }
  }
}
