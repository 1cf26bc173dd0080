//! Finding the archive that belongs to the running executable.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use pybundle_archive::format::{MAGIC, TRAILER_LEN};
use tracing::debug;

/// File extension of the onedir sidecar archive.
pub const SIDECAR_EXTENSION: &str = "pkg";

/// How the archive's entries are made available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  /// Archive appended to the executable; unpack into a private directory.
  Extract,
  /// Sidecar archive in a bundle directory; resolve entries in place.
  Map,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
  pub archive: PathBuf,
  pub mode: Mode,
}

/// Pick the archive for `executable`.
///
/// A trailer at the end of the executable wins; next comes a sidecar beside it.
/// With neither, the executable itself is returned so that trailer
/// verification reports what is wrong with it.
pub fn locate(executable: &Path) -> Located {
  if has_trailer(executable).unwrap_or(false) {
    debug!(path = %executable.display(), "found appended archive");
    return Located {
      archive: executable.to_path_buf(),
      mode: Mode::Extract,
    };
  }

  let sidecar = sidecar_for(executable);
  if sidecar.is_file() {
    debug!(path = %sidecar.display(), "found sidecar archive");
    return Located {
      archive: sidecar,
      mode: Mode::Map,
    };
  }

  Located {
    archive: executable.to_path_buf(),
    mode: Mode::Extract,
  }
}

/// `dist/app/app` -> `dist/app/app.pkg`; `app.exe` -> `app.pkg`.
pub fn sidecar_for(executable: &Path) -> PathBuf {
  executable.with_extension(SIDECAR_EXTENSION)
}

/// True when the file ends in something that starts with the trailer magic.
fn has_trailer(path: &Path) -> io::Result<bool> {
  let mut file = File::open(path)?;
  let len = file.metadata()?.len();
  if len < TRAILER_LEN as u64 {
    return Ok(false);
  }
  let mut magic = [0u8; MAGIC.len()];
  file.seek(SeekFrom::Start(len - TRAILER_LEN as u64))?;
  file.read_exact(&mut magic)?;
  Ok(magic == MAGIC)
}
