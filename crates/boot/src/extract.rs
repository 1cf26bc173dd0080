//! Making archive entries available on disk.

use std::path::Path;

use pybundle_archive::{ArchiveError, ArchiveReader, ResourceMap};
use tempfile::TempDir;
use tracing::debug;

use crate::error::BootError;

/// Environment variable overriding the parent of the extraction directory.
pub const ENV_TMPDIR: &str = "PYBUNDLE_TMPDIR";

/// Unpack every entry into a fresh private directory below `parent`.
///
/// The returned [`TempDir`] owns the directory: dropping it removes the
/// extracted files, including when extraction itself fails half way.
pub fn extract(reader: &ArchiveReader, parent: &Path) -> Result<(TempDir, ResourceMap), BootError> {
  let dir = tempfile::Builder::new()
    .prefix(&format!("_PYB{}", std::process::id()))
    .tempdir_in(parent)
    .map_err(|source| BootError::TempDir {
      path: parent.to_path_buf(),
      source,
    })?;

  let written = reader.extract_all(dir.path()).map_err(BootError::Extraction)?;
  let map = ResourceMap::extracted(reader, dir.path()).map_err(BootError::Extraction)?;
  map.write().map_err(BootError::Extraction)?;

  debug!(dir = %dir.path().display(), files = written.len(), "extracted bundle");
  Ok((dir, map))
}

/// Resolve entries in place: loose files beside the sidecar, everything else
/// at its offset inside the sidecar. Nothing is written.
pub fn map(reader: &ArchiveReader) -> Result<ResourceMap, BootError> {
  let archive = reader.path();
  let corrupt = |source: ArchiveError| BootError::ArchiveCorrupt {
    path: archive.to_path_buf(),
    source,
  };
  let root = archive.parent().unwrap_or(Path::new("."));
  let name = archive
    .file_name()
    .map(Path::new)
    .ok_or_else(|| corrupt(ArchiveError::NotFound(archive.display().to_string())))?;
  let map = ResourceMap::mapped(reader, root, name).map_err(corrupt)?;
  debug!(root = %root.display(), entries = map.resources.len(), "mapped bundle");
  Ok(map)
}
