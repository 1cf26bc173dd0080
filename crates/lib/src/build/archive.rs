//! Serializing a [`Toc`] into the final artifact.
//!
//! Entry payloads are read, hashed and compressed in parallel, then appended
//! in TOC order, so the archive bytes depend only on the TOC and the
//! compression decisions recorded in it.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use pybundle_archive::format::relative_path_for;
use pybundle_archive::{
  ArchiveReader, ArchiveSummary, ArchiveWriter, EntryKind, EntryOptions, MANIFEST_NAME, PreparedEntry, PythonVersion,
  ResourceMap, prepare_entry,
};
use rayon::prelude::*;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::types::{Artifact, BuildError};
use crate::platform::os::Os;
use crate::spec::TargetLayout;
use crate::toc::{Toc, TocEntry};

/// File extension of the onedir sidecar archive.
pub const SIDECAR_EXTENSION: &str = "pkg";

pub struct ArchiveBuilder<'a> {
  bootloader: &'a Path,
  layout: TargetLayout,
  os: Os,
  python: Option<PythonVersion>,
}

impl<'a> ArchiveBuilder<'a> {
  pub fn new(bootloader: &'a Path, layout: TargetLayout, os: Os) -> Self {
    Self {
      bootloader,
      layout,
      os,
      python: None,
    }
  }

  pub fn with_python(mut self, python: Option<PythonVersion>) -> Self {
    self.python = python;
    self
  }

  /// Write the artifact for `toc` at `output`: the launcher path for onefile,
  /// the bundle directory for onedir.
  pub fn build(&self, toc: &Toc, name: &str, output: &Path) -> Result<Artifact, BuildError> {
    match self.layout {
      TargetLayout::Onefile => self.onefile(toc, output),
      TargetLayout::Onedir => self.onedir(toc, name, output),
    }
  }

  fn onefile(&self, toc: &Toc, output: &Path) -> Result<Artifact, BuildError> {
    let dir = output.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir).map_err(|source| write_err(dir, source))?;

    let mut staged = NamedTempFile::new_in(dir).map_err(|source| write_err(dir, source))?;
    let start = copy_bootloader(self.bootloader, staged.as_file_mut())?;
    let (writer, summary) = write_archive(toc, BufWriter::new(staged.as_file_mut()), self.python, |_| false)?;
    drop(writer);

    make_executable(staged.path())?;
    staged.persist(output).map_err(|e| write_err(output, e.error))?;

    info!(
      path = %output.display(),
      entries = summary.entry_count,
      archive_len = summary.archive_len,
      "wrote onefile bundle"
    );
    Ok(artifact(TargetLayout::Onefile, output, output, start, &summary))
  }

  fn onedir(&self, toc: &Toc, name: &str, output: &Path) -> Result<Artifact, BuildError> {
    let sidecar_name = format!("{name}.{SIDECAR_EXTENSION}");
    clear_previous_bundle(output, &sidecar_name)?;
    fs::create_dir_all(output).map_err(|source| write_err(output, source))?;

    let launcher = output.join(launcher_name(name, self.os));
    let mut launcher_file = File::create(&launcher).map_err(|source| write_err(&launcher, source))?;
    copy_bootloader(self.bootloader, &mut launcher_file)?;
    drop(launcher_file);
    make_executable(&launcher)?;

    for entry in toc.entries() {
      let dest = output.join(relative_path_for(&entry.name, entry.kind, entry.flags())?);
      if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|source| write_err(parent, source))?;
      }
      fs::copy(&entry.source, &dest).map_err(|source| write_err(&dest, source))?;
      if entry.kind == EntryKind::EmbeddedInterpreter {
        make_executable(&dest)?;
      }
    }

    let sidecar = output.join(&sidecar_name);
    let file = File::create(&sidecar).map_err(|source| write_err(&sidecar, source))?;
    let (writer, summary) = write_archive(toc, BufWriter::new(file), self.python, |_| true)?;
    drop(writer);

    let reader = ArchiveReader::open(&sidecar)?;
    let manifest = ResourceMap::mapped(&reader, output, Path::new(&sidecar_name))?.write()?;
    debug!(path = %manifest.display(), "wrote resource manifest");

    info!(
      path = %output.display(),
      entries = summary.entry_count,
      archive_len = summary.archive_len,
      "wrote onedir bundle"
    );
    Ok(artifact(TargetLayout::Onedir, output, &sidecar, 0, &summary))
  }
}

/// Append every TOC entry to `out` as one archive. Entries `external` selects
/// are indexed but their bytes are left out.
pub fn write_archive<W: Write>(
  toc: &Toc,
  out: W,
  python: Option<PythonVersion>,
  external: impl Fn(&TocEntry) -> bool + Sync,
) -> Result<(W, ArchiveSummary), BuildError> {
  let prepared: Vec<PreparedEntry> = toc
    .entries()
    .par_iter()
    .map(|entry| -> Result<PreparedEntry, BuildError> {
      let data = fs::read(&entry.source).map_err(|source| BuildError::Read {
        path: entry.source.clone(),
        source,
      })?;
      let options = EntryOptions {
        compress: entry.compress,
        package: entry.package,
        sourceless: entry.sourceless,
        external: external(entry),
      };
      Ok(prepare_entry(&entry.name, entry.kind, &data, options)?)
    })
    .collect::<Result<_, BuildError>>()?;

  // Apply results sequentially for determinism
  let mut writer = ArchiveWriter::new(out).with_python(python);
  for entry in prepared {
    writer.add_prepared(entry)?;
  }
  Ok(writer.finish()?)
}

/// Remove the bundle a previous build left at `output`. Anything else there
/// is left alone and fails the build; an empty directory is reused.
fn clear_previous_bundle(output: &Path, sidecar_name: &str) -> Result<(), BuildError> {
  let metadata = match fs::symlink_metadata(output) {
    Ok(metadata) => metadata,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
    Err(source) => return Err(write_err(output, source)),
  };
  let foreign = || BuildError::ForeignOutput {
    path: output.to_path_buf(),
  };
  if !metadata.is_dir() {
    return Err(foreign());
  }
  let mut listing = fs::read_dir(output).map_err(|source| write_err(output, source))?;
  if listing.next().is_none() {
    return Ok(());
  }
  if !output.join(MANIFEST_NAME).is_file() && !output.join(sidecar_name).is_file() {
    return Err(foreign());
  }
  debug!(path = %output.display(), "removing previous bundle");
  fs::remove_dir_all(output).map_err(|source| write_err(output, source))
}

/// Copy the bootloader into `out`, returning its length.
fn copy_bootloader(bootloader: &Path, out: &mut File) -> Result<u64, BuildError> {
  let mut source = File::open(bootloader).map_err(|source| BuildError::Bootloader {
    path: bootloader.to_path_buf(),
    source,
  })?;
  io::copy(&mut source, out).map_err(|source| BuildError::Bootloader {
    path: bootloader.to_path_buf(),
    source,
  })
}

fn launcher_name(name: &str, os: Os) -> String {
  match os {
    Os::Windows => format!("{name}.exe"),
    _ => name.to_string(),
  }
}

fn artifact(layout: TargetLayout, path: &Path, archive: &Path, start: u64, summary: &ArchiveSummary) -> Artifact {
  Artifact {
    layout,
    path: path.to_path_buf(),
    archive: archive.to_path_buf(),
    archive_start: start,
    archive_len: summary.archive_len,
    entry_count: summary.entry_count,
    index_digest: summary.index_digest.clone(),
  }
}

fn write_err(path: &Path, source: io::Error) -> BuildError {
  BuildError::Write {
    path: path.to_path_buf(),
    source,
  }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), BuildError> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|source| write_err(path, source))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), BuildError> {
  Ok(())
}

/// Location of the sidecar archive of a onedir launcher.
pub fn sidecar_for(launcher: &Path) -> PathBuf {
  launcher.with_extension(SIDECAR_EXTENSION)
}
