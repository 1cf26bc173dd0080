use std::io;
use std::path::PathBuf;

use pybundle_archive::ArchiveError;
use serde::Serialize;
use thiserror::Error;

use crate::bindepend::{ScanError, ScanWarning};
use crate::cache::CacheError;
use crate::modulegraph::{HookError, ResolveError, UnresolvedImport};
use crate::spec::TargetLayout;
use crate::toc::TocError;

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("no entry point given")]
  NoEntryPoint,

  #[error("bootloader {path} cannot be read: {source}", path = .path.display())]
  Bootloader {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write {path}: {source}", path = .path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("refusing to replace {path}: it is not a previous bundle", path = .path.display())]
  ForeignOutput { path: PathBuf },

  #[error("cannot read {path}: {source}", path = .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Hook(#[from] HookError),

  #[error(transparent)]
  Scan(#[from] ScanError),

  #[error(transparent)]
  Toc(#[from] TocError),

  #[error(transparent)]
  Archive(#[from] ArchiveError),

  #[error(transparent)]
  Cache(#[from] CacheError),
}

/// The written artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
  pub layout: TargetLayout,
  /// The launcher (onefile) or bundle directory (onedir).
  pub path: PathBuf,
  /// File holding the archive: the launcher itself or the onedir sidecar.
  pub archive: PathBuf,
  /// Offset of the archive inside `archive`.
  pub archive_start: u64,
  pub archive_len: u64,
  pub entry_count: u32,
  pub index_digest: String,
}

/// What a build produced, for display and for `--json`.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
  pub name: String,
  pub artifact: Artifact,
  pub modules: usize,
  pub extensions: usize,
  pub data: usize,
  pub libraries: usize,
  pub interpreter: bool,
  pub unresolved: Vec<UnresolvedImport>,
  pub warnings: Vec<ScanWarning>,
}
