//! The table of contents: every file going into a bundle, by logical name.
//!
//! A [`Toc`] is built from a resolved [`ModuleGraph`] and a [`ScanReport`] and
//! is the only input the archive builder reads. Logical names are unique;
//! adding the same file twice under one name is a no-op, adding a different
//! file under a taken name is an error.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use pybundle_archive::EntryKind;
use pybundle_archive::format::flags;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::bindepend::ScanReport;
use crate::modulegraph::{ModuleGraph, ModuleKind, ModuleRecord};
use crate::spec::CompressionPolicy;
use crate::util::hash::hash_file;

#[derive(Debug, Error)]
pub enum TocError {
  #[error("'{name}' is provided by both {first} and {second}", first = .first.display(), second = .second.display())]
  Collision {
    name: String,
    first: PathBuf,
    second: PathBuf,
  },

  #[error("cannot read {path}: {source}", path = .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("module '{module}' has no file to bundle")]
  NoOrigin { module: String },
}

/// One file in the bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocEntry {
  pub name: String,
  pub source: PathBuf,
  pub kind: EntryKind,
  pub package: bool,
  /// Compiled bytecode without a source file.
  pub sourceless: bool,
  /// Uncompressed size in bytes.
  pub size: u64,
  /// Hex SHA-256 of the source bytes.
  pub checksum: String,
  pub compress: bool,
}

impl TocEntry {
  /// Layout bits deciding the entry's path below the bundle root.
  pub fn flags(&self) -> u8 {
    flags::layout(self.package, self.sourceless)
  }
}

/// A TOC entry before its source has been read.
#[derive(Debug, Clone)]
struct Pending {
  name: String,
  source: PathBuf,
  kind: EntryKind,
  package: bool,
  sourceless: bool,
}

impl Pending {
  fn file(name: &str, source: &Path, kind: EntryKind) -> Self {
    Self {
      name: name.to_string(),
      source: source.to_path_buf(),
      kind,
      package: false,
      sourceless: false,
    }
  }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Toc {
  entries: Vec<TocEntry>,
  #[serde(skip)]
  index: HashMap<String, usize>,
}

impl Toc {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add `entry`. Returns `false` if an identical entry already exists.
  pub fn push(&mut self, entry: TocEntry) -> Result<bool, TocError> {
    if let Some(&i) = self.index.get(&entry.name) {
      let existing = &self.entries[i];
      if existing.kind == entry.kind && existing.checksum == entry.checksum {
        debug!(name = %entry.name, "duplicate TOC entry");
        return Ok(false);
      }
      return Err(TocError::Collision {
        name: entry.name,
        first: existing.source.clone(),
        second: entry.source,
      });
    }
    self.index.insert(entry.name.clone(), self.entries.len());
    self.entries.push(entry);
    Ok(true)
  }

  pub fn entries(&self) -> &[TocEntry] {
    &self.entries
  }

  pub fn get(&self, name: &str) -> Option<&TocEntry> {
    self.index.get(name).map(|&i| &self.entries[i])
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn count(&self, kind: EntryKind) -> usize {
    self.entries.iter().filter(|e| e.kind == kind).count()
  }

  /// Collect the bundle contents in a fixed order: modules in traversal order
  /// (entry point first), extension modules, hook data, native libraries,
  /// then the interpreter.
  pub fn from_graph(
    graph: &ModuleGraph,
    libraries: &ScanReport,
    interpreter: Option<&Path>,
    compression: CompressionPolicy,
  ) -> Result<Self, TocError> {
    let mut pending = Vec::new();

    for module in graph.modules().filter(|m| m.kind == ModuleKind::PureSource) {
      let source = origin(module)?;
      pending.push(Pending {
        sourceless: module.is_sourceless(),
        package: module.package,
        ..Pending::file(&module.name, &source, EntryKind::PureModule)
      });
    }
    for module in graph.modules().filter(|m| m.kind == ModuleKind::ExtensionNative) {
      let source = origin(module)?;
      let name = extension_logical_name(&module.name, &source);
      pending.push(Pending::file(&name, &source, EntryKind::ExtensionNative));
    }
    for file in graph.datas() {
      pending.push(Pending::file(&file.logical_name, &file.source, EntryKind::Data));
    }
    for file in graph.binaries() {
      pending.push(Pending::file(&file.logical_name, &file.source, EntryKind::BinaryDependency));
    }
    for library in &libraries.libraries {
      pending.push(Pending::file(&library.name, &library.path, EntryKind::BinaryDependency));
    }
    if let Some(interpreter) = interpreter {
      let name = interpreter
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "python".to_string());
      pending.push(Pending::file(&name, interpreter, EntryKind::EmbeddedInterpreter));
    }

    // Hash in parallel, then insert in the order collected above
    let entries: Vec<Result<TocEntry, TocError>> = pending
      .into_par_iter()
      .map(|p| entry_for(p, compression))
      .collect();

    let mut toc = Self::new();
    for entry in entries {
      toc.push(entry?)?;
    }
    info!(
      entries = toc.len(),
      modules = toc.count(EntryKind::PureModule),
      extensions = toc.count(EntryKind::ExtensionNative),
      libraries = toc.count(EntryKind::BinaryDependency),
      "table of contents assembled"
    );
    Ok(toc)
  }
}

fn origin(module: &ModuleRecord) -> Result<PathBuf, TocError> {
  module.origin.clone().ok_or_else(|| TocError::NoOrigin {
    module: module.name.clone(),
  })
}

fn entry_for(pending: Pending, compression: CompressionPolicy) -> Result<TocEntry, TocError> {
  let read_err = |source| TocError::Read {
    path: pending.source.clone(),
    source,
  };
  let size = fs::metadata(&pending.source).map_err(read_err)?.len();
  let checksum = hash_file(&pending.source).map_err(read_err)?.0;
  Ok(TocEntry {
    compress: compression.compress(pending.kind),
    name: pending.name,
    source: pending.source,
    kind: pending.kind,
    package: pending.package,
    sourceless: pending.sourceless,
    size,
    checksum,
  })
}

/// `pkg.fast` loaded from `.../pkg/fast.cpython-311-x86_64-linux-gnu.so`
/// becomes `pkg/fast.cpython-311-x86_64-linux-gnu.so`.
pub fn extension_logical_name(module: &str, source: &Path) -> String {
  let file_name = source
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  match module.rsplit_once('.') {
    Some((parent, _)) => format!("{}/{file_name}", parent.replace('.', "/")),
    None => file_name,
  }
}
