use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use super::hooks::{Hook, HookError};

/// How a resolved module is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleKind {
  PureSource,
  ExtensionNative,
  /// Compiled into the interpreter; nothing to bundle.
  Builtin,
  /// A directory without `__init__`, possibly spread over several roots.
  NamespacePackage,
}

/// A `.pyc` path: compiled bytecode, not scannable source.
pub fn is_bytecode(path: &Path) -> bool {
  path.extension().is_some_and(|ext| ext == "pyc")
}

/// A module found during traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleRecord {
  pub name: String,
  pub kind: ModuleKind,
  /// File the module is loaded from, if any.
  pub origin: Option<PathBuf>,
  pub package: bool,
  /// Directories searched for submodules (packages only).
  pub search_locations: Vec<PathBuf>,
  /// Import targets discovered in this module, after hook processing.
  pub imports: Vec<String>,
  /// The hook applied on first visit, if one exists.
  pub hook: Option<Hook>,
  pub entry: bool,
}

impl ModuleRecord {
  pub fn new(name: impl Into<String>, kind: ModuleKind, origin: Option<PathBuf>) -> Self {
    Self {
      name: name.into(),
      kind,
      origin,
      package: false,
      search_locations: Vec::new(),
      imports: Vec::new(),
      hook: None,
      entry: false,
    }
  }

  /// Whether the module's source is scanned for imports.
  pub fn has_source(&self) -> bool {
    self.kind == ModuleKind::PureSource && self.origin.as_deref().is_some_and(|origin| !is_bytecode(origin))
  }

  /// Loaded from a `.pyc` with no source next to it.
  pub fn is_sourceless(&self) -> bool {
    self.kind == ModuleKind::PureSource && self.origin.as_deref().is_some_and(is_bytecode)
  }
}

/// `importer` imports `imported`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DependencyEdge {
  pub importer: String,
  pub imported: String,
  /// Guarded, lazy or string-built import.
  pub conditional: bool,
}

/// An import that matched nothing on the search path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedImport {
  pub importer: String,
  pub name: String,
  pub conditional: bool,
}

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("cannot read entry point {path}: {source}", path = .path.display())]
  EntryPoint {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("cannot read module '{module}' from {path}: {source}", path = .path.display())]
  Read {
    module: String,
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("hook for '{module}' requires '{import}', which cannot be found")]
  UnresolvedImport { module: String, import: String },

  #[error(transparent)]
  Hook(#[from] HookError),
}
