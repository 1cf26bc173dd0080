//! Hook registry: data records describing non-standard import behaviour.
//!
//! A hook is looked up exactly once, on the first visit of a module. It can
//! force extra imports, exclude imports (globally), and attach data files and
//! native libraries. Hooks never see traversal state.
//!
//! Declarative hooks live in a directory of `hook-<module>.json` files:
//!
//! ```json
//! {
//!   "extra_imports": ["pkg._speedups"],
//!   "excluded_imports": ["tkinter"],
//!   "datas": [["data/templates", "pkg/templates"]],
//!   "binaries": [["vendor/libfoo.so.1", "."]]
//! }
//! ```
//!
//! Source paths are relative to the hook file. Destinations are directories
//! below the bundle root (`.` is the root itself); files keep their names.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

const HOOK_PREFIX: &str = "hook-";
const HOOK_SUFFIX: &str = ".json";

#[derive(Debug, Error)]
pub enum HookError {
  #[error("hook for '{module}' failed: {message}")]
  Failed { module: String, message: String },

  #[error("failed to read hook file {path}: {source}", path = .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid hook file {path}: {source}", path = .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("hook for '{module}' refers to missing file {path}", path = .path.display())]
  MissingFile { module: String, path: PathBuf },
}

/// The four-field hook record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
  #[serde(default)]
  pub extra_imports: Vec<String>,
  #[serde(default)]
  pub excluded_imports: Vec<String>,
  #[serde(default)]
  pub datas: Vec<(PathBuf, String)>,
  #[serde(default)]
  pub binaries: Vec<(PathBuf, String)>,
}

/// A file a hook attaches to the bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookFile {
  pub source: PathBuf,
  pub logical_name: String,
  /// Module whose hook declared the file.
  pub module: String,
}

impl Hook {
  fn rebase(mut self, base: &Path) -> Self {
    for (source, _) in self.datas.iter_mut().chain(self.binaries.iter_mut()) {
      if source.is_relative() {
        *source = base.join(&*source);
      }
    }
    self
  }

  /// Data files with directories expanded, in a stable order.
  pub fn expand_datas(&self, module: &str) -> Result<Vec<HookFile>, HookError> {
    expand(module, &self.datas)
  }

  /// Native libraries with directories expanded, in a stable order.
  pub fn expand_binaries(&self, module: &str) -> Result<Vec<HookFile>, HookError> {
    expand(module, &self.binaries)
  }
}

fn expand(module: &str, pairs: &[(PathBuf, String)]) -> Result<Vec<HookFile>, HookError> {
  let mut files = Vec::new();
  for (source, dest) in pairs {
    let dest = dest.trim_matches('/');
    if source.is_dir() {
      for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|e| HookError::Read {
          path: source.clone(),
          source: e.into(),
        })?;
        if !entry.file_type().is_file() {
          continue;
        }
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        files.push(HookFile {
          source: entry.path().to_path_buf(),
          logical_name: join_logical(dest, relative),
          module: module.to_string(),
        });
      }
    } else if source.is_file() {
      let file_name = source.file_name().map(Path::new).unwrap_or(source.as_path());
      files.push(HookFile {
        source: source.clone(),
        logical_name: join_logical(dest, file_name),
        module: module.to_string(),
      });
    } else {
      return Err(HookError::MissingFile {
        module: module.to_string(),
        path: source.clone(),
      });
    }
  }
  Ok(files)
}

fn join_logical(dest: &str, relative: &Path) -> String {
  let relative = relative
    .components()
    .map(|c| c.as_os_str().to_string_lossy().into_owned())
    .collect::<Vec<_>>()
    .join("/");
  if dest.is_empty() || dest == "." {
    relative
  } else {
    format!("{dest}/{relative}")
  }
}

/// Source of hooks, queried once per first-visited module.
///
/// Implementations must be pure functions of the module name: the resolver
/// queries them in parallel and in no particular order.
pub trait HookRegistry: Sync {
  fn hook_for(&self, module: &str) -> Result<Option<Hook>, HookError>;
}

/// A registry without hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl HookRegistry for NoHooks {
  fn hook_for(&self, _module: &str) -> Result<Option<Hook>, HookError> {
    Ok(None)
  }
}

/// Hooks keyed by exact module name.
#[derive(Debug, Clone, Default)]
pub struct HookSet {
  hooks: BTreeMap<String, Hook>,
}

impl HookSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, module: impl Into<String>, hook: Hook) -> &mut Self {
    self.hooks.insert(module.into(), hook);
    self
  }

  pub fn len(&self) -> usize {
    self.hooks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.hooks.is_empty()
  }

  /// Load every `hook-<module>.json` in `dir`. Later directories win.
  pub fn load_dir(&mut self, dir: &Path) -> Result<usize, HookError> {
    let read_err = |source| HookError::Read {
      path: dir.to_path_buf(),
      source,
    };
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
      .map_err(read_err)?
      .map(|entry| entry.map(|e| e.path()))
      .collect::<Result<_, _>>()
      .map_err(read_err)?;
    paths.sort();

    let mut loaded = 0;
    for path in paths {
      let Some(module) = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix(HOOK_PREFIX))
        .and_then(|n| n.strip_suffix(HOOK_SUFFIX))
        .map(str::to_string)
      else {
        continue;
      };

      let content = fs::read_to_string(&path).map_err(|source| HookError::Read {
        path: path.clone(),
        source,
      })?;
      let hook: Hook = serde_json::from_str(&content).map_err(|source| HookError::Parse {
        path: path.clone(),
        source,
      })?;
      debug!(module = %module, path = %path.display(), "loaded hook");
      self.hooks.insert(module, hook.rebase(dir));
      loaded += 1;
    }
    Ok(loaded)
  }
}

impl HookRegistry for HookSet {
  fn hook_for(&self, module: &str) -> Result<Option<Hook>, HookError> {
    Ok(self.hooks.get(module).cloned())
  }
}

/// A hook computed by a pure function over the module name.
pub struct FnHook<F>(pub F);

impl<F> HookRegistry for FnHook<F>
where
  F: Fn(&str) -> Result<Option<Hook>, HookError> + Sync,
{
  fn hook_for(&self, module: &str) -> Result<Option<Hook>, HookError> {
    (self.0)(module)
  }
}
