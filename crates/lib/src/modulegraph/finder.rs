//! Module lookup over search roots, in the interpreter's own order.
//!
//! Built-in modules are checked first. Then, for each root in order:
//! a directory with `__init__.py` (or a sourceless `__init__.pyc`) is a
//! regular package and wins immediately; otherwise an extension module wins,
//! then `name.py`, then a sourceless `name.pyc`. A directory without an
//! `__init__` is only a namespace portion: it is remembered and the scan
//! continues, so a regular module or package in a later root still takes
//! precedence. If no root has a regular hit, all portions merge, in root
//! order, into one namespace package.
//!
//! Extensions follow the interpreter's suffix order: the target's own ABI tag
//! (`name.cpython-312-x86_64-linux-gnu.so`), then `name.abi3.so`, then the
//! untagged `name.so`. Tags for other interpreters are never picked.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use pybundle_archive::PythonVersion;
use tracing::{debug, warn};

use crate::consts::BUILTIN_MODULES;
use crate::platform::os::Os;

/// What a name resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Found {
  Builtin,
  /// `name.py`, or `name.pyc` shipped without source.
  Source { path: PathBuf },
  Package { init: PathBuf, dir: PathBuf },
  Extension { path: PathBuf },
  Namespace { portions: Vec<PathBuf> },
}

#[derive(Debug, Clone)]
pub struct ModuleFinder {
  extension_suffix: &'static str,
  python: Option<PythonVersion>,
}

impl ModuleFinder {
  pub fn new(os: Os) -> Self {
    Self {
      extension_suffix: os.extension_suffix(),
      python: None,
    }
  }

  /// Restrict tagged extensions and compiled modules to `python`.
  pub fn with_python(mut self, python: Option<PythonVersion>) -> Self {
    self.python = python;
    self
  }

  /// Resolve a top-level name against the search roots.
  pub fn find_top_level(&self, name: &str, roots: &[PathBuf]) -> Option<Found> {
    if BUILTIN_MODULES.contains(&name) {
      return Some(Found::Builtin);
    }
    self.find_in(name, roots)
  }

  /// Resolve the last component of a dotted name inside its parent's
  /// search locations.
  pub fn find_in(&self, part: &str, roots: &[PathBuf]) -> Option<Found> {
    let mut portions = Vec::new();

    for root in roots {
      let dir = root.join(part);
      if dir.is_dir() {
        let init = dir.join("__init__.py");
        if init.is_file() {
          return Some(Found::Package { init, dir });
        }
        let compiled = dir.join("__init__.pyc");
        if self.is_loadable_bytecode(&compiled) {
          return Some(Found::Package { init: compiled, dir });
        }
      }

      if let Some(path) = self.extension_in(root, part) {
        return Some(Found::Extension { path });
      }

      let source = root.join(format!("{part}.py"));
      if source.is_file() {
        return Some(Found::Source { path: source });
      }

      let compiled = root.join(format!("{part}.pyc"));
      if self.is_loadable_bytecode(&compiled) {
        return Some(Found::Source { path: compiled });
      }

      if dir.is_dir() {
        portions.push(dir);
      }
    }

    if portions.is_empty() {
      None
    } else {
      Some(Found::Namespace { portions })
    }
  }

  /// The extension module for `part` in `root`, if one loads into the target.
  fn extension_in(&self, root: &Path, part: &str) -> Option<PathBuf> {
    let exact = root.join(format!("{part}{}", self.extension_suffix));
    let prefix = format!("{part}.");

    let mut tagged: Vec<(String, PathBuf)> = fs::read_dir(root)
      .ok()
      .into_iter()
      .flatten()
      .filter_map(Result::ok)
      .filter_map(|entry| {
        let name = entry.file_name().into_string().ok()?;
        let tag = name.strip_prefix(&prefix)?.strip_suffix(self.extension_suffix)?;
        (!tag.is_empty() && !tag.contains('.')).then(|| (tag.to_string(), entry.path()))
      })
      .filter(|(_, path)| path.is_file())
      .collect();
    tagged.sort();

    let chosen = match self.python {
      Some(python) => {
        let (accepted, rejected): (Vec<_>, Vec<_>) =
          tagged.into_iter().partition(|(tag, _)| python.accepts_abi_tag(tag));
        for (tag, _) in &rejected {
          debug!(module = part, tag = %tag, python = %python, "skipping extension built for another interpreter");
        }
        // own tag before abi3
        accepted
          .iter()
          .find(|(tag, _)| !tag.starts_with("abi3"))
          .or_else(|| accepted.first())
          .map(|(_, path)| path.clone())
      }
      None if tagged.len() > 1 => {
        let tags: Vec<&str> = tagged.iter().map(|(tag, _)| tag.as_str()).collect();
        warn!(module = part, ?tags, "several tagged extensions and no target python version; ignoring them");
        None
      }
      None => tagged.pop().map(|(_, path)| path),
    };

    chosen.or_else(|| exact.is_file().then_some(exact))
  }

  /// A `.pyc` file whose header matches the target interpreter.
  fn is_loadable_bytecode(&self, path: &Path) -> bool {
    if !path.is_file() {
      return false;
    }
    let Some(python) = self.python else {
      return true;
    };
    let mut header = [0u8; 4];
    let readable = File::open(path).and_then(|mut file| file.read_exact(&mut header)).is_ok();
    if readable && python.accepts_bytecode(&header) {
      return true;
    }
    debug!(path = %path.display(), python = %python, "skipping bytecode compiled for another interpreter");
    false
  }
}
