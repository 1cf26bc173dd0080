//! Resolved build configuration.
//!
//! A [`BuildSpec`] is the only configuration the build core consumes. Front
//! ends (the CLI, tests) assemble it; nothing in this crate parses a
//! configuration file format.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use pybundle_archive::{EntryKind, PythonVersion};
use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_SCAN_TIMEOUT_SECS;
use crate::platform::Platform;
use crate::platform::paths::cache_dir;

/// Which archive entries get zlib-compressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionPolicy {
  /// Compress pure modules and data, store native code as is.
  #[default]
  Auto,
  All,
  None,
}

impl CompressionPolicy {
  pub fn compress(self, kind: EntryKind) -> bool {
    match self {
      Self::Auto => !kind.is_native(),
      Self::All => true,
      Self::None => false,
    }
  }
}

impl FromStr for CompressionPolicy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "auto" => Ok(Self::Auto),
      "all" => Ok(Self::All),
      "none" => Ok(Self::None),
      other => Err(format!("unknown compression policy: {other}")),
    }
  }
}

/// Physical shape of the build output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetLayout {
  /// One executable with the archive appended.
  #[default]
  Onefile,
  /// A directory holding the launcher, a sidecar archive and loose files.
  Onedir,
}

impl fmt::Display for TargetLayout {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Onefile => write!(f, "onefile"),
      Self::Onedir => write!(f, "onedir"),
    }
  }
}

impl FromStr for TargetLayout {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "onefile" => Ok(Self::Onefile),
      "onedir" => Ok(Self::Onedir),
      other => Err(format!("unknown layout: {other}")),
    }
  }
}

/// A module exclusion: `pkg` excludes `pkg` and every `pkg.*` submodule.
///
/// A trailing `.*` (`pkg.*`) excludes the submodules but keeps `pkg` itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExcludePattern(String);

impl ExcludePattern {
  pub fn new(pattern: impl Into<String>) -> Self {
    Self(pattern.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn matches(&self, module: &str) -> bool {
    if let Some(parent) = self.0.strip_suffix(".*") {
      return module.strip_prefix(parent).is_some_and(|rest| rest.starts_with('.'));
    }
    module == self.0 || module.strip_prefix(self.0.as_str()).is_some_and(|rest| rest.starts_with('.'))
  }
}

impl fmt::Display for ExcludePattern {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
  /// Artifact name, defaults to the first entry point's stem.
  pub name: String,
  /// Entry scripts; the first one is what the bundle runs.
  pub entry_points: Vec<PathBuf>,
  /// Module search roots, consulted in order after the entry script's directory.
  pub search_paths: Vec<PathBuf>,
  pub excludes: Vec<ExcludePattern>,
  pub compression: CompressionPolicy,
  pub layout: TargetLayout,
  pub platform: Platform,
  /// Interpreter executable to embed. Without one the bundle runs the first
  /// interpreter found on the end user's `PATH`.
  pub interpreter: Option<PathBuf>,
  /// Interpreter version the bundle targets. Filters tagged extensions and
  /// compiled modules, and is recorded for the bootloader to check.
  pub python: Option<PythonVersion>,
  /// Compiled bootloader for `platform`.
  pub bootloader: PathBuf,
  pub dist_dir: PathBuf,
  pub hook_dirs: Vec<PathBuf>,
  /// Upper bound for one external binary-inspection tool invocation.
  pub scan_timeout: Duration,
  /// Persistent cache directory; `None` disables the cache.
  pub cache_dir: Option<PathBuf>,
}

impl BuildSpec {
  /// A spec with defaults for everything but the entry point and bootloader.
  pub fn new(entry: impl Into<PathBuf>, bootloader: impl Into<PathBuf>, platform: Platform) -> Self {
    let entry = entry.into();
    let name = entry
      .file_stem()
      .and_then(|s| s.to_str())
      .unwrap_or("app")
      .to_string();
    Self {
      name,
      entry_points: vec![entry],
      search_paths: Vec::new(),
      excludes: Vec::new(),
      compression: CompressionPolicy::default(),
      layout: TargetLayout::default(),
      platform,
      interpreter: None,
      python: None,
      bootloader: bootloader.into(),
      dist_dir: PathBuf::from("dist"),
      hook_dirs: Vec::new(),
      scan_timeout: Duration::from_secs(DEFAULT_SCAN_TIMEOUT_SECS),
      cache_dir: Some(cache_dir()),
    }
  }

  /// The script the bundle executes.
  pub fn main_script(&self) -> Option<&Path> {
    self.entry_points.first().map(PathBuf::as_path)
  }

  pub fn is_excluded(&self, module: &str) -> bool {
    self.excludes.iter().any(|p| p.matches(module))
  }

  /// Where the final artifact is written.
  pub fn output_path(&self) -> PathBuf {
    match self.layout {
      TargetLayout::Onefile => self.dist_dir.join(executable_name(&self.name, self)),
      TargetLayout::Onedir => self.dist_dir.join(&self.name),
    }
  }
}

fn executable_name(name: &str, spec: &BuildSpec) -> String {
  match spec.platform.os {
    crate::platform::os::Os::Windows => format!("{name}.exe"),
    _ => name.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::arch::Arch;
  use crate::platform::os::Os;

  #[test]
  fn exclude_pattern_covers_submodules() {
    let p = ExcludePattern::new("tkinter");
    assert!(p.matches("tkinter"));
    assert!(p.matches("tkinter.ttk"));
    assert!(!p.matches("tkinterx"));

    let sub = ExcludePattern::new("pkg.*");
    assert!(!sub.matches("pkg"));
    assert!(sub.matches("pkg.tests"));
  }

  #[test]
  fn auto_compression_stores_native_code() {
    assert!(CompressionPolicy::Auto.compress(EntryKind::PureModule));
    assert!(CompressionPolicy::Auto.compress(EntryKind::Data));
    assert!(!CompressionPolicy::Auto.compress(EntryKind::BinaryDependency));
    assert!(CompressionPolicy::All.compress(EntryKind::ExtensionNative));
    assert!(!CompressionPolicy::None.compress(EntryKind::PureModule));
  }

  #[test]
  fn defaults_derive_name_from_entry() {
    let spec = BuildSpec::new("src/hello.py", "boot", Platform::new(Arch::X86_64, Os::Linux));
    assert_eq!(spec.name, "hello");
    assert_eq!(spec.output_path(), PathBuf::from("dist/hello"));

    let mut win = BuildSpec::new("hello.py", "boot.exe", Platform::new(Arch::X86_64, Os::Windows));
    assert_eq!(win.output_path(), PathBuf::from("dist/hello.exe"));
    win.layout = TargetLayout::Onedir;
    assert_eq!(win.output_path(), PathBuf::from("dist/hello"));
  }
}
