//! Shared helpers for library integration tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use pybundle_lib::bindepend::{BinaryFormat, BinaryInfo, BinaryInspector, ScanError};
use pybundle_lib::platform::Platform;
use pybundle_lib::platform::arch::Arch;
use pybundle_lib::platform::os::Os;
use tempfile::TempDir;

/// A throwaway source tree.
pub struct Project {
  pub temp: TempDir,
}

impl Project {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn root(&self) -> &Path {
    self.temp.path()
  }

  pub fn path(&self, relative: &str) -> PathBuf {
    self.temp.path().join(relative)
  }

  /// Write a file relative to the project root.
  pub fn write(&self, relative: &str, content: &str) -> PathBuf {
    let path = self.path(relative);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }
}

pub fn linux_x86_64() -> Platform {
  Platform::new(Arch::X86_64, Os::Linux)
}

/// Inspector answering from a fixed table instead of running binutils.
#[derive(Default)]
pub struct FakeInspector {
  infos: Mutex<HashMap<PathBuf, BinaryInfo>>,
}

impl FakeInspector {
  /// Register an x86-64 ELF object at `path` linking `needed`.
  pub fn elf(&self, path: &Path, needed: &[&str], rpath: &[&str]) {
    self.infos.lock().unwrap().insert(
      path.to_path_buf(),
      BinaryInfo {
        format: Some(BinaryFormat::Elf),
        machines: vec![Arch::X86_64.elf_machine().to_string()],
        class: Some("ELF64".to_string()),
        needed: needed.iter().map(|s| s.to_string()).collect(),
        rpath: rpath.iter().map(|s| s.to_string()).collect(),
        runpath: Vec::new(),
      },
    );
  }
}

impl BinaryInspector for FakeInspector {
  fn id(&self) -> &str {
    "fake"
  }

  fn inspect(&self, path: &Path, _os: Os) -> Result<BinaryInfo, ScanError> {
    self
      .infos
      .lock()
      .unwrap()
      .get(path)
      .cloned()
      .ok_or_else(|| ScanError::ToolFailed {
        tool: "fake".to_string(),
        path: path.to_path_buf(),
        message: "unknown binary".to_string(),
      })
  }
}
