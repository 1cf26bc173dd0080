//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Stand-in launcher; builds never execute it.
pub const BOOTLOADER_STUB: &str = "#!pybundle-boot-stub\n";

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the project sources,
/// the cache and the build output.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// A project with `app.py` importing `helper` and the `tools` package.
  pub fn sample_project() -> Self {
    let env = Self::empty();
    env.write_file("src/app.py", "import helper\nfrom tools import fmt\nraise SystemExit(helper.CODE)\n");
    env.write_file("src/helper.py", "CODE = 3\n");
    env.write_file("src/tools/__init__.py", "");
    env.write_file("src/tools/fmt.py", "def fmt(x):\n    return str(x)\n");
    env
  }

  /// Create an empty test environment with a stub bootloader.
  pub fn empty() -> Self {
    let temp = TempDir::new().unwrap();
    let env = Self { temp };
    env.write_file("boot/pybundle-boot", BOOTLOADER_STUB);
    env
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  pub fn path(&self, relative_path: &str) -> PathBuf {
    self.temp.path().join(relative_path)
  }

  /// Cache path (isolated per test).
  pub fn cache_path(&self) -> PathBuf {
    let p = self.temp.path().join("cache");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Output path for bundles.
  pub fn dist_path(&self) -> PathBuf {
    let p = self.temp.path().join("dist");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Get a pre-configured Command for the pybundle binary.
  ///
  /// Runs in the project directory with `PYBUNDLE_CACHE_DIR` pointing at the
  /// isolated cache.
  pub fn pybundle_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("pybundle");
    cmd.current_dir(self.temp.path());
    cmd.env("PYBUNDLE_CACHE_DIR", self.cache_path());
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// `pybundle build src/app.py` with the stub bootloader and extra `args`.
  pub fn build(&self, args: &[&str]) -> Command {
    let mut cmd = self.pybundle_cmd();
    cmd.arg("build").arg("src/app.py");
    cmd.arg("--bootloader").arg(self.path("boot/pybundle-boot"));
    cmd.arg("--distpath").arg(self.dist_path());
    cmd.args(args);
    cmd
  }
}
