//! The launch sequence.
//!
//! Locate -> VerifyTrailer -> Extract | MapInMemory -> PreparePath ->
//! LoadInterpreter -> Execute -> Cleanup. Each stage runs once, in order; the
//! first failure ends the run. The extraction directory is owned by a
//! [`TempDir`] guard, so it is removed on every way out of [`run`], including
//! errors and panics.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use pybundle_archive::{ArchiveReader, PythonVersion, ResourceMap};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::BootError;
use crate::extract::{self, ENV_TMPDIR};
use crate::launch::{LaunchPlan, Launcher};
use crate::locate::{Mode, locate};

/// Stages of a launch, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Locate,
  VerifyTrailer,
  Extract,
  MapInMemory,
  PreparePath,
  LoadInterpreter,
  Execute,
  Cleanup,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Stage::Locate => "locate",
      Stage::VerifyTrailer => "verify-trailer",
      Stage::Extract => "extract",
      Stage::MapInMemory => "map-in-memory",
      Stage::PreparePath => "prepare-path",
      Stage::LoadInterpreter => "load-interpreter",
      Stage::Execute => "execute",
      Stage::Cleanup => "cleanup",
    };
    f.write_str(name)
  }
}

/// Inputs of one launch, normally taken from the process itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootConfig {
  /// The running launcher.
  pub executable: PathBuf,
  /// Arguments forwarded to the application.
  pub args: Vec<OsString>,
  /// Directory that receives the private extraction directory.
  pub temp_parent: PathBuf,
}

impl BootConfig {
  pub fn from_env() -> Result<Self, BootError> {
    let executable = std::env::current_exe().map_err(BootError::Executable)?;
    let temp_parent = std::env::var_os(ENV_TMPDIR)
      .filter(|v| !v.is_empty())
      .map(PathBuf::from)
      .unwrap_or_else(std::env::temp_dir);
    Ok(Self {
      executable,
      args: std::env::args_os().skip(1).collect(),
      temp_parent,
    })
  }
}

/// Run the bundle, returning the application's exit code.
pub fn run(config: &BootConfig, launcher: &dyn Launcher) -> Result<i32, BootError> {
  enter(Stage::Locate);
  let located = locate(&config.executable);

  enter(Stage::VerifyTrailer);
  let reader = ArchiveReader::open(&located.archive).map_err(|source| BootError::ArchiveCorrupt {
    path: located.archive.clone(),
    source,
  })?;

  let (guard, map): (Option<TempDir>, ResourceMap) = match located.mode {
    Mode::Extract => {
      enter(Stage::Extract);
      let (dir, map) = extract::extract(&reader, &config.temp_parent)?;
      (Some(dir), map)
    }
    Mode::Map => {
      enter(Stage::MapInMemory);
      (None, extract::map(&reader)?)
    }
  };
  drop(reader);

  enter(Stage::PreparePath);
  let plan = prepare(&map, config.args.clone())?;

  enter(Stage::LoadInterpreter);
  launcher.load(&plan.interpreter)?;

  enter(Stage::Execute);
  let code = launcher.execute(&plan)?;

  enter(Stage::Cleanup);
  if let Some(dir) = guard {
    let path = dir.path().to_path_buf();
    if let Err(err) = dir.close() {
      warn!(dir = %path.display(), error = %err, "failed to remove extraction directory");
    }
  }
  Ok(code)
}

/// Find the entry script and interpreter and describe the child's environment.
pub fn prepare(map: &ResourceMap, args: Vec<OsString>) -> Result<LaunchPlan, BootError> {
  let script = map
    .entry_point
    .as_deref()
    .and_then(|name| map.path_of(name))
    .ok_or(BootError::NoEntryPoint)?;

  let interpreter = match map.interpreter.as_deref().and_then(|name| map.path_of(name)) {
    Some(path) => path,
    None => system_interpreter(map.python)?,
  };
  debug!(interpreter = %interpreter.display(), script = %script.display(), "prepared launch");

  Ok(LaunchPlan::new(interpreter, script, args, map.root()))
}

/// An interpreter on `PATH`. When the bundle names a version, only
/// `pythonX.Y` or a generic `python3`/`python` reporting that version will do.
fn system_interpreter(required: Option<PythonVersion>) -> Result<PathBuf, BootError> {
  let Some(required) = required else {
    return which::which("python3")
      .or_else(|_| which::which("python"))
      .map_err(|_| BootError::NoInterpreter);
  };

  if let Ok(path) = which::which(required.executable_name()) {
    return Ok(path);
  }
  for name in ["python3", "python"] {
    let Ok(path) = which::which(name) else {
      continue;
    };
    let reported = reported_version(&path);
    if reported == Some(required) {
      return Ok(path);
    }
    debug!(interpreter = %path.display(), ?reported, %required, "interpreter version does not match");
  }
  Err(BootError::InterpreterMismatch { required })
}

fn reported_version(interpreter: &Path) -> Option<PythonVersion> {
  let output = Command::new(interpreter)
    .arg("--version")
    .stdin(Stdio::null())
    .output()
    .ok()?;
  let stdout = String::from_utf8_lossy(&output.stdout);
  let stderr = String::from_utf8_lossy(&output.stderr);
  stdout.lines().chain(stderr.lines()).find_map(PythonVersion::from_reported)
}

fn enter(stage: Stage) {
  debug!(%stage, "boot stage");
}
