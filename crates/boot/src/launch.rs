//! Starting the interpreter on the entry script.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use pybundle_archive::ENV_BUNDLE_DIR;
use tracing::debug;

use crate::error::BootError;

/// Variable the platform's dynamic loader searches for shared libraries.
#[cfg(target_os = "linux")]
pub const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";
#[cfg(target_os = "macos")]
pub const LIBRARY_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub const LIBRARY_PATH_VAR: &str = "PATH";

/// Everything needed to hand control to the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
  pub interpreter: PathBuf,
  pub script: PathBuf,
  pub args: Vec<OsString>,
  /// Variables set on the child on top of the inherited environment.
  pub env: Vec<(OsString, OsString)>,
}

impl LaunchPlan {
  /// Plan a run of `script` with the bundle rooted at `root`.
  pub fn new(interpreter: PathBuf, script: PathBuf, args: Vec<OsString>, root: &Path) -> Self {
    let env = vec![
      (OsString::from(ENV_BUNDLE_DIR), root.as_os_str().to_os_string()),
      (OsString::from("PYTHONPATH"), prepend(root, std::env::var_os("PYTHONPATH"))),
      (OsString::from(LIBRARY_PATH_VAR), prepend(root, std::env::var_os(LIBRARY_PATH_VAR))),
    ];
    Self {
      interpreter,
      script,
      args,
      env,
    }
  }

  pub fn env_var(&self, name: &str) -> Option<&OsStr> {
    self
      .env
      .iter()
      .find(|(key, _)| key == name)
      .map(|(_, value)| value.as_os_str())
  }
}

/// Loads and runs the interpreter. Implementations must not return before the
/// application has finished.
pub trait Launcher {
  /// Check that `interpreter` can be started.
  fn load(&self, interpreter: &Path) -> Result<(), BootError>;

  /// Run the plan to completion, returning the application's exit code.
  fn execute(&self, plan: &LaunchPlan) -> Result<i32, BootError>;
}

/// Runs the interpreter as a child process and waits for it.
///
/// While the child runs, terminal interrupts (`SIGINT`, `SIGQUIT`) are left to
/// the child alone and `SIGTERM`/`SIGHUP` are passed on to it, so the launcher
/// always outlives the application and reports its exit code.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
  fn load(&self, interpreter: &Path) -> Result<(), BootError> {
    let metadata = std::fs::metadata(interpreter).map_err(|source| BootError::InterpreterLoad {
      path: interpreter.to_path_buf(),
      source,
    })?;
    if !metadata.is_file() {
      return Err(BootError::InterpreterLoad {
        path: interpreter.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file"),
      });
    }
    Ok(())
  }

  fn execute(&self, plan: &LaunchPlan) -> Result<i32, BootError> {
    debug!(
      interpreter = %plan.interpreter.display(),
      script = %plan.script.display(),
      args = plan.args.len(),
      "starting interpreter"
    );
    let mut child = Command::new(&plan.interpreter)
      .arg(&plan.script)
      .args(&plan.args)
      .envs(plan.env.iter().map(|(k, v)| (k, v)))
      .spawn()
      .map_err(|source| BootError::InterpreterLoad {
        path: plan.interpreter.clone(),
        source,
      })?;

    let forwarding = signals::Forwarding::install(child.id());
    let status = child.wait();
    drop(forwarding);

    let status = status.map_err(|source| BootError::InterpreterLoad {
      path: plan.interpreter.clone(),
      source,
    })?;
    let code = exit_code(status);
    debug!(code, "interpreter exited");
    Ok(code)
  }
}

/// The child's exit code, or `128 + signal` when it was killed.
pub fn exit_code(status: ExitStatus) -> i32 {
  if let Some(code) = status.code() {
    return code;
  }
  #[cfg(unix)]
  {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = status.signal() {
      return 128 + signal;
    }
  }
  1
}

#[cfg(unix)]
mod signals {
  use std::sync::atomic::{AtomicI32, Ordering};

  use tracing::debug;

  /// Pid of the running application, 0 when none.
  static CHILD: AtomicI32 = AtomicI32::new(0);

  const IGNORED: [libc::c_int; 2] = [libc::SIGINT, libc::SIGQUIT];
  const FORWARDED: [libc::c_int; 2] = [libc::SIGTERM, libc::SIGHUP];

  extern "C" fn forward(signal: libc::c_int) {
    let pid = CHILD.load(Ordering::SeqCst);
    if pid > 0 {
      // kill(2) is async-signal-safe
      unsafe {
        libc::kill(pid, signal);
      }
    }
  }

  /// Signal dispositions for the lifetime of one child; the previous ones
  /// come back on drop.
  pub struct Forwarding {
    previous: Vec<(libc::c_int, libc::sighandler_t)>,
  }

  impl Forwarding {
    pub fn install(pid: u32) -> Self {
      CHILD.store(i32::try_from(pid).unwrap_or(0), Ordering::SeqCst);
      let handler = forward as extern "C" fn(libc::c_int) as libc::sighandler_t;
      let mut previous = Vec::with_capacity(IGNORED.len() + FORWARDED.len());
      for signal in IGNORED {
        previous.push((signal, unsafe { libc::signal(signal, libc::SIG_IGN) }));
      }
      for signal in FORWARDED {
        previous.push((signal, unsafe { libc::signal(signal, handler) }));
      }
      debug!(pid, "forwarding signals to the application");
      Self { previous }
    }
  }

  impl Drop for Forwarding {
    fn drop(&mut self) {
      for (signal, handler) in self.previous.drain(..).rev() {
        if handler != libc::SIG_ERR {
          unsafe {
            libc::signal(signal, handler);
          }
        }
      }
      CHILD.store(0, Ordering::SeqCst);
    }
  }
}

#[cfg(not(unix))]
mod signals {
  /// Console control events already reach every process attached to the
  /// console.
  pub struct Forwarding;

  impl Forwarding {
    pub fn install(_pid: u32) -> Self {
      Forwarding
    }
  }
}

fn prepend(dir: &Path, existing: Option<OsString>) -> OsString {
  let mut paths = vec![dir.to_path_buf()];
  if let Some(existing) = existing {
    paths.extend(std::env::split_paths(&existing).filter(|p| !p.as_os_str().is_empty()));
  }
  std::env::join_paths(&paths).unwrap_or_else(|_| dir.as_os_str().to_os_string())
}
