//! Finding out which interpreter version a bundle targets.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use pybundle_archive::PythonVersion;
use tracing::debug;
use wait_timeout::ChildExt;

/// `python3`, then `python`, on the build host's `PATH`.
pub fn host_interpreter() -> Option<PathBuf> {
  which::which("python3").or_else(|_| which::which("python")).ok()
}

/// Ask `interpreter` for its version. Any failure, including a timeout,
/// yields `None`.
pub fn detect_version(interpreter: &Path, timeout: Duration) -> Option<PythonVersion> {
  let mut child = Command::new(interpreter)
    .arg("--version")
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .spawn()
    .ok()?;

  let status = match child.wait_timeout(timeout) {
    Ok(Some(status)) => status,
    _ => {
      let _ = child.kill();
      let _ = child.wait();
      debug!(interpreter = %interpreter.display(), "version query did not finish");
      return None;
    }
  };
  if !status.success() {
    return None;
  }

  // Old interpreters print the banner on stderr
  let mut banner = String::new();
  for pipe in [child.stdout.take().map(box_read), child.stderr.take().map(box_read)]
    .into_iter()
    .flatten()
  {
    let mut text = String::new();
    if pipe.take(256).read_to_string(&mut text).is_ok() {
      banner.push_str(&text);
    }
  }
  let version = banner.lines().find_map(PythonVersion::from_reported);
  debug!(interpreter = %interpreter.display(), ?version, "queried interpreter version");
  version
}

fn box_read<R: Read + 'static>(pipe: R) -> Box<dyn Read> {
  Box::new(pipe)
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use std::fs;
  use std::os::unix::fs::PermissionsExt;
  use tempfile::TempDir;

  fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
  }

  #[test]
  fn reads_the_banner_from_either_stream() {
    let temp = TempDir::new().unwrap();
    let stdout = script(temp.path(), "out", "echo 'Python 3.12.4'");
    assert_eq!(detect_version(&stdout, Duration::from_secs(5)), Some(PythonVersion::new(3, 12)));

    let stderr = script(temp.path(), "err", "echo 'Python 3.9.18' >&2");
    assert_eq!(detect_version(&stderr, Duration::from_secs(5)), Some(PythonVersion::new(3, 9)));
  }

  #[test]
  fn failures_are_unknown_versions() {
    let temp = TempDir::new().unwrap();
    let failing = script(temp.path(), "failing", "exit 3");
    assert_eq!(detect_version(&failing, Duration::from_secs(5)), None);

    let slow = script(temp.path(), "slow", "sleep 5");
    assert_eq!(detect_version(&slow, Duration::from_millis(100)), None);

    assert_eq!(detect_version(&temp.path().join("absent"), Duration::from_secs(1)), None);
  }
}
