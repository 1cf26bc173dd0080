//! Reading linkage facts out of native binaries.
//!
//! [`ToolInspector`] shells out to the platform's binutils with a bounded
//! timeout per invocation. A tool that hangs is killed, and only the binary
//! being inspected is affected.

use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;
use wait_timeout::ChildExt;

use super::types::{BinaryInfo, ScanError};
use super::{elf, macho, pe};
use crate::platform::os::Os;

/// Source of [`BinaryInfo`] for a file.
pub trait BinaryInspector: Sync {
  /// Stable identifier, part of the cache fingerprint.
  fn id(&self) -> &str;

  fn inspect(&self, path: &Path, os: Os) -> Result<BinaryInfo, ScanError>;
}

/// Inspector backed by `readelf`, `otool` or `objdump`.
#[derive(Debug, Clone)]
pub struct ToolInspector {
  timeout: Duration,
}

impl ToolInspector {
  pub fn new(timeout: Duration) -> Self {
    Self { timeout }
  }

  /// Fail early if the tool for `os` is not on `PATH`.
  pub fn check_available(os: Os) -> Result<(), ScanError> {
    let tool = tool_for(os);
    which::which(tool).map(|_| ()).map_err(|_| ScanError::ToolMissing {
      tool: tool.to_string(),
    })
  }

  fn run(&self, tool: &str, args: &[&str], path: &Path) -> Result<String, ScanError> {
    let program = which::which(tool).map_err(|_| ScanError::ToolMissing { tool: tool.to_string() })?;
    let mut child = Command::new(program)
      .args(args)
      .arg(path)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|source| ScanError::Spawn {
        tool: tool.to_string(),
        source,
      })?;

    // Drain both pipes while waiting so a chatty tool cannot block on a full pipe
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match wait(&mut child, self.timeout, tool)? {
      Some(status) => status,
      None => {
        // Timeout - kill the process
        let _ = child.kill();
        let _ = child.wait();
        return Err(ScanError::Timeout {
          tool: tool.to_string(),
          timeout: self.timeout,
        });
      }
    };

    let stdout = collect(stdout);
    let stderr = collect(stderr);
    if !status.success() {
      return Err(ScanError::ToolFailed {
        tool: tool.to_string(),
        path: path.to_path_buf(),
        message: stderr.trim().to_string(),
      });
    }
    debug!(tool, path = %path.display(), "inspected binary");
    Ok(stdout)
  }
}

impl BinaryInspector for ToolInspector {
  fn id(&self) -> &str {
    "tools"
  }

  fn inspect(&self, path: &Path, os: Os) -> Result<BinaryInfo, ScanError> {
    match os {
      Os::Linux => Ok(elf::parse(&self.run(elf::TOOL, elf::args(), path)?)),
      Os::MacOs => Ok(macho::parse(&self.run(macho::TOOL, macho::args(), path)?)),
      Os::Windows => Ok(pe::parse(&self.run(pe::TOOL, pe::args(), path)?)),
    }
  }
}

fn tool_for(os: Os) -> &'static str {
  match os {
    Os::Linux => elf::TOOL,
    Os::MacOs => macho::TOOL,
    Os::Windows => pe::TOOL,
  }
}

fn wait(child: &mut Child, timeout: Duration, tool: &str) -> Result<Option<std::process::ExitStatus>, ScanError> {
  child.wait_timeout(timeout).map_err(|source| ScanError::Spawn {
    tool: tool.to_string(),
    source,
  })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<io::Result<String>>> {
  pipe.map(|pipe| thread::spawn(move || io::read_to_string(pipe)))
}

fn collect(handle: Option<JoinHandle<io::Result<String>>>) -> String {
  handle
    .and_then(|h| h.join().ok())
    .and_then(Result::ok)
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[cfg(unix)]
  #[test]
  fn timeout_kills_the_tool() {
    use std::time::Instant;

    let inspector = ToolInspector::new(Duration::from_millis(200));
    let started = Instant::now();
    let err = inspector.run("sleep", &[], Path::new("5")).unwrap_err();
    assert!(matches!(err, ScanError::Timeout { .. }), "unexpected: {err}");
    assert!(err.is_local());
    assert!(started.elapsed() < Duration::from_secs(4));
  }

  #[cfg(unix)]
  #[test]
  fn failing_tool_reports_stderr() {
    let inspector = ToolInspector::new(Duration::from_secs(5));
    let err = inspector.run("ls", &[], Path::new("/definitely/not/here")).unwrap_err();
    match err {
      ScanError::ToolFailed { tool, message, .. } => {
        assert_eq!(tool, "ls");
        assert!(!message.is_empty());
      }
      other => panic!("unexpected: {other}"),
    }
  }

  #[test]
  fn missing_tool_is_reported() {
    let inspector = ToolInspector::new(Duration::from_secs(1));
    let err = inspector
      .run("pybundle-no-such-tool", &[], Path::new("x"))
      .unwrap_err();
    assert!(matches!(err, ScanError::ToolMissing { .. }));
  }
}
