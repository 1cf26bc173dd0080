//! The interpreter version a bundle was built against.
//!
//! Recorded in the trailer so the bootloader can refuse an interpreter that
//! cannot run the bundled bytecode or load the bundled extensions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid python version '{0}', expected MAJOR.MINOR")]
pub struct InvalidPythonVersion(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PythonVersion {
  pub major: u8,
  pub minor: u8,
}

impl PythonVersion {
  pub const fn new(major: u8, minor: u8) -> Self {
    Self { major, minor }
  }

  /// Trailer encoding: `major << 8 | minor`, zero meaning "not recorded".
  pub fn encode(version: Option<Self>) -> u16 {
    version.map_or(0, |v| (u16::from(v.major) << 8) | u16::from(v.minor))
  }

  pub fn decode(raw: u16) -> Option<Self> {
    if raw == 0 {
      return None;
    }
    let [major, minor] = raw.to_be_bytes();
    Some(Self { major, minor })
  }

  /// Parse the first line of `python --version` (`Python 3.12.1`).
  pub fn from_reported(output: &str) -> Option<Self> {
    let version = output.trim().strip_prefix("Python ")?;
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor: String = parts.next()?.chars().take_while(char::is_ascii_digit).collect();
    Some(Self::new(major, minor.parse().ok()?))
  }

  /// First two bytes of a `.pyc` header written by this version, when known.
  pub fn bytecode_magic(self) -> Option<u16> {
    let magic = match (self.major, self.minor) {
      (3, 6) => 3379,
      (3, 7) => 3394,
      (3, 8) => 3413,
      (3, 9) => 3425,
      (3, 10) => 3439,
      (3, 11) => 3495,
      (3, 12) => 3531,
      (3, 13) => 3571,
      _ => return None,
    };
    Some(magic)
  }

  /// Whether a compiled module header was produced by this version.
  ///
  /// Unknown versions accept any well-formed header.
  pub fn accepts_bytecode(self, header: &[u8]) -> bool {
    let Some(found) = pyc_magic(header) else {
      return false;
    };
    self.bytecode_magic().is_none_or(|magic| magic == found)
  }

  /// Whether an extension tagged `tag` (`cpython-312-x86_64-linux-gnu`,
  /// `cp312-win_amd64`, `abi3`) loads into this version.
  pub fn accepts_abi_tag(self, tag: &str) -> bool {
    if tag == "abi3" || tag.starts_with("abi3-") {
      return true;
    }
    let Some(rest) = tag.strip_prefix("cpython-").or_else(|| tag.strip_prefix("cp")) else {
      return false;
    };
    let ours = format!("{}{}", self.major, self.minor);
    match rest.strip_prefix(ours.as_str()) {
      Some(tail) => tail.is_empty() || tail.starts_with('-'),
      None => false,
    }
  }

  /// Versioned executable name, `python3.12`.
  pub fn executable_name(self) -> String {
    format!("python{self}")
  }
}

/// Magic number of a `.pyc` header: a little-endian u16 followed by `\r\n`.
pub fn pyc_magic(header: &[u8]) -> Option<u16> {
  match header {
    [lo, hi, b'\r', b'\n', ..] => Some(u16::from_le_bytes([*lo, *hi])),
    _ => None,
  }
}

impl fmt::Display for PythonVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.major, self.minor)
  }
}

impl FromStr for PythonVersion {
  type Err = InvalidPythonVersion;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || InvalidPythonVersion(s.to_string());
    let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;
    let major: u8 = major.parse().map_err(|_| invalid())?;
    let minor: u8 = minor.parse().map_err(|_| invalid())?;
    if major == 0 {
      return Err(invalid());
    }
    Ok(Self { major, minor })
  }
}

impl From<PythonVersion> for String {
  fn from(version: PythonVersion) -> Self {
    version.to_string()
  }
}

impl TryFrom<String> for PythonVersion {
  type Error = InvalidPythonVersion;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const PY312: PythonVersion = PythonVersion::new(3, 12);

  #[test]
  fn parses_and_prints_major_minor() {
    assert_eq!("3.12".parse::<PythonVersion>().unwrap(), PY312);
    assert_eq!(PY312.to_string(), "3.12");
    assert_eq!(PY312.executable_name(), "python3.12");
    assert!("3".parse::<PythonVersion>().is_err());
    assert!("0.1".parse::<PythonVersion>().is_err());
    assert!("3.x".parse::<PythonVersion>().is_err());
  }

  #[test]
  fn reads_interpreter_banner() {
    assert_eq!(PythonVersion::from_reported("Python 3.12.1\n"), Some(PY312));
    assert_eq!(PythonVersion::from_reported("Python 3.13.0rc2"), Some(PythonVersion::new(3, 13)));
    assert_eq!(PythonVersion::from_reported("sh: python: not found"), None);
  }

  #[test]
  fn trailer_encoding_reserves_zero_for_unknown() {
    assert_eq!(PythonVersion::encode(None), 0);
    assert_eq!(PythonVersion::encode(Some(PY312)), 0x030c);
    assert_eq!(PythonVersion::decode(0x030c), Some(PY312));
    assert_eq!(PythonVersion::decode(0), None);
  }

  #[test]
  fn abi_tags_must_match_the_interpreter() {
    assert!(PY312.accepts_abi_tag("cpython-312-x86_64-linux-gnu"));
    assert!(PY312.accepts_abi_tag("cp312-win_amd64"));
    assert!(PY312.accepts_abi_tag("abi3"));
    assert!(!PY312.accepts_abi_tag("cpython-311-x86_64-linux-gnu"));
    assert!(!PY312.accepts_abi_tag("cpython-3120-x86_64-linux-gnu"));
    assert!(!PY312.accepts_abi_tag("cpython-312t-x86_64-linux-gnu"));
    assert!(!PY312.accepts_abi_tag("pypy39-pp73"));
  }

  #[test]
  fn bytecode_header_is_checked_against_the_magic() {
    let mut header = 3531u16.to_le_bytes().to_vec();
    header.extend_from_slice(b"\r\n\0\0");
    assert!(PY312.accepts_bytecode(&header));
    assert!(!PythonVersion::new(3, 11).accepts_bytecode(&header));
    assert!(PythonVersion::new(3, 99).accepts_bytecode(&header));
    assert!(!PY312.accepts_bytecode(b"print(1)"));
  }

  #[test]
  fn serializes_as_a_string() {
    assert_eq!(serde_json::to_string(&PY312).unwrap(), "\"3.12\"");
    assert_eq!(serde_json::from_str::<PythonVersion>("\"3.9\"").unwrap(), PythonVersion::new(3, 9));
  }
}
