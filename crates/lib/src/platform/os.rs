use std::fmt;
use std::str::FromStr;

/// Operating system variants a bundle can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Os {
  Linux,
  MacOs,
  Windows,
}

impl Os {
  /// Detect the current operating system at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// Returns the lowercase string identifier for this OS
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "darwin",
      Self::Windows => "windows",
    }
  }

  /// Final file-name suffix of interpreter extension modules.
  pub fn extension_suffix(&self) -> &'static str {
    match self {
      Self::Linux | Self::MacOs => ".so",
      Self::Windows => ".pyd",
    }
  }

  /// Separator used in library search path variables.
  pub fn path_list_separator(&self) -> char {
    match self {
      Self::Windows => ';',
      Self::Linux | Self::MacOs => ':',
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Os {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "linux" => Ok(Self::Linux),
      "darwin" | "macos" => Ok(Self::MacOs),
      "windows" => Ok(Self::Windows),
      other => Err(format!("unsupported operating system: {other}")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn current_returns_supported_os() {
    assert!(Os::current().is_some(), "Current OS should be supported");
  }

  #[test]
  fn macos_uses_darwin_identifier() {
    assert_eq!(Os::MacOs.as_str(), "darwin");
    assert_eq!("macos".parse::<Os>().unwrap(), Os::MacOs);
  }

  #[test]
  fn windows_extensions_are_pyd() {
    assert_eq!(Os::Windows.extension_suffix(), ".pyd");
    assert_eq!(Os::Linux.extension_suffix(), ".so");
  }
}
