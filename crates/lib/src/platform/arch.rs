use std::fmt;
use std::str::FromStr;

/// CPU architecture variants a bundle can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Arch {
  X86_64,
  Aarch64,
}

impl Arch {
  /// Detect the current CPU architecture at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::ARCH {
      "x86_64" => Some(Self::X86_64),
      "aarch64" => Some(Self::Aarch64),
      _ => None,
    }
  }

  /// Returns the lowercase string identifier for this architecture
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86_64",
      Self::Aarch64 => "aarch64",
    }
  }

  /// Machine name as printed in the `Machine:` line of `readelf -h`.
  pub fn elf_machine(&self) -> &'static str {
    match self {
      Self::X86_64 => "Advanced Micro Devices X86-64",
      Self::Aarch64 => "AArch64",
    }
  }

  /// CPU type as printed by `otool -hv`.
  pub fn macho_cputype(&self) -> &'static str {
    match self {
      Self::X86_64 => "X86_64",
      Self::Aarch64 => "ARM64",
    }
  }

  /// Multiarch tuple used by Debian-style library directories.
  pub fn multiarch_tuple(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86_64-linux-gnu",
      Self::Aarch64 => "aarch64-linux-gnu",
    }
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Arch {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "x86_64" | "amd64" => Ok(Self::X86_64),
      "aarch64" | "arm64" => Ok(Self::Aarch64),
      other => Err(format!("unsupported architecture: {other}")),
    }
  }
}
