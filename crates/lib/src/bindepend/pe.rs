//! PE linkage via `objdump -p`.

use super::types::{BinaryFormat, BinaryInfo};

pub const TOOL: &str = "objdump";

pub fn args() -> &'static [&'static str] {
  &["-p"]
}

/// Parse `objdump -p` output: the `file format` line and the import table's
/// `DLL Name:` lines.
pub fn parse(output: &str) -> BinaryInfo {
  let mut info = BinaryInfo {
    format: Some(BinaryFormat::Pe),
    ..Default::default()
  };

  for line in output.lines() {
    if let Some((_, format)) = line.split_once("file format") {
      info.machines.push(format.trim().to_string());
    } else if let Some(name) = line.trim().strip_prefix("DLL Name:") {
      let name = name.trim();
      if !name.is_empty() && !info.needed.iter().any(|n| n.eq_ignore_ascii_case(name)) {
        info.needed.push(name.to_string());
      }
    }
  }
  info
}
