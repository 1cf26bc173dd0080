//! ELF linkage via `readelf -h -d`.
//!
//! readelf reads the headers directly instead of running the dynamic linker
//! like ldd, so it works for binaries built for another architecture.

use super::types::{BinaryFormat, BinaryInfo};

pub const TOOL: &str = "readelf";

pub fn args() -> &'static [&'static str] {
  &["-h", "-d", "-W"]
}

/// Parse `readelf -h -d` output.
///
/// ```text
///   Class:                             ELF64
///   Machine:                           Advanced Micro Devices X86-64
///  0x0000000000000001 (NEEDED)             Shared library: [libz.so.1]
///  0x000000000000000f (RPATH)              Library rpath: [$ORIGIN/../lib]
///  0x000000000000001d (RUNPATH)            Library runpath: [$ORIGIN]
/// ```
pub fn parse(output: &str) -> BinaryInfo {
  let mut info = BinaryInfo {
    format: Some(BinaryFormat::Elf),
    ..Default::default()
  };

  for line in output.lines() {
    let trimmed = line.trim();
    if let Some(class) = trimmed.strip_prefix("Class:") {
      info.class = Some(class.trim().to_string());
    } else if let Some(machine) = trimmed.strip_prefix("Machine:") {
      info.machines.push(machine.trim().to_string());
    } else if line.contains("(NEEDED)") {
      if let Some(name) = bracketed(line) {
        info.needed.push(name.to_string());
      }
    } else if line.contains("(RPATH)") {
      info.rpath.extend(bracketed(line).map(split_path_list).unwrap_or_default());
    } else if line.contains("(RUNPATH)") {
      info.runpath.extend(bracketed(line).map(split_path_list).unwrap_or_default());
    }
  }
  info
}

fn bracketed(line: &str) -> Option<&str> {
  let start = line.find('[')?;
  let end = line.rfind(']')?;
  (end > start).then(|| &line[start + 1..end])
}

fn split_path_list(list: &str) -> Vec<String> {
  list
    .split(':')
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect()
}
