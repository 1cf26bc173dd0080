//! Mach-O linkage via `otool -h -v -l`.

use super::types::{BinaryFormat, BinaryInfo};

pub const TOOL: &str = "otool";

pub fn args() -> &'static [&'static str] {
  &["-h", "-v", "-l"]
}

const LOAD_COMMANDS: &[&str] = &[
  "LC_LOAD_DYLIB",
  "LC_LOAD_WEAK_DYLIB",
  "LC_REEXPORT_DYLIB",
  "LC_LOAD_UPWARD_DYLIB",
];

/// Parse `otool -h -v -l` output. Fat binaries print one header and command
/// list per slice; libraries and rpaths are merged across slices.
pub fn parse(output: &str) -> BinaryInfo {
  let mut info = BinaryInfo {
    format: Some(BinaryFormat::MachO),
    ..Default::default()
  };
  let mut command = "";

  for line in output.lines() {
    let trimmed = line.trim();
    let mut fields = trimmed.split_whitespace();
    match fields.next() {
      Some(magic) if magic.starts_with("MH_MAGIC") || magic.starts_with("MH_CIGAM") => {
        if let Some(cputype) = fields.next()
          && !info.machines.iter().any(|m| m == cputype)
        {
          info.machines.push(cputype.to_string());
        }
      }
      Some("cmd") => command = fields.next().unwrap_or(""),
      Some("name") if LOAD_COMMANDS.contains(&command) => {
        if let Some(name) = value_before_offset(trimmed, "name")
          && !info.needed.iter().any(|n| n == name)
        {
          info.needed.push(name.to_string());
        }
      }
      Some("path") if command == "LC_RPATH" => {
        if let Some(path) = value_before_offset(trimmed, "path")
          && !info.rpath.iter().any(|p| p == path)
        {
          info.rpath.push(path.to_string());
        }
      }
      _ => {}
    }
  }
  info
}

/// `name /usr/lib/libSystem.B.dylib (offset 24)` -> `/usr/lib/libSystem.B.dylib`
fn value_before_offset<'a>(line: &'a str, key: &str) -> Option<&'a str> {
  let rest = line.strip_prefix(key)?.trim_start();
  let end = rest.rfind(" (offset").unwrap_or(rest.len());
  let value = rest[..end].trim();
  (!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = "\
/tmp/_fast.cpython-311-darwin.so:
Mach header
      magic  cputype cpusubtype  caps    filetype ncmds sizeofcmds      flags
MH_MAGIC_64    ARM64        ALL  0x00      BUNDLE    14       1176   NOUNDEFS DYLDLINK TWOLEVEL
Load command 0
      cmd LC_SEGMENT_64
  cmdsize 552
  segname __TEXT
Load command 9
          cmd LC_LOAD_DYLIB
      cmdsize 56
         name @rpath/libfoo.1.dylib (offset 24)
Load command 10
          cmd LC_LOAD_DYLIB
      cmdsize 56
         name /usr/lib/libSystem.B.dylib (offset 24)
Load command 11
          cmd LC_RPATH
      cmdsize 40
         path @loader_path/../.dylibs (offset 12)
";

  #[test]
  fn parses_cputype_dylibs_and_rpaths() {
    let info = parse(SAMPLE);
    assert_eq!(info.format, Some(BinaryFormat::MachO));
    assert_eq!(info.machines, vec!["ARM64"]);
    assert_eq!(info.needed, vec!["@rpath/libfoo.1.dylib", "/usr/lib/libSystem.B.dylib"]);
    assert_eq!(info.rpath, vec!["@loader_path/../.dylibs"]);
  }

  #[test]
  fn id_dylib_is_not_a_dependency() {
    let output = "\
MH_MAGIC_64 X86_64 ALL 0x00 DYLIB 10 900 NOUNDEFS
Load command 3
          cmd LC_ID_DYLIB
         name @rpath/libself.dylib (offset 24)
";
    let info = parse(output);
    assert_eq!(info.machines, vec!["X86_64"]);
    assert!(info.needed.is_empty());
  }
}
