//! Run-time library search order, replicated per platform.
//!
//! Linux follows `ld.so`: `DT_RPATH` of the requesting object and of its
//! loaders (ignored when the requester has `DT_RUNPATH`), `LD_LIBRARY_PATH`,
//! `DT_RUNPATH`, the `ld.so.conf` directories, then the default directories.
//! macOS follows dyld's `@rpath`/`@loader_path`/`@executable_path` expansion
//! with `DYLD_LIBRARY_PATH` and the fallback directories. Windows looks in the
//! binary's own directory, then `PATH`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::types::BinaryInfo;
use crate::platform::Platform;
use crate::platform::os::Os;

const LD_SO_CONF: &str = "/etc/ld.so.conf";

/// Rpath entries of one object in the load chain, with the directory
/// `$ORIGIN`/`@loader_path` expands to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpathSet {
  pub origin: PathBuf,
  pub dirs: Vec<String>,
}

/// One library lookup: who asks, and what their loaders contribute.
#[derive(Debug, Clone, Copy)]
pub struct Requester<'a> {
  pub binary: &'a Path,
  pub info: &'a BinaryInfo,
  /// Rpath sets of the objects that loaded `binary`, nearest first.
  pub inherited: &'a [RpathSet],
  /// Directory `@executable_path` expands to.
  pub executable_dir: &'a Path,
}

impl Requester<'_> {
  fn origin(&self) -> PathBuf {
    self
      .binary
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from("."))
  }

  /// The set this requester passes on to the libraries it loads.
  pub fn rpath_set(&self) -> Option<RpathSet> {
    if self.info.rpath.is_empty() || !self.info.runpath.is_empty() {
      return None;
    }
    Some(RpathSet {
      origin: self.origin(),
      dirs: self.info.rpath.clone(),
    })
  }
}

#[derive(Debug, Clone)]
pub struct LibrarySearch {
  platform: Platform,
  env_paths: Vec<PathBuf>,
  system_dirs: Vec<PathBuf>,
}

impl LibrarySearch {
  pub fn new(platform: Platform, env_paths: Vec<PathBuf>, system_dirs: Vec<PathBuf>) -> Self {
    Self {
      platform,
      env_paths,
      system_dirs,
    }
  }

  /// Search configuration of the build host for `platform`.
  pub fn from_env(platform: Platform) -> Self {
    let var = match platform.os {
      Os::Linux => "LD_LIBRARY_PATH",
      Os::MacOs => "DYLD_LIBRARY_PATH",
      Os::Windows => "PATH",
    };
    let env_paths = std::env::var_os(var)
      .map(|value| std::env::split_paths(&value).filter(|p| !p.as_os_str().is_empty()).collect())
      .unwrap_or_default();

    let system_dirs = match platform.os {
      Os::Linux => {
        let mut dirs = ld_so_conf_dirs(Path::new(LD_SO_CONF));
        for dir in default_linux_dirs(&platform) {
          if !dirs.contains(&dir) {
            dirs.push(dir);
          }
        }
        dirs
      }
      Os::MacOs => {
        let mut dirs = Vec::new();
        if let Some(home) = crate::platform::paths::home_dir() {
          dirs.push(home.join("lib"));
        }
        dirs.push(PathBuf::from("/usr/local/lib"));
        dirs.push(PathBuf::from("/usr/lib"));
        dirs
      }
      Os::Windows => Vec::new(),
    };
    debug!(?env_paths, ?system_dirs, "library search configuration");
    Self::new(platform, env_paths, system_dirs)
  }

  /// Existing candidate files for `name`, in search order.
  pub fn candidates(&self, name: &str, requester: &Requester<'_>) -> Vec<PathBuf> {
    let paths = match self.platform.os {
      Os::Linux => self.linux(name, requester),
      Os::MacOs => self.macos(name, requester),
      Os::Windows => self.windows(name, requester),
    };
    let mut seen = Vec::new();
    for path in paths {
      if path.is_file() && !seen.contains(&path) {
        seen.push(path);
      }
    }
    seen
  }

  fn linux(&self, name: &str, requester: &Requester<'_>) -> Vec<PathBuf> {
    let origin = requester.origin();
    if name.contains('/') {
      return vec![PathBuf::from(self.expand_elf(name, &origin))];
    }

    let mut dirs: Vec<PathBuf> = Vec::new();
    if requester.info.runpath.is_empty() {
      for set in requester.rpath_set().iter().chain(requester.inherited) {
        dirs.extend(set.dirs.iter().map(|d| PathBuf::from(self.expand_elf(d, &set.origin))));
      }
    }
    dirs.extend(self.env_paths.iter().cloned());
    dirs.extend(
      requester
        .info
        .runpath
        .iter()
        .map(|d| PathBuf::from(self.expand_elf(d, &origin))),
    );
    dirs.extend(self.system_dirs.iter().cloned());
    dirs.into_iter().map(|d| d.join(name)).collect()
  }

  fn expand_elf(&self, value: &str, origin: &Path) -> String {
    let origin = origin.to_string_lossy();
    let lib = elf_lib_dir(&self.platform);
    value
      .replace("${ORIGIN}", &origin)
      .replace("$ORIGIN", &origin)
      .replace("${LIB}", lib)
      .replace("$LIB", lib)
      .replace("${PLATFORM}", self.platform.arch.as_str())
      .replace("$PLATFORM", self.platform.arch.as_str())
  }

  fn macos(&self, name: &str, requester: &Requester<'_>) -> Vec<PathBuf> {
    let origin = requester.origin();
    let expand = |value: &str| -> PathBuf {
      if let Some(rest) = value.strip_prefix("@loader_path") {
        origin.join(rest.trim_start_matches('/'))
      } else if let Some(rest) = value.strip_prefix("@executable_path") {
        requester.executable_dir.join(rest.trim_start_matches('/'))
      } else {
        PathBuf::from(value)
      }
    };

    let mut paths = Vec::new();
    if let Some(rest) = name.strip_prefix("@rpath/") {
      let own = RpathSet {
        origin: origin.clone(),
        dirs: requester.info.rpath.clone(),
      };
      for set in std::iter::once(&own).chain(requester.inherited) {
        for dir in &set.dirs {
          let dir = if let Some(tail) = dir.strip_prefix("@loader_path") {
            set.origin.join(tail.trim_start_matches('/'))
          } else {
            expand(dir)
          };
          paths.push(dir.join(rest));
        }
      }
      return paths;
    }
    if name.starts_with('@') {
      return vec![expand(name)];
    }

    let file_name = Path::new(name).file_name().map(PathBuf::from).unwrap_or_else(|| PathBuf::from(name));
    paths.extend(self.env_paths.iter().map(|d| d.join(&file_name)));
    if name.contains('/') {
      paths.push(PathBuf::from(name));
    }
    paths.extend(self.system_dirs.iter().map(|d| d.join(&file_name)));
    paths
  }

  fn windows(&self, name: &str, requester: &Requester<'_>) -> Vec<PathBuf> {
    std::iter::once(requester.origin())
      .chain(self.env_paths.iter().cloned())
      .chain(self.system_dirs.iter().cloned())
      .map(|d| d.join(name))
      .collect()
  }
}

/// What `$LIB` expands to: the multiarch directory when the host has one.
fn elf_lib_dir(platform: &Platform) -> &'static str {
  match platform.arch {
    crate::platform::arch::Arch::X86_64 if Path::new("/usr/lib/x86_64-linux-gnu").is_dir() => "lib/x86_64-linux-gnu",
    crate::platform::arch::Arch::Aarch64 if Path::new("/usr/lib/aarch64-linux-gnu").is_dir() => {
      "lib/aarch64-linux-gnu"
    }
    _ => "lib64",
  }
}

fn default_linux_dirs(platform: &Platform) -> Vec<PathBuf> {
  let tuple = platform.arch.multiarch_tuple();
  vec![
    PathBuf::from("/lib").join(tuple),
    PathBuf::from("/usr/lib").join(tuple),
    PathBuf::from("/lib64"),
    PathBuf::from("/usr/lib64"),
    PathBuf::from("/lib"),
    PathBuf::from("/usr/lib"),
  ]
}

/// Directories listed in an `ld.so.conf`, following `include` globs.
pub fn ld_so_conf_dirs(conf: &Path) -> Vec<PathBuf> {
  let mut dirs = Vec::new();
  read_ld_so_conf(conf, &mut dirs, 0);
  dirs
}

fn read_ld_so_conf(conf: &Path, dirs: &mut Vec<PathBuf>, depth: usize) {
  if depth > 8 {
    return;
  }
  let Ok(content) = fs::read_to_string(conf) else {
    return;
  };
  let base = conf.parent().unwrap_or(Path::new("/"));

  for line in content.lines() {
    let line = line.split('#').next().unwrap_or("").trim();
    if line.is_empty() {
      continue;
    }
    if let Some(pattern) = line.strip_prefix("include") {
      let pattern = pattern.trim();
      let pattern = if Path::new(pattern).is_absolute() {
        PathBuf::from(pattern)
      } else {
        base.join(pattern)
      };
      let Ok(matches) = glob::glob(&pattern.to_string_lossy()) else {
        continue;
      };
      let mut files: Vec<PathBuf> = matches.filter_map(Result::ok).collect();
      files.sort();
      for file in files {
        read_ld_so_conf(&file, dirs, depth + 1);
      }
    } else if line.starts_with("hwcap") {
      continue;
    } else {
      let dir = PathBuf::from(line);
      if !dirs.contains(&dir) {
        dirs.push(dir);
      }
    }
  }
}

/// Libraries every target system provides; they are never bundled.
pub fn is_system_library(name: &str, os: Os) -> bool {
  match os {
    Os::Linux => {
      let file = Path::new(name).file_name().and_then(|f| f.to_str()).unwrap_or(name);
      let stem = file.split(".so").next().unwrap_or(file);
      const PREFIXES: &[&str] = &["ld-linux", "ld64.so", "libnss_", "linux-vdso", "linux-gate"];
      const STEMS: &[&str] = &[
        "libc",
        "libdl",
        "libm",
        "libpthread",
        "librt",
        "libutil",
        "libresolv",
        "libnsl",
        "libcrypt",
        "libanl",
        "libBrokenLocale",
        "libmvec",
        "libthread_db",
      ];
      STEMS.contains(&stem) || PREFIXES.iter().any(|p| file.starts_with(p))
    }
    Os::MacOs => {
      name.starts_with("/usr/lib/") || name.starts_with("/System/") || name.starts_with("/Library/Apple/")
    }
    Os::Windows => {
      let lower = name.to_ascii_lowercase();
      const DLLS: &[&str] = &[
        "kernel32.dll",
        "user32.dll",
        "gdi32.dll",
        "advapi32.dll",
        "shell32.dll",
        "ole32.dll",
        "oleaut32.dll",
        "ws2_32.dll",
        "ntdll.dll",
        "msvcrt.dll",
        "comctl32.dll",
        "comdlg32.dll",
        "crypt32.dll",
        "bcrypt.dll",
        "rpcrt4.dll",
        "secur32.dll",
        "shlwapi.dll",
        "version.dll",
        "winmm.dll",
        "iphlpapi.dll",
        "ucrtbase.dll",
      ];
      lower.starts_with("api-ms-win-") || lower.starts_with("ext-ms-") || DLLS.contains(&lower.as_str())
    }
  }
}
