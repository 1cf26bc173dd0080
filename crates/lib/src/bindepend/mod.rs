//! Native dependency discovery.
//!
//! Given the native binaries going into a bundle (extension modules, hook
//! binaries, the interpreter), the scanner finds the shared libraries they
//! link against, recursively, the way the target's dynamic loader would.
//!
//! # Submodules
//!
//! - [`inspect`] - Reading linkage facts out of binaries
//! - [`elf`], [`macho`], [`pe`] - Tool output parsers per format
//! - [`search`] - Loader search order and system library exclusions

pub mod elf;
pub mod inspect;
pub mod macho;
pub mod pe;
pub mod search;
mod types;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info, warn};

pub use inspect::{BinaryInspector, ToolInspector};
pub use search::{LibrarySearch, Requester, RpathSet, is_system_library};
pub use types::*;

use crate::cache::{BuildCache, CacheKey};
use crate::platform::Platform;
use crate::platform::arch::Arch;
use crate::platform::os::Os;

/// Cache namespace for [`BinaryInfo`] records.
pub const CACHE_NAMESPACE: &str = "bindepend";

/// `file format` string objdump prints for PE images of `arch`.
pub fn pe_format(arch: Arch) -> &'static str {
  match arch {
    Arch::X86_64 => "pei-x86-64",
    Arch::Aarch64 => "pei-aarch64-little",
  }
}

/// Cache fingerprint of inspections made by `inspector` for `platform`.
pub fn fingerprint(platform: Platform, inspector: &dyn BinaryInspector) -> String {
  format!("{}:{}", platform.triple(), inspector.id())
}

struct Job {
  path: PathBuf,
  inherited: Vec<RpathSet>,
  root: bool,
}

pub struct BinaryDependencyScanner<'a> {
  inspector: &'a dyn BinaryInspector,
  platform: Platform,
  cache: &'a BuildCache,
  search: LibrarySearch,
  executable: Option<PathBuf>,
}

impl<'a> BinaryDependencyScanner<'a> {
  pub fn new(inspector: &'a dyn BinaryInspector, platform: Platform, cache: &'a BuildCache, search: LibrarySearch) -> Self {
    Self {
      inspector,
      platform,
      cache,
      search,
      executable: None,
    }
  }

  /// Binary `@executable_path` refers to; defaults to the first scanned root.
  pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
    self.executable = Some(executable.into());
    self
  }

  pub fn scan(&self, binary: &Path) -> Result<ScanReport, ScanError> {
    self.scan_all(&[binary.to_path_buf()])
  }

  /// Resolve the transitive library closure of `binaries`.
  ///
  /// Libraries are reported once per bundled name, in breadth-first order.
  /// Tool failures and timeouts on one binary become warnings. A library no
  /// search location provides is an error, and so are two different files
  /// that would be bundled under the same name.
  pub fn scan_all(&self, binaries: &[PathBuf]) -> Result<ScanReport, ScanError> {
    let executable_dir = self
      .executable
      .as_deref()
      .or(binaries.first().map(PathBuf::as_path))
      .and_then(Path::parent)
      .map(Path::to_path_buf)
      .unwrap_or_default();

    let mut report = ScanReport::default();
    let mut memo: HashMap<PathBuf, BinaryInfo> = HashMap::new();
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut by_name: HashMap<String, PathBuf> = HashMap::new();

    let mut frontier: Vec<Job> = Vec::new();
    for binary in binaries {
      if visited.insert(canonical(binary)) {
        frontier.push(Job {
          path: binary.clone(),
          inherited: Vec::new(),
          root: true,
        });
      }
    }

    while !frontier.is_empty() {
      let pending: Vec<&Job> = frontier.iter().filter(|job| !memo.contains_key(&job.path)).collect();
      let inspected: Vec<(PathBuf, Result<BinaryInfo, ScanError>)> = pending
        .par_iter()
        .map(|job| (job.path.clone(), self.info(&job.path)))
        .collect();

      let mut failures = HashMap::new();
      for (path, result) in inspected {
        match result {
          Ok(info) => {
            memo.insert(path, info);
          }
          Err(err) => {
            failures.insert(path, err);
          }
        }
      }

      let mut next = Vec::new();
      for job in &frontier {
        if let Some(err) = failures.remove(&job.path) {
          if !err.is_local() {
            return Err(err);
          }
          warn!(binary = %job.path.display(), error = %err, "skipping binary");
          report.warnings.push(ScanWarning {
            binary: job.path.clone(),
            message: err.to_string(),
          });
          continue;
        }
        let Some(info) = memo.get(&job.path).cloned() else {
          continue;
        };
        if job.root && !self.abi_matches(&info) {
          return Err(ScanError::AbiMismatch {
            path: job.path.clone(),
            found: describe(&info),
            expected: self.expected_machine().to_string(),
          });
        }

        let requester = Requester {
          binary: &job.path,
          info: &info,
          inherited: &job.inherited,
          executable_dir: &executable_dir,
        };
        let mut inherited = Vec::new();
        inherited.extend(requester.rpath_set());
        inherited.extend(job.inherited.iter().cloned());

        for needed in &info.needed {
          if is_system_library(needed, self.platform.os) {
            debug!(library = %needed, "system library, not bundled");
            continue;
          }
          let path = self.resolve(needed, &requester, &mut memo, &mut report)?;
          let name = bundled_name(needed);
          let canonical_path = canonical(&path);

          match by_name.get(&name) {
            Some(existing) if *existing == canonical_path => {}
            Some(existing) => {
              return Err(ScanError::LibraryCollision {
                name,
                first: existing.clone(),
                second: canonical_path,
              });
            }
            None => {
              debug!(library = %name, path = %path.display(), needed_by = %job.path.display(), "resolved library");
              by_name.insert(name.clone(), canonical_path.clone());
              report.libraries.push(ResolvedLibrary {
                name,
                path: path.clone(),
                needed_by: job.path.clone(),
              });
              if visited.insert(canonical_path) {
                next.push(Job {
                  path,
                  inherited: inherited.clone(),
                  root: false,
                });
              }
            }
          }
        }
      }
      frontier = next;
    }

    info!(
      roots = binaries.len(),
      libraries = report.libraries.len(),
      warnings = report.warnings.len(),
      "binary dependency scan complete"
    );
    Ok(report)
  }

  /// First candidate for `needed` built for the target.
  fn resolve(
    &self,
    needed: &str,
    requester: &Requester<'_>,
    memo: &mut HashMap<PathBuf, BinaryInfo>,
    report: &mut ScanReport,
  ) -> Result<PathBuf, ScanError> {
    for candidate in self.search.candidates(needed, requester) {
      let info = match memo.get(&candidate) {
        Some(info) => info.clone(),
        None => match self.info(&candidate) {
          Ok(info) => {
            memo.insert(candidate.clone(), info.clone());
            info
          }
          Err(err) if err.is_local() => {
            warn!(candidate = %candidate.display(), error = %err, "cannot inspect candidate");
            report.warnings.push(ScanWarning {
              binary: candidate.clone(),
              message: err.to_string(),
            });
            continue;
          }
          Err(err) => return Err(err),
        },
      };
      if self.abi_matches(&info) {
        return Ok(candidate);
      }
      debug!(candidate = %candidate.display(), found = %describe(&info), "skipping candidate for another architecture");
    }
    Err(ScanError::UnresolvedLibrary {
      library: needed.to_string(),
      needed_by: requester.binary.to_path_buf(),
    })
  }

  fn info(&self, path: &Path) -> Result<BinaryInfo, ScanError> {
    let fingerprint = fingerprint(self.platform, self.inspector);
    let key = CacheKey::for_file(path, &fingerprint).map_err(|source| ScanError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    if let Some(info) = self.cache.lookup::<BinaryInfo>(CACHE_NAMESPACE, &key)? {
      return Ok(info);
    }
    let info = self.inspector.inspect(path, self.platform.os)?;
    self.cache.store(CACHE_NAMESPACE, &key, &info)?;
    Ok(info)
  }

  fn expected_machine(&self) -> &'static str {
    match self.platform.os {
      Os::Linux => self.platform.arch.elf_machine(),
      Os::MacOs => self.platform.arch.macho_cputype(),
      Os::Windows => pe_format(self.platform.arch),
    }
  }

  fn abi_matches(&self, info: &BinaryInfo) -> bool {
    // Inspectors that report no machine cannot be checked
    if info.machines.is_empty() {
      return true;
    }
    if self.platform.os == Os::Linux
      && let Some(class) = &info.class
      && class != "ELF64"
    {
      return false;
    }
    let expected = self.expected_machine();
    info.machines.iter().any(|m| m == expected)
  }
}

fn describe(info: &BinaryInfo) -> String {
  match (&info.class, info.machines.is_empty()) {
    (_, true) => "an unknown machine".to_string(),
    (Some(class), false) => format!("{} ({class})", info.machines.join(", ")),
    (None, false) => info.machines.join(", "),
  }
}

fn bundled_name(needed: &str) -> String {
  Path::new(needed)
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_else(|| needed.to_string())
}

fn canonical(path: &Path) -> PathBuf {
  dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
