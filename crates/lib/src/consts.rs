//! Crate-wide constants.

/// Application name, used for cache and data directory names.
pub const APP_NAME: &str = "pybundle";

/// Environment variable overriding the cache directory.
pub const CACHE_DIR_ENV: &str = "PYBUNDLE_CACHE_DIR";

/// Length of truncated object hashes used for cache slot names.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Default per-invocation timeout for external binary inspection tools.
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 30;

/// Version of the on-disk cache layout; a mismatch wipes the cache.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Modules compiled into the interpreter. They resolve without a search and
/// are never bundled.
pub const BUILTIN_MODULES: &[&str] = &[
  "_abc",
  "_ast",
  "_codecs",
  "_collections",
  "_functools",
  "_imp",
  "_io",
  "_locale",
  "_operator",
  "_signal",
  "_sre",
  "_stat",
  "_string",
  "_symtable",
  "_thread",
  "_tokenize",
  "_tracemalloc",
  "_typing",
  "_warnings",
  "_weakref",
  "atexit",
  "builtins",
  "errno",
  "faulthandler",
  "gc",
  "itertools",
  "marshal",
  "nt",
  "posix",
  "pwd",
  "sys",
  "time",
  "winreg",
];
