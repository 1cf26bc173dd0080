//! Persistent build cache.
//!
//! Caches analysis results that are expensive to recompute, such as the
//! linked-library set of a native binary, across build invocations.
//!
//! # Layout
//!
//! ```text
//! {cache_dir}/
//! ├── .lock                   # Held for the whole build (single writer)
//! ├── meta.json               # Cache format version
//! └── <namespace>/
//!     └── <slot>.json         # { "key": ..., "value": ... }
//! ```
//!
//! A slot is named by the hash of the file path and build fingerprint only.
//! The stored key additionally carries size and modification time, and a
//! lookup hits only when every field matches exactly. A changed file therefore
//! overwrites its own slot instead of accumulating stale siblings.

pub mod lock;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::consts::CACHE_FORMAT_VERSION;
use crate::util::hash::{HashError, Hashable, ObjectHash};

pub use lock::{CacheLock, CacheLockError};

const META_FILENAME: &str = "meta.json";

#[derive(Debug, Error)]
pub enum CacheError {
  #[error(transparent)]
  Lock(#[from] CacheLockError),

  #[error("cache I/O error at {path}: {source}", path = .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to serialize cache entry: {0}")]
  Serialize(#[from] HashError),
}

impl CacheError {
  fn io(path: &Path, source: io::Error) -> Self {
    Self::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

/// Identity of a cached analysis of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKey {
  pub path: PathBuf,
  pub size: u64,
  pub mtime_ns: u128,
  pub fingerprint: String,
}

#[derive(Serialize)]
struct SlotId<'a> {
  path: &'a Path,
  fingerprint: &'a str,
}

impl Hashable for SlotId<'_> {}

impl CacheKey {
  /// Key for `path` as it currently exists on disk.
  pub fn for_file(path: &Path, fingerprint: &str) -> io::Result<Self> {
    let metadata = fs::metadata(path)?;
    let mtime_ns = metadata
      .modified()?
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_nanos())
      .unwrap_or_default();
    Ok(Self {
      path: path.to_path_buf(),
      size: metadata.len(),
      mtime_ns,
      fingerprint: fingerprint.to_string(),
    })
  }

  fn slot(&self) -> Result<ObjectHash, HashError> {
    SlotId {
      path: &self.path,
      fingerprint: &self.fingerprint,
    }
    .compute_hash()
  }
}

#[derive(Serialize, Deserialize)]
struct Slot<V> {
  key: CacheKey,
  value: V,
}

/// A slot with its value left unparsed.
#[derive(Deserialize)]
struct SlotHeader {
  key: CacheKey,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheMeta {
  version: u32,
}

/// Counts reported by [`BuildCache::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
  pub entries: usize,
  pub bytes: u64,
}

/// The on-disk cache, locked for the lifetime of the value.
#[derive(Debug)]
pub struct BuildCache {
  root: Option<PathBuf>,
  _lock: Option<CacheLock>,
}

impl BuildCache {
  /// Open (and lock) the cache at `root`, wiping it if its format is stale.
  pub fn open(root: &Path, command: &str) -> Result<Self, CacheError> {
    let lock = CacheLock::acquire(root, command)?;
    let meta_path = root.join(META_FILENAME);

    let current = fs::read_to_string(&meta_path)
      .ok()
      .and_then(|s| serde_json::from_str::<CacheMeta>(&s).ok());
    match current {
      Some(meta) if meta.version == CACHE_FORMAT_VERSION => {}
      other => {
        if let Some(meta) = other {
          info!(found = meta.version, expected = CACHE_FORMAT_VERSION, "cache format changed, wiping");
        }
        clear_namespaces(root)?;
        let json = serde_json::to_string_pretty(&CacheMeta {
          version: CACHE_FORMAT_VERSION,
        })?;
        fs::write(&meta_path, json).map_err(|e| CacheError::io(&meta_path, e))?;
      }
    }

    debug!(root = %root.display(), "opened build cache");
    Ok(Self {
      root: Some(root.to_path_buf()),
      _lock: Some(lock),
    })
  }

  /// A cache that never hits and never stores.
  pub fn disabled() -> Self {
    Self { root: None, _lock: None }
  }

  pub fn root(&self) -> Option<&Path> {
    self.root.as_deref()
  }

  fn slot_path(&self, namespace: &str, key: &CacheKey) -> Result<Option<PathBuf>, CacheError> {
    let Some(root) = &self.root else {
      return Ok(None);
    };
    Ok(Some(root.join(namespace).join(format!("{}.json", key.slot()?))))
  }

  /// Cached value for `key`, or `None` on any mismatch.
  ///
  /// Unreadable slots are treated as misses; they are overwritten by the next
  /// [`BuildCache::store`].
  pub fn lookup<V: DeserializeOwned>(&self, namespace: &str, key: &CacheKey) -> Result<Option<V>, CacheError> {
    let Some(path) = self.slot_path(namespace, key)? else {
      return Ok(None);
    };

    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(CacheError::io(&path, e)),
    };

    match serde_json::from_str::<Slot<V>>(&content) {
      Ok(slot) if slot.key == *key => {
        debug!(namespace, path = %key.path.display(), "cache hit");
        Ok(Some(slot.value))
      }
      Ok(_) => {
        debug!(namespace, path = %key.path.display(), "cache entry is stale");
        Ok(None)
      }
      Err(e) => {
        warn!(slot = %path.display(), error = %e, "ignoring unreadable cache entry");
        Ok(None)
      }
    }
  }

  /// Record `value` for `key`, replacing whatever the slot held.
  pub fn store<V: Serialize>(&self, namespace: &str, key: &CacheKey, value: &V) -> Result<(), CacheError> {
    let Some(path) = self.slot_path(namespace, key)? else {
      return Ok(());
    };
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir).map_err(|e| CacheError::io(dir, e))?;

    let content = serde_json::to_vec_pretty(&Slot {
      key: key.clone(),
      value,
    })?;
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| CacheError::io(dir, e))?;
    io::Write::write_all(&mut temp, &content).map_err(|e| CacheError::io(&path, e))?;
    temp.persist(&path).map_err(|e| CacheError::io(&path, e.error))?;
    Ok(())
  }

  /// Drop every slot in `namespace` recorded under another fingerprint, or
  /// that cannot be read. Returns the number of slots removed.
  ///
  /// Slots are named by path and fingerprint, so a build for a different
  /// target never overwrites them and they would otherwise stay forever.
  pub fn prune(&self, namespace: &str, fingerprint: &str) -> Result<usize, CacheError> {
    let Some(root) = &self.root else {
      return Ok(0);
    };
    let dir = root.join(namespace);
    let entries = match fs::read_dir(&dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
      Err(e) => return Err(CacheError::io(&dir, e)),
    };

    let mut removed = 0;
    for entry in entries {
      let path = entry.map_err(|e| CacheError::io(&dir, e))?.path();
      if path.extension().is_none_or(|e| e != "json") {
        continue;
      }
      let keep = fs::read_to_string(&path)
        .ok()
        .and_then(|content| serde_json::from_str::<SlotHeader>(&content).ok())
        .is_some_and(|slot| slot.key.fingerprint == fingerprint);
      if !keep {
        fs::remove_file(&path).map_err(|e| CacheError::io(&path, e))?;
        removed += 1;
      }
    }
    if removed > 0 {
      info!(namespace, fingerprint, removed, "pruned foreign cache entries");
    }
    Ok(removed)
  }

  /// Entry count and total size of the cache at `root`.
  pub fn stats(root: &Path) -> CacheStats {
    let mut stats = CacheStats::default();
    for entry in WalkDir::new(root).min_depth(2).into_iter().filter_map(Result::ok) {
      if entry.file_type().is_file() && entry.path().extension().is_some_and(|e| e == "json") {
        stats.entries += 1;
        stats.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
      }
    }
    stats
  }

  /// Remove every cached entry under `root`, honouring the lock.
  pub fn clean(root: &Path) -> Result<CacheStats, CacheError> {
    if !root.exists() {
      return Ok(CacheStats::default());
    }
    let _lock = CacheLock::acquire(root, "pybundle cache clean")?;
    let stats = Self::stats(root);
    clear_namespaces(root)?;
    let meta_path = root.join(META_FILENAME);
    if meta_path.exists() {
      fs::remove_file(&meta_path).map_err(|e| CacheError::io(&meta_path, e))?;
    }
    info!(entries = stats.entries, bytes = stats.bytes, "cleaned build cache");
    Ok(stats)
  }
}

fn clear_namespaces(root: &Path) -> Result<(), CacheError> {
  let entries = match fs::read_dir(root) {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
    Err(e) => return Err(CacheError::io(root, e)),
  };
  for entry in entries {
    let entry = entry.map_err(|e| CacheError::io(root, e))?;
    let path = entry.path();
    if path.is_dir() {
      fs::remove_dir_all(&path).map_err(|e| CacheError::io(&path, e))?;
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;
  use tracing_test::traced_test;

  fn key(path: &str, size: u64) -> CacheKey {
    CacheKey {
      path: PathBuf::from(path),
      size,
      mtime_ns: 42,
      fingerprint: "x86_64-linux".to_string(),
    }
  }

  #[test]
  fn store_then_lookup_hits() {
    let temp = TempDir::new().unwrap();
    let cache = BuildCache::open(temp.path(), "test").unwrap();

    cache.store("bindepend", &key("/lib/a.so", 10), &vec!["libz.so.1".to_string()]).unwrap();
    let hit: Option<Vec<String>> = cache.lookup("bindepend", &key("/lib/a.so", 10)).unwrap();
    assert_eq!(hit, Some(vec!["libz.so.1".to_string()]));
  }

  #[test]
  fn any_key_change_misses() {
    let temp = TempDir::new().unwrap();
    let cache = BuildCache::open(temp.path(), "test").unwrap();
    cache.store("bindepend", &key("/lib/a.so", 10), &1u32).unwrap();

    let size_changed: Option<u32> = cache.lookup("bindepend", &key("/lib/a.so", 11)).unwrap();
    assert_eq!(size_changed, None);

    let mut other_fp = key("/lib/a.so", 10);
    other_fp.fingerprint = "aarch64-linux".to_string();
    let fp_changed: Option<u32> = cache.lookup("bindepend", &other_fp).unwrap();
    assert_eq!(fp_changed, None);
  }

  #[test]
  fn entries_survive_reopen_but_not_version_change() {
    let temp = TempDir::new().unwrap();
    {
      let cache = BuildCache::open(temp.path(), "first").unwrap();
      cache.store("bindepend", &key("/lib/a.so", 10), &7u32).unwrap();
    }
    {
      let cache = BuildCache::open(temp.path(), "second").unwrap();
      let hit: Option<u32> = cache.lookup("bindepend", &key("/lib/a.so", 10)).unwrap();
      assert_eq!(hit, Some(7));
    }

    fs::write(temp.path().join(META_FILENAME), r#"{"version":0}"#).unwrap();
    let cache = BuildCache::open(temp.path(), "third").unwrap();
    let hit: Option<u32> = cache.lookup("bindepend", &key("/lib/a.so", 10)).unwrap();
    assert_eq!(hit, None);
  }

  #[test]
  fn open_refuses_while_locked() {
    let temp = TempDir::new().unwrap();
    let _cache = BuildCache::open(temp.path(), "first").unwrap();
    assert!(matches!(
      BuildCache::open(temp.path(), "second"),
      Err(CacheError::Lock(_))
    ));
  }

  #[test]
  #[traced_test]
  fn unreadable_slot_is_a_logged_miss() {
    let temp = TempDir::new().unwrap();
    let cache = BuildCache::open(temp.path(), "test").unwrap();
    let key = key("/lib/a.so", 10);
    cache.store("bindepend", &key, &1u32).unwrap();
    let slot = cache.slot_path("bindepend", &key).unwrap().unwrap();
    fs::write(&slot, "{ truncated").unwrap();

    let hit: Option<u32> = cache.lookup("bindepend", &key).unwrap();
    assert_eq!(hit, None);
    assert!(logs_contain("ignoring unreadable cache entry"));
  }

  #[test]
  fn prune_drops_slots_of_other_fingerprints() {
    let temp = TempDir::new().unwrap();
    let cache = BuildCache::open(temp.path(), "test").unwrap();
    let current = key("/lib/a.so", 10);
    let foreign = CacheKey {
      fingerprint: "aarch64-darwin:otool".to_string(),
      ..key("/lib/a.so", 10)
    };
    cache.store("bindepend", &current, &1u32).unwrap();
    cache.store("bindepend", &foreign, &2u32).unwrap();
    let garbage = cache.slot_path("bindepend", &key("/lib/b.so", 1)).unwrap().unwrap();
    fs::write(&garbage, "not json").unwrap();

    let removed = cache.prune("bindepend", &current.fingerprint).unwrap();

    assert_eq!(removed, 2);
    assert_eq!(cache.lookup::<u32>("bindepend", &current).unwrap(), Some(1));
    assert_eq!(cache.lookup::<u32>("bindepend", &foreign).unwrap(), None);
    assert!(!garbage.exists());
    assert_eq!(BuildCache::disabled().prune("bindepend", "x").unwrap(), 0);
  }

  #[test]
  fn disabled_cache_never_hits() {
    let cache = BuildCache::disabled();
    cache.store("bindepend", &key("/lib/a.so", 10), &1u32).unwrap();
    let hit: Option<u32> = cache.lookup("bindepend", &key("/lib/a.so", 10)).unwrap();
    assert_eq!(hit, None);
  }

  #[test]
  fn clean_removes_entries() {
    let temp = TempDir::new().unwrap();
    {
      let cache = BuildCache::open(temp.path(), "test").unwrap();
      cache.store("bindepend", &key("/lib/a.so", 10), &1u32).unwrap();
      cache.store("bindepend", &key("/lib/b.so", 10), &2u32).unwrap();
    }
    assert_eq!(BuildCache::stats(temp.path()).entries, 2);

    let removed = BuildCache::clean(temp.path()).unwrap();
    assert_eq!(removed.entries, 2);
    assert_eq!(BuildCache::stats(temp.path()).entries, 0);
  }

  #[test]
  fn key_for_file_tracks_size() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("lib.so");
    fs::write(&path, b"abc").unwrap();
    let key = CacheKey::for_file(&path, "fp").unwrap();
    assert_eq!(key.size, 3);
    assert_eq!(key.fingerprint, "fp");
  }
}
