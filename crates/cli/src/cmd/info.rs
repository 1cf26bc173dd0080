use anyhow::Result;
use serde::Serialize;

use pybundle_lib::cache::BuildCache;
use pybundle_lib::platform::paths::cache_dir;
use pybundle_lib::platform::platform_triple;

use crate::output::{OutputFormat, format_bytes, print_json, print_stat};

#[derive(Debug, Serialize)]
struct InfoOutput {
  version: &'static str,
  platform: Option<String>,
  cache_dir: String,
  cache_entries: usize,
  cache_bytes: u64,
}

pub fn cmd_info(output: OutputFormat) -> Result<()> {
  let dir = cache_dir();
  let stats = BuildCache::stats(&dir);
  let info = InfoOutput {
    version: env!("CARGO_PKG_VERSION"),
    platform: platform_triple(),
    cache_dir: dir.display().to_string(),
    cache_entries: stats.entries,
    cache_bytes: stats.bytes,
  };

  if output.is_json() {
    return print_json(&info);
  }

  println!("System:");
  match &info.platform {
    Some(triple) => print_stat("Platform", triple),
    None => print_stat("Platform", "could not detect platform"),
  }
  print_stat("Version", info.version);
  println!("Cache:");
  print_stat("Directory", &info.cache_dir);
  print_stat("Entries", &info.cache_entries.to_string());
  print_stat("Size", &format_bytes(info.cache_bytes));
  Ok(())
}
