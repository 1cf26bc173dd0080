//! Implementation of the `pybundle cache` commands.

use anyhow::{Context, Result};
use clap::Subcommand;

use pybundle_lib::cache::BuildCache;
use pybundle_lib::platform::paths::cache_dir;

use crate::output::{OutputFormat, format_bytes, print_json, print_stat, print_success};

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
  /// Remove every cached binary inspection
  Clean {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

pub fn cmd_cache(command: CacheCommand) -> Result<()> {
  match command {
    CacheCommand::Clean { output } => cmd_clean(output),
  }
}

fn cmd_clean(output: OutputFormat) -> Result<()> {
  let dir = cache_dir();
  let stats = BuildCache::clean(&dir).with_context(|| format!("Failed to clean cache at {}", dir.display()))?;

  if output.is_json() {
    print_json(&stats)?;
  } else {
    print_success("Cache cleaned");
    print_stat("Directory", &dir.display().to_string());
    print_stat("Entries removed", &stats.entries.to_string());
    print_stat("Space freed", &format_bytes(stats.bytes));
  }
  Ok(())
}
