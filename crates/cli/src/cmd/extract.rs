//! Implementation of the `pybundle extract` command.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::Serialize;

use super::inspect::open;
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success};

#[derive(Args, Debug)]
pub struct ExtractArgs {
  /// Onefile executable, onedir bundle directory or sidecar archive
  pub archive: PathBuf,

  /// Logical names of the entries to extract (all entries if omitted)
  pub names: Vec<String>,

  /// Destination directory
  #[arg(short = 'd', long = "dest", default_value = ".")]
  pub dest: PathBuf,

  /// Output format
  #[arg(short = 'o', long, value_enum, default_value = "text")]
  pub output: OutputFormat,
}

#[derive(Debug, Serialize)]
struct ExtractOutput {
  written: Vec<PathBuf>,
  skipped_external: Vec<String>,
}

pub fn cmd_extract(args: ExtractArgs) -> Result<()> {
  let reader = open(&args.archive)?;

  let records = if args.names.is_empty() {
    reader.records().iter().collect::<Vec<_>>()
  } else {
    let mut selected = Vec::with_capacity(args.names.len());
    for name in &args.names {
      match reader.get(name) {
        Some(record) => selected.push(record),
        None => bail!("No entry named '{name}' in {}", reader.path().display()),
      }
    }
    selected
  };

  let mut result = ExtractOutput {
    written: Vec::new(),
    skipped_external: Vec::new(),
  };
  for record in records {
    if record.external {
      result.skipped_external.push(record.name.clone());
      continue;
    }
    let path = reader
      .extract(record, &args.dest)
      .with_context(|| format!("Failed to extract '{}'", record.name))?;
    result.written.push(path);
  }

  if args.output.is_json() {
    print_json(&result)?;
  } else {
    print_success(&format!("Extracted {} entries", result.written.len()));
    print_stat("Destination", &args.dest.display().to_string());
    if !result.skipped_external.is_empty() {
      print_info(&format!(
        "{} entries live beside the archive and were skipped",
        result.skipped_external.len()
      ));
    }
  }
  Ok(())
}
