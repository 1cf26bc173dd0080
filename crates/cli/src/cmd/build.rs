//! Implementation of the `pybundle build` command.
//!
//! Assembles a [`BuildSpec`] from the command line, runs the build pipeline and
//! reports what went into the bundle.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use tracing::{debug, info};

use pybundle_archive::PythonVersion;
use pybundle_lib::bindepend::ToolInspector;
use pybundle_lib::build::{BuildReport, build, load_hooks};
use pybundle_lib::platform::Platform;
use pybundle_lib::platform::python::{detect_version, host_interpreter};
use pybundle_lib::spec::{BuildSpec, CompressionPolicy, ExcludePattern, TargetLayout};

use crate::output::{
  OutputFormat, format_bytes, format_duration, print_json, print_stat, print_success, print_warning, truncate_hash,
};

/// File name of the launcher binary shipped next to `pybundle`.
const BOOTLOADER_NAME: &str = "pybundle-boot";

#[derive(Args, Debug)]
pub struct BuildArgs {
  /// Entry script of the application
  pub entry: PathBuf,

  /// Additional entry scripts, bundled but not run
  #[arg(long = "also")]
  pub extra_entries: Vec<PathBuf>,

  /// Name of the artifact (defaults to the entry script's stem)
  #[arg(short, long)]
  pub name: Option<String>,

  /// Module search roots, searched in order after the entry script's directory
  #[arg(short = 'p', long = "paths")]
  pub search_paths: Vec<PathBuf>,

  /// Modules to leave out, with their submodules (`pkg`, or `pkg.*` for submodules only)
  #[arg(short = 'x', long = "exclude")]
  pub excludes: Vec<String>,

  /// Directories of `hook-<module>.json` files
  #[arg(long = "hooks-dir")]
  pub hook_dirs: Vec<PathBuf>,

  /// Output layout
  #[arg(long, default_value = "onefile")]
  pub layout: TargetLayout,

  /// Which entries to compress: auto, all or none
  #[arg(long, default_value = "auto")]
  pub compression: CompressionPolicy,

  /// Target platform as `<arch>-<os>` (defaults to the host)
  #[arg(long)]
  pub target: Option<Platform>,

  /// Interpreter executable to embed
  #[arg(long)]
  pub interpreter: Option<PathBuf>,

  /// Interpreter version to target, as MAJOR.MINOR (asked from the
  /// interpreter when omitted)
  #[arg(long)]
  pub python_version: Option<PythonVersion>,

  /// Launcher binary for the target platform
  #[arg(long)]
  pub bootloader: Option<PathBuf>,

  /// Output directory
  #[arg(long = "distpath", default_value = "dist")]
  pub dist_dir: PathBuf,

  /// Time limit for one binary inspection (e.g. "30s", "2m")
  #[arg(long, value_parser = humantime::parse_duration)]
  pub scan_timeout: Option<Duration>,

  /// Do not read or write the build cache
  #[arg(long)]
  pub no_cache: bool,

  /// Output format
  #[arg(short = 'o', long, value_enum, default_value = "text")]
  pub output: OutputFormat,
}

impl BuildArgs {
  fn into_spec(self) -> Result<BuildSpec> {
    let platform = match self.target {
      Some(platform) => platform,
      None => Platform::current().context("Host platform is not supported; pass --target")?,
    };
    let bootloader = match self.bootloader {
      Some(path) => path,
      None => find_bootloader().context("Could not find the pybundle-boot launcher; pass --bootloader")?,
    };

    let mut spec = BuildSpec::new(&self.entry, bootloader, platform);
    spec.entry_points.extend(self.extra_entries);
    if let Some(name) = self.name {
      spec.name = name;
    }
    spec.search_paths = self.search_paths;
    spec.excludes = self.excludes.into_iter().map(ExcludePattern::new).collect();
    spec.hook_dirs = self.hook_dirs;
    spec.layout = self.layout;
    spec.compression = self.compression;
    spec.interpreter = self.interpreter;
    spec.python = self.python_version;
    spec.dist_dir = self.dist_dir;
    if let Some(timeout) = self.scan_timeout {
      spec.scan_timeout = timeout;
    }
    if self.no_cache {
      spec.cache_dir = None;
    }
    Ok(spec)
  }
}

/// Execute the build command.
pub fn cmd_build(mut args: BuildArgs) -> Result<()> {
  let start = Instant::now();
  let output = args.output;

  args.entry = dunce::canonicalize(&args.entry)
    .with_context(|| format!("Entry script not found: {}", args.entry.display()))?;
  let mut spec = args.into_spec()?;
  if spec.python.is_none() {
    spec.python = detect_target_python(&spec);
  }
  debug!(?spec, "assembled build spec");

  let hooks = load_hooks(&spec).context("Failed to load hooks")?;
  if let Err(err) = ToolInspector::check_available(spec.platform.os) {
    print_warning(&format!("{err}; builds with native extensions will fail"));
  }
  let inspector = ToolInspector::new(spec.scan_timeout);

  let report = build(&spec, &hooks, &inspector).with_context(|| format!("Build of '{}' failed", spec.name))?;

  if output.is_json() {
    print_json(&report)?;
  } else {
    print_report(&report, start.elapsed());
  }
  Ok(())
}

fn print_report(report: &BuildReport, elapsed: Duration) {
  for missing in &report.unresolved {
    let note = if missing.conditional { " (optional)" } else { "" };
    print_warning(&format!(
      "Module '{}' imported by '{}' was not found{note}",
      missing.name, missing.importer
    ));
  }
  for warning in &report.warnings {
    print_warning(&format!("{}: {}", warning.binary.display(), warning.message));
  }

  println!();
  print_success("Build complete!");
  print_stat("Artifact", &report.artifact.path.display().to_string());
  print_stat("Layout", &report.artifact.layout.to_string());
  print_stat("Entries", &report.artifact.entry_count.to_string());
  print_stat("Modules", &report.modules.to_string());
  print_stat("Extensions", &report.extensions.to_string());
  print_stat("Data files", &report.data.to_string());
  print_stat("Libraries", &report.libraries.to_string());
  print_stat("Interpreter", if report.interpreter { "embedded" } else { "system" });
  print_stat("Archive size", &format_bytes(report.artifact.archive_len));
  print_stat("Index digest", truncate_hash(&report.artifact.index_digest));
  print_stat("Duration", &format_duration(elapsed));
}

/// Version of the embedded interpreter, or of the host's `python3` when the
/// bundle targets the host and relies on a system interpreter.
fn detect_target_python(spec: &BuildSpec) -> Option<PythonVersion> {
  let interpreter = match &spec.interpreter {
    Some(path) => path.clone(),
    None if Platform::current() == Some(spec.platform) => host_interpreter()?,
    None => return None,
  };
  let version = detect_version(&interpreter, spec.scan_timeout);
  match version {
    Some(version) => info!(%version, interpreter = %interpreter.display(), "targeting python"),
    None => debug!(interpreter = %interpreter.display(), "python version unknown"),
  }
  version
}

/// The launcher installed beside this executable, else the first on `PATH`.
fn find_bootloader() -> Option<PathBuf> {
  let exe_name = format!("{BOOTLOADER_NAME}{}", std::env::consts::EXE_SUFFIX);
  let sibling = std::env::current_exe()
    .ok()
    .and_then(|exe| exe.parent().map(|dir| dir.join(&exe_name)))
    .filter(|path| path.is_file());
  sibling.or_else(|| which::which(BOOTLOADER_NAME).ok())
}
