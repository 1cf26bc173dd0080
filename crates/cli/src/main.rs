mod cmd;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{BuildArgs, CacheCommand, ExtractArgs, cmd_build, cmd_cache, cmd_extract, cmd_info, cmd_inspect};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "pybundle")]
#[command(author, version, about = "Bundle a Python application into a self-contained executable", long_about = None)]
struct Cli {
  /// Show debug logging (overridden by RUST_LOG)
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Resolve imports and native libraries and write a bundle
  Build(BuildArgs),

  /// List the entries of a bundle's archive
  Inspect {
    /// Onefile executable, onedir bundle directory or sidecar archive
    archive: std::path::PathBuf,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Unpack entries of a bundle's archive
  Extract(ExtractArgs),

  /// Show platform and cache information
  Info {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Manage the build cache
  Cache {
    #[command(subcommand)]
    command: CacheCommand,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Build(args) => cmd_build(args),
    Commands::Inspect { archive, output } => cmd_inspect(&archive, output),
    Commands::Extract(args) => cmd_extract(args),
    Commands::Info { output } => cmd_info(output),
    Commands::Cache { command } => cmd_cache(command),
  }
}
