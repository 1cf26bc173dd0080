use pybundle_boot::{BootConfig, ENV_BOOT_DEBUG, ProcessLauncher, run};
use tracing_subscriber::EnvFilter;

fn main() {
  if std::env::var_os(ENV_BOOT_DEBUG).is_some() {
    tracing_subscriber::fmt()
      .with_env_filter(EnvFilter::new("debug"))
      .with_writer(std::io::stderr)
      .without_time()
      .init();
  }

  // `run` has released the extraction directory by the time it returns
  let code = match BootConfig::from_env().and_then(|config| run(&config, &ProcessLauncher)) {
    Ok(code) => code,
    Err(err) => {
      eprintln!("pybundle: {err}");
      err.exit_code()
    }
  };
  std::process::exit(code);
}
