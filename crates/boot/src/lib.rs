//! pybundle-boot: the launcher embedded in every pybundle artifact
//!
//! At run time the launcher finds the archive that travels with it (appended
//! to its own file, or a `.pkg` sidecar in a bundle directory), makes the
//! entries available on disk, publishes the bundle root to the interpreter and
//! runs the entry script. It depends on nothing but the archive contract.

pub mod error;
pub mod extract;
pub mod launch;
pub mod locate;
pub mod run;

pub use error::BootError;
pub use launch::{LaunchPlan, Launcher, ProcessLauncher};
pub use run::{BootConfig, Stage, run};

/// Set to any value to print launch diagnostics on stderr.
pub const ENV_BOOT_DEBUG: &str = "PYBUNDLE_BOOT_DEBUG";
