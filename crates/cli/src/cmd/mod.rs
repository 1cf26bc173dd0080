mod build;
mod cache;
mod extract;
mod info;
mod inspect;

pub use build::{BuildArgs, cmd_build};
pub use cache::{CacheCommand, cmd_cache};
pub use extract::{ExtractArgs, cmd_extract};
pub use info::cmd_info;
pub use inspect::cmd_inspect;
