//! Import graph resolution.
//!
//! Starting from the entry scripts, the resolver discovers every module the
//! application may import without running it, applying hooks along the way.
//!
//! # Submodules
//!
//! - [`imports`] - Static import scanner over module source
//! - [`finder`] - Name lookup over search roots
//! - [`hooks`] - Hook records and registries
//! - [`graph`] - The resolved import graph
//! - [`resolver`] - Breadth-first traversal

pub mod finder;
pub mod graph;
pub mod hooks;
pub mod imports;
pub mod resolver;
mod types;

pub use graph::ModuleGraph;
pub use hooks::{FnHook, Hook, HookError, HookFile, HookRegistry, HookSet, NoHooks};
pub use resolver::ModuleGraphResolver;
pub use types::*;
