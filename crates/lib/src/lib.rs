//! pybundle-lib: build-time core of pybundle
//!
//! This crate turns a Python application into a frozen bundle:
//! - `modulegraph`: static import resolution with hook-driven additions and exclusions
//! - `bindepend`: shared-library discovery following the target's loader search order
//! - `toc`: the table of contents, the sole input to archive construction
//! - `build`: the pipeline and the onefile/onedir archive builder
//! - `cache`: the persistent, single-writer cache of binary inspections

pub mod bindepend;
pub mod build;
pub mod cache;
pub mod consts;
pub mod modulegraph;
pub mod platform;
pub mod spec;
pub mod toc;
pub mod util;
