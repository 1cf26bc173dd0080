//! pybundle-archive: the binary contract between build time and run time.
//!
//! This crate is the only thing the bootloader and the builder share:
//! - [`format`]: trailer, index records and entry kinds, bit-exact
//! - [`writer`]: append-only archive construction
//! - [`reader`]: random-access reading and extraction
//! - [`resources`]: the logical-name resolver handed to the interpreter
//! - [`python`]: the interpreter version a bundle is tied to

pub mod error;
pub mod format;
pub mod python;
pub mod reader;
pub mod resources;
pub mod writer;

pub use error::ArchiveError;
pub use format::{EntryKind, IndexRecord, Trailer};
pub use python::PythonVersion;
pub use reader::ArchiveReader;
pub use resources::{ENV_BUNDLE_DIR, MANIFEST_NAME, ResourceMap};
pub use writer::{ArchiveSummary, ArchiveWriter, EntryOptions, PreparedEntry, prepare_entry};
