//! The build pipeline.
//!
//! A build is a full rebuild from a [`BuildSpec`]: resolve the import graph,
//! scan native code for shared libraries, assemble the [`Toc`], and write the
//! artifact. The only state carried between builds is the [`BuildCache`] of
//! binary inspections.
//!
//! # Submodules
//!
//! - [`archive`] - Writing the TOC as a onefile or onedir artifact

pub mod archive;
mod types;

use std::path::PathBuf;

use pybundle_archive::EntryKind;
use tracing::{info, warn};

pub use archive::{ArchiveBuilder, write_archive};
pub use types::*;

use crate::bindepend::{self, BinaryDependencyScanner, BinaryInspector, LibrarySearch, ScanReport};
use crate::cache::BuildCache;
use crate::modulegraph::{HookRegistry, HookSet, ModuleGraph, ModuleGraphResolver, ModuleKind};
use crate::spec::BuildSpec;
use crate::toc::Toc;

/// Hooks from every directory in `spec.hook_dirs`, later directories
/// overriding earlier ones.
pub fn load_hooks(spec: &BuildSpec) -> Result<HookSet, BuildError> {
  let mut hooks = HookSet::new();
  for dir in &spec.hook_dirs {
    let loaded = hooks.load_dir(dir)?;
    info!(dir = %dir.display(), hooks = loaded, "loaded hooks");
  }
  Ok(hooks)
}

/// Native files whose shared libraries must be bundled, in TOC order.
pub fn native_roots(graph: &ModuleGraph, interpreter: Option<&std::path::Path>) -> Vec<PathBuf> {
  let mut roots: Vec<PathBuf> = graph
    .modules()
    .filter(|m| m.kind == ModuleKind::ExtensionNative)
    .filter_map(|m| m.origin.clone())
    .collect();
  roots.extend(graph.binaries().iter().map(|f| f.source.clone()));
  roots.extend(interpreter.map(|p| p.to_path_buf()));
  roots
}

/// Run a complete build.
pub fn build(spec: &BuildSpec, hooks: &dyn HookRegistry, inspector: &dyn BinaryInspector) -> Result<BuildReport, BuildError> {
  if spec.entry_points.is_empty() {
    return Err(BuildError::NoEntryPoint);
  }
  std::fs::metadata(&spec.bootloader).map_err(|source| BuildError::Bootloader {
    path: spec.bootloader.clone(),
    source,
  })?;

  let cache = match &spec.cache_dir {
    Some(dir) => BuildCache::open(dir, "build")?,
    None => BuildCache::disabled(),
  };
  cache.prune(bindepend::CACHE_NAMESPACE, &bindepend::fingerprint(spec.platform, inspector))?;

  info!(name = %spec.name, platform = %spec.platform, layout = %spec.layout, "resolving imports");
  let graph = ModuleGraphResolver::from_spec(spec, hooks).resolve(&spec.entry_points)?;
  for missing in graph.missing() {
    warn!(module = %missing.name, importer = %missing.importer, conditional = missing.conditional, "unresolved import");
  }

  let roots = native_roots(&graph, spec.interpreter.as_deref());
  let libraries = if roots.is_empty() {
    ScanReport::default()
  } else {
    let mut scanner =
      BinaryDependencyScanner::new(inspector, spec.platform, &cache, LibrarySearch::from_env(spec.platform));
    if let Some(interpreter) = &spec.interpreter {
      scanner = scanner.with_executable(interpreter);
    }
    scanner.scan_all(&roots)?
  };

  let toc = Toc::from_graph(&graph, &libraries, spec.interpreter.as_deref(), spec.compression)?;
  let output = spec.output_path();
  let artifact = ArchiveBuilder::new(&spec.bootloader, spec.layout, spec.platform.os)
    .with_python(spec.python)
    .build(&toc, &spec.name, &output)?;

  let report = BuildReport {
    name: spec.name.clone(),
    modules: toc.count(EntryKind::PureModule),
    extensions: toc.count(EntryKind::ExtensionNative),
    data: toc.count(EntryKind::Data),
    libraries: toc.count(EntryKind::BinaryDependency),
    interpreter: toc.count(EntryKind::EmbeddedInterpreter) > 0,
    unresolved: graph.missing().to_vec(),
    warnings: libraries.warnings,
    artifact,
  };
  info!(
    path = %report.artifact.path.display(),
    entries = report.artifact.entry_count,
    bytes = report.artifact.archive_len,
    "build complete"
  );
  Ok(report)
}
