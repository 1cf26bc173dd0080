//! Breadth-first import resolution.
//!
//! Traversal is level-synchronous. For each frontier, the independent work of
//! every module (reading its source, scanning imports, querying its hook and
//! expanding hook files) runs in parallel. The results are then merged one
//! module at a time in frontier order, which is the only place the graph is
//! mutated, so the outcome does not depend on scheduling. Termination comes
//! from the graph itself: a name is resolved and enqueued at most once.

use std::fs;
use std::path::{Path, PathBuf};

use pybundle_archive::PythonVersion;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::finder::{Found, ModuleFinder};
use super::graph::ModuleGraph;
use super::hooks::{Hook, HookFile, HookRegistry};
use super::imports::{ImportStatement, scan_imports};
use super::types::{ModuleKind, ModuleRecord, ResolveError, UnresolvedImport};
use crate::platform::os::Os;
use crate::spec::{BuildSpec, ExcludePattern};

pub struct ModuleGraphResolver<'a> {
  search_paths: Vec<PathBuf>,
  excludes: Vec<ExcludePattern>,
  hooks: &'a dyn HookRegistry,
  finder: ModuleFinder,
}

/// Everything learned about one module without touching the graph.
struct Analysis {
  imports: Vec<ImportStatement>,
  hook: Option<Hook>,
  datas: Vec<HookFile>,
  binaries: Vec<HookFile>,
}

/// Mutable state of one traversal.
struct Traversal {
  graph: ModuleGraph,
  roots: Vec<PathBuf>,
  hook_excludes: Vec<ExcludePattern>,
  next: Vec<String>,
}

impl<'a> ModuleGraphResolver<'a> {
  pub fn new(search_paths: Vec<PathBuf>, hooks: &'a dyn HookRegistry, os: Os) -> Self {
    Self {
      search_paths,
      excludes: Vec::new(),
      hooks,
      finder: ModuleFinder::new(os),
    }
  }

  /// Resolve against `python`'s extension tags and bytecode format.
  pub fn with_python(mut self, python: Option<PythonVersion>) -> Self {
    self.finder = self.finder.with_python(python);
    self
  }

  pub fn with_excludes(mut self, excludes: Vec<ExcludePattern>) -> Self {
    self.excludes = excludes;
    self
  }

  pub fn from_spec(spec: &BuildSpec, hooks: &'a dyn HookRegistry) -> Self {
    Self::new(spec.search_paths.clone(), hooks, spec.platform.os)
      .with_excludes(spec.excludes.clone())
      .with_python(spec.python)
  }

  /// Resolve the closed import graph of `entry_points`.
  pub fn resolve(&self, entry_points: &[PathBuf]) -> Result<ModuleGraph, ResolveError> {
    let mut state = Traversal {
      graph: ModuleGraph::new(),
      roots: self.roots(entry_points),
      hook_excludes: Vec::new(),
      next: Vec::new(),
    };

    for entry in entry_points {
      fs::metadata(entry).map_err(|source| ResolveError::EntryPoint {
        path: entry.clone(),
        source,
      })?;
      let name = entry_module_name(entry);
      let mut record = ModuleRecord::new(&name, ModuleKind::PureSource, Some(entry.clone()));
      record.entry = true;
      if state.graph.add_module(record) {
        state.next.push(name);
      }
    }

    let mut depth = 0usize;
    while !state.next.is_empty() {
      let frontier = std::mem::take(&mut state.next);
      debug!(depth, modules = frontier.len(), "analyzing frontier");

      let jobs: Vec<(String, Option<PathBuf>)> = frontier
        .iter()
        .map(|name| {
          let source = state
            .graph
            .get(name)
            .filter(|r| r.has_source())
            .and_then(|r| r.origin.clone());
          (name.clone(), source)
        })
        .collect();

      let analyses: Vec<Result<Analysis, ResolveError>> = jobs
        .par_iter()
        .map(|(name, source)| self.analyze(name, source.as_deref()))
        .collect();

      // Apply results sequentially for determinism
      for ((name, _), analysis) in jobs.iter().zip(analyses) {
        self.merge(&mut state, name, analysis?)?;
      }
      depth += 1;
    }

    let hook_excludes = state.hook_excludes;
    state
      .graph
      .prune(|name| self.is_excluded(&hook_excludes, name));

    info!(
      modules = state.graph.len(),
      missing = state.graph.missing().len(),
      excluded = state.graph.excluded().len(),
      "resolved import graph"
    );
    Ok(state.graph)
  }

  /// Entry script directories first, then the configured search paths.
  fn roots(&self, entry_points: &[PathBuf]) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    let entry_dirs = entry_points.iter().map(|entry| match entry.parent() {
      Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
      _ => PathBuf::from("."),
    });
    for root in entry_dirs.chain(self.search_paths.iter().cloned()) {
      if !roots.contains(&root) {
        roots.push(root);
      }
    }
    roots
  }

  fn analyze(&self, name: &str, source: Option<&Path>) -> Result<Analysis, ResolveError> {
    let imports = match source {
      Some(path) => {
        let bytes = fs::read(path).map_err(|source| ResolveError::Read {
          module: name.to_string(),
          path: path.to_path_buf(),
          source,
        })?;
        scan_imports(&String::from_utf8_lossy(&bytes))
      }
      None => Vec::new(),
    };

    let hook = self.hooks.hook_for(name)?;
    let (datas, binaries) = match &hook {
      Some(hook) => (hook.expand_datas(name)?, hook.expand_binaries(name)?),
      None => (Vec::new(), Vec::new()),
    };

    Ok(Analysis {
      imports,
      hook,
      datas,
      binaries,
    })
  }

  fn merge(&self, state: &mut Traversal, name: &str, analysis: Analysis) -> Result<(), ResolveError> {
    let Analysis {
      imports,
      hook,
      datas,
      binaries,
    } = analysis;

    let mut extra = Vec::new();
    if let Some(hook) = &hook {
      debug!(module = %name, "applying hook");
      state
        .hook_excludes
        .extend(hook.excluded_imports.iter().map(ExcludePattern::new));
      extra.extend(hook.extra_imports.iter().map(ImportStatement::absolute));
      for file in datas {
        state.graph.add_data(file);
      }
      for file in binaries {
        state.graph.add_binary(file);
      }
    }
    if let Some(record) = state.graph.get_mut(name) {
      record.hook = hook;
    }

    for statement in &imports {
      self.import_statement(state, name, statement, false)?;
    }
    for statement in &extra {
      self.import_statement(state, name, statement, true)?;
    }
    Ok(())
  }

  fn import_statement(
    &self,
    state: &mut Traversal,
    importer: &str,
    statement: &ImportStatement,
    mandated: bool,
  ) -> Result<(), ResolveError> {
    let Some(base) = absolute_name(&state.graph, importer, statement) else {
      debug!(module = %importer, line = statement.line, "skipping relative import beyond top-level package");
      return Ok(());
    };

    if !self.import_module(state, importer, &base, statement.conditional, mandated)? {
      return Ok(());
    }

    let parent_is_package = state.graph.get(&base).is_some_and(|r| r.package);
    if !parent_is_package {
      return Ok(());
    }
    for item in &statement.names {
      if item == "*" {
        continue;
      }
      self.import_submodule(state, importer, &base, item, statement.conditional);
    }
    Ok(())
  }

  /// Import `name` and every parent package, adding edges from `importer`.
  /// Returns whether the full name resolved.
  fn import_module(
    &self,
    state: &mut Traversal,
    importer: &str,
    name: &str,
    conditional: bool,
    mandated: bool,
  ) -> Result<bool, ResolveError> {
    let mut parent: Option<&str> = None;

    for (end, _) in name.match_indices('.').chain(std::iter::once((name.len(), ""))) {
      let prefix = &name[..end];
      let last = &prefix[parent.map_or(0, |p| p.len() + 1)..];

      if self.is_excluded(&state.hook_excludes, prefix) {
        debug!(module = %importer, import = %prefix, "import excluded");
        state.graph.exclude(prefix);
        return Ok(false);
      }

      if !state.graph.contains(prefix) {
        let found = if state.graph.is_known(prefix) {
          None
        } else {
          match parent {
            None => self.finder.find_top_level(last, &state.roots),
            Some(p) => state
              .graph
              .get(p)
              .filter(|r| r.package)
              .and_then(|r| self.finder.find_in(last, &r.search_locations)),
          }
        };

        match found {
          Some(found) => {
            self.add_found(state, prefix, found);
            if let Some(p) = parent {
              state.graph.add_edge(prefix, p, false);
            }
          }
          None => {
            debug!(module = %importer, import = %prefix, "unresolved import");
            state.graph.add_missing(UnresolvedImport {
              importer: importer.to_string(),
              name: prefix.to_string(),
              conditional,
            });
            link(state, importer, prefix, conditional);
            if mandated {
              return Err(ResolveError::UnresolvedImport {
                module: importer.to_string(),
                import: name.to_string(),
              });
            }
            return Ok(false);
          }
        }
      }

      link(state, importer, prefix, conditional);
      parent = Some(prefix);
    }
    Ok(true)
  }

  /// `from package import item`: `item` may be a submodule or just an
  /// attribute, so a failed lookup is not recorded as missing.
  fn import_submodule(&self, state: &mut Traversal, importer: &str, package: &str, item: &str, conditional: bool) {
    let full = format!("{package}.{item}");
    if self.is_excluded(&state.hook_excludes, &full) {
      state.graph.exclude(&full);
      return;
    }
    if !state.graph.contains(&full) {
      if state.graph.is_known(&full) {
        return;
      }
      let found = state
        .graph
        .get(package)
        .and_then(|r| self.finder.find_in(item, &r.search_locations));
      let Some(found) = found else {
        return;
      };
      self.add_found(state, &full, found);
      state.graph.add_edge(&full, package, false);
    }
    link(state, importer, &full, conditional);
  }

  fn add_found(&self, state: &mut Traversal, name: &str, found: Found) {
    let record = match found {
      Found::Builtin => ModuleRecord::new(name, ModuleKind::Builtin, None),
      Found::Source { path } => ModuleRecord::new(name, ModuleKind::PureSource, Some(path)),
      Found::Extension { path } => ModuleRecord::new(name, ModuleKind::ExtensionNative, Some(path)),
      Found::Package { init, dir } => {
        let mut record = ModuleRecord::new(name, ModuleKind::PureSource, Some(init));
        record.package = true;
        record.search_locations = vec![dir];
        record
      }
      Found::Namespace { portions } => {
        let mut record = ModuleRecord::new(name, ModuleKind::NamespacePackage, None);
        record.package = true;
        record.search_locations = portions;
        record
      }
    };
    debug!(module = %name, kind = ?record.kind, origin = ?record.origin, "found module");
    if record.is_sourceless() {
      debug!(module = %name, "bytecode without source, imports are not followed");
    }
    if state.graph.add_module(record) {
      state.next.push(name.to_string());
    }
  }

  fn is_excluded(&self, hook_excludes: &[ExcludePattern], name: &str) -> bool {
    self.excludes.iter().chain(hook_excludes).any(|p| p.matches(name))
  }
}

fn link(state: &mut Traversal, importer: &str, imported: &str, conditional: bool) {
  state.graph.add_edge(importer, imported, conditional);
  if let Some(record) = state.graph.get_mut(importer)
    && record.name != imported
    && !record.imports.iter().any(|i| i == imported)
  {
    record.imports.push(imported.to_string());
  }
}

/// Absolute dotted name targeted by `statement` when written in `importer`.
fn absolute_name(graph: &ModuleGraph, importer: &str, statement: &ImportStatement) -> Option<String> {
  if statement.level == 0 {
    return (!statement.module.is_empty()).then(|| statement.module.clone());
  }

  let record = graph.get(importer)?;
  let mut package = if record.package {
    importer
  } else {
    importer.rsplit_once('.')?.0
  };
  for _ in 1..statement.level {
    package = package.rsplit_once('.')?.0;
  }

  if statement.module.is_empty() {
    Some(package.to_string())
  } else {
    Some(format!("{package}.{}", statement.module))
  }
}

fn entry_module_name(entry: &Path) -> String {
  match entry.file_stem().and_then(|s| s.to_str()) {
    Some(stem) if !stem.is_empty() => stem.to_string(),
    _ => {
      warn!(path = %entry.display(), "entry point has no usable file name");
      "__main__".to_string()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::modulegraph::hooks::NoHooks;
  use tempfile::TempDir;

  fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
  }

  #[test]
  fn relative_names_resolve_from_the_importing_package() {
    let mut graph = ModuleGraph::new();
    let mut pkg = ModuleRecord::new("pkg.sub", ModuleKind::PureSource, None);
    pkg.package = true;
    graph.add_module(pkg);
    graph.add_module(ModuleRecord::new("pkg.sub.mod", ModuleKind::PureSource, None));

    let stmt = |module: &str, level| ImportStatement {
      level,
      ..ImportStatement::absolute(module)
    };
    assert_eq!(absolute_name(&graph, "pkg.sub.mod", &stmt("x", 1)).as_deref(), Some("pkg.sub.x"));
    assert_eq!(absolute_name(&graph, "pkg.sub.mod", &stmt("x", 2)).as_deref(), Some("pkg.x"));
    assert_eq!(absolute_name(&graph, "pkg.sub", &stmt("", 1)).as_deref(), Some("pkg.sub"));
    assert_eq!(absolute_name(&graph, "pkg.sub.mod", &stmt("x", 3)), None);
  }

  #[test]
  fn dotted_import_pulls_in_every_parent() {
    let temp = TempDir::new().unwrap();
    let entry = write(temp.path(), "main.py", "import a.b.c\n");
    write(temp.path(), "a/__init__.py", "");
    write(temp.path(), "a/b/__init__.py", "");
    write(temp.path(), "a/b/c.py", "");

    let graph = ModuleGraphResolver::new(vec![], &NoHooks, Os::Linux).resolve(&[entry]).unwrap();
    let names: Vec<_> = graph.modules().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["main", "a", "a.b", "a.b.c"]);
    assert_eq!(graph.imports_of("main"), vec!["a", "a.b", "a.b.c"]);
    assert_eq!(graph.imports_of("a.b.c"), vec!["a.b"]);
  }

  #[test]
  fn from_import_tries_submodules_then_attributes() {
    let temp = TempDir::new().unwrap();
    let entry = write(temp.path(), "main.py", "from pkg import sub, CONSTANT\n");
    write(temp.path(), "pkg/__init__.py", "CONSTANT = 1\n");
    write(temp.path(), "pkg/sub.py", "");

    let graph = ModuleGraphResolver::new(vec![], &NoHooks, Os::Linux).resolve(&[entry]).unwrap();
    assert!(graph.contains("pkg.sub"));
    assert!(!graph.is_known("pkg.CONSTANT"));
    assert!(graph.missing().is_empty());
  }

  #[test]
  fn missing_imports_are_recorded_not_fatal() {
    let temp = TempDir::new().unwrap();
    let entry = write(temp.path(), "main.py", "try:\n    import ujson\nexcept ImportError:\n    import json\n");
    write(temp.path(), "json.py", "");

    let graph = ModuleGraphResolver::new(vec![], &NoHooks, Os::Linux).resolve(&[entry]).unwrap();
    assert_eq!(graph.missing().len(), 1);
    assert_eq!(graph.missing()[0].name, "ujson");
    assert!(graph.missing()[0].conditional);
    assert!(graph.contains("json"));
  }

  #[test]
  fn unreadable_entry_point_is_an_error() {
    let temp = TempDir::new().unwrap();
    let err = ModuleGraphResolver::new(vec![], &NoHooks, Os::Linux)
      .resolve(&[temp.path().join("absent.py")])
      .unwrap_err();
    assert!(matches!(err, ResolveError::EntryPoint { .. }));
  }

  #[test]
  fn sourceless_modules_are_bundled_as_leaves() {
    let temp = TempDir::new().unwrap();
    let entry = write(temp.path(), "main.py", "import cached\n");
    let mut bytecode = 3531u16.to_le_bytes().to_vec();
    bytecode.extend_from_slice(b"\r\n\0\0import nothere\n");
    fs::write(temp.path().join("cached.pyc"), bytecode).unwrap();

    let graph = ModuleGraphResolver::new(vec![], &NoHooks, Os::Linux)
      .with_python(Some(PythonVersion::new(3, 12)))
      .resolve(&[entry])
      .unwrap();
    let cached = graph.get("cached").unwrap();
    assert_eq!(cached.kind, ModuleKind::PureSource);
    assert!(cached.is_sourceless());
    assert!(cached.imports.is_empty());
    assert!(graph.missing().is_empty());
  }

  #[test]
  fn builtins_are_leaves() {
    let temp = TempDir::new().unwrap();
    let entry = write(temp.path(), "main.py", "import sys\n");

    let graph = ModuleGraphResolver::new(vec![], &NoHooks, Os::Linux).resolve(&[entry]).unwrap();
    assert_eq!(graph.get("sys").unwrap().kind, ModuleKind::Builtin);
  }
}
