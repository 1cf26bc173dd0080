//! Import graph resolution over real source trees.

use std::path::PathBuf;

use pybundle_lib::bindepend::ScanReport;
use pybundle_lib::modulegraph::{Hook, HookSet, ModuleGraph, ModuleGraphResolver, ModuleKind, NoHooks, ResolveError};
use pybundle_lib::platform::os::Os;
use pybundle_lib::spec::{CompressionPolicy, ExcludePattern};
use pybundle_lib::toc::Toc;

use super::common::Project;

fn resolve(entry: &PathBuf, hooks: &HookSet) -> ModuleGraph {
  ModuleGraphResolver::new(Vec::new(), hooks, Os::Linux)
    .resolve(std::slice::from_ref(entry))
    .unwrap()
}

fn names(graph: &ModuleGraph) -> Vec<&str> {
  graph.modules().map(|m| m.name.as_str()).collect()
}

/// Every edge ends at a resolved module, a recorded missing import or an
/// excluded name.
fn assert_closed(graph: &ModuleGraph) {
  for edge in graph.edges() {
    let accounted = graph.contains(&edge.imported)
      || graph.missing().iter().any(|m| m.name == edge.imported)
      || graph.excluded().contains(&edge.imported);
    assert!(accounted, "dangling edge {} -> {}", edge.importer, edge.imported);
  }
}

mod traversal {
  use super::*;

  #[test]
  fn import_cycles_terminate_with_each_module_once() {
    let project = Project::new();
    let entry = project.write("app.py", "import a\n");
    project.write("a.py", "import b\n");
    project.write("b.py", "import a\n");

    let graph = resolve(&entry, &HookSet::new());

    assert_eq!(names(&graph), vec!["app", "a", "b"]);
    assert_eq!(graph.imports_of("a"), vec!["b"]);
    assert_eq!(graph.imports_of("b"), vec!["a"]);
    assert_closed(&graph);
  }

  #[test]
  fn packages_submodules_and_relative_imports() {
    let project = Project::new();
    let entry = project.write("app.py", "from pkg import sub, CONSTANT\nimport pkg.deep.leaf as leaf\n");
    project.write("pkg/__init__.py", "CONSTANT = 1\n");
    project.write("pkg/sub.py", "from . import helpers\nfrom .deep import leaf\n");
    project.write("pkg/helpers.py", "");
    project.write("pkg/deep/__init__.py", "");
    project.write("pkg/deep/leaf.py", "from ..helpers import thing\n");

    let graph = resolve(&entry, &HookSet::new());

    for name in ["pkg", "pkg.sub", "pkg.helpers", "pkg.deep", "pkg.deep.leaf"] {
      assert!(graph.contains(name), "missing {name}");
    }
    assert!(graph.get("pkg").unwrap().package);
    assert!(!graph.contains("pkg.CONSTANT"));
    assert!(graph.missing().is_empty(), "unexpected missing: {:?}", graph.missing());
    assert_eq!(graph.importers_of("pkg.helpers"), vec!["pkg.deep.leaf", "pkg.sub"]);
    assert_closed(&graph);
  }

  #[test]
  fn missing_optional_imports_are_recorded_not_fatal() {
    let project = Project::new();
    let entry = project.write(
      "app.py",
      "import present\ntry:\n    import ujson as json\nexcept ImportError:\n    import json\n",
    );
    project.write("present.py", "");
    project.write("json/__init__.py", "");

    let graph = resolve(&entry, &HookSet::new());

    assert!(graph.contains("present"));
    assert!(graph.contains("json"));
    let missing = &graph.missing()[0];
    assert_eq!(missing.name, "ujson");
    assert_eq!(missing.importer, "app");
    assert!(missing.conditional);

    let edge = graph.edges().into_iter().find(|e| e.imported == "json").unwrap();
    assert!(edge.conditional);
    assert_closed(&graph);
  }

  #[test]
  fn builtins_resolve_without_a_file() {
    let project = Project::new();
    let entry = project.write("app.py", "import sys\nimport marshal\n");

    let graph = resolve(&entry, &HookSet::new());
    assert_eq!(graph.get("sys").unwrap().kind, ModuleKind::Builtin);

    let toc = Toc::from_graph(&graph, &ScanReport::default(), None, CompressionPolicy::Auto).unwrap();
    assert_eq!(toc.len(), 1);
    assert_eq!(toc.entries()[0].name, "app");
  }

  #[test]
  fn string_built_imports_are_conditional_hints() {
    let project = Project::new();
    let entry = project.write(
      "app.py",
      "import importlib\nplugin = importlib.import_module(\"plugins.csv\")\n",
    );
    project.write("importlib/__init__.py", "");
    project.write("plugins/__init__.py", "");
    project.write("plugins/csv.py", "");

    let graph = resolve(&entry, &HookSet::new());
    assert!(graph.contains("plugins.csv"));
    let edge = graph
      .edges()
      .into_iter()
      .find(|e| e.importer == "app" && e.imported == "plugins.csv")
      .unwrap();
    assert!(edge.conditional);
  }

  #[test]
  fn spec_excludes_remove_whole_subtrees() {
    let project = Project::new();
    let entry = project.write("app.py", "import big.part\nimport small\n");
    project.write("big/__init__.py", "");
    project.write("big/part.py", "");
    project.write("small.py", "");

    let hooks = NoHooks;
    let graph = ModuleGraphResolver::new(Vec::new(), &hooks, Os::Linux)
      .with_excludes(vec![ExcludePattern::new("big")])
      .resolve(&[entry])
      .unwrap();

    assert_eq!(names(&graph), vec!["app", "small"]);
    assert!(graph.excluded().contains("big"));
    assert_closed(&graph);
  }
}

mod hooks {
  use super::*;

  #[test]
  fn hook_exclusion_beats_a_static_import() {
    let project = Project::new();
    let entry = project.write("app.py", "import a\nimport b\n");
    project.write("a.py", "");
    project.write("b.py", "import c\n");
    project.write("c.py", "");

    let mut hooks = HookSet::new();
    hooks.insert(
      "a",
      Hook {
        excluded_imports: vec!["b".to_string()],
        ..Default::default()
      },
    );

    let graph = resolve(&entry, &hooks);
    assert_eq!(names(&graph), vec!["app", "a"]);
    assert!(graph.excluded().contains("b"));
    assert_closed(&graph);

    let toc = Toc::from_graph(&graph, &ScanReport::default(), None, CompressionPolicy::Auto).unwrap();
    assert!(toc.get("b").is_none());
    assert!(toc.get("c").is_none());
  }

  #[test]
  fn hook_imports_and_files_are_added() {
    let project = Project::new();
    let entry = project.write("app.py", "import plugin_host\n");
    project.write("plugin_host.py", "");
    project.write("hidden_backend.py", "");
    project.write("assets/theme/colors.json", "{}");
    project.write("assets/theme/fonts/mono.txt", "mono");

    let mut hooks = HookSet::new();
    hooks.insert(
      "plugin_host",
      Hook {
        extra_imports: vec!["hidden_backend".to_string()],
        datas: vec![(project.path("assets/theme"), "plugin_host/theme".to_string())],
        ..Default::default()
      },
    );

    let graph = resolve(&entry, &hooks);
    assert!(graph.contains("hidden_backend"));
    assert!(graph.get("plugin_host").unwrap().hook.is_some());

    let datas: Vec<&str> = graph.datas().iter().map(|f| f.logical_name.as_str()).collect();
    assert_eq!(datas, vec!["plugin_host/theme/colors.json", "plugin_host/theme/fonts/mono.txt"]);
  }

  #[test]
  fn hook_mandated_import_that_is_missing_fails() {
    let project = Project::new();
    let entry = project.write("app.py", "import host\n");
    project.write("host.py", "");

    let mut hooks = HookSet::new();
    hooks.insert(
      "host",
      Hook {
        extra_imports: vec!["vanished".to_string()],
        ..Default::default()
      },
    );

    let err = ModuleGraphResolver::new(Vec::new(), &hooks, Os::Linux)
      .resolve(&[entry])
      .unwrap_err();
    match err {
      ResolveError::UnresolvedImport { module, import } => {
        assert_eq!(module, "host");
        assert_eq!(import, "vanished");
      }
      other => panic!("unexpected: {other}"),
    }
  }
}

mod namespaces {
  use super::*;

  #[test]
  fn portions_across_roots_merge() {
    let project = Project::new();
    let entry = project.write("src/app.py", "import ns.one\nimport ns.two\n");
    project.write("site1/ns/one.py", "");
    project.write("site2/ns/two.py", "");

    let hooks = NoHooks;
    let graph = ModuleGraphResolver::new(vec![project.path("site1"), project.path("site2")], &hooks, Os::Linux)
      .resolve(&[entry])
      .unwrap();

    let ns = graph.get("ns").unwrap();
    assert_eq!(ns.kind, ModuleKind::NamespacePackage);
    assert_eq!(ns.search_locations, vec![project.path("site1/ns"), project.path("site2/ns")]);
    assert_eq!(graph.get("ns.one").unwrap().origin, Some(project.path("site1/ns/one.py")));
    assert_eq!(graph.get("ns.two").unwrap().origin, Some(project.path("site2/ns/two.py")));

    let toc = Toc::from_graph(&graph, &ScanReport::default(), None, CompressionPolicy::Auto).unwrap();
    assert!(toc.get("ns").is_none());
    assert!(toc.get("ns.one").is_some());
  }

  #[test]
  fn a_later_regular_package_wins_over_a_portion() {
    let project = Project::new();
    let entry = project.write("src/app.py", "import pkg\n");
    project.write("site1/pkg/stray.py", "");
    project.write("site2/pkg/__init__.py", "");

    let hooks = NoHooks;
    let graph = ModuleGraphResolver::new(vec![project.path("site1"), project.path("site2")], &hooks, Os::Linux)
      .resolve(&[entry])
      .unwrap();

    let pkg = graph.get("pkg").unwrap();
    assert_eq!(pkg.kind, ModuleKind::PureSource);
    assert!(pkg.package);
    assert_eq!(pkg.origin, Some(project.path("site2/pkg/__init__.py")));
  }
}
