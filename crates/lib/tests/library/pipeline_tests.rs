//! Whole-pipeline builds with a fake binary inspector.

use std::fs;

use pybundle_archive::{ArchiveReader, EntryKind, PythonVersion, ResourceMap};
use pybundle_lib::build::{BuildError, build};
use pybundle_lib::modulegraph::{Hook, HookSet, NoHooks};
use pybundle_lib::spec::{BuildSpec, CompressionPolicy, TargetLayout};
use pybundle_lib::toc::TocError;

use super::common::{FakeInspector, Project, linux_x86_64};

/// `app` imports pure module `x` and extension `y`, which links `libzz`.
fn sample(project: &Project, fake: &FakeInspector) -> BuildSpec {
  let entry = project.write("src/app.py", "import x\nimport y\nraise SystemExit(7)\n");
  project.write("src/x.py", "VALUE = 42\n");
  let ext = project.write("src/y.cpython-311-x86_64-linux-gnu.so", "\x7fELF y");
  let lib = project.write("src/y.libs/libzz.so.1", "\x7fELF zz");
  fake.elf(&ext, &["libzz.so.1", "libc.so.6"], &["$ORIGIN/y.libs"]);
  fake.elf(&lib, &["libc.so.6"], &[]);

  let bootloader = project.write("boot/pybundle-boot", "#!stub\n");
  let mut spec = BuildSpec::new(entry, bootloader, linux_x86_64());
  spec.dist_dir = project.path("dist");
  spec.cache_dir = Some(project.path("cache"));
  spec
}

#[test]
fn end_to_end_bundle_contains_entry_module_extension_and_library() {
  let project = Project::new();
  let fake = FakeInspector::default();
  let spec = sample(&project, &fake);

  let report = build(&spec, &NoHooks, &fake).unwrap();

  assert_eq!(report.artifact.path, project.path("dist/app"));
  assert_eq!(report.artifact.entry_count, 4);
  assert_eq!((report.modules, report.extensions, report.libraries), (2, 1, 1));
  assert!(report.unresolved.is_empty());

  let reader = ArchiveReader::open(&report.artifact.path).unwrap();
  assert_eq!(reader.start(), "#!stub\n".len() as u64);
  assert_eq!(
    reader.contents(),
    vec!["app", "x", "y.cpython-311-x86_64-linux-gnu.so", "libzz.so.1"]
  );
  let kinds: Vec<EntryKind> = reader.records().iter().map(|r| r.kind).collect();
  assert_eq!(
    kinds,
    vec![
      EntryKind::PureModule,
      EntryKind::PureModule,
      EntryKind::ExtensionNative,
      EntryKind::BinaryDependency
    ]
  );
  assert!(reader.get("x").unwrap().compressed);
  assert!(!reader.get("libzz.so.1").unwrap().compressed);
  assert_eq!(reader.read_named("x").unwrap(), b"VALUE = 42\n");
}

#[test]
fn repeated_builds_are_byte_identical() {
  let project = Project::new();
  let fake = FakeInspector::default();
  let spec = sample(&project, &fake);

  let first = build(&spec, &NoHooks, &fake).unwrap();
  let first_bytes = fs::read(&first.artifact.path).unwrap();
  let second = build(&spec, &NoHooks, &fake).unwrap();
  let second_bytes = fs::read(&second.artifact.path).unwrap();

  assert_eq!(first.artifact.index_digest, second.artifact.index_digest);
  assert_eq!(first_bytes, second_bytes);
}

#[test]
fn compression_policy_applies_to_every_entry() {
  let project = Project::new();
  let fake = FakeInspector::default();
  let mut spec = sample(&project, &fake);
  spec.compression = CompressionPolicy::None;

  let report = build(&spec, &NoHooks, &fake).unwrap();
  let reader = ArchiveReader::open(&report.artifact.path).unwrap();
  assert!(reader.records().iter().all(|r| !r.compressed));
}

#[test]
fn onedir_bundle_resolves_every_entry_through_its_manifest() {
  let project = Project::new();
  let fake = FakeInspector::default();
  let mut spec = sample(&project, &fake);
  spec.layout = TargetLayout::Onedir;

  let report = build(&spec, &NoHooks, &fake).unwrap();
  let root = project.path("dist/app");
  assert_eq!(report.artifact.path, root);
  assert!(root.join("app").is_file());
  assert!(root.join("app.pkg").is_file());
  assert!(root.join("libzz.so.1").is_file());
  assert_eq!(fs::read(root.join("x.py")).unwrap(), b"VALUE = 42\n");

  let map = ResourceMap::load(&root).unwrap();
  assert_eq!(map.entry_point.as_deref(), Some("app"));
  assert_eq!(map.read("x").unwrap(), b"VALUE = 42\n");
  assert_eq!(
    map.find_module("y").map(|(name, _)| name),
    Some("y.cpython-311-x86_64-linux-gnu.so")
  );
}

#[test]
fn target_python_selects_its_own_extension_build() {
  let project = Project::new();
  let fake = FakeInspector::default();
  let mut spec = sample(&project, &fake);
  let ext = project.write("src/y.cpython-312-x86_64-linux-gnu.so", "\x7fELF y312");
  fake.elf(&ext, &["libc.so.6"], &[]);
  spec.python = Some(PythonVersion::new(3, 12));

  let report = build(&spec, &NoHooks, &fake).unwrap();

  let reader = ArchiveReader::open(&report.artifact.path).unwrap();
  assert_eq!(reader.contents(), vec!["app", "x", "y.cpython-312-x86_64-linux-gnu.so"]);
  assert_eq!(reader.trailer().python, Some(PythonVersion::new(3, 12)));
}

#[test]
fn sourceless_module_ships_as_bytecode() {
  let project = Project::new();
  let fake = FakeInspector::default();
  let mut spec = sample(&project, &fake);
  project.write("src/app.py", "import x\nimport y\nimport cached\n");
  let mut bytecode = 3495u16.to_le_bytes().to_vec();
  bytecode.extend_from_slice(b"\r\n\0\0\0\0\0\0");
  fs::write(project.path("src/cached.pyc"), &bytecode).unwrap();
  spec.python = Some(PythonVersion::new(3, 11));
  spec.layout = TargetLayout::Onedir;

  let report = build(&spec, &NoHooks, &fake).unwrap();

  assert!(report.unresolved.is_empty());
  let root = project.path("dist/app");
  assert_eq!(fs::read(root.join("cached.pyc")).unwrap(), bytecode);
  let reader = ArchiveReader::open(&root.join("app.pkg")).unwrap();
  assert!(reader.get("cached").unwrap().sourceless);
  assert!(!reader.get("x").unwrap().sourceless);
}

#[test]
fn hook_data_is_bundled_and_collisions_fail_the_build() {
  let project = Project::new();
  let fake = FakeInspector::default();
  let spec = sample(&project, &fake);
  project.write("assets/a/settings.ini", "[a]\n");
  project.write("assets/b/settings.ini", "[b]\n");

  let mut hooks = HookSet::new();
  hooks.insert(
    "x",
    Hook {
      datas: vec![(project.path("assets/a/settings.ini"), "conf".to_string())],
      ..Default::default()
    },
  );
  let report = build(&spec, &hooks, &fake).unwrap();
  assert_eq!(report.data, 1);
  let reader = ArchiveReader::open(&report.artifact.path).unwrap();
  assert_eq!(reader.read_named("conf/settings.ini").unwrap(), b"[a]\n");

  hooks.insert(
    "app",
    Hook {
      datas: vec![(project.path("assets/b/settings.ini"), "conf".to_string())],
      ..Default::default()
    },
  );
  let err = build(&spec, &hooks, &fake).unwrap_err();
  match err {
    BuildError::Toc(TocError::Collision { name, .. }) => assert_eq!(name, "conf/settings.ini"),
    other => panic!("unexpected: {other}"),
  }
}

#[test]
fn missing_native_library_fails_the_build() {
  let project = Project::new();
  let fake = FakeInspector::default();
  let spec = sample(&project, &fake);
  fs::remove_file(project.path("src/y.libs/libzz.so.1")).unwrap();

  let err = build(&spec, &NoHooks, &fake).unwrap_err();
  assert!(
    err.to_string().contains("libzz.so.1"),
    "unexpected: {err}"
  );
}
