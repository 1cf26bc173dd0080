use std::fs;

use predicates::prelude::*;

use super::common::{BOOTLOADER_STUB, TestEnv};

#[test]
fn build_writes_a_onefile_bundle() {
  let env = TestEnv::sample_project();

  env
    .build(&[])
    .assert()
    .success()
    .stdout(predicate::str::contains("Build complete"))
    .stdout(predicate::str::contains("Entries: 4"));

  let bundle = fs::read(env.dist_path().join("app")).unwrap();
  assert!(bundle.starts_with(BOOTLOADER_STUB.as_bytes()));
  assert_eq!(&bundle[bundle.len() - 64..bundle.len() - 56], b"PYBNDL\r\n");
}

#[test]
fn build_json_output_is_valid() {
  let env = TestEnv::sample_project();

  let output = env.build(&["-o", "json", "--name", "tool"]).output().unwrap();
  assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(report["name"], "tool");
  assert_eq!(report["modules"], 4);
  assert_eq!(report["artifact"]["layout"], "onefile");
  assert_eq!(report["artifact"]["entry_count"], 4);
  assert_eq!(report["artifact"]["archive_start"], BOOTLOADER_STUB.len());
}

#[test]
fn build_onedir_writes_launcher_sidecar_and_loose_modules() {
  let env = TestEnv::sample_project();

  env.build(&["--layout", "onedir"]).assert().success();

  let root = env.dist_path().join("app");
  assert_eq!(fs::read_to_string(root.join("app")).unwrap(), BOOTLOADER_STUB);
  assert!(root.join("app.pkg").is_file());
  assert!(root.join("app.py").is_file());
  assert!(root.join(".pybundle-resources.json").is_file());
  assert_eq!(fs::read_to_string(root.join("helper.py")).unwrap(), "CODE = 3\n");
  assert!(root.join("tools/__init__.py").is_file());
  assert!(root.join("tools/fmt.py").is_file());
}

#[test]
fn onedir_build_refuses_to_clobber_an_unrelated_directory() {
  let env = TestEnv::sample_project();
  env.write_file("dist/app/notes.txt", "mine");

  env
    .build(&["--layout", "onedir"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("not a previous bundle"));
  assert_eq!(fs::read_to_string(env.path("dist/app/notes.txt")).unwrap(), "mine");

  fs::remove_file(env.path("dist/app/notes.txt")).unwrap();
  env.build(&["--layout", "onedir"]).assert().success();
  env.build(&["--layout", "onedir"]).assert().success();
}

#[test]
fn missing_imports_are_reported_as_warnings() {
  let env = TestEnv::sample_project();
  env.write_file("src/helper.py", "import not_installed_anywhere\nCODE = 3\n");

  env
    .build(&[])
    .assert()
    .success()
    .stderr(predicate::str::contains("not_installed_anywhere"));
}

#[test]
fn excludes_and_search_paths_shape_the_bundle() {
  let env = TestEnv::sample_project();
  env.write_file("src/app.py", "import helper\nimport vendored\nfrom tools import fmt\n");
  env.write_file("vendor/vendored.py", "");

  let output = env
    .build(&["-p", "vendor", "-x", "tools", "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(report["modules"], 3);
}

#[test]
fn hook_directory_adds_data_files() {
  let env = TestEnv::sample_project();
  env.write_file("assets/banner.txt", "hello");
  let asset = env.path("assets/banner.txt");
  env.write_file(
    "hooks/hook-helper.json",
    &serde_json::json!({ "datas": [[asset, "helper_data"]] }).to_string(),
  );

  let output = env.build(&["--hooks-dir", "hooks", "-o", "json"]).output().unwrap();
  assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(report["data"], 1);
}

#[test]
fn stale_cache_lock_refuses_the_build() {
  let env = TestEnv::sample_project();
  fs::write(env.cache_path().join(".lock"), "not json").unwrap();

  env
    .build(&[])
    .assert()
    .failure()
    .stderr(predicate::str::contains("locked"));

  env.build(&["--no-cache"]).assert().success();
}

#[test]
fn cache_clean_after_build_succeeds() {
  let env = TestEnv::sample_project();
  env.build(&[]).assert().success();

  env
    .pybundle_cmd()
    .args(["cache", "clean"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Cache cleaned"));
  assert!(!env.cache_path().join(".lock").exists());
}
