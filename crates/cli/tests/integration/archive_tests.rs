use std::fs;

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn inspect_lists_entries_in_index_order() {
  let env = TestEnv::sample_project();
  env.build(&[]).assert().success();

  let output = env
    .pybundle_cmd()
    .arg("inspect")
    .arg(env.dist_path().join("app"))
    .args(["-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let listing: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let names: Vec<&str> = listing["entries"]
    .as_array()
    .unwrap()
    .iter()
    .map(|e| e["name"].as_str().unwrap())
    .collect();
  assert_eq!(names, vec!["app", "helper", "tools", "tools.fmt"]);
  assert_eq!(listing["entries"][0]["kind"], "pure-module");
  assert_eq!(listing["entries"][2]["package"], true);
  assert_eq!(listing["entries"][0]["compressed"], true);
}

#[test]
fn inspect_text_output_marks_packages() {
  let env = TestEnv::sample_project();
  env.build(&[]).assert().success();

  env
    .pybundle_cmd()
    .arg("inspect")
    .arg(env.dist_path().join("app"))
    .assert()
    .success()
    .stdout(predicate::str::contains("zp-"))
    .stdout(predicate::str::contains("4 entries"));
}

#[test]
fn inspect_accepts_a_onedir_bundle_directory() {
  let env = TestEnv::sample_project();
  env.build(&["--layout", "onedir"]).assert().success();

  env
    .pybundle_cmd()
    .arg("inspect")
    .arg(env.dist_path().join("app"))
    .assert()
    .success()
    .stdout(predicate::str::contains("app.pkg"))
    .stdout(predicate::str::contains("tools.fmt"));
}

#[test]
fn extract_all_reproduces_the_sources() {
  let env = TestEnv::sample_project();
  env.build(&[]).assert().success();
  let dest = env.path("out");

  env
    .pybundle_cmd()
    .arg("extract")
    .arg(env.dist_path().join("app"))
    .arg("-d")
    .arg(&dest)
    .assert()
    .success()
    .stdout(predicate::str::contains("Extracted 4 entries"));

  for (extracted, source) in [
    ("app.py", "src/app.py"),
    ("helper.py", "src/helper.py"),
    ("tools/__init__.py", "src/tools/__init__.py"),
    ("tools/fmt.py", "src/tools/fmt.py"),
  ] {
    assert_eq!(
      fs::read(dest.join(extracted)).unwrap(),
      fs::read(env.path(source)).unwrap(),
      "{extracted}"
    );
  }
}

#[test]
fn extract_single_entry() {
  let env = TestEnv::sample_project();
  env.build(&[]).assert().success();
  let dest = env.path("out");

  env
    .pybundle_cmd()
    .arg("extract")
    .arg(env.dist_path().join("app"))
    .arg("helper")
    .arg("-d")
    .arg(&dest)
    .assert()
    .success();

  assert_eq!(fs::read_to_string(dest.join("helper.py")).unwrap(), "CODE = 3\n");
  assert!(!dest.join("app.py").exists());
}

#[test]
fn extract_unknown_entry_fails() {
  let env = TestEnv::sample_project();
  env.build(&[]).assert().success();

  env
    .pybundle_cmd()
    .arg("extract")
    .arg(env.dist_path().join("app"))
    .arg("nope")
    .assert()
    .failure()
    .stderr(predicate::str::contains("No entry named 'nope'"));
}

#[test]
fn onedir_extract_skips_loose_entries() {
  let env = TestEnv::sample_project();
  env.build(&["--layout", "onedir"]).assert().success();
  let dest = env.path("out");

  env
    .pybundle_cmd()
    .arg("extract")
    .arg(env.dist_path().join("app"))
    .arg("-d")
    .arg(&dest)
    .assert()
    .success()
    .stdout(predicate::str::contains("Extracted 0 entries"))
    .stdout(predicate::str::contains("4 entries live beside the archive"));

  assert!(!dest.join("helper.py").exists());
  assert!(!dest.join("app.py").exists());
}
