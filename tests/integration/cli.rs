//! The `amdagg` command line.

use crate::common::TestProject;
use predicates::prelude::*;
use std::fs;

fn app() -> TestProject {
    TestProject::with_sources(&[
        ("app/main.js", "define(['./util', './view'], function (util, view) {\n  return view(util);\n});\n"),
        ("app/util.js", "define([], function () {\n  return {};\n});\n"),
        (
            "app/view.js",
            "define(['dojo/text!./view.html'], function (tpl) {\n  return has('ie') ? null : tpl;\n});\n",
        ),
        ("app/view.html", "<p>view</p>"),
        ("dojo/text.js", "define([], { load: function () {} });\n"),
    ])
    .unwrap()
}

#[test]
fn test_help_lists_commands() {
    let project = TestProject::new().unwrap();
    project
        .command()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("scan"))
        .stdout(predicate::str::contains("resolve"))
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("dump"));
}

#[test]
fn test_scan_text() {
    let project = app();
    project
        .command()
        .arg("scan")
        .assert()
        .success()
        .stdout(predicate::str::contains("app/view"))
        .stdout(predicate::str::contains("define: dojo/text!./view.html"))
        .stdout(predicate::str::contains("features: ie"))
        .stdout(predicate::str::contains("Scanned 4 resources: 4 parsed"));
}

#[test]
fn test_scan_json() {
    let project = app();
    let output = project.command().args(["scan", "--format", "json"]).output().unwrap();
    assert!(output.status.success());

    let document: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(document["stats"]["parsed"], 4);
    assert_eq!(document["stats"]["failed"], 0);
    let modules = document["modules"].as_array().unwrap();
    assert_eq!(modules.len(), 4);
    assert!(modules.iter().any(|m| m["name"] == "app/main"));
    assert_eq!(document["cycles"], serde_json::json!([]));
}

#[test]
fn test_scan_reports_cycles() {
    let project = TestProject::with_sources(&[
        ("a.js", "define(['b'], 1);"),
        ("b.js", "define(['a'], 1);"),
    ])
    .unwrap();
    project.command().arg("scan").assert().success().stdout(predicate::str::contains("Cycle: a -> b"));
}

#[test]
fn test_resolve_order() {
    let project = app();
    let output = project.command().args(["resolve", "app/main"]).output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let order: Vec<&str> = stdout.lines().collect();
    assert_eq!(order, vec!["app/util", "dojo/text", "app/view.html", "app/view", "app/main"]);
}

#[test]
fn test_resolve_tree() {
    let project = app();
    project
        .command()
        .args(["resolve", "app/main", "--tree"])
        .assert()
        .success()
        .stdout(predicate::str::contains("app/main"))
        .stdout(predicate::str::contains("app/util"));
}

#[test]
fn test_build_to_stdout() {
    let project = app();
    project
        .command()
        .args(["build", "app/main"])
        .assert()
        .success()
        .stdout(predicate::str::contains("return view(util);"))
        .stdout(predicate::str::contains("define([], \"<p>view</p>\");"));
}

#[test]
fn test_build_export_names_to_file() {
    let project = app();
    let out = project.source_path().with_file_name("layer.js");
    project
        .command()
        .args(["build", "app/util", "--no-expand", "--export-names", "-o"])
        .arg(&out)
        .assert()
        .success();

    let layer = fs::read_to_string(&out).unwrap();
    assert!(layer.starts_with("define(\"app/util\", []"), "{layer}");
}

#[test]
fn test_build_gzip() {
    let project = app();
    let out = project.source_path().with_file_name("layer.js.gz");
    project.command().args(["build", "app/main", "--gzip", "--output"]).arg(&out).assert().success();

    let bytes = fs::read(&out).unwrap();
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
}

#[test]
fn test_build_missing_module_fails() {
    let project = app();
    project
        .command()
        .args(["build", "app/missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_build_with_missing_dependency_warns() {
    let project = TestProject::with_sources(&[("app/main.js", "define(['./gone'], 1);")]).unwrap();
    project
        .command()
        .args(["build", "app/main"])
        .assert()
        .success()
        .stderr(predicate::str::contains("layer contains modules that failed to build"))
        .stdout(predicate::str::contains("console.error("));
}

#[test]
fn test_dump_after_warm() {
    let project = app();
    project
        .command()
        .args(["dump", "--warm", "app/main"])
        .assert()
        .success()
        .stdout(predicate::str::contains("control="))
        .stdout(predicate::str::contains("[layers] 1 entries"))
        .stdout(predicate::str::contains(r#"layer:["app/main"]|features:|"#))
        .stdout(predicate::str::contains("[modules] 5 entries"));
}

#[test]
fn test_dump_filter() {
    let project = app();
    let output = project
        .command()
        .args(["dump", "--warm", "app/main", "--filter", "^app/util"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let entries: Vec<&str> = stdout
        .lines()
        .filter(|l| l.contains("created=") && !l.starts_with("control="))
        .collect();
    assert_eq!(entries.len(), 1, "{stdout}");
    assert!(entries[0].starts_with("app/util|"));
}

#[test]
fn test_dump_invalid_filter() {
    let project = app();
    project
        .command()
        .args(["dump", "--filter", "("])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid filter pattern"));
}

#[test]
fn test_missing_root() {
    let project = TestProject::new().unwrap();
    fs::remove_dir(project.source_path()).unwrap();
    project
        .command()
        .arg("scan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Source directory not found"));
}

#[test]
fn test_invalid_config() {
    let project = app();
    project.write_config("parallelism = 0\n").unwrap();
    project
        .command()
        .arg("scan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_malformed_config() {
    let project = app();
    project.write_config("include = [\"**/*.js\"\n").unwrap();
    project
        .command()
        .arg("scan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_config_exclude() {
    let project = app();
    project.write_config("exclude = [\"dojo/**\"]\n").unwrap();
    project
        .command()
        .arg("scan")
        .assert()
        .success()
        .stdout(predicate::str::contains("Scanned 3 resources"));
}

#[test]
fn test_verbose_and_quiet_conflict() {
    let project = app();
    project.command().args(["-v", "-q", "scan"]).assert().failure();
}
