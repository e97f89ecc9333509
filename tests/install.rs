use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// A quarry invocation sandboxed to `root`: project in `root/project`, cache
/// in `root/cache`, registry pointing at a closed port so anything that tries
/// the network fails loudly.
fn quarry(root: &Path) -> Command {
    let project = root.join("project");
    fs::create_dir_all(&project).unwrap();
    let mut cmd = Command::cargo_bin("quarry").unwrap();
    cmd.current_dir(&project)
        .env("QUARRY_REGISTRY", "http://127.0.0.1:1")
        .env("QUARRY_CACHE_DIR", root.join("cache"));
    cmd
}

#[test]
fn init_writes_a_manifest_once() {
    let root = TempDir::new().unwrap();

    quarry(root.path())
        .args(["init", "--name", "demo", "--version", "0.3.0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("created demo@0.3.0"));

    let manifest = fs::read_to_string(root.path().join("project/package.json")).unwrap();
    assert!(manifest.contains("\"demo\""));

    quarry(root.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("package.json already exists"));
}

#[test]
fn install_without_a_manifest_points_at_init() {
    let root = TempDir::new().unwrap();
    quarry(root.path())
        .arg("install")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Run 'quarry init' first"));
}

#[test]
fn file_dependency_round_trip_through_the_binary() {
    let root = TempDir::new().unwrap();
    let project = root.path().join("project");
    fs::create_dir_all(&project).unwrap();

    let lib = project.join("shared-lib");
    fs::create_dir_all(&lib).unwrap();
    fs::write(
        lib.join("package.json"),
        json!({ "name": "shared-lib", "version": "1.0.0" }).to_string(),
    )
    .unwrap();
    fs::write(lib.join("index.js"), "module.exports = 1;\n").unwrap();

    fs::write(
        project.join("package.json"),
        json!({
            "name": "app",
            "version": "1.0.0",
            "dependencies": { "shared-lib": "file:./shared-lib" }
        })
        .to_string(),
    )
    .unwrap();

    quarry(root.path())
        .arg("install")
        .assert()
        .success()
        .stdout(predicate::str::contains("Installed"));

    let installed = project.join("node_modules/shared-lib/package.json");
    let body = fs::read_to_string(installed).unwrap();
    assert!(body.contains("\"shared-lib\""));
    assert!(project.join("quarry.lock").is_file());

    // The tree just written must verify, and a second install is a no-op.
    quarry(root.path())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("integrity matches"));
    quarry(root.path())
        .arg("install")
        .assert()
        .success()
        .stdout(predicate::str::contains("Already up-to-date"));
}

#[test]
fn check_demands_an_install_record() {
    let root = TempDir::new().unwrap();
    let project = root.path().join("project");
    fs::create_dir_all(&project).unwrap();
    fs::write(
        project.join("package.json"),
        json!({ "name": "app", "version": "1.0.0" }).to_string(),
    )
    .unwrap();

    quarry(root.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Run 'quarry install'"));
}

#[test]
fn cache_path_honors_the_environment() {
    let root = TempDir::new().unwrap();
    let cache = root.path().join("cache");
    quarry(root.path())
        .args(["cache", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains(cache.display().to_string()));

    fs::create_dir_all(cache.join("pkgs")).unwrap();
    quarry(root.path())
        .args(["cache", "clean"])
        .assert()
        .success();
    assert!(cache.is_dir());
    assert!(!cache.join("pkgs").exists());
}
