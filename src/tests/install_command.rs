use serde_json::json;
use std::fs;

use super::common::{
    gz_tarball, registry_doc, test_config, version_entry, write_project_manifest, MockResponse,
    MockServer,
};
use crate::cli::commands::install::run_install;
use crate::cli::commands::DepTarget;
use crate::config::INTEGRITY_FILENAME;
use crate::hash::sha1_hex;
use crate::lockfile::Lockfile;
use crate::manifest;
use crate::reporter::NullReporter;

/// Registry + tarball host for one package with no dependencies.
fn single_package_servers(name: &str, version: &str) -> (MockServer, MockServer, String) {
    let tarball = gz_tarball(&[
        (
            "package.json",
            &json!({ "name": name, "version": version }).to_string(),
        ),
        ("index.js", "module.exports = 'ok';\n"),
    ]);
    let shasum = sha1_hex(&tarball);
    let tarball_path = format!("/{name}/-/{name}-{version}.tgz");
    let files = MockServer::start(vec![(tarball_path.clone(), MockResponse::Bytes(tarball))]);

    let tarball_url = format!("{}{tarball_path}", files.url);
    let doc = registry_doc(
        name,
        vec![version_entry(name, version, &tarball_url, &shasum)],
    );
    let registry = MockServer::start(vec![(format!("/{name}"), MockResponse::Json(doc))]);
    (registry, files, tarball_url)
}

#[test]
fn simple_add_resolves_fetches_links_and_pins() {
    let (registry, _files, tarball_url) = single_package_servers("left-pad", "1.2.0");

    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    config.registry = registry.url.clone();
    write_project_manifest(&config, &json!({ "name": "app", "version": "1.0.0" }));

    run_install(
        &config,
        &NullReporter,
        &["left-pad@1.2.0".to_string()],
        DepTarget::Normal,
        false,
    )
    .unwrap();

    // package.json picked up the added dependency.
    let root = manifest::load(&config.cwd.join("package.json")).unwrap();
    assert_eq!(
        root.dependencies.get("left-pad").map(String::as_str),
        Some("1.2.0")
    );

    // The linked tree serves the right manifest through the symlink.
    let installed =
        manifest::load(&config.modules_dir().join("left-pad").join("package.json")).unwrap();
    assert_eq!(installed.name.as_deref(), Some("left-pad"));
    assert_eq!(installed.version.as_deref(), Some("1.2.0"));

    // The lockfile pins the original pattern to the tarball plus its hash.
    let lockfile = Lockfile::load(&config.lockfile_path()).unwrap();
    let locked = lockfile.get_locked("left-pad@1.2.0").expect("pinned entry");
    assert_eq!(locked.version, "1.2.0");
    let resolved = locked.resolved.expect("resolved recorded");
    assert!(resolved.starts_with(&tarball_url), "got: {resolved}");
    let hash = resolved.split('#').nth(1).expect("hash suffix");
    assert!(!hash.is_empty());

    // The integrity record exists and is non-empty.
    let integrity = fs::read_to_string(config.modules_dir().join(INTEGRITY_FILENAME)).unwrap();
    assert!(!integrity.trim().is_empty());
}

#[test]
fn second_install_takes_the_fast_path() {
    let (registry, files, _) = single_package_servers("fast-pkg", "2.0.0");

    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    config.registry = registry.url.clone();
    write_project_manifest(
        &config,
        &json!({
            "name": "app",
            "version": "1.0.0",
            "dependencies": { "fast-pkg": "^2.0.0" }
        }),
    );

    run_install(&config, &NullReporter, &[], DepTarget::Normal, false).unwrap();
    let registry_hits = registry.hits();
    let file_hits = files.hits();
    assert!(registry_hits >= 1);
    assert_eq!(file_hits, 1);

    run_install(&config, &NullReporter, &[], DepTarget::Normal, false).unwrap();
    assert_eq!(registry.hits(), registry_hits, "fast path hit the registry");
    assert_eq!(files.hits(), file_hits, "fast path refetched the tarball");
}

#[test]
fn lockfile_reinstall_works_fully_offline() {
    let (registry, files, _) = single_package_servers("pinned", "3.0.0");

    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    config.registry = registry.url.clone();
    write_project_manifest(
        &config,
        &json!({
            "name": "app",
            "version": "1.0.0",
            "dependencies": { "pinned": "^3.0.0" }
        }),
    );
    run_install(&config, &NullReporter, &[], DepTarget::Normal, false).unwrap();

    // Wipe the tree but keep the lockfile and cache; an offline reinstall
    // must reproduce it without any network.
    fs::remove_dir_all(config.modules_dir()).unwrap();
    let registry_hits = registry.hits();
    let file_hits = files.hits();

    let mut offline = config.clone();
    offline.offline = true;
    run_install(&offline, &NullReporter, &[], DepTarget::Normal, false).unwrap();

    assert_eq!(registry.hits(), registry_hits);
    assert_eq!(files.hits(), file_hits);
    let installed =
        manifest::load(&offline.modules_dir().join("pinned").join("package.json")).unwrap();
    assert_eq!(installed.version.as_deref(), Some("3.0.0"));
}

#[test]
fn failed_optional_dependency_does_not_sink_the_install() {
    let tarball = gz_tarball(&[(
        "package.json",
        &json!({ "name": "left-pad", "version": "1.2.0" }).to_string(),
    )]);
    let shasum = sha1_hex(&tarball);
    let files = MockServer::start(vec![(
        "/left-pad/-/left-pad-1.2.0.tgz".to_string(),
        MockResponse::Bytes(tarball),
    )]);
    let tarball_url = format!("{}/left-pad/-/left-pad-1.2.0.tgz", files.url);

    // `native` only exists for a fictional platform, and is optional.
    let native_doc = {
        let mut entry = version_entry("native", "1.0.0", "http://x/native-1.0.0.tgz", "ccc");
        entry["os"] = json!(["severely-fictional-os"]);
        registry_doc("native", vec![entry])
    };
    let left_pad_doc = registry_doc(
        "left-pad",
        vec![version_entry("left-pad", "1.2.0", &tarball_url, &shasum)],
    );
    let registry = MockServer::start(vec![
        ("/left-pad".to_string(), MockResponse::Json(left_pad_doc)),
        ("/native".to_string(), MockResponse::Json(native_doc)),
    ]);

    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    config.registry = registry.url.clone();

    write_project_manifest(
        &config,
        &json!({
            "name": "app",
            "version": "1.0.0",
            "dependencies": { "left-pad": "^1.0.0" },
            "optionalDependencies": { "native": "^1.0.0" }
        }),
    );

    run_install(&config, &NullReporter, &[], DepTarget::Normal, false).unwrap();

    assert!(config.modules_dir().join("left-pad").exists());
    assert!(!config.modules_dir().join("native").exists());

    // The optional pattern stays out of the lockfile so it is retried later.
    let lockfile = Lockfile::load(&config.lockfile_path()).unwrap();
    assert!(lockfile.get_locked("left-pad@^1.0.0").is_some());
    assert!(lockfile.get_locked("native@^1.0.0").is_none());
}

#[test]
fn file_dependency_installs_from_a_local_directory() {
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(temp.path());

    let local = temp.path().join("project").join("vendor").join("local-lib");
    fs::create_dir_all(&local).unwrap();
    fs::write(
        local.join("package.json"),
        json!({ "name": "local-lib", "version": "0.5.0" }).to_string(),
    )
    .unwrap();
    fs::write(local.join("lib.js"), "module.exports = 42;\n").unwrap();

    write_project_manifest(
        &config,
        &json!({
            "name": "app",
            "version": "1.0.0",
            "dependencies": { "local-lib": "file:./vendor/local-lib" }
        }),
    );

    run_install(&config, &NullReporter, &[], DepTarget::Normal, false).unwrap();

    let installed =
        manifest::load(&config.modules_dir().join("local-lib").join("package.json")).unwrap();
    assert_eq!(installed.version.as_deref(), Some("0.5.0"));
    let body = fs::read_to_string(config.modules_dir().join("local-lib").join("lib.js")).unwrap();
    assert_eq!(body, "module.exports = 42;\n");
}

#[test]
fn flat_mode_rejects_conflicting_versions() {
    let tarball_a = gz_tarball(&[(
        "package.json",
        &json!({ "name": "dep", "version": "1.0.0" }).to_string(),
    )]);
    let tarball_b = gz_tarball(&[(
        "package.json",
        &json!({ "name": "dep", "version": "2.0.0" }).to_string(),
    )]);
    let files = MockServer::start(vec![
        (
            "/dep/-/dep-1.0.0.tgz".to_string(),
            MockResponse::Bytes(tarball_a.clone()),
        ),
        (
            "/dep/-/dep-2.0.0.tgz".to_string(),
            MockResponse::Bytes(tarball_b.clone()),
        ),
    ]);

    let dep_doc = registry_doc(
        "dep",
        vec![
            version_entry(
                "dep",
                "1.0.0",
                &format!("{}/dep/-/dep-1.0.0.tgz", files.url),
                &sha1_hex(&tarball_a),
            ),
            version_entry(
                "dep",
                "2.0.0",
                &format!("{}/dep/-/dep-2.0.0.tgz", files.url),
                &sha1_hex(&tarball_b),
            ),
        ],
    );
    let registry = MockServer::start(vec![("/dep".to_string(), MockResponse::Json(dep_doc))]);

    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    config.registry = registry.url.clone();
    config.flat = true;

    // Two seed patterns for the same name at incompatible versions.
    write_project_manifest(
        &config,
        &json!({
            "name": "app",
            "version": "1.0.0",
            "dependencies": { "dep": "^1.0.0" },
            "devDependencies": { "dep": "^2.0.0" }
        }),
    );
    let err = run_install(&config, &NullReporter, &[], DepTarget::Normal, false).unwrap_err();
    assert!(
        err.to_string()
            .contains("flat install requires exactly one version"),
        "got: {err}"
    );
    assert!(err.to_string().contains("\"1.0.0\""), "got: {err}");
    assert!(err.to_string().contains("\"2.0.0\""), "got: {err}");
}
