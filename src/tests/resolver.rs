use semver::Version;
use serde_json::json;
use std::fs;

use super::common::{
    registry_doc, test_config, version_entry, MockResponse, MockServer, RecordingReporter,
    TestEngine,
};
use crate::fetcher::PackageMetadata;
use crate::lockfile::LockEntry;
use crate::manifest::{DepKind, Manifest};
use crate::resolver::graph::{resolve_graph, DepRequest};
use crate::resolver::semver::{canonicalize_range, pick_version};
use crate::resolver::{
    classify, registry, PackageSpec, RemoteDescriptor, RemoteType, ResolveCtx,
};

#[test]
fn classification_orders_specific_sources_first() {
    assert!(matches!(
        classify("git+ssh://git@github.com/user/repo.git#v1.0.0"),
        PackageSpec::Git { .. }
    ));
    assert!(matches!(
        classify("https://github.com/user/repo.git"),
        PackageSpec::Git { .. }
    ));
    // A bare two-segment path on a git host is a repository.
    assert!(matches!(
        classify("https://gitlab.com/user/repo"),
        PackageSpec::Github { .. } | PackageSpec::Git { .. }
    ));
    // A tarball on a git host is a tarball, not a repository.
    assert!(matches!(
        classify("https://github.com/user/repo/archive/main.tgz"),
        PackageSpec::Tarball { .. }
    ));
    assert!(matches!(
        classify("https://registry.npmjs.org/left-pad/-/left-pad-1.2.0.tgz"),
        PackageSpec::Tarball { .. }
    ));
    assert!(matches!(classify("user/repo#abc123"), PackageSpec::Github(_)));
    assert!(matches!(classify("file:../local"), PackageSpec::File { .. }));
    assert!(matches!(classify("./vendor/pkg"), PackageSpec::File { .. }));
    assert!(matches!(classify("file:pkg.tgz"), PackageSpec::Tarball { .. }));
    assert!(matches!(classify("link:../sibling"), PackageSpec::Link { .. }));
    assert!(matches!(classify("^1.2.0"), PackageSpec::Registry { .. }));
    assert!(matches!(classify("latest"), PackageSpec::Registry { .. }));
    // Ranges with slashes in scoped requests never look like github.
    assert!(matches!(classify("1.2.0 - 1.4.0"), PackageSpec::Registry { .. }));
}

#[test]
fn npm_ranges_canonicalize_for_the_semver_crate() {
    assert_eq!(canonicalize_range("*"), "*");
    assert_eq!(canonicalize_range("latest"), "*");
    assert_eq!(canonicalize_range("1"), "^1.0.0");
    assert_eq!(canonicalize_range("1.x"), ">=1.0.0, <2.0.0");
    assert_eq!(canonicalize_range("1.2.x"), ">=1.2.0, <1.3.0");
    assert_eq!(canonicalize_range("1.2"), ">=1.2.0, <1.3.0");
    assert_eq!(canonicalize_range("1.2.3 - 2.3.4"), ">=1.2.3, <=2.3.4");
    assert_eq!(canonicalize_range(">=1.0.0 <2.0.0"), ">=1.0.0, <2.0.0");
    assert_eq!(canonicalize_range("1.2.3"), "=1.2.3");
    assert_eq!(canonicalize_range("^1.2.3"), "^1.2.3");
}

#[test]
fn pick_version_prefers_the_highest_match() {
    let available: Vec<Version> = ["1.0.0", "1.2.0", "1.9.3", "2.0.0"]
        .iter()
        .map(|v| Version::parse(v).unwrap())
        .collect();
    let best = pick_version(&available, "^1.2.0").unwrap().unwrap();
    assert_eq!(best.to_string(), "1.9.3");
    assert!(pick_version(&available, "^3.0.0").unwrap().is_none());
}

#[test]
fn registry_resolution_picks_best_version_and_dist_tags() {
    let doc = registry_doc(
        "left-pad",
        vec![
            version_entry("left-pad", "1.0.0", "http://x/lp-1.0.0.tgz", "aaa"),
            version_entry("left-pad", "1.2.0", "http://x/lp-1.2.0.tgz", "bbb"),
            version_entry("left-pad", "2.0.0-beta.1", "http://x/lp-2.0.0b.tgz", "ccc"),
        ],
    );
    let mut doc: serde_json::Value = serde_json::from_str(&doc).unwrap();
    doc["dist-tags"] = json!({ "latest": "1.2.0", "beta": "2.0.0-beta.1" });
    let server = MockServer::start(vec![(
        "/left-pad".to_string(),
        MockResponse::Json(doc.to_string()),
    )]);

    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    config.registry = server.url.clone();
    let engine = TestEngine::new(config);

    let res = registry::resolve(&engine.ctx(), "left-pad", "^1.0.0").unwrap();
    assert_eq!(res.version, "1.2.0");
    assert_eq!(res.uid, "1.2.0");
    assert_eq!(res.remote.reference, "http://x/lp-1.2.0.tgz");
    assert_eq!(res.remote.hash.as_deref(), Some("bbb"));
    assert_eq!(
        res.remote.resolved.as_deref(),
        Some("http://x/lp-1.2.0.tgz#bbb")
    );

    // A dist-tag range redirects before semver matching.
    let beta = registry::resolve(&engine.ctx(), "left-pad", "beta").unwrap();
    assert_eq!(beta.version, "2.0.0-beta.1");

    let err = registry::resolve(&engine.ctx(), "left-pad", "^9.0.0").unwrap_err();
    assert_eq!(
        err.to_string(),
        "Couldn't find any versions for \"left-pad\" that matches \"^9.0.0\""
    );
}

#[test]
fn missing_package_is_a_pattern_attributed_error() {
    let server = MockServer::start(vec![]);
    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    config.registry = server.url.clone();
    let engine = TestEngine::new(config);

    let err = registry::resolve(&engine.ctx(), "no-such-pkg", "*").unwrap_err();
    assert!(
        err.to_string().contains("Couldn't find package \"no-such-pkg\""),
        "got: {err}"
    );
}

#[test]
fn lockfile_pin_short_circuits_the_network() {
    let server = MockServer::start(vec![]);
    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    config.registry = server.url.clone();
    let mut engine = TestEngine::new(config);
    engine.lockfile.set(
        "left-pad@^1.2.0",
        LockEntry {
            version: "1.2.0".to_string(),
            resolved: Some("http://x/lp-1.2.0.tgz#bbb".to_string()),
            ..LockEntry::default()
        },
    );

    let res = registry::resolve(&engine.ctx(), "left-pad", "^1.2.0").unwrap();
    assert_eq!(res.version, "1.2.0");
    assert_eq!(res.remote.reference, "http://x/lp-1.2.0.tgz");
    assert_eq!(res.remote.hash.as_deref(), Some("bbb"));
    assert_eq!(server.hits(), 0, "lockfile fast path still hit the network");
}

#[test]
fn offline_resolution_scans_the_cache() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    config.offline = true;

    // Seed a valid cached destination for left-pad@1.2.0.
    let dest = config.module_dest("left-pad", "1.2.0");
    fs::create_dir_all(&dest).unwrap();
    let manifest = Manifest {
        name: Some("left-pad".to_string()),
        version: Some("1.2.0".to_string()),
        ..Manifest::default()
    };
    fs::write(
        dest.join("package.json"),
        serde_json::to_string(&manifest).unwrap(),
    )
    .unwrap();
    let metadata = PackageMetadata {
        manifest: manifest.clone(),
        remote: RemoteDescriptor {
            kind: RemoteType::Tarball,
            reference: "http://x/lp-1.2.0.tgz".to_string(),
            registry: "npm".to_string(),
            hash: Some("bbb".to_string()),
            integrity: None,
            resolved: Some("http://x/lp-1.2.0.tgz#bbb".to_string()),
        },
        registry: "npm".to_string(),
        hash: Some("bbb".to_string()),
    };
    fs::write(
        dest.join(crate::config::METADATA_FILENAME),
        serde_json::to_string(&metadata).unwrap(),
    )
    .unwrap();

    let engine = TestEngine::new(config);
    let res = registry::resolve(&engine.ctx(), "left-pad", "^1.0.0").unwrap();
    assert_eq!(res.version, "1.2.0");
    assert_eq!(res.uid, "1.2.0");

    // A miss in strict offline mode names the cached candidates.
    let err = registry::resolve(&engine.ctx(), "left-pad", "^2.0.0").unwrap_err();
    assert!(err.to_string().contains("in our cache"), "got: {err}");
    assert!(err.to_string().contains("1.2.0"), "got: {err}");
}

#[test]
fn cyclic_graphs_resolve_once_per_identity() {
    let doc_a = {
        let mut entry = version_entry("pkg-a", "1.0.0", "http://x/a-1.0.0.tgz", "aaa");
        entry["dependencies"] = json!({ "pkg-b": "^1.0.0" });
        registry_doc("pkg-a", vec![entry])
    };
    let doc_b = {
        let mut entry = version_entry("pkg-b", "1.0.0", "http://x/b-1.0.0.tgz", "bbb");
        entry["dependencies"] = json!({ "pkg-a": "^1.0.0" });
        registry_doc("pkg-b", vec![entry])
    };
    let server = MockServer::start(vec![
        ("/pkg-a".to_string(), MockResponse::Json(doc_a)),
        ("/pkg-b".to_string(), MockResponse::Json(doc_b)),
    ]);

    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    config.registry = server.url.clone();
    let engine = TestEngine::new(config);

    // Two spellings of the same pkg-b request on top of the a<->b cycle.
    let seeds = vec![
        DepRequest::seed("pkg-a".to_string(), "^1.0.0".to_string(), DepKind::Normal),
        DepRequest::seed("pkg-b".to_string(), "1.x".to_string(), DepKind::Normal),
    ];
    let graph = resolve_graph(&engine.ctx(), seeds).unwrap();

    assert_eq!(graph.nodes.len(), 2, "cycle duplicated nodes");
    let b = graph.node_for_pattern("pkg-b@1.x").unwrap();
    assert_eq!(b.version, "1.0.0");
    assert_eq!(b.patterns.len(), 2, "aliases not merged: {:?}", b.patterns);
    assert!(graph.node_for_pattern("pkg-b@^1.0.0").is_some());
    assert_eq!(server.hits(), 2, "registry documents fetched more than once");
}

#[test]
fn deprecation_warns_once_per_deduped_identity() {
    let doc = {
        let mut entry = version_entry("old-pkg", "1.2.0", "http://x/old-1.2.0.tgz", "abc");
        entry["deprecated"] = json!("use new-pkg instead");
        registry_doc("old-pkg", vec![entry])
    };
    let server = MockServer::start(vec![("/old-pkg".to_string(), MockResponse::Json(doc))]);

    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    config.registry = server.url.clone();
    let engine = TestEngine::new(config);
    let reporter = RecordingReporter::default();
    let ctx = ResolveCtx {
        config: &engine.config,
        requests: &engine.requests,
        lockfile: &engine.lockfile,
        reporter: &reporter,
        git_queue: &engine.git_queue,
        dest_queue: &engine.dest_queue,
    };

    // Two spellings of the same request collapse into one node, and the
    // deprecation surfaces once, not once per alias.
    let seeds = vec![
        DepRequest::seed("old-pkg".to_string(), "^1.0.0".to_string(), DepKind::Normal),
        DepRequest::seed("old-pkg".to_string(), "1.x".to_string(), DepKind::Normal),
    ];
    let graph = resolve_graph(&ctx, seeds).unwrap();
    assert_eq!(graph.nodes.len(), 1);

    let warnings = reporter.warnings.lock().unwrap_or_else(|p| p.into_inner());
    let deprecations: Vec<&String> = warnings
        .iter()
        .filter(|w| w.contains("use new-pkg instead"))
        .collect();
    assert_eq!(deprecations.len(), 1, "got: {warnings:?}");
    assert!(deprecations[0].contains("old-pkg@1.2.0"), "got: {warnings:?}");
}

#[test]
fn incompatible_optional_nodes_are_dropped_not_fatal() {
    let doc = {
        let mut entry = version_entry("native", "1.0.0", "http://x/native-1.0.0.tgz", "ccc");
        entry["os"] = json!(["severely-fictional-os"]);
        registry_doc("native", vec![entry])
    };
    let server = MockServer::start(vec![("/native".to_string(), MockResponse::Json(doc))]);

    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    config.registry = server.url.clone();
    let engine = TestEngine::new(config);

    let optional_seed = vec![DepRequest::seed(
        "native".to_string(),
        "^1.0.0".to_string(),
        DepKind::Optional,
    )];
    let graph = resolve_graph(&engine.ctx(), optional_seed).unwrap();
    assert_eq!(graph.nodes.len(), 0, "incompatible optional node kept");

    let required_seed = vec![DepRequest::seed(
        "native".to_string(),
        "^1.0.0".to_string(),
        DepKind::Normal,
    )];
    let err = resolve_graph(&engine.ctx(), required_seed).unwrap_err();
    assert!(
        err.to_string().contains("incompatible module"),
        "got: {err}"
    );
}

#[test]
fn graph_lockfile_pins_every_live_pattern() {
    let doc = registry_doc(
        "solo",
        vec![version_entry("solo", "3.1.4", "http://x/solo-3.1.4.tgz", "abc")],
    );
    let server = MockServer::start(vec![("/solo".to_string(), MockResponse::Json(doc))]);

    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    config.registry = server.url.clone();
    let engine = TestEngine::new(config);

    let seeds = vec![DepRequest::seed(
        "solo".to_string(),
        "^3.0.0".to_string(),
        DepKind::Normal,
    )];
    let graph = resolve_graph(&engine.ctx(), seeds).unwrap();
    let lockfile = graph.to_lockfile();
    let locked = lockfile.get_locked("solo@^3.0.0").expect("pattern pinned");
    assert_eq!(locked.version, "3.1.4");
    assert_eq!(locked.resolved, Some("http://x/solo-3.1.4.tgz#abc"));
}
