pub mod file;
pub mod git;
pub mod github;
pub mod graph;
pub mod registry;
pub mod semver;
pub mod tarball;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::Config;
use crate::errors::Result;
use crate::lockfile::Lockfile;
use crate::manifest::Manifest;
use crate::network::RequestManager;
use crate::queue::BlockingQueue;
use crate::reporter::Reporter;

/// How a resolved package's payload is obtained at fetch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteType {
    Tarball,
    Git,
    Copy,
    Link,
}

/// Where a package's bytes live and how to check them. This is what resolvers
/// hand to fetchers, what the lockfile pins, and what the metadata sidecar
/// records next to an unpacked destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDescriptor {
    #[serde(rename = "type")]
    pub kind: RemoteType,
    pub reference: String,
    pub registry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
}

/// A fully resolved package: pinned version, payload location, and the
/// dependency ranges the resolution step discovered for it.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub name: String,
    pub version: String,
    pub uid: String,
    pub remote: RemoteDescriptor,
    pub dependencies: BTreeMap<String, String>,
    pub optional_dependencies: BTreeMap<String, String>,
    pub os: Vec<String>,
    pub cpu: Vec<String>,
    pub deprecated: Option<String>,
}

impl Resolution {
    pub fn from_manifest(
        fallback_name: &str,
        manifest: &Manifest,
        uid: String,
        remote: RemoteDescriptor,
    ) -> Resolution {
        Resolution {
            name: manifest
                .name
                .clone()
                .unwrap_or_else(|| fallback_name.to_string()),
            version: manifest
                .version
                .clone()
                .unwrap_or_else(|| "0.0.0".to_string()),
            uid,
            remote,
            dependencies: manifest.dependencies.clone(),
            optional_dependencies: manifest.optional_dependencies.clone(),
            os: manifest.os.clone(),
            cpu: manifest.cpu_arch.clone(),
            deprecated: manifest.deprecated.clone(),
        }
    }
}

/// Shared state every resolver gets a view of. The git queue serializes
/// clones of the same repository across concurrent requests.
pub struct ResolveCtx<'a> {
    pub config: &'a Config,
    pub requests: &'a RequestManager,
    pub lockfile: &'a Lockfile,
    pub reporter: &'a dyn Reporter,
    pub git_queue: &'a BlockingQueue,
    /// Tarball resolutions probe-fetch into the temp cache, so resolution
    /// shares the fetch stage's per-destination lock.
    pub dest_queue: &'a BlockingQueue,
}

impl<'a> ResolveCtx<'a> {
    pub fn fetch_ctx(&self) -> crate::fetcher::FetchCtx<'a> {
        crate::fetcher::FetchCtx {
            config: self.config,
            requests: self.requests,
            reporter: self.reporter,
            dest_queue: self.dest_queue,
            git_queue: self.git_queue,
        }
    }
}

/// `name@range` split into its package name and version fragment. A missing
/// fragment reads as the latest-version request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternInfo {
    pub name: String,
    pub range: String,
    pub has_version: bool,
}

pub fn normalize_pattern(pattern: &str) -> PatternInfo {
    let mut has_version = false;
    let mut range = "latest".to_string();
    let (scope, rest) = match pattern.strip_prefix('@') {
        Some(rest) => ("@", rest),
        None => ("", pattern),
    };
    let mut name = rest.to_string();
    if let Some((head, tail)) = rest.split_once('@') {
        name = head.to_string();
        if tail.is_empty() {
            range = "*".to_string();
        } else {
            range = tail.to_string();
            has_version = true;
        }
    }
    PatternInfo {
        name: format!("{scope}{name}"),
        range,
        has_version,
    }
}

pub fn make_pattern(name: &str, range: &str) -> String {
    format!("{name}@{range}")
}

/// Scoped names keep their slash everywhere except registry URLs.
pub fn escape_name(name: &str) -> String {
    name.replace('/', "%2f")
}

/// `url#hash` with an optional fragment.
pub fn explode_hashed_url(url: &str) -> (String, Option<String>) {
    match url.split_once('#') {
        Some((base, hash)) if !hash.is_empty() => (base.to_string(), Some(hash.to_string())),
        Some((base, _)) => (base.to_string(), None),
        None => (url.to_string(), None),
    }
}

/// The source classes a version fragment can denote, checked in a fixed
/// order before falling back to a registry range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSpec {
    Git { url: String, hash: Option<String> },
    Github(GithubSpec),
    Tarball { url: String, hash: Option<String> },
    File { path: String },
    Link { path: String },
    Registry { range: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubSpec {
    pub owner: String,
    pub repo: String,
    pub hash: Option<String>,
}

impl GithubSpec {
    /// Base repository URL, without a `.git` suffix.
    pub fn http_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.repo)
    }
}

const GIT_HOSTS: [&str; 4] = ["github.com", "gitlab.com", "bitbucket.com", "bitbucket.org"];

pub fn classify(pattern: &str) -> PackageSpec {
    let trimmed = pattern.trim();

    if is_git_pattern(trimmed) {
        // The `git+` prefix stays on the reference; only the git binary needs
        // it stripped, and that happens when the URL is handed to git.
        let (url, hash) = explode_hashed_url(trimmed);
        return PackageSpec::Git { url, hash };
    }

    if let Some(spec) = parse_github(trimmed) {
        return PackageSpec::Github(spec);
    }

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        let (url, hash) = explode_hashed_url(trimmed);
        return PackageSpec::Tarball { url, hash };
    }

    if let Some(path) = trimmed.strip_prefix("link:") {
        return PackageSpec::Link {
            path: path.to_string(),
        };
    }

    let file_like = trimmed.strip_prefix("file:").map(str::to_string).or_else(|| {
        let path_like = trimmed.starts_with("./")
            || trimmed.starts_with("../")
            || std::path::Path::new(trimmed).is_absolute();
        path_like.then(|| trimmed.to_string())
    });
    if let Some(path) = file_like {
        if is_archive_path(&path) {
            return PackageSpec::Tarball {
                url: path,
                hash: None,
            };
        }
        return PackageSpec::File { path };
    }

    // A bare local archive name, "pkg.tgz", counts as a tarball as long as it
    // cannot be confused with a scoped version fragment.
    if !trimmed.contains('@') && is_archive_path(trimmed) {
        return PackageSpec::Tarball {
            url: trimmed.to_string(),
            hash: None,
        };
    }

    PackageSpec::Registry {
        range: trimmed.to_string(),
    }
}

fn is_archive_path(p: &str) -> bool {
    p.ends_with(".tgz") || p.ends_with(".tar.gz")
}

fn is_git_pattern(pattern: &str) -> bool {
    if pattern.starts_with("git:") || pattern.starts_with("ssh:") || pattern.starts_with("git+") {
        return true;
    }
    if pattern.starts_with("http://") || pattern.starts_with("https://") {
        let (base, _) = match pattern.split_once('#') {
            Some((base, hash)) => (base, Some(hash)),
            None => (pattern, None),
        };
        if base.ends_with(".git") {
            return true;
        }
        // A bare two-segment path on a known git host is a repository, not a
        // file inside one.
        if let Some(rest) = base
            .strip_prefix("https://")
            .or_else(|| base.strip_prefix("http://"))
        {
            let mut segs = rest.split('/');
            let host = segs.next().unwrap_or_default();
            if GIT_HOSTS.contains(&host) {
                let path: Vec<&str> = segs.filter(|s| !s.is_empty()).collect();
                return path.len() == 2;
            }
        }
    }
    false
}

fn parse_github(input: &str) -> Option<GithubSpec> {
    let body = input.strip_prefix("github:").unwrap_or(input);
    let explicit = body.len() != input.len();

    if !explicit {
        // Shorthand must look like `owner/repo`, where the owner cannot open
        // with characters that belong to ranges or scoped names.
        let first = input.chars().next()?;
        if matches!(first, '@' | '.' | '-' | ':' | '/') || input.contains(' ') {
            return None;
        }
    }

    let (path, hash) = match body.split_once('#') {
        Some((lhs, rhs)) if !rhs.is_empty() => (lhs, Some(rhs.to_string())),
        Some((lhs, _)) => (lhs, None),
        None => (body, None),
    };
    let mut parts = path.split('/');
    let owner = parts.next()?.trim();
    let repo = parts.next()?.trim();
    if owner.is_empty() || repo.is_empty() || parts.next().is_some() {
        return None;
    }
    if !explicit && (owner.contains(':') || owner.contains('@') || repo.contains('@')) {
        return None;
    }
    Some(GithubSpec {
        owner: owner.to_string(),
        repo: repo.trim_end_matches(".git").to_string(),
        hash,
    })
}

/// Infer a package name from a non-registry source, for use until the real
/// manifest is available.
pub fn guess_name(source: &str) -> String {
    let trimmed = source.split('?').next().unwrap_or(source);
    let trimmed = trimmed.split('#').next().unwrap_or(trimmed);
    let base = trimmed
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(trimmed);
    let base = base
        .trim_end_matches(".git")
        .trim_end_matches(".tar.gz")
        .trim_end_matches(".tgz")
        .trim_end_matches(".tar");
    let base = base.split('.').next().unwrap_or(base);
    if base.is_empty() {
        "unknown".to_string()
    } else {
        base.to_string()
    }
}

/// Resolve one version fragment to a pinned package, dispatching on what the
/// fragment denotes.
pub fn resolve_pattern(ctx: &ResolveCtx<'_>, name: &str, range: &str) -> Result<Resolution> {
    match classify(range) {
        PackageSpec::Git { url, hash } => git::resolve(ctx, name, range, &url, hash.as_deref()),
        PackageSpec::Github(spec) => github::resolve(ctx, name, range, &spec),
        PackageSpec::Tarball { url, hash } => {
            tarball::resolve(ctx, name, range, &url, hash.as_deref())
        }
        PackageSpec::File { path } => file::resolve(ctx, name, &path),
        PackageSpec::Link { path } => file::resolve_link(ctx, name, &path),
        PackageSpec::Registry { range } => registry::resolve(ctx, name, &range),
    }
}
