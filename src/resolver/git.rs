use crate::errors::Result;
use crate::gitutil::{npm_url_to_git_url, GitClient};
use crate::lockfile;
use crate::manifest::Manifest;
use crate::resolver::{
    guess_name, make_pattern, RemoteDescriptor, RemoteType, Resolution, ResolveCtx,
};

/// Resolve a git reference to an exact commit, reading the manifest straight
/// out of the repository. The commit sha is the uid, so two requests for
/// different refs of the same repo stay distinct packages.
pub fn resolve(
    ctx: &ResolveCtx<'_>,
    name: &str,
    pattern_range: &str,
    url: &str,
    hash: Option<&str>,
) -> Result<Resolution> {
    if let Some(res) = resolve_from_lockfile(ctx, name, pattern_range) {
        return Ok(res);
    }

    let git_url = npm_url_to_git_url(url);
    let mut client = GitClient::new(ctx.config, ctx.git_queue, git_url, hash);
    let commit = client.init()?;

    let remote = RemoteDescriptor {
        kind: RemoteType::Git,
        reference: url.to_string(),
        registry: "npm".to_string(),
        hash: Some(commit.clone()),
        integrity: None,
        resolved: Some(format!("{url}#{commit}")),
    };

    match client.get_file(&commit, "package.json")? {
        Some(raw) => {
            let manifest: Manifest = serde_json::from_str(&raw)?;
            Ok(Resolution::from_manifest(
                &guess_name(url),
                &manifest,
                commit,
                remote,
            ))
        }
        None => Ok(Resolution {
            name: if name.is_empty() {
                guess_name(url)
            } else {
                name.to_string()
            },
            version: "0.0.0".to_string(),
            uid: commit,
            remote,
            dependencies: Default::default(),
            optional_dependencies: Default::default(),
            os: Vec::new(),
            cpu: Vec::new(),
            deprecated: None,
        }),
    }
}

fn resolve_from_lockfile(ctx: &ResolveCtx<'_>, name: &str, range: &str) -> Option<Resolution> {
    let pattern = make_pattern(name, range);
    let locked = ctx.lockfile.get_locked(&pattern)?;
    let resolved = locked.resolved?;
    let (reference, hash) = lockfile::split_resolved(resolved);
    let remote = RemoteDescriptor {
        kind: RemoteType::Git,
        reference: reference.to_string(),
        registry: locked.registry.to_string(),
        hash: hash.map(str::to_string),
        integrity: None,
        resolved: Some(resolved.to_string()),
    };
    Some(Resolution {
        name: name.to_string(),
        version: locked.version.to_string(),
        uid: locked.uid.to_string(),
        remote,
        dependencies: locked.dependencies.clone(),
        optional_dependencies: locked.optional_dependencies.clone(),
        os: Vec::new(),
        cpu: Vec::new(),
        deprecated: None,
    })
}
