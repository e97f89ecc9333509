use crate::errors::Result;
use crate::fetcher;
use crate::hash::sha1_hex;
use crate::lockfile;
use crate::manifest::Manifest;
use crate::resolver::{
    guess_name, make_pattern, RemoteDescriptor, RemoteType, ResolveCtx, Resolution,
};

/// Resolve a tarball URL (or `file:` tarball path) by fetching it into the
/// temp cache and reading the manifest out of it. The content hash becomes
/// the uid, and the remote flips to a copy of the already-unpacked temp
/// directory so the fetch stage never downloads the bytes twice.
pub fn resolve(
    ctx: &ResolveCtx<'_>,
    name: &str,
    range: &str,
    url: &str,
    hash: Option<&str>,
) -> Result<Resolution> {
    if let Some(locked) = resolve_from_lockfile(ctx, name, range) {
        return Ok(locked);
    }

    let dest = ctx.config.temp_dest(&sha1_hex(url.as_bytes()));
    let probe = RemoteDescriptor {
        kind: RemoteType::Tarball,
        reference: url.to_string(),
        registry: "npm".to_string(),
        hash: hash.map(str::to_string),
        integrity: None,
        resolved: None,
    };
    let default = Manifest {
        name: Some(guess_name(url)),
        version: Some("0.0.0".to_string()),
        ..Manifest::default()
    };

    let fetched = fetcher::fetch_package(&ctx.fetch_ctx(), name, &probe, &dest, Some(default))?;

    let remote = RemoteDescriptor {
        kind: RemoteType::Copy,
        reference: dest.to_string_lossy().into_owned(),
        registry: "npm".to_string(),
        hash: Some(fetched.hash.clone()),
        integrity: None,
        resolved: Some(format!("{url}#{}", fetched.hash)),
    };
    Ok(Resolution::from_manifest(
        name,
        &fetched.manifest,
        fetched.hash,
        remote,
    ))
}

fn resolve_from_lockfile(ctx: &ResolveCtx<'_>, name: &str, range: &str) -> Option<Resolution> {
    let pattern = make_pattern(name, range);
    let locked = ctx.lockfile.get_locked(&pattern)?;
    let resolved = locked.resolved?;
    let (reference, hash) = lockfile::split_resolved(resolved);
    let remote = RemoteDescriptor {
        kind: RemoteType::Tarball,
        reference: reference.to_string(),
        registry: locked.registry.to_string(),
        hash: hash.map(str::to_string),
        integrity: locked.integrity.map(str::to_string),
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
