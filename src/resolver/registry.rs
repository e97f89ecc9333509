use semver::Version;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;

use crate::errors::{Error, Result};
use crate::fetcher;
use crate::lockfile;
use crate::manifest;
use crate::resolver::{
    escape_name, semver as semver_util, RemoteDescriptor, RemoteType, Resolution, ResolveCtx,
};

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryPacket {
    pub name: String,
    #[serde(default)]
    pub versions: BTreeMap<String, RegistryVersion>,
    #[serde(default, rename = "dist-tags")]
    pub dist_tags: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryVersion {
    pub name: Option<String>,
    pub version: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "optionalDependencies")]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub os: Vec<String>,
    #[serde(default, rename = "cpu")]
    pub cpu_arch: Vec<String>,
    #[serde(default)]
    pub deprecated: Option<String>,
    #[serde(default)]
    pub dist: Option<DistInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DistInfo {
    pub tarball: String,
    #[serde(default)]
    pub shasum: Option<String>,
    #[serde(default)]
    pub integrity: Option<String>,
}

/// Resolve a plain `name@range` against the registry, going through the
/// lockfile and the on-disk cache before the network.
pub fn resolve(ctx: &ResolveCtx<'_>, name: &str, range: &str) -> Result<Resolution> {
    if let Some(res) = resolve_from_lockfile(ctx, name, range) {
        return Ok(res);
    }

    if ctx.config.offline || ctx.config.prefer_offline {
        match resolve_offline(ctx, name, range)? {
            Some(res) => return Ok(res),
            None => {}
        }
    }

    let url = format!("{}/{}", ctx.config.registry, escape_name(name));
    let body = match ctx.requests.request_json(&url) {
        Ok(body) => body,
        Err(Error::ResponseStatus { status, .. }) if matches!(status, 400 | 401 | 404) => {
            return Err(Error::Message(format!(
                "Couldn't find package \"{name}\" on the \"npm\" registry."
            )));
        }
        Err(err) => return Err(err),
    };
    let packet: RegistryPacket = serde_json::from_slice(&body)
        .map_err(|e| Error::Message(format!("{url}: {e}")))?;
    find_version(name, range, &packet)
}

/// Pick the version a range denotes out of a registry document. Dist-tags
/// are redirects: a range naming one is replaced by the tagged version.
pub fn find_version(name: &str, range: &str, packet: &RegistryPacket) -> Result<Resolution> {
    let Some(dist_tags) = packet.dist_tags.as_ref() else {
        return Err(Error::Message(format!(
            "Received malformed response from registry for \"{name}\". The registry may be down."
        )));
    };
    let range = dist_tags.get(range).map(String::as_str).unwrap_or(range);

    let mut parsed: Vec<(Version, &str)> = Vec::new();
    for key in packet.versions.keys() {
        if let Ok(v) = Version::parse(key) {
            parsed.push((v, key.as_str()));
        }
    }
    let available: Vec<Version> = parsed.iter().map(|(v, _)| v.clone()).collect();
    let picked = semver_util::pick_version(&available, range)?;
    let Some(picked) = picked else {
        return Err(Error::Message(format!(
            "Couldn't find any versions for \"{name}\" that matches \"{range}\""
        )));
    };
    let key = parsed
        .iter()
        .find(|(v, _)| v == picked)
        .map(|(_, k)| *k)
        .unwrap_or_default();
    let info = &packet.versions[key];

    let Some(dist) = info.dist.as_ref() else {
        return Err(Error::Message(format!(
            "Received malformed response from registry for \"{name}\". The registry may be down."
        )));
    };
    let resolved = match dist.shasum.as_deref() {
        Some(hash) => format!("{}#{}", dist.tarball, hash),
        None => dist.tarball.clone(),
    };
    let remote = RemoteDescriptor {
        kind: RemoteType::Tarball,
        reference: dist.tarball.clone(),
        registry: "npm".to_string(),
        hash: dist.shasum.clone(),
        integrity: dist.integrity.clone(),
        resolved: Some(resolved),
    };
    Ok(Resolution {
        name: info.name.clone().unwrap_or_else(|| name.to_string()),
        version: info.version.clone(),
        uid: info.version.clone(),
        remote,
        dependencies: info.dependencies.clone(),
        optional_dependencies: info.optional_dependencies.clone(),
        os: info.os.clone(),
        cpu: info.cpu_arch.clone(),
        deprecated: info.deprecated.clone(),
    })
}

fn resolve_from_lockfile(ctx: &ResolveCtx<'_>, name: &str, range: &str) -> Option<Resolution> {
    let pattern = crate::resolver::make_pattern(name, range);
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

/// Scan the cache for already-fetched versions of this package. In strict
/// offline mode a miss is an error; with prefer-offline the caller falls
/// through to the network.
fn resolve_offline(ctx: &ResolveCtx<'_>, name: &str, range: &str) -> Result<Option<Resolution>> {
    let mut root = ctx.config.cache_dir.join("pkgs");
    for seg in name.split('/') {
        root.push(seg);
    }

    let mut found: Vec<(Version, Resolution)> = Vec::new();
    if let Ok(entries) = fs::read_dir(&root) {
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() || !fetcher::is_valid_dest(&dir) {
                continue;
            }
            let Ok(mf) = manifest::load_dir(&dir) else {
                continue;
            };
            if mf.name.as_deref() != Some(name) {
                continue;
            }
            let Ok(metadata) = fetcher::read_package_metadata(&dir) else {
                continue;
            };
            let Some(version) = mf.version.as_deref().and_then(|v| Version::parse(v).ok())
            else {
                continue;
            };
            let uid = entry.file_name().to_string_lossy().into_owned();
            let resolution = Resolution::from_manifest(name, &mf, uid, metadata.remote);
            found.push((version, resolution));
        }
    }

    found.sort_by(|a, b| b.0.cmp(&a.0));
    for (version, resolution) in &found {
        if semver_util::satisfies(version, range) {
            return Ok(Some(resolution.clone()));
        }
    }

    if ctx.config.prefer_offline {
        return Ok(None);
    }
    let cached: Vec<String> = found.iter().map(|(v, _)| v.to_string()).collect();
    Err(Error::Message(format!(
        "Couldn't find any versions of \"{name}\" that matches \"{range}\" in our cache \
         (possible versions are \"{}\"). This is usually caused by a missing entry in the \
         lockfile, running an install may help.",
        cached.join(", ")
    )))
}
