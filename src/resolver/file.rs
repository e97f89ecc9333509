use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors::{Error, Result};
use crate::manifest::{self, Manifest};
use crate::resolver::{RemoteDescriptor, RemoteType, ResolveCtx, Resolution};

/// Resolve a `file:` directory dependency. The directory's contents are
/// copied at fetch time; every resolve stamps a fresh nonce hash because
/// nothing ties the directory's contents to its version, so a stale copy must
/// never be reused.
pub fn resolve(ctx: &ResolveCtx<'_>, name: &str, path: &str) -> Result<Resolution> {
    let loc = absolute(ctx, path);

    if ctx.config.link_file_dependencies {
        return Ok(link_resolution(name, &loc));
    }

    if !loc.exists() {
        return Err(Error::Message(format!(
            "\"{}\" doesn't exist.",
            loc.display()
        )));
    }

    let manifest = read_manifest(&loc)?.unwrap_or_else(|| default_manifest(name));
    let version = manifest
        .version
        .clone()
        .unwrap_or_else(|| "0.0.0".to_string());
    let remote = RemoteDescriptor {
        kind: RemoteType::Copy,
        reference: loc.to_string_lossy().into_owned(),
        registry: "npm".to_string(),
        hash: Some(copy_nonce()),
        integrity: None,
        resolved: None,
    };
    Ok(Resolution::from_manifest(name, &manifest, version, remote))
}

/// Resolve a `link:` dependency. No bytes move; the linker points a symlink
/// at the target directory.
pub fn resolve_link(ctx: &ResolveCtx<'_>, name: &str, path: &str) -> Result<Resolution> {
    let loc = absolute(ctx, path);
    let manifest = read_manifest(&loc)?.unwrap_or_else(|| default_manifest(name));
    let version = manifest
        .version
        .clone()
        .unwrap_or_else(|| "0.0.0".to_string());
    let remote = RemoteDescriptor {
        kind: RemoteType::Link,
        reference: loc.to_string_lossy().into_owned(),
        registry: "npm".to_string(),
        hash: None,
        integrity: None,
        resolved: None,
    };
    Ok(Resolution::from_manifest(name, &manifest, version, remote))
}

fn link_resolution(name: &str, loc: &Path) -> Resolution {
    Resolution {
        name: name.to_string(),
        version: "0.0.0".to_string(),
        uid: "0.0.0".to_string(),
        remote: RemoteDescriptor {
            kind: RemoteType::Link,
            reference: loc.to_string_lossy().into_owned(),
            registry: "npm".to_string(),
            hash: None,
            integrity: None,
            resolved: None,
        },
        dependencies: BTreeMap::new(),
        optional_dependencies: BTreeMap::new(),
        os: Vec::new(),
        cpu: Vec::new(),
        deprecated: None,
    }
}

fn absolute(ctx: &ResolveCtx<'_>, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        ctx.config.cwd.join(p)
    }
}

fn read_manifest(loc: &Path) -> Result<Option<Manifest>> {
    let file = loc.join("package.json");
    if file.is_file() {
        Ok(Some(manifest::load(&file)?))
    } else {
        Ok(None)
    }
}

fn default_manifest(name: &str) -> Manifest {
    Manifest {
        name: Some(name.to_string()),
        version: Some("0.0.0".to_string()),
        ..Manifest::default()
    }
}

fn copy_nonce() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{}-{nanos}", process::id())
}
