pub mod copy;
pub mod git;
pub mod tarball;

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use crate::config::{Config, METADATA_FILENAME};
use crate::errors::{Error, Result};
use crate::fsutil;
use crate::manifest::{self, Manifest};
use crate::network::RequestManager;
use crate::queue::BlockingQueue;
use crate::reporter::Reporter;
use crate::resolver::{RemoteDescriptor, RemoteType};

/// Shared handles for the fetch stage. The destination queue serializes work
/// per unpack directory; the git queue serializes mutations per repository
/// mirror.
pub struct FetchCtx<'a> {
    pub config: &'a Config,
    pub requests: &'a RequestManager,
    pub reporter: &'a dyn Reporter,
    pub dest_queue: &'a BlockingQueue,
    pub git_queue: &'a BlockingQueue,
}

/// Sidecar written into a destination once a fetch fully succeeds. Its
/// presence (and parseability) is what marks the destination as usable; a
/// fetch that dies halfway leaves no sidecar behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub manifest: Manifest,
    pub remote: RemoteDescriptor,
    pub registry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

#[derive(Debug)]
pub struct FetchedPackage {
    pub manifest: Manifest,
    pub hash: String,
    pub dest: PathBuf,
    pub cached: bool,
}

pub fn metadata_path(dest: &Path) -> PathBuf {
    dest.join(METADATA_FILENAME)
}

pub fn read_package_metadata(dest: &Path) -> Result<PackageMetadata> {
    let raw = fs::read(metadata_path(dest))?;
    let metadata: PackageMetadata = serde_json::from_slice(&raw)?;
    Ok(metadata)
}

/// A destination is reusable when its sidecar parses and its manifest is
/// still readable. Anything else is treated as a corrupt leftover.
pub fn is_valid_dest(dest: &Path) -> bool {
    read_package_metadata(dest).is_ok() && dest.join("package.json").is_file()
}

fn write_package_metadata(dest: &Path, metadata: &PackageMetadata) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(metadata)?;
    bytes.push(b'\n');
    fsutil::atomic_write(&metadata_path(dest), &bytes)?;
    Ok(())
}

/// Fetch `remote` into `dest`, keyed on the destination so concurrent fetches
/// of the same package wait instead of clobbering each other. A destination
/// that already holds a matching payload short-circuits to a cached result.
pub fn fetch_package(
    ctx: &FetchCtx<'_>,
    name: &str,
    remote: &RemoteDescriptor,
    dest: &Path,
    default_manifest: Option<Manifest>,
) -> Result<FetchedPackage> {
    let key = dest.to_string_lossy().into_owned();
    ctx.dest_queue
        .push(&key, || fetch_into(ctx, name, remote, dest, default_manifest))
}

fn fetch_into(
    ctx: &FetchCtx<'_>,
    name: &str,
    remote: &RemoteDescriptor,
    dest: &Path,
    default_manifest: Option<Manifest>,
) -> Result<FetchedPackage> {
    if let Ok(metadata) = read_package_metadata(dest) {
        let reusable = match (&remote.hash, &metadata.hash) {
            (Some(want), Some(have)) => want == have,
            (Some(_), None) => false,
            (None, _) => true,
        };
        if reusable && dest.join("package.json").is_file() {
            backfill_mirror(ctx.config, remote, dest)?;
            return Ok(FetchedPackage {
                manifest: metadata.manifest,
                hash: metadata.hash.unwrap_or_default(),
                dest: dest.to_path_buf(),
                cached: true,
            });
        }
        fsutil::remove_dest(dest)?;
    }

    ctx.reporter.progress("fetching", name);
    fsutil::ensure_dir(dest)?;

    let hash = match remote.kind {
        RemoteType::Tarball => tarball::fetch(ctx, remote, dest)?,
        RemoteType::Git => git::fetch(ctx, remote, dest)?,
        RemoteType::Copy => copy::fetch(ctx, remote, dest)?,
        RemoteType::Link => {
            return Err(Error::NotImplemented("link remotes have no fetch step"))
        }
    };

    let manifest_file = dest.join("package.json");
    let manifest = if manifest_file.is_file() {
        manifest::load(&manifest_file)?
    } else if let Some(default) = default_manifest {
        default
    } else {
        return Err(Error::Message(format!(
            "Couldn't find a package.json file in \"{}\"",
            dest.display()
        )));
    };

    let metadata = PackageMetadata {
        manifest: manifest.clone(),
        remote: remote.clone(),
        registry: remote.registry.clone(),
        hash: if hash.is_empty() {
            None
        } else {
            Some(hash.clone())
        },
    };
    write_package_metadata(dest, &metadata)?;

    Ok(FetchedPackage {
        manifest,
        hash,
        dest: dest.to_path_buf(),
        cached: false,
    })
}

/// Populate a configured offline mirror from the tarball copy kept in a
/// cached destination, so mirrors can be warmed without refetching.
fn backfill_mirror(config: &Config, remote: &RemoteDescriptor, dest: &Path) -> Result<()> {
    if remote.kind != RemoteType::Tarball {
        return Ok(());
    }
    let Some(filename) = tarball::mirror_filename(&remote.reference) else {
        return Ok(());
    };
    let Some(mirror_file) = config.mirror_path(&filename) else {
        return Ok(());
    };
    let cached_tarball = tarball::cache_tarball_path(dest);
    if mirror_file.exists() || !cached_tarball.is_file() {
        return Ok(());
    }
    if let Some(parent) = mirror_file.parent() {
        fsutil::ensure_dir(parent)?;
    }
    fs::copy(&cached_tarball, &mirror_file)?;
    Ok(())
}

/// Unpack a tar stream into `dest`, dropping `strip` leading path components
/// from every entry. Entries that try to climb out with `..` are refused.
pub(crate) fn unpack_tar<R: Read>(reader: R, dest: &Path, strip: usize) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(Error::Security(format!(
                "refusing to unpack archive entry outside of the destination (\"{}\")",
                path.display()
            )));
        }
        let stripped: PathBuf = path
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .skip(strip)
            .collect();
        if stripped.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(&stripped);
        if let Some(parent) = target.parent() {
            fsutil::ensure_dir(parent)?;
        }
        entry.unpack(&target)?;
    }
    Ok(())
}
