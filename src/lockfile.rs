use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::errors::{Error, Result};
use crate::fsutil;

pub const FORMAT_VERSION: u32 = 1;

/// One locked pattern. `uid` and `registry` are stored only when they differ
/// from their defaults (the version, and "npm").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockEntry {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        rename = "optionalDependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub optional_dependencies: BTreeMap<String, String>,
}

/// Borrowed view of an entry with the storage defaults filled back in.
#[derive(Debug, Clone, Copy)]
pub struct LockedInfo<'a> {
    pub version: &'a str,
    pub uid: &'a str,
    pub registry: &'a str,
    pub resolved: Option<&'a str>,
    pub integrity: Option<&'a str>,
    pub dependencies: &'a BTreeMap<String, String>,
    pub optional_dependencies: &'a BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lockfile {
    pub format: u32,
    #[serde(default)]
    pub patterns: BTreeMap<String, LockEntry>,
}

impl Default for Lockfile {
    fn default() -> Lockfile {
        Lockfile {
            format: FORMAT_VERSION,
            patterns: BTreeMap::new(),
        }
    }
}

impl Lockfile {
    /// Missing file reads as an empty lockfile; a present but unreadable one
    /// is an error, so a corrupted lockfile never silently unpins an install.
    pub fn load(path: &Path) -> Result<Lockfile> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Lockfile::default());
            }
            Err(e) => return Err(Error::Io(e)),
        };
        let lockfile: Lockfile = serde_json::from_str(&raw)
            .map_err(|e| Error::Message(format!("{}: {e}", path.display())))?;
        if lockfile.format != FORMAT_VERSION {
            return Err(Error::Message(format!(
                "{}: unsupported lockfile format {}",
                path.display(),
                lockfile.format
            )));
        }
        Ok(lockfile)
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn get_locked(&self, pattern: &str) -> Option<LockedInfo<'_>> {
        let entry = self.patterns.get(pattern)?;
        Some(LockedInfo {
            version: &entry.version,
            uid: entry.uid.as_deref().unwrap_or(&entry.version),
            registry: entry.registry.as_deref().unwrap_or("npm"),
            resolved: entry.resolved.as_deref(),
            integrity: entry.integrity.as_deref(),
            dependencies: &entry.dependencies,
            optional_dependencies: &entry.optional_dependencies,
        })
    }

    /// Store an entry, dropping fields that match their defaults so the file
    /// stays minimal and diffs stay readable.
    pub fn set(&mut self, pattern: &str, mut entry: LockEntry) {
        if entry.uid.as_deref() == Some(entry.version.as_str()) {
            entry.uid = None;
        }
        if entry.registry.as_deref() == Some("npm") {
            entry.registry = None;
        }
        self.patterns.insert(pattern.to_string(), entry);
    }

    /// Canonical serialized form. Both `save` and the integrity checker hash
    /// exactly this string.
    pub fn to_json_string(&self) -> Result<String> {
        let mut data = serde_json::to_string_pretty(self)?;
        data.push('\n');
        Ok(data)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = self.to_json_string()?;
        fsutil::atomic_write(path, data.as_bytes())?;
        Ok(())
    }
}

/// A `resolved` field is `url#hash`; the hash part is absent for resolvers
/// that cannot pin content.
pub fn split_resolved(resolved: &str) -> (&str, Option<&str>) {
    match resolved.split_once('#') {
        Some((url, hash)) if !hash.is_empty() => (url, Some(hash)),
        Some((url, _)) => (url, None),
        None => (resolved, None),
    }
}
