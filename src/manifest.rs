use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        rename = "devDependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        rename = "optionalDependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        rename = "peerDependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub peer_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub os: Vec<String>,
    #[serde(default, rename = "cpu", skip_serializing_if = "Vec::is_empty")]
    pub cpu_arch: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub flat: bool,
}

/// Which dependency table a request came from. Optional requests may fail
/// without sinking the install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepKind {
    Normal,
    Dev,
    Optional,
}

impl DepKind {
    pub fn manifest_key(self) -> &'static str {
        match self {
            DepKind::Normal => "dependencies",
            DepKind::Dev => "devDependencies",
            DepKind::Optional => "optionalDependencies",
        }
    }
}

impl Manifest {
    /// Seed requests for a resolution pass, dev entries included unless the
    /// caller is doing a production install.
    pub fn dependency_requests(&self, include_dev: bool) -> Vec<(String, String, DepKind)> {
        let mut out = Vec::new();
        for (name, range) in &self.dependencies {
            out.push((name.clone(), range.clone(), DepKind::Normal));
        }
        if include_dev {
            for (name, range) in &self.dev_dependencies {
                out.push((name.clone(), range.clone(), DepKind::Dev));
            }
        }
        for (name, range) in &self.optional_dependencies {
            out.push((name.clone(), range.clone(), DepKind::Optional));
        }
        out
    }
}

pub fn load(path: &Path) -> Result<Manifest> {
    let raw = fs::read_to_string(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            let dir = path.parent().unwrap_or(path);
            Error::Message(format!(
                "Couldn't find a package.json file in \"{}\"",
                dir.display()
            ))
        } else {
            Error::Io(e)
        }
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| Error::Message(format!("{}: {e}", path.display())))
}

pub fn load_dir(dir: &Path) -> Result<Manifest> {
    load(&dir.join("package.json"))
}

pub fn write(manifest: &Manifest, path: &Path) -> Result<()> {
    let mut data = serde_json::to_string_pretty(manifest)?;
    data.push('\n');
    fs::write(path, data)?;
    Ok(())
}

/// Insert or bump one dependency entry in a package.json on disk, leaving
/// every field we do not model untouched.
pub fn update_dependency(path: &Path, name: &str, range: &str, kind: DepKind) -> Result<()> {
    let raw = fs::read_to_string(path)?;
    let mut doc: Value = serde_json::from_str(&raw)?;
    let root = doc
        .as_object_mut()
        .ok_or_else(|| Error::Message(format!("{}: not a JSON object", path.display())))?;
    let section = root
        .entry(kind.manifest_key())
        .or_insert_with(|| Value::Object(Map::new()));
    let table = section
        .as_object_mut()
        .ok_or_else(|| {
            Error::Message(format!(
                "{}: \"{}\" is not a JSON object",
                path.display(),
                kind.manifest_key()
            ))
        })?;
    table.insert(name.to_string(), Value::String(range.to_string()));
    let mut data = serde_json::to_string_pretty(&doc)?;
    data.push('\n');
    fs::write(path, data)?;
    Ok(())
}

/// Whether an `os`/`cpu` constraint list admits `host`. A `!value` entry
/// blocks its platform outright; any positive entry turns the list into an
/// allowlist. Callers check the two lists independently.
pub fn list_admits(list: &[String], host: &str) -> bool {
    if list.is_empty() {
        return true;
    }
    let mut allowed = None;
    let mut blocked = false;
    for entry in list {
        if let Some(stripped) = entry.strip_prefix('!') {
            if stripped == host {
                blocked = true;
            }
        } else {
            allowed.get_or_insert(false);
            if entry == host {
                allowed = Some(true);
            }
        }
    }
    (!blocked) && allowed.unwrap_or(true)
}

pub fn node_platform() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "win32"
    }
    #[cfg(target_os = "macos")]
    {
        "darwin"
    }
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "freebsd")]
    {
        "freebsd"
    }
    #[cfg(target_os = "openbsd")]
    {
        "openbsd"
    }
    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd",
        target_os = "openbsd"
    )))]
    {
        "unknown"
    }
}

pub fn node_arch() -> &'static str {
    #[cfg(target_arch = "x86_64")]
    {
        "x64"
    }
    #[cfg(target_arch = "x86")]
    {
        "ia32"
    }
    #[cfg(target_arch = "arm")]
    {
        "arm"
    }
    #[cfg(target_arch = "aarch64")]
    {
        "arm64"
    }
    #[cfg(target_arch = "powerpc64")]
    {
        "ppc64"
    }
    #[cfg(target_arch = "s390x")]
    {
        "s390x"
    }
    #[cfg(target_arch = "riscv64")]
    {
        "riscv64"
    }
    #[cfg(not(any(
        target_arch = "x86_64",
        target_arch = "x86",
        target_arch = "arm",
        target_arch = "aarch64",
        target_arch = "powerpc64",
        target_arch = "s390x",
        target_arch = "riscv64"
    )))]
    {
        "unknown"
    }
}
