use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fsutil;

pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";
pub const LOCKFILE_NAME: &str = "quarry.lock";
pub const INTEGRITY_FILENAME: &str = ".quarry-integrity";
pub const METADATA_FILENAME: &str = ".quarry-metadata.json";
pub const TARBALL_FILENAME: &str = ".quarry-tarball.tgz";

/// Everything the engine needs to know about its surroundings. Built once at
/// startup and passed down by reference; commands flip the flags they care
/// about before handing it to the install pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    pub cwd: PathBuf,
    pub registry: String,
    pub cache_dir: PathBuf,
    pub offline: bool,
    pub prefer_offline: bool,
    pub production: bool,
    pub flat: bool,
    pub ignore_platform: bool,
    pub link_file_dependencies: bool,
    pub offline_mirror: Option<PathBuf>,
    /// Extra root certificates (PEM bundle) trusted for registry TLS.
    pub ca_file: Option<PathBuf>,
    /// Client certificate and key (PEM) presented for mutual TLS.
    pub client_cert_file: Option<PathBuf>,
    /// Proxy URL for all requests. `HTTP_PROXY`/`HTTPS_PROXY` still apply
    /// when unset.
    pub proxy: Option<String>,
    pub network_concurrency: usize,
    pub child_concurrency: usize,
    pub network_timeout: Duration,
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Config {
    pub fn new(cwd: PathBuf) -> Config {
        let registry = env::var("QUARRY_REGISTRY")
            .ok()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_REGISTRY.to_string());
        let cache_dir = env::var_os("QUARRY_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(fsutil::cache_root);
        Config {
            cwd,
            registry,
            cache_dir,
            offline: false,
            prefer_offline: false,
            production: false,
            flat: false,
            ignore_platform: false,
            link_file_dependencies: false,
            offline_mirror: None,
            ca_file: None,
            client_cert_file: None,
            proxy: None,
            network_concurrency: 8,
            child_concurrency: 5,
            network_timeout: Duration::from_secs(30),
            max_retry_attempts: 5,
            retry_delay: Duration::from_secs(3),
        }
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.cwd.join(LOCKFILE_NAME)
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.cwd.join("node_modules")
    }

    /// Cache destination for one fetched package. Scoped names keep their
    /// `@scope/` segment as a real directory level.
    pub fn module_dest(&self, name: &str, uid: &str) -> PathBuf {
        let mut p = self.cache_dir.join("pkgs");
        for seg in name.split('/') {
            p.push(seg);
        }
        p.push(uid);
        p
    }

    /// Scratch directory keyed by an already-hashed token, shared between the
    /// resolve step that downloads a tarball and the fetch step that reuses it.
    pub fn temp_dest(&self, key: &str) -> PathBuf {
        self.cache_dir.join("tmp").join(key)
    }

    pub fn git_dest(&self, slug: &str) -> PathBuf {
        self.cache_dir.join("git").join(slug)
    }

    pub fn mirror_path(&self, filename: &str) -> Option<PathBuf> {
        let mirror = self.offline_mirror.as_ref()?;
        fsutil::safe_join(mirror, filename)
    }

    /// True when `path` sits inside the project, so a tarball reference like
    /// `file:pkg.tgz` resolves against the cwd rather than the mirror.
    pub fn is_inside_project(&self, path: &Path) -> bool {
        path.starts_with(&self.cwd)
    }
}
