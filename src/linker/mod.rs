use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::fsutil;
use crate::reporter::Reporter;
use crate::resolver::graph::{DepRequest, Graph, GraphNode};
use crate::resolver::RemoteType;

pub const VIRTUAL_DIR: &str = ".quarry";

/// Materializes a resolved graph under `node_modules`. Every `(name, uid)`
/// node gets one entry in the virtual store at
/// `node_modules/.quarry/<name>@<uid>/node_modules/<name>`, dependency edges
/// become sibling symlinks inside that entry, and root-level names are
/// symlinked at the top of `node_modules`. Different versions of one name
/// never collide, so no hoisting pass is needed.
pub struct Linker<'a> {
    config: &'a Config,
    reporter: &'a dyn Reporter,
}

#[derive(Debug, Default)]
pub struct LinkStats {
    pub packages: usize,
    /// False when at least one package fell back to copying because the
    /// cache lives on another filesystem.
    pub hardlinked: bool,
}

impl<'a> Linker<'a> {
    pub fn new(config: &'a Config, reporter: &'a dyn Reporter) -> Linker<'a> {
        Linker { config, reporter }
    }

    pub fn link_project(&self, graph: &Graph, seeds: &[DepRequest]) -> Result<LinkStats> {
        let node_modules = self.config.modules_dir();
        let virtual_root = node_modules.join(VIRTUAL_DIR);
        fsutil::ensure_dir(&virtual_root)?;

        let mut stats = LinkStats {
            packages: 0,
            hardlinked: true,
        };

        // Materialize every instance before wiring edges, so edge targets
        // always exist no matter the iteration order.
        for (_, node) in graph.live_nodes() {
            if node.remote.kind == RemoteType::Link {
                continue;
            }
            self.reporter.progress("linking", &node.human());
            let pkg_dir = self.instance_pkg_dir(&virtual_root, node);
            if let Some(parent) = pkg_dir.parent() {
                fsutil::ensure_dir(parent)?;
            }
            if !store_entry_current(&pkg_dir, &node.dest) {
                fsutil::remove_dest(&pkg_dir)?;
                let all_linked = fsutil::link_or_copy_tree(&node.dest, &pkg_dir)?;
                stats.hardlinked &= all_linked;
            }
            stats.packages += 1;
        }

        for (_, node) in graph.live_nodes() {
            if node.remote.kind == RemoteType::Link {
                continue;
            }
            let entry_modules = self.instance_dir(&virtual_root, node).join("node_modules");
            let deps = node
                .dependencies
                .iter()
                .chain(node.optional_dependencies.iter());
            for (dep_name, dep_range) in deps {
                let pattern = crate::resolver::make_pattern(dep_name, dep_range);
                let Some(dep_node) = graph.node_for_pattern(&pattern) else {
                    continue;
                };
                if dep_node.failed {
                    continue;
                }
                if dep_node.name == node.name && dep_node.uid == node.uid {
                    continue;
                }
                let target = self.link_target(&virtual_root, dep_node);
                let link = scoped_join(&entry_modules, dep_name)?;
                if let Some(parent) = link.parent() {
                    fsutil::ensure_dir(parent)?;
                }
                relink(&target, &link)?;
            }
        }

        let mut root_names = BTreeSet::new();
        for seed in seeds {
            let Some(node) = graph.node_for_pattern(&seed.pattern()) else {
                continue;
            };
            if node.failed {
                continue;
            }
            let target = self.link_target(&virtual_root, node);
            let link = scoped_join(&node_modules, &seed.name)?;
            if let Some(parent) = link.parent() {
                fsutil::ensure_dir(parent)?;
            }
            relink(&target, &link)?;
            root_names.insert(seed.name.clone());
        }

        self.prune_virtual_store(graph, &virtual_root)?;
        self.prune_roots(&node_modules, &virtual_root, &root_names)?;
        Ok(stats)
    }

    fn instance_dir(&self, virtual_root: &Path, node: &GraphNode) -> PathBuf {
        virtual_root.join(instance_dir_name(&node.name, &node.uid))
    }

    /// The directory holding the package's own files inside its store entry.
    fn instance_pkg_dir(&self, virtual_root: &Path, node: &GraphNode) -> PathBuf {
        let mut dir = self.instance_dir(virtual_root, node).join("node_modules");
        for part in node.name.split('/') {
            dir.push(part);
        }
        dir
    }

    fn link_target(&self, virtual_root: &Path, node: &GraphNode) -> PathBuf {
        if node.remote.kind == RemoteType::Link {
            node.dest.clone()
        } else {
            self.instance_pkg_dir(virtual_root, node)
        }
    }

    /// Drop store entries the current graph no longer produces, so removed or
    /// re-versioned dependencies don't accumulate.
    fn prune_virtual_store(&self, graph: &Graph, virtual_root: &Path) -> Result<()> {
        let mut expected = BTreeSet::new();
        for (_, node) in graph.live_nodes() {
            if node.remote.kind != RemoteType::Link {
                expected.insert(instance_dir_name(&node.name, &node.uid));
            }
        }
        for entry in fs::read_dir(virtual_root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !expected.contains(&name) {
                fsutil::remove_dest(&entry.path())?;
            }
        }
        Ok(())
    }

    /// Remove top-level symlinks that point into the virtual store but no
    /// longer belong to any root dependency. Files the user put there
    /// themselves are left alone.
    fn prune_roots(
        &self,
        node_modules: &Path,
        virtual_root: &Path,
        root_names: &BTreeSet<String>,
    ) -> Result<()> {
        let mut stale = Vec::new();
        for entry in fs::read_dir(node_modules)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name == VIRTUAL_DIR || file_name.starts_with('.') {
                continue;
            }
            if file_name.starts_with('@') && entry.file_type()?.is_dir() {
                for sub in fs::read_dir(entry.path())? {
                    let sub = sub?;
                    let scoped = format!("{file_name}/{}", sub.file_name().to_string_lossy());
                    if !root_names.contains(&scoped) {
                        stale.push(sub.path());
                    }
                }
            } else if !root_names.contains(&file_name) {
                stale.push(entry.path());
            }
        }
        for path in stale {
            let meta = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !meta.file_type().is_symlink() {
                continue;
            }
            let points_into_store = fs::read_link(&path)
                .map(|target| target.starts_with(virtual_root))
                .unwrap_or(false);
            if points_into_store {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

/// A store entry is current when it carries the same content hash as the
/// cache copy it was made from. `file:` dependencies get a fresh nonce hash
/// on every install, so an edited source directory always re-copies.
fn store_entry_current(pkg_dir: &Path, dest: &Path) -> bool {
    if !pkg_dir.join("package.json").is_file() {
        return false;
    }
    match (
        crate::fetcher::read_package_metadata(pkg_dir),
        crate::fetcher::read_package_metadata(dest),
    ) {
        (Ok(current), Ok(fresh)) => current.hash == fresh.hash,
        _ => false,
    }
}

/// `@scope/name` folds to `@scope+name` so one store entry stays one
/// directory.
fn instance_dir_name(name: &str, uid: &str) -> String {
    format!("{}@{uid}", name.replace('/', "+"))
}

fn scoped_join(base: &Path, name: &str) -> Result<PathBuf> {
    fsutil::safe_join(base, name).ok_or_else(|| {
        Error::Invariant(format!("package name \"{name}\" escapes the modules directory"))
    })
}

/// Point `link` at `target`, replacing whatever was there. An already
/// correct symlink is left untouched.
fn relink(target: &Path, link: &Path) -> Result<()> {
    match fs::symlink_metadata(link) {
        Ok(meta) => {
            if meta.file_type().is_symlink()
                && fs::read_link(link).map(|t| t == target).unwrap_or(false)
            {
                return Ok(());
            }
            fsutil::remove_dest(link)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    fsutil::symlink_dir(target, link)?;
    Ok(())
}
