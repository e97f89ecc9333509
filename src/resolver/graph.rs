use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use crate::errors::{Error, Result};
use crate::fetcher::{self, FetchCtx};
use crate::lockfile::{LockEntry, Lockfile};
use crate::manifest::{self, DepKind};
use crate::resolver::{
    make_pattern, resolve_pattern, RemoteDescriptor, RemoteType, ResolveCtx, Resolution,
};

/// One dependency edge waiting to be resolved.
#[derive(Debug, Clone)]
pub struct DepRequest {
    pub name: String,
    pub range: String,
    pub optional: bool,
    /// `name@version` of the requesting package, for warning chains.
    pub parent: Option<String>,
}

impl DepRequest {
    pub fn seed(name: String, range: String, kind: DepKind) -> DepRequest {
        DepRequest {
            name,
            range,
            optional: kind == DepKind::Optional,
            parent: None,
        }
    }

    pub fn pattern(&self) -> String {
        make_pattern(&self.name, &self.range)
    }
}

/// A deduplicated `(name, uid)` node in the resolved graph.
#[derive(Debug)]
pub struct GraphNode {
    pub name: String,
    pub version: String,
    pub uid: String,
    pub remote: RemoteDescriptor,
    /// Cache destination for fetched kinds, the link target for `link:`.
    pub dest: PathBuf,
    /// Every pattern that resolved to this node.
    pub patterns: Vec<String>,
    /// True while every path to this node goes through an optional edge.
    pub optional: bool,
    /// Set when an optional node's fetch failed; the linker skips it.
    pub failed: bool,
    pub dependencies: BTreeMap<String, String>,
    pub optional_dependencies: BTreeMap<String, String>,
}

impl GraphNode {
    pub fn human(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

#[derive(Debug, Default)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub pattern_to_node: BTreeMap<String, usize>,
}

impl Graph {
    pub fn node_for_pattern(&self, pattern: &str) -> Option<&GraphNode> {
        self.pattern_to_node
            .get(pattern)
            .map(|&idx| &self.nodes[idx])
    }

    /// Nodes that survived resolution and fetching.
    pub fn live_nodes(&self) -> impl Iterator<Item = (usize, &GraphNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| !node.failed)
    }

    /// Pin every pattern of every live node. Patterns of failed optional
    /// nodes are left out so the next run re-resolves them.
    pub fn to_lockfile(&self) -> Lockfile {
        let mut lockfile = Lockfile::default();
        for (pattern, &idx) in &self.pattern_to_node {
            let node = &self.nodes[idx];
            if node.failed {
                continue;
            }
            lockfile.set(
                pattern,
                LockEntry {
                    version: node.version.clone(),
                    resolved: node.remote.resolved.clone(),
                    integrity: node.remote.integrity.clone(),
                    uid: Some(node.uid.clone()),
                    registry: Some(node.remote.registry.clone()),
                    dependencies: node.dependencies.clone(),
                    optional_dependencies: node.optional_dependencies.clone(),
                },
            );
        }
        lockfile
    }
}

/// Expand seed patterns into the full transitive graph. Patterns resolve in
/// parallel waves; graph mutation stays on the calling thread, so resolvers
/// never contend on shared state. The visited-pattern set is what keeps
/// logical cycles (a -> b -> a) from recursing forever.
pub fn resolve_graph(ctx: &ResolveCtx<'_>, seeds: Vec<DepRequest>) -> Result<Graph> {
    let mut graph = Graph::default();
    let mut by_identity: HashMap<(String, String), usize> = HashMap::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut pending = seeds;

    while !pending.is_empty() {
        let wave: Vec<DepRequest> = pending
            .drain(..)
            .filter(|req| seen.insert(req.pattern()))
            .collect();
        if wave.is_empty() {
            break;
        }

        let outcomes: Vec<(DepRequest, Result<Resolution>)> = wave
            .into_par_iter()
            .map(|req| {
                ctx.reporter.progress("resolving", &req.pattern());
                let resolved = resolve_pattern(ctx, &req.name, &req.range);
                (req, resolved)
            })
            .collect();

        for (req, outcome) in outcomes {
            let pattern = req.pattern();
            let resolution = match outcome {
                Ok(resolution) => resolution,
                Err(err) if req.optional => {
                    ctx.reporter.warn(&format!(
                        "{pattern} is an optional dependency and failed to resolve \
                         ({err}). Excluding it from installation."
                    ));
                    continue;
                }
                Err(err) => return Err(err),
            };

            if !check_platform(ctx, &req, &resolution)? {
                continue;
            }

            let identity = (resolution.name.clone(), resolution.uid.clone());
            if let Some(&idx) = by_identity.get(&identity) {
                graph.pattern_to_node.insert(pattern.clone(), idx);
                graph.nodes[idx].patterns.push(pattern);
                if !req.optional {
                    graph.nodes[idx].optional = false;
                }
                continue;
            }

            // Past the dedup branch, so one deprecated package requested
            // under several patterns warns once.
            if let Some(message) = &resolution.deprecated {
                let human = format!("{}@{}", resolution.name, resolution.version);
                let chain = match &req.parent {
                    Some(parent) => format!("{parent} > {human}"),
                    None => human,
                };
                ctx.reporter.warn(&format!("{chain}: {message}"));
            }

            let human = format!("{}@{}", resolution.name, resolution.version);
            for (dep_name, dep_range) in &resolution.dependencies {
                pending.push(DepRequest {
                    name: dep_name.clone(),
                    range: dep_range.clone(),
                    optional: req.optional,
                    parent: Some(human.clone()),
                });
            }
            for (dep_name, dep_range) in &resolution.optional_dependencies {
                pending.push(DepRequest {
                    name: dep_name.clone(),
                    range: dep_range.clone(),
                    optional: true,
                    parent: Some(human.clone()),
                });
            }

            let dest = match resolution.remote.kind {
                RemoteType::Link => PathBuf::from(&resolution.remote.reference),
                _ => ctx.config.module_dest(&resolution.name, &resolution.uid),
            };
            let idx = graph.nodes.len();
            graph.nodes.push(GraphNode {
                name: resolution.name,
                version: resolution.version,
                uid: resolution.uid,
                remote: resolution.remote,
                dest,
                patterns: vec![pattern.clone()],
                optional: req.optional,
                failed: false,
                dependencies: resolution.dependencies,
                optional_dependencies: resolution.optional_dependencies,
            });
            by_identity.insert(identity, idx);
            graph.pattern_to_node.insert(pattern, idx);
        }
    }

    ctx.requests.clear_memo();
    Ok(graph)
}

/// Ok(true) to keep the node, Ok(false) to drop an optional incompatible
/// one, Err when a required package cannot run here.
fn check_platform(ctx: &ResolveCtx<'_>, req: &DepRequest, resolution: &Resolution) -> Result<bool> {
    if ctx.config.ignore_platform {
        return Ok(true);
    }
    let os_ok = manifest::list_admits(&resolution.os, manifest::node_platform());
    let cpu_ok = manifest::list_admits(&resolution.cpu, manifest::node_arch());
    if os_ok && cpu_ok {
        return Ok(true);
    }
    if req.optional {
        ctx.reporter.warn(&format!(
            "{}@{} is an optional dependency and failed compatibility check. \
             Excluding it from installation.",
            resolution.name, resolution.version
        ));
        return Ok(false);
    }
    if !os_ok {
        ctx.reporter.error(&format!(
            "{}@{}: The platform \"{}\" is incompatible with this module.",
            resolution.name,
            resolution.version,
            manifest::node_platform()
        ));
    }
    if !cpu_ok {
        ctx.reporter.error(&format!(
            "{}@{}: The CPU architecture \"{}\" is incompatible with this module.",
            resolution.name,
            resolution.version,
            manifest::node_arch()
        ));
    }
    Err(Error::Message("Found incompatible module.".to_string()))
}

#[derive(Debug, Default)]
pub struct FetchStats {
    pub downloaded: usize,
    pub reused: usize,
}

/// Materialize every live node into its cache destination. Extraction work
/// runs on its own pool sized by `child_concurrency`; the network side is
/// already bounded by the request manager.
pub fn fetch_graph(ctx: &FetchCtx<'_>, graph: &mut Graph) -> Result<FetchStats> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.config.child_concurrency.max(1))
        .build()
        .map_err(|e| Error::Message(format!("couldn't start fetch workers: {e}")))?;

    let jobs: Vec<usize> = graph
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| !node.failed && node.remote.kind != RemoteType::Link)
        .map(|(idx, _)| idx)
        .collect();

    let nodes = &graph.nodes;
    let outcomes: Vec<(usize, Result<bool>)> = pool.install(|| {
        jobs.par_iter()
            .map(|&idx| {
                let node = &nodes[idx];
                // Sources without their own package.json (bare git repos,
                // plain file directories) fall back to what resolution saw.
                let default = manifest::Manifest {
                    name: Some(node.name.clone()),
                    version: Some(node.version.clone()),
                    dependencies: node.dependencies.clone(),
                    optional_dependencies: node.optional_dependencies.clone(),
                    ..manifest::Manifest::default()
                };
                let fetched =
                    fetcher::fetch_package(ctx, &node.name, &node.remote, &node.dest, Some(default))
                        .map(|pkg| pkg.cached);
                (idx, fetched)
            })
            .collect()
    });

    let mut stats = FetchStats::default();
    for (idx, outcome) in outcomes {
        match outcome {
            Ok(true) => stats.reused += 1,
            Ok(false) => stats.downloaded += 1,
            Err(err) => {
                let node = &mut graph.nodes[idx];
                if node.optional {
                    ctx.reporter.warn(&format!(
                        "{} is an optional dependency and failed to fetch ({err}). \
                         Excluding it from installation.",
                        node.human()
                    ));
                    node.failed = true;
                } else {
                    return Err(err);
                }
            }
        }
    }
    Ok(stats)
}

/// Flat installs admit one version per package name. Conflicts are an error
/// instead of an interactive prompt.
pub fn enforce_flat(graph: &Graph) -> Result<()> {
    let mut versions: BTreeMap<&str, BTreeMap<&str, &str>> = BTreeMap::new();
    for (_, node) in graph.live_nodes() {
        versions
            .entry(node.name.as_str())
            .or_default()
            .insert(node.uid.as_str(), node.version.as_str());
    }
    for (name, picks) in versions {
        if picks.len() > 1 {
            let list = picks.values().copied().collect::<Vec<_>>().join("\", \"");
            return Err(Error::Message(format!(
                "Multiple versions of \"{name}\" found: \"{list}\". \
                 A flat install requires exactly one version per package."
            )));
        }
    }
    Ok(())
}
