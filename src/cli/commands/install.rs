use anyhow::{bail, Result};
use std::env;
use std::fs;
use std::path::Path;

use super::DepTarget;
use crate::cli::EngineFlags;
use crate::config::Config;
use crate::integrity;
use crate::linker::Linker;
use crate::lockfile::Lockfile;
use crate::manifest;
use crate::network::RequestManager;
use crate::queue::BlockingQueue;
use crate::reporter::{ConsoleReporter, Reporter};
use crate::resolver::graph::{self, DepRequest};
use crate::resolver::{
    classify, make_pattern, normalize_pattern, resolve_pattern, PackageSpec, ResolveCtx,
};

#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub packages: Vec<String>,
    pub target: DepTarget,
    pub exact: bool,
    pub flags: EngineFlags,
}

pub(crate) fn cmd_install(options: InstallOptions) -> Result<()> {
    let config = options.flags.to_config(env::current_dir()?);
    let reporter = ConsoleReporter::new(options.flags.no_progress);
    let outcome = run_install(
        &config,
        &reporter,
        &options.packages,
        options.target,
        options.exact,
    );
    reporter.finish();
    outcome
}

/// Everything the engine shares across the resolve and fetch stages of one
/// install run.
struct Engine<'a> {
    config: &'a Config,
    reporter: &'a dyn Reporter,
    requests: RequestManager,
    dest_queue: BlockingQueue,
    git_queue: BlockingQueue,
}

impl<'a> Engine<'a> {
    fn new(config: &'a Config, reporter: &'a dyn Reporter) -> Result<Engine<'a>> {
        Ok(Engine {
            config,
            reporter,
            requests: RequestManager::new(config)?,
            dest_queue: BlockingQueue::new(
                config.network_concurrency.max(config.child_concurrency),
            ),
            git_queue: BlockingQueue::new(config.network_concurrency),
        })
    }

    fn resolve_ctx<'b>(&'b self, lockfile: &'b Lockfile) -> ResolveCtx<'b> {
        ResolveCtx {
            config: self.config,
            requests: &self.requests,
            lockfile,
            reporter: self.reporter,
            git_queue: &self.git_queue,
            dest_queue: &self.dest_queue,
        }
    }
}

/// The whole install pipeline: save added specs, try the integrity fast
/// path, then resolve, fetch, link, and pin the result.
pub fn run_install(
    config: &Config,
    reporter: &dyn Reporter,
    packages: &[String],
    target: DepTarget,
    exact: bool,
) -> Result<()> {
    let manifest_path = config.cwd.join("package.json");
    if !manifest_path.is_file() {
        bail!(
            "no package.json found in \"{}\". Run 'quarry init' first.",
            config.cwd.display()
        );
    }

    let engine = Engine::new(config, reporter)?;
    let lockfile = Lockfile::load(&config.lockfile_path())?;
    let adding = !packages.is_empty();

    if adding {
        add_packages(&engine, &lockfile, &manifest_path, packages, target, exact)?;
    }

    let manifest = manifest::load(&manifest_path)?;
    let seeds: Vec<DepRequest> = manifest
        .dependency_requests(!config.production)
        .into_iter()
        .map(|(name, range, kind)| DepRequest::seed(name, range, kind))
        .collect();
    let patterns: Vec<String> = seeds.iter().map(DepRequest::pattern).collect();

    if !adding && !lockfile.is_empty() {
        let check = integrity::check(config, &lockfile, &patterns)?;
        if check.matches && tree_intact(config, &seeds) {
            reporter.success("Already up-to-date.");
            return Ok(());
        }
    }

    // The tree is about to change; a crash from here on must read as dirty.
    integrity::invalidate(config)?;

    let flat = config.flat || manifest.flat;
    let ctx = engine.resolve_ctx(&lockfile);

    reporter.step(1, 4, "Resolving packages");
    let mut graph = graph::resolve_graph(&ctx, seeds.clone())?;
    if flat {
        graph::enforce_flat(&graph)?;
    }

    reporter.step(2, 4, "Fetching packages");
    let fetch_stats = graph::fetch_graph(&ctx.fetch_ctx(), &mut graph)?;

    reporter.step(3, 4, "Linking dependencies");
    let linker = Linker::new(config, reporter);
    let link_stats = linker.link_project(&graph, &seeds)?;

    reporter.step(4, 4, "Recording lockfile");
    let new_lock = graph.to_lockfile();
    new_lock.save(&config.lockfile_path())?;
    integrity::write(config, &new_lock, &patterns)?;

    reporter.success(&format!(
        "Installed {} package(s) ({} fetched, {} reused from cache).",
        link_stats.packages, fetch_stats.downloaded, fetch_stats.reused
    ));
    Ok(())
}

/// Resolve each added spec and record it in package.json. Exotic specs are
/// saved verbatim under the name the source declares; registry specs without
/// an explicit range are saved as a caret range on the resolved version.
fn add_packages(
    engine: &Engine<'_>,
    lockfile: &Lockfile,
    manifest_path: &Path,
    packages: &[String],
    target: DepTarget,
    exact: bool,
) -> Result<()> {
    let ctx = engine.resolve_ctx(lockfile);
    for spec in packages {
        let spec = spec.trim();
        let (name, saved_range) = match classify(spec) {
            PackageSpec::Registry { .. } => {
                let info = normalize_pattern(spec);
                engine
                    .reporter
                    .progress("resolving", &make_pattern(&info.name, &info.range));
                let resolution = resolve_pattern(&ctx, &info.name, &info.range)?;
                let saved = if exact {
                    resolution.version.clone()
                } else if info.has_version {
                    info.range.clone()
                } else {
                    format!("^{}", resolution.version)
                };
                (resolution.name, saved)
            }
            _ => {
                engine.reporter.progress("resolving", spec);
                let resolution = resolve_pattern(&ctx, "", spec)?;
                (resolution.name, spec.to_string())
            }
        };
        manifest::update_dependency(manifest_path, &name, &saved_range, target.kind())?;
        engine
            .reporter
            .log(&format!("Saved {name}@{saved_range} to package.json"));
    }
    Ok(())
}

/// Cheap sanity probe behind the integrity fast path: every seed must be
/// pinned by the lockfile and present at the top of node_modules.
fn tree_intact(config: &Config, seeds: &[DepRequest]) -> bool {
    let node_modules = config.modules_dir();
    if !node_modules.is_dir() {
        return seeds.is_empty();
    }
    seeds.iter().all(|seed| {
        let mut link = node_modules.clone();
        for part in seed.name.split('/') {
            link.push(part);
        }
        fs::symlink_metadata(&link).is_ok()
    })
}
