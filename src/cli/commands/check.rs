use anyhow::{bail, Result};
use std::env;

use crate::cli::EngineFlags;
use crate::colors::*;
use crate::integrity;
use crate::lockfile::Lockfile;
use crate::manifest;
use crate::resolver::make_pattern;

/// Compare the installed tree's recorded integrity hash against what the
/// current lockfile, manifest, and flags would produce. Never touches the
/// network.
pub(crate) fn cmd_check(flags: EngineFlags) -> Result<()> {
    let config = flags.to_config(env::current_dir()?);
    let manifest = manifest::load(&config.cwd.join("package.json"))?;
    let lockfile = Lockfile::load(&config.lockfile_path())?;

    let patterns: Vec<String> = manifest
        .dependency_requests(!config.production)
        .into_iter()
        .map(|(name, range, _)| make_pattern(&name, &range))
        .collect();

    let outcome = integrity::check(&config, &lockfile, &patterns)?;
    if outcome.matches {
        println!(
            "{C_GRAY}[quarry]{C_RESET} {C_GREEN}ok{C_RESET} integrity matches ({})",
            outcome.loc.display()
        );
        return Ok(());
    }

    for pattern in &outcome.missing_patterns {
        eprintln!("{C_YELLOW}warning{C_RESET} \"{pattern}\" is not pinned by the lockfile");
    }
    match &outcome.expected {
        Some(expected) => bail!(
            "integrity mismatch: expected {expected}, computed {}. Run 'quarry install'.",
            outcome.actual
        ),
        None => bail!(
            "no integrity record at \"{}\". Run 'quarry install'.",
            outcome.loc.display()
        ),
    }
}
