use anyhow::{bail, Result};
use std::env;

use crate::colors::*;
use crate::manifest::{self, Manifest};

pub(crate) fn cmd_init(name: Option<String>, version: Option<String>) -> Result<()> {
    let cwd = env::current_dir()?;
    let path = cwd.join("package.json");
    if path.exists() {
        bail!("package.json already exists");
    }
    let fallback = cwd
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "my-app".to_string());
    let manifest = Manifest {
        name: Some(name.unwrap_or(fallback)),
        version: Some(version.unwrap_or_else(|| "0.1.0".to_string())),
        license: Some("MIT".to_string()),
        ..Manifest::default()
    };
    manifest::write(&manifest, &path)?;
    println!(
        "{C_GRAY}[quarry]{C_RESET} {C_GREEN}init{C_RESET} created {}@{}",
        manifest.name.as_deref().unwrap_or_default(),
        manifest.version.as_deref().unwrap_or_default()
    );
    Ok(())
}
