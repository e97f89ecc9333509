use anyhow::Result;
use std::env;
use std::fs;

use crate::colors::*;
use crate::config::Config;

pub(crate) fn cmd_cache_path() -> Result<()> {
    let config = Config::new(env::current_dir()?);
    println!("{}", config.cache_dir.display());
    Ok(())
}

pub(crate) fn cmd_cache_clean() -> Result<()> {
    let config = Config::new(env::current_dir()?);
    let root = &config.cache_dir;
    if root.exists() {
        fs::remove_dir_all(root)?;
    }
    fs::create_dir_all(root)?;
    println!(
        "{C_GRAY}[quarry]{C_RESET} {C_GREEN}cache cleaned{C_RESET} at {}",
        root.display()
    );
    Ok(())
}
