use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;

use crate::config::{Config, INTEGRITY_FILENAME};
use crate::errors::Result;
use crate::fsutil;
use crate::lockfile::Lockfile;

/// Outcome of comparing the tree's recorded integrity hash against what the
/// current lockfile, patterns, and flags would produce.
#[derive(Debug)]
pub struct IntegrityMatch {
    pub actual: String,
    pub expected: Option<String>,
    /// Seed patterns the lockfile doesn't pin. Any entry here forces
    /// re-resolution even when the hashes agree.
    pub missing_patterns: Vec<String>,
    pub matches: bool,
    pub loc: PathBuf,
}

/// Deterministic fingerprint of what an install would produce: the lockfile
/// body, the sorted request patterns, and every flag that changes the shape
/// of the tree.
pub fn generate_integrity_hash(
    lockfile_source: &str,
    patterns: &[String],
    config: &Config,
) -> String {
    let mut sorted: Vec<&str> = patterns.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(lockfile_source.as_bytes());
    for pattern in sorted {
        hasher.update(pattern.as_bytes());
        hasher.update([0]);
    }
    for flag in [
        config.flat,
        config.production,
        config.link_file_dependencies,
    ] {
        hasher.update([flag as u8]);
    }
    if let Some(mirror) = &config.offline_mirror {
        hasher.update(mirror.to_string_lossy().as_bytes());
    }
    hex::encode(hasher.finalize())
}

pub fn integrity_file(config: &Config) -> PathBuf {
    config.modules_dir().join(INTEGRITY_FILENAME)
}

pub fn check(config: &Config, lockfile: &Lockfile, patterns: &[String]) -> Result<IntegrityMatch> {
    let loc = integrity_file(config);
    let source = lockfile.to_json_string()?;
    let actual = generate_integrity_hash(&source, patterns, config);
    let expected = fs::read_to_string(&loc)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let missing_patterns: Vec<String> = patterns
        .iter()
        .filter(|p| !lockfile.patterns.contains_key(p.as_str()))
        .cloned()
        .collect();
    let matches =
        missing_patterns.is_empty() && expected.as_deref() == Some(actual.as_str());
    Ok(IntegrityMatch {
        actual,
        expected,
        missing_patterns,
        matches,
        loc,
    })
}

/// Record the hash for the tree that was just written. Goes through a temp
/// sibling so a crash mid-write reads back as a mismatch, not a stale match.
pub fn write(config: &Config, lockfile: &Lockfile, patterns: &[String]) -> Result<()> {
    let loc = integrity_file(config);
    if let Some(parent) = loc.parent() {
        fsutil::ensure_dir(parent)?;
    }
    let source = lockfile.to_json_string()?;
    let hash = generate_integrity_hash(&source, patterns, config);
    fsutil::atomic_write(&loc, format!("{hash}\n").as_bytes())?;
    Ok(())
}

/// Drop the recorded hash before mutating the tree, so an interrupted
/// install can never pass the next check by accident.
pub fn invalidate(config: &Config) -> Result<()> {
    match fs::remove_file(integrity_file(config)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
