use dirs::data_local_dir;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub fn cache_root() -> PathBuf {
    let mut root = data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    root.push("quarry");
    root.push("cache");
    root.push("v1");
    root
}

pub fn ensure_dir(p: &Path) -> io::Result<()> {
    fs::create_dir_all(p)
}

/// Remove a file or directory tree, tolerating it not existing at all. Used
/// to clear suspect destinations before a refetch.
pub fn remove_dest(p: &Path) -> io::Result<()> {
    match fs::symlink_metadata(p) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
        Ok(meta) => {
            if meta.is_dir() {
                fs::remove_dir_all(p)
            } else {
                fs::remove_file(p)
            }
        }
    }
}

pub fn safe_join(base: &Path, rel: &str) -> Option<PathBuf> {
    if rel.contains("..") {
        return None;
    }
    let mut p = base.to_path_buf();
    p.push(rel);
    Some(p)
}

/// Sibling path with ".tmp" appended to the file name, for write-then-rename.
pub fn tmp_sibling(p: &Path) -> PathBuf {
    let mut name = p
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("quarry"));
    name.push(".tmp");
    p.with_file_name(name)
}

/// Write a file so that a crash mid-write leaves either the old content or an
/// orphaned .tmp sibling, never a truncated target.
pub fn atomic_write(p: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_sibling(p);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, p)
}

pub fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(entry.path(), &dest)?;
        let perms = entry.metadata().map_err(io::Error::other)?.permissions();
        fs::set_permissions(&dest, perms)?;
    }
    Ok(())
}

/// Copy a tree preferring hardlinks, falling back to byte copies per file.
/// Returns true when every file was hardlinked.
pub fn link_or_copy_tree(from: &Path, to: &Path) -> io::Result<bool> {
    let mut all_linked = true;
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::hard_link(entry.path(), &dest) {
            Ok(_) => {}
            Err(_) => {
                fs::copy(entry.path(), &dest)?;
                all_linked = false;
            }
        }
    }
    Ok(all_linked)
}

pub fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    if fs::symlink_metadata(link).is_ok() {
        return Ok(());
    }
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
    }
    #[cfg(windows)]
    {
        std::os::windows::fs::symlink_dir(target, link)
    }
}
