use std::io::Cursor;
use std::path::Path;

use super::FetchCtx;
use crate::errors::{Error, Result};
use crate::gitutil::{is_commit_sha, npm_url_to_git_url, GitClient};
use crate::resolver::RemoteDescriptor;

/// Materializes a git remote at the commit the resolver pinned. Floating
/// refs never reach this point; a missing or partial commit is a bug in the
/// resolution step, not a condition to recover from.
pub fn fetch(ctx: &FetchCtx<'_>, remote: &RemoteDescriptor, dest: &Path) -> Result<String> {
    let commit = match remote.hash.as_deref() {
        Some(hash) if is_commit_sha(hash) => hash,
        _ => {
            return Err(Error::Invariant(format!(
                "git fetch for \"{}\" reached without a pinned commit",
                remote.reference
            )))
        }
    };

    let git_url = npm_url_to_git_url(&remote.reference);
    let mut client = GitClient::new(ctx.config, ctx.git_queue, git_url, Some(commit));
    let bytes = client.archive_bytes(commit)?;
    super::unpack_tar(Cursor::new(bytes), dest, 0)?;
    Ok(commit.to_string())
}
