use std::path::Path;

use super::FetchCtx;
use crate::errors::Result;
use crate::fsutil;
use crate::resolver::RemoteDescriptor;

/// Copies a directory that already lives on disk (a `file:` dependency or a
/// tarball the resolver unpacked into the temp cache) into the destination.
pub fn fetch(ctx: &FetchCtx<'_>, remote: &RemoteDescriptor, dest: &Path) -> Result<String> {
    let source = Path::new(&remote.reference);
    let source = if source.is_absolute() {
        source.to_path_buf()
    } else {
        ctx.config.cwd.join(source)
    };
    fsutil::copy_tree(&source, dest)?;
    Ok(remote.hash.clone().unwrap_or_default())
}
