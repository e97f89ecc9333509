use crate::errors::Result;
use crate::resolver::{git, GithubSpec, Resolution, ResolveCtx};

/// GitHub shorthands normalize to the repository's https URL and then resolve
/// exactly like any other git reference, so the lockfile never forks between
/// the two spellings.
pub fn resolve(
    ctx: &ResolveCtx<'_>,
    name: &str,
    pattern_range: &str,
    spec: &GithubSpec,
) -> Result<Resolution> {
    git::resolve(
        ctx,
        name,
        pattern_range,
        &spec.http_url(),
        spec.hash.as_deref(),
    )
}
