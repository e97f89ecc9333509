use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha512};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use super::FetchCtx;
use crate::config::{Config, TARBALL_FILENAME};
use crate::errors::{Error, Result};
use crate::fsutil;
use crate::hash::HashReader;
use crate::resolver::RemoteDescriptor;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Fetch a tarball remote into `dest` and return the sha1 of the raw bytes.
///
/// `file:` and bare-path references read straight from disk. Everything else
/// tries the offline mirror and the cached tarball copy first, then the
/// network.
pub fn fetch(ctx: &FetchCtx<'_>, remote: &RemoteDescriptor, dest: &Path) -> Result<String> {
    if let Some(path) = local_reference_path(ctx.config, &remote.reference) {
        return fetch_from_local(ctx, remote, dest, Some(path));
    }
    match fetch_from_local(ctx, remote, dest, None) {
        Ok(hash) => Ok(hash),
        Err(_) => fetch_from_external(ctx, remote, dest),
    }
}

/// Where the raw tarball is kept inside an unpacked destination, so later
/// installs can re-extract and mirrors can be backfilled without refetching.
pub fn cache_tarball_path(dest: &Path) -> PathBuf {
    dest.join(TARBALL_FILENAME)
}

/// Mirror filename for a remote tarball URL. Scoped registry paths fold the
/// scope into the name (`@scope/pkg/-/pkg-1.0.0.tgz` becomes
/// `@scope-pkg-1.0.0.tgz`) so one flat mirror directory stays collision-free.
pub fn mirror_filename(reference: &str) -> Option<String> {
    let rest = reference.split_once("://").map(|(_, r)| r)?;
    let pathname = match rest.split_once('/') {
        Some((_, path)) => path,
        None => return None,
    };
    let pathname = pathname
        .split(['?', '#'])
        .next()
        .unwrap_or(pathname)
        .trim_end_matches('/');
    let basename = pathname.rsplit('/').next().unwrap_or("");
    if basename.is_empty() {
        return None;
    }
    let first_part = pathname.split('/').next().unwrap_or("");
    if first_part.starts_with('@') && first_part != basename {
        Some(format!("{first_part}-{basename}"))
    } else {
        Some(basename.to_string())
    }
}

fn local_reference_path(config: &Config, reference: &str) -> Option<PathBuf> {
    let stripped = reference.strip_prefix("file:").unwrap_or(reference);
    let looks_local = reference.starts_with("file:")
        || stripped.starts_with("./")
        || stripped.starts_with("../")
        || Path::new(stripped).is_absolute();
    if !looks_local {
        return None;
    }
    let path = Path::new(stripped);
    if path.is_absolute() {
        Some(path.to_path_buf())
    } else {
        Some(config.cwd.join(path))
    }
}

fn fetch_from_local(
    ctx: &FetchCtx<'_>,
    remote: &RemoteDescriptor,
    dest: &Path,
    override_path: Option<PathBuf>,
) -> Result<String> {
    let mut candidates = Vec::new();
    if let Some(path) = override_path {
        candidates.push(path);
    } else {
        if let Some(filename) = mirror_filename(&remote.reference) {
            if let Some(mirror_file) = ctx.config.mirror_path(&filename) {
                candidates.push(mirror_file);
            }
        }
        candidates.push(cache_tarball_path(dest));
    }

    let Some(tarball) = candidates.iter().find(|p| p.is_file()).cloned() else {
        let tried = candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\", \"");
        return Err(Error::Message(format!(
            "\"{}\": Tarball is not in network and can not be located in cache (\"{}\")",
            remote.reference, tried
        )));
    };

    let file = fs::File::open(&tarball)?;
    match extract_stream(file, Vec::new(), remote, dest) {
        Ok(hash) => Ok(hash),
        Err(Error::Io(err)) => Err(Error::Message(format!(
            "{}. Try removing \"{}\" and rerunning the install.",
            err,
            tarball.display()
        ))),
        Err(err) => Err(err),
    }
}

fn fetch_from_external(
    ctx: &FetchCtx<'_>,
    remote: &RemoteDescriptor,
    dest: &Path,
) -> Result<String> {
    let reference = remote.reference.as_str();
    let hashless = remote.hash.is_none() && remote.integrity.is_none();
    if hashless && reference.starts_with("http://") {
        return Err(Error::Security(format!(
            "refusing to fetch \"{reference}\" over plain http without a pinned hash"
        )));
    }

    let response = ctx.requests.stream(reference, hashless)?;

    let mut sinks = Vec::new();
    let mut sink_paths = Vec::new();
    if let Some(filename) = mirror_filename(reference) {
        if let Some(mirror_file) = ctx.config.mirror_path(&filename) {
            if let Some(parent) = mirror_file.parent() {
                fsutil::ensure_dir(parent)?;
            }
            sinks.push(fs::File::create(&mirror_file)?);
            sink_paths.push(mirror_file);
        }
    }
    let cached = cache_tarball_path(dest);
    sinks.push(fs::File::create(&cached)?);
    sink_paths.push(cached);

    match extract_stream(response, sinks, remote, dest) {
        Ok(hash) => Ok(hash),
        Err(err) => {
            // A partial or mismatched download must not look fetchable later.
            for path in &sink_paths {
                let _ = fs::remove_file(path);
            }
            Err(err)
        }
    }
}

/// Run the raw byte stream through the hash filter and the tee sinks, unpack
/// the (possibly gzipped) tar behind them, then check the digests against
/// what the resolution pinned.
fn extract_stream<R: Read>(
    reader: R,
    sinks: Vec<fs::File>,
    remote: &RemoteDescriptor,
    dest: &Path,
) -> Result<String> {
    let mut raw = RawStream::new(reader, sinks);
    {
        let body = sniff_body(&mut raw)?;
        super::unpack_tar(body, dest, 1)?;
    }
    // The unpacker stops at the end-of-archive marker. Trailing bytes still
    // belong to the payload, so drain them through the hash and the sinks.
    io::copy(&mut raw, &mut io::sink())?;

    let actual = raw.sha1_hex();
    if let Some(expected) = &remote.hash {
        if !raw.matches(expected) {
            return Err(Error::Security(format!(
                "Bad hash. Expected \"{expected}\" but got \"{actual}\""
            )));
        }
    }
    if let Some(expected) = &remote.integrity {
        if let Some(actual_integrity) = raw.integrity_like(expected) {
            if expected != &actual_integrity {
                return Err(Error::Security(format!(
                    "Bad integrity. Expected \"{expected}\" but got \"{actual_integrity}\""
                )));
            }
        }
    }
    Ok(actual)
}

/// Hashes every raw byte and copies it into each sink while the extraction
/// pipeline reads through it.
struct RawStream<R> {
    inner: HashReader<R>,
    sha512: Sha512,
    sinks: Vec<fs::File>,
}

impl<R: Read> RawStream<R> {
    fn new(inner: R, sinks: Vec<fs::File>) -> RawStream<R> {
        RawStream {
            inner: HashReader::new(inner),
            sha512: Sha512::new(),
            sinks,
        }
    }

    fn sha1_hex(&self) -> String {
        self.inner.hex()
    }

    fn matches(&self, expected: &str) -> bool {
        self.inner.matches(expected)
    }

    /// Computed integrity string using the same algorithm as `expected`, or
    /// `None` when the algorithm is one we don't produce.
    fn integrity_like(&self, expected: &str) -> Option<String> {
        if expected.starts_with("sha512-") {
            let digest = self.sha512.clone().finalize();
            Some(format!("sha512-{}", BASE64.encode(digest)))
        } else if expected.starts_with("sha1-") {
            let digest = hex::decode(self.inner.hex()).ok()?;
            Some(format!("sha1-{}", BASE64.encode(digest)))
        } else {
            None
        }
    }
}

impl<R: Read> Read for RawStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.sha512.update(&buf[..n]);
            for sink in &mut self.sinks {
                sink.write_all(&buf[..n])?;
            }
        }
        Ok(n)
    }
}

enum TarballBody<R: Read> {
    Gzipped(GzDecoder<io::Chain<io::Cursor<Vec<u8>>, R>>),
    Plain(io::Chain<io::Cursor<Vec<u8>>, R>),
}

impl<R: Read> Read for TarballBody<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            TarballBody::Gzipped(r) => r.read(buf),
            TarballBody::Plain(r) => r.read(buf),
        }
    }
}

/// Registries are inconsistent about compression, so trust the magic bytes
/// over the file extension.
fn sniff_body<R: Read>(mut reader: R) -> io::Result<TarballBody<R>> {
    let mut magic = [0u8; 2];
    let mut filled = 0;
    while filled < magic.len() {
        let n = reader.read(&mut magic[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    let replay = io::Cursor::new(magic[..filled].to_vec()).chain(reader);
    if filled == magic.len() && magic == GZIP_MAGIC {
        Ok(TarballBody::Gzipped(GzDecoder::new(replay)))
    } else {
        Ok(TarballBody::Plain(replay))
    }
}
