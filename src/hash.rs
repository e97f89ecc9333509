use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::io::{self, Read};

/// Digests the engine produces. Sha1 matches registry shasums; Sha256 covers
/// derived keys and fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

/// One-shot hex digest of `bytes`.
pub fn hash_hex(bytes: &[u8], algorithm: HashAlgorithm) -> String {
    match algorithm {
        HashAlgorithm::Sha1 => hex::encode(Sha1::digest(bytes)),
        HashAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
    }
}

pub fn sha1_hex(bytes: &[u8]) -> String {
    hash_hex(bytes, HashAlgorithm::Sha1)
}

/// Reader adapter that hashes every byte that passes through it. Sits between
/// the network body and the decompressor, so the digest always covers the raw
/// artifact bytes no matter what the downstream pipeline does to them.
pub struct HashReader<R> {
    inner: R,
    hasher: Sha1,
}

impl<R: Read> HashReader<R> {
    pub fn new(inner: R) -> HashReader<R> {
        HashReader {
            inner,
            hasher: Sha1::new(),
        }
    }

    /// Digest of the bytes read so far.
    pub fn hex(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }

    /// Whether the bytes read so far digest to `expected` (hex, case
    /// insensitive).
    pub fn matches(&self, expected: &str) -> bool {
        self.hex().eq_ignore_ascii_case(expected)
    }
}

impl<R: Read> Read for HashReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}
