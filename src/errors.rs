use std::fmt;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Transport-level failure classes we retry on. The display form is what ends
/// up in exhausted-retry error messages, so callers can pattern-match on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Timeout,
    Connect,
    Reset,
    Dns,
    Other,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureClass::Timeout => "TIMEDOUT",
            FailureClass::Connect => "ECONNREFUSED",
            FailureClass::Reset => "ECONNRESET",
            FailureClass::Dns => "ENOTFOUND",
            FailureClass::Other => "ENETWORK",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Content integrity gate tripped: hash mismatch, plain-http tarball
    /// without a pinned hash, or a redirect downgrading to http. Fatal to the
    /// fetch that raised it and never reduced to a warning.
    #[error("security violation: {0}")]
    Security(String),

    /// Expected, user-facing failure. Surfaced verbatim.
    #[error("{0}")]
    Message(String),

    /// Transient network failure that survived every retry attempt.
    #[error(
        "{url}: request failed after {attempts} attempt(s) ({class}); \
         rerunning the install may succeed"
    )]
    Network {
        url: String,
        class: FailureClass,
        attempts: u32,
    },

    /// Non-2xx HTTP response.
    #[error("{url}: Request \"{url}\" returned a {status}")]
    ResponseStatus { url: String, status: u16 },

    /// Offline mode refused to touch the network.
    #[error("Can't make a request in offline mode (\"{0}\")")]
    Offline(String),

    /// Programming-contract violation. Always a bug in the caller, never a
    /// recoverable runtime condition.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// A remote type reached a stage with no strategy for it.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn is_security(&self) -> bool {
        matches!(self, Error::Security(_))
    }

    /// True for failures the request manager may retry: transport-level
    /// drops plus the 408/5xx status family.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network { .. } => true,
            Error::ResponseStatus { status, .. } => *status == 408 || *status >= 500,
            _ => false,
        }
    }
}
