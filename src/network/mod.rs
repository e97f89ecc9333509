use parking_lot::Mutex;
use reqwest::blocking::{Client, ClientBuilder, Response};
use reqwest::{header, redirect};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fs;
use std::io::{self, Read};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::errors::{Error, FailureClass, Result};
use crate::queue::{BlockingQueue, QueueGuard};

/// Ask the registry for the abbreviated install document, falling back to the
/// full one for registries that predate it.
const NPM_ACCEPT: &str =
    "application/vnd.npm.install-v1+json; q=1.0, application/json; q=0.8, */*";

const USER_AGENT: &str = concat!("quarry/", env!("CARGO_PKG_VERSION"));

/// Sees every request the manager issues and every response status it gets
/// back. Diagnostics captures (a request log, a HAR-style dump) plug in here
/// without the engine knowing they exist.
pub trait NetworkObserver: Send + Sync {
    fn on_request(&self, url: &str);
    fn on_response(&self, url: &str, status: u16);
}

/// Owns the HTTP clients and every policy around using them: the offline
/// gate, retry-with-delay on transient failures, the global concurrency cap,
/// TLS trust configuration, and per-URL memoization of registry documents.
/// One instance is shared by the whole pipeline.
impl std::fmt::Debug for RequestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestManager")
            .field("offline", &self.offline)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

pub struct RequestManager {
    client: Client,
    strict_client: Client,
    queue: BlockingQueue,
    memo: Mutex<HashMap<String, Arc<Vec<u8>>>>,
    observer: Option<Box<dyn NetworkObserver>>,
    offline: bool,
    max_retry_attempts: u32,
    retry_delay: Duration,
}

impl RequestManager {
    pub fn new(config: &Config) -> Result<RequestManager> {
        let client = base_client(config)?
            .build()
            .map_err(|e| Error::Message(format!("failed to build http client: {e}")))?;
        // Refuses any hop from https down to http. Used for fetches that have
        // no pinned hash to catch tampering after the fact.
        let strict_client = base_client(config)?
            .redirect(redirect::Policy::custom(|attempt| {
                let downgraded = attempt.url().scheme() == "http"
                    && attempt.previous().iter().any(|u| u.scheme() == "https");
                if downgraded {
                    attempt.error("redirect downgrades to http")
                } else if attempt.previous().len() > 10 {
                    attempt.error("too many redirects")
                } else {
                    attempt.follow()
                }
            }))
            .build()
            .map_err(|e| Error::Message(format!("failed to build http client: {e}")))?;
        Ok(RequestManager {
            client,
            strict_client,
            queue: BlockingQueue::new(config.network_concurrency),
            memo: Mutex::new(HashMap::new()),
            observer: None,
            offline: config.offline,
            max_retry_attempts: config.max_retry_attempts.max(1),
            retry_delay: config.retry_delay,
        })
    }

    /// Install a diagnostics observer. Must happen before the manager is
    /// shared with the pipeline.
    pub fn set_observer(&mut self, observer: Box<dyn NetworkObserver>) {
        self.observer = Some(observer);
    }

    /// GET a registry document. Responses are memoized by URL for the life of
    /// the run, and concurrent requests for the same URL collapse into one.
    pub fn request_json(&self, url: &str) -> Result<Arc<Vec<u8>>> {
        self.assert_online(url)?;
        if let Some(hit) = self.memo.lock().get(url).cloned() {
            return Ok(hit);
        }
        self.queue.push(url, || {
            if let Some(hit) = self.memo.lock().get(url).cloned() {
                return Ok(hit);
            }
            let body = self.with_retry(url, || {
                self.notify_request(url);
                let resp = self
                    .client
                    .get(url)
                    .header(header::ACCEPT, NPM_ACCEPT)
                    .send()
                    .map_err(|e| convert(url, e, false))?;
                let status = resp.status();
                self.notify_response(url, status.as_u16());
                if !status.is_success() {
                    return Err(Error::ResponseStatus {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }
                resp.bytes().map_err(|e| convert(url, e, false))
            })?;
            let body = Arc::new(body.to_vec());
            self.memo.lock().insert(url.to_string(), Arc::clone(&body));
            Ok(body)
        })
    }

    /// Open a streaming GET for an artifact body. Not memoized. The returned
    /// stream holds a concurrency slot until it is dropped, so open bodies
    /// count against `network_concurrency` just like buffered requests. With
    /// `hashless` set the strict client is used, which refuses redirects that
    /// downgrade to plain http.
    pub fn stream(&self, url: &str, hashless: bool) -> Result<NetworkStream<'_>> {
        self.assert_online(url)?;
        let slot = self.queue.acquire(url);
        let client = if hashless {
            &self.strict_client
        } else {
            &self.client
        };
        let response = self.with_retry(url, || {
            self.notify_request(url);
            let resp = client
                .get(url)
                .send()
                .map_err(|e| convert(url, e, hashless))?;
            let status = resp.status();
            self.notify_response(url, status.as_u16());
            if !status.is_success() {
                return Err(Error::ResponseStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            Ok(resp)
        })?;
        Ok(NetworkStream {
            response,
            _slot: slot,
        })
    }

    /// Drop all memoized responses. The install orchestrator calls this
    /// between runs so a retried install re-reads the registry.
    pub fn clear_memo(&self) {
        self.memo.lock().clear();
    }

    fn notify_request(&self, url: &str) {
        if let Some(observer) = &self.observer {
            observer.on_request(url);
        }
    }

    fn notify_response(&self, url: &str, status: u16) {
        if let Some(observer) = &self.observer {
            observer.on_response(url, status);
        }
    }

    fn assert_online(&self, url: &str) -> Result<()> {
        let remote = url.starts_with("http://") || url.starts_with("https://");
        if self.offline && remote {
            return Err(Error::Offline(url.to_string()));
        }
        Ok(())
    }

    fn with_retry<T>(&self, url: &str, mut run: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match run() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retry_attempts => {
                    thread::sleep(self.retry_delay);
                }
                Err(Error::Network { url: _, class, .. }) => {
                    return Err(Error::Network {
                        url: url.to_string(),
                        class,
                        attempts: attempt,
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// A response body plus the concurrency slot it occupies. Reading drains the
/// body; dropping it frees the slot for the next request.
pub struct NetworkStream<'a> {
    response: Response,
    _slot: QueueGuard<'a>,
}

impl Read for NetworkStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.response.read(buf)
    }
}

/// Shared client settings: user agent, timeout, and the TLS trust material
/// from the config (extra CA roots for private registries, a client
/// certificate for mutual TLS).
fn base_client(config: &Config) -> Result<ClientBuilder> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(config.network_timeout);
    if let Some(path) = &config.ca_file {
        let pem = fs::read(path).map_err(|e| {
            Error::Message(format!(
                "couldn't read CA bundle \"{}\": {e}",
                path.display()
            ))
        })?;
        let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
            Error::Message(format!("invalid CA bundle \"{}\": {e}", path.display()))
        })?;
        if certs.is_empty() {
            return Err(Error::Message(format!(
                "no certificates found in CA bundle \"{}\"",
                path.display()
            )));
        }
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
    }
    if let Some(path) = &config.client_cert_file {
        let pem = fs::read(path).map_err(|e| {
            Error::Message(format!(
                "couldn't read client certificate \"{}\": {e}",
                path.display()
            ))
        })?;
        let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
            Error::Message(format!(
                "invalid client certificate \"{}\": {e}",
                path.display()
            ))
        })?;
        builder = builder.identity(identity);
    }
    if let Some(proxy) = &config.proxy {
        let proxy = reqwest::Proxy::all(proxy.as_str())
            .map_err(|e| Error::Message(format!("invalid proxy \"{proxy}\": {e}")))?;
        builder = builder.proxy(proxy);
    }
    Ok(builder)
}

fn convert(url: &str, err: reqwest::Error, hashless: bool) -> Error {
    if let Some(class) = transient_class(&err) {
        return Error::Network {
            url: url.to_string(),
            class,
            attempts: 1,
        };
    }
    if hashless && err.is_redirect() {
        return Error::Security(format!(
            "{url}: refusing an insecure redirect while fetching without a pinned hash"
        ));
    }
    Error::Message(format!("{url}: {err}"))
}

fn transient_class(err: &reqwest::Error) -> Option<FailureClass> {
    if err.is_timeout() {
        return Some(FailureClass::Timeout);
    }
    if err.is_connect() {
        if format!("{err:?}").to_ascii_lowercase().contains("dns") {
            return Some(FailureClass::Dns);
        }
        return Some(FailureClass::Connect);
    }
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return match io_err.kind() {
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof => Some(FailureClass::Reset),
                io::ErrorKind::TimedOut => Some(FailureClass::Timeout),
                io::ErrorKind::ConnectionRefused => Some(FailureClass::Connect),
                _ => None,
            };
        }
        source = cause.source();
    }
    None
}
