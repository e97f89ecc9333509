use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::fetcher::FetchCtx;
use crate::lockfile::Lockfile;
use crate::network::RequestManager;
use crate::queue::BlockingQueue;
use crate::reporter::NullReporter;
use crate::resolver::ResolveCtx;

/// Config rooted in a test sandbox: project under `<root>/project`, cache
/// under `<root>/cache`, registry pointing at a closed port so accidental
/// network use fails fast instead of leaving the sandbox.
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::new(root.join("project"));
    fs::create_dir_all(&config.cwd).expect("create project dir");
    config.cache_dir = root.join("cache");
    config.registry = "http://127.0.0.1:1".to_string();
    config.network_timeout = Duration::from_millis(500);
    config.max_retry_attempts = 1;
    config.retry_delay = Duration::from_millis(1);
    config
}

pub fn write_project_manifest(config: &Config, manifest: &Value) {
    let data = serde_json::to_string_pretty(manifest).expect("serialize manifest");
    fs::write(config.cwd.join("package.json"), data).expect("write package.json");
}

/// Owns everything a `ResolveCtx`/`FetchCtx` borrows, so tests can drive the
/// engine without going through the CLI.
pub struct TestEngine {
    pub config: Config,
    pub requests: RequestManager,
    pub lockfile: Lockfile,
    pub reporter: NullReporter,
    pub dest_queue: BlockingQueue,
    pub git_queue: BlockingQueue,
}

impl TestEngine {
    pub fn new(config: Config) -> TestEngine {
        let requests = RequestManager::new(&config).expect("build request manager");
        TestEngine {
            config,
            requests,
            lockfile: Lockfile::default(),
            reporter: NullReporter,
            dest_queue: BlockingQueue::new(8),
            git_queue: BlockingQueue::new(8),
        }
    }

    pub fn ctx(&self) -> ResolveCtx<'_> {
        ResolveCtx {
            config: &self.config,
            requests: &self.requests,
            lockfile: &self.lockfile,
            reporter: &self.reporter,
            git_queue: &self.git_queue,
            dest_queue: &self.dest_queue,
        }
    }

    pub fn fetch_ctx(&self) -> FetchCtx<'_> {
        self.ctx().fetch_ctx()
    }
}

/// Captures warnings so tests can assert on what the engine reported.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub warnings: Mutex<Vec<String>>,
}

impl crate::reporter::Reporter for RecordingReporter {
    fn step(&self, _current: usize, _total: usize, _message: &str) {}
    fn progress(&self, _kind: &str, _detail: &str) {}
    fn log(&self, _message: &str) {}
    fn success(&self, _message: &str) {}
    fn warn(&self, message: &str) {
        self.warnings
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(message.to_string());
    }
    fn error(&self, _message: &str) {}
    fn finish(&self) {}
}

#[derive(Debug, Clone)]
pub enum MockResponse {
    Json(String),
    Bytes(Vec<u8>),
    Status(u16),
    /// Accept the connection and never answer, to trip client timeouts.
    Hang,
    /// Fail with a 503 on the first hit for this path, then serve the body.
    FlakyJson(String),
}

/// Minimal single-purpose HTTP server. One connection per request
/// (`Connection: close`), so the hit counter counts requests.
pub struct MockServer {
    pub url: String,
    hits: Arc<AtomicUsize>,
}

impl MockServer {
    pub fn start(routes: Vec<(String, MockResponse)>) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let addr = listener.local_addr().expect("mock server addr");
        let hits = Arc::new(AtomicUsize::new(0));
        let seen: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
        let routes = Arc::new(routes);

        let thread_hits = Arc::clone(&hits);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                thread_hits.fetch_add(1, Ordering::SeqCst);
                let routes = Arc::clone(&routes);
                let seen = Arc::clone(&seen);
                thread::spawn(move || serve_one(stream, &routes, &seen));
            }
        });

        MockServer {
            url: format!("http://{addr}"),
            hits,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn serve_one(
    mut stream: TcpStream,
    routes: &[(String, MockResponse)],
    seen: &Mutex<HashMap<String, usize>>,
) {
    let Some(path) = read_request_path(&mut stream) else {
        return;
    };
    let response = routes
        .iter()
        .find(|(route, _)| *route == path)
        .map(|(_, r)| r.clone())
        .unwrap_or(MockResponse::Status(404));

    match response {
        MockResponse::Json(body) => {
            write_response(&mut stream, 200, "application/json", body.as_bytes());
        }
        MockResponse::Bytes(body) => {
            write_response(&mut stream, 200, "application/octet-stream", &body);
        }
        MockResponse::Status(code) => {
            write_response(&mut stream, code, "text/plain", b"");
        }
        MockResponse::Hang => {
            thread::sleep(Duration::from_secs(10));
        }
        MockResponse::FlakyJson(body) => {
            let mut seen = seen.lock().unwrap_or_else(|p| p.into_inner());
            let count = seen.entry(path).or_insert(0);
            *count += 1;
            if *count == 1 {
                write_response(&mut stream, 503, "text/plain", b"try again");
            } else {
                write_response(&mut stream, 200, "application/json", body.as_bytes());
            }
        }
    }
}

fn read_request_path(stream: &mut TcpStream) -> Option<String> {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .ok()?;
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") && buf.len() < 64 * 1024 {
        match stream.read(&mut byte) {
            Ok(0) | Err(_) => break,
            Ok(_) => buf.push(byte[0]),
        }
    }
    let head = String::from_utf8_lossy(&buf);
    let request_line = head.lines().next()?;
    request_line.split_whitespace().nth(1).map(str::to_string)
}

fn write_response(stream: &mut TcpStream, status: u16, content_type: &str, body: &[u8]) {
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Error",
    };
    let head = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
    let _ = stream.flush();
}

/// In-memory tar with every entry under a `package/` root, matching how
/// registries publish.
pub fn plain_tarball(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("package/{path}"), contents.as_bytes())
            .expect("append tar entry");
    }
    builder.into_inner().expect("finish tar")
}

pub fn gz_tarball(files: &[(&str, &str)]) -> Vec<u8> {
    let tar = plain_tarball(files);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).expect("gzip tar");
    encoder.finish().expect("finish gzip")
}

/// One `versions` entry of a registry metadata document. Tests mutate the
/// returned value to add dependency maps or platform constraints.
pub fn version_entry(name: &str, version: &str, tarball: &str, shasum: &str) -> Value {
    json!({
        "name": name,
        "version": version,
        "dist": { "tarball": tarball, "shasum": shasum }
    })
}

/// Registry metadata document with `latest` pointing at the last entry.
pub fn registry_doc(name: &str, versions: Vec<Value>) -> String {
    let mut map = serde_json::Map::new();
    let mut latest = String::new();
    for entry in versions {
        let version = entry["version"].as_str().expect("version field").to_string();
        map.insert(version.clone(), entry);
        latest = version;
    }
    json!({
        "name": name,
        "versions": map,
        "dist-tags": { "latest": latest }
    })
    .to_string()
}
