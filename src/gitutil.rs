use semver::Version;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::hash;
use crate::queue::BlockingQueue;
use crate::resolver::semver as semver_util;

/// A git remote in the form the `git` binary accepts, which is not always a
/// URL: scp-style `user@host:path` remotes stay in that shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
    pub protocol: String,
    pub hostname: Option<String>,
    pub repository: String,
}

/// Strip the npm-isms (`git+` prefix, ssh scp-shorthand) off a git reference.
pub fn npm_url_to_git_url(input: &str) -> GitUrl {
    let s = input.strip_prefix("git+").unwrap_or(input);

    if let Some(path) = s.strip_prefix("file://").or_else(|| s.strip_prefix("file:")) {
        return GitUrl {
            protocol: "file:".to_string(),
            hostname: None,
            repository: path.to_string(),
        };
    }

    if let Some(rest) = s.strip_prefix("ssh://") {
        // `ssh://git@host:path` with a non-numeric "port" is npm's way of
        // passing scp syntax through a URL field.
        if let Some((authority, path)) = rest.split_once(':') {
            let scp_like = !path.is_empty()
                && !path.starts_with('/')
                && !path.chars().next().is_some_and(|c| c.is_ascii_digit());
            if scp_like {
                let hostname = authority.rsplit('@').next().unwrap_or(authority);
                return GitUrl {
                    protocol: "ssh:".to_string(),
                    hostname: Some(hostname.to_string()),
                    repository: format!("{authority}:{path}"),
                };
            }
        }
    }

    let protocol = s
        .split_once(':')
        .map(|(scheme, _)| format!("{scheme}:"))
        .unwrap_or_else(|| "file:".to_string());
    let hostname = s.split_once("://").and_then(|(_, rest)| {
        let authority = rest.split(['/', '?']).next().unwrap_or(rest);
        let host = authority.rsplit('@').next().unwrap_or(authority);
        let host = host.split(':').next().unwrap_or(host);
        (!host.is_empty()).then(|| host.to_string())
    });
    GitUrl {
        protocol,
        hostname,
        repository: s.to_string(),
    }
}

pub fn is_commit_sha(target: &str) -> bool {
    (5..=40).contains(&target.len()) && target.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

/// Directory name for a repository's local clone under the cache.
pub fn repo_slug(repository: &str) -> String {
    let tail = repository
        .rsplit(['/', ':'])
        .find(|s| !s.is_empty())
        .unwrap_or("repo")
        .trim_end_matches(".git");
    let tail: String = tail
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
            c
        } else {
            '-'
        })
        .collect();
    format!("{}-{}", tail, &hash::sha1_hex(repository.as_bytes())[..10])
}

fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<Vec<u8>> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let out = cmd.output()?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(Error::Message(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }
    Ok(out.stdout)
}

fn run_git_str(args: &[&str], cwd: Option<&Path>) -> Result<String> {
    let out = run_git(args, cwd)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// `git ls-remote` output as a ref-name to sha map. Annotated tags appear
/// twice, plain and with a `^{}` suffix; the peeled line comes second and
/// wins, leaving the commit sha under the tag name.
pub fn parse_refs(stdout: &str) -> BTreeMap<String, String> {
    let mut refs = BTreeMap::new();
    for line in stdout.lines() {
        let mut cols = line.split_whitespace();
        let (Some(sha), Some(name)) = (cols.next(), cols.next()) else {
            continue;
        };
        if !sha.chars().all(|c| c.is_ascii_hexdigit()) || sha.is_empty() {
            continue;
        }
        let known = ["refs/tags/", "refs/heads/", "refs/pull/", "refs/remotes/"]
            .iter()
            .any(|prefix| name.starts_with(prefix));
        if !known {
            continue;
        }
        let name = name.strip_suffix("^{}").unwrap_or(name);
        refs.insert(name.to_string(), sha.to_string());
    }
    refs
}

/// One repository plus the ref the caller asked for. Clone-side operations
/// funnel through the shared queue so concurrent requests for the same repo
/// never race on the clone directory.
pub struct GitClient<'a> {
    queue: &'a BlockingQueue,
    pub git_url: GitUrl,
    requested: String,
    cwd: PathBuf,
    fetched: bool,
}

impl<'a> GitClient<'a> {
    pub fn new(
        config: &Config,
        queue: &'a BlockingQueue,
        git_url: GitUrl,
        requested: Option<&str>,
    ) -> GitClient<'a> {
        let cwd = config.git_dest(&repo_slug(&git_url.repository));
        GitClient {
            queue,
            git_url,
            requested: requested.unwrap_or_default().to_string(),
            cwd,
            fetched: false,
        }
    }

    /// Resolve the requested ref to a full commit sha and make sure the local
    /// clone can serve file reads for it.
    pub fn init(&mut self) -> Result<String> {
        let refs = self.list_refs()?;
        let Some(sha) = self.resolve_version(&refs)? else {
            let known: Vec<&str> = refs.keys().map(String::as_str).collect();
            return Err(Error::Message(format!(
                "Couldn't find match for \"{}\" in \"{}\" for \"{}\"",
                self.requested,
                known.join(","),
                self.git_url.repository
            )));
        };
        self.fetch()?;
        Ok(sha)
    }

    fn list_refs(&self) -> Result<BTreeMap<String, String>> {
        let stdout = run_git_str(
            &["ls-remote", "--tags", "--heads", &self.git_url.repository],
            None,
        )?;
        Ok(parse_refs(&stdout))
    }

    fn resolve_version(&mut self, refs: &BTreeMap<String, String>) -> Result<Option<String>> {
        let version = self.requested.trim().to_string();

        if version.is_empty() {
            return self.resolve_default_branch().map(Some);
        }

        let lower = version.to_ascii_lowercase();
        if is_commit_sha(&lower) {
            for sha in refs.values() {
                if sha.starts_with(&lower) {
                    return Ok(Some(sha.clone()));
                }
            }
            if let Some(sha) = self.resolve_commit(&lower)? {
                return Ok(Some(sha));
            }
        }

        if version.starts_with("refs/") {
            if let Some(sha) = refs.get(&version) {
                return Ok(Some(sha.clone()));
            }
        }
        for prefix in ["refs/tags/", "refs/pull/", "refs/heads/"] {
            if let Some(sha) = refs.get(&format!("{prefix}{version}")) {
                return Ok(Some(sha.clone()));
            }
        }

        let range = version.strip_prefix("semver:").unwrap_or(&version);
        for prefix in ["refs/tags/", "refs/heads/"] {
            if let Some(name) = pick_semver_name(refs, prefix, range) {
                if let Some(sha) = refs.get(&format!("{prefix}{name}")) {
                    return Ok(Some(sha.clone()));
                }
            }
        }

        if version == "*" {
            return self.resolve_default_branch().map(Some);
        }

        if let Some(sha) = refs.get(&format!("refs/{version}")) {
            return Ok(Some(sha.clone()));
        }

        Ok(None)
    }

    fn resolve_default_branch(&self) -> Result<String> {
        let stdout = run_git_str(
            &["ls-remote", "--symref", &self.git_url.repository, "HEAD"],
            None,
        )?;
        for line in stdout.lines() {
            let mut cols = line.split_whitespace();
            if let Some(first) = cols.next() {
                if first != "ref:" && first.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Ok(first.to_string());
                }
            }
        }
        Err(Error::Message(format!(
            "couldn't resolve HEAD for \"{}\"",
            self.git_url.repository
        )))
    }

    /// Expand a short sha to the full 40 characters, so cache paths never
    /// fork on abbreviation length. None when the commit doesn't exist.
    fn resolve_commit(&mut self, sha: &str) -> Result<Option<String>> {
        self.fetch()?;
        let out = run_git_str(
            &[
                "rev-list",
                "-n",
                "1",
                "--no-abbrev-commit",
                "--format=oneline",
                sha,
            ],
            Some(&self.cwd),
        );
        match out {
            Ok(stdout) => Ok(stdout
                .split_whitespace()
                .next()
                .map(|s| s.to_string())),
            Err(_) => Ok(None),
        }
    }

    /// Clone the repository, or refresh an existing clone.
    fn fetch(&mut self) -> Result<()> {
        if self.fetched {
            return Ok(());
        }
        let cwd = self.cwd.clone();
        let repository = self.git_url.repository.clone();
        self.queue.push(&repository, || -> Result<()> {
            if cwd.join(".git").exists() {
                run_git(&["fetch", "--tags"], Some(&cwd))?;
                run_git(&["pull"], Some(&cwd))?;
            } else {
                if let Some(parent) = cwd.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let dest = cwd.to_string_lossy().into_owned();
                run_git(&["clone", &repository, &dest], None)?;
            }
            Ok(())
        })?;
        self.fetched = true;
        Ok(())
    }

    /// Read one file at the resolved commit. None when the file is absent.
    pub fn get_file(&mut self, commit: &str, filename: &str) -> Result<Option<String>> {
        self.fetch()?;
        let spec = format!("{commit}:{filename}");
        match run_git_str(&["show", &spec], Some(&self.cwd)) {
            Ok(contents) => Ok(Some(contents)),
            Err(_) => Ok(None),
        }
    }

    /// Tar archive of the repository tree at the given commit.
    pub fn archive_bytes(&mut self, commit: &str) -> Result<Vec<u8>> {
        self.fetch()?;
        run_git(&["archive", commit], Some(&self.cwd))
    }
}

fn pick_semver_name(
    refs: &BTreeMap<String, String>,
    prefix: &str,
    range: &str,
) -> Option<String> {
    let mut candidates: Vec<(Version, &str)> = Vec::new();
    for name in refs.keys() {
        let Some(short) = name.strip_prefix(prefix) else {
            continue;
        };
        let cleaned = short.strip_prefix('v').unwrap_or(short);
        if let Ok(version) = Version::parse(cleaned) {
            candidates.push((version, short));
        }
    }
    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    candidates
        .into_iter()
        .find(|(version, _)| semver_util::satisfies(version, range))
        .map(|(_, name)| name.to_string())
}
