use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

use commands::install::InstallOptions;
use commands::DepTarget;

#[derive(Parser, Debug)]
#[command(
    name = "quarry",
    version,
    about = "Deterministic, cache-first JavaScript package manager",
    long_about = "quarry — a deterministic, cache-first package manager.\n\nExamples:\n  quarry init --name my-app\n  quarry install\n  quarry add left-pad --exact\n  quarry check\n  quarry cache path"
)]
pub struct QuarryCli {
    #[command(subcommand)]
    pub(crate) command: Option<Commands>,
}

/// Flags shared by every command that drives the engine.
#[derive(Args, Debug, Clone, Default)]
pub struct EngineFlags {
    /// Never touch the network; fail when something isn't cached
    #[arg(long)]
    pub offline: bool,
    /// Use satisfying cached packages before asking the registry
    #[arg(long)]
    pub prefer_offline: bool,
    /// Skip devDependencies
    #[arg(long)]
    pub production: bool,
    /// Require a single version per package name
    #[arg(long)]
    pub flat: bool,
    /// Install packages even when their os/cpu constraints don't match
    #[arg(long)]
    pub ignore_platform: bool,
    /// Disable the transient progress line
    #[arg(long)]
    pub no_progress: bool,
    /// Symlink file: dependencies instead of copying them
    #[arg(long)]
    pub link_file_dependencies: bool,
    /// Registry base URL
    #[arg(long, value_name = "URL")]
    pub registry: Option<String>,
    /// Parallel network requests
    #[arg(long, value_name = "N")]
    pub network_concurrency: Option<usize>,
    /// Network timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub network_timeout: Option<u64>,
    /// Offline mirror directory for remote tarballs
    #[arg(long, value_name = "DIR")]
    pub mirror: Option<PathBuf>,
    /// Extra CA certificates (PEM bundle) to trust for registry TLS
    #[arg(long, value_name = "FILE")]
    pub cafile: Option<PathBuf>,
    /// Client certificate and key (PEM) for mutual TLS
    #[arg(long, value_name = "FILE")]
    pub client_cert: Option<PathBuf>,
    /// Proxy URL for all requests
    #[arg(long, value_name = "URL")]
    pub proxy: Option<String>,
}

impl EngineFlags {
    /// Turn the parsed flags into an engine config rooted at `cwd`.
    pub fn to_config(&self, cwd: PathBuf) -> crate::config::Config {
        let mut config = crate::config::Config::new(cwd);
        config.offline = self.offline;
        config.prefer_offline = self.prefer_offline;
        config.production = self.production;
        config.flat = self.flat;
        config.ignore_platform = self.ignore_platform;
        config.link_file_dependencies = self.link_file_dependencies;
        if let Some(registry) = &self.registry {
            config.registry = registry.trim_end_matches('/').to_string();
        }
        if let Some(n) = self.network_concurrency {
            config.network_concurrency = n.max(1);
        }
        if let Some(secs) = self.network_timeout {
            config.network_timeout = std::time::Duration::from_secs(secs.max(1));
        }
        if let Some(mirror) = &self.mirror {
            config.offline_mirror = Some(mirror.clone());
        }
        if let Some(cafile) = &self.cafile {
            config.ca_file = Some(cafile.clone());
        }
        if let Some(cert) = &self.client_cert {
            config.client_cert_file = Some(cert.clone());
        }
        if let Some(proxy) = &self.proxy {
            config.proxy = Some(proxy.clone());
        }
        config
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new package.json
    Init {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        version: Option<String>,
    },
    /// Install all dependencies, or add specific packages first
    #[command(alias = "i")]
    Install {
        /// Package specs to add to package.json (name, name@range, URL, path)
        packages: Vec<String>,
        /// Save added packages under devDependencies
        #[arg(long, short = 'D')]
        dev: bool,
        /// Save added packages under optionalDependencies
        #[arg(long)]
        optional: bool,
        /// Pin added packages to their exact resolved version
        #[arg(long)]
        exact: bool,
        #[command(flatten)]
        flags: EngineFlags,
    },
    /// Add one or more packages (alias for install <spec..>)
    Add {
        #[arg(required = true)]
        packages: Vec<String>,
        #[arg(long, short = 'D')]
        dev: bool,
        #[arg(long)]
        optional: bool,
        #[arg(long)]
        exact: bool,
        #[command(flatten)]
        flags: EngineFlags,
    },
    /// Verify the installed tree against the lockfile without touching the network
    Check {
        #[command(flatten)]
        flags: EngineFlags,
    },
    /// Inspect or clear the content cache
    Cache {
        #[command(subcommand)]
        cmd: CacheCmd,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheCmd {
    /// Show the cache path on this machine
    Path,
    /// Remove every cached package
    Clean,
}

impl QuarryCli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn run(&self) -> Result<()> {
        match &self.command {
            None => {
                self.print_help();
                Ok(())
            }
            Some(Commands::Init { name, version }) => {
                commands::cmd_init(name.clone(), version.clone())
            }
            Some(Commands::Install {
                packages,
                dev,
                optional,
                exact,
                flags,
            })
            | Some(Commands::Add {
                packages,
                dev,
                optional,
                exact,
                flags,
            }) => commands::cmd_install(InstallOptions {
                packages: packages.clone(),
                target: DepTarget::from_flags(*dev, *optional),
                exact: *exact,
                flags: flags.clone(),
            }),
            Some(Commands::Check { flags }) => commands::cmd_check(flags.clone()),
            Some(Commands::Cache { cmd }) => match cmd {
                CacheCmd::Path => commands::cmd_cache_path(),
                CacheCmd::Clean => commands::cmd_cache_clean(),
            },
        }
    }

    fn print_help(&self) {
        use clap::CommandFactory;
        QuarryCli::command().print_help().ok();
        println!();
    }
}
