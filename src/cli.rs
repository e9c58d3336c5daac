//! Command line surface of the `owh` binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::batch::{DEFAULT_CONCURRENCY, run_bounded};
use crate::config::{Config, ENV_SSH_PASSWORD, ENV_SSH_USER, SiteConfig};
use crate::remote::sync::local_entries;
use crate::remote::{
    Connection, RemoteError, RetryPolicy, SyncReport, check_removable, validate_roots,
};

#[derive(Parser, Debug)]
#[command(
    name = "owh",
    version,
    about = "Deploy a local directory to a web hosting account over SSH"
)]
pub struct Cli {
    /// Config file (default: ~/.config/owh/config.toml)
    #[arg(long, global = true, env = "OWH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debug logging unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mirror a directory onto the hosting (removes remote files missing locally)
    Deploy(DeployArgs),
    /// Run a command on the hosting and print its output
    Run(RunArgs),
    /// Delete a site's remote directory and everything in it
    Remove(RemoveArgs),
    /// List the local paths a deploy would upload, without connecting
    Files {
        /// Directory to inspect (default: current directory)
        dir: Option<PathBuf>,
    },
}

/// Which host to talk to: a configured site or explicit flags.
#[derive(Args, Debug, Default)]
pub struct TargetArgs {
    /// Site name from the config file
    #[arg(long, conflicts_with = "host")]
    pub site: Option<String>,

    /// SSH host, for a one-off target not in the config file
    #[arg(long)]
    pub host: Option<String>,

    /// SSH port
    #[arg(long, default_value_t = 22)]
    pub port: u16,

    /// SSH user (or OWH_SSH_USER)
    #[arg(long)]
    pub user: Option<String>,
}

#[derive(Args, Debug)]
pub struct DeployArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Deploy every configured site, several at once
    #[arg(long, conflicts_with_all = ["site", "host", "dest", "dir"])]
    pub all: bool,

    /// Remote destination directory
    #[arg(long)]
    pub dest: Option<String>,

    /// Local directory to deploy
    pub dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Command and arguments, after `--`
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Remote path to delete (default: the site's destination)
    #[arg(long)]
    pub path: Option<String>,

    /// Confirm the deletion
    #[arg(long)]
    pub yes: bool,
}

/// Entry point called by `main` once logging is set up.
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Files { dir } => list_files(dir.as_deref().unwrap_or(Path::new("."))),
        Commands::Deploy(args) => {
            let config = load_config(cli.config.as_deref())?;
            deploy(&config, args)
        }
        Commands::Run(args) => {
            let config = load_config(cli.config.as_deref())?;
            run_remote(&config, args)
        }
        Commands::Remove(args) => {
            let config = load_config(cli.config.as_deref())?;
            remove(&config, args)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path().context("could not determine config directory")?,
    };
    let mut config =
        Config::load(&path).with_context(|| format!("loading {}", path.display()))?;
    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}

/// Pick the site a command applies to.
fn resolve_site(config: &Config, target: &TargetArgs) -> Result<SiteConfig> {
    let mut site = if let Some(host) = &target.host {
        SiteConfig {
            name: host.clone(),
            host: host.clone(),
            port: target.port,
            user: std::env::var(ENV_SSH_USER).unwrap_or_default(),
            password: std::env::var(ENV_SSH_PASSWORD).unwrap_or_default(),
            source: ".".to_string(),
            destination: String::new(),
        }
    } else if let Some(name) = &target.site {
        config.site(name)?.clone()
    } else {
        match config.sites.as_slice() {
            [only] => only.clone(),
            [] => bail!("no site configured; pass --host or add a [[sites]] entry"),
            _ => bail!("several sites configured; pick one with --site"),
        }
    };

    if let Some(user) = &target.user {
        site.user = user.clone();
    }
    check_credentials(&site)?;
    Ok(site)
}

/// Fail early instead of spending every connect attempt on a doomed login.
fn check_credentials(site: &SiteConfig) -> Result<()> {
    if site.user.is_empty() {
        bail!("no SSH user for {}; pass --user or set {ENV_SSH_USER}", site.name);
    }
    if site.password.is_empty() {
        bail!("no SSH password for {}; set {ENV_SSH_PASSWORD}", site.name);
    }
    Ok(())
}

fn deploy(config: &Config, args: DeployArgs) -> Result<()> {
    let policy = config.retry.policy();

    if args.all {
        if config.sites.is_empty() {
            bail!("no site configured");
        }
        for site in &config.sites {
            check_credentials(site)?;
        }
        let sites = config.sites.clone();
        let reports = run_bounded(sites, DEFAULT_CONCURRENCY, |site| {
            deploy_site(&site, &site.source, &site.destination, &policy, None)
                .map(|report| (site.name, report))
        })?;
        for (name, report) in reports {
            print_report(&name, &report);
        }
        return Ok(());
    }

    let mut site = resolve_site(config, &args.target)?;
    if let Some(dir) = &args.dir {
        site.source = dir.to_string_lossy().into_owned();
    }
    if let Some(dest) = args.dest {
        site.destination = dest;
    }

    let spinner = spinner();
    let report = deploy_site(&site, &site.source, &site.destination, &policy, Some(&spinner));
    spinner.finish_and_clear();

    print_report(&site.name, &report?);
    Ok(())
}

/// Connect, sync, disconnect. Preconditions are checked before connecting.
fn deploy_site(
    site: &SiteConfig,
    source: &str,
    destination: &str,
    policy: &RetryPolicy,
    progress: Option<&ProgressBar>,
) -> Result<SyncReport> {
    validate_roots(source, destination)?;
    if !Path::new(source).is_dir() {
        bail!("{source} is not a directory");
    }

    if let Some(pb) = progress {
        pb.set_message(format!("Connecting to {}", site.host));
    }
    let conn = Connection::connect(site.params(), policy)
        .with_context(|| format!("failed to connect to {}", site.name))?;

    if let Some(pb) = progress {
        pb.set_message(format!("Deploying {source} to {destination}"));
    }
    let report = conn
        .sync(source, destination)
        .with_context(|| format!("failed to upload files to {}", site.name))?;

    if let Err(e) = conn.close() {
        tracing::debug!(error = %e, "error while closing session");
    }
    Ok(report)
}

fn run_remote(config: &Config, args: RunArgs) -> Result<()> {
    let site = resolve_site(config, &args.target)?;
    let command = shell_words::join(&args.command);

    let conn = Connection::connect(site.params(), &config.retry.policy())
        .with_context(|| format!("failed to connect to {}", site.name))?;

    let result = conn.run(&command);
    if let Err(e) = conn.close() {
        tracing::debug!(error = %e, "error while closing session");
    }

    match result {
        Ok(output) => {
            print!("{output}");
            Ok(())
        }
        Err(RemoteError::Command { status, output, .. }) => {
            eprint!("{output}");
            bail!("remote command exited with status {status}")
        }
        Err(e) => Err(e.into()),
    }
}

fn remove(config: &Config, args: RemoveArgs) -> Result<()> {
    let site = resolve_site(config, &args.target)?;
    let path = args.path.unwrap_or_else(|| site.destination.clone());
    check_removable(&path)?;
    if !args.yes {
        bail!(
            "this deletes {path} and everything under it on {}; pass --yes to confirm",
            site.host
        );
    }

    let conn = Connection::connect(site.params(), &config.retry.policy())
        .with_context(|| format!("failed to connect to {}", site.name))?;
    let result = conn
        .force_remove(&path)
        .with_context(|| format!("failed to remove {path} on {}", site.name));
    if let Err(e) = conn.close() {
        tracing::debug!(error = %e, "error while closing session");
    }
    result?;

    println!("{} {} removed from {}", "✓".green(), path, site.name.bold());
    Ok(())
}

fn list_files(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    for item in local_entries(dir, |_| {}) {
        let (rel, entry) = item?;
        if entry.file_type().is_dir() {
            println!("{rel}/");
        } else {
            println!("{rel}");
        }
    }
    Ok(())
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn print_report(name: &str, report: &SyncReport) {
    if report.is_noop() {
        println!("{} {} already up to date", "✓".green(), name.bold());
        return;
    }
    println!(
        "{} {} deployed: {} uploaded ({} bytes), {} removed, {} unchanged in {} ms",
        "✓".green(),
        name.bold(),
        report.files_uploaded,
        report.bytes_uploaded,
        report.entries_removed,
        report.files_unchanged,
        report.duration_ms
    );
}
