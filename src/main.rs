use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use owh::cli::Cli;

fn main() -> Result<()> {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .with_target(false)
        .init();

    owh::run(cli)
}
