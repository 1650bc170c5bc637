//! Binary entry point.

use anyhow::Result;
use clap::Parser;

use rtc::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Status goes to stderr through the logger; --quiet keeps errors only.
    let default_filter = if cli.quiet { "error" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    cli::run(cli).await
}
