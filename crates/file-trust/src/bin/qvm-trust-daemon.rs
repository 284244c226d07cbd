//! qvm-trust-daemon - keep files in untrusted folders marked untrusted

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use file_trust::{TrustMutator, TrustSettings, TrustWatcher};

/// Mark every file that lands in an untrusted folder as untrusted
#[derive(Parser)]
#[command(name = "qvm-trust-daemon")]
#[command(version)]
#[command(about = "Mark every file that lands in an untrusted folder as untrusted")]
struct Cli {
    /// Sweep the untrusted folders once and exit
    #[arg(long)]
    once: bool,

    /// Settings file to use instead of ~/.config/qubes/file-trust.yaml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => TrustSettings::load_from(path)?,
        None => TrustSettings::load()?,
    };
    let watcher = TrustWatcher::new(TrustMutator::new(settings));

    if cli.once {
        let summary = watcher.sweep_once();
        if summary.failed > 0 {
            anyhow::bail!("{} file(s) could not be marked", summary.failed);
        }
        return Ok(());
    }

    info!("Starting trust daemon");
    watcher.run()
}
