//! `codex-observe-dir`: watch a directory and report changes to its files.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use codex_observable_directory::{EntryChange, ObservableDirectory, SessionConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "codex-observe-dir", about = "Watch a directory and report changes to its files")]
struct Cli {
    /// Directory to watch.
    dir: PathBuf,

    /// Apply changes on the OS delivery thread instead of the main task.
    #[arg(long)]
    inline: bool,

    /// JSON file with session settings.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the initial entries and every change as JSON lines on stdout.
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if cli.inline {
        config = config.inline();
    }

    let mut dir = ObservableDirectory::builder(&cli.dir)
        .config(config)
        .open()
        .with_context(|| format!("failed to watch {}", cli.dir.display()))?;

    for entry in dir.entries().snapshot() {
        if cli.json {
            println!("{}", serde_json::to_string(&entry)?);
        } else {
            info!(path = %entry.path().display(), "existing");
        }
    }

    let json = cli.json;
    dir.entries().subscribe(move |change| report(change, json));

    tokio::signal::ctrl_c().await?;
    dir.close()?;
    Ok(())
}

fn report(change: &EntryChange, json: bool) {
    if json {
        match serde_json::to_string(change) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Failed to serialize change: {e}"),
        }
        return;
    }

    match change {
        EntryChange::Added { index, entry } => {
            info!(index, path = %entry.path().display(), "added");
        }
        EntryChange::Removed { index, entry } => {
            info!(index, path = %entry.path().display(), "removed");
        }
        EntryChange::Updated {
            index,
            field,
            entry,
        } => {
            info!(
                index,
                ?field,
                path = %entry.path().display(),
                changes = entry.change_count(),
                "updated"
            );
        }
    }
}
