//! dirwatch: watch a directory tree and print what changes.
//!
//! Thin binary entry point. All watching logic lives in `dirwatch-core`;
//! this file only parses arguments, wires logging, and prints records.

mod output;

use anyhow::Context;
use clap::Parser;
use dirwatch_core::{WatchConfig, WatcherHandle};
use output::{Output, OutputFormat};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "dirwatch",
    version,
    about = "Watch a directory tree and print created, modified and deleted files"
)]
struct Args {
    /// Directory to watch.
    path: PathBuf,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// JSON watcher config; command-line flags override it.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Pause between retries after a failed read.
    #[arg(long, value_name = "MS")]
    retry_delay_ms: Option<u64>,

    /// Give up after this many consecutive failed reads (default: never).
    #[arg(long, value_name = "N")]
    max_retries: Option<u32>,

    /// Ignore changes to files with this extension. Repeatable.
    #[arg(long = "exclude", value_name = "EXT")]
    exclude: Vec<String>,

    /// Watch only the top-level directory.
    #[arg(long)]
    no_recursive: bool,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn watch_config(&self) -> anyhow::Result<WatchConfig> {
        let mut config = match &self.config {
            Some(path) => WatchConfig::from_json_file(path)?,
            None => WatchConfig::default(),
        };
        if let Some(ms) = self.retry_delay_ms {
            config.backoff.retry_delay_ms = ms;
        }
        if self.max_retries.is_some() {
            config.backoff.max_attempts = self.max_retries;
        }
        if self.no_recursive {
            config.recursive = false;
        }
        config.excluded_extensions.extend(self.exclude.iter().cloned());
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialise structured logging on stderr so stdout stays machine-readable.
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = args.watch_config()?;
    tracing::debug!("config: {:?}", config);

    let (record_tx, record_rx) = crossbeam_channel::unbounded();
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("failed to install Ctrl-C handler")?;

    let watcher = WatcherHandle::with_config(config);
    watcher
        .start(&args.path, record_tx)
        .with_context(|| format!("cannot watch {}", args.path.display()))?;

    let mut out = Output::stdout(args.format);
    loop {
        crossbeam_channel::select! {
            recv(record_rx) -> record => match record {
                Ok(record) => out.write(&record)?,
                // The loop drops its sink when it exits, including after
                // exhausting its retries.
                Err(_) => {
                    tracing::error!("watcher stopped in state {:?}", watcher.state());
                    break;
                }
            },
            recv(shutdown_rx) -> _ => break,
        }
    }

    watcher.stop();
    out.finish()?;
    tracing::info!("dirwatch exiting");
    Ok(())
}
