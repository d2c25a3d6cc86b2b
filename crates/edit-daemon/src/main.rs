//! edit-daemon: stages remote Nuxeo documents for local editing and uploads
//! the changes back while running.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use edit_core::{EditWorker, FileLauncher, SidecarTags, WorkerState};
use edit_daemon::{
    default_config_dir, open_protocol_url, Config, LogOnlyLauncher, SystemLauncher,
};

#[derive(Parser, Debug)]
#[command(name = "edit-daemon")]
#[command(about = "Edit remote Nuxeo documents with local applications")]
struct Args {
    /// Directory holding config.json
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Log staged files instead of opening them
    #[arg(long)]
    no_open: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// nxdrive://edit/... URLs to open at start; more are read from stdin
    urls: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,edit_daemon=debug,edit_core=debug"
    } else {
        "info,edit_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting edit-daemon");
    let config_dir = args.config_dir.unwrap_or_else(default_config_dir);
    let config = Config::load(&config_dir)?;
    info!("Staging folder: {:?}", config.staging_dir);

    let tags = SidecarTags::open(&config.tags_file)
        .with_context(|| format!("Failed to open tag index {:?}", config.tags_file))?;
    let registry = config.build_registry()?;
    if registry.is_empty() {
        warn!("No engine configured in {:?}, every edit request will be ignored", config_dir);
    }
    let launcher: Arc<dyn FileLauncher> = if args.no_open {
        Arc::new(LogOnlyLauncher)
    } else {
        Arc::new(SystemLauncher)
    };

    let mut worker = EditWorker::new(
        config.worker_config(),
        Arc::new(registry),
        Arc::new(tags),
        launcher,
    );
    let fetcher = worker.fetcher();
    let mut states = worker.subscribe();

    let token = CancellationToken::new();
    let run_token = token.clone();
    let mut handle = tokio::spawn(async move { worker.run(run_token).await });

    // Staging before the tree is reset would be wiped by the cleanup
    let started = tokio::select! {
        state = states.wait_for(|s| *s != WorkerState::Created) => {
            state.map(|s| *s == WorkerState::Running).unwrap_or(false)
        }
        _ = tokio::signal::ctrl_c() => false,
    };
    if !started {
        token.cancel();
        return finish(handle.await.context("Edit worker panicked")?);
    }

    for url in &args.urls {
        let fetcher = Arc::clone(&fetcher);
        let url = url.clone();
        tokio::spawn(async move { open_protocol_url(&fetcher, &url).await });
    }

    info!("Daemon running. Paste edit URLs on stdin, press Ctrl+C to stop.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let result = loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if !line.trim().is_empty() => {
                        let fetcher = Arc::clone(&fetcher);
                        tokio::spawn(async move { open_protocol_url(&fetcher, &line).await });
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        debug!("Stdin closed");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }

            result = &mut handle => {
                break result.context("Edit worker panicked")?;
            }

            // Handle graceful shutdown; the worker arm reports the exit
            _ = tokio::signal::ctrl_c(), if !token.is_cancelled() => {
                info!("Shutdown signal received");
                token.cancel();
            }
        }
    };

    finish(result)
}

/// Cancellation is the normal way out; anything else is reported.
fn finish(result: edit_core::Result<()>) -> Result<()> {
    match result {
        Err(e) if !e.is_cancelled() => Err(e).context("Edit worker failed"),
        _ => {
            info!("Shutting down");
            Ok(())
        }
    }
}
