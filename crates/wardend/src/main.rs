//! Warden Daemon - signature detection and gated remediation
//!
//! Reads evidence lines from stdin, runs SAFE remediations straight away and
//! queues everything else for an operator in the pending journal, where
//! `wardenctl approve` and `wardenctl reject` pick it up.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wardend::config::Config;
use wardend::watcher::{self, CatalogWatcher};
use wardend::{RemediationState, Warden};

/// How often queued requests are re-read from the journal
const PENDING_SYNC_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "wardend")]
#[command(about = "Warden daemon - detects known failures and gates their remediation", long_about = None)]
#[command(version)]
struct Args {
    /// Config file (default: /etc/warden/config.toml, then /var/lib/warden/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the catalog path from the config
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Override catalog watching from the config
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load_with(args.config.as_deref())?;
    if let Some(catalog) = args.catalog {
        config.catalog.path = catalog;
    }
    if args.watch {
        config.daemon.watch_catalog = true;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.daemon.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Warden Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let warden = Arc::new(Warden::from_config(&config)?);

    // Keep the watcher alive for the life of the process
    let _watcher = if config.daemon.watch_catalog {
        let (tx, rx) = mpsc::unbounded_channel();
        let w = CatalogWatcher::new(&config.catalog.path, tx)?;
        tokio::spawn(watcher::reload_loop(Arc::clone(&warden), rx));
        Some(w)
    } else {
        None
    };

    info!("Warden Daemon ready, reading evidence from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending_tick = tokio::time::interval(PENDING_SYNC_INTERVAL);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim().is_empty() => continue,
                    Some(line) => handle_line(&warden, &line).await,
                    None => {
                        info!("Evidence stream closed");
                        break;
                    }
                }
            }
            _ = pending_tick.tick() => {
                let pending = warden.pending().await;
                if !pending.is_empty() {
                    info!("{} request(s) awaiting approval", pending.len());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down gracefully");
                break;
            }
        }
    }

    let pending = warden.pending().await;
    if !pending.is_empty() {
        warn!(
            "{} request(s) still awaiting approval, kept in {}",
            pending.len(),
            config.executor.pending_path.display()
        );
    }
    warden.history().flush()?;
    Ok(())
}

async fn handle_line(warden: &Warden, line: &str) {
    match warden.process_evidence(line).await {
        Ok(None) => {}
        Ok(Some(request)) => match request.state {
            RemediationState::AwaitingApproval => info!(
                "Queued {} for approval: {} ({})",
                request.id,
                request.pattern_id,
                request.blocked_reason.as_deref().unwrap_or("needs review")
            ),
            state => info!("{} for {} finished {}", request.id, request.pattern_id, state),
        },
        Err(e) => error!("Evidence handling failed [{}]: {}", e.kind(), e),
    }
}
