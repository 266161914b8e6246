//! Warden Control - CLI over the Warden engines.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wardenctl::commands::{self, Context};
use wardenctl::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Quiet by default; RUST_LOG opens it up
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let ctx = Context::load(cli.config.as_deref(), cli.json)?;

    match cli.command {
        Commands::Match { evidence, category } => {
            commands::match_evidence(&ctx, &evidence.join(" "), category.as_deref())
        }
        Commands::Classify { command } => commands::classify(&ctx, &command.join(" ")),
        Commands::Run {
            evidence,
            approve,
            reject,
            dry_run,
        } => commands::run(&ctx, &evidence.join(" "), approve, reject, dry_run).await,
        Commands::Pending => commands::pending(&ctx).await,
        Commands::Approve { id } => commands::approve(&ctx, id).await,
        Commands::Reject { id, reason } => commands::reject(&ctx, id, reason.as_deref()).await,
        Commands::History { signature } => commands::history(&ctx, signature.as_deref()),
        Commands::Predict { signature } => commands::predict(&ctx, &signature),
        Commands::Snapshot => commands::snapshot(&ctx),
        Commands::Trending { days } => commands::trending(&ctx, days),
        Commands::Recommend => commands::recommend(&ctx),
        Commands::Archive { signature } => commands::archive(&ctx, &signature),
        Commands::CheckCatalog { path } => commands::check_catalog(&ctx, path.as_deref()),
    }
}
