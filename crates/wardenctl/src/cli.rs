//! Command-line definition for wardenctl.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Version embedded at build time
pub const VERSION: &str = env!("WARDEN_VERSION");

#[derive(Debug, Parser)]
#[command(name = "wardenctl")]
#[command(about = "Warden control - match evidence, gate remediation, inspect history", long_about = None)]
#[command(version = VERSION)]
pub struct Cli {
    /// Config file (default: /etc/warden/config.toml, then /var/lib/warden/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Score evidence against the pattern catalog
    Match {
        /// Evidence text (log lines, error messages, a question)
        #[arg(required = true)]
        evidence: Vec<String>,

        /// Restrict to one category (ubuntu_os, kubernetes, glusterfs)
        #[arg(long)]
        category: Option<String>,
    },

    /// Rate a command SAFE / MEDIUM / HIGH
    Classify {
        #[arg(required = true)]
        command: Vec<String>,
    },

    /// Match evidence and remediate the best match
    Run {
        #[arg(required = true)]
        evidence: Vec<String>,

        /// Approve a remediation that needs sign-off
        #[arg(long, conflicts_with = "reject")]
        approve: bool,

        /// Turn the remediation down, with a reason
        #[arg(long)]
        reject: Option<String>,

        /// Simulate every command instead of running it
        #[arg(long)]
        dry_run: bool,
    },

    /// List remediations waiting for sign-off
    Pending,

    /// Approve a queued remediation and run it
    Approve {
        id: Uuid,
    },

    /// Turn a queued remediation down
    Reject {
        id: Uuid,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Show recorded history (all signatures, or one)
    History {
        signature: Option<String>,
    },

    /// Rank likely root causes for a signature
    Predict {
        signature: String,
    },

    /// Show learning analytics
    Snapshot,

    /// Issues with recent activity
    Trending {
        /// Window in days
        #[arg(long, default_value_t = 7)]
        days: i64,
    },

    /// Proactive recommendations from trends and success rates
    Recommend,

    /// Hide a signature from analytics (kept on disk)
    Archive {
        signature: String,
    },

    /// Validate a catalog file without installing it
    CheckCatalog {
        /// Catalog path (default: the configured one)
        path: Option<PathBuf>,
    },
}
