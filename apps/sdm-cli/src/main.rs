//! # sdm-cli
//!
//! Command-line interface for the software delivery machine.
//!
//! Works against a local checkout:
//! - `sdm evaluate` — run the default delivery rules for a push and print the evaluation
//! - `sdm fingerprint list/check` — extract fingerprints, compare them with targets
//! - `sdm target set/list/remove` — manage the target baseline
//! - `sdm reports` — read back the report log
//!
//! Output on stdout is JSON; logs go to stderr.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::Context;

/// Software delivery machine CLI.
#[derive(Parser)]
#[command(name = "sdm", version, about)]
struct Cli {
    /// Project checkout to work on (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Delivery config file (defaults to <project-root>/.sdm/delivery.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where targets, previous fingerprints and reports are kept
    /// (defaults to the project root).
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Repository slug, `owner/name` (defaults to `local/<directory name>`).
    #[arg(long)]
    repo: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a push against the checkout.
    Evaluate {
        /// Pushed branch.
        #[arg(long, default_value = "main")]
        branch: String,
        /// The repository's default branch.
        #[arg(long, default_value = "main")]
        default_branch: String,
        /// Pushed commit.
        #[arg(long, default_value = "local")]
        sha: String,
        /// Files changed by the push (repeatable). Unknown when omitted.
        #[arg(long = "changed")]
        changed: Vec<String>,
        /// Show the selected rule and goals without running anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Extract and compare fingerprints.
    Fingerprint {
        #[command(subcommand)]
        command: commands::fingerprint::FingerprintCommands,
    },
    /// Manage target fingerprints.
    Target {
        #[command(subcommand)]
        command: commands::target::TargetCommands,
    },
    /// Print records from the report log.
    Reports {
        /// Only the last N records.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("sdm_goal=info".parse()?)
                .add_directive("sdm_delivery=info".parse()?)
                .add_directive("sdm_fingerprint=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let project_root = cli.project_root.canonicalize()?;
    let ctx = Context::resolve(
        project_root,
        cli.config.as_deref(),
        cli.state_dir.as_deref(),
        cli.repo.as_deref(),
    )?;

    match &cli.command {
        Commands::Evaluate {
            branch,
            default_branch,
            sha,
            changed,
            dry_run,
        } => {
            commands::evaluate::execute(&ctx, branch, default_branch, sha, changed, *dry_run).await
        }
        Commands::Fingerprint { command } => commands::fingerprint::execute(command, &ctx),
        Commands::Target { command } => commands::target::execute(command, &ctx),
        Commands::Reports { limit } => commands::reports::execute(&ctx, *limit),
    }
}
