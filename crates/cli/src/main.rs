//! forksync command-line tool.
//!
//! Previews and applies upstream merges into a fork, and publishes the
//! contribution and pinned-overlay review branches.

mod report;
mod signals;
mod style;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use forksync_core::config::MergeStrategy;
use forksync_core::errors::CoreError;
use forksync_core::{ForkSyncConfig, SessionMode, SyncSession};

/// Exit code for an interrupted session.
const EXIT_INTERRUPTED: u8 = 130;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Keep a long-lived fork in sync with its upstream.
#[derive(Parser, Debug)]
#[command(name = "forksync", version)]
struct Cli {
    /// Fork repository root.
    #[arg(short = 'C', long, global = true, default_value = ".")]
    fork: PathBuf,

    /// Configuration file. Defaults to `forksync.toml` in the fork root.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Preview the upstream merge without touching the working copy.
    Check,

    /// Merge upstream into the working copy and apply overrides.
    Sync {
        /// Squash upstream changes instead of a regular merge.
        #[arg(long)]
        squash: bool,
    },

    /// Publish `contrib/<fork-name>` with fork changes on top of upstream.
    Contribute {
        /// Files to publish. Defaults to every drifted file.
        files: Vec<String>,
    },

    /// Publish `upstream/pinned` with upstream's versions of pinned files.
    Pinned,

    /// Validate the configuration and override patterns.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{e:#}")));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli.fork, cli.config.as_deref());
    let level = config
        .as_ref()
        .map(|c| c.session.log_level.as_str())
        .unwrap_or("warn");
    init_logging(level, cli.verbose);
    let mut config = config?;

    if let Commands::Sync { squash: true } = cli.command {
        config.merge.strategy = MergeStrategy::Squash;
    }
    let session = SyncSession::new(&cli.fork, config);

    match cli.command {
        Commands::Check => {
            let Some(result) = interruptible(&session, session.run(SessionMode::DryRun)).await?
            else {
                return Ok(ExitCode::from(EXIT_INTERRUPTED));
            };
            report::print_merge_result(&result, cli.json)?;
            Ok(exit_for(result.success))
        }
        Commands::Sync { .. } => {
            let Some(result) = interruptible(&session, session.run(SessionMode::Apply)).await?
            else {
                return Ok(ExitCode::from(EXIT_INTERRUPTED));
            };
            report::print_merge_result(&result, cli.json)?;
            Ok(exit_for(result.success))
        }
        Commands::Contribute { files } => {
            let files = (!files.is_empty()).then_some(files);
            let Some(report) = interruptible(&session, session.contribute(files)).await? else {
                return Ok(ExitCode::from(EXIT_INTERRUPTED));
            };
            report::print_publish_report(&report, cli.json)?;
            Ok(exit_for(report.success()))
        }
        Commands::Pinned => {
            let Some(report) = interruptible(&session, session.publish_pinned()).await? else {
                return Ok(ExitCode::from(EXIT_INTERRUPTED));
            };
            report::print_publish_report(&report, cli.json)?;
            Ok(exit_for(report.success()))
        }
        Commands::Validate => cmd_validate(&session).await,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_config(fork: &Path, explicit: Option<&Path>) -> Result<ForkSyncConfig> {
    let config = match explicit {
        Some(path) => ForkSyncConfig::load_from_file(path),
        None => ForkSyncConfig::load_from_fork(fork),
    };
    config
        .map_err(CoreError::from)
        .context("failed to load configuration")
}

fn init_logging(level: &str, verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

/// Run `fut` until it finishes or an interrupt arrives. On interrupt the
/// preview worktree, if any, is aborted and removed and `None` is returned.
async fn interruptible<T, E: Into<CoreError>>(
    session: &SyncSession,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<Option<T>> {
    let handle = session.interrupt_handle();
    tokio::select! {
        result = fut => Ok(Some(result.map_err(Into::<CoreError>::into)?)),
        _ = signals::wait_for_shutdown() => {
            match handle.abort_and_remove().await {
                Ok(true) => info!("preview worktree removed"),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "failed to remove preview worktree"),
            }
            eprintln!("{}", style::warn("Interrupted"));
            Ok(None)
        }
    }
}

async fn cmd_validate(session: &SyncSession) -> Result<ExitCode> {
    let config = session.config();
    println!("Validating configuration for {}", session.fork_root().display());
    println!();
    println!("  [OK] Configuration is valid");
    println!("  Upstream      : {} ({})", config.upstream.fetch_url(), config.upstream.tracking_ref());
    println!("  Fork branch   : {}", config.fork.branch);
    println!("  Fork name     : {}", session.fork_name());
    println!("  Strategy      : {}", config.merge.strategy);
    println!("  Contrib remote: {}", config.contrib_remote());
    println!("  Pinned remote : {}", config.pinned_remote());
    println!(
        "  Overrides     : {} ignored, {} pinned",
        config.overrides.ignored.len(),
        config.overrides.pinned.len()
    );
    println!();

    let warnings = session
        .validate_policy()
        .await
        .context("failed to read the fork's files")?;
    report::print_warnings(&warnings);
    Ok(ExitCode::SUCCESS)
}

fn exit_for(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
