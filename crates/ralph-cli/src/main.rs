//! beads-ralph CLI - autonomous orchestration over the beads tracker
//!
//! Usage:
//!   beads-ralph run               Run the Ralph loop until no ready work remains
//!   beads-ralph ready             Show ready beads, cohorts and agent commands (dry run)
//!   beads-ralph claim <bead-id>   Claim a single bead with the configured retry policy
//!   beads-ralph config            Print the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ralph_agent::ScrumMasterRunner;
use ralph_core::{RalphConfig, RalphError, DEFAULT_CONFIG_FILE};
use ralph_orchestrator::{cohort_names, group_by_cohort, LoopOutcome, RalphLoop};
use ralph_tracker::{find_ready_beads, BdCommand, Claimer};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "beads-ralph")]
#[command(author, version, about = "Autonomous work orchestration over the beads tracker")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Ralph loop until no ready work remains
    Run,

    /// Show ready beads grouped by cohort, without claiming or launching
    Ready,

    /// Claim a single bead
    Claim {
        /// Bead ID to claim
        bead_id: String,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run => cmd_run(config).await,
        Commands::Ready => cmd_ready(config).await,
        Commands::Claim { bead_id } => cmd_claim(config, bead_id).await,
        Commands::Config => cmd_config(config),
    }
}

fn load_config(path: &Path) -> Result<RalphConfig> {
    RalphConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

async fn cmd_run(config: RalphConfig) -> Result<()> {
    info!(
        "Starting beads-ralph for {} ({} parallel session(s), poll interval {:?})",
        config.worktrees.repo_name, config.ralph.max_parallel_sessions, config.ralph.poll_interval
    );

    let tracker = BdCommand::new(config.tracker.executable.clone());
    let runner = ScrumMasterRunner::from_config(&config);
    let ralph = RalphLoop::new(&config, tracker, runner).context("Invalid loop configuration")?;

    let cancel = CancellationToken::new();
    install_shutdown_handler(cancel.clone());

    match ralph.run(&cancel).await {
        Ok(LoopOutcome::Completed { rounds }) => {
            println!("All ready work complete after {} round(s).", rounds);
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            println!("Shutdown complete.");
            Ok(())
        }
        Err(e) => Err(e).context("Ralph loop stopped"),
    }
}

async fn cmd_ready(config: RalphConfig) -> Result<()> {
    let tracker = BdCommand::new(config.tracker.executable.clone());
    let beads = find_ready_beads(&tracker, &config.tracker.work_kinds)
        .await
        .context("Failed to list ready beads")?;

    if beads.is_empty() {
        println!("No ready beads.");
        return Ok(());
    }

    let runner = ScrumMasterRunner::from_config(&config);
    let cohorts = group_by_cohort(beads);
    println!(
        "{} cohort(s): {}\n",
        cohorts.len(),
        cohort_names(&cohorts).join(", ")
    );

    for cohort in &cohorts {
        println!("{} ({} bead(s))", cohort.key, cohort.len());
        for bead in &cohort.beads {
            println!("  {}  {}", bead.id, bead.title);
            let command = runner.command_for(bead);
            if command.is_degenerate() {
                println!("    command: <none, no scrum-master agent>");
            } else {
                println!("    command: {}", command);
            }
        }
    }

    Ok(())
}

async fn cmd_claim(config: RalphConfig, bead_id: String) -> Result<()> {
    let claimer = Claimer::new(BdCommand::new(config.tracker.executable.clone()));
    let cancel = CancellationToken::new();
    install_shutdown_handler(cancel.clone());

    match claimer.claim(&bead_id, &config.claim_config(), &cancel).await {
        Ok(()) => {
            println!("Claimed {}", bead_id);
            Ok(())
        }
        Err(RalphError::AlreadyClaimed) => anyhow::bail!("Bead {} is already claimed", bead_id),
        Err(e) => Err(e).with_context(|| format!("Failed to claim {}", bead_id)),
    }
}

fn cmd_config(config: RalphConfig) -> Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}

/// Cancel the token on SIGINT or SIGTERM
fn install_shutdown_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping in-flight work");
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

