/// CLI glue for am-automate: argument parsing, subcommand routing, and wiring the
/// loaded config into the core crate.
///
/// All workflow logic (scanning, transfer lifecycle, unit tracking) lives in
/// `am-automate-core`. This module only opens resources, calls into the core, and
/// prints results for operators and cron jobs.
///
/// ## Subcommands
/// - `run`: take the pid lock, open the unit store and drive the workflow. With
///   `--once` a single tick runs and its outcome is printed, which suits cron.
/// - `status`: print the current unit and the number of completed sources.
use am_automate_core::contract::Unit;
use am_automate_core::lock::PidLock;
use am_automate_core::store::UnitStore;
use am_automate_core::workflow::{TickOutcome, WorkflowDriver};
use anyhow::Result;
use clap::{Parser, Subcommand};
use crate::load_config::load_config;
use std::path::PathBuf;

/// CLI for am-automate: feed storage-service sources through the processing pipeline.
#[derive(Parser)]
#[clap(
    name = "am-automate",
    version,
    about = "Start, approve and track preservation transfers one source at a time"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Drive sources through processing until interrupted
    Run {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Advance the workflow by a single step and exit
        #[clap(long)]
        once: bool,
    },
    /// Show the unit in flight and how many sources are done
    Status {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

/// Async CLI entrypoint, shared by `main` and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("cli_started");

    match cli.command {
        Commands::Run { config, once } => {
            let config = load_config(config)?;
            config.trace_loaded();
            let _lock = PidLock::acquire(&config.pid_file)?;
            let store = UnitStore::open(&config.database).await?;
            let driver = WorkflowDriver::connect(&config, store);

            if once {
                let outcome = driver.tick().await?;
                tracing::info!(command = "run", state = %outcome.state(), "Single tick finished");
                println!("{}", summarise(&outcome));
            } else {
                tracing::info!(command = "run", "Starting workflow loop");
                tokio::select! {
                    result = driver.run() => result?,
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!(command = "run", "Interrupted, shutting down");
                    }
                }
            }

            driver.into_store().close().await;
            Ok(())
        }
        Commands::Status { config } => {
            let config = load_config(config)?;
            let store = UnitStore::open(&config.database).await?;
            let current = store.current_unit().await?;
            let completed = store.completed_paths().await?;

            match &current {
                Some(unit) => println!("Current unit: {}", describe_unit(unit)),
                None => println!("No current unit"),
            }
            println!("Completed sources: {}", completed.len());
            tracing::info!(
                command = "status",
                current = current.is_some(),
                completed = completed.len(),
                "Status reported"
            );

            store.close().await;
            Ok(())
        }
    }
}

/// One-line, operator-facing summary of a tick.
pub fn summarise(outcome: &TickOutcome) -> String {
    let state = outcome.state();
    match outcome {
        TickOutcome::Idle => format!("{state}: no new source to process"),
        TickOutcome::StartFailed { path } => format!("{state}: could not start {path}"),
        TickOutcome::ApprovalFailed { unit } => {
            format!("{state}: approval failed for {}", describe_unit(unit))
        }
        TickOutcome::NoProgress { unit } => {
            format!("{state}: status unavailable for {}", describe_unit(unit))
        }
        TickOutcome::InProgress { unit }
        | TickOutcome::AwaitingUserInput { unit }
        | TickOutcome::Finished { unit } => format!("{state}: {}", describe_unit(unit)),
    }
}

fn describe_unit(unit: &Unit) -> String {
    let uuid = unit
        .uuid
        .map(|u| u.to_string())
        .unwrap_or_else(|| "unapproved".to_string());
    let status = unit.status.map(|s| s.as_str()).unwrap_or("UNKNOWN");
    let mut line = format!(
        "{} {} [{}] {} ({})",
        unit.unit_type,
        uuid,
        status,
        unit.path,
        unit.directory_name.as_deref().unwrap_or("-")
    );
    if let Some(microservice) = &unit.microservice {
        line.push_str(&format!(" at {microservice:?}"));
    }
    line
}
