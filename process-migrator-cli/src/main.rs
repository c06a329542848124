//! Command-line entry point for the process migrator

mod api;
mod config;
mod engine;
mod error;
mod history;
mod model;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use log::debug;
use std::path::PathBuf;
use std::process::ExitCode;

use config::{MigrationConfig, Mode};
use engine::{EventLevel, MigrationEngine, MigrationEvent, RunStatus};

#[derive(Parser)]
#[command(name = "process-migrator-cli")]
#[command(about = "Migrate work item processes between Azure DevOps accounts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an export, import, or migrate operation
    Run {
        /// Operation mode
        #[arg(long, value_enum)]
        mode: Mode,
        /// Path to the JSON configuration file
        #[arg(long)]
        config: PathBuf,
    },
    /// Show past runs
    History {
        /// Delete all history entries instead of listing them
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { mode, config } => run_migration(mode, &config).await,
        Command::History { clear } => show_history(clear).await.map(|_| ExitCode::SUCCESS),
    }
}

async fn run_migration(mode: Mode, config_path: &std::path::Path) -> Result<ExitCode> {
    let config = MigrationConfig::load(config_path)?;

    let migration_engine = MigrationEngine::new();
    let mut events = migration_engine.subscribe();

    // Forward SIGINT to the cooperative cancel flag; the operation in
    // flight still completes before the run stops
    let cancel = migration_engine.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Cancellation requested, finishing current operation...".yellow());
            cancel.cancel();
        }
    });

    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
            if matches!(event, MigrationEvent::Complete { .. }) {
                break;
            }
        }
    });

    let result = migration_engine
        .run(mode, &config)
        .await
        .context("Migration could not be started")?;
    let _ = printer.await;

    // Record the run regardless of outcome; a broken history store should
    // not turn a finished migration into an error
    match history::default_db_path() {
        Ok(db_path) => match history::open(&db_path).await {
            Ok(pool) => {
                let entry = history::HistoryEntry::from_run(&result);
                if let Err(e) = history::add_entry(&pool, &entry).await {
                    debug!("failed to record history entry: {}", e);
                }
            }
            Err(e) => debug!("failed to open history database: {}", e),
        },
        Err(e) => debug!("no history database location: {}", e),
    }

    println!();
    match result.status {
        RunStatus::Success => {
            println!("{} ({} ms)", "Migration completed".green().bold(), result.duration_ms());
            Ok(ExitCode::SUCCESS)
        }
        RunStatus::Partial => {
            let skipped = result
                .operation_outcomes
                .iter()
                .filter(|o| o.is_tolerated_failure())
                .count();
            println!(
                "{} ({} operation(s) skipped)",
                "Migration completed with warnings".yellow().bold(),
                skipped
            );
            Ok(ExitCode::SUCCESS)
        }
        RunStatus::Cancelled => {
            println!("{}", "Migration cancelled".yellow().bold());
            Ok(ExitCode::FAILURE)
        }
        RunStatus::Failed => {
            println!(
                "{}: {}",
                "Migration failed".red().bold(),
                result.error.as_deref().unwrap_or("unknown error")
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_event(event: &MigrationEvent) {
    match event {
        MigrationEvent::Progress { step, completed, total } => {
            println!("{} {}", format!("[{}/{}]", completed, total).cyan(), step);
        }
        MigrationEvent::Log { level, message, .. } => match level {
            EventLevel::Info => println!("{}", message),
            EventLevel::Warning => println!("{} {}", "[Warning]".yellow(), message),
            EventLevel::Error => eprintln!("{} {}", "[Error]".red(), message),
            EventLevel::Verbose => debug!("{}", message),
        },
        MigrationEvent::Complete { .. } => {}
    }
}

async fn show_history(clear: bool) -> Result<()> {
    let db_path = history::default_db_path()?;
    let pool = history::open(&db_path).await?;

    if clear {
        history::clear_history(&pool).await?;
        println!("History cleared");
        return Ok(());
    }

    let entries = history::get_history(&pool).await?;
    if entries.is_empty() {
        println!("No migration history");
        return Ok(());
    }

    for entry in entries {
        let status = match entry.status.as_str() {
            "success" => entry.status.green(),
            "partial" => entry.status.yellow(),
            _ => entry.status.red(),
        };
        println!(
            "{}  {:8}  {:9}  {} -> {}  ({} ms)",
            entry.started_at.format("%Y-%m-%d %H:%M:%S"),
            entry.mode,
            status,
            entry.source_process_name,
            entry.target_process_name,
            entry.duration_ms
        );
        if let Some(error) = &entry.error {
            println!("    {}", error.red());
        }
    }

    Ok(())
}
