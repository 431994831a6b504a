// src/commands/mod.rs

//! Command handlers for the Keystone CLI.
//!
//! Interactive runs differ from silent runs only by a confirmation prompt
//! and progress bars; resolution, planning, execution, errors, and exit
//! codes are identical.

use crate::cli::{Cli, Commands};
use crate::config::{EngineConfig, Settings};
use crate::error::Result;
use crate::progress::{CliProgress, ProgressReporter, SilentProgress};
use crate::repository::Repository;
use crate::resolver::{Decision, SessionAction};
use crate::session::journal::find_incomplete_journals;
use crate::session::{Engine, RecoveryOutcome, SessionOptions, SessionReport};
use clap::CommandFactory;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Dispatch a parsed CLI invocation.
pub fn dispatch(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.settings.as_deref(), &cli.root)?;
    let repository = cli.repository.clone().or(settings.repository);

    match &cli.command {
        Commands::Install { components } => run_session(
            &cli,
            repository,
            SessionAction::Install,
            components.clone(),
        ),
        Commands::Update { components } => {
            run_session(&cli, repository, SessionAction::Update, components.clone())
        }
        Commands::Uninstall { components } => run_session(
            &cli,
            repository,
            SessionAction::Uninstall,
            components.clone(),
        ),
        Commands::List => list(&cli, repository),
        Commands::Status => status(&cli, repository),
        Commands::Recover => recover(&cli, repository),
        Commands::Completions { shell } => {
            clap_complete::generate(
                *shell,
                &mut Cli::command(),
                "keystone",
                &mut io::stdout(),
            );
            Ok(())
        }
    }
}

fn engine(cli: &Cli, repository: Option<PathBuf>) -> Result<Engine> {
    let config = EngineConfig::new(cli.root.clone()).with_repository(repository);
    Engine::new(config)
}

fn run_session(
    cli: &Cli,
    repository: Option<PathBuf>,
    action: SessionAction,
    selection: Vec<String>,
) -> Result<()> {
    let engine = engine(cli, repository)?;

    if cli.dry_run {
        let report = engine.run(
            action,
            &selection,
            &SessionOptions::new().with_dry_run(true),
        )?;
        print_plan(&report);
        return Ok(());
    }

    // Interactive runs preview the plan and ask. The planner is pure and
    // deterministic, so the preview matches what execution will do.
    if !cli.silent {
        let preview = engine.run(
            action,
            &selection,
            &SessionOptions::new().with_dry_run(true),
        )?;
        if preview.steps.is_empty() {
            print_resolution(&preview);
            println!("Nothing to do.");
            return Ok(());
        }
        print_plan(&preview);
        if !confirm(&format!("Proceed with {}?", action))? {
            println!("Aborted.");
            return Ok(());
        }
    }

    let reporter: Arc<dyn ProgressReporter> = if cli.silent {
        Arc::new(SilentProgress::new())
    } else {
        Arc::new(CliProgress::new(&action.to_string()))
    };
    let options = SessionOptions::new().with_reporter(reporter);
    let report = engine.run(action, &selection, &options)?;

    match report.session_uuid {
        Some(uuid) => {
            info!("session {} committed", uuid);
            println!(
                "{} complete: {} operation(s) applied.",
                action, report.applied
            );
        }
        None => {
            print_resolution(&report);
            println!("Nothing to do.");
        }
    }
    Ok(())
}

fn print_resolution(report: &SessionReport) {
    for entry in &report.resolution.components {
        let verb = match &entry.decision {
            Decision::Install => "install",
            Decision::Update { from } => {
                println!(
                    "  update   {} {} -> {} ({})",
                    entry.name, from, entry.version, entry.reason
                );
                continue;
            }
            Decision::Remove => "remove",
            Decision::Keep => "keep",
        };
        println!(
            "  {:8} {} {} ({})",
            verb, entry.name, entry.version, entry.reason
        );
    }
}

fn print_plan(report: &SessionReport) {
    println!("Session plan ({}):", report.action);
    print_resolution(report);
    if report.steps.is_empty() {
        println!("No operations required.");
    } else {
        println!("Operations:");
        for (i, step) in report.steps.iter().enumerate() {
            println!("  {:3}. {}", i + 1, step.describe());
        }
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let answer = line.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

fn list(cli: &Cli, repository: Option<PathBuf>) -> Result<()> {
    let repo_dir = repository.ok_or_else(|| {
        crate::Error::MalformedDescriptor(
            "no repository configured (use --repository or settings.toml)".to_string(),
        )
    })?;
    let model = Repository::open(repo_dir)?.load_model()?;
    let engine = engine(cli, None)?;
    let installed = engine.installed_state()?;

    println!("{:<48} {:<12} {}", "COMPONENT", "AVAILABLE", "INSTALLED");
    for name in model.names() {
        let Some(component) = model.lookup(name) else {
            continue;
        };
        let installed_version = installed
            .get(name)
            .map(|r| r.version.clone())
            .unwrap_or_else(|| "-".to_string());
        let mut flags = String::new();
        if component.is_virtual {
            flags.push_str(" (virtual)");
        }
        if component.forced {
            flags.push_str(" (forced)");
        }
        if !component.checkable {
            flags.push_str(" (fixed)");
        }
        println!(
            "{:<48} {:<12} {}{}",
            name,
            component.version.to_string(),
            installed_version,
            flags
        );
    }
    Ok(())
}

fn status(cli: &Cli, repository: Option<PathBuf>) -> Result<()> {
    let engine = engine(cli, repository)?;
    let installed = engine.installed_state()?;

    if installed.is_empty() {
        println!("No components installed under {}.", cli.root.display());
    } else {
        println!("Installed components:");
        for record in installed.iter() {
            println!(
                "  {:<48} {:<12} ({} operation(s))",
                record.name,
                record.version,
                record.operations.len()
            );
        }
    }

    let sessions = engine.sessions()?;
    if !sessions.is_empty() {
        println!("Sessions:");
        for session in sessions {
            println!(
                "  {}  {:<10} {:<12} {}",
                session.uuid, session.action, session.status, session.description
            );
        }
    }

    let incomplete = find_incomplete_journals(&engine.config().journal_dir)?;
    if !incomplete.is_empty() {
        println!(
            "{} incomplete session journal(s) found; run 'keystone recover'.",
            incomplete.len()
        );
    }

    Ok(())
}

fn recover(cli: &Cli, repository: Option<PathBuf>) -> Result<()> {
    let engine = engine(cli, repository)?;
    let outcomes = engine.recover()?;

    if outcomes.is_empty() {
        println!("No incomplete sessions found.");
        return Ok(());
    }

    for outcome in outcomes {
        match outcome {
            RecoveryOutcome::RolledBack {
                session_uuid,
                reason,
            } => println!("rolled back {} ({})", session_uuid, reason),
            RecoveryOutcome::Completed { session_uuid } => {
                println!("finalized {}", session_uuid)
            }
            RecoveryOutcome::Clean { session_uuid } => {
                println!("discarded empty journal {}", session_uuid)
            }
            RecoveryOutcome::Corrupted {
                session_uuid,
                error,
            } => println!(
                "MANUAL INTERVENTION REQUIRED for {}: {}",
                session_uuid, error
            ),
        }
    }
    Ok(())
}
