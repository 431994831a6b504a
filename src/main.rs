// src/main.rs

use clap::Parser;
use keystone::cli::Cli;
use keystone::commands;

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::dispatch(cli)?;
    Ok(())
}

fn main() {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("error: {:#}", err);
        // Silent and interactive runs share the same exit classification
        let code = err
            .downcast_ref::<keystone::Error>()
            .map(|e| e.exit_code())
            .unwrap_or(1);
        std::process::exit(code);
    }
}
