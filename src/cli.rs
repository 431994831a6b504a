// src/cli.rs

//! CLI definitions for the Keystone installer.
//!
//! This module contains the command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keystone")]
#[command(author = "Keystone Project")]
#[command(version)]
#[command(
    about = "Transactional component installer with full rollback",
    long_about = None
)]
pub struct Cli {
    /// Target root directory components are installed into
    #[arg(short, long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Repository directory (holds components.json and payloads)
    #[arg(short = 'R', long, global = true)]
    pub repository: Option<PathBuf>,

    /// Settings file overriding the default lookup locations
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Non-interactive mode: no confirmation prompt, no progress bars.
    /// Outcomes and exit codes are identical to interactive runs.
    #[arg(short, long, global = true)]
    pub silent: bool,

    /// Resolve and print the plan without executing anything
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install components (dependencies are added automatically)
    Install {
        /// Component identities, e.g. componentA componentF.subcomponent1
        #[arg(required = true)]
        components: Vec<String>,
    },

    /// Update components; with no arguments, update everything eligible
    Update {
        /// Component identities to update (empty = all installed)
        components: Vec<String>,
    },

    /// Uninstall components and the descendants they brought along
    Uninstall {
        /// Component identities to remove
        #[arg(required = true)]
        components: Vec<String>,
    },

    /// List available components with installed markers
    List,

    /// Show installed components and session history
    Status,

    /// Roll back or finalize sessions interrupted by a crash
    Recover,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
