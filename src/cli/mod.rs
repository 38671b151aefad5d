//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{DryRunCommand, HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Typed pipe execution engine
#[derive(Debug, Parser, Clone)]
#[command(name = "pipeworks")]
#[command(author = "Pipeworks Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Compile, dry-run and run typed pipes", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to engine configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Load domain files and compile every pipe
    Validate(ValidateCommand),

    /// Dry-run every pipe with placeholder inputs
    DryRun(DryRunCommand),

    /// Run one pipe
    Run(RunCommand),

    /// List the pipes declared in domain files
    List(ListCommand),

    /// Show execution history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
