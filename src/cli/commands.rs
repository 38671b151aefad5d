//! CLI command definitions

use clap::Args;

/// Load domain files and compile every pipe
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Domain YAML files
    #[arg(short, long = "file", required = true)]
    pub files: Vec<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Dry-run every pipe
#[derive(Debug, Args, Clone)]
pub struct DryRunCommand {
    /// Domain YAML files
    #[arg(short, long = "file", required = true)]
    pub files: Vec<String>,

    /// Exit with an error when any pipe fails
    #[arg(long)]
    pub raise: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Run one pipe
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Code of the pipe to run
    pub pipe: String,

    /// Domain YAML files
    #[arg(short, long = "file", required = true)]
    pub files: Vec<String>,

    /// Inputs (name=value); values that parse as JSON are read as JSON
    #[arg(short, long, value_parser = parse_key_value)]
    pub input: Vec<(String, String)>,

    /// Command line for the default language model worker
    #[arg(long)]
    pub llm_command: Option<String>,

    /// Print the final working memory as JSON
    #[arg(long)]
    pub show_memory: bool,

    /// Don't save execution to history
    #[arg(long)]
    pub no_history: bool,
}

/// List declared pipes
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Domain YAML files
    #[arg(short, long = "file", required = true)]
    pub files: Vec<String>,

    /// Show execution counts from history
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show execution history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipe code to filter by
    #[arg(short, long)]
    pub pipe: Option<String>,

    /// Number of recent executions to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details, including the memory snapshot
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific execution
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
