//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// regdaemon - timed registration daemon
#[derive(Parser)]
#[command(
    name = "rd",
    about = "Timed registration daemon: fires submissions at the open instant and sequences human assistance",
    version,
    after_help = "Logs are written to: ~/.local/share/regdaemon/logs/regdaemon.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Arm the plans in a file and run the daemon in the foreground
    Run {
        /// Plan file (YAML, one plan or a list)
        #[arg(value_name = "PLAN_FILE")]
        plan_file: PathBuf,
    },

    /// Validate a plan file without arming anything
    Preflight {
        /// Plan file (YAML, one plan or a list)
        #[arg(value_name = "PLAN_FILE")]
        plan_file: PathBuf,
    },

    /// Summarize recorded attempts from the data directory
    Status {
        /// Only show this plan
        #[arg(short, long)]
        plan: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for the status command
#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Default log file location
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("regdaemon")
        .join("logs")
        .join("regdaemon.log")
}
