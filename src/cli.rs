//! CLI surface (component J): process entrypoint flags and subcommands,
//! modeled on the teacher's `clap`-derived `Cli` struct.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, default_value_t = String::from(crate::config::DEFAULT_STATE_DIR))]
    config: String,

    #[arg(long)]
    print_debug_info: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Runs the agent: loads persisted config, starts the scheduler,
    /// worker pool, result processor and config-sync loop.
    Run,
    /// Calls ValidateAPIKey and prints the resolved identity.
    WhoAmI,
    /// Performs the one-shot Enroll call and persists the returned
    /// certificate material and agent key.
    Enroll {
        #[arg(long)]
        labels: Vec<String>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn config_dir(&self) -> PathBuf {
        PathBuf::from(&self.config)
    }

    pub fn print_debug_info(&self) -> bool {
        self.print_debug_info
    }

    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}

/// Parses `key=value` label pairs from repeated `--labels` flags.
pub fn parse_labels(raw: &[String]) -> std::collections::HashMap<String, String> {
    raw.iter()
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
