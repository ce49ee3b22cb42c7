//! Command-line interface for callvox
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Real-time voice conversation coordinator
#[derive(Parser, Debug)]
#[command(name = "callvox", version, about = "Real-time voice conversation coordinator")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug logs, -vv: trace logs)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a duration such as `8s`, `1500ms` or `2m`. Bare numbers are seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scripted call against simulated devices and print its events
    Simulate {
        /// Scenario identifier passed to the dialogue service
        #[arg(long, value_name = "NAME")]
        scenario: Option<String>,

        /// Recognition language (default: from config, e.g. en-US)
        #[arg(long, value_name = "LANG")]
        language: Option<String>,

        /// Silence before the re-engagement prompt. Examples: 8s, 1500ms
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        quiet_period: Option<Duration>,
    },

    /// Manage configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
