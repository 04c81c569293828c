use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::productivity::DEFAULT_REPORT_DAYS;

#[derive(Debug, Parser, Clone, PartialEq, Eq)]
#[command(name = "neurocode")]
#[command(
    about = "Coding companion for ADHD developers, backed by a local language model",
    long_about = "Coding companion for ADHD developers, backed by a local language model\n\nWithout a subcommand, starts an interactive chat session.\n\nConfig file loading:\n  - --config <path> (explicit file, overrides default path discovery)\n  - Default probe path when --config is not provided:\n    1. $XDG_CONFIG_HOME/neurocode/config.toml\n    2. ~/.config/neurocode/config.toml\n  - NEUROCODE_* environment variables (and a .env file) override file values"
)]
pub struct CliArgs {
    /// Load config from this file path instead of the default discovery path.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Print redacted HTTP traffic to stderr.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Debug, Subcommand, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Run a Python file in the sandbox and print its output.
    Exec {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Log focus minutes and completed tasks for today.
    Record {
        focus_minutes: u32,
        tasks_completed: u32,
    },
    /// Show daily productivity totals.
    Report {
        #[arg(long, default_value_t = DEFAULT_REPORT_DAYS, value_parser = clap::value_parser!(u32).range(1..))]
        days: u32,
    },
}
