//! Command-line surface: global flags plus the `hosts`, `groups` and `run`
//! subcommands.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Armada - inventory patterns and play execution
#[derive(Parser, Debug, Clone)]
#[command(name = "armada")]
#[command(author = "Armada Contributors")]
#[command(version)]
#[command(about = "Resolve host patterns and run plays across an inventory", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Inventory source: a file, a directory, a script or a `host1,host2,` list
    #[arg(short = 'i', long, global = true, action = clap::ArgAction::Append)]
    pub inventory: Vec<String>,

    /// Extra variables as key=value pairs, JSON, or @file
    #[arg(short = 'e', long = "extra-vars", global = true, action = clap::ArgAction::Append)]
    pub extra_vars: Vec<String>,

    /// More -v, more detail
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Limit selected hosts to an additional pattern
    #[arg(short = 'l', long, global = true)]
    pub limit: Option<String>,

    /// armada.toml location
    #[arg(short = 'c', long, global = true, env = "ARMADA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Plain text even on a terminal
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// How command results are printed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Human,
    /// One JSON document per result
    Json,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List the hosts a pattern resolves to
    Hosts(commands::inventory::HostsArgs),

    /// List inventory groups
    Groups(commands::inventory::GroupsArgs),

    /// Run a playbook
    Run(commands::run::RunArgs),
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Verbosity clamped to 4
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(4)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.output, OutputFormat::Json)
    }
}
