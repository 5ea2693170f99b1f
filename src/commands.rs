//! CLI command definitions
//!
//! Defines the clap commands for the infra-harness CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run one or more scenarios, tearing down everything they create
    Run {
        /// Built-in scenario name or path to a YAML scenario file
        #[arg(required = true)]
        scenarios: Vec<String>,

        /// Root of the terraform module under test
        #[arg(long, short)]
        module: Option<PathBuf>,

        /// Show each step as it starts
        #[arg(long, short)]
        verbose: bool,

        /// Output results as JSON
        #[arg(long)]
        json: bool,

        /// Run scenarios concurrently
        #[arg(long)]
        parallel: bool,

        /// Also write a full log to this file
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// List built-in scenarios
    List,

    /// Resolve terraform, helm and kubectl and print their versions
    Check {
        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the commands a scenario would run, without running them
    Plan {
        /// Built-in scenario name or path to a YAML scenario file
        scenario: String,

        /// Root of the terraform module under test
        #[arg(long, short)]
        module: Option<PathBuf>,
    },
}

impl Commands {
    /// Log file requested on the command line, if any
    pub fn log_file(&self) -> Option<&PathBuf> {
        match self {
            Commands::Run { log_file, .. } => log_file.as_ref(),
            _ => None,
        }
    }

    pub fn verbose(&self) -> bool {
        matches!(self, Commands::Run { verbose: true, .. })
    }
}
