//! Infra Harness CLI
//!
//! Runs apply/destroy scenarios against a terraform module and the cluster
//! it targets, tearing down whatever each scenario created.

use std::path::PathBuf;

use clap::Parser;
use commands::Commands;
use infra_harness::common::logging;
use infra_harness::{cli, commands, Config};

#[derive(Parser)]
#[command(name = "infra-harness", about = "Apply/destroy test harness for terraform modules")]
#[command(version, long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/infra-harness/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let log_file = cli
        .command
        .log_file()
        .cloned()
        .or_else(|| config.logging.file.clone());
    let _guard = logging::init_cli(cli.command.verbose(), log_file.as_deref());

    if let Err(e) = cli::dispatch(cli.command, config).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
