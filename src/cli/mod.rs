//! CLI command handling
//!
//! Dispatches CLI commands to the scenario runner and formats output.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use tokio::task::JoinSet;

use crate::commands::Commands;
use crate::common::{Config, Error, Result};
use crate::testing::{self, catalog, RunOptions, ScenarioRunner, TestResult, TestScenario};
use crate::tools::{terraform, RecordingRunner, SystemRunner, Tool, Toolchain};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config: Config) -> Result<()> {
    let config = Arc::new(config);

    match command {
        Commands::Run {
            scenarios,
            module,
            verbose,
            json,
            parallel,
            log_file: _,
        } => {
            check_module_root(module.as_ref())?;
            let loaded: Vec<Result<Loaded>> = scenarios.iter().map(|s| testing::load_scenario(s)).collect();
            let required: BTreeSet<Tool> = loaded
                .iter()
                .flatten()
                .flat_map(|(scenario, _)| scenario.required_tools())
                .collect();
            tracing::debug!(tools = ?required, "Resolving tools");
            let tools = Toolchain::for_tools(&config, Arc::new(SystemRunner), &required)?;
            let runner = ScenarioRunner::new(
                tools,
                config,
                RunOptions {
                    module_root: module,
                    verbose,
                    quiet: json,
                    dry_run: false,
                },
            );

            let results = if parallel {
                run_parallel(&runner, loaded).await?
            } else {
                let mut results = Vec::with_capacity(loaded.len());
                for scenario in loaded {
                    results.push(run_loaded(&runner, scenario).await);
                }
                results
            };

            report(&scenarios, results, json)
        }

        Commands::List => {
            println!("{}", "Built-in scenarios:".cyan());
            for scenario in catalog::all() {
                println!(
                    "  {:36} {} {}",
                    scenario.name.white().bold(),
                    scenario.description.as_deref().unwrap_or_default(),
                    format!("({} steps)", scenario.steps.len()).dimmed()
                );
            }
            Ok(())
        }

        Commands::Check { json } => check_tools(&config, json).await,

        Commands::Plan { scenario, module } => {
            check_module_root(module.as_ref())?;
            let recorder = Arc::new(RecordingRunner::new());
            let tools = Toolchain::from_config_or_names(&config, recorder.clone());
            let runner = ScenarioRunner::new(
                tools,
                config,
                RunOptions {
                    module_root: module,
                    verbose: false,
                    quiet: true,
                    dry_run: true,
                },
            );

            let result = testing::run_scenario(&runner, &scenario).await?;
            let calls = recorder.command_lines();
            let body = calls.len().saturating_sub(result.teardown.len());

            println!("{} {}", "Plan for".blue().bold(), result.name.white().bold());
            println!("\n{}", "Steps:".cyan());
            for (i, line) in calls[..body].iter().enumerate() {
                println!("  {:2}. {}", i + 1, line);
            }
            if body < calls.len() {
                println!("\n{}", "Teardown:".cyan());
                for (i, line) in calls[body..].iter().enumerate() {
                    println!("  {:2}. {}", body + i + 1, line);
                }
            }
            Ok(())
        }
    }
}

fn check_module_root(module: Option<&PathBuf>) -> Result<()> {
    if let Some(dir) = module {
        if !dir.is_dir() {
            return Err(Error::Config(format!(
                "Module root '{}' is not a directory",
                dir.display()
            )));
        }
        if !terraform::is_module_dir(dir) {
            tracing::warn!(module = %dir.display(), "No .tf files in module root");
        }
    }
    Ok(())
}

/// A scenario and the directory its relative paths resolve against
type Loaded = (TestScenario, Option<PathBuf>);

async fn run_loaded(runner: &ScenarioRunner, loaded: Result<Loaded>) -> Result<TestResult> {
    let (scenario, base) = loaded?;
    runner.run(scenario, base.as_deref()).await
}

/// Run every scenario concurrently, keeping results in argument order
async fn run_parallel(runner: &ScenarioRunner, scenarios: Vec<Result<Loaded>>) -> Result<Vec<Result<TestResult>>> {
    let total = scenarios.len();
    let mut set = JoinSet::new();
    for (index, loaded) in scenarios.into_iter().enumerate() {
        let runner = runner.clone();
        set.spawn(async move { (index, run_loaded(&runner, loaded).await) });
    }

    let mut slots: Vec<Option<Result<TestResult>>> = (0..total).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        let (index, result) = joined.map_err(|e| Error::Internal(format!("Scenario task failed: {}", e)))?;
        slots[index] = Some(result);
    }

    Ok(slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err(Error::Internal("Scenario produced no result".to_string()))))
        .collect())
}

/// Print results and fail if any scenario did
fn report(scenarios: &[String], results: Vec<Result<TestResult>>, json: bool) -> Result<()> {
    let total = results.len();
    let mut failed = 0;
    let mut reports = Vec::with_capacity(total);

    for (spec, result) in scenarios.iter().zip(results) {
        match result {
            Ok(result) => {
                if !result.passed {
                    failed += 1;
                }
                if json {
                    reports.push(serde_json::to_value(&result)?);
                }
            }
            Err(e) => {
                failed += 1;
                if json {
                    reports.push(serde_json::json!({
                        "name": spec,
                        "passed": false,
                        "error": e.to_string(),
                    }));
                } else {
                    println!("{} {}: {}", "✗".red(), spec, e);
                }
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else if total > 1 {
        println!(
            "{} passed, {} failed",
            (total - failed).to_string().green(),
            failed.to_string().red()
        );
    }

    if failed > 0 {
        return Err(Error::TestAssertion(format!(
            "{} of {} scenarios failed",
            failed, total
        )));
    }
    Ok(())
}

/// Resolve each tool and ask it for its version
async fn check_tools(config: &Config, json: bool) -> Result<()> {
    let tools = Toolchain::from_config_or_names(config, Arc::new(SystemRunner));
    let mut results = Vec::new();
    let mut missing = Vec::new();

    if !json {
        println!("Checking tools...\n");
    }

    for tool in Tool::ALL {
        let Some(resolved) = config.get_tool(tool.name()) else {
            missing.push(tool.name());
            if json {
                results.push(serde_json::json!({
                    "tool": tool,
                    "found": false,
                }));
            } else {
                println!("{} {}", "✗".red(), tool);
                println!("  Not found in config or PATH");
                println!();
            }
            continue;
        };

        let version = tools.version(tool).await;
        if json {
            results.push(serde_json::json!({
                "tool": tool,
                "found": true,
                "path": resolved.path.display().to_string(),
                "version": version.as_ref().ok(),
                "error": version.as_ref().err().map(ToString::to_string),
            }));
        } else {
            let icon = if version.is_ok() { "✓".green() } else { "✗".red() };
            println!("{} {}", icon, tool);
            println!("  Path: {}", resolved.path.display());
            match &version {
                Ok(v) => println!("  Version: {}", v),
                Err(e) => println!("  Error: {}", e),
            }
            println!();
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    }

    if !missing.is_empty() {
        return Err(Error::tool_not_found(&missing.join(", "), &["config", "PATH"]));
    }
    Ok(())
}
