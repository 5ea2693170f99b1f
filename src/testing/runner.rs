//! Test runner implementation
//!
//! Executes scenario steps against the external tools, registering each
//! teardown before the call that creates its resource, and drains the
//! teardown stack once the body is over.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;

use crate::common::{Config, Error, Result};
use crate::tools::helm::{self, HelmOptions};
use crate::tools::kubectl::{self, WaitTarget};
use crate::tools::terraform::{self, TerraformOptions, Vars};
use crate::tools::workspace::copy_module_to_temp;
use crate::tools::Toolchain;

use super::catalog;
use super::config::{Check, ScenarioDefaults, TestScenario, TestStep};
use super::teardown::{TeardownAction, TeardownReport, TeardownStack};

/// A step that did not pass
#[derive(Debug, Clone, Serialize)]
pub struct StepFailure {
    pub step: usize,
    pub description: String,
    pub check: Check,
    pub message: String,
}

/// Result of a test run
#[derive(Debug, Serialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub steps_run: usize,
    pub steps_total: usize,
    pub failures: Vec<StepFailure>,
    pub teardown: Vec<TeardownReport>,
    /// Set when the body panicked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_secs: u64,
}

/// How scenarios are run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Module root; overrides the scenario's own `module`
    pub module_root: Option<PathBuf>,
    /// Show every tool command as it runs
    pub verbose: bool,
    /// No terminal output (used for `--json`)
    pub quiet: bool,
    /// Do not sleep in `settle` steps
    pub dry_run: bool,
}

/// Load a scenario from a YAML file, or by built-in name
///
/// Returns the directory relative paths in the scenario resolve against.
pub fn load_scenario(spec: &str) -> Result<(TestScenario, Option<PathBuf>)> {
    let path = Path::new(spec);
    let looks_like_file = path.exists()
        || path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");

    if !looks_like_file {
        return catalog::find(spec).map(|s| (s, None)).ok_or_else(|| {
            Error::Config(format!(
                "Unknown scenario '{}'. Use 'infra-harness list' to see built-in scenarios",
                spec
            ))
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    let scenario: TestScenario = serde_yaml::from_str(&content)?;
    let base = path.parent().map(Path::to_path_buf);
    Ok((scenario, base))
}

/// Executes scenarios with a fixed toolchain and config
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    tools: Toolchain,
    config: Arc<Config>,
    options: RunOptions,
}

/// Progress shared with the body task so it survives a panic
#[derive(Debug, Default)]
struct Progress {
    steps_run: usize,
    failures: Vec<StepFailure>,
}

impl ScenarioRunner {
    pub fn new(tools: Toolchain, config: Arc<Config>, options: RunOptions) -> Self {
        Self {
            tools,
            config,
            options,
        }
    }

    pub fn tools(&self) -> &Toolchain {
        &self.tools
    }

    /// Run one scenario to completion, teardown included
    ///
    /// `Err` is reserved for problems that stop the scenario from starting;
    /// everything after that is reported in the [`TestResult`].
    pub async fn run(&self, scenario: TestScenario, base_dir: Option<&Path>) -> Result<TestResult> {
        let module_root = self.module_root(&scenario, base_dir)?;
        let span = tracing::info_span!("scenario", name = %scenario.name);
        self.run_resolved(scenario, module_root).instrument(span).await
    }

    fn module_root(&self, scenario: &TestScenario, base_dir: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(root) = &self.options.module_root {
            return Ok(Some(root.clone()));
        }
        let Some(module) = &scenario.module else {
            let needs_module = scenario
                .steps
                .iter()
                .any(|s| matches!(s, TestStep::TerraformApply { .. }));
            if needs_module {
                return Err(Error::Config(format!(
                    "Scenario '{}' applies terraform but no module root was given. Pass --module <DIR>",
                    scenario.name
                )));
            }
            return Ok(None);
        };
        Ok(Some(match base_dir {
            Some(base) if module.is_relative() => base.join(module),
            _ => module.clone(),
        }))
    }

    async fn run_resolved(&self, scenario: TestScenario, module_root: Option<PathBuf>) -> Result<TestResult> {
        let started = Instant::now();
        let steps_total = scenario.steps.len();

        if !self.options.quiet {
            println!(
                "\n{} {}",
                "Running Test:".blue().bold(),
                scenario.name.white().bold()
            );
            if let Some(desc) = &scenario.description {
                println!("  {}", desc.dimmed());
            }
            println!("\n{}", "Steps:".cyan());
        }

        let teardown = TeardownStack::new();
        let progress = Arc::new(Mutex::new(Progress::default()));

        let body = ScenarioBody {
            runner: self.clone(),
            module_root,
            defaults: scenario.defaults.clone(),
            teardown: teardown.clone(),
            progress: progress.clone(),
        };
        let steps = scenario.steps;
        let handle = tokio::spawn(
            async move { body.execute(steps).await }.instrument(tracing::Span::current()),
        );

        let error = match handle.await {
            Ok(()) => None,
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                tracing::error!(panic = %message, "Scenario body panicked");
                if !self.options.quiet {
                    println!("  {} Scenario body panicked: {}", "✗".red(), message);
                }
                Some(format!("Scenario body panicked: {}", message))
            }
            Err(e) => Some(format!("Scenario body was cancelled: {}", e)),
        };

        if !self.options.quiet && !teardown.is_empty() {
            println!("\n{}", "Teardown:".cyan());
        }
        let reports = teardown.run_all(&self.tools).await;
        if !self.options.quiet {
            for report in &reports {
                match &report.error {
                    None => println!("  {} {}", "✓".green(), report.action.dimmed()),
                    Some(e) => println!("  {} {}", "✗".red(), e),
                }
                if let Some(path) = &report.kept_workspace {
                    println!("    {} {}", "State kept in".yellow(), path.display());
                }
            }
        }

        let progress = match Arc::try_unwrap(progress) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(|p| p.into_inner()),
            Err(shared) => {
                let guard = shared.lock().unwrap_or_else(|p| p.into_inner());
                Progress {
                    steps_run: guard.steps_run,
                    failures: guard.failures.clone(),
                }
            }
        };

        let passed = error.is_none() && progress.failures.is_empty() && reports.iter().all(|r| r.ok);

        if !self.options.quiet {
            if passed {
                println!("\n{} {}\n", "✓".green().bold(), "Test Passed".green().bold());
            } else {
                println!("\n{} {}\n", "✗".red().bold(), "Test Failed".red().bold());
            }
        }

        Ok(TestResult {
            name: scenario.name,
            passed,
            steps_run: progress.steps_run,
            steps_total,
            failures: progress.failures,
            teardown: reports,
            error,
            duration_secs: started.elapsed().as_secs(),
        })
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// State owned by the spawned scenario body
struct ScenarioBody {
    runner: ScenarioRunner,
    module_root: Option<PathBuf>,
    defaults: ScenarioDefaults,
    teardown: TeardownStack,
    progress: Arc<Mutex<Progress>>,
}

impl ScenarioBody {
    async fn execute(self, steps: Vec<TestStep>) {
        let quiet = self.runner.options.quiet;

        for (i, step) in steps.iter().enumerate() {
            let step_num = i + 1;
            self.with_progress(|p| p.steps_run = step_num);

            if self.runner.options.verbose && !quiet {
                println!("  {} Step {}: {}", "→".cyan(), step_num, step.to_string().dimmed());
            }

            match self.execute_step(step).await {
                Ok(()) => {
                    if !quiet {
                        println!("  {} Step {}: {}", "✓".green(), step_num, step.to_string().dimmed());
                    }
                }
                Err(e) => {
                    let check = step.check();
                    tracing::error!(step = step_num, check = ?check, error = %e, "Step failed");
                    if !quiet {
                        println!("  {} Step {}: {}: {}", "✗".red(), step_num, step, e);
                    }
                    self.with_progress(|p| {
                        p.failures.push(StepFailure {
                            step: step_num,
                            description: step.to_string(),
                            check,
                            message: e.to_string(),
                        })
                    });
                    if check == Check::Require {
                        return;
                    }
                }
            }
        }
    }

    fn with_progress(&self, f: impl FnOnce(&mut Progress)) {
        match self.progress.lock() {
            Ok(mut progress) => f(&mut progress),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn tools(&self) -> &Toolchain {
        &self.runner.tools
    }

    fn config(&self) -> &Config {
        &self.runner.config
    }

    /// Execute a single test step
    async fn execute_step(&self, step: &TestStep) -> Result<()> {
        match step {
            TestStep::TerraformApply {
                module,
                vars,
                max_retries,
                time_between_retries_secs,
                no_color,
                outputs,
                ..
            } => {
                let overrides = ScenarioDefaults {
                    max_retries: *max_retries,
                    time_between_retries_secs: *time_between_retries_secs,
                    no_color: *no_color,
                };
                self.execute_apply(module, vars, &overrides, outputs).await
            }
            TestStep::CreateNamespace { name, cluster, .. } => {
                let options = cluster.kubectl_options(name);
                self.teardown.register(TeardownAction::DeleteNamespace {
                    options: options.clone(),
                    name: name.clone(),
                });
                kubectl::create_namespace(self.tools(), &options, name).await
            }
            TestStep::Helm { args, cluster, .. } => {
                let Some((cmd, rest)) = args.split_first() else {
                    return Err(Error::Config("helm step needs at least one argument".to_string()));
                };
                let options = if cluster.context.is_empty() && cluster.kubeconfig.is_empty() {
                    HelmOptions::default()
                } else {
                    HelmOptions {
                        kubectl: Some(cluster.kubectl_options("")),
                        ..Default::default()
                    }
                };
                helm::run_command(self.tools(), &options, cmd, rest).await.map(|_| ())
            }
            TestStep::HelmInstall {
                chart,
                release,
                namespace,
                version,
                set,
                set_string,
                values_files,
                purge,
                cluster,
                ..
            } => {
                let options = HelmOptions {
                    kubectl: Some(cluster.kubectl_options(namespace)),
                    set_values: set.clone(),
                    set_string_values: set_string.clone(),
                    values_files: values_files.clone(),
                    version: version.clone(),
                    extra_args: Default::default(),
                };
                self.teardown.register(TeardownAction::DeleteRelease {
                    options: options.clone(),
                    release: release.clone(),
                    purge: *purge,
                });
                helm::install(self.tools(), &options, chart, release).await
            }
            TestStep::Settle { seconds } => {
                self.settle(self.config().settle_duration(*seconds)).await;
                Ok(())
            }
            TestStep::WaitReady {
                namespace,
                resource,
                condition,
                timeout_secs,
                poll_interval_secs,
                cluster,
                ..
            } => {
                let timeouts = &self.config().timeouts;
                let target = WaitTarget {
                    resource: resource.clone(),
                    condition: condition.clone(),
                    timeout: Duration::from_secs(timeout_secs.unwrap_or(timeouts.wait_ready_secs)),
                    poll_interval: Duration::from_secs(
                        poll_interval_secs.unwrap_or(timeouts.poll_interval_secs),
                    ),
                };
                kubectl::wait_for(self.tools(), &cluster.kubectl_options(namespace), &target).await
            }
        }
    }

    /// Copy the module, register its destroy, init and apply, then check outputs
    async fn execute_apply(
        &self,
        module: &str,
        vars: &Vars,
        overrides: &ScenarioDefaults,
        expected: &BTreeMap<String, Value>,
    ) -> Result<()> {
        let root = self
            .module_root
            .as_deref()
            .ok_or_else(|| Error::Config("No module root for terraform step".to_string()))?;
        let workspace = copy_module_to_temp(root, module)?;

        let options = self.terraform_options(workspace.module_dir(), vars, overrides);
        self.teardown.register(TeardownAction::Destroy {
            options: options.clone(),
            module: module.to_string(),
            workspace: Some(workspace),
        });

        terraform::init_and_apply(self.tools(), &options).await?;
        if expected.is_empty() {
            return Ok(());
        }

        let actual = terraform::output_json(self.tools(), &options).await?;
        for (name, want) in expected {
            match actual.get(name) {
                Some(got) if got == want => {}
                Some(got) => {
                    return Err(Error::TestAssertion(format!(
                        "output '{}' is {}, expected {}",
                        name, got, want
                    )))
                }
                None => {
                    return Err(Error::TestAssertion(format!(
                        "output '{}' missing from module '{}'",
                        name, module
                    )))
                }
            }
        }
        Ok(())
    }

    /// Step overrides, then scenario defaults, then the config file
    fn terraform_options(&self, dir: &Path, vars: &Vars, step: &ScenarioDefaults) -> TerraformOptions {
        let config = &self.config().defaults;
        let mut options = TerraformOptions::new(dir);
        options.vars = vars.clone();
        options.max_retries = step
            .max_retries
            .or(self.defaults.max_retries)
            .unwrap_or(config.max_retries);
        options.time_between_retries = step
            .time_between_retries_secs
            .or(self.defaults.time_between_retries_secs)
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config().time_between_retries());
        options.no_color = step
            .no_color
            .or(self.defaults.no_color)
            .unwrap_or(config.no_color);
        options
    }

    async fn settle(&self, duration: Duration) {
        tracing::info!(secs = duration.as_secs(), "Settling");
        if self.runner.options.dry_run || duration.is_zero() {
            return;
        }

        let spinner = if self.runner.options.quiet {
            None
        } else {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("  {spinner} {msg} ({elapsed})") {
                pb.set_style(style);
            }
            pb.set_message(format!("Settling for {}s", duration.as_secs()));
            pb.enable_steady_tick(Duration::from_millis(200));
            Some(pb)
        };

        tokio::time::sleep(duration).await;

        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }
    }
}

/// Run one scenario by name or YAML path
pub async fn run_scenario(runner: &ScenarioRunner, spec: &str) -> Result<TestResult> {
    let (scenario, base) = load_scenario(spec)?;
    runner.run(scenario, base.as_deref()).await
}
