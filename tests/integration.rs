//! End-to-end integration tests for the infra-harness CLI
//!
//! These tests verify complete scenario runs by:
//! 1. Pointing terraform, helm and kubectl at the mock-tool binary
//! 2. Running the harness against a throwaway module tree
//! 3. Reading back the calls mock-tool recorded, in order

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;
use tempfile::TempDir;

/// Test context with paths and cleanup
struct TestContext {
    /// Temporary directory for this test; removed on drop
    temp_dir: TempDir,
    /// Path to the harness binary
    harness_bin: PathBuf,
    /// Config file handed over with --config
    config_path: PathBuf,
    /// Module root under test
    module_dir: PathBuf,
    /// Where mock-tool appends its calls
    log_path: PathBuf,
    /// Where module copies are created
    work_dir: PathBuf,
}

impl TestContext {
    /// Create a new test context with a config routing every tool to mock-tool
    fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path();

        let module_dir = root.join("module");
        fs::create_dir_all(module_dir.join("istio")).expect("Failed to create module dir");
        fs::write(module_dir.join("main.tf"), "variable \"install_istio\" {}\n").unwrap();
        fs::write(module_dir.join("istio/main.tf"), "").unwrap();

        let work_dir = root.join("work");
        fs::create_dir_all(&work_dir).expect("Failed to create work dir");

        let ctx = Self {
            harness_bin: PathBuf::from(env!("CARGO_BIN_EXE_infra-harness")),
            config_path: root.join("config.toml"),
            log_path: root.join("calls.jsonl"),
            module_dir,
            work_dir,
            temp_dir,
        };
        ctx.create_config();
        ctx
    }

    fn create_config(&self) {
        let mock = env!("CARGO_BIN_EXE_mock-tool");
        let config_content = format!(
            r#"
[tools.terraform]
path = '{mock}'
args = ["terraform"]

[tools.helm]
path = '{mock}'
args = ["helm"]

[tools.kubectl]
path = '{mock}'
args = ["kubectl"]

[defaults]
max_retries = 1
time_between_retries_secs = 0

[timeouts]
settle_secs = 0
"#
        );
        fs::write(&self.config_path, config_content).expect("Failed to write config");
    }

    fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Run a harness command
    fn run_harness(&self, args: &[&str], fail_on: Option<&str>) -> HarnessOutput {
        self.run_harness_env(args, fail_on, &[])
    }

    /// Run a harness command with extra environment variables
    fn run_harness_env(&self, args: &[&str], fail_on: Option<&str>, env: &[(&str, &Path)]) -> HarnessOutput {
        let mut cmd = Command::new(&self.harness_bin);
        cmd.arg("--config")
            .arg(&self.config_path)
            .args(args)
            .env("MOCK_TOOL_LOG", &self.log_path)
            .env("INFRA_HARNESS_WORK_DIR", &self.work_dir)
            .env("NO_COLOR", "1")
            .env_remove("MOCK_TOOL_FAIL_ON");
        if let Some(pattern) = fail_on {
            cmd.env("MOCK_TOOL_FAIL_ON", pattern);
        }
        for (key, value) in env {
            cmd.env(key, value);
        }
        let output = cmd.output().expect("Failed to run infra-harness");

        HarnessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        }
    }

    /// Run a scenario against the fixture module
    fn run_scenario(&self, scenario: &str, fail_on: Option<&str>) -> HarnessOutput {
        let module = self.module_dir.to_str().unwrap();
        self.run_harness(&["run", scenario, "--module", module], fail_on)
    }

    /// Calls recorded by mock-tool, in order
    fn calls(&self) -> Vec<Call> {
        let content = fs::read_to_string(&self.log_path).unwrap_or_default();
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                let record: Value = serde_json::from_str(l).expect("Bad mock-tool record");
                Call {
                    tool: record["tool"].as_str().unwrap_or_default().to_string(),
                    argv: record["argv"]
                        .as_array()
                        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                        .unwrap_or_default(),
                    cwd: PathBuf::from(record["cwd"].as_str().unwrap_or_default()),
                }
            })
            .collect()
    }
}

/// Output from a harness command
#[derive(Debug)]
struct HarnessOutput {
    stdout: String,
    stderr: String,
    success: bool,
    code: Option<i32>,
}

/// One recorded tool call
#[derive(Debug, Clone)]
struct Call {
    tool: String,
    argv: Vec<String>,
    cwd: PathBuf,
}

impl Call {
    /// `tool subcommand`, e.g. `terraform apply`
    fn label(&self) -> String {
        format!("{} {}", self.tool, self.argv.first().map(String::as_str).unwrap_or(""))
    }

    fn has_arg(&self, arg: &str) -> bool {
        self.argv.iter().any(|a| a == arg)
    }
}

fn labels(calls: &[Call]) -> Vec<String> {
    calls.iter().map(Call::label).collect()
}

// ============== Tests ==============

#[test]
fn test_list_shows_builtin_scenarios() {
    let ctx = TestContext::new();
    let output = ctx.run_harness(&["list"], None);

    assert!(output.success, "list failed: {}", output.stderr);
    for name in [
        "with-old-values",
        "with-sane-values",
        "with-only-pipelines",
        "with-existing-istio-cert-manager",
    ] {
        assert!(output.stdout.contains(name), "Missing {} in: {}", name, output.stdout);
    }
}

#[test]
fn test_sane_values_apply_then_destroy() {
    let ctx = TestContext::new();
    let output = ctx.run_scenario("with-sane-values", None);

    assert!(
        output.success,
        "run failed:\nstdout: {}\nstderr: {}",
        output.stdout, output.stderr
    );
    assert!(output.stdout.contains("Test Passed"));

    let calls = ctx.calls();
    assert_eq!(
        labels(&calls),
        vec!["terraform init", "terraform apply", "terraform destroy"]
    );

    let apply = &calls[1];
    assert!(apply.has_arg("-auto-approve"));
    assert!(apply.has_arg("install_istio=true"));
    assert!(apply.has_arg("domain_name=foo.local"));
    assert!(apply.has_arg(r#"ingress_gateway_annotations={"foo" = "bar"}"#));

    let destroy = &calls[2];
    let vars = |c: &Call| -> Vec<String> {
        c.argv.iter().skip_while(|a| *a != "-var").cloned().collect()
    };
    assert_eq!(vars(apply), vars(destroy));

    // Runs happen in a copy of the module, removed once destroyed
    assert_eq!(apply.cwd, destroy.cwd);
    assert!(apply.cwd.starts_with(&ctx.work_dir));
    assert!(!apply.cwd.exists());
}

#[test]
fn test_existing_istio_orders_prerequisites_and_teardown() {
    let ctx = TestContext::new();
    let output = ctx.run_scenario("with-existing-istio-cert-manager", None);

    assert!(
        output.success,
        "run failed:\nstdout: {}\nstderr: {}",
        output.stdout, output.stderr
    );

    let calls = ctx.calls();
    assert_eq!(
        labels(&calls),
        vec![
            "kubectl create",
            "helm repo",
            "helm repo",
            "helm install",
            "terraform init",
            "terraform apply",
            "terraform init",
            "terraform apply",
            "terraform destroy",
            "terraform destroy",
            "helm delete",
            "kubectl delete",
        ]
    );

    assert!(calls[5].cwd.ends_with("istio"));
    assert!(calls[7].has_arg("install_istio=false"));
    assert!(calls[7].has_arg("install_cert_manager=false"));
    assert_eq!(calls[8].cwd, calls[7].cwd);
    assert_eq!(calls[9].cwd, calls[5].cwd);
}

#[test]
fn test_failed_install_still_tears_down() {
    let ctx = TestContext::new();
    let output = ctx.run_scenario("with-existing-istio-cert-manager", Some("helm install"));

    assert!(!output.success);
    assert_eq!(output.code, Some(1));
    assert!(output.stderr.contains("scenarios failed"), "stderr: {}", output.stderr);

    let calls = labels(&ctx.calls());
    assert!(!calls.iter().any(|l| l.starts_with("terraform")));
    assert_eq!(&calls[calls.len() - 2..], &["helm delete", "kubectl delete"]);
}

#[test]
fn test_failed_destroy_fails_run() {
    let ctx = TestContext::new();
    let output = ctx.run_scenario("with-only-pipelines", Some("terraform destroy"));

    assert!(!output.success);
    let calls = ctx.calls();
    assert!(calls[1].has_arg(r#"kubeflow_components=["'katib'", "'pipelines'"]"#));
    assert_eq!(calls.last().map(Call::label).as_deref(), Some("terraform destroy"));

    // The module copy holding the state outlives a failed destroy
    let destroy = calls.last().unwrap();
    assert!(destroy.cwd.starts_with(&ctx.work_dir));
    assert!(destroy.cwd.join("main.tf").exists());
    assert!(output.stdout.contains("State kept in"), "stdout: {}", output.stdout);
}

#[test]
fn test_terraform_only_scenario_needs_only_terraform() {
    let ctx = TestContext::new();
    let mock = env!("CARGO_BIN_EXE_mock-tool");
    fs::write(
        &ctx.config_path,
        format!(
            r#"
[tools.terraform]
path = '{mock}'
args = ["terraform"]

[defaults]
max_retries = 1
time_between_retries_secs = 0
"#
        ),
    )
    .unwrap();

    // Nothing on PATH, so helm and kubectl cannot be found
    let empty_bin = ctx.root().join("bin");
    fs::create_dir_all(&empty_bin).unwrap();
    let module = ctx.module_dir.to_str().unwrap();

    let output = ctx.run_harness_env(
        &["run", "with-sane-values", "--module", module],
        None,
        &[("PATH", &empty_bin)],
    );
    assert!(
        output.success,
        "run failed:\nstdout: {}\nstderr: {}",
        output.stdout, output.stderr
    );
    assert_eq!(
        labels(&ctx.calls()),
        vec!["terraform init", "terraform apply", "terraform destroy"]
    );

    let output = ctx.run_harness_env(
        &["run", "with-existing-istio-cert-manager", "--module", module],
        None,
        &[("PATH", &empty_bin)],
    );
    assert!(!output.success);
    assert!(output.stderr.contains("Tool 'helm' not found"), "stderr: {}", output.stderr);
    assert_eq!(ctx.calls().len(), 3);
}

#[test]
fn test_plan_runs_nothing() {
    let ctx = TestContext::new();
    let module = ctx.module_dir.to_str().unwrap();
    let output = ctx.run_harness(&["plan", "with-old-values", "--module", module], None);

    assert!(output.success, "plan failed: {}", output.stderr);
    assert!(output.stdout.contains("terraform apply"));
    assert!(output.stdout.contains("kubeflow_version=1.0.2"));
    assert!(output.stdout.contains("Teardown:"));
    assert!(output.stdout.contains("terraform destroy"));
    assert!(ctx.calls().is_empty());
}

#[test]
fn test_check_reports_versions() {
    let ctx = TestContext::new();
    let output = ctx.run_harness(&["check", "--json"], None);

    assert!(output.success, "check failed: {}", output.stderr);
    let results: Value = serde_json::from_str(&output.stdout).expect("Invalid JSON");
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["tool"], "terraform");
    assert_eq!(results[0]["version"], "terraform v0.0.0-mock");
}

#[test]
fn test_json_report_and_unknown_scenario() {
    let ctx = TestContext::new();
    let module = ctx.module_dir.to_str().unwrap();
    let output = ctx.run_harness(
        &["run", "with-sane-values", "no-such-scenario", "--module", module, "--json"],
        None,
    );

    assert!(!output.success);
    let reports: Value = serde_json::from_str(&output.stdout).expect("Invalid JSON");
    let reports = reports.as_array().unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["name"], "with-sane-values");
    assert_eq!(reports[0]["passed"], true);
    assert_eq!(reports[0]["teardown"][0]["ok"], true);
    assert_eq!(reports[1]["passed"], false);
    assert!(reports[1]["error"].as_str().unwrap().contains("Unknown scenario"));
}

#[test]
fn test_parallel_runs_every_scenario() {
    let ctx = TestContext::new();
    let module = ctx.module_dir.to_str().unwrap();
    let output = ctx.run_harness(
        &["run", "with-old-values", "with-sane-values", "--module", module, "--parallel"],
        None,
    );

    assert!(output.success, "run failed: {}", output.stderr);
    let calls = ctx.calls();
    assert_eq!(calls.iter().filter(|c| c.label() == "terraform apply").count(), 2);
    assert_eq!(calls.iter().filter(|c| c.label() == "terraform destroy").count(), 2);
}

#[test]
fn test_yaml_scenario_file() {
    let ctx = TestContext::new();
    let scenario = ctx.root().join("scenario.yaml");
    fs::write(
        &scenario,
        r#"
name: namespace-only
module: module
steps:
  - action: create_namespace
    name: kubeflow
  - action: terraform_apply
    module: istio
    vars:
      use_cert_manager: false
"#,
    )
    .unwrap();

    let output = ctx.run_harness(&["run", scenario.to_str().unwrap()], None);
    assert!(output.success, "run failed: {}", output.stderr);

    let calls = ctx.calls();
    assert_eq!(
        labels(&calls),
        vec![
            "kubectl create",
            "terraform init",
            "terraform apply",
            "terraform destroy",
            "kubectl delete",
        ]
    );
    assert!(calls[2].has_arg("use_cert_manager=false"));
    assert_eq!(calls[4].argv, vec!["delete", "namespace", "kubeflow"]);
}

#[test]
fn test_missing_config_file_is_an_error() {
    let ctx = TestContext::new();
    let output = Command::new(&ctx.harness_bin)
        .args(["--config", "/nonexistent/infra-harness.toml", "list"])
        .output()
        .expect("Failed to run infra-harness");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
}
