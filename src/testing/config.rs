//! Test scenario configuration types
//!
//! Defines the data structures for deserializing YAML test scenarios. The
//! built-in catalogue produces the same types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use crate::tools::kubectl::KubectlOptions;
use crate::tools::terraform::Vars;
use crate::tools::Tool;

/// A complete test scenario loaded from a YAML file
#[derive(Deserialize, Debug, Clone)]
pub struct TestScenario {
    /// Name of the test scenario
    pub name: String,
    /// Optional description of what the test verifies
    pub description: Option<String>,
    /// Module root, relative to the scenario file. `--module` wins.
    pub module: Option<PathBuf>,
    /// Terraform defaults for every apply in this scenario
    #[serde(default)]
    pub defaults: ScenarioDefaults,
    /// The sequence of test steps to execute
    pub steps: Vec<TestStep>,
}

impl TestScenario {
    /// Tools the steps invoke, teardown included
    pub fn required_tools(&self) -> BTreeSet<Tool> {
        self.steps.iter().filter_map(TestStep::tool).collect()
    }
}

/// Per-scenario terraform defaults; unset fields fall back to the config file
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioDefaults {
    pub max_retries: Option<u32>,
    pub time_between_retries_secs: Option<u64>,
    pub no_color: Option<bool>,
}

/// How a failing step affects the rest of the scenario
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    /// Stop the scenario body; teardown still runs
    #[default]
    Require,
    /// Record the failure and carry on
    Expect,
}

/// Cluster selection shared by kubectl and helm steps
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterTarget {
    /// kubeconfig context; empty for the current one
    #[serde(default)]
    pub context: String,
    /// kubeconfig path; empty for the default lookup
    #[serde(default)]
    pub kubeconfig: String,
}

impl ClusterTarget {
    pub fn kubectl_options(&self, namespace: &str) -> KubectlOptions {
        KubectlOptions::new(&self.context, &self.kubeconfig, namespace)
    }
}

fn default_module() -> String {
    ".".to_string()
}

fn default_true() -> bool {
    true
}

fn default_resource() -> String {
    "deployment".to_string()
}

fn default_condition() -> String {
    "Available".to_string()
}

/// A single test step in the execution flow
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Copy a module, register its destroy, then init and apply it
    TerraformApply {
        /// Module directory relative to the module root (`.` = root)
        #[serde(default = "default_module")]
        module: String,
        /// Input variables, passed through unchanged
        #[serde(default)]
        vars: Vars,
        max_retries: Option<u32>,
        time_between_retries_secs: Option<u64>,
        no_color: Option<bool>,
        /// Outputs that must match after the apply, by name
        #[serde(default)]
        outputs: BTreeMap<String, Value>,
        #[serde(default)]
        check: Check,
    },
    /// Register the namespace delete, then create it
    CreateNamespace {
        name: String,
        #[serde(flatten)]
        cluster: ClusterTarget,
        #[serde(default)]
        check: Check,
    },
    /// Run an arbitrary helm command, e.g. `["repo", "update"]`
    Helm {
        args: Vec<String>,
        #[serde(flatten)]
        cluster: ClusterTarget,
        #[serde(default)]
        check: Check,
    },
    /// Register the release delete, then install a chart
    HelmInstall {
        chart: String,
        release: String,
        #[serde(default)]
        namespace: String,
        #[serde(default)]
        version: String,
        #[serde(default)]
        set: BTreeMap<String, String>,
        #[serde(default)]
        set_string: BTreeMap<String, String>,
        #[serde(default)]
        values_files: Vec<PathBuf>,
        /// Purge history on delete
        #[serde(default = "default_true")]
        purge: bool,
        #[serde(flatten)]
        cluster: ClusterTarget,
        #[serde(default)]
        check: Check,
    },
    /// Fixed pause for eventual consistency
    Settle { seconds: u64 },
    /// Poll until resources in a namespace meet a condition
    WaitReady {
        namespace: String,
        #[serde(default = "default_resource")]
        resource: String,
        #[serde(default = "default_condition")]
        condition: String,
        timeout_secs: Option<u64>,
        poll_interval_secs: Option<u64>,
        #[serde(flatten)]
        cluster: ClusterTarget,
        #[serde(default)]
        check: Check,
    },
}

impl TestStep {
    /// Assertion style for this step
    pub fn check(&self) -> Check {
        match self {
            TestStep::TerraformApply { check, .. }
            | TestStep::CreateNamespace { check, .. }
            | TestStep::Helm { check, .. }
            | TestStep::HelmInstall { check, .. }
            | TestStep::WaitReady { check, .. } => *check,
            TestStep::Settle { .. } => Check::Require,
        }
    }

    /// The tool this step and its teardown run
    pub fn tool(&self) -> Option<Tool> {
        match self {
            TestStep::TerraformApply { .. } => Some(Tool::Terraform),
            TestStep::CreateNamespace { .. } | TestStep::WaitReady { .. } => Some(Tool::Kubectl),
            TestStep::Helm { .. } | TestStep::HelmInstall { .. } => Some(Tool::Helm),
            TestStep::Settle { .. } => None,
        }
    }
}

impl fmt::Display for TestStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStep::TerraformApply { module, .. } => write!(f, "terraform apply ({})", module),
            TestStep::CreateNamespace { name, .. } => write!(f, "create namespace {}", name),
            TestStep::Helm { args, .. } => write!(f, "helm {}", args.join(" ")),
            TestStep::HelmInstall {
                chart,
                release,
                version,
                ..
            } => {
                write!(f, "helm install {} {}", release, chart)?;
                if !version.is_empty() {
                    write!(f, " ({})", version)?;
                }
                Ok(())
            }
            TestStep::Settle { seconds } => write!(f, "settle {}s", seconds),
            TestStep::WaitReady {
                namespace,
                resource,
                condition,
                ..
            } => write!(f, "wait for {} {} in {}", resource, condition, namespace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCENARIO: &str = r#"
name: existing-istio
description: cert-manager installed ahead of the module
module: ../module
defaults:
  max_retries: 1
steps:
  - action: create_namespace
    name: cert-manager
  - action: helm
    args: [repo, add, jetstack, https://charts.jetstack.io]
    check: expect
  - action: helm_install
    chart: jetstack/cert-manager
    release: cert-manager
    namespace: cert-manager
    version: v0.16.1
    set:
      installCRDs: "true"
  - action: terraform_apply
    module: istio
    vars:
      use_cert_manager: true
      ingress_gateway_annotations:
        foo: bar
      kubeflow_components: ["'katib'", "'pipelines'"]
  - action: settle
    seconds: 180
  - action: wait_ready
    namespace: istio-system
    context: kind-test
"#;

    #[test]
    fn test_parse_full_scenario() {
        let scenario: TestScenario = serde_yaml::from_str(SCENARIO).unwrap();
        assert_eq!(scenario.name, "existing-istio");
        assert_eq!(scenario.defaults.max_retries, Some(1));
        assert_eq!(scenario.steps.len(), 6);

        match &scenario.steps[0] {
            TestStep::CreateNamespace { name, cluster, check } => {
                assert_eq!(name, "cert-manager");
                assert_eq!(cluster, &ClusterTarget::default());
                assert_eq!(*check, Check::Require);
            }
            other => panic!("Expected CreateNamespace, got {other:?}"),
        }

        assert_eq!(scenario.steps[1].check(), Check::Expect);

        match &scenario.steps[2] {
            TestStep::HelmInstall { set, purge, .. } => {
                assert_eq!(set.get("installCRDs").map(String::as_str), Some("true"));
                assert!(*purge);
            }
            other => panic!("Expected HelmInstall, got {other:?}"),
        }

        match &scenario.steps[3] {
            TestStep::TerraformApply { module, vars, .. } => {
                assert_eq!(module, "istio");
                assert_eq!(vars["use_cert_manager"], json!(true));
                assert_eq!(vars["ingress_gateway_annotations"], json!({"foo": "bar"}));
                assert_eq!(vars["kubeflow_components"], json!(["'katib'", "'pipelines'"]));
            }
            other => panic!("Expected TerraformApply, got {other:?}"),
        }

        match &scenario.steps[5] {
            TestStep::WaitReady {
                resource,
                condition,
                cluster,
                ..
            } => {
                assert_eq!(resource, "deployment");
                assert_eq!(condition, "Available");
                assert_eq!(cluster.context, "kind-test");
            }
            other => panic!("Expected WaitReady, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let yaml = "name: x\nsteps:\n  - action: terraform_plan\n";
        assert!(serde_yaml::from_str::<TestScenario>(yaml).is_err());
    }

    #[test]
    fn test_required_tools() {
        let scenario: TestScenario = serde_yaml::from_str(SCENARIO).unwrap();
        assert_eq!(
            scenario.required_tools(),
            BTreeSet::from([Tool::Terraform, Tool::Helm, Tool::Kubectl])
        );

        let yaml = "name: tf\nsteps:\n  - action: terraform_apply\n  - action: settle\n    seconds: 5\n";
        let scenario: TestScenario = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(scenario.required_tools(), BTreeSet::from([Tool::Terraform]));
    }

    #[test]
    fn test_apply_outputs() {
        let yaml = "name: tf\nsteps:\n  - action: terraform_apply\n    outputs:\n      domain: foo.local\n";
        let scenario: TestScenario = serde_yaml::from_str(yaml).unwrap();
        match &scenario.steps[0] {
            TestStep::TerraformApply { module, outputs, .. } => {
                assert_eq!(module, ".");
                assert_eq!(outputs["domain"], json!("foo.local"));
            }
            other => panic!("Expected TerraformApply, got {other:?}"),
        }
    }

    #[test]
    fn test_step_display() {
        let step = TestStep::Settle { seconds: 180 };
        assert_eq!(step.to_string(), "settle 180s");
    }
}
