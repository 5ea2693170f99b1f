//! Built-in scenarios for the Kubeflow module
//!
//! Each one applies the module (and, for the existing-istio case, its
//! prerequisites) with a fixed variable set and tears everything down again.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use super::config::{Check, ClusterTarget, ScenarioDefaults, TestScenario, TestStep};
use crate::tools::terraform::Vars;

/// Pause between the istio apply and the dependent module apply
pub const ISTIO_SETTLE_SECS: u64 = 180;

const CERT_MANAGER_CHART: &str = "jetstack/cert-manager";
const CERT_MANAGER_VERSION: &str = "v0.16.1";
const JETSTACK_REPO: &str = "https://charts.jetstack.io";

/// Name and one-line summary of every built-in scenario
pub const BUILTIN: &[(&str, &str)] = &[
    ("with-old-values", "Apply with pinned kubeflow and operator versions"),
    ("with-sane-values", "Apply with the module's default versions"),
    ("with-only-pipelines", "Apply with only the katib and pipelines components"),
    (
        "with-existing-istio-cert-manager",
        "Apply on top of a pre-installed cert-manager chart and istio module",
    ),
];

/// Look up a built-in scenario by name
pub fn find(name: &str) -> Option<TestScenario> {
    match name {
        "with-old-values" => Some(with_old_values()),
        "with-sane-values" => Some(with_sane_values()),
        "with-only-pipelines" => Some(with_only_pipelines()),
        "with-existing-istio-cert-manager" => Some(with_existing_istio_cert_manager()),
        _ => None,
    }
}

/// Every built-in scenario, in catalogue order
pub fn all() -> Vec<TestScenario> {
    BUILTIN.iter().filter_map(|(name, _)| find(name)).collect()
}

fn vars<const N: usize>(entries: [(&str, Value); N]) -> Vars {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Values every full install of the module uses
fn sane_values() -> Vars {
    vars([
        ("cert_manager_namespace", json!("cert-manager")),
        ("istio_operator_namespace", json!("istio-operator")),
        ("istio_namespace", json!("istio-system")),
        ("ingress_gateway_ip", json!("10.20.30.40")),
        ("use_cert_manager", json!(true)),
        ("install_istio", json!(true)),
        ("install_cert_manager", json!(true)),
        ("domain_name", json!("foo.local")),
        ("letsencrypt_email", json!("foo@bar.local")),
        ("ingress_gateway_annotations", json!({"foo": "bar"})),
    ])
}

fn apply(module: &str, vars: Vars, check: Check) -> TestStep {
    TestStep::TerraformApply {
        module: module.to_string(),
        vars,
        max_retries: None,
        time_between_retries_secs: None,
        no_color: None,
        outputs: BTreeMap::new(),
        check,
    }
}

fn scenario(name: &str, steps: Vec<TestStep>) -> TestScenario {
    let description = BUILTIN
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, d)| d.to_string());
    TestScenario {
        name: name.to_string(),
        description,
        module: None,
        defaults: ScenarioDefaults::default(),
        steps,
    }
}

pub fn with_old_values() -> TestScenario {
    let mut values = sane_values();
    values.insert("kubeflow_version".to_string(), json!("1.0.2"));
    values.insert("kubeflow_operator_version".to_string(), json!("1.0.0"));
    scenario("with-old-values", vec![apply(".", values, Check::Expect)])
}

pub fn with_sane_values() -> TestScenario {
    scenario(
        "with-sane-values",
        vec![apply(".", sane_values(), Check::Expect)],
    )
}

pub fn with_only_pipelines() -> TestScenario {
    let mut values = sane_values();
    values.insert(
        "kubeflow_components".to_string(),
        json!(["'katib'", "'pipelines'"]),
    );
    values.insert("kubeflow_version".to_string(), json!("1.1.0"));
    scenario("with-only-pipelines", vec![apply(".", values, Check::Expect)])
}

pub fn with_existing_istio_cert_manager() -> TestScenario {
    let cluster = ClusterTarget::default();

    let module_values = vars([
        ("ingress_gateway_ip", json!("10.20.30.40")),
        ("use_cert_manager", json!(true)),
        ("install_istio", json!(false)),
        ("install_cert_manager", json!(false)),
        ("domain_name", json!("foo.local")),
        ("letsencrypt_email", json!("foo@bar.local")),
        ("ingress_gateway_annotations", json!({"foo": "bar"})),
    ]);

    let istio_values = vars([
        ("ingress_gateway_ip", json!("10.20.30.40")),
        ("use_cert_manager", json!(true)),
        ("domain_name", json!("foo.local")),
        ("ingress_gateway_annotations", json!({"foo": "bar"})),
    ]);

    let mut set = BTreeMap::new();
    set.insert("installCRDs".to_string(), "true".to_string());

    scenario(
        "with-existing-istio-cert-manager",
        vec![
            TestStep::CreateNamespace {
                name: "cert-manager".to_string(),
                cluster: cluster.clone(),
                check: Check::Require,
            },
            TestStep::Helm {
                args: vec![
                    "repo".to_string(),
                    "add".to_string(),
                    "jetstack".to_string(),
                    JETSTACK_REPO.to_string(),
                ],
                cluster: cluster.clone(),
                check: Check::Expect,
            },
            TestStep::Helm {
                args: vec!["repo".to_string(), "update".to_string()],
                cluster: cluster.clone(),
                check: Check::Expect,
            },
            TestStep::HelmInstall {
                chart: CERT_MANAGER_CHART.to_string(),
                release: "cert-manager".to_string(),
                namespace: "cert-manager".to_string(),
                version: CERT_MANAGER_VERSION.to_string(),
                set,
                set_string: BTreeMap::new(),
                values_files: Vec::new(),
                purge: true,
                cluster,
                check: Check::Require,
            },
            apply("istio", istio_values, Check::Expect),
            TestStep::Settle {
                seconds: ISTIO_SETTLE_SECS,
            },
            apply(".", module_values, Check::Expect),
        ],
    )
}
