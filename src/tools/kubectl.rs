//! kubectl driver: namespace lifecycle and readiness waits

use std::time::{Duration, Instant};

use super::{Tool, Toolchain};
use crate::common::{Error, Result};

/// Which cluster and namespace a kubectl call targets
///
/// Empty strings mean "use kubectl's default".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubectlOptions {
    pub context: String,
    pub config_path: String,
    pub namespace: String,
}

impl KubectlOptions {
    pub fn new(context: &str, config_path: &str, namespace: &str) -> Self {
        Self {
            context: context.to_string(),
            config_path: config_path.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// `--context`/`--kubeconfig` for the non-empty fields
    pub fn cluster_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.context.is_empty() {
            args.push("--context".to_string());
            args.push(self.context.clone());
        }
        if !self.config_path.is_empty() {
            args.push("--kubeconfig".to_string());
            args.push(self.config_path.clone());
        }
        args
    }
}

fn args(options: &KubectlOptions, rest: &[&str]) -> Vec<String> {
    let mut args = options.cluster_args();
    args.extend(rest.iter().map(|s| s.to_string()));
    args
}

pub fn create_namespace_args(options: &KubectlOptions, name: &str) -> Vec<String> {
    args(options, &["create", "namespace", name])
}

pub fn delete_namespace_args(options: &KubectlOptions, name: &str) -> Vec<String> {
    args(options, &["delete", "namespace", name])
}

/// `kubectl create namespace <name>`
pub async fn create_namespace(tools: &Toolchain, options: &KubectlOptions, name: &str) -> Result<()> {
    tracing::info!(namespace = name, "Creating namespace");
    let inv = tools.invocation(Tool::Kubectl, create_namespace_args(options, name));
    tools.run_checked(&inv).await?;
    Ok(())
}

/// `kubectl delete namespace <name>`
pub async fn delete_namespace(tools: &Toolchain, options: &KubectlOptions, name: &str) -> Result<()> {
    tracing::info!(namespace = name, "Deleting namespace");
    let inv = tools.invocation(Tool::Kubectl, delete_namespace_args(options, name));
    tools.run_checked(&inv).await?;
    Ok(())
}

/// What a readiness wait checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitTarget {
    /// Resource kind, e.g. `deployment`
    pub resource: String,
    /// Condition name, e.g. `Available`
    pub condition: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

pub fn wait_args(options: &KubectlOptions, target: &WaitTarget, per_try: Duration) -> Vec<String> {
    let mut args = options.cluster_args();
    if !options.namespace.is_empty() {
        args.push("--namespace".to_string());
        args.push(options.namespace.clone());
    }
    args.extend([
        "wait".to_string(),
        format!("--for=condition={}", target.condition),
        target.resource.clone(),
        "--all".to_string(),
        format!("--timeout={}s", per_try.as_secs().max(1)),
    ]);
    args
}

/// Poll `kubectl wait` until every matching resource meets the condition
///
/// `kubectl wait` fails straight away when no resource exists yet, so the
/// call is repeated every `poll_interval` until `timeout` has passed.
pub async fn wait_for(tools: &Toolchain, options: &KubectlOptions, target: &WaitTarget) -> Result<()> {
    let started = Instant::now();
    let deadline = started + target.timeout;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let inv = tools.invocation(Tool::Kubectl, wait_args(options, target, remaining));
        let output = tools.runner().run(&inv).await?;
        if output.success() {
            tracing::info!(
                namespace = %options.namespace,
                resource = %target.resource,
                elapsed_secs = started.elapsed().as_secs(),
                "Ready"
            );
            return Ok(());
        }

        if Instant::now() + target.poll_interval >= deadline {
            return Err(Error::Timeout {
                what: format!(
                    "{} in namespace '{}' to be {}",
                    target.resource, options.namespace, target.condition
                ),
                secs: target.timeout.as_secs(),
            });
        }

        tracing::debug!(
            attempt,
            output = %output.combined().trim_end(),
            "Not ready yet"
        );
        tokio::time::sleep(target.poll_interval).await;
    }
}
