//! Helm driver: generic commands, chart install and release delete

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::kubectl::KubectlOptions;
use super::{Tool, Toolchain};
use crate::common::Result;

/// Options shared by every helm call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelmOptions {
    /// Cluster and namespace; `None` adds no cluster flags at all
    pub kubectl: Option<KubectlOptions>,
    /// `--set key=value`
    pub set_values: BTreeMap<String, String>,
    /// `--set-string key=value`
    pub set_string_values: BTreeMap<String, String>,
    /// `-f file`
    pub values_files: Vec<PathBuf>,
    /// `--version` for install
    pub version: String,
    /// Extra arguments per subcommand, e.g. `"install" => ["--wait"]`
    pub extra_args: BTreeMap<String, Vec<String>>,
}

/// `helm <cmd> <cluster flags> <namespace flag> <args>`
pub fn command_args(options: &HelmOptions, cmd: &str, additional: &[String]) -> Vec<String> {
    let mut args = vec![cmd.to_string()];
    if let Some(kube) = &options.kubectl {
        if !kube.context.is_empty() {
            args.push("--kube-context".to_string());
            args.push(kube.context.clone());
        }
        if !kube.config_path.is_empty() {
            args.push("--kubeconfig".to_string());
            args.push(kube.config_path.clone());
        }
        if !kube.namespace.is_empty() {
            args.push("--namespace".to_string());
            args.push(kube.namespace.clone());
        }
    }
    args.extend(additional.iter().cloned());
    args
}

fn values_args(options: &HelmOptions) -> Vec<String> {
    let mut args = Vec::new();
    for (key, value) in &options.set_values {
        args.push("--set".to_string());
        args.push(format!("{}={}", key, value));
    }
    for (key, value) in &options.set_string_values {
        args.push("--set-string".to_string());
        args.push(format!("{}={}", key, value));
    }
    for file in &options.values_files {
        args.push("-f".to_string());
        args.push(file.display().to_string());
    }
    args
}

fn extra_args(options: &HelmOptions, cmd: &str) -> Vec<String> {
    options.extra_args.get(cmd).cloned().unwrap_or_default()
}

pub fn install_args(options: &HelmOptions, chart: &str, release: &str) -> Vec<String> {
    let mut rest = extra_args(options, "install");
    if !options.version.is_empty() {
        rest.push("--version".to_string());
        rest.push(options.version.clone());
    }
    rest.extend(values_args(options));
    rest.push(release.to_string());
    rest.push(chart.to_string());
    command_args(options, "install", &rest)
}

pub fn delete_args(options: &HelmOptions, release: &str, purge: bool) -> Vec<String> {
    let mut rest = extra_args(options, "delete");
    if !purge {
        rest.push("--keep-history".to_string());
    }
    rest.push(release.to_string());
    command_args(options, "delete", &rest)
}

/// Run any helm subcommand (e.g. `repo add`) and return stdout
pub async fn run_command(tools: &Toolchain, options: &HelmOptions, cmd: &str, args: &[String]) -> Result<String> {
    let mut rest = extra_args(options, cmd);
    rest.extend(args.iter().cloned());
    let inv = tools.invocation(Tool::Helm, command_args(options, cmd, &rest));
    tracing::info!(command = %inv, "Running helm");
    Ok(tools.run_checked(&inv).await?.stdout)
}

/// `helm install <release> <chart>`
pub async fn install(tools: &Toolchain, options: &HelmOptions, chart: &str, release: &str) -> Result<()> {
    let inv = tools.invocation(Tool::Helm, install_args(options, chart, release));
    tracing::info!(chart, release, version = %options.version, "Installing chart");
    tools.run_checked(&inv).await?;
    Ok(())
}

/// `helm delete <release>`; without `purge` the release history is kept
pub async fn delete(tools: &Toolchain, options: &HelmOptions, release: &str, purge: bool) -> Result<()> {
    let inv = tools.invocation(Tool::Helm, delete_args(options, release, purge));
    tracing::info!(release, purge, "Deleting release");
    tools.run_checked(&inv).await?;
    Ok(())
}
