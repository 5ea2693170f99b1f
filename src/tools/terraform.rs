//! Terraform driver
//!
//! Builds `init`/`apply`/`destroy`/`output` command lines from a
//! [`TerraformOptions`] and retries runs that fail with a known transient
//! error. State, planning and reconciliation all stay inside terraform.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use super::{Invocation, Tool, Toolchain};
use crate::common::{Error, Result};

/// Variable name to value, rendered as `-var name=<hcl>`
pub type Vars = BTreeMap<String, Value>;

/// Transient failures worth retrying, pattern to description
const DEFAULT_RETRYABLE_ERRORS: &[(&str, &str)] = &[
    // Helm provider calls fail under network contention when many runs share a cluster
    (".*read: connection reset by peer.*", "Failed to reach helm charts repository."),
    (".*transport is closing.*", "Failed to reach Kubernetes API."),
    // Plugin downloads during init
    (".*unable to verify signature.*", "Failed to retrieve plugin due to transient network error."),
    (".*unable to verify checksum.*", "Failed to retrieve plugin due to transient network error."),
    (".*no provider exists with the given name.*", "Failed to retrieve plugin due to transient network error."),
    (".*registry service is unreachable.*", "Failed to retrieve plugin due to transient network error."),
    (".*Error installing provider.*", "Failed to retrieve plugin due to transient network error."),
    (".*Failed to query available provider packages.*", "Failed to retrieve plugin due to transient network error."),
    (".*timeout while waiting for plugin to start.*", "Failed to retrieve plugin due to transient network error."),
    (".*timed out waiting for server handshake.*", "Failed to retrieve plugin due to transient network error."),
    ("could not query provider registry for", "Failed to retrieve plugin due to transient network error."),
    // Provider eventual consistency
    (".*Provider produced inconsistent result after apply.*", "Provider eventual consistency error."),
];

/// Default pattern set for [`TerraformOptions::retryable_errors`]
pub fn default_retryable_errors() -> BTreeMap<String, String> {
    DEFAULT_RETRYABLE_ERRORS
        .iter()
        .map(|(pattern, desc)| (pattern.to_string(), desc.to_string()))
        .collect()
}

/// Everything one terraform run needs
#[derive(Debug, Clone, PartialEq)]
pub struct TerraformOptions {
    /// Directory terraform runs in
    pub terraform_dir: PathBuf,
    /// Input variables, passed through untouched
    pub vars: Vars,
    /// Retries after the first attempt on a retryable error
    pub max_retries: u32,
    /// Fixed pause between attempts
    pub time_between_retries: Duration,
    /// Output patterns that make a failure retryable. Empty means
    /// [`default_retryable_errors`].
    pub retryable_errors: BTreeMap<String, String>,
    /// Pass `-no-color`
    pub no_color: bool,
    /// Extra environment for the terraform process
    pub env: BTreeMap<String, String>,
}

impl TerraformOptions {
    pub fn new(terraform_dir: impl Into<PathBuf>) -> Self {
        Self {
            terraform_dir: terraform_dir.into(),
            vars: Vars::new(),
            max_retries: 5,
            time_between_retries: Duration::from_secs(5 * 60),
            retryable_errors: BTreeMap::new(),
            no_color: false,
            env: BTreeMap::new(),
        }
    }

    /// Set one variable, replacing any previous value
    pub fn set_var(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.vars.insert(name.to_string(), value.into());
        self
    }

    fn retry_patterns(&self) -> Result<Vec<(Regex, String)>> {
        let defaults;
        let source = if self.retryable_errors.is_empty() {
            defaults = default_retryable_errors();
            &defaults
        } else {
            &self.retryable_errors
        };
        source
            .iter()
            .map(|(pattern, desc)| {
                Regex::new(pattern)
                    .map(|re| (re, desc.clone()))
                    .map_err(|e| Error::Config(format!("Invalid retryable error '{}': {}", pattern, e)))
            })
            .collect()
    }
}

/// Render a value the way terraform reads `-var` values
///
/// Top-level strings are passed raw; strings inside lists and maps are
/// quoted. Maps render as `{"k" = v}`.
pub fn to_hcl(value: &Value, nested: bool) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) if nested => quote(s),
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(|v| to_hcl(v, true)).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{} = {}", quote(k), to_hcl(v, true)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `-var name=value` pairs, ordered by name
pub fn format_vars(vars: &Vars) -> Vec<String> {
    vars.iter()
        .flat_map(|(name, value)| ["-var".to_string(), format!("{}={}", name, to_hcl(value, false))])
        .collect()
}

pub fn init_args(options: &TerraformOptions) -> Vec<String> {
    let mut args = vec!["init".to_string(), "-upgrade=false".to_string()];
    if options.no_color {
        args.push("-no-color".to_string());
    }
    args
}

pub fn apply_args(options: &TerraformOptions) -> Vec<String> {
    mutating_args("apply", &["-input=false", "-auto-approve"], options)
}

pub fn destroy_args(options: &TerraformOptions) -> Vec<String> {
    mutating_args("destroy", &["-auto-approve", "-input=false"], options)
}

pub fn output_args(options: &TerraformOptions) -> Vec<String> {
    let mut args = vec!["output".to_string()];
    if options.no_color {
        args.push("-no-color".to_string());
    }
    args.push("-json".to_string());
    args
}

fn mutating_args(command: &str, flags: &[&str], options: &TerraformOptions) -> Vec<String> {
    let mut args = vec![command.to_string()];
    args.extend(flags.iter().map(|f| f.to_string()));
    if options.no_color {
        args.push("-no-color".to_string());
    }
    args.push("-lock=false".to_string());
    args.extend(format_vars(&options.vars));
    args
}

fn invocation(tools: &Toolchain, options: &TerraformOptions, args: Vec<String>) -> Invocation {
    let mut inv = tools.invocation(Tool::Terraform, args);
    inv.cwd = Some(options.terraform_dir.clone());
    inv.env = options.env.clone();
    inv
}

/// `terraform init`
pub async fn init(tools: &Toolchain, options: &TerraformOptions) -> Result<String> {
    run_with_retries(tools, options, init_args(options)).await
}

/// `terraform apply`
pub async fn apply(tools: &Toolchain, options: &TerraformOptions) -> Result<String> {
    run_with_retries(tools, options, apply_args(options)).await
}

/// `terraform init` followed by `terraform apply`
pub async fn init_and_apply(tools: &Toolchain, options: &TerraformOptions) -> Result<String> {
    init(tools, options).await?;
    apply(tools, options).await
}

/// `terraform destroy` with the same variables the apply used
pub async fn destroy(tools: &Toolchain, options: &TerraformOptions) -> Result<String> {
    run_with_retries(tools, options, destroy_args(options)).await
}

/// `terraform output -json`, reduced to name → value
pub async fn output_json(tools: &Toolchain, options: &TerraformOptions) -> Result<BTreeMap<String, Value>> {
    let raw = run_with_retries(tools, options, output_args(options)).await?;
    parse_outputs(&raw)
}

fn parse_outputs(raw: &str) -> Result<BTreeMap<String, Value>> {
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let parsed: BTreeMap<String, Value> = serde_json::from_str(raw)?;
    Ok(parsed
        .into_iter()
        .map(|(name, output)| {
            let value = match output {
                Value::Object(mut fields) => fields.remove("value").unwrap_or(Value::Object(fields)),
                other => other,
            };
            (name, value)
        })
        .collect())
}

/// Run one terraform command, retrying on retryable errors
///
/// Makes at most `max_retries + 1` attempts. A failure whose output matches
/// none of the patterns is returned immediately.
async fn run_with_retries(tools: &Toolchain, options: &TerraformOptions, args: Vec<String>) -> Result<String> {
    let patterns = options.retry_patterns()?;
    let inv = invocation(tools, options, args);
    let command = inv.command_line();

    let mut last = String::new();
    for attempt in 1..=options.max_retries.saturating_add(1) {
        tracing::info!(command = %command, attempt, dir = %options.terraform_dir.display(), "Running terraform");

        let output = tools.runner().run(&inv).await?;
        if output.success() {
            return Ok(output.stdout);
        }

        let combined = output.combined();
        let Some(reason) = matching_reason(&patterns, &combined) else {
            return Err(Error::tool_failed(
                Tool::Terraform.name(),
                &command,
                output.code,
                &combined,
            ));
        };
        last = combined;

        if attempt <= options.max_retries {
            tracing::warn!(
                command = %command,
                attempt,
                reason = %reason,
                delay_secs = options.time_between_retries.as_secs(),
                "Retryable terraform error, retrying"
            );
            tokio::time::sleep(options.time_between_retries).await;
        }
    }

    Err(Error::RetriesExhausted {
        command,
        attempts: options.max_retries.saturating_add(1),
        last: tail(&last, 20),
    })
}

fn matching_reason<'a>(patterns: &'a [(Regex, String)], output: &str) -> Option<&'a str> {
    patterns
        .iter()
        .find(|(re, _)| re.is_match(output))
        .map(|(_, desc)| desc.as_str())
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Whether `dir` looks like a terraform module
pub fn is_module_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .any(|e| e.path().extension().is_some_and(|ext| ext == "tf"))
        })
        .unwrap_or(false)
}
