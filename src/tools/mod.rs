//! Drivers for the external tools a scenario composes
//!
//! Nothing here reimplements terraform, helm or kubectl. Each driver builds
//! argument lists the way the tool expects them and hands them to a
//! [`CommandRunner`].

pub mod helm;
pub mod kubectl;
pub mod process;
pub mod random;
pub mod terraform;
pub mod workspace;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::common::{Config, Result, ToolConfig};
pub use process::{CommandRunner, Invocation, RecordingRunner, SystemRunner, ToolOutput};

/// The external tools the harness drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Terraform,
    Helm,
    Kubectl,
}

impl Tool {
    pub const ALL: [Tool; 3] = [Tool::Terraform, Tool::Helm, Tool::Kubectl];

    /// Executable name on PATH
    pub fn name(&self) -> &'static str {
        match self {
            Tool::Terraform => "terraform",
            Tool::Helm => "helm",
            Tool::Kubectl => "kubectl",
        }
    }

    /// Arguments that print the tool version
    pub fn version_args(&self) -> &'static [&'static str] {
        match self {
            Tool::Terraform => &["version"],
            Tool::Helm => &["version", "--short"],
            Tool::Kubectl => &["version", "--client"],
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolved tool locations plus the runner that executes them
#[derive(Clone)]
pub struct Toolchain {
    runner: Arc<dyn CommandRunner>,
    terraform: ToolConfig,
    helm: ToolConfig,
    kubectl: ToolConfig,
}

impl fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Toolchain")
            .field("terraform", &self.terraform.path)
            .field("helm", &self.helm.path)
            .field("kubectl", &self.kubectl.path)
            .finish()
    }
}

impl Toolchain {
    /// Resolve tools from config or PATH, failing only if one in `required`
    /// is missing. The rest fall back to their bare name.
    pub fn for_tools(config: &Config, runner: Arc<dyn CommandRunner>, required: &BTreeSet<Tool>) -> Result<Self> {
        let resolve = |tool: Tool| -> Result<ToolConfig> {
            if required.contains(&tool) {
                config.require_tool(tool.name())
            } else {
                Ok(config.get_tool(tool.name()).unwrap_or_else(|| bare(tool)))
            }
        };
        Ok(Self {
            runner,
            terraform: resolve(Tool::Terraform)?,
            helm: resolve(Tool::Helm)?,
            kubectl: resolve(Tool::Kubectl)?,
        })
    }

    /// Like [`Toolchain::for_tools`] with nothing required. For runners that
    /// never spawn anything.
    pub fn from_config_or_names(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        let resolve = |tool: Tool| config.get_tool(tool.name()).unwrap_or_else(|| bare(tool));
        Self {
            runner,
            terraform: resolve(Tool::Terraform),
            helm: resolve(Tool::Helm),
            kubectl: resolve(Tool::Kubectl),
        }
    }

    /// Every tool resolved to its bare name
    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            terraform: bare(Tool::Terraform),
            helm: bare(Tool::Helm),
            kubectl: bare(Tool::Kubectl),
        }
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn tool_config(&self, tool: Tool) -> &ToolConfig {
        match tool {
            Tool::Terraform => &self.terraform,
            Tool::Helm => &self.helm,
            Tool::Kubectl => &self.kubectl,
        }
    }

    /// Build an invocation of `tool` with `args`
    pub fn invocation<I, S>(&self, tool: Tool, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let config = self.tool_config(tool);
        Invocation {
            tool,
            program: config.path.clone(),
            prefix: config.args.clone(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    /// Run and return the output, turning a non-zero exit into an error
    pub async fn run_checked(&self, invocation: &Invocation) -> Result<ToolOutput> {
        self.runner.run(invocation).await?.into_result(invocation)
    }

    /// Run `tool <version args>` and return the first output line
    pub async fn version(&self, tool: Tool) -> Result<String> {
        let invocation = self.invocation(tool, tool.version_args().iter().copied());
        let output = self.run_checked(&invocation).await?;
        Ok(output.stdout.lines().next().unwrap_or_default().trim().to_string())
    }
}

fn bare(tool: Tool) -> ToolConfig {
    ToolConfig {
        path: PathBuf::from(tool.name()),
        args: Vec::new(),
    }
}
