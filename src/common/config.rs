//! Configuration file handling

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// External tool locations, keyed by tool name
    #[serde(default)]
    pub tools: HashMap<String, ToolConfig>,

    /// Defaults applied to every terraform run
    #[serde(default)]
    pub defaults: Defaults,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Log file settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for an external tool
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    /// Path to the tool executable
    pub path: PathBuf,

    /// Arguments placed before every invocation
    #[serde(default)]
    pub args: Vec<String>,
}

/// Defaults for terraform runs
#[derive(Debug, Deserialize)]
pub struct Defaults {
    /// Retries on a retryable terraform error
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause between retries
    #[serde(default = "default_time_between_retries")]
    pub time_between_retries_secs: u64,

    /// Pass `-no-color` to terraform
    #[serde(default)]
    pub no_color: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            time_between_retries_secs: default_time_between_retries(),
            no_color: false,
        }
    }
}

fn default_max_retries() -> u32 {
    5
}
fn default_time_between_retries() -> u64 {
    300
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Overrides every `settle` step when set
    #[serde(default)]
    pub settle_secs: Option<u64>,

    /// Default timeout for `wait_ready` steps
    #[serde(default = "default_wait_ready")]
    pub wait_ready_secs: u64,

    /// Default poll interval for `wait_ready` steps
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            settle_secs: None,
            wait_ready_secs: default_wait_ready(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_wait_ready() -> u64 {
    600
}
fn default_poll_interval() -> u64 {
    10
}

/// Log file configuration
#[derive(Debug, Deserialize, Default)]
pub struct LoggingConfig {
    /// Write a full-detail log here in addition to stderr
    pub file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Get tool configuration by name
    ///
    /// Falls back to searching PATH if not explicitly configured
    pub fn get_tool(&self, name: &str) -> Option<ToolConfig> {
        if let Some(config) = self.tools.get(name) {
            return Some(config.clone());
        }

        which::which(name).ok().map(|path| ToolConfig {
            path,
            args: Vec::new(),
        })
    }

    /// Resolve a tool or fail with the places that were searched
    pub fn require_tool(&self, name: &str) -> Result<ToolConfig> {
        self.get_tool(name)
            .ok_or_else(|| Error::tool_not_found(name, &["config [tools]", "PATH"]))
    }

    /// Pause between terraform retries
    pub fn time_between_retries(&self) -> Duration {
        Duration::from_secs(self.defaults.time_between_retries_secs)
    }

    /// Effective duration of a settle step that asked for `requested` seconds
    pub fn settle_duration(&self, requested: u64) -> Duration {
        Duration::from_secs(self.timeouts.settle_secs.unwrap_or(requested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.defaults.max_retries, 5);
        assert_eq!(config.time_between_retries(), Duration::from_secs(300));
        assert!(!config.defaults.no_color);
        assert_eq!(config.settle_duration(180), Duration::from_secs(180));
    }

    #[test]
    fn test_explicit_tool_wins_over_path() {
        let config = Config::parse(
            r#"
[tools.terraform]
path = "/opt/mock-tool"
args = ["terraform"]

[timeouts]
settle_secs = 0
"#,
        )
        .unwrap();

        let tool = config.get_tool("terraform").unwrap();
        assert_eq!(tool.path, PathBuf::from("/opt/mock-tool"));
        assert_eq!(tool.args, vec!["terraform".to_string()]);
        assert_eq!(config.settle_duration(180), Duration::ZERO);
    }

    #[test]
    fn test_invalid_toml_is_config_parse_error() {
        let err = Config::parse("[defaults\nmax_retries = 1").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }
}
