//! Error types for the harness
//!
//! Messages name the tool and command that failed so a scenario report can
//! be read without digging through logs.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Tool Errors ===
    #[error("Tool '{name}' not found. Searched: {searched}")]
    ToolNotFound { name: String, searched: String },

    #[error("Failed to spawn '{command}': {source}")]
    ToolSpawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{tool} exited with code {code:?}: {command}\n{output}")]
    ToolFailed {
        tool: String,
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("'{command}' still failing after {attempts} attempts: {last}")]
    RetriesExhausted {
        command: String,
        attempts: u32,
        last: String,
    },

    // === Timeout Errors ===
    #[error("Timed out after {secs} seconds waiting for {what}")]
    Timeout { what: String, secs: u64 },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid scenario file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Scenario Errors ===
    #[error("Test assertion failed: {0}")]
    TestAssertion(String),

    #[error("Teardown '{action}' failed: {reason}")]
    Teardown { action: String, reason: String },

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a tool not found error with search locations
    pub fn tool_not_found<S: AsRef<str>>(name: &str, searched: &[S]) -> Self {
        Self::ToolNotFound {
            name: name.to_string(),
            searched: searched
                .iter()
                .map(|s| s.as_ref())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Create a tool failed error from captured output
    pub fn tool_failed(tool: &str, command: &str, code: Option<i32>, output: &str) -> Self {
        Self::ToolFailed {
            tool: tool.to_string(),
            command: command.to_string(),
            code,
            output: output.trim_end().to_string(),
        }
    }

    /// Create a teardown failed error
    pub fn teardown(action: &str, reason: impl ToString) -> Self {
        Self::Teardown {
            action: action.to_string(),
            reason: reason.to_string(),
        }
    }
}
