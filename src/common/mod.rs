//! Common utilities shared by the CLI, drivers and scenario runner

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use config::{Config, ToolConfig};
pub use error::{Error, Result};
