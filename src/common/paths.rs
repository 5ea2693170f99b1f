//! Configuration and scratch locations

use std::path::PathBuf;

/// Name used for per-user directories
const APP_NAME: &str = "infra-harness";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/infra-harness/`
/// - macOS: `~/Library/Application Support/infra-harness/`
/// - Windows: `%APPDATA%\infra-harness\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Directory under which module copies are created
///
/// `INFRA_HARNESS_WORK_DIR` overrides the system temp dir.
pub fn work_dir() -> PathBuf {
    std::env::var_os("INFRA_HARNESS_WORK_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}
