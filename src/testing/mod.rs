//! Scenario runner
//!
//! Scenarios come from the built-in catalogue or from YAML files. Each one
//! is a list of steps that create resources through the tool drivers; every
//! creating step schedules its own teardown, which runs however the body ends.

pub mod catalog;
mod config;
mod runner;
mod teardown;

pub use config::*;
pub use runner::{load_scenario, run_scenario, RunOptions, ScenarioRunner, StepFailure, TestResult};
pub use teardown::{TeardownAction, TeardownReport, TeardownStack};
