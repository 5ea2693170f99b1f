//! Infra Harness - apply/destroy scenarios for infrastructure modules
//!
//! This library drives terraform, helm and kubectl through scripted
//! scenarios and guarantees every resource a scenario creates is torn down.

pub mod cli;
pub mod commands;
pub mod common;
pub mod testing;
pub mod tools;

// Re-export commonly used types for tests
pub use common::{Config, Error, Result};
pub use testing::{ScenarioRunner, TestResult, TestScenario, TestStep};
