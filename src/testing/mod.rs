//! Scenario runner
//!
//! Reads YAML test scenarios, drives the LwM2M binaries through
//! [`Session`](crate::session::Session)s and checks the decoded output.
//! Assertions go through the payload decoders and the registration parser
//! instead of ad-hoc string matching wherever the output has structure.

mod config;
mod runner;

pub use config::*;
pub use runner::{load_scenario, run_scenario, TestResult};
