//! Common utilities shared by the CLI, the scenario runner and the library

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
