//! Error types for the conformance harness
//!
//! Every blocking wait and every decoder reports through this one enum so
//! scenarios can tell a stuck exchange apart from a payload that does not
//! contain what the test expected.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Session Errors ===
    #[error("Failed to launch '{program}': {reason}")]
    LaunchFailed { program: String, reason: String },

    #[error("Timed out after {secs:.1}s waiting for {expected:?}")]
    MatchTimeout { expected: String, secs: f64 },

    #[error("Process output ended while waiting for {expected:?}")]
    SessionClosed { expected: String },

    // === Decode Errors ===
    #[error("No record '{urn}' with label '{label}' in decoded payload")]
    DecodeNotFound { urn: String, label: String },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Binary for role '{role}' not found. Searched: {searched}")]
    BinaryNotFound { role: String, searched: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Test Errors ===
    #[error("Test assertion failed: {0}")]
    TestAssertion(String),
}

impl Error {
    /// Create a launch failure for the given program
    pub fn launch_failed(program: &str, reason: impl std::fmt::Display) -> Self {
        Self::LaunchFailed {
            program: program.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a match timeout error
    pub fn match_timeout(expected: &str, timeout: std::time::Duration) -> Self {
        Self::MatchTimeout {
            expected: expected.to_string(),
            secs: timeout.as_secs_f64(),
        }
    }

    /// Create a not-found error for a record lookup
    pub fn decode_not_found(urn: &str, label: &str) -> Self {
        Self::DecodeNotFound {
            urn: urn.to_string(),
            label: label.to_string(),
        }
    }

    /// Create a binary not found error with search paths
    pub fn binary_not_found<S: AsRef<str>>(role: &str, paths: &[S]) -> Self {
        Self::BinaryNotFound {
            role: role.to_string(),
            searched: paths.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", "),
        }
    }

    /// Whether this error means the expected text never showed up
    ///
    /// Call sites that report expectations as booleans fold both a timeout
    /// and an early end-of-stream into `false`.
    pub fn is_missed_expectation(&self) -> bool {
        matches!(self, Self::MatchTimeout { .. } | Self::SessionClosed { .. })
    }
}
