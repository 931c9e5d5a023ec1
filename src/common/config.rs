//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{config_path, transcript_dir};
use super::{Error, Result};
use crate::session::Role;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Locations of the binaries under test
    #[serde(default)]
    pub binaries: Binaries,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Session transcript settings
    #[serde(default)]
    pub transcripts: TranscriptConfig,
}

/// Binaries under test, one per role
#[derive(Debug, Deserialize, Default)]
pub struct Binaries {
    pub server: Option<BinaryConfig>,
    pub client: Option<BinaryConfig>,
    pub bootstrap_server: Option<BinaryConfig>,
}

/// Configuration for a binary under test
#[derive(Debug, Deserialize, Clone)]
pub struct BinaryConfig {
    /// Path to the executable
    pub path: PathBuf,

    /// Arguments always passed before scenario-specific ones
    #[serde(default)]
    pub args: Vec<String>,
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Default timeout for every expectation
    #[serde(default = "default_timeout")]
    pub default_secs: f64,

    /// Timeout for bootstrap-server sessions (bootstrap exchanges are slow)
    #[serde(default = "default_bootstrap_timeout")]
    pub bootstrap_secs: f64,

    /// How long `quit` waits for the process to exit
    #[serde(default = "default_quit_timeout")]
    pub quit_secs: f64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            default_secs: default_timeout(),
            bootstrap_secs: default_bootstrap_timeout(),
            quit_secs: default_quit_timeout(),
        }
    }
}

fn default_timeout() -> f64 {
    3.0
}
fn default_bootstrap_timeout() -> f64 {
    13.0
}
fn default_quit_timeout() -> f64 {
    5.0
}

impl Timeouts {
    /// Expectation timeout for a session of the given role
    pub fn for_role(&self, role: Role) -> Duration {
        match role {
            Role::BootstrapServer => Duration::from_secs_f64(self.bootstrap_secs),
            Role::Server | Role::Client => Duration::from_secs_f64(self.default_secs),
        }
    }

    pub fn quit(&self) -> Duration {
        Duration::from_secs_f64(self.quit_secs)
    }
}

/// Transcript configuration
#[derive(Debug, Deserialize, Default)]
pub struct TranscriptConfig {
    /// Directory receiving `<role>_log.txt` files
    pub dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from an explicit path or the default config file
    ///
    /// Returns default configuration if no file exists
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Get the binary configuration for a role
    ///
    /// Falls back to searching PATH for the role's default executable name
    pub fn binary(&self, role: Role) -> Result<BinaryConfig> {
        let configured = match role {
            Role::Server => &self.binaries.server,
            Role::Client => &self.binaries.client,
            Role::BootstrapServer => &self.binaries.bootstrap_server,
        };
        if let Some(config) = configured {
            return Ok(config.clone());
        }

        let name = role.default_executable();
        which::which(name)
            .map(|path| BinaryConfig {
                path,
                args: Vec::new(),
            })
            .map_err(|_| Error::binary_not_found(&role.to_string(), &[name, "PATH"]))
    }

    /// Directory for session transcripts, if one can be determined
    pub fn transcript_dir(&self) -> Option<PathBuf> {
        self.transcripts.dir.clone().or_else(transcript_dir)
    }
}
