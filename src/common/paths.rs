//! Configuration and transcript paths
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/lwm2m-conformance/`, `~/.local/share/lwm2m-conformance/`
//! - macOS: `~/Library/Application Support/lwm2m-conformance/`
//! - Windows: `%APPDATA%\lwm2m-conformance\`

use std::io;
use std::path::PathBuf;

/// Name used for the per-user directories
const APP_NAME: &str = "lwm2m-conformance";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Default directory for session transcripts
pub fn transcript_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.data_dir().join("transcripts"))
}

/// Ensure a directory exists, creating it and its parents if needed
pub fn ensure_dir(dir: &PathBuf) -> io::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_ends_with_toml() {
        if let Some(path) = config_path() {
            assert_eq!(path.file_name().unwrap(), "config.toml");
        }
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        // Second call is a no-op
        ensure_dir(&nested).unwrap();
    }
}
