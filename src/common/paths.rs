//! Configuration and output paths
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/cdp-runner/`, `~/.local/share/cdp-runner/logs`
//! - macOS: `~/Library/Application Support/cdp-runner/`
//! - Windows: `%APPDATA%\cdp-runner\`

use std::io;
use std::path::{Path, PathBuf};

/// Application name used for config and data directories
const APP_NAME: &str = "cdp-runner";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Default element registry location, next to the config file
pub fn default_elements_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("elements.json"))
}

/// Default test-case file location, next to the config file
pub fn default_test_cases_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("test-cases.json"))
}

/// Get the default log directory for reports and capture artifacts
pub fn log_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("logs"))
}

/// Resolve the directory reports are written to
///
/// Precedence: explicit (CLI) > configured > platform default > `./logs`.
/// Relative paths are resolved against the current directory.
pub fn resolve_log_dir(explicit: Option<&Path>, configured: Option<&Path>) -> PathBuf {
    let chosen = explicit
        .or(configured)
        .map(Path::to_path_buf)
        .or_else(log_dir)
        .unwrap_or_else(|| PathBuf::from("logs"));

    if chosen.is_absolute() {
        chosen
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&chosen))
            .unwrap_or(chosen)
    }
}

/// Ensure a directory exists
pub fn ensure_dir(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_is_valid() {
        let dir = config_dir();
        assert!(dir.is_some());
    }

    #[test]
    fn test_explicit_log_dir_wins() {
        let dir = resolve_log_dir(Some(Path::new("/tmp/a")), Some(Path::new("/tmp/b")));
        assert_eq!(dir, PathBuf::from("/tmp/a"));
    }

    #[test]
    fn test_relative_log_dir_is_absolutized() {
        let dir = resolve_log_dir(None, Some(Path::new("reports")));
        assert!(dir.is_absolute());
        assert!(dir.ends_with("reports"));
    }
}
