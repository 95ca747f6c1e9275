//! Error types for the runner
//!
//! Lifecycle and driver errors are folded into per-case results by the
//! executor; only setup errors (config, element registry, test-case files)
//! ever reach the top of a run.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the runner
#[derive(Error, Debug)]
pub enum Error {
    // === Port / Instance Errors ===
    #[error("No available port (base port: {base}, attempts: {attempts})")]
    NoPortAvailable { base: u16, attempts: u16 },

    #[error("Failed to start application: {0}")]
    SpawnFailed(String),

    #[error("Timed out after {waited_ms} ms waiting for port {port} to become ready")]
    StartupTimeout { port: u16, waited_ms: u64 },

    #[error("An instance is already registered on port {0}")]
    InstanceExists(u16),

    // === Automation Errors ===
    #[error("Element '{0}' is not defined in the element registry")]
    ElementNotFound(String),

    #[error("Timed out after {timeout_ms} ms waiting for {target}")]
    StepTimeout { target: String, timeout_ms: u64 },

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Unknown script '{name}'. Available: {available}")]
    ScriptNotFound { name: String, available: String },

    // === Configuration Errors ===
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a step timeout error
    pub fn step_timeout(target: &str, timeout_ms: u64) -> Self {
        Self::StepTimeout {
            target: target.to_string(),
            timeout_ms,
        }
    }

    /// Create a script not found error listing the registered scripts
    pub fn script_not_found<S: AsRef<str>>(name: &str, available: &[S]) -> Self {
        Self::ScriptNotFound {
            name: name.to_string(),
            available: available
                .iter()
                .map(|s| s.as_ref())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Create a file read error for a path
    pub fn file_read(path: &std::path::Path, error: impl std::fmt::Display) -> Self {
        Self::FileRead {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }

    /// Whether this error belongs to the setup class that aborts a whole run
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Error::ConfigInvalid(_)
                | Error::ConfigParse(_)
                | Error::FileRead { .. }
                | Error::ScriptNotFound { .. }
        )
    }
}
