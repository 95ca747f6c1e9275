//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// How to launch the application under test
    #[serde(default)]
    pub app: AppConfig,

    /// Remote-debugging port settings
    #[serde(default)]
    pub cdp: CdpConfig,

    /// UI wait timeouts
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Fixed delays between steps and cases
    #[serde(default)]
    pub delays: Delays,

    /// Default input for cases that don't specify one
    #[serde(default)]
    pub input: InputConfig,

    /// Transform probe used by the conditional click
    #[serde(default)]
    pub transform: TransformConfig,

    /// Batch execution defaults
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Instance teardown settings
    #[serde(default)]
    pub instance: InstanceConfig,

    /// Post-run payload capture
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Bundled automation driver settings
    #[serde(default)]
    pub driver: DriverConfig,

    /// Where reports and artifacts go
    #[serde(default)]
    pub logs: LogsConfig,

    /// Companion file locations
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Launch descriptor for the application under test
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Executable path, or a name looked up on PATH
    #[serde(default)]
    pub path: PathBuf,

    /// Base launch arguments; the port argument is appended per instance
    #[serde(default)]
    pub args: Vec<String>,

    /// Default working directory for cases that don't name one
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Flag used to pass the debugging port
    #[serde(default = "default_port_flag")]
    pub port_flag: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            args: Vec::new(),
            working_dir: default_working_dir(),
            port_flag: default_port_flag(),
        }
    }
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_port_flag() -> String {
    "--remote-debugging-port".to_string()
}

/// Remote-debugging port settings, all durations in milliseconds
#[derive(Debug, Deserialize, Clone)]
pub struct CdpConfig {
    /// Base port for allocation
    #[serde(default = "default_base_port")]
    pub port: u16,

    /// Number of candidate ports scanned from the base port
    #[serde(default = "default_max_ports")]
    pub max_ports: u16,

    /// Timeout of a single reachability probe
    #[serde(default = "default_check_timeout")]
    pub check_timeout_ms: u64,

    /// How long to wait for a freshly started instance
    #[serde(default = "default_wait_max_time")]
    pub wait_max_time_ms: u64,

    /// Polling interval while waiting for an instance
    #[serde(default = "default_wait_interval")]
    pub wait_interval_ms: u64,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            port: default_base_port(),
            max_ports: default_max_ports(),
            check_timeout_ms: default_check_timeout(),
            wait_max_time_ms: default_wait_max_time(),
            wait_interval_ms: default_wait_interval(),
        }
    }
}

fn default_base_port() -> u16 {
    9222
}
fn default_max_ports() -> u16 {
    100
}
fn default_check_timeout() -> u64 {
    500
}
fn default_wait_max_time() -> u64 {
    30_000
}
fn default_wait_interval() -> u64 {
    1_000
}

/// UI wait timeouts in milliseconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Optional elements (conditional click)
    #[serde(default = "default_short")]
    pub short_ms: u64,

    /// Regular element waits
    #[serde(default = "default_default")]
    pub default_ms: u64,

    /// Waiting for the bot reply
    #[serde(default = "default_long")]
    pub long_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            short_ms: default_short(),
            default_ms: default_default(),
            long_ms: default_long(),
        }
    }
}

fn default_short() -> u64 {
    5_000
}
fn default_default() -> u64 {
    10_000
}
fn default_long() -> u64 {
    60_000
}

/// Fixed delays in milliseconds
#[derive(Debug, Deserialize, Clone)]
pub struct Delays {
    /// Pause after each interaction step
    #[serde(default = "default_step_interval")]
    pub step_interval_ms: u64,

    /// Pause between cases in sequential mode
    #[serde(default = "default_case_interval")]
    pub case_interval_ms: u64,
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            step_interval_ms: default_step_interval(),
            case_interval_ms: default_case_interval(),
        }
    }
}

fn default_step_interval() -> u64 {
    2_000
}
fn default_case_interval() -> u64 {
    1_000
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct InputConfig {
    #[serde(default)]
    pub default_text: String,
}

/// Transform probe settings
#[derive(Debug, Deserialize, Clone)]
pub struct TransformConfig {
    /// Horizontal translate offset (px) that triggers the conditional click
    #[serde(default = "default_check_value")]
    pub check_value: f64,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            check_value: default_check_value(),
        }
    }
}

fn default_check_value() -> f64 {
    -20.0
}

/// Batch execution defaults
#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Close instances this run started once their case finishes
    #[serde(default = "default_close_app")]
    pub close_app_after_finish: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_concurrency: default_max_concurrency(),
            close_app_after_finish: default_close_app(),
        }
    }
}

fn default_concurrency() -> usize {
    2
}
fn default_max_concurrency() -> usize {
    5
}
fn default_close_app() -> bool {
    true
}

/// Instance teardown settings
#[derive(Debug, Deserialize, Clone)]
pub struct InstanceConfig {
    /// Grace period between SIGTERM and SIGKILL
    #[serde(default = "default_close_grace")]
    pub close_grace_ms: u64,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            close_grace_ms: default_close_grace(),
        }
    }
}

fn default_close_grace() -> u64 {
    3_000
}

/// Payload capture settings
#[derive(Debug, Deserialize, Clone)]
pub struct CaptureConfig {
    #[serde(default = "default_capture_enabled")]
    pub enabled: bool,

    /// Command whose stdout is the captured payload
    #[serde(default = "default_capture_command")]
    pub command: Vec<String>,

    /// Time the command gets before the capture fails
    #[serde(default = "default_capture_timeout")]
    pub timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: default_capture_enabled(),
            command: default_capture_command(),
            timeout_ms: default_capture_timeout(),
        }
    }
}

fn default_capture_enabled() -> bool {
    true
}

fn default_capture_timeout() -> u64 {
    5_000
}

#[cfg(target_os = "macos")]
fn default_capture_command() -> Vec<String> {
    vec!["pbpaste".to_string()]
}

#[cfg(not(target_os = "macos"))]
fn default_capture_command() -> Vec<String> {
    ["xclip", "-selection", "clipboard", "-o"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Bundled driver settings
#[derive(Debug, Deserialize, Clone)]
pub struct DriverConfig {
    /// Timeout for a single protocol command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    /// Pick the first page target whose URL contains this string
    #[serde(default)]
    pub target_url_contains: Option<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout(),
            target_url_contains: None,
        }
    }
}

fn default_command_timeout() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LogsConfig {
    /// Report and artifact directory; relative paths resolve against the
    /// current directory
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PathsConfig {
    /// Element registry file
    #[serde(default)]
    pub elements: Option<PathBuf>,

    /// Default test-case file for batch runs
    #[serde(default)]
    pub test_cases: Option<PathBuf>,
}

impl Config {
    /// Load configuration from an explicit path or the default config file
    ///
    /// Returns default configuration if no file exists at the default
    /// location. An explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match paths::config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path).map_err(|e| Error::file_read(&path, e))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Check the values a run cannot proceed without
    pub fn validate(&self) -> Result<()> {
        if self.app.path.as_os_str().is_empty() {
            return Err(Error::ConfigInvalid("app.path is not set".to_string()));
        }
        if self.app.port_flag.is_empty() {
            return Err(Error::ConfigInvalid("app.port_flag is empty".to_string()));
        }
        if self.cdp.max_ports == 0 {
            return Err(Error::ConfigInvalid("cdp.max_ports must be at least 1".to_string()));
        }
        if self.cdp.wait_interval_ms == 0 {
            return Err(Error::ConfigInvalid(
                "cdp.wait_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.execution.concurrency == 0 || self.execution.max_concurrency == 0 {
            return Err(Error::ConfigInvalid(
                "execution.concurrency and execution.max_concurrency must be at least 1"
                    .to_string(),
            ));
        }
        if self.capture.enabled && self.capture.command.is_empty() {
            return Err(Error::ConfigInvalid(
                "capture.command is empty while capture is enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the application executable
    ///
    /// Bare names are looked up on PATH; anything with a path separator is
    /// used as given.
    pub fn resolve_app_path(&self) -> Result<PathBuf> {
        let path = &self.app.path;
        if path.components().count() > 1 || path.is_absolute() {
            return Ok(path.clone());
        }
        which::which(path).map_err(|e| {
            Error::ConfigInvalid(format!(
                "application '{}' not found on PATH: {}",
                path.display(),
                e
            ))
        })
    }

    /// Probe timeout
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.cdp.check_timeout_ms)
    }

    /// Teardown grace period
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.instance.close_grace_ms)
    }

    /// Delay between steps
    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.delays.step_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.cdp.port, 9222);
        assert_eq!(config.cdp.max_ports, 100);
        assert_eq!(config.timeouts.long_ms, 60_000);
        assert_eq!(config.instance.close_grace_ms, 3_000);
        assert_eq!(config.app.port_flag, "--remote-debugging-port");
        assert!(config.execution.close_app_after_finish);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml(
            r#"
[app]
path = "/Applications/Chat.app/Contents/MacOS/Chat"
args = ["--remote-debugging-port=9222", "--no-sandbox"]
working_dir = "/work/a"

[cdp]
port = 9300

[execution]
concurrency = 3
"#,
        )
        .unwrap();

        assert_eq!(config.cdp.port, 9300);
        assert_eq!(config.cdp.wait_interval_ms, 1_000);
        assert_eq!(config.execution.concurrency, 3);
        assert_eq!(config.execution.max_concurrency, 5);
        assert_eq!(config.app.args.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_app() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = Config::from_toml("[cdp]\nport = \"high\"").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_resolve_app_path_keeps_explicit_paths() {
        let mut config = Config::default();
        config.app.path = PathBuf::from("/opt/app/bin/app");
        assert_eq!(
            config.resolve_app_path().unwrap(),
            PathBuf::from("/opt/app/bin/app")
        );
    }
}
