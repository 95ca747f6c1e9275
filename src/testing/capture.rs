//! Post-run payload capture and artifact persistence

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;

use crate::common::config::Config;
use crate::common::paths;
use crate::common::{Error, Result};

/// Source of the payload captured after a case's interaction sequence
#[async_trait]
pub trait Capture: Send + Sync {
    /// Read the payload; empty content is a failure
    async fn capture(&self) -> Result<String>;
}

/// Captures the stdout of a command, `pbpaste` by default
#[derive(Debug, Clone)]
pub struct CommandCapture {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCapture {
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::ConfigInvalid("capture.command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: Duration::from_secs(5),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(&config.capture.command)?
            .with_timeout(Duration::from_millis(config.capture.timeout_ms)))
    }

    /// Fail the capture if the command runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Capture for CommandCapture {
    async fn capture(&self) -> Result<String> {
        tracing::debug!("Capturing payload with {} {:?}", self.program, self.args);

        // The child is killed when a timed-out `output()` future is dropped
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| {
                Error::CaptureFailed(format!(
                    "{} did not finish within {} ms",
                    self.program,
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|e| Error::CaptureFailed(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::CaptureFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let content = String::from_utf8_lossy(&output.stdout).into_owned();
        if content.trim().is_empty() {
            return Err(Error::CaptureFailed("captured content is empty".to_string()));
        }
        Ok(content)
    }
}

/// Write captured content to `<sanitized-name>_<timestamp>.txt` in `dir`
pub fn persist(content: &str, case_name: &str, dir: &Path) -> Result<PathBuf> {
    paths::ensure_dir(dir)?;
    let path = dir.join(artifact_file_name(case_name, Utc::now()));
    std::fs::write(&path, content)?;
    Ok(path)
}

fn artifact_file_name(case_name: &str, at: DateTime<Utc>) -> String {
    let timestamp = at.format("%Y-%m-%dT%H-%M-%S-%3fZ");
    format!("{}_{}.txt", sanitize(case_name), timestamp)
}

/// Replace everything outside `[A-Za-z0-9_-]`
fn sanitize(name: &str) -> String {
    if name.is_empty() {
        return "log".to_string();
    }
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
