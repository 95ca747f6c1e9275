//! Application instance lifecycle
//!
//! Starts application processes bound to a working directory and a
//! debugging port, waits for the port to come up, and tears them down with
//! a graceful signal that escalates to a kill. The manager owns the
//! *registration* of each process, not its lifetime: processes are spawned
//! detached and survive the runner unless closed through this manager.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::{Child, Command};

use crate::common::config::Config;
use crate::common::{Error, Result};

use super::ports::PortAllocator;
use super::probe::PortProbe;

/// Lifecycle state of a registered instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Spawned, waiting for the debugging port
    Starting,
    /// Port answered; usable by drivers
    Ready,
    /// Termination in progress
    Closing,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

/// How to launch one application instance
#[derive(Debug, Clone)]
pub struct AppLaunch {
    /// Executable to run
    pub program: PathBuf,
    /// Base arguments
    pub args: Vec<String>,
    /// Working directory the instance is rooted at
    pub working_dir: PathBuf,
    /// Flag carrying the debugging port, e.g. `--remote-debugging-port`
    pub port_flag: String,
}

impl AppLaunch {
    /// Build a launch descriptor from config for the given working directory
    pub fn from_config(config: &Config, working_dir: &Path) -> Result<Self> {
        Ok(Self {
            program: config.resolve_app_path()?,
            args: config.app.args.clone(),
            working_dir: working_dir.to_path_buf(),
            port_flag: config.app.port_flag.clone(),
        })
    }

    /// Launch arguments with the port flag replaced by one for `port`
    pub fn args_for_port(&self, port: u16) -> Vec<String> {
        let mut args: Vec<String> = self
            .args
            .iter()
            .filter(|arg| !arg.contains(self.port_flag.as_str()))
            .cloned()
            .collect();
        args.push(format!("{}={}", self.port_flag, port));
        args
    }
}

/// Parameters for starting an instance
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Allocation base when no port is given
    pub base_port: u16,
    /// Allocation attempts when no port is given
    pub max_ports: u16,
    /// Readiness deadline
    pub wait_max_time: Duration,
    /// Readiness polling interval
    pub wait_interval: Duration,
}

impl StartOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_port: config.cdp.port,
            max_ports: config.cdp.max_ports,
            wait_max_time: Duration::from_millis(config.cdp.wait_max_time_ms),
            wait_interval: Duration::from_millis(config.cdp.wait_interval_ms),
        }
    }
}

/// Snapshot of a registered instance
#[derive(Debug, Clone, Serialize)]
pub struct InstanceInfo {
    pub port: u16,
    pub working_dir: PathBuf,
    pub pid: Option<u32>,
    pub state: InstanceState,
    pub started_at: DateTime<Utc>,
    pub uptime_ms: u64,
}

/// Registry entry for a spawned process
struct InstanceEntry {
    working_dir: PathBuf,
    pid: Option<u32>,
    state: InstanceState,
    started_at: DateTime<Utc>,
    started: Instant,
    /// Taken out when the close sequence starts
    child: Option<Child>,
}

impl InstanceEntry {
    fn info(&self, port: u16) -> InstanceInfo {
        InstanceInfo {
            port,
            working_dir: self.working_dir.clone(),
            pid: self.pid,
            state: self.state,
            started_at: self.started_at,
            uptime_ms: self.started.elapsed().as_millis() as u64,
        }
    }

    fn has_exited(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => false,
        }
    }
}

/// Registry of managed application instances keyed by port
///
/// The registry is the single source of truth for "is this port running an
/// instance started by this runner". Port reservations are delegated to the
/// [`PortAllocator`].
pub struct InstanceManager {
    ports: PortAllocator,
    instances: Mutex<HashMap<u16, InstanceEntry>>,
    grace_period: Duration,
}

impl InstanceManager {
    pub fn new(ports: PortAllocator, grace_period: Duration) -> Self {
        Self {
            ports,
            instances: Mutex::new(HashMap::new()),
            grace_period,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            PortAllocator::new(PortProbe::new(config.check_timeout())),
            config.close_grace(),
        )
    }

    /// The port allocator backing this manager
    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// The reachability probe shared with the allocator
    pub fn probe(&self) -> &PortProbe {
        self.ports.probe()
    }

    /// Start an application instance and wait for its debugging port
    ///
    /// Without a port one is allocated from `options.base_port`. The entry is
    /// registered as soon as the process is spawned so concurrent callers
    /// already see the port as taken while it is starting.
    #[tracing::instrument(skip_all, fields(working_dir = %launch.working_dir.display()))]
    pub async fn start_instance(
        &self,
        launch: &AppLaunch,
        port: Option<u16>,
        options: &StartOptions,
    ) -> Result<InstanceInfo> {
        // Only a reservation taken here is given back on failure; an existing
        // one belongs to whoever allocated the port
        let (port, reserved_here) = match port {
            Some(port) => {
                if self.has_instance(port) {
                    return Err(Error::InstanceExists(port));
                }
                (port, self.ports.reserve(port))
            }
            None => {
                let port = self
                    .ports
                    .allocate(options.base_port, options.max_ports)
                    .await?;
                (port, true)
            }
        };

        tracing::info!(
            "Starting instance on port {} ({})",
            port,
            launch.program.display()
        );

        let mut cmd = Command::new(&launch.program);
        cmd.args(launch.args_for_port(port))
            .current_dir(&launch.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        // New process group so the instance is detached from our terminal
        #[cfg(unix)]
        cmd.process_group(0);

        {
            let mut instances = self.lock_instances();
            if instances.contains_key(&port) {
                return Err(Error::InstanceExists(port));
            }

            let child = match cmd.spawn() {
                Ok(child) => child,
                Err(e) => {
                    drop(instances);
                    if reserved_here {
                        self.ports.release(port);
                    }
                    return Err(Error::SpawnFailed(format!(
                        "{} (port {}): {}",
                        launch.program.display(),
                        port,
                        e
                    )));
                }
            };

            instances.insert(
                port,
                InstanceEntry {
                    working_dir: launch.working_dir.clone(),
                    pid: child.id(),
                    state: InstanceState::Starting,
                    started_at: Utc::now(),
                    started: Instant::now(),
                    child: Some(child),
                },
            );
        }

        tracing::debug!("Waiting for port {} to answer", port);
        let ready = self
            .probe()
            .wait_ready_while(port, options.wait_max_time, options.wait_interval, || {
                self.is_starting(port)
            })
            .await;

        if !ready {
            if self.abandon_start(port, reserved_here).await {
                return Err(Error::StartupTimeout {
                    port,
                    waited_ms: options.wait_max_time.as_millis() as u64,
                });
            }
            return Err(closed_while_starting(port));
        }

        let mut instances = self.lock_instances();
        match instances.get_mut(&port) {
            Some(entry) if entry.state == InstanceState::Starting => {
                entry.state = InstanceState::Ready;
                tracing::info!("Instance ready on port {}", port);
                Ok(entry.info(port))
            }
            _ => Err(closed_while_starting(port)),
        }
    }

    fn is_starting(&self, port: u16) -> bool {
        self.lock_instances()
            .get(&port)
            .is_some_and(|entry| entry.state == InstanceState::Starting)
    }

    /// Drop a registration whose startup failed and stop its process
    ///
    /// Returns false when the entry was already taken over by a close, which
    /// then owns the port release.
    async fn abandon_start(&self, port: u16, reserved_here: bool) -> bool {
        let entry = {
            let mut instances = self.lock_instances();
            match instances.get(&port) {
                Some(entry) if entry.state == InstanceState::Starting => instances.remove(&port),
                _ => None,
            }
        };
        let Some(entry) = entry else {
            return false;
        };

        if let Some(mut child) = entry.child {
            let killed = match send_kill(&mut child) {
                Ok(()) => child.wait().await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = killed {
                tracing::debug!("Failed to kill unready instance on port {}: {}", port, e);
            }
        }
        if reserved_here {
            self.ports.release(port);
        }
        true
    }

    /// Close the instance registered on `port`
    ///
    /// Returns false without touching any state when nothing is registered
    /// there, since other tools may own processes on our port range.
    /// Deregistration and port release happen even if termination fails.
    pub async fn close_instance(&self, port: u16) -> bool {
        let child = {
            let mut instances = self.lock_instances();
            let Some(entry) = instances.get_mut(&port) else {
                tracing::warn!("No managed instance on port {}", port);
                return false;
            };
            if entry.state == InstanceState::Closing {
                tracing::debug!("Instance on port {} is already closing", port);
                return false;
            }
            entry.state = InstanceState::Closing;
            entry.child.take()
        };

        tracing::info!("Closing instance on port {}", port);

        let result = match child {
            Some(child) => terminate(child, self.grace_period).await,
            None => Ok(()),
        };

        self.lock_instances().remove(&port);
        self.ports.release(port);

        match result {
            Ok(()) => {
                tracing::info!("Instance on port {} closed", port);
                true
            }
            Err(e) => {
                tracing::warn!("Error while closing instance on port {}: {}", port, e);
                false
            }
        }
    }

    /// Close every registered instance concurrently
    pub async fn close_all(&self) {
        let ports: Vec<u16> = self.lock_instances().keys().copied().collect();
        if ports.is_empty() {
            return;
        }

        tracing::info!("Closing {} instance(s)", ports.len());
        futures_util::future::join_all(ports.into_iter().map(|port| self.close_instance(port)))
            .await;
    }

    /// Deregister ready instances whose process has already exited
    ///
    /// Returns the pruned ports; their reservations are released.
    pub fn prune_exited(&self) -> Vec<u16> {
        let mut pruned = Vec::new();
        {
            let mut instances = self.lock_instances();
            instances.retain(|port, entry| {
                let exited = entry.state == InstanceState::Ready && entry.has_exited();
                if exited {
                    pruned.push(*port);
                }
                !exited
            });
        }

        for port in &pruned {
            tracing::info!("Instance on port {} exited on its own", port);
            self.ports.release(*port);
        }
        pruned
    }

    pub fn has_instance(&self, port: u16) -> bool {
        self.lock_instances().contains_key(&port)
    }

    /// Whether any registered instance is rooted at `working_dir`
    pub fn is_working_dir_in_use(&self, working_dir: &Path) -> bool {
        self.lock_instances()
            .values()
            .any(|entry| entry.working_dir == working_dir)
    }

    /// Ports of the instances rooted at `working_dir`, ascending
    pub fn ports_by_working_dir(&self, working_dir: &Path) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .lock_instances()
            .iter()
            .filter(|(_, entry)| entry.working_dir == working_dir)
            .map(|(port, _)| *port)
            .collect();
        ports.sort_unstable();
        ports
    }

    /// Snapshot of all registered instances, ordered by port
    pub fn instances(&self) -> Vec<InstanceInfo> {
        let mut infos: Vec<InstanceInfo> = self
            .lock_instances()
            .iter()
            .map(|(port, entry)| entry.info(*port))
            .collect();
        infos.sort_by_key(|info| info.port);
        infos
    }

    fn lock_instances(&self) -> MutexGuard<'_, HashMap<u16, InstanceEntry>> {
        self.instances.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn closed_while_starting(port: u16) -> Error {
    Error::SpawnFailed(format!("instance on port {} was closed while starting", port))
}

/// Graceful termination racing the grace period against process exit
async fn terminate(mut child: Child, grace: Duration) -> io::Result<()> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }

    send_terminate(&mut child)?;

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => {
            let status = status?;
            tracing::debug!("Instance exited with {}", status);
            Ok(())
        }
        Err(_) => {
            tracing::warn!(
                "Instance did not exit within {} ms, killing",
                grace.as_millis()
            );
            send_kill(&mut child)?;
            child.wait().await.map(|_| ())
        }
    }
}

/// SIGTERM to the instance's process group (it leads its own group)
#[cfg(unix)]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    signal_group(child, libc::SIGTERM)
}

/// SIGKILL to the instance's process group
#[cfg(unix)]
fn send_kill(child: &mut Child) -> io::Result<()> {
    signal_group(child, libc::SIGKILL)
}

#[cfg(unix)]
fn signal_group(child: &mut Child, signal: libc::c_int) -> io::Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped
        return Ok(());
    };

    let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if rc == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Group is gone; fall back to the leader alone
        let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
        if rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(io::Error::last_os_error());
    }
    Err(err)
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

#[cfg(not(unix))]
fn send_kill(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> InstanceManager {
        InstanceManager::new(
            PortAllocator::new(PortProbe::new(Duration::from_millis(200))),
            Duration::from_millis(500),
        )
    }

    fn launch(program: &str, args: &[&str]) -> AppLaunch {
        AppLaunch {
            program: PathBuf::from(program),
            args: args.iter().map(|s| s.to_string()).collect(),
            working_dir: std::env::temp_dir(),
            port_flag: "--remote-debugging-port".to_string(),
        }
    }

    fn quick_options() -> StartOptions {
        StartOptions {
            base_port: 39_600,
            max_ports: 20,
            wait_max_time: Duration::from_millis(400),
            wait_interval: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_args_for_port_replaces_existing_flag() {
        let launch = launch(
            "/bin/app",
            &["--remote-debugging-port=9222", "--no-sandbox", "--remote-debugging-port"],
        );
        assert_eq!(
            launch.args_for_port(9230),
            vec!["--no-sandbox".to_string(), "--remote-debugging-port=9230".to_string()]
        );
    }

    #[tokio::test]
    async fn test_close_unregistered_port_is_noop() {
        let manager = manager();
        manager.ports().reserve(39_650);

        assert!(!manager.close_instance(39_650).await);
        // The unrelated reservation is left alone
        assert!(manager.ports().is_reserved(39_650));
        assert!(manager.instances().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_releases_port() {
        let manager = manager();
        let err = manager
            .start_instance(
                &launch("/definitely/not/an/app", &[]),
                Some(39_660),
                &quick_options(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SpawnFailed(_)));
        assert!(!manager.ports().is_reserved(39_660));
        assert!(!manager.has_instance(39_660));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_startup_timeout_deregisters_and_releases() {
        let manager = manager();
        // A process that never opens the port
        let err = manager
            .start_instance(
                &launch("/bin/sh", &["-c", "exec sleep 30"]),
                Some(39_670),
                &quick_options(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StartupTimeout { port: 39_670, .. }));
        assert!(!manager.has_instance(39_670));
        assert!(!manager.ports().is_reserved(39_670));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_during_startup_keeps_later_reservation() {
        let manager = manager();
        let options = StartOptions {
            wait_max_time: Duration::from_secs(10),
            ..quick_options()
        };
        let launch = launch("/bin/sh", &["-c", "exec sleep 30"]);

        let started = Instant::now();
        let start = manager.start_instance(&launch, Some(39_680), &options);
        let takeover = async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            assert!(manager.close_instance(39_680).await);
            // Someone else claims the freed port before the start gives up
            assert!(manager.ports().reserve(39_680));
        };
        let (result, ()) = tokio::join!(start, takeover);

        assert!(matches!(result, Err(Error::SpawnFailed(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!manager.has_instance(39_680));
        assert!(manager.ports().is_reserved(39_680));
        manager.ports().release(39_680);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_while_closing_returns_false() {
        let responder = crate::instance::test_support::spawn_responder(39_690).await;
        let manager = manager();
        // Ignores SIGTERM so the first close sits out the grace period
        let launch = launch("/bin/sh", &["-c", "trap '' TERM; exec sleep 30"]);
        manager
            .start_instance(&launch, Some(39_690), &quick_options())
            .await
            .unwrap();

        let first = manager.close_instance(39_690);
        let second = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            manager.close_instance(39_690).await
        };
        let (first, second) = tokio::join!(first, second);

        assert!(first);
        assert!(!second);
        assert!(!manager.has_instance(39_690));
        assert!(!manager.ports().is_reserved(39_690));
        responder.abort();
    }

    #[test]
    fn test_queries_on_empty_registry() {
        let manager = manager();
        assert!(!manager.has_instance(9222));
        assert!(!manager.is_working_dir_in_use(Path::new("/a")));
        assert!(manager.ports_by_working_dir(Path::new("/a")).is_empty());
        assert!(manager.prune_exited().is_empty());
    }
}
