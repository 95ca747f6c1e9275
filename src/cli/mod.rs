//! CLI command handling
//!
//! Builds the runner from configuration, dispatches commands and prints
//! results.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;

use crate::commands::{Commands, RunArgs};
use crate::common::config::Config;
use crate::common::{paths, Error, Result};
use crate::driver::{AutomationDriver, CdpDriver};
use crate::instance::{InstanceManager, PortProbe};
use crate::scripts::ScriptRegistry;
use crate::testing::{
    load_cases, BatchOptions, BatchScheduler, CommandCapture, ElementCheck, ElementRegistry,
    ExecuteOptions, TestCase, TestCaseExecutor,
};

/// Dispatch a CLI command
///
/// Returns whether the command fully succeeded; any failed case makes a run
/// unsuccessful without being an error.
pub async fn dispatch(command: Commands) -> Result<bool> {
    match command {
        Commands::Run(args) => run(args).await,

        Commands::Scripts => {
            let registry = ScriptRegistry::builtin();
            println!("{}", "Available scripts:".cyan());
            for script in registry.iter() {
                println!("  {}  {}", script.name().bold(), script.description().dimmed());
            }
            Ok(true)
        }

        Commands::Instances {
            base_port,
            count,
            config,
        } => {
            let config = Config::load(config.as_deref())?;
            let base = base_port.unwrap_or(config.cdp.port);
            let count = count.unwrap_or(config.cdp.max_ports);
            list_ports(&PortProbe::new(config.check_timeout()), base, count).await;
            Ok(true)
        }

        Commands::CheckElements {
            port,
            config,
            elements,
        } => check_elements(port, config, elements).await,
    }
}

async fn run(args: RunArgs) -> Result<bool> {
    let config = Config::load(args.config.as_deref())?;
    config.validate()?;

    let script = ScriptRegistry::builtin().find(&args.script)?;

    let elements_path = pick_path(
        args.elements.clone(),
        config.paths.elements.clone(),
        paths::default_elements_path(),
        "element registry",
    )?;
    let elements = ElementRegistry::load(&elements_path)?;
    tracing::debug!(
        "Loaded {} elements from {}",
        elements.len(),
        elements_path.display()
    );

    let cases = if args.batch || args.test_cases.is_some() {
        let path = pick_path(
            args.test_cases.clone(),
            config.paths.test_cases.clone(),
            paths::default_test_cases_path(),
            "test-case file",
        )?;
        load_cases(&path, &config)?
    } else {
        vec![TestCase::from_config(&config)]
    };

    let mut batch = BatchOptions::from_config(&config);
    if let Some(concurrency) = args.concurrency {
        batch.concurrency = concurrency;
    }
    if let Some(max) = args.max_concurrency {
        batch.max_concurrency = max;
    }
    batch.stop_on_error = args.stop_on_error;
    batch.effective_concurrency()?;

    let log_dir = paths::resolve_log_dir(args.log_dir.as_deref(), config.logs.dir.as_deref());
    let close_apps = config.execution.close_app_after_finish && !args.keep_apps;
    let execute = ExecuteOptions {
        close_app_after_finish: close_apps,
        log_dir: log_dir.clone(),
        bot_reply_timeout: args.bot_reply_timeout.map(Duration::from_secs),
    };

    let config = Arc::new(config);
    let manager = Arc::new(InstanceManager::from_config(&config));
    let mut executor = TestCaseExecutor::new(
        config.clone(),
        Arc::new(elements),
        manager.clone(),
        Arc::new(CdpDriver::from_config(&config)),
        script,
    );
    if config.capture.enabled {
        executor = executor.with_capture(Arc::new(CommandCapture::from_config(&config)?));
    }
    let scheduler = BatchScheduler::new(Arc::new(executor), execute);

    let outcome =
        unless_interrupted(scheduler.execute_batch(&cases, &batch), interrupted(), &manager).await;
    let Some(report) = outcome else {
        return Ok(false);
    };
    let mut report = report?;

    for instance in manager.instances() {
        tracing::info!(
            "Instance on port {} ({}, {}) up for {:.1}s",
            instance.port,
            instance.working_dir.display(),
            instance.state,
            instance.uptime_ms as f64 / 1000.0
        );
    }
    if close_apps {
        manager.close_all().await;
    }

    if let Err(e) = report.persist(&log_dir) {
        tracing::warn!("Failed to write report to {}: {}", log_dir.display(), e);
    }
    report.print_summary();

    Ok(report.all_passed())
}

/// Run `work` to completion unless `interrupt` fires first
///
/// On interrupt every managed instance is closed and `None` returned.
async fn unless_interrupted<T>(
    work: impl Future<Output = T>,
    interrupt: impl Future<Output = ()>,
    manager: &InstanceManager,
) -> Option<T> {
    tokio::select! {
        output = work => Some(output),
        _ = interrupt => {
            tracing::warn!("Interrupted, closing managed instances");
            manager.close_all().await;
            None
        }
    }
}

/// Completes on Ctrl-C; never completes where the signal can't be watched
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::debug!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// First of CLI, config and platform default
fn pick_path(
    explicit: Option<PathBuf>,
    configured: Option<PathBuf>,
    default: Option<PathBuf>,
    what: &str,
) -> Result<PathBuf> {
    explicit
        .or(configured)
        .or(default)
        .ok_or_else(|| Error::ConfigInvalid(format!("no {} path configured", what)))
}

async fn check_elements(
    port: Option<u16>,
    config: Option<PathBuf>,
    elements: Option<PathBuf>,
) -> Result<bool> {
    let config = Config::load(config.as_deref())?;
    let elements_path = pick_path(
        elements,
        config.paths.elements.clone(),
        paths::default_elements_path(),
        "element registry",
    )?;
    let registry = ElementRegistry::load(&elements_path)?;
    let port = port.unwrap_or(config.cdp.port);

    let mut page = CdpDriver::from_config(&config).connect(port).await?;
    let checks = registry
        .check(page.as_mut(), Duration::from_millis(config.timeouts.short_ms))
        .await;
    if let Err(e) = page.disconnect().await {
        tracing::debug!("Driver disconnect failed: {}", e);
    }
    let checks = checks?;

    print_checks(port, &checks);
    Ok(checks.iter().all(|check| check.found))
}

fn print_checks(port: u16, checks: &[ElementCheck]) {
    println!("{}", format!("Elements on port {}:", port).cyan());
    for check in checks {
        let mark = if check.found { "✓".green() } else { "✗".red() };
        println!("  {} {}  {}", mark, check.name.bold(), check.selector.dimmed());
    }
    let missing = checks.iter().filter(|check| !check.found).count();
    if missing > 0 {
        println!("{}", format!("{} of {} missing", missing, checks.len()).red());
    }
}

async fn list_ports(probe: &PortProbe, base: u16, count: u16) {
    let ports: Vec<u16> = (0..count).map_while(|i| base.checked_add(i)).collect();
    let reachable =
        futures_util::future::join_all(ports.iter().map(|&port| probe.is_reachable(port))).await;

    let answering: Vec<u16> = ports
        .iter()
        .zip(reachable)
        .filter_map(|(&port, up)| up.then_some(port))
        .collect();

    println!(
        "{}",
        format!("Ports {}-{}:", base, base.saturating_add(count.saturating_sub(1))).cyan()
    );
    if answering.is_empty() {
        println!("  {}", "nothing answering".dimmed());
    }
    for port in answering {
        println!("  {} {}", "●".green(), port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_path_precedence() {
        let got = pick_path(
            None,
            Some(PathBuf::from("/cfg/elements.json")),
            Some(PathBuf::from("/default/elements.json")),
            "element registry",
        )
        .unwrap();
        assert_eq!(got, PathBuf::from("/cfg/elements.json"));
    }

    fn manager() -> InstanceManager {
        InstanceManager::new(
            crate::instance::PortAllocator::new(PortProbe::new(Duration::from_millis(200))),
            Duration::from_millis(500),
        )
    }

    #[tokio::test]
    async fn test_work_finishing_first_leaves_instances() {
        let manager = manager();
        let got = unless_interrupted(async { 7 }, std::future::pending(), &manager).await;
        assert_eq!(got, Some(7));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interrupt_closes_managed_instances() {
        use crate::instance::{test_support::spawn_responder, AppLaunch, StartOptions};

        let responder = spawn_responder(39_960).await;
        let manager = manager();
        let launch = AppLaunch {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), "exec sleep 30".to_string()],
            working_dir: std::env::temp_dir(),
            port_flag: "--remote-debugging-port".to_string(),
        };
        let options = StartOptions {
            base_port: 39_960,
            max_ports: 1,
            wait_max_time: Duration::from_secs(2),
            wait_interval: Duration::from_millis(100),
        };
        manager
            .start_instance(&launch, Some(39_960), &options)
            .await
            .unwrap();
        assert!(manager.has_instance(39_960));

        let got = unless_interrupted(
            std::future::pending::<()>(),
            tokio::time::sleep(Duration::from_millis(50)),
            &manager,
        )
        .await;

        assert!(got.is_none());
        assert!(manager.instances().is_empty());
        assert!(manager.ports().reserved().is_empty());
        responder.abort();
    }

    #[test]
    fn test_pick_path_missing_everywhere() {
        let err = pick_path(None, None, None, "test-case file").unwrap_err();
        assert!(err.is_setup_error());
    }
}
