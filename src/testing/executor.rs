//! Single test-case execution
//!
//! A case runs through port resolution, instance startup (or reuse), driver
//! connection, the script's interaction sequence and payload capture.
//! Whatever fails, the driver is disconnected and an instance this case
//! started is closed again; the failure ends up in the result.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::common::config::Config;
use crate::common::Result;
use crate::driver::{AutomationDriver, Page};
use crate::instance::{AppLaunch, InstanceManager, StartOptions};
use crate::scripts::{Script, ScriptContext};

use super::capture::{self, Capture};
use super::case::TestCase;
use super::elements::ElementRegistry;
use super::report::ExecutionResult;

/// Per-run execution settings
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Close instances started for a case once it finishes
    pub close_app_after_finish: bool,
    /// Where capture artifacts are written
    pub log_dir: PathBuf,
    /// Reply wait override applied to cases that don't set their own
    pub bot_reply_timeout: Option<Duration>,
}

/// Runs one test case to completion
#[async_trait]
pub trait CaseExecutor: Send + Sync {
    /// Never fails; every error is folded into the result
    async fn execute(&self, case: &TestCase, options: &ExecuteOptions) -> ExecutionResult;
}

/// Resources a case has acquired and must give back
#[derive(Default)]
struct CaseRun {
    port: Option<u16>,
    /// The port came from the allocator for this case
    allocated: bool,
    /// This case spawned the instance on the port
    started: bool,
    page: Option<Box<dyn Page>>,
}

/// What cleanup does with the port a case used
#[derive(Debug, PartialEq, Eq)]
enum Teardown {
    Close(u16),
    Release(u16),
    Keep,
}

impl CaseRun {
    /// Close only an instance this case spawned; give back only a
    /// reservation this case took that no registered instance has inherited
    fn teardown(&self, registered: bool, close_app_after_finish: bool) -> Teardown {
        let Some(port) = self.port else {
            return Teardown::Keep;
        };
        if self.started {
            if close_app_after_finish && registered {
                Teardown::Close(port)
            } else {
                Teardown::Keep
            }
        } else if self.allocated && !registered {
            Teardown::Release(port)
        } else {
            Teardown::Keep
        }
    }
}

pub struct TestCaseExecutor {
    config: Arc<Config>,
    elements: Arc<ElementRegistry>,
    manager: Arc<InstanceManager>,
    driver: Arc<dyn AutomationDriver>,
    script: Arc<dyn Script>,
    capture: Option<Arc<dyn Capture>>,
}

impl TestCaseExecutor {
    pub fn new(
        config: Arc<Config>,
        elements: Arc<ElementRegistry>,
        manager: Arc<InstanceManager>,
        driver: Arc<dyn AutomationDriver>,
        script: Arc<dyn Script>,
    ) -> Self {
        Self {
            config,
            elements,
            manager,
            driver,
            script,
            capture: None,
        }
    }

    /// Capture a payload after each successful interaction sequence
    pub fn with_capture(mut self, capture: Arc<dyn Capture>) -> Self {
        self.capture = Some(capture);
        self
    }

    async fn run(
        &self,
        case: &TestCase,
        options: &ExecuteOptions,
        run: &mut CaseRun,
        result: &mut ExecutionResult,
    ) -> Result<()> {
        let port = match case.port {
            Some(port) => {
                tracing::info!("Using port {}", port);
                port
            }
            None => {
                let port = self
                    .manager
                    .ports()
                    .allocate(self.config.cdp.port, self.config.cdp.max_ports)
                    .await?;
                run.allocated = true;
                tracing::info!("Allocated port {}", port);
                port
            }
        };
        run.port = Some(port);
        result.port = Some(port);

        let pruned = self.manager.prune_exited();
        if !pruned.is_empty() {
            tracing::debug!("Pruned exited instances on ports {:?}", pruned);
        }

        if self.manager.has_instance(port) {
            tracing::info!("Reusing instance on port {}", port);
        } else if case.port.is_some() && self.manager.probe().is_reachable(port).await {
            tracing::info!("Port {} already answers, reusing unmanaged instance", port);
        } else {
            let launch = AppLaunch::from_config(&self.config, &case.working_dir)?;
            let start = StartOptions::from_config(&self.config);
            self.manager
                .start_instance(&launch, Some(port), &start)
                .await?;
            run.started = true;
        }

        let page = run.page.insert(self.driver.connect(port).await?);

        let reply_timeout = case
            .bot_reply_timeout
            .or(options.bot_reply_timeout)
            .unwrap_or(Duration::from_millis(self.config.timeouts.long_ms));
        let ctx = ScriptContext {
            config: &self.config,
            elements: &self.elements,
            case,
            reply_timeout,
        };
        self.script.run(page.as_mut(), &ctx).await?;

        if let Some(capture) = &self.capture {
            self.capture_payload(capture.as_ref(), case, options, result)
                .await;
        }
        Ok(())
    }

    /// Capture and persist the payload; failures only leave a warning
    async fn capture_payload(
        &self,
        capture: &dyn Capture,
        case: &TestCase,
        options: &ExecuteOptions,
        result: &mut ExecutionResult,
    ) {
        let content = match capture.capture().await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Capture for '{}' failed: {}", case.name, e);
                result.warning = Some(e.to_string());
                return;
            }
        };

        tracing::info!("Captured {} characters", content.chars().count());
        match capture::persist(&content, &case.name, &options.log_dir) {
            Ok(path) => {
                tracing::debug!("Saved capture to {}", path.display());
                result.artifact = Some(path);
            }
            Err(e) => {
                tracing::warn!("Failed to save capture for '{}': {}", case.name, e);
                result.warning = Some(format!("failed to save capture: {}", e));
            }
        }
        result.captured = Some(content);
    }

    /// Release everything the case acquired
    async fn cleanup(&self, mut run: CaseRun, options: &ExecuteOptions) {
        if let Some(mut page) = run.page.take() {
            if let Err(e) = page.disconnect().await {
                tracing::debug!("Driver disconnect failed: {}", e);
            }
        }

        let registered = run
            .port
            .is_some_and(|port| self.manager.has_instance(port));
        match run.teardown(registered, options.close_app_after_finish) {
            Teardown::Close(port) => {
                self.manager.close_instance(port).await;
            }
            Teardown::Release(port) => self.manager.ports().release(port),
            Teardown::Keep => {}
        }
    }
}

#[async_trait]
impl CaseExecutor for TestCaseExecutor {
    async fn execute(&self, case: &TestCase, options: &ExecuteOptions) -> ExecutionResult {
        let mut result = ExecutionResult::new(case, Utc::now());
        let mut run = CaseRun::default();

        tracing::info!(
            "Running '{}' in {} ({})",
            case.name,
            case.working_dir.display(),
            self.script.name()
        );

        match self.run(case, options, &mut run, &mut result).await {
            Ok(()) => {
                result.success = true;
                tracing::info!("'{}' passed", case.name);
            }
            Err(e) => {
                tracing::error!("'{}' failed: {}", case.name, e);
                result.error = Some(e.to_string());
            }
        }

        self.cleanup(run, options).await;
        result.finish()
    }
}
