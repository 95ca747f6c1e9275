//! Batch scheduling
//!
//! Cases run on a fixed pool of workers polled together on the calling task.
//! Two cases sharing a working directory never overlap: a worker only admits
//! a case whose directory is free, and marks it busy in the same critical
//! section. Within one directory cases keep their submission order.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::common::config::Config;
use crate::common::{Error, Result};

use super::case::TestCase;
use super::executor::{CaseExecutor, ExecuteOptions};
use super::report::{new_task_id, BatchReport, ExecutionResult, ReportOptions};

/// Scheduling options, snapshotted into the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOptions {
    pub concurrency: usize,
    pub max_concurrency: usize,
    /// Admit no further case after the first failure
    pub stop_on_error: bool,
    /// Pause between cases when running sequentially
    pub case_interval_ms: u64,
}

impl BatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.execution.concurrency,
            max_concurrency: config.execution.max_concurrency,
            stop_on_error: false,
            case_interval_ms: config.delays.case_interval_ms,
        }
    }

    /// `min(concurrency, max_concurrency)`; zero is rejected
    pub fn effective_concurrency(&self) -> Result<usize> {
        let effective = self.concurrency.min(self.max_concurrency);
        if effective == 0 {
            return Err(Error::ConfigInvalid(format!(
                "concurrency must be at least 1 (concurrency {}, max {})",
                self.concurrency, self.max_concurrency
            )));
        }
        Ok(effective)
    }

    pub fn case_interval(&self) -> Duration {
        Duration::from_millis(self.case_interval_ms)
    }
}

/// Runs batches of cases through a [`CaseExecutor`]
pub struct BatchScheduler {
    executor: Arc<dyn CaseExecutor>,
    execute: ExecuteOptions,
}

impl BatchScheduler {
    pub fn new(executor: Arc<dyn CaseExecutor>, execute: ExecuteOptions) -> Self {
        Self { executor, execute }
    }

    /// Run all cases and aggregate their results
    ///
    /// Only invalid options produce an error; case failures are reported.
    pub async fn execute_batch(
        &self,
        cases: &[TestCase],
        options: &BatchOptions,
    ) -> Result<BatchReport> {
        let workers = options.effective_concurrency()?;
        let task_id = new_task_id();
        let started_at = Utc::now();

        tracing::info!(
            "Task {}: {} cases, concurrency {}{}",
            task_id,
            cases.len(),
            workers,
            if options.stop_on_error { ", stop on error" } else { "" }
        );

        let (details, skipped) = if workers == 1 {
            self.run_sequential(cases, options).await
        } else {
            self.run_concurrent(cases, options, workers).await
        };

        if skipped > 0 {
            tracing::warn!("Stopped after a failure, {} cases not run", skipped);
        }

        Ok(BatchReport::new(
            task_id,
            ReportOptions::new(options, &self.execute),
            started_at,
            details,
            skipped,
        ))
    }

    async fn run_sequential(
        &self,
        cases: &[TestCase],
        options: &BatchOptions,
    ) -> (Vec<ExecutionResult>, usize) {
        let mut details = Vec::with_capacity(cases.len());

        for (index, case) in cases.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(options.case_interval()).await;
            }
            tracing::info!("[{}/{}] {}", index + 1, cases.len(), case.name);

            let result = self.executor.execute(case, &self.execute).await;
            let failed = !result.success;
            details.push(result);

            if failed && options.stop_on_error {
                return (details, cases.len() - index - 1);
            }
        }
        (details, 0)
    }

    async fn run_concurrent(
        &self,
        cases: &[TestCase],
        options: &BatchOptions,
        workers: usize,
    ) -> (Vec<ExecutionResult>, usize) {
        let pool = WorkerPool::new(cases, options.stop_on_error);
        let workers = workers.min(cases.len());

        futures_util::future::join_all((0..workers).map(|id| self.worker(&pool, id))).await;

        pool.into_results()
    }

    async fn worker(&self, pool: &WorkerPool<'_>, id: usize) {
        let mut wake = pool.wake.subscribe();

        loop {
            // Mark the current generation seen before looking at the queue so
            // a completion racing with the check still wakes us
            wake.borrow_and_update();

            match pool.admit() {
                Admit::Done => break,
                Admit::Blocked => {
                    tracing::debug!("Worker {} waiting for a working directory", id);
                    if wake.changed().await.is_err() {
                        break;
                    }
                }
                Admit::Run(index) => {
                    let case = &pool.cases[index];
                    let lease = DirLease {
                        pool,
                        dir: &case.working_dir,
                    };
                    tracing::info!(
                        "Worker {} running '{}' ({}/{})",
                        id,
                        case.name,
                        index + 1,
                        pool.cases.len()
                    );

                    let result = self.executor.execute(case, &self.execute).await;
                    pool.complete(index, result);
                    drop(lease);
                }
            }
        }
    }
}

enum Admit {
    Run(usize),
    /// Every pending case targets a busy working directory
    Blocked,
    Done,
}

struct Admission {
    /// Indices of cases not yet admitted, in submission order
    pending: VecDeque<usize>,
    busy: HashSet<PathBuf>,
    halted: bool,
}

struct WorkerPool<'a> {
    cases: &'a [TestCase],
    stop_on_error: bool,
    state: Mutex<Admission>,
    results: Mutex<Vec<Option<ExecutionResult>>>,
    /// Bumped whenever a working directory is freed or the batch halts
    wake: watch::Sender<u64>,
}

impl<'a> WorkerPool<'a> {
    fn new(cases: &'a [TestCase], stop_on_error: bool) -> Self {
        let (wake, _) = watch::channel(0);
        Self {
            cases,
            stop_on_error,
            state: Mutex::new(Admission {
                pending: (0..cases.len()).collect(),
                busy: HashSet::new(),
                halted: false,
            }),
            results: Mutex::new(vec![None; cases.len()]),
            wake,
        }
    }

    /// Take the earliest pending case whose working directory is free
    fn admit(&self) -> Admit {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        if state.halted || state.pending.is_empty() {
            return Admit::Done;
        }

        let position = state
            .pending
            .iter()
            .position(|&i| !state.busy.contains(&self.cases[i].working_dir));
        match position.and_then(|p| state.pending.remove(p)) {
            Some(index) => {
                state.busy.insert(self.cases[index].working_dir.clone());
                Admit::Run(index)
            }
            None => Admit::Blocked,
        }
    }

    fn complete(&self, index: usize, result: ExecutionResult) {
        if !result.success && self.stop_on_error {
            let mut state = lock(&self.state);
            if !state.halted {
                tracing::info!("'{}' failed, admitting no further cases", result.name);
                state.halted = true;
            }
        }
        lock(&self.results)[index] = Some(result);
    }

    fn release(&self, dir: &Path) {
        lock(&self.state).busy.remove(dir);
        self.wake.send_modify(|generation| *generation += 1);
    }

    /// Results of executed cases in submission order, plus the skipped count
    fn into_results(self) -> (Vec<ExecutionResult>, usize) {
        let skipped = self
            .state
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .len();
        let results = self
            .results
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .into_iter()
            .flatten()
            .collect();
        (results, skipped)
    }
}

/// Working-directory lock held while a case runs
struct DirLease<'p, 'a> {
    pool: &'p WorkerPool<'a>,
    dir: &'p Path,
}

impl Drop for DirLease<'_, '_> {
    fn drop(&mut self) {
        self.pool.release(self.dir);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
