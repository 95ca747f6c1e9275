//! Test-case execution
//!
//! Loads test cases and the element registry, runs each case through the
//! [`TestCaseExecutor`] and schedules batches with the [`BatchScheduler`].

mod capture;
mod case;
mod elements;
mod executor;
mod report;
mod scheduler;

pub use capture::{persist, Capture, CommandCapture};
pub use case::{load_cases, TestCase, TestCaseSpec};
pub use elements::{ElementCheck, ElementDef, ElementRegistry};
pub use executor::{CaseExecutor, ExecuteOptions, TestCaseExecutor};
pub use report::{BatchReport, ExecutionResult, ReportOptions};
pub use scheduler::{BatchOptions, BatchScheduler};
