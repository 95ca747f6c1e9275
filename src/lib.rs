//! cdp-runner - end-to-end UI test orchestration for desktop applications
//!
//! Starts application instances with a remote-debugging port, drives their
//! UI through an automation driver and runs batches of test cases with
//! bounded concurrency, never running two cases in the same working
//! directory at once.

pub mod cli;
pub mod commands;
pub mod common;
pub mod driver;
pub mod instance;
pub mod scripts;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
