//! UI automation driver interface
//!
//! The executor only talks to a running instance through these traits. The
//! bundled [`CdpDriver`] speaks just enough of the remote-debugging protocol
//! to back them; tests substitute in-memory pages.

mod cdp;
pub mod operations;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::common::Result;

pub use cdp::CdpDriver;

/// A controllable page inside a connected instance
#[async_trait]
pub trait Page: Send {
    /// Wait until an element matches `selector`, failing with `StepTimeout`
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<()>;

    async fn click(&mut self, selector: &str) -> Result<()>;

    async fn double_click(&mut self, selector: &str) -> Result<()>;

    /// Replace the content of an input with `text`
    async fn fill(&mut self, selector: &str, text: &str) -> Result<()>;

    /// Call a JavaScript function source with JSON arguments
    async fn evaluate(&mut self, function: &str, args: Vec<Value>) -> Result<Value>;

    /// Drop the connection; never closes the instance itself
    async fn disconnect(&mut self) -> Result<()>;
}

/// Connects to the instance listening on a debugging port
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    async fn connect(&self, port: u16) -> Result<Box<dyn Page>>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::common::Error;

    /// In-memory page recording every call
    #[derive(Clone, Default)]
    pub struct RecordingPage {
        pub calls: Arc<Mutex<Vec<String>>>,
        /// Selectors that never appear
        pub missing: Arc<HashSet<String>>,
        /// Value returned by `evaluate`
        pub evaluate_result: Value,
    }

    impl RecordingPage {
        pub fn with_missing(selectors: &[&str]) -> Self {
            Self {
                missing: Arc::new(selectors.iter().map(|s| s.to_string()).collect()),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl Page for RecordingPage {
        async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<()> {
            self.record(format!("wait {}", selector));
            if self.missing.contains(selector) {
                return Err(Error::step_timeout(selector, timeout.as_millis() as u64));
            }
            Ok(())
        }

        async fn click(&mut self, selector: &str) -> Result<()> {
            self.record(format!("click {}", selector));
            Ok(())
        }

        async fn double_click(&mut self, selector: &str) -> Result<()> {
            self.record(format!("dblclick {}", selector));
            Ok(())
        }

        async fn fill(&mut self, selector: &str, text: &str) -> Result<()> {
            self.record(format!("fill {} {}", selector, text));
            Ok(())
        }

        async fn evaluate(&mut self, _function: &str, args: Vec<Value>) -> Result<Value> {
            self.record(format!("evaluate {}", Value::Array(args)));
            Ok(self.evaluate_result.clone())
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.record("disconnect".to_string());
            Ok(())
        }
    }

    /// Driver handing out clones of one recording page
    pub struct RecordingDriver {
        pub page: RecordingPage,
        pub connects: Arc<Mutex<Vec<u16>>>,
    }

    impl RecordingDriver {
        pub fn new(page: RecordingPage) -> Self {
            Self {
                page,
                connects: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl AutomationDriver for RecordingDriver {
        async fn connect(&self, port: u16) -> Result<Box<dyn Page>> {
            self.connects.lock().unwrap().push(port);
            Ok(Box::new(self.page.clone()))
        }
    }
}
