//! Named interaction sequences
//!
//! A script drives one connected page through the steps of a test case.
//! The executor looks scripts up by name in a [`ScriptRegistry`].

mod chat;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::driver::Page;
use crate::testing::{ElementRegistry, TestCase};

pub use chat::ChatScript;

/// Everything a script may read while it runs
pub struct ScriptContext<'a> {
    pub config: &'a Config,
    pub elements: &'a ElementRegistry,
    pub case: &'a TestCase,
    /// Resolved wait for the reply indicator
    pub reply_timeout: Duration,
}

#[async_trait]
pub trait Script: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Run the interaction sequence; the first failing step aborts it
    async fn run(&self, page: &mut dyn Page, ctx: &ScriptContext<'_>) -> Result<()>;
}

/// Scripts available by name
#[derive(Clone, Default)]
pub struct ScriptRegistry {
    scripts: Vec<Arc<dyn Script>>,
}

impl ScriptRegistry {
    /// Registry holding the built-in scripts
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(ChatScript));
        registry
    }

    /// Add a script, replacing any script of the same name
    pub fn register(&mut self, script: Arc<dyn Script>) {
        self.scripts.retain(|s| s.name() != script.name());
        self.scripts.push(script);
    }

    pub fn find(&self, name: &str) -> Result<Arc<dyn Script>> {
        self.scripts
            .iter()
            .find(|s| s.name() == name)
            .cloned()
            .ok_or_else(|| Error::script_not_found(name, &self.available()))
    }

    /// Registered script names, sorted
    pub fn available(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.scripts.iter().map(|s| s.name()).collect();
        names.sort_unstable();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Script>> {
        self.scripts.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Script for Noop {
        fn name(&self) -> &'static str {
            "noop"
        }

        fn description(&self) -> &'static str {
            "does nothing"
        }

        async fn run(&self, _page: &mut dyn Page, _ctx: &ScriptContext<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_builtin_has_chat_script() {
        let registry = ScriptRegistry::builtin();
        assert_eq!(registry.find("automate-chat").unwrap().name(), "automate-chat");
    }

    #[test]
    fn test_unknown_script_lists_available() {
        let mut registry = ScriptRegistry::builtin();
        registry.register(Arc::new(Noop));
        match registry.find("missing") {
            Err(Error::ScriptNotFound { available, .. }) => {
                assert_eq!(available, "automate-chat, noop")
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("found a script that was never registered"),
        }
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = ScriptRegistry::default();
        registry.register(Arc::new(Noop));
        registry.register(Arc::new(Noop));
        assert_eq!(registry.available(), vec!["noop"]);
    }
}
