//! Element registry: logical UI element names mapped to CSS selectors

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::common::{Error, Result};
use crate::driver::Page;

#[derive(Debug, Clone, Deserialize)]
pub struct ElementDef {
    pub name: String,
    pub selector: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Whether one registry entry matched anything on a live page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementCheck {
    pub name: String,
    pub selector: String,
    pub found: bool,
}

/// Lookup table loaded from a JSON array of `{ "name", "selector" }` objects
///
/// When a name appears more than once the first definition wins.
#[derive(Debug, Clone, Default)]
pub struct ElementRegistry {
    elements: Vec<ElementDef>,
}

impl ElementRegistry {
    pub fn new(elements: Vec<ElementDef>) -> Self {
        Self { elements }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
        Self::from_json(&content).map_err(|e| Error::file_read(path, e))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(Self::new(serde_json::from_str(content)?))
    }

    /// Selector for a logical element name
    pub fn get(&self, name: &str) -> Result<&str> {
        self.elements
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.selector.as_str())
            .ok_or_else(|| Error::ElementNotFound(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ElementDef> {
        self.elements.iter()
    }

    /// Look every entry up on `page`, in registry order
    ///
    /// A selector that matches nothing within `timeout` is reported missing;
    /// any other driver failure aborts the check.
    pub async fn check(
        &self,
        page: &mut dyn Page,
        timeout: Duration,
    ) -> Result<Vec<ElementCheck>> {
        let mut checks = Vec::with_capacity(self.elements.len());
        for def in &self.elements {
            let found = match page.wait_for(&def.selector, timeout).await {
                Ok(()) => true,
                Err(Error::StepTimeout { .. }) => false,
                Err(e) => return Err(e),
            };
            tracing::debug!(
                "{} ({}): {}",
                def.name,
                def.selector,
                if found { "found" } else { "missing" }
            );
            checks.push(ElementCheck {
                name: def.name.clone(),
                selector: def.selector.clone(),
                found,
            });
        }
        Ok(checks)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
