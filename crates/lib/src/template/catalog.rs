//! Name -> template lookup for entry points that pick a dialogue by name.

use super::Template;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("template has no name and cannot be looked up")]
    Unnamed,
    #[error("template already registered: {0}")]
    Duplicate(String),
}

/// Named templates, built once at startup.
#[derive(Debug, Default)]
pub struct TemplateCatalog {
    templates: HashMap<String, Arc<Template>>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, template: Arc<Template>) -> Result<(), CatalogError> {
        let name = template.name().ok_or(CatalogError::Unnamed)?.to_string();
        if self.templates.contains_key(&name) {
            return Err(CatalogError::Duplicate(name));
        }
        self.templates.insert(name, template);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Template>> {
        self.templates.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        names.sort();
        names
    }
}
