//! Page-level HTML dependencies (scripts, stylesheets, head markup).
//!
//! Each dependency name is loaded at most once per page. The first load
//! wins; later fragments declaring the same name reuse it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::escape_html;
use crate::errors::LiveError;
use crate::runtime::HtmlDependency;

#[async_trait]
pub trait DependencyLoader: Send + Sync {
    async fn load(&self, dependency: &HtmlDependency) -> Result<(), LiveError>;
}

/// Collects the `<head>` markup a page needs for every loaded dependency.
#[derive(Default)]
pub struct HeadCollector {
    tags: Mutex<Vec<String>>,
}

impl HeadCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tags(&self) -> Vec<String> {
        self.tags.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn head_html(&self) -> String {
        self.tags().join("\n")
    }
}

#[async_trait]
impl DependencyLoader for HeadCollector {
    async fn load(&self, dependency: &HtmlDependency) -> Result<(), LiveError> {
        let mut tags = Vec::new();
        if let Some(head) = &dependency.head {
            tags.push(head.clone());
        }
        for stylesheet in &dependency.stylesheet {
            tags.push(format!(
                "<link href=\"{}\" rel=\"stylesheet\" />",
                escape_html(&dependency.resolve(stylesheet))
            ));
        }
        for script in &dependency.script {
            tags.push(format!(
                "<script src=\"{}\"></script>",
                escape_html(&dependency.resolve(script))
            ));
        }
        self.tags.lock().unwrap_or_else(|e| e.into_inner()).extend(tags);
        Ok(())
    }
}

pub struct DependencyRegistry {
    loader: Arc<dyn DependencyLoader>,
    loaded: tokio::sync::Mutex<HashMap<String, String>>,
}

impl DependencyRegistry {
    pub fn new(loader: Arc<dyn DependencyLoader>) -> Self {
        Self {
            loader,
            loaded: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Loads dependencies in declaration order. Returns the names that were
    /// loaded by this call.
    pub async fn load_all(&self, dependencies: &[HtmlDependency]) -> Result<Vec<String>, LiveError> {
        let mut loaded_now = Vec::new();
        // Held across loads so two fragments can't race on the same name.
        let mut loaded = self.loaded.lock().await;
        for dependency in dependencies {
            if let Some(version) = loaded.get(&dependency.name) {
                log::debug!(
                    "Dependency '{}' already loaded (version {})",
                    dependency.name,
                    version
                );
                continue;
            }
            self.loader.load(dependency).await.map_err(|e| {
                LiveError::Dependency(format!("failed to load '{}': {}", dependency.name, e))
            })?;
            loaded.insert(dependency.name.clone(), dependency.version.clone());
            loaded_now.push(dependency.name.clone());
        }
        Ok(loaded_now)
    }

    pub async fn is_loaded(&self, name: &str) -> bool {
        self.loaded.lock().await.contains_key(name)
    }
}

impl Default for DependencyRegistry {
    fn default() -> Self {
        Self::new(Arc::new(HeadCollector::new()))
    }
}
