//! Configuration loader for YAML files

use crate::config::types::*;
use crate::errors::LiveError;
use std::path::Path;
use tokio::fs;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<LiveConfig, LiveError> {
        let content = Self::read(path.as_ref()).await?;
        Self::from_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<LiveConfig, LiveError> {
        let config: LiveConfig = serde_yaml::from_str(content)
            .map_err(|e| LiveError::ConfigError(format!("Failed to parse YAML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a page (configuration, cells and exercises) from a YAML file
    pub async fn page_from_file<P: AsRef<Path>>(path: P) -> Result<PageFile, LiveError> {
        let content = Self::read(path.as_ref()).await?;
        Self::page_from_str(&content)
    }

    pub fn page_from_str(content: &str) -> Result<PageFile, LiveError> {
        let page: PageFile = serde_yaml::from_str(content)
            .map_err(|e| LiveError::ConfigError(format!("Failed to parse YAML page: {}", e)))?;
        page.validate()?;
        log::debug!(
            "Loaded page with {} cell(s) and {} exercise(s)",
            page.cells.len(),
            page.exercises.len()
        );
        Ok(page)
    }

    async fn read(path: &Path) -> Result<String, LiveError> {
        fs::read_to_string(path).await.map_err(|e| {
            LiveError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })
    }
}
