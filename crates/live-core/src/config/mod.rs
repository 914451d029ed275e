//! Configuration for the evaluation pipeline
//!
//! YAML files map onto `LiveConfig` (session-wide defaults) or `PageFile`
//! (a configuration plus the cells and exercises of one page).

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;

#[cfg(test)]
mod tests;

use crate::errors::LiveError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<LiveConfig, LiveError> {
    ConfigLoader::from_file(path).await
}
