//! Configuration type definitions
//!
//! Every section is optional in YAML; a missing key takes the default the
//! interactive page would use. A page file carries cells to evaluate and the
//! instructor blocks of each exercise, next to an optional configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::environment::DiscardPolicy;
use crate::errors::LiveError;
use crate::evaluator::{EvaluateOptions, FigureDefaults};
use crate::page::ExerciseBlocks;
use crate::runtime::RuntimeKind;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub grading: GradingConfig,
    #[serde(default)]
    pub scopes: ScopesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_runtime_kind")]
    pub kind: RuntimeKind,
}

/// Option values every cell starts from, plus figure sizing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(flatten)]
    pub defaults: EvaluateOptions,
    #[serde(default)]
    pub figure: FigureDefaults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingConfig {
    /// Seconds allowed for solution and check code.
    #[serde(default = "default_grading_timelimit")]
    pub timelimit: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopesConfig {
    #[serde(default)]
    pub discard: DiscardPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// One code cell of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSpec {
    pub code: String,
    /// Option overrides applied on top of `evaluation`.
    #[serde(default)]
    pub options: serde_json::Value,
    /// Values bound into the prep scope before the cell runs.
    #[serde(default)]
    pub inputs: serde_json::Map<String, serde_json::Value>,
    /// Grade the cell after evaluating it. Needs an `exercise` option.
    #[serde(default)]
    pub grade: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageFile {
    #[serde(default)]
    pub config: LiveConfig,
    #[serde(default)]
    pub cells: Vec<CellSpec>,
    #[serde(default)]
    pub exercises: HashMap<String, ExerciseBlocks>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            kind: default_runtime_kind(),
        }
    }
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            timelimit: default_grading_timelimit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_runtime_kind() -> RuntimeKind {
    RuntimeKind::R
}

fn default_grading_timelimit() -> f64 {
    600.0
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LiveConfig {
    pub fn validate(&self) -> Result<(), LiveError> {
        let defaults = &self.evaluation.defaults;
        if !(defaults.timelimit > 0.0) {
            return Err(LiveError::ConfigError(
                "evaluation timelimit must be greater than 0".to_string(),
            ));
        }
        if defaults.envir.is_empty() {
            return Err(LiveError::ConfigError("evaluation envir cannot be empty".to_string()));
        }
        if defaults.exercise.is_some() || !defaults.define.is_empty() {
            return Err(LiveError::ConfigError(
                "exercise and define are per-cell options".to_string(),
            ));
        }

        let figure = &self.evaluation.figure;
        if !(figure.width > 0.0 && figure.height > 0.0 && figure.dpi > 0.0) {
            return Err(LiveError::ConfigError(
                "figure width, height and dpi must be greater than 0".to_string(),
            ));
        }

        if !(self.grading.timelimit > 0.0) {
            return Err(LiveError::ConfigError(
                "grading timelimit must be greater than 0".to_string(),
            ));
        }

        self.logging.level_filter()?;
        Ok(())
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> Result<log::LevelFilter, LiveError> {
        log::LevelFilter::from_str(&self.level).map_err(|_| {
            LiveError::ConfigError(format!("unknown log level '{}'", self.level))
        })
    }
}

impl PageFile {
    pub fn validate(&self) -> Result<(), LiveError> {
        self.config.validate()?;
        for (i, cell) in self.cells.iter().enumerate() {
            if !(cell.options.is_object() || cell.options.is_null()) {
                return Err(LiveError::ConfigError(format!(
                    "cell {}: options must be a mapping",
                    i + 1
                )));
            }
            if cell.grade && cell.options.get("exercise").is_none() {
                return Err(LiveError::ConfigError(format!(
                    "cell {}: grading needs an exercise option",
                    i + 1
                )));
            }
        }
        Ok(())
    }
}
