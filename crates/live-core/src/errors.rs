//! Error types for the evaluation and grading pipeline
//!
//! Two layers of errors exist. `RuntimeError` is what an interpreter
//! connection reports: user-code conditions, parse failures, objects that are
//! already gone, broken channels. `LiveError` is what the pipeline reports to
//! its host. Most variants are recoverable and end up rendered as an error
//! block or a feedback alert; `LiveError::is_fatal` marks the few that are
//! allowed to escape to the host page.

use crate::runtime::{Condition, ObjectRef};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("{0}")]
    User(Condition),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Object {0} has already been released")]
    AlreadyReleased(ObjectRef),
    #[error("Object {0} cannot be released")]
    Protected(ObjectRef),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Conversion failed: {0}")]
    Conversion(String),
    #[error("Unrecognized capture item: {0}")]
    UnrecognizedOutput(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Interpreter connection closed")]
    Disconnected,
}

#[derive(Error, Debug, Clone)]
pub enum LiveError {
    #[error("Evaluation failed: {0}")]
    Evaluation(Condition),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Conversion failed: {0}")]
    Conversion(String),
    #[error("Binding not found: {0}")]
    NotFound(String),
    #[error("Unrecognized capture item in evaluation result: {0}")]
    UnrecognizedOutput(String),
    #[error("Failed to release scope '{scope}': {message}")]
    ScopeRelease { scope: String, message: String },
    #[error("Interpreter error: {0}")]
    Runtime(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Dependency error: {0}")]
    Dependency(String),
    #[error("I/O error: {0}")]
    IoError(String),
}

impl LiveError {
    /// Errors that must not be folded into a rendered error block or a
    /// feedback item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LiveError::UnrecognizedOutput(_)
                | LiveError::ScopeRelease { .. }
                | LiveError::Runtime(_)
        )
    }
}

impl From<RuntimeError> for LiveError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::User(condition) => LiveError::Evaluation(condition),
            RuntimeError::Parse(message) => LiveError::Parse(message),
            RuntimeError::NotFound(name) => LiveError::NotFound(name),
            RuntimeError::Conversion(message) => LiveError::Conversion(message),
            RuntimeError::UnrecognizedOutput(item) => LiveError::UnrecognizedOutput(item),
            other => LiveError::Runtime(other.to_string()),
        }
    }
}

impl From<std::io::Error> for LiveError {
    fn from(err: std::io::Error) -> Self {
        LiveError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for LiveError {
    fn from(err: serde_json::Error) -> Self {
        LiveError::Conversion(err.to_string())
    }
}
