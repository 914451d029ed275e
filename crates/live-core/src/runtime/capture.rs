//! Structured record of one evaluation.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ObjectRef;
use crate::errors::RuntimeError;

/// A condition signalled by user code: an error, warning or message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub message: String,
    /// Deparsed call that signalled the condition, when known.
    #[serde(default)]
    pub call: Option<String>,
    #[serde(default)]
    pub class: Vec<String>,
}

impl Condition {
    pub fn error(message: impl Into<String>, call: Option<String>) -> Self {
        Self {
            message: message.into(),
            call,
            class: vec!["simpleError".into(), "error".into(), "condition".into()],
        }
    }

    pub fn warning(message: impl Into<String>, call: Option<String>) -> Self {
        Self {
            message: message.into(),
            call,
            class: vec!["simpleWarning".into(), "warning".into(), "condition".into()],
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            call: None,
            class: vec!["simpleMessage".into(), "message".into(), "condition".into()],
        }
    }

    pub fn inherits(&self, class: &str) -> bool {
        self.class.iter().any(|c| c == class)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.call {
            Some(call) => write!(f, "Error in `{}`: {}", call, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// One captured output item. The set is closed: anything an adapter cannot
/// express as one of these variants is a contract violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaptureItem {
    Text { text: String },
    Warning { condition: Condition },
    Error { condition: Condition },
    Message { condition: Condition },
    Source { src: String },
    Result { value: ObjectRef, visible: bool, asis: bool },
    Plot { plot: ObjectRef },
}

impl CaptureItem {
    pub fn source(src: impl Into<String>) -> Self {
        CaptureItem::Source { src: src.into() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        CaptureItem::Text { text: text.into() }
    }

    fn handles(&self) -> Option<ObjectRef> {
        match self {
            CaptureItem::Result { value, .. } => Some(*value),
            CaptureItem::Plot { plot } => Some(*plot),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Capture {
    pub value: Option<ObjectRef>,
    pub stdout: String,
    pub stderr: String,
    pub items: Vec<CaptureItem>,
}

#[derive(Deserialize)]
struct WireCapture {
    #[serde(default)]
    value: Option<ObjectRef>,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

impl Capture {
    /// Decodes a capture received over the worker boundary. Items are decoded
    /// one by one so an unknown item shape is reported precisely instead of
    /// as a generic protocol failure.
    pub fn decode(payload: serde_json::Value) -> Result<Self, RuntimeError> {
        let wire: WireCapture = serde_json::from_value(payload)
            .map_err(|e| RuntimeError::Protocol(format!("malformed capture: {}", e)))?;

        let items = wire
            .items
            .into_iter()
            .map(|item| {
                serde_json::from_value::<CaptureItem>(item.clone())
                    .map_err(|_| RuntimeError::UnrecognizedOutput(item.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            value: wire.value,
            stdout: wire.stdout,
            stderr: wire.stderr,
            items,
        })
    }

    /// Every interpreter-side handle referenced by this capture.
    pub fn handles(&self) -> Vec<ObjectRef> {
        let mut handles: Vec<ObjectRef> = self.items.iter().filter_map(CaptureItem::handles).collect();
        if let Some(value) = self.value {
            if !handles.contains(&value) {
                handles.push(value);
            }
        }
        handles
    }

    /// Value of the last captured result, falling back to the value of the
    /// whole snippet.
    pub fn last_value(&self) -> Option<ObjectRef> {
        self.items
            .iter()
            .rev()
            .find_map(|item| match item {
                CaptureItem::Result { value, .. } => Some(*value),
                _ => None,
            })
            .or(self.value)
    }

    pub fn first_error(&self) -> Option<&Condition> {
        self.items.iter().find_map(|item| match item {
            CaptureItem::Error { condition } => Some(condition),
            _ => None,
        })
    }
}
