use serde::{Deserialize, Serialize};

use crate::convert::HostValue;
use crate::render::DisplayNode;
use crate::runtime::{Condition, RuntimeKind};

pub const BLANK_MESSAGE: &str = "Please replace ______ with valid code.";

const PARSE_HINT: &str = "You may have forgotten to fill in a blank, to remove an underscore, \
to include a comma between arguments, or to close an opening <code>&quot;</code>, <code>'</code>, \
<code>(</code> or <code>{</code> with a matching <code>&quot;</code>, <code>'</code>, \
<code>)</code> or <code>}</code>.";

/// Error raised by a checking routine, shown under the feedback message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackError {
    pub message: String,
    #[serde(default)]
    pub call: Option<String>,
}

/// A verdict on one exercise attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    /// HTML fragment.
    pub message: String,
    pub correct: bool,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub error: Option<FeedbackError>,
}

impl Feedback {
    pub fn blank() -> Self {
        Self {
            message: BLANK_MESSAGE.to_string(),
            correct: false,
            kind: Some("info".into()),
            location: Some("append".into()),
            error: None,
        }
    }

    pub fn parse_failure(kind: RuntimeKind) -> Self {
        let language = kind.display_name();
        let indent = match kind {
            RuntimeKind::Python => "Your code may be indented incorrectly, or you may have forgotten",
            RuntimeKind::R => "You may have forgotten",
        };
        let hint = PARSE_HINT.replacen("You may have forgotten", indent, 1);
        Self {
            message: format!(
                "It looks like this might not be valid {lang} code. {lang} cannot determine how \
                 to turn your text into a complete command. {hint}",
                lang = language,
                hint = hint
            ),
            correct: false,
            kind: Some("error".into()),
            location: Some("append".into()),
            error: None,
        }
    }

    /// Failing grade standing in for a checking routine that raised.
    pub fn checker_error(label: Option<&str>, condition: &Condition) -> Self {
        Self {
            message: format!(
                "Error while checking `{}`: \"{}\"",
                label.unwrap_or(""),
                condition.message
            ),
            correct: false,
            kind: Some("error".into()),
            location: None,
            error: Some(FeedbackError {
                message: condition.message.clone(),
                call: condition.call.clone(),
            }),
        }
    }

    /// Reads a feedback-shaped object: `message` text and a `correct` flag.
    /// Anything else is not feedback.
    pub fn from_host(value: &HostValue) -> Option<Self> {
        let HostValue::Object(_) = value else {
            return None;
        };
        let message = match value.get("message")? {
            HostValue::String(s) => s.clone(),
            HostValue::Html { html, .. } => html.clone(),
            _ => return None,
        };
        let correct = match value.get("correct")? {
            HostValue::Bool(b) => *b,
            _ => return None,
        };
        let text = |key: &str| value.get(key).and_then(HostValue::as_str).map(str::to_string);
        let error = value.get("error").and_then(|e| {
            Some(FeedbackError {
                message: e.get("message")?.as_str()?.to_string(),
                call: e.get("call").and_then(HostValue::as_str).map(str::to_string),
            })
        });

        Some(Self {
            message,
            correct,
            kind: text("type"),
            location: text("location"),
            error,
        })
    }

    pub fn severity(&self) -> &'static str {
        match self.kind.as_deref() {
            Some("success") => "success",
            Some("info") => "info",
            Some("warning") => "warning",
            Some("error") | Some("danger") => "danger",
            _ if self.correct => "success",
            _ => "danger",
        }
    }

    /// `div.alert.exercise-grade.alert-<severity>` holding the message and,
    /// when the checker raised, its error below it.
    pub fn to_display(&self) -> DisplayNode {
        let mut alert = DisplayNode::div().class(&format!(
            "alert exercise-grade alert-{}",
            self.severity()
        ));
        alert.push(
            DisplayNode::element("span")
                .class("exercise-feedback")
                .child(DisplayNode::raw(&self.message)),
        );

        if let Some(error) = &self.error {
            alert.push(DisplayNode::element("p").child(
                DisplayNode::element("pre").child(DisplayNode::text(&format!("Error: {}", error.message))),
            ));
            if let Some(call) = &error.call {
                alert.push(
                    DisplayNode::element("details")
                        .child(DisplayNode::element("pre").child(DisplayNode::text(call))),
                );
            }
        }
        alert
    }
}
