//! Evaluation options and context.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::LiveError;
use crate::indicator::Indicator;
use crate::runtime::{EvalRequest, GraphicsSize};

/// How visible output is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Show,
    /// Nothing is rendered; exported values are still computed.
    Hide,
    /// The last value's text is injected verbatim.
    Asis,
}

impl Serialize for OutputMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            OutputMode::Show => serializer.serialize_bool(true),
            OutputMode::Hide => serializer.serialize_bool(false),
            OutputMode::Asis => serializer.serialize_str("asis"),
        }
    }
}

impl<'de> Deserialize<'de> for OutputMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Mode(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Ok(OutputMode::Show),
            Raw::Flag(false) => Ok(OutputMode::Hide),
            Raw::Mode(mode) if mode == "asis" => Ok(OutputMode::Asis),
            Raw::Mode(other) => Err(serde::de::Error::custom(format!(
                "invalid output mode '{}', expected true, false or \"asis\"",
                other
            ))),
        }
    }
}

/// A single name or a list of names.
fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::One(name) => vec![name],
        Raw::Many(names) => names,
        Raw::Nothing(()) => Vec::new(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluateOptions {
    /// Namespace key; `"global"` shares the top-level namespace.
    pub envir: String,
    pub eval: bool,
    pub echo: bool,
    pub warning: bool,
    pub error: bool,
    pub include: bool,
    pub output: OutputMode,
    /// Seconds.
    pub timelimit: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exercise: Option<String>,
    #[serde(deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub define: Vec<String>,
    /// Names of page values bound into the prep scope.
    #[serde(deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub input: Vec<String>,
    /// Inches.
    #[serde(rename = "fig-width", skip_serializing_if = "Option::is_none")]
    pub fig_width: Option<f64>,
    #[serde(rename = "fig-height", skip_serializing_if = "Option::is_none")]
    pub fig_height: Option<f64>,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self {
            envir: "global".to_string(),
            eval: true,
            echo: false,
            warning: true,
            error: true,
            include: true,
            output: OutputMode::Show,
            timelimit: 30.0,
            exercise: None,
            define: Vec::new(),
            input: Vec::new(),
            fig_width: None,
            fig_height: None,
        }
    }
}

impl EvaluateOptions {
    /// Options with the keys of `overrides` applied on top.
    pub fn with_overrides(&self, overrides: &serde_json::Value) -> Result<Self, LiveError> {
        let mut base = serde_json::to_value(self)?;
        match (base.as_object_mut(), overrides) {
            (Some(base), serde_json::Value::Object(overrides)) => {
                for (key, value) in overrides {
                    base.insert(key.clone(), value.clone());
                }
            }
            (_, serde_json::Value::Null) => {}
            _ => {
                return Err(LiveError::ConfigError(format!(
                    "evaluation options must be a mapping, got {}",
                    overrides
                )))
            }
        }
        serde_json::from_value(base)
            .map_err(|e| LiveError::ConfigError(format!("invalid evaluation options: {}", e)))
    }

    /// Fixed options the grader evaluates checking code with.
    pub fn for_grading(&self, timelimit: f64) -> Self {
        Self {
            envir: self.envir.clone(),
            eval: true,
            echo: false,
            warning: true,
            error: false,
            include: true,
            output: OutputMode::Show,
            timelimit,
            exercise: self.exercise.clone(),
            define: Vec::new(),
            input: Vec::new(),
            fig_width: self.fig_width,
            fig_height: self.fig_height,
        }
    }

    pub fn eval_request(&self) -> EvalRequest {
        EvalRequest {
            timelimit: self.timelimit,
            keep_warning: self.warning,
            keep_message: self.warning,
            capture_errors: self.error,
        }
    }
}

/// Figure defaults applied when options carry no explicit size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FigureDefaults {
    pub width: f64,
    pub height: f64,
    pub dpi: f64,
}

impl Default for FigureDefaults {
    fn default() -> Self {
        Self {
            width: 7.0,
            height: 5.0,
            dpi: 72.0,
        }
    }
}

impl FigureDefaults {
    pub fn size_for(&self, options: &EvaluateOptions) -> GraphicsSize {
        let width = options.fig_width.unwrap_or(self.width);
        let height = options.fig_height.unwrap_or(self.height);
        GraphicsSize {
            width: (width * self.dpi).round().max(1.0) as u32,
            height: (height * self.dpi).round().max(1.0) as u32,
        }
    }
}

/// What one evaluator runs: code, options and an optional page indicator.
#[derive(Clone)]
pub struct EvaluateContext {
    pub code: String,
    pub options: EvaluateOptions,
    pub indicator: Option<Indicator>,
}

impl EvaluateContext {
    pub fn new(code: impl Into<String>, options: EvaluateOptions) -> Self {
        Self {
            code: code.into(),
            options,
            indicator: None,
        }
    }

    pub fn with_indicator(mut self, indicator: Indicator) -> Self {
        self.indicator = Some(indicator);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_interactive_runs() {
        let options = EvaluateOptions::default();
        assert_eq!(options.envir, "global");
        assert!(options.eval && options.warning && options.error && options.include);
        assert!(!options.echo);
        assert_eq!(options.output, OutputMode::Show);
        assert_eq!(options.timelimit, 30.0);
    }

    #[test]
    fn overrides_apply_on_top() {
        let options = EvaluateOptions::default()
            .with_overrides(&json!({
                "echo": true,
                "output": "asis",
                "define": "x",
                "exercise": "ex1",
                "envir": "ex1",
                "fig-width": 4
            }))
            .unwrap();
        assert!(options.echo);
        assert_eq!(options.output, OutputMode::Asis);
        assert_eq!(options.define, vec!["x"]);
        assert_eq!(options.exercise.as_deref(), Some("ex1"));
        assert_eq!(options.fig_width, Some(4.0));
        assert!(options.error);
    }

    #[test]
    fn define_accepts_lists_and_output_accepts_flags() {
        let options = EvaluateOptions::default()
            .with_overrides(&json!({"define": ["a", "b"], "output": false}))
            .unwrap();
        assert_eq!(options.define, vec!["a", "b"]);
        assert_eq!(options.output, OutputMode::Hide);

        let err = EvaluateOptions::default()
            .with_overrides(&json!({"output": "loud"}))
            .unwrap_err();
        assert!(matches!(err, LiveError::ConfigError(_)));
    }

    #[test]
    fn grading_options_are_fixed() {
        let base = EvaluateOptions {
            echo: true,
            error: true,
            envir: "ex1".into(),
            ..Default::default()
        };
        let grading = base.for_grading(600.0);
        assert!(!grading.echo);
        assert!(!grading.error);
        assert_eq!(grading.timelimit, 600.0);
        assert_eq!(grading.envir, "ex1");
        assert!(!grading.eval_request().capture_errors);
    }

    #[test]
    fn figure_size_is_inches_times_dpi() {
        let defaults = FigureDefaults::default();
        let size = defaults.size_for(&EvaluateOptions::default());
        assert_eq!((size.width, size.height), (504, 360));
        let custom = EvaluateOptions { fig_width: Some(3.0), ..Default::default() };
        assert_eq!(defaults.size_for(&custom).width, 216);
    }
}
