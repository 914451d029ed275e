//! Values exchanged with an interpreter.

use base64::Engine;
use serde::{Deserialize, Serialize};

use super::ObjectRef;

/// A value to be bound into a scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BindValue {
    /// Plain host data. Objects become named lists; arrays become a data
    /// frame when rectangular, otherwise a list of lists.
    Json(serde_json::Value),
    /// Already an interpreter object; bound as is.
    Native(ObjectRef),
    /// Named list whose entries may mix host data and native objects.
    Record(Vec<(String, BindValue)>),
}

impl From<serde_json::Value> for BindValue {
    fn from(value: serde_json::Value) -> Self {
        BindValue::Json(value)
    }
}

impl From<ObjectRef> for BindValue {
    fn from(value: ObjectRef) -> Self {
        BindValue::Native(value)
    }
}

impl From<&str> for BindValue {
    fn from(value: &str) -> Self {
        BindValue::Json(serde_json::Value::String(value.to_string()))
    }
}

/// Shallow host-side description of an interpreter object. Composite values
/// hand out fresh handles for their children, which the caller owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NativeValue {
    Null,
    Logical { values: Vec<bool> },
    /// Non-finite values travel as `None`.
    Double { values: Vec<Option<f64>> },
    Character { values: Vec<String> },
    Html {
        html: String,
        #[serde(default)]
        dependencies: Vec<HtmlDependency>,
    },
    Table { columns: Vec<Column> },
    List {
        #[serde(default)]
        names: Option<Vec<String>>,
        items: Vec<ObjectRef>,
    },
    Environment { names: Vec<String>, items: Vec<ObjectRef> },
    Function,
    Plot,
}

impl NativeValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            NativeValue::Null => "null",
            NativeValue::Logical { .. } => "logical",
            NativeValue::Double { .. } => "double",
            NativeValue::Character { .. } => "character",
            NativeValue::Html { .. } => "html",
            NativeValue::Table { .. } => "data.frame",
            NativeValue::List { .. } => "list",
            NativeValue::Environment { .. } => "environment",
            NativeValue::Function => "function",
            NativeValue::Plot => "recordedplot",
        }
    }

    /// Text of a character or HTML value.
    pub fn as_text(&self) -> Option<String> {
        match self {
            NativeValue::Character { values } => Some(values.join("")),
            NativeValue::Html { html, .. } => Some(html.clone()),
            _ => None,
        }
    }

    pub fn handles(&self) -> &[ObjectRef] {
        match self {
            NativeValue::List { items, .. } | NativeValue::Environment { items, .. } => items,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<serde_json::Value>,
}

/// Page-level resources an HTML fragment needs before it can render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlDependency {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Base URL scripts and stylesheets are resolved against.
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub script: Vec<String>,
    #[serde(default)]
    pub stylesheet: Vec<String>,
    #[serde(default)]
    pub head: Option<String>,
}

impl HtmlDependency {
    pub fn resolve(&self, file: &str) -> String {
        match &self.src {
            Some(base) if !base.is_empty() => format!("{}/{}", base.trim_end_matches('/'), file),
            _ => file.to_string(),
        }
    }
}

/// A rasterized plot, PNG encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    /// Base64 encoded PNG bytes.
    pub data: String,
}

impl Bitmap {
    pub fn from_png(width: u32, height: u32, png: &[u8]) -> Self {
        Self {
            width,
            height,
            data: base64::engine::general_purpose::STANDARD.encode(png),
        }
    }

    pub fn png_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD.decode(&self.data)
    }

    pub fn data_url(&self) -> String {
        format!("data:image/png;base64,{}", self.data)
    }
}

/// Result of invoking an interpreter callable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallCapture {
    pub value: ObjectRef,
    #[serde(default)]
    pub plots: Vec<ObjectRef>,
    #[serde(default)]
    pub stdout: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dependency_paths_resolve_against_src() {
        let dep = HtmlDependency {
            name: "d3".into(),
            version: "7.8.5".into(),
            src: Some("https://cdn.example.org/d3/".into()),
            script: vec!["d3.min.js".into()],
            stylesheet: vec![],
            head: None,
        };
        assert_eq!(dep.resolve("d3.min.js"), "https://cdn.example.org/d3/d3.min.js");
    }

    #[test]
    fn bitmap_round_trips_png_bytes() {
        let bitmap = Bitmap::from_png(2, 1, &[137, 80, 78, 71]);
        assert_eq!(bitmap.png_bytes().unwrap(), vec![137, 80, 78, 71]);
        assert!(bitmap.data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn bind_values_serialize_with_kind_tag() {
        let value = BindValue::Record(vec![
            ("label".into(), BindValue::from("ex1")),
            ("envir".into(), BindValue::Native(ObjectRef(3))),
        ]);
        let wire = serde_json::to_value(&value).unwrap();
        assert_eq!(wire["kind"], json!("record"));
        let back: BindValue = serde_json::from_value(wire).unwrap();
        assert_eq!(back, value);
    }
}
