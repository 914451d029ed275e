//! Conversion of interpreter values into host values.
//!
//! Composite values are walked recursively through `describe`; every child
//! handle handed out on the way is tracked by the caller's shelter. Tables
//! become columnar structures, recorded plots become bitmaps, and callables
//! become `HostCallable`s that keep their own retained handle.

use futures_util::future::{BoxFuture, FutureExt};
use serde::{Serialize, Serializer};
use serde_json::json;
use std::fmt;
use std::sync::Arc;

use crate::errors::LiveError;
use crate::runtime::{
    BindValue, Bitmap, Column, GraphicsSize, HtmlDependency, NativeValue, ObjectRef, Runtime,
};
use crate::shelter::{release_detached, Shelter};

#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<HostValue>),
    Object(Vec<(String, HostValue)>),
    Table(Vec<Column>),
    Html {
        html: String,
        dependencies: Vec<HtmlDependency>,
    },
    Image(Bitmap),
    Function(HostCallable),
}

impl HostValue {
    pub fn get(&self, key: &str) -> Option<&HostValue> {
        match self {
            HostValue::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// `(rows, columns)` of a table.
    pub fn shape(&self) -> Option<(usize, usize)> {
        match self {
            HostValue::Table(columns) => {
                let rows = columns.first().map_or(0, |c| c.values.len());
                Some((rows, columns.len()))
            }
            _ => None,
        }
    }

    /// Plain JSON rendition. Tables become arrays of row records, images
    /// become data URLs and callables an opaque marker.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            HostValue::Null => serde_json::Value::Null,
            HostValue::Bool(b) => json!(b),
            HostValue::Number(n) => json!(n),
            HostValue::String(s) => json!(s),
            HostValue::Array(items) => items.iter().map(HostValue::to_json).collect(),
            HostValue::Object(entries) => serde_json::Value::Object(
                entries.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            HostValue::Table(columns) => {
                let rows = columns.first().map_or(0, |c| c.values.len());
                (0..rows)
                    .map(|row| {
                        serde_json::Value::Object(
                            columns
                                .iter()
                                .map(|c| {
                                    let cell = c.values.get(row).cloned().unwrap_or_default();
                                    (c.name.clone(), cell)
                                })
                                .collect(),
                        )
                    })
                    .collect()
            }
            HostValue::Html { html, .. } => json!(html),
            HostValue::Image(bitmap) => json!(bitmap.data_url()),
            HostValue::Function(_) => json!("[function]"),
        }
    }

    /// Value to hand back to an interpreter. Tables travel as row records.
    pub fn to_bind_value(&self) -> BindValue {
        BindValue::Json(self.to_json())
    }
}

impl Serialize for HostValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<serde_json::Value> for HostValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => HostValue::Null,
            serde_json::Value::Bool(b) => HostValue::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map_or(HostValue::Null, HostValue::Number),
            serde_json::Value::String(s) => HostValue::String(s),
            serde_json::Value::Array(items) => {
                HostValue::Array(items.into_iter().map(HostValue::from).collect())
            }
            serde_json::Value::Object(map) => {
                HostValue::Object(map.into_iter().map(|(k, v)| (k, HostValue::from(v))).collect())
            }
        }
    }
}

struct CallableHandle {
    runtime: Arc<dyn Runtime>,
    handle: ObjectRef,
    graphics: GraphicsSize,
}

impl Drop for CallableHandle {
    fn drop(&mut self) {
        release_detached(
            self.runtime.clone(),
            vec![self.handle],
            format!("exported function {}", self.handle),
        );
    }
}

/// An interpreter function exported to the host.
#[derive(Clone)]
pub struct HostCallable {
    inner: Arc<CallableHandle>,
}

impl HostCallable {
    pub fn new(runtime: Arc<dyn Runtime>, handle: ObjectRef, graphics: GraphicsSize) -> Self {
        Self {
            inner: Arc::new(CallableHandle { runtime, handle, graphics }),
        }
    }

    pub fn handle(&self) -> ObjectRef {
        self.inner.handle
    }

    /// Calls the function in the interpreter. Returns `{plot, value}`: the
    /// last plot drawn during the call (or null) and the converted return
    /// value.
    pub async fn call(&self, args: &[HostValue]) -> Result<HostValue, LiveError> {
        let runtime = &self.inner.runtime;
        let shelter = Shelter::new(runtime.clone());
        let outcome = self.call_in(&shelter, args).await;
        let purged = shelter.purge().await;
        let value = outcome?;
        purged?;
        Ok(value)
    }

    async fn call_in(&self, shelter: &Shelter, args: &[HostValue]) -> Result<HostValue, LiveError> {
        let runtime = &self.inner.runtime;
        let mut handles = Vec::with_capacity(args.len());
        for arg in args {
            let handle = runtime.convert_from_host(&arg.to_bind_value()).await?;
            handles.push(shelter.track(handle));
        }

        let captured = runtime
            .call(self.inner.handle, &handles, Some(self.inner.graphics))
            .await?;
        shelter.track(captured.value);
        shelter.track_all(captured.plots.iter().copied());

        let plot = match captured.plots.last() {
            Some(plot) => HostValue::Image(runtime.replay_plot(*plot, self.inner.graphics).await?),
            None => HostValue::Null,
        };
        let value = to_host(runtime, captured.value, shelter, self.inner.graphics).await?;
        Ok(HostValue::Object(vec![
            ("plot".to_string(), plot),
            ("value".to_string(), value),
        ]))
    }
}

impl fmt::Debug for HostCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostCallable({})", self.inner.handle)
    }
}

impl PartialEq for HostCallable {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn scalar_or_array<T>(values: Vec<T>, wrap: impl Fn(T) -> HostValue) -> HostValue {
    if values.len() == 1 {
        values.into_iter().next().map_or(HostValue::Null, wrap)
    } else {
        HostValue::Array(values.into_iter().map(wrap).collect())
    }
}

/// Converts an interpreter object into a host value. Length-one vectors
/// become scalars.
pub fn to_host<'a>(
    runtime: &'a Arc<dyn Runtime>,
    handle: ObjectRef,
    shelter: &'a Shelter,
    graphics: GraphicsSize,
) -> BoxFuture<'a, Result<HostValue, LiveError>> {
    async move {
        let described = runtime.describe(handle).await?;
        shelter.track_all(described.handles().iter().copied());

        Ok(match described {
            NativeValue::Null => HostValue::Null,
            NativeValue::Logical { values } => scalar_or_array(values, HostValue::Bool),
            NativeValue::Double { values } => scalar_or_array(values, |n| {
                n.map_or(HostValue::Null, HostValue::Number)
            }),
            NativeValue::Character { values } => scalar_or_array(values, HostValue::String),
            NativeValue::Html { html, dependencies } => HostValue::Html { html, dependencies },
            NativeValue::Table { columns } => HostValue::Table(columns),
            NativeValue::List { names, items } => {
                let mut values = Vec::with_capacity(items.len());
                for item in &items {
                    values.push(to_host(runtime, *item, shelter, graphics).await?);
                }
                match names {
                    Some(names) if names.iter().all(|n| !n.is_empty()) => {
                        HostValue::Object(names.into_iter().zip(values).collect())
                    }
                    _ => HostValue::Array(values),
                }
            }
            NativeValue::Environment { names, items } => {
                let mut entries = Vec::with_capacity(items.len());
                for (name, item) in names.into_iter().zip(&items) {
                    entries.push((name, to_host(runtime, *item, shelter, graphics).await?));
                }
                HostValue::Object(entries)
            }
            NativeValue::Function => {
                let retained = runtime.retain(handle).await?;
                HostValue::Function(HostCallable::new(runtime.clone(), retained, graphics))
            }
            NativeValue::Plot => HostValue::Image(runtime.replay_plot(handle, graphics).await?),
        })
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::MinirInterpreter;
    use crate::runtime::{EvalRequest, WorkerRuntime};

    const SIZE: GraphicsSize = GraphicsSize { width: 140, height: 100 };

    async fn eval_value(runtime: &Arc<dyn Runtime>, shelter: &Shelter, code: &str) -> HostValue {
        let capture = runtime
            .evaluate(runtime.global_scope(), code, &EvalRequest::default())
            .await
            .unwrap();
        shelter.track_all(capture.handles());
        let value = capture.last_value().unwrap();
        to_host(runtime, value, shelter, SIZE).await.unwrap()
    }

    #[tokio::test]
    async fn vectors_and_lists_convert_recursively() {
        let runtime: Arc<dyn Runtime> = WorkerRuntime::spawn(MinirInterpreter::new).await.unwrap();
        let shelter = Shelter::new(runtime.clone());

        assert_eq!(eval_value(&runtime, &shelter, "2").await, HostValue::Number(2.0));
        assert_eq!(
            eval_value(&runtime, &shelter, "c(TRUE, FALSE)").await,
            HostValue::Array(vec![HostValue::Bool(true), HostValue::Bool(false)])
        );
        let nested = eval_value(&runtime, &shelter, "list(a = 1, b = list(\"x\", 2))").await;
        assert_eq!(
            nested.to_json(),
            serde_json::json!({"a": 1.0, "b": ["x", 2.0]})
        );
        shelter.purge().await.unwrap();
    }

    #[tokio::test]
    async fn data_frames_become_tables() {
        let runtime: Arc<dyn Runtime> = WorkerRuntime::spawn(MinirInterpreter::new).await.unwrap();
        let shelter = Shelter::new(runtime.clone());
        let table = eval_value(&runtime, &shelter, "data.frame(x = c(1, 2, 3), y = c(\"a\", \"b\", \"c\"))").await;
        assert_eq!(table.shape(), Some((3, 2)));
        assert_eq!(table.to_json()[1], serde_json::json!({"x": 2.0, "y": "b"}));
        shelter.purge().await.unwrap();
    }

    #[tokio::test]
    async fn functions_become_callables_that_capture_plots() {
        let runtime: Arc<dyn Runtime> = WorkerRuntime::spawn(MinirInterpreter::new).await.unwrap();
        let shelter = Shelter::new(runtime.clone());
        let f = eval_value(
            &runtime,
            &shelter,
            "function(n) { plot(seq_len(n), seq_len(n)); n * 2 }",
        )
        .await;
        shelter.purge().await.unwrap();

        let HostValue::Function(callable) = f else {
            panic!("expected a function, got {:?}", f);
        };
        let result = callable.call(&[HostValue::Number(3.0)]).await.unwrap();
        assert_eq!(result.get("value"), Some(&HostValue::Number(6.0)));
        match result.get("plot") {
            Some(HostValue::Image(bitmap)) => assert_eq!((bitmap.width, bitmap.height), (140, 100)),
            other => panic!("expected a plot, got {:?}", other),
        }
    }
}
