//! Bundled reference interpreter for a small R dialect ("minir").
//!
//! Objects handed to the host live in a handle table; handles stay valid
//! until released. Evaluation follows the shape of R's `evaluate`: top-level
//! expressions are grouped by the source lines they occupy, and each group
//! produces its source, printed output, conditions, results and plots.

mod ast;
mod builtins;
mod eval;
mod graphics;
mod lexer;
mod ops;
mod parser;
mod print;
mod value;

use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::errors::RuntimeError;
use crate::runtime::{
    BindValue, Bitmap, CallCapture, Capture, CaptureItem, Column, Condition, EvalRequest,
    GraphicsSize, Interpreter, NativeValue, ObjectRef, RuntimeKind,
};
use ast::Statement;
use eval::{Event, Flow, Machine};
use graphics::Device;
use value::{Env, List, Value};

const GLOBAL: u64 = 1;

/// Time budget for host-initiated calls into exported functions.
const CALL_TIMELIMIT: Duration = Duration::from_secs(30);

pub struct MinirInterpreter {
    objects: HashMap<u64, Value>,
    next: u64,
    machine: Machine,
}

impl Default for MinirInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl MinirInterpreter {
    pub fn new() -> Self {
        let mut objects = HashMap::new();
        objects.insert(GLOBAL, Value::Env(Env::root()));
        Self { objects, next: GLOBAL + 1, machine: Machine::new() }
    }

    fn store(&mut self, value: Value) -> ObjectRef {
        let id = self.next;
        self.next += 1;
        self.objects.insert(id, value);
        ObjectRef(id)
    }

    fn get(&self, handle: ObjectRef) -> Result<&Value, RuntimeError> {
        self.objects
            .get(&handle.0)
            .ok_or(RuntimeError::AlreadyReleased(handle))
    }

    fn env(&self, handle: ObjectRef) -> Result<Env, RuntimeError> {
        match self.get(handle)? {
            Value::Env(env) => Ok(env.clone()),
            other => Err(RuntimeError::Conversion(format!(
                "object {} is a {}, not an environment",
                handle,
                other.type_name()
            ))),
        }
    }

    fn from_bind(&self, value: &BindValue) -> Result<Value, RuntimeError> {
        match value {
            BindValue::Json(json) => Ok(from_json(json)),
            BindValue::Native(handle) => self.get(*handle).cloned(),
            BindValue::Record(entries) => {
                let entries = entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), self.from_bind(value)?)))
                    .collect::<Result<Vec<_>, RuntimeError>>()?;
                Ok(Value::List(List::named(entries)))
            }
        }
    }

    fn flush_events(&mut self, capture: &mut Capture, request: &EvalRequest) {
        for event in self.machine.take_events() {
            match event {
                Event::Text(text) => {
                    capture.stdout.push_str(&text);
                    capture.items.push(CaptureItem::Text { text });
                }
                Event::Warning(condition) => {
                    capture.stderr.push_str(&format!("Warning message:\n{}\n", condition.message));
                    if request.keep_warning {
                        capture.items.push(CaptureItem::Warning { condition });
                    }
                }
                Event::Message(condition) => {
                    capture.stderr.push_str(&condition.message);
                    if request.keep_message {
                        capture.items.push(CaptureItem::Message { condition });
                    }
                }
            }
        }
    }

    fn discard(&mut self, capture: &Capture) {
        for handle in capture.handles() {
            self.objects.remove(&handle.0);
        }
    }
}

fn from_json(value: &serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::bool(*b),
        Json::Number(n) => Value::num(n.as_f64().unwrap_or(f64::NAN)),
        Json::String(s) => Value::str(s.clone()),
        Json::Object(map) => Value::List(List::named(
            map.iter().map(|(k, v)| (k.clone(), from_json(v))).collect(),
        )),
        Json::Array(items) => atomic_from_array(items)
            .or_else(|| table_from_array(items))
            .unwrap_or_else(|| Value::List(List {
                values: items.iter().map(from_json).collect(),
                names: None,
                class: Vec::new(),
            })),
    }
}

fn atomic_from_array(items: &[serde_json::Value]) -> Option<Value> {
    use serde_json::Value as Json;
    let first = items.first()?;
    match first {
        Json::Bool(_) => items.iter().map(Json::as_bool).collect::<Option<Vec<_>>>().map(Value::Logical),
        Json::Number(_) => items.iter().map(Json::as_f64).collect::<Option<Vec<_>>>().map(Value::Double),
        Json::String(_) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .map(Value::Character),
        _ => None,
    }
}

/// Rows of uniformly keyed objects with scalar cells become a data frame.
fn table_from_array(items: &[serde_json::Value]) -> Option<Value> {
    use serde_json::Value as Json;
    let first = items.first()?.as_object()?;
    let keys: Vec<&String> = first.keys().collect();
    let rows = items
        .iter()
        .map(|item| {
            let row = item.as_object()?;
            (row.len() == keys.len() && keys.iter().all(|k| row.contains_key(*k))).then_some(row)
        })
        .collect::<Option<Vec<_>>>()?;

    let mut columns = Vec::with_capacity(keys.len());
    for key in &keys {
        let cells: Vec<&Json> = rows.iter().filter_map(|row| row.get(*key)).collect();
        let kind = cells.iter().find(|c| !c.is_null());
        let column = match kind {
            None => Value::Logical(vec![false; cells.len()]),
            Some(Json::Number(_)) => Value::Double(
                cells
                    .iter()
                    .map(|c| match c {
                        Json::Null => Some(f64::NAN),
                        other => other.as_f64(),
                    })
                    .collect::<Option<Vec<_>>>()?,
            ),
            Some(Json::Bool(_)) => Value::Logical(
                cells
                    .iter()
                    .map(|c| match c {
                        Json::Null => Some(false),
                        other => other.as_bool(),
                    })
                    .collect::<Option<Vec<_>>>()?,
            ),
            Some(Json::String(_)) => Value::Character(
                cells
                    .iter()
                    .map(|c| match c {
                        Json::Null => Some("NA".to_string()),
                        other => other.as_str().map(str::to_string),
                    })
                    .collect::<Option<Vec<_>>>()?,
            ),
            Some(_) => return None,
        };
        columns.push(((*key).clone(), column));
    }

    let mut list = List::named(columns);
    list.class = vec!["data.frame".into()];
    Some(Value::List(list))
}

fn json_cells(value: &Value) -> Vec<serde_json::Value> {
    use serde_json::Value as Json;
    match value {
        Value::Logical(v) => v.iter().map(|b| Json::Bool(*b)).collect(),
        Value::Double(v) => v
            .iter()
            .map(|n| serde_json::Number::from_f64(*n).map(Json::Number).unwrap_or(Json::Null))
            .collect(),
        Value::Character(v) => v.iter().map(|s| Json::String(s.clone())).collect(),
        _ => Vec::new(),
    }
}

/// Groups statements that share a source line.
/// Deadline `seconds` from now. Non-positive, non-finite and unrepresentable
/// budgets mean no deadline.
fn deadline_after(seconds: f64) -> Option<Instant> {
    if seconds <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds)
        .ok()
        .and_then(|budget| Instant::now().checked_add(budget))
}

fn group_by_line(statements: Vec<Statement>) -> Vec<Vec<Statement>> {
    let mut groups: Vec<Vec<Statement>> = Vec::new();
    for statement in statements {
        match groups.last_mut() {
            Some(group) if group.last().is_some_and(|s| s.last_line >= statement.first_line) => {
                group.push(statement)
            }
            _ => groups.push(vec![statement]),
        }
    }
    groups
}

fn source_text(lines: &[&str], first: usize, last: usize) -> String {
    let end = last.min(lines.len());
    let start = first.saturating_sub(1).min(end);
    let mut text = lines[start..end].join("\n");
    text.push('\n');
    text
}

impl Interpreter for MinirInterpreter {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::R
    }

    fn global_scope(&self) -> ObjectRef {
        ObjectRef(GLOBAL)
    }

    fn create_scope(&mut self, parent: ObjectRef) -> Result<ObjectRef, RuntimeError> {
        let scope = self.env(parent)?.child();
        Ok(self.store(Value::Env(scope)))
    }

    fn release(&mut self, handles: &[ObjectRef]) -> Result<(), RuntimeError> {
        let mut first_error = None;
        for handle in handles {
            let outcome = if handle.0 == GLOBAL {
                Err(RuntimeError::Protected(*handle))
            } else if self.objects.remove(&handle.0).is_none() {
                Err(RuntimeError::AlreadyReleased(*handle))
            } else {
                Ok(())
            };
            if let Err(err) = outcome {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn retain(&mut self, handle: ObjectRef) -> Result<ObjectRef, RuntimeError> {
        let value = self.get(handle)?.clone();
        Ok(self.store(value))
    }

    fn bind(&mut self, scope: ObjectRef, key: &str, value: ObjectRef) -> Result<(), RuntimeError> {
        let env = self.env(scope)?;
        let value = self.get(value)?.clone();
        env.set(key, value);
        Ok(())
    }

    fn lookup(&mut self, scope: ObjectRef, key: &str) -> Result<ObjectRef, RuntimeError> {
        let value = self
            .env(scope)?
            .get(key)
            .ok_or_else(|| RuntimeError::NotFound(key.to_string()))?;
        Ok(self.store(value))
    }

    fn convert_from_host(&mut self, value: &BindValue) -> Result<ObjectRef, RuntimeError> {
        let value = self.from_bind(value)?;
        Ok(self.store(value))
    }

    fn describe(&mut self, handle: ObjectRef) -> Result<NativeValue, RuntimeError> {
        let value = self.get(handle)?.clone();
        Ok(match value {
            Value::Null => NativeValue::Null,
            Value::Logical(values) => NativeValue::Logical { values },
            Value::Double(values) => NativeValue::Double {
                values: values.into_iter().map(|n| n.is_finite().then_some(n)).collect(),
            },
            Value::Character(values) => NativeValue::Character { values },
            Value::Html(html) => NativeValue::Html {
                html: html.html.clone(),
                dependencies: html.dependencies.clone(),
            },
            Value::List(list) if list.is_data_frame() => NativeValue::Table {
                columns: list
                    .names
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .zip(&list.values)
                    .map(|(name, column)| Column { name, values: json_cells(column) })
                    .collect(),
            },
            Value::List(list) => {
                let items = list.values.into_iter().map(|v| self.store(v)).collect();
                NativeValue::List { names: list.names, items }
            }
            Value::Env(env) => {
                let names = env.names();
                let items = names
                    .iter()
                    .map(|name| {
                        let value = env.get_local(name).unwrap_or(Value::Null);
                        self.store(value)
                    })
                    .collect();
                NativeValue::Environment { names, items }
            }
            Value::Closure(_) | Value::Builtin(_) => NativeValue::Function,
            Value::Plot(_) => NativeValue::Plot,
        })
    }

    fn evaluate(
        &mut self,
        scope: ObjectRef,
        code: &str,
        request: &EvalRequest,
    ) -> Result<Capture, RuntimeError> {
        let env = self.env(scope)?;
        let mut capture = Capture::default();

        let statements = match parser::parse_program(code) {
            Ok(statements) => statements,
            Err(e) => {
                let condition = Condition::error(e.to_string(), None);
                if !request.capture_errors {
                    return Err(RuntimeError::User(condition));
                }
                capture.stderr = format!("Error: {}\n", condition.message);
                capture.items.push(CaptureItem::source(format!("{}\n", code.trim_end_matches('\n'))));
                capture.items.push(CaptureItem::Error { condition });
                return Ok(capture);
            }
        };

        self.machine.set_deadline(deadline_after(request.timelimit));
        self.machine.device = Device::default();
        self.machine.take_events();

        let lines: Vec<&str> = code.split('\n').collect();
        'groups: for group in group_by_line(statements) {
            let (first, last) = (group[0].first_line, group[group.len() - 1].last_line);
            capture.items.push(CaptureItem::source(source_text(&lines, first, last)));

            for statement in &group {
                self.machine.visible = true;
                let outcome = match self.machine.eval(&statement.expr, &env) {
                    Err(Flow::Return(value)) => Ok(value),
                    Err(Flow::Break) | Err(Flow::Next) => Err(Condition::error(
                        "no loop for break/next, jumping to top level",
                        None,
                    )),
                    Err(Flow::Error(condition)) => Err(condition),
                    Ok(value) => Ok(value),
                };

                match outcome {
                    Ok(value) => {
                        let visible = self.machine.visible;
                        let asis = matches!(value, Value::Html(_));
                        if visible && !asis {
                            self.machine.emit(print::format_value(&value));
                        }
                        self.flush_events(&mut capture, request);
                        let handle = self.store(value);
                        capture.items.push(CaptureItem::Result { value: handle, visible, asis });
                        capture.value = Some(handle);
                    }
                    Err(condition) => {
                        self.flush_events(&mut capture, request);
                        if !request.capture_errors {
                            self.discard(&capture);
                            self.machine.set_deadline(None);
                            return Err(RuntimeError::User(condition));
                        }
                        match &condition.call {
                            Some(call) => capture
                                .stderr
                                .push_str(&format!("Error in {} : {}\n", call, condition.message)),
                            None => capture.stderr.push_str(&format!("Error: {}\n", condition.message)),
                        }
                        capture.items.push(CaptureItem::Error { condition });
                        if self.machine.timed_out() {
                            break 'groups;
                        }
                    }
                }
            }

            if let Some(plot) = self.machine.device.snapshot() {
                let handle = self.store(Value::Plot(Rc::new(plot)));
                capture.items.push(CaptureItem::Plot { plot: handle });
            }
        }

        self.machine.set_deadline(None);
        Ok(capture)
    }

    fn parse(&mut self, code: &str) -> Result<(), RuntimeError> {
        parser::parse_program(code)
            .map(|_| ())
            .map_err(|e| RuntimeError::Parse(e.to_string()))
    }

    fn replay_plot(&mut self, plot: ObjectRef, size: GraphicsSize) -> Result<Bitmap, RuntimeError> {
        match self.get(plot)? {
            Value::Plot(recorded) => {
                let png = graphics::rasterize(recorded, size.width, size.height)
                    .map_err(RuntimeError::Conversion)?;
                Ok(Bitmap::from_png(size.width, size.height, &png))
            }
            other => Err(RuntimeError::Conversion(format!(
                "object {} is a {}, not a recorded plot",
                plot,
                other.type_name()
            ))),
        }
    }

    fn call(
        &mut self,
        function: ObjectRef,
        args: &[ObjectRef],
        graphics: Option<GraphicsSize>,
    ) -> Result<CallCapture, RuntimeError> {
        let function = self.get(function)?.clone();
        let args = args
            .iter()
            .map(|handle| Ok((None, self.get(*handle)?.clone())))
            .collect::<Result<Vec<_>, RuntimeError>>()?;

        self.machine.set_deadline(Some(Instant::now() + CALL_TIMELIMIT));
        self.machine.device = Device::default();
        self.machine.take_events();
        let outcome = self.machine.apply(&function, args, "FUN(...)");
        self.machine.set_deadline(None);

        let value = match outcome {
            Ok(value) | Err(Flow::Return(value)) => value,
            Err(Flow::Error(condition)) => return Err(RuntimeError::User(condition)),
            Err(Flow::Break) | Err(Flow::Next) => {
                return Err(RuntimeError::User(Condition::error(
                    "no loop for break/next, jumping to top level",
                    None,
                )))
            }
        };

        let stdout = self
            .machine
            .take_events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Text(text) => Some(text),
                _ => None,
            })
            .collect::<String>();

        let mut plots = Vec::new();
        if graphics.is_some() {
            if let Some(plot) = self.machine.device.snapshot() {
                plots.push(self.store(Value::Plot(Rc::new(plot))));
            }
        }
        let value = self.store(value);
        Ok(CallCapture { value, plots, stdout })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(interp: &mut MinirInterpreter, code: &str) -> Capture {
        let global = interp.global_scope();
        interp.evaluate(global, code, &EvalRequest::default()).unwrap()
    }

    fn kinds(capture: &Capture) -> Vec<&'static str> {
        capture
            .items
            .iter()
            .map(|item| match item {
                CaptureItem::Text { .. } => "text",
                CaptureItem::Warning { .. } => "warning",
                CaptureItem::Error { .. } => "error",
                CaptureItem::Message { .. } => "message",
                CaptureItem::Source { .. } => "source",
                CaptureItem::Result { .. } => "result",
                CaptureItem::Plot { .. } => "plot",
            })
            .collect()
    }

    #[test]
    fn assignment_then_autoprint() {
        let mut interp = MinirInterpreter::new();
        let capture = run(&mut interp, "x <- 1 + 1\nx");
        assert_eq!(kinds(&capture), vec!["source", "result", "source", "text", "result"]);
        assert_eq!(capture.stdout, "[1] 2\n");
        match &capture.items[1] {
            CaptureItem::Result { visible, .. } => assert!(!visible),
            other => panic!("unexpected {:?}", other),
        }
        let value = capture.last_value().unwrap();
        assert_eq!(interp.describe(value).unwrap(), NativeValue::Double { values: vec![Some(2.0)] });
    }

    #[test]
    fn expressions_on_one_line_share_a_source_item() {
        let mut interp = MinirInterpreter::new();
        let capture = run(&mut interp, "a <- 1; a + 1");
        assert_eq!(kinds(&capture), vec!["source", "result", "text", "result"]);
        assert_eq!(capture.items[0], CaptureItem::source("a <- 1; a + 1\n"));
    }

    #[test]
    fn errors_are_recorded_and_evaluation_continues() {
        let mut interp = MinirInterpreter::new();
        let capture = run(&mut interp, "stop(\"boom\")\n2");
        assert_eq!(kinds(&capture), vec!["source", "error", "source", "text", "result"]);
        assert_eq!(capture.first_error().unwrap().message, "boom");
    }

    #[test]
    fn errors_abort_when_not_captured() {
        let mut interp = MinirInterpreter::new();
        let global = interp.global_scope();
        let request = EvalRequest { capture_errors: false, ..EvalRequest::default() };
        let err = interp.evaluate(global, "x <- 1\nstop(\"no\")\ny <- 2", &request).unwrap_err();
        assert!(matches!(err, RuntimeError::User(ref c) if c.message == "no"));
        assert!(interp.lookup(global, "y").is_err());
    }

    #[test]
    fn parse_errors_become_error_items() {
        let mut interp = MinirInterpreter::new();
        let capture = run(&mut interp, "f(1,");
        assert_eq!(kinds(&capture), vec!["source", "error"]);
        assert!(capture.first_error().unwrap().message.contains("unexpected end of input"));
    }

    #[test]
    fn warnings_can_be_dropped() {
        let mut interp = MinirInterpreter::new();
        let global = interp.global_scope();
        let request = EvalRequest { keep_warning: false, ..EvalRequest::default() };
        let capture = interp.evaluate(global, "warning(\"w\")", &request).unwrap();
        assert!(!kinds(&capture).contains(&"warning"));
        assert!(capture.stderr.contains("w"));
    }

    #[test]
    fn plots_follow_their_source_group() {
        let mut interp = MinirInterpreter::new();
        let capture = run(&mut interp, "plot(1:5)\nlines(1:5)\ncat(\"done\")");
        assert_eq!(
            kinds(&capture),
            vec!["source", "result", "plot", "source", "result", "plot", "source", "text", "result"]
        );
        let CaptureItem::Plot { plot } = capture.items[5] else { panic!("not a plot") };
        let bitmap = interp.replay_plot(plot, GraphicsSize { width: 100, height: 80 }).unwrap();
        assert_eq!((bitmap.width, bitmap.height), (100, 80));
    }

    #[test]
    fn timelimit_stops_the_remaining_code() {
        let mut interp = MinirInterpreter::new();
        let global = interp.global_scope();
        let request = EvalRequest { timelimit: 0.05, ..EvalRequest::default() };
        let capture = interp.evaluate(global, "while (TRUE) {}\nx <- 1", &request).unwrap();
        assert_eq!(capture.first_error().unwrap().message, "reached elapsed time limit");
        assert_eq!(kinds(&capture), vec!["source", "error"]);
    }

    #[test]
    fn unrepresentable_timelimits_mean_no_deadline() {
        assert!(deadline_after(1e19).is_none());
        assert!(deadline_after(f64::NAN).is_none());
        assert!(deadline_after(0.0).is_none());
        assert!(deadline_after(1.0).is_some());

        let mut interp = MinirInterpreter::new();
        let global = interp.global_scope();
        let request = EvalRequest { timelimit: 1e19, ..EvalRequest::default() };
        let capture = interp.evaluate(global, "1 + 1", &request).unwrap();
        assert_eq!(capture.stdout, "[1] 2\n");
    }

    #[test]
    fn oversized_vectors_are_captured_errors() {
        let mut interp = MinirInterpreter::new();
        let capture = run(&mut interp, "x <- 1:1e18\ny <- rep(1, times = 1e18)\n1 + 1");
        assert_eq!(
            kinds(&capture),
            vec!["source", "error", "source", "error", "source", "text", "result"]
        );
        assert_eq!(capture.first_error().unwrap().message, ops::TOO_LONG);
    }

    #[test]
    fn scopes_inherit_but_do_not_leak() {
        let mut interp = MinirInterpreter::new();
        let global = interp.global_scope();
        run(&mut interp, "base <- 10");
        let child = interp.create_scope(global).unwrap();
        interp
            .evaluate(child, "local <- base + 1", &EvalRequest::default())
            .unwrap();
        assert!(interp.lookup(child, "local").is_ok());
        assert_eq!(interp.lookup(global, "local").unwrap_err(), RuntimeError::NotFound("local".into()));
    }

    #[test]
    fn host_arrays_of_records_become_data_frames() {
        let mut interp = MinirInterpreter::new();
        let handle = interp
            .convert_from_host(&BindValue::Json(json!([{"x": 1, "y": "a"}, {"x": 2, "y": "b"}])))
            .unwrap();
        match interp.describe(handle).unwrap() {
            NativeValue::Table { columns } => {
                assert_eq!(columns[0].name, "x");
                assert_eq!(columns[1].values, vec![json!("a"), json!("b")]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn ragged_arrays_fall_back_to_lists() {
        let mut interp = MinirInterpreter::new();
        let handle = interp
            .convert_from_host(&BindValue::Json(json!([{"x": 1}, {"y": [1, 2]}])))
            .unwrap();
        assert!(matches!(interp.describe(handle).unwrap(), NativeValue::List { ref items, .. } if items.len() == 2));
    }

    #[test]
    fn global_scope_is_protected() {
        let mut interp = MinirInterpreter::new();
        let global = interp.global_scope();
        assert_eq!(interp.release(&[global]).unwrap_err(), RuntimeError::Protected(global));
    }

    #[test]
    fn released_handles_are_gone() {
        let mut interp = MinirInterpreter::new();
        let handle = interp.convert_from_host(&BindValue::from("x")).unwrap();
        interp.release(&[handle]).unwrap();
        assert_eq!(interp.release(&[handle]).unwrap_err(), RuntimeError::AlreadyReleased(handle));
    }

    #[test]
    fn calling_exported_functions_captures_plots() {
        let mut interp = MinirInterpreter::new();
        let global = interp.global_scope();
        run(&mut interp, "draw <- function(n) { plot(1:n); n * 2 }");
        let function = interp.lookup(global, "draw").unwrap();
        let arg = interp.convert_from_host(&BindValue::Json(json!(3))).unwrap();
        let result = interp
            .call(function, &[arg], Some(GraphicsSize { width: 50, height: 50 }))
            .unwrap();
        assert_eq!(result.plots.len(), 1);
        assert_eq!(interp.describe(result.value).unwrap(), NativeValue::Double { values: vec![Some(6.0)] });
    }
}
