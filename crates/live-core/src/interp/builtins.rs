//! Builtin functions.

use std::rc::Rc;

use super::eval::{EvalResult, Event, Flow, Machine};
use super::graphics::{PlotOp, RecordedPlot, Style};
use super::ops::{checked_length, MAX_LENGTH, TOO_LONG};
use super::print::format_value;
use super::value::{Html, List, Value};
use crate::runtime::{Condition, HtmlDependency};

const BUILTINS: &[&str] = &[
    "c", "list", "data.frame", "print", "cat", "paste", "paste0", "length", "sum", "mean", "max",
    "min", "abs", "sqrt", "exp", "log", "round", "floor", "ceiling", "seq_len", "seq", "rep",
    "rev", "nrow", "ncol", "names", "identical", "is.null", "is.function", "is.numeric",
    "is.character", "is.logical", "is.list", "as.numeric", "as.character", "nchar", "toupper",
    "tolower", "invisible", "return", "stop", "warning", "message", "plot", "lines", "points",
    "abline", "html", "html_dependency", "feedback",
];

pub fn lookup(name: &str) -> Option<&'static str> {
    BUILTINS.iter().find(|b| **b == name).copied()
}

/// Evaluated arguments, consumed by name or position.
struct Args {
    items: Vec<(Option<String>, Value)>,
}

impl Args {
    /// Takes an argument supplied by name only.
    fn named(&mut self, name: &str) -> Option<Value> {
        let i = self.items.iter().position(|(n, _)| n.as_deref() == Some(name))?;
        Some(self.items.remove(i).1)
    }

    /// Takes an argument by name, falling back to the next positional one.
    fn arg(&mut self, name: &str) -> Option<Value> {
        if let Some(value) = self.named(name) {
            return Some(value);
        }
        let i = self.items.iter().position(|(n, _)| n.is_none())?;
        Some(self.items.remove(i).1)
    }

    fn values(self) -> Vec<Value> {
        self.items.into_iter().map(|(_, v)| v).collect()
    }
}

struct Ctx<'a> {
    call: &'a str,
}

impl Ctx<'_> {
    fn fail(&self, message: impl Into<String>) -> Flow {
        Flow::Error(Condition::error(message, Some(self.call.to_string())))
    }

    fn missing(&self, arg: &str) -> Flow {
        self.fail(format!("argument \"{}\" is missing, with no default", arg))
    }

    fn numbers(&self, value: &Value) -> Result<Vec<f64>, Flow> {
        value
            .as_doubles()
            .ok_or_else(|| self.fail("non-numeric argument to mathematical function"))
    }

    fn string(&self, value: Option<Value>, arg: &str) -> Result<String, Flow> {
        let value = value.ok_or_else(|| self.missing(arg))?;
        value
            .as_strings()
            .map(|s| s.join(""))
            .ok_or_else(|| self.fail(format!("invalid '{}' argument", arg)))
    }
}

fn strings_of(values: Option<Value>) -> Vec<String> {
    values.and_then(|v| v.as_strings()).unwrap_or_default()
}

pub fn call(machine: &mut Machine, name: &str, args: Vec<(Option<String>, Value)>, call: &str) -> EvalResult {
    let ctx = Ctx { call };
    let mut args = Args { items: args };

    match name {
        "c" => {
            let values = args.values();
            if values.iter().map(Value::len).sum::<usize>() > MAX_LENGTH {
                return Err(ctx.fail(TOO_LONG));
            }
            Ok(combine(values))
        }
        "list" => {
            let named = args.items.iter().any(|(n, _)| n.is_some());
            let names: Vec<String> = args.items.iter().map(|(n, _)| n.clone().unwrap_or_default()).collect();
            let values = args.values();
            Ok(Value::List(List { values, names: named.then_some(names), class: Vec::new() }))
        }
        "data.frame" => data_frame(&ctx, args),
        "print" => {
            let value = args.arg("x").ok_or_else(|| ctx.missing("x"))?;
            machine.emit(format_value(&value));
            machine.visible = false;
            Ok(value)
        }
        "cat" => {
            let sep = args.named("sep").and_then(|s| s.as_string()).unwrap_or_else(|| " ".into());
            let mut parts = Vec::new();
            for (i, value) in args.values().into_iter().enumerate() {
                let strings = value.as_strings().ok_or_else(|| {
                    ctx.fail(format!(
                        "argument {} (type '{}') cannot be handled by 'cat'",
                        i + 1,
                        value.type_name()
                    ))
                })?;
                parts.extend(strings);
            }
            machine.emit(parts.join(&sep));
            machine.visible = false;
            Ok(Value::Null)
        }
        "paste" | "paste0" => {
            let sep = if name == "paste0" {
                String::new()
            } else {
                args.named("sep").and_then(|s| s.as_string()).unwrap_or_else(|| " ".into())
            };
            let collapse = args.named("collapse").and_then(|c| c.as_string());
            let columns: Vec<Vec<String>> = args
                .values()
                .iter()
                .map(|v| v.as_strings().ok_or_else(|| ctx.fail("non-atomic argument to paste")))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .filter(|c| !c.is_empty())
                .collect();
            let len = columns.iter().map(Vec::len).max().unwrap_or(0);
            let joined: Vec<String> = (0..len)
                .map(|i| columns.iter().map(|c| c[i % c.len()].clone()).collect::<Vec<_>>().join(&sep))
                .collect();
            Ok(match collapse {
                Some(collapse) => Value::str(joined.join(&collapse)),
                None => Value::Character(joined),
            })
        }
        "length" => {
            let value = args.arg("x").ok_or_else(|| ctx.missing("x"))?;
            Ok(Value::num(value.len() as f64))
        }
        "sum" => {
            let mut total = 0.0;
            for value in args.values() {
                if matches!(value, Value::Character(_)) {
                    return Err(ctx.fail("invalid 'type' (character) of argument"));
                }
                total += ctx.numbers(&value)?.iter().sum::<f64>();
            }
            Ok(Value::num(total))
        }
        "mean" => {
            let value = args.arg("x").ok_or_else(|| ctx.missing("x"))?;
            match value {
                Value::Double(_) | Value::Logical(_) => {
                    let v = value.as_doubles().unwrap_or_default();
                    Ok(Value::num(v.iter().sum::<f64>() / v.len() as f64))
                }
                _ => {
                    machine.events.push(Event::Warning(Condition::warning(
                        "argument is not numeric or logical: returning NA",
                        Some(call.to_string()),
                    )));
                    Ok(Value::num(f64::NAN))
                }
            }
        }
        "max" | "min" => extremum(machine, &ctx, args.values(), name == "max"),
        "abs" | "sqrt" | "exp" | "log" | "floor" | "ceiling" => {
            let value = args.arg("x").ok_or_else(|| ctx.missing("x"))?;
            if matches!(value, Value::Character(_)) {
                return Err(ctx.fail("non-numeric argument to mathematical function"));
            }
            let numbers = ctx.numbers(&value)?;
            let f: fn(f64) -> f64 = match name {
                "abs" => f64::abs,
                "sqrt" => f64::sqrt,
                "exp" => f64::exp,
                "log" => f64::ln,
                "floor" => f64::floor,
                _ => f64::ceil,
            };
            let out: Vec<f64> = numbers.iter().map(|n| f(*n)).collect();
            if out.iter().zip(&numbers).any(|(o, n)| o.is_nan() && !n.is_nan()) {
                machine.events.push(Event::Warning(Condition::warning("NaNs produced", Some(call.to_string()))));
            }
            Ok(Value::Double(out))
        }
        "round" => {
            let value = args.arg("x").ok_or_else(|| ctx.missing("x"))?;
            let digits = args.arg("digits").and_then(|d| d.as_double()).unwrap_or(0.0);
            let scale = 10f64.powi(digits as i32);
            let numbers = ctx.numbers(&value)?;
            Ok(Value::Double(numbers.iter().map(|n| (n * scale).round_ties_even() / scale).collect()))
        }
        "seq_len" => {
            let n = args.arg("length.out").and_then(|n| n.as_double()).ok_or_else(|| ctx.missing("length.out"))?;
            if n < 0.0 || !n.is_finite() {
                return Err(ctx.fail("argument of length 0"));
            }
            let n = checked_length(n.floor()).map_err(|m| ctx.fail(m))?;
            Ok(Value::Double((1..=n).map(|i| i as f64).collect()))
        }
        "seq" => {
            let from = args.arg("from").and_then(|v| v.as_double()).unwrap_or(1.0);
            let to = args.arg("to").and_then(|v| v.as_double()).unwrap_or(1.0);
            let by = args
                .arg("by")
                .and_then(|v| v.as_double())
                .unwrap_or(if to >= from { 1.0 } else { -1.0 });
            if by == 0.0 || (to - from) * by < 0.0 {
                return Err(ctx.fail("wrong sign in 'by' argument"));
            }
            let count = checked_length(((to - from) / by + 1e-10).floor() + 1.0).map_err(|m| ctx.fail(m))?;
            Ok(Value::Double((0..count).map(|i| from + by * i as f64).collect()))
        }
        "rep" => {
            let value = args.arg("x").ok_or_else(|| ctx.missing("x"))?;
            let each = args.named("each").and_then(|v| v.as_double()).unwrap_or(1.0);
            let times = args.arg("times").and_then(|v| v.as_double()).unwrap_or(1.0);
            if !(each.is_finite() && each >= 0.0) {
                return Err(ctx.fail("invalid 'each' argument"));
            }
            if !(times.is_finite() && times >= 0.0) {
                return Err(ctx.fail("invalid 'times' argument"));
            }
            let (each, times) = (each as usize, times as usize);
            value
                .len()
                .checked_mul(each)
                .and_then(|n| n.checked_mul(times))
                .filter(|n| *n <= MAX_LENGTH)
                .ok_or_else(|| ctx.fail(TOO_LONG))?;
            Ok(repeat(&value, each, times))
        }
        "rev" => {
            let value = args.arg("x").ok_or_else(|| ctx.missing("x"))?;
            let len = value.len();
            let index = Value::Double((1..=len).rev().map(|i| i as f64).collect());
            super::ops::index(&value, &index, false).map_err(|m| ctx.fail(m))
        }
        "nrow" | "ncol" => {
            let value = args.arg("x").ok_or_else(|| ctx.missing("x"))?;
            Ok(match value {
                Value::List(list) if list.is_data_frame() => {
                    let n = if name == "nrow" { list.rows() } else { list.values.len() };
                    Value::num(n as f64)
                }
                _ => Value::Null,
            })
        }
        "names" => {
            let value = args.arg("x").ok_or_else(|| ctx.missing("x"))?;
            Ok(match value {
                Value::List(List { names: Some(names), .. }) => Value::Character(names),
                Value::Env(env) => Value::Character(env.names()),
                _ => Value::Null,
            })
        }
        "identical" => {
            let x = args.arg("x").ok_or_else(|| ctx.missing("x"))?;
            let y = args.arg("y").ok_or_else(|| ctx.missing("y"))?;
            Ok(Value::bool(x == y))
        }
        "is.null" | "is.function" | "is.numeric" | "is.character" | "is.logical" | "is.list" => {
            let value = args.arg("x").ok_or_else(|| ctx.missing("x"))?;
            Ok(Value::bool(match name {
                "is.null" => matches!(value, Value::Null),
                "is.function" => value.is_function(),
                "is.numeric" => matches!(value, Value::Double(_)),
                "is.character" => matches!(value, Value::Character(_)),
                "is.logical" => matches!(value, Value::Logical(_)),
                _ => matches!(value, Value::List(_)),
            }))
        }
        "as.numeric" => {
            let value = args.arg("x").ok_or_else(|| ctx.missing("x"))?;
            match value {
                Value::Character(v) => {
                    let parsed: Vec<f64> = v.iter().map(|s| s.trim().parse().unwrap_or(f64::NAN)).collect();
                    if parsed.iter().zip(&v).any(|(p, s)| p.is_nan() && s != "NaN") {
                        machine.events.push(Event::Warning(Condition::warning(
                            "NAs introduced by coercion",
                            None,
                        )));
                    }
                    Ok(Value::Double(parsed))
                }
                other => other
                    .as_doubles()
                    .map(Value::Double)
                    .ok_or_else(|| ctx.fail(format!("cannot coerce type '{}' to vector of type 'double'", other.type_name()))),
            }
        }
        "as.character" => {
            let value = args.arg("x").ok_or_else(|| ctx.missing("x"))?;
            value
                .as_strings()
                .map(Value::Character)
                .ok_or_else(|| ctx.fail("cannot coerce to character"))
        }
        "nchar" | "toupper" | "tolower" => {
            let value = args.arg("x").ok_or_else(|| ctx.missing("x"))?;
            let strings = value.as_strings().ok_or_else(|| ctx.fail("non-character argument"))?;
            Ok(match name {
                "nchar" => Value::Double(strings.iter().map(|s| s.chars().count() as f64).collect()),
                "toupper" => Value::Character(strings.iter().map(|s| s.to_uppercase()).collect()),
                _ => Value::Character(strings.iter().map(|s| s.to_lowercase()).collect()),
            })
        }
        "invisible" => {
            let value = args.arg("x").unwrap_or(Value::Null);
            machine.visible = false;
            Ok(value)
        }
        "return" => Err(Flow::Return(args.arg("value").unwrap_or(Value::Null))),
        "stop" => {
            let _ = args.named("call.");
            let message = message_text(args);
            Err(Flow::Error(Condition::error(message, machine.current_call())))
        }
        "warning" => {
            let _ = args.named("call.");
            let message = message_text(args);
            machine.events.push(Event::Warning(Condition::warning(message.clone(), machine.current_call())));
            machine.visible = false;
            Ok(Value::str(message))
        }
        "message" => {
            let message = message_text(args);
            machine.events.push(Event::Message(Condition::message(format!("{}\n", message))));
            machine.visible = false;
            Ok(Value::Null)
        }
        "plot" => {
            let style = match args.named("type").and_then(|t| t.as_string()).as_deref() {
                Some("l") => Style::Lines,
                _ => Style::Points,
            };
            let title = args.named("main").and_then(|m| m.as_string());
            let points = coordinates(&ctx, &mut args)?;
            machine.device.start(RecordedPlot::new(&points, style, title));
            machine.visible = false;
            Ok(Value::Null)
        }
        "lines" | "points" => {
            let style = if name == "lines" { Style::Lines } else { Style::Points };
            let points = coordinates(&ctx, &mut args)?;
            machine.device.add(PlotOp::Series { style, points }).map_err(|m| ctx.fail(m))?;
            machine.visible = false;
            Ok(Value::Null)
        }
        "abline" => {
            let mut ops = Vec::new();
            let h = args.named("h");
            let v = args.named("v");
            let a = args.arg("a").and_then(|a| a.as_double());
            let b = args.arg("b").and_then(|b| b.as_double());
            if let Some(a) = a {
                ops.push(PlotOp::ABLine { intercept: a, slope: b.unwrap_or(0.0) });
            }
            ops.extend(h.and_then(|h| h.as_doubles()).unwrap_or_default().into_iter().map(PlotOp::HLine));
            ops.extend(v.and_then(|v| v.as_doubles()).unwrap_or_default().into_iter().map(PlotOp::VLine));
            if ops.is_empty() {
                return Err(ctx.fail("invalid a=, b= specification"));
            }
            for op in ops {
                machine.device.add(op).map_err(|m| ctx.fail(m))?;
            }
            machine.visible = false;
            Ok(Value::Null)
        }
        "html" => {
            let text = ctx.string(args.arg("text"), "text")?;
            let mut dependencies = Vec::new();
            for value in args.values() {
                collect_dependencies(&value, &mut dependencies);
            }
            Ok(Value::Html(Rc::new(Html { html: text, dependencies })))
        }
        "html_dependency" => {
            let name = ctx.string(args.arg("name"), "name")?;
            let version = ctx.string(args.arg("version"), "version")?;
            let mut entries = vec![("name".to_string(), Value::str(name)), ("version".to_string(), Value::str(version))];
            for field in ["src", "script", "stylesheet", "head"] {
                if let Some(value) = args.named(field) {
                    entries.push((field.to_string(), value));
                }
            }
            let mut list = List::named(entries);
            list.class = vec!["html_dependency".into()];
            Ok(Value::List(list))
        }
        "feedback" => {
            let message = ctx.string(args.arg("message"), "message")?;
            let correct = args
                .arg("correct")
                .and_then(|c| c.as_logicals())
                .and_then(|c| c.first().copied())
                .ok_or_else(|| ctx.missing("correct"))?;
            let mut entries = vec![
                ("message".to_string(), Value::str(message)),
                ("correct".to_string(), Value::bool(correct)),
            ];
            for field in ["type", "location"] {
                if let Some(value) = args.arg(field).filter(|v| *v != Value::Null) {
                    entries.push((field.to_string(), value));
                }
            }
            Ok(Value::List(List::named(entries)))
        }
        other => Err(ctx.fail(format!("could not find function \"{}\"", other))),
    }
}

fn message_text(args: Args) -> String {
    args.values()
        .iter()
        .filter_map(|v| v.as_strings())
        .flatten()
        .collect::<Vec<_>>()
        .join("")
}

fn combine(values: Vec<Value>) -> Value {
    let values: Vec<Value> = values.into_iter().filter(|v| *v != Value::Null).collect();
    if values.is_empty() {
        return Value::Null;
    }
    let atomic = values
        .iter()
        .all(|v| matches!(v, Value::Logical(_) | Value::Double(_) | Value::Character(_)));
    if !atomic {
        let mut out = List::default();
        let mut names = Vec::new();
        let mut any_names = false;
        for value in values {
            match value {
                Value::List(list) if !list.is_data_frame() => {
                    let len = list.values.len();
                    any_names |= list.names.is_some();
                    names.extend(list.names.unwrap_or_else(|| vec![String::new(); len]));
                    out.values.extend(list.values);
                }
                Value::Double(v) => {
                    names.extend(std::iter::repeat(String::new()).take(v.len()));
                    out.values.extend(v.into_iter().map(Value::num));
                }
                Value::Character(v) => {
                    names.extend(std::iter::repeat(String::new()).take(v.len()));
                    out.values.extend(v.into_iter().map(Value::str));
                }
                Value::Logical(v) => {
                    names.extend(std::iter::repeat(String::new()).take(v.len()));
                    out.values.extend(v.into_iter().map(Value::bool));
                }
                other => {
                    names.push(String::new());
                    out.values.push(other);
                }
            }
        }
        out.names = any_names.then_some(names);
        return Value::List(out);
    }
    if values.iter().any(|v| matches!(v, Value::Character(_))) {
        Value::Character(values.iter().flat_map(|v| v.as_strings().unwrap_or_default()).collect())
    } else if values.iter().any(|v| matches!(v, Value::Double(_))) {
        Value::Double(values.iter().flat_map(|v| v.as_doubles().unwrap_or_default()).collect())
    } else {
        Value::Logical(values.iter().flat_map(|v| v.as_logicals().unwrap_or_default()).collect())
    }
}

fn data_frame(ctx: &Ctx<'_>, args: Args) -> EvalResult {
    let mut names = Vec::new();
    let mut columns = Vec::new();
    for (i, (name, value)) in args.items.into_iter().enumerate() {
        if !matches!(value, Value::Logical(_) | Value::Double(_) | Value::Character(_)) {
            return Err(ctx.fail(format!(
                "cannot coerce class '\"{}\"' to a data.frame",
                value.type_name()
            )));
        }
        names.push(name.unwrap_or_else(|| format!("V{}", i + 1)));
        columns.push(value);
    }
    let rows = columns.iter().map(Value::len).max().unwrap_or(0);
    let mut out = Vec::with_capacity(columns.len());
    for column in columns {
        let len = column.len();
        if len == rows {
            out.push(column);
        } else if len == 1 {
            out.push(repeat(&column, 1, rows));
        } else {
            return Err(ctx.fail(format!("arguments imply differing number of rows: {}, {}", rows, len)));
        }
    }
    Ok(Value::List(List { values: out, names: Some(names), class: vec!["data.frame".into()] }))
}

fn extremum(machine: &mut Machine, ctx: &Ctx<'_>, values: Vec<Value>, max: bool) -> EvalResult {
    if values.iter().any(|v| matches!(v, Value::Character(_))) {
        let strings: Vec<String> = values.iter().flat_map(|v| v.as_strings().unwrap_or_default()).collect();
        let pick = if max { strings.iter().max() } else { strings.iter().min() };
        return pick
            .map(|s| Value::str(s.clone()))
            .ok_or_else(|| ctx.fail("no non-missing arguments"));
    }
    let mut numbers = Vec::new();
    for value in &values {
        numbers.extend(ctx.numbers(value)?);
    }
    if numbers.is_empty() {
        machine.events.push(Event::Warning(Condition::warning(
            format!(
                "no non-missing arguments to {}; returning {}",
                if max { "max" } else { "min" },
                if max { "-Inf" } else { "Inf" }
            ),
            Some(ctx.call.to_string()),
        )));
        return Ok(Value::num(if max { f64::NEG_INFINITY } else { f64::INFINITY }));
    }
    let fold = if max { f64::max } else { f64::min };
    let start = if max { f64::NEG_INFINITY } else { f64::INFINITY };
    Ok(Value::num(numbers.into_iter().fold(start, fold)))
}

fn repeat(value: &Value, each: usize, times: usize) -> Value {
    fn expand<T: Clone>(v: &[T], each: usize, times: usize) -> Vec<T> {
        let once: Vec<T> = v.iter().flat_map(|x| std::iter::repeat(x.clone()).take(each)).collect();
        (0..times).flat_map(|_| once.clone()).collect()
    }
    match value {
        Value::Logical(v) => Value::Logical(expand(v, each, times)),
        Value::Double(v) => Value::Double(expand(v, each, times)),
        Value::Character(v) => Value::Character(expand(v, each, times)),
        Value::List(list) => Value::List(List {
            values: expand(&list.values, each, times),
            names: list.names.as_ref().map(|n| expand(n, each, times)),
            class: Vec::new(),
        }),
        other => other.clone(),
    }
}

fn coordinates(ctx: &Ctx<'_>, args: &mut Args) -> Result<Vec<(f64, f64)>, Flow> {
    let x = args.arg("x").ok_or_else(|| ctx.missing("x"))?;
    let y = args.arg("y");
    let x = ctx.numbers(&x)?;
    let (x, y) = match y {
        Some(y) => (x, ctx.numbers(&y)?),
        None => ((1..=x.len()).map(|i| i as f64).collect(), x),
    };
    if x.len() != y.len() {
        return Err(ctx.fail("'x' and 'y' lengths differ"));
    }
    Ok(x.into_iter().zip(y).collect())
}

fn collect_dependencies(value: &Value, out: &mut Vec<HtmlDependency>) {
    if let Value::List(list) = value {
        if let Some(dep) = dependency_from_list(list) {
            out.push(dep);
        } else {
            for item in &list.values {
                collect_dependencies(item, out);
            }
        }
    }
}

pub fn dependency_from_list(list: &List) -> Option<HtmlDependency> {
    if !list.inherits("html_dependency") {
        return None;
    }
    let text = |field: &str| list.get(field).and_then(|v| v.as_string());
    Some(HtmlDependency {
        name: text("name")?,
        version: text("version").unwrap_or_default(),
        src: text("src"),
        script: strings_of(list.get("script").cloned()),
        stylesheet: strings_of(list.get("stylesheet").cloned()),
        head: text("head"),
    })
}

/// `names(x) <- value`.
pub fn set_names(target: Value, names: Value) -> Result<Value, String> {
    match target {
        Value::List(mut list) => {
            if names == Value::Null {
                list.names = None;
                return Ok(Value::List(list));
            }
            let mut names = names.as_strings().ok_or("invalid names")?;
            if names.len() > list.values.len() {
                return Err(format!(
                    "'names' attribute [{}] must be the same length as the vector [{}]",
                    names.len(),
                    list.values.len()
                ));
            }
            names.resize(list.values.len(), String::new());
            list.names = Some(names);
            Ok(Value::List(list))
        }
        _ => Err("names can only be set on lists".into()),
    }
}
