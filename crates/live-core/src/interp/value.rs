use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::ast::{Expr, Param};
use super::graphics::RecordedPlot;
use crate::runtime::HtmlDependency;

#[derive(Clone)]
pub struct Closure {
    pub params: Rc<Vec<Param>>,
    pub body: Rc<Expr>,
    pub env: Env,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct List {
    pub values: Vec<Value>,
    pub names: Option<Vec<String>>,
    pub class: Vec<String>,
}

impl List {
    pub fn named(entries: Vec<(String, Value)>) -> Self {
        let (names, values) = entries.into_iter().unzip();
        Self { values, names: Some(names), class: Vec::new() }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        let names = self.names.as_ref()?;
        names.iter().position(|n| n == name).map(|i| &self.values[i])
    }

    pub fn set(&mut self, name: &str, value: Value) {
        let len = self.values.len();
        let names = self.names.get_or_insert_with(|| vec![String::new(); len]);
        match names.iter().position(|n| n == name) {
            Some(i) if value == Value::Null => {
                names.remove(i);
                self.values.remove(i);
            }
            Some(i) => self.values[i] = value,
            None if value == Value::Null => {}
            None => {
                names.push(name.to_string());
                self.values.push(value);
            }
        }
    }

    pub fn inherits(&self, class: &str) -> bool {
        self.class.iter().any(|c| c == class)
    }

    pub fn is_data_frame(&self) -> bool {
        self.inherits("data.frame")
    }

    pub fn rows(&self) -> usize {
        self.values.first().map(Value::len).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Html {
    pub html: String,
    pub dependencies: Vec<HtmlDependency>,
}

#[derive(Clone)]
pub enum Value {
    Null,
    Logical(Vec<bool>),
    Double(Vec<f64>),
    Character(Vec<String>),
    List(List),
    Closure(Rc<Closure>),
    Builtin(&'static str),
    Env(Env),
    Html(Rc<Html>),
    Plot(Rc<RecordedPlot>),
}

impl Value {
    pub fn num(n: f64) -> Self {
        Value::Double(vec![n])
    }

    pub fn str(s: impl Into<String>) -> Self {
        Value::Character(vec![s.into()])
    }

    pub fn bool(b: bool) -> Self {
        Value::Logical(vec![b])
    }

    pub fn len(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Logical(v) => v.len(),
            Value::Double(v) => v.len(),
            Value::Character(v) => v.len(),
            Value::List(list) if list.is_data_frame() => list.values.len(),
            Value::List(list) => list.values.len(),
            Value::Env(env) => env.names().len(),
            _ => 1,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Logical(_) => "logical",
            Value::Double(_) => "double",
            Value::Character(_) => "character",
            Value::List(_) => "list",
            Value::Closure(_) => "closure",
            Value::Builtin(_) => "builtin",
            Value::Env(_) => "environment",
            Value::Html(_) => "html",
            Value::Plot(_) => "recordedplot",
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Closure(_) | Value::Builtin(_))
    }

    /// Numeric view of an atomic vector.
    pub fn as_doubles(&self) -> Option<Vec<f64>> {
        match self {
            Value::Null => Some(Vec::new()),
            Value::Logical(v) => Some(v.iter().map(|b| if *b { 1.0 } else { 0.0 }).collect()),
            Value::Double(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn as_strings(&self) -> Option<Vec<String>> {
        match self {
            Value::Null => Some(Vec::new()),
            Value::Logical(v) => Some(
                v.iter()
                    .map(|b| if *b { "TRUE".to_string() } else { "FALSE".to_string() })
                    .collect(),
            ),
            Value::Double(v) => Some(v.iter().map(|n| super::print::format_double(*n)).collect()),
            Value::Character(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn as_logicals(&self) -> Option<Vec<bool>> {
        match self {
            Value::Logical(v) => Some(v.clone()),
            Value::Double(v) => Some(v.iter().map(|n| *n != 0.0).collect()),
            Value::Character(v) => v
                .iter()
                .map(|s| match s.as_str() {
                    "TRUE" | "true" | "T" => Some(true),
                    "FALSE" | "false" | "F" => Some(false),
                    _ => None,
                })
                .collect(),
            Value::Null => Some(Vec::new()),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        self.as_strings().and_then(|v| v.into_iter().next())
    }

    pub fn as_double(&self) -> Option<f64> {
        self.as_doubles().and_then(|v| v.into_iter().next())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Logical(a), Value::Logical(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
            }
            (Value::Character(a), Value::Character(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Env(a), Value::Env(b)) => a.ptr_eq(b),
            (Value::Html(a), Value::Html(b)) => a == b,
            (Value::Plot(a), Value::Plot(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Logical(v) => f.debug_tuple("Logical").field(v).finish(),
            Value::Double(v) => f.debug_tuple("Double").field(v).finish(),
            Value::Character(v) => f.debug_tuple("Character").field(v).finish(),
            Value::List(list) => f.debug_tuple("List").field(list).finish(),
            Value::Closure(_) => f.write_str("<closure>"),
            Value::Builtin(name) => write!(f, "<builtin {}>", name),
            Value::Env(_) => f.write_str("<environment>"),
            Value::Html(html) => f.debug_tuple("Html").field(&html.html).finish(),
            Value::Plot(_) => f.write_str("<plot>"),
        }
    }
}

struct Frame {
    vars: HashMap<String, Value>,
    parent: Option<Env>,
}

/// A scope: a mutable frame with an optional enclosing scope.
#[derive(Clone)]
pub struct Env(Rc<RefCell<Frame>>);

impl Env {
    pub fn root() -> Self {
        Env(Rc::new(RefCell::new(Frame { vars: HashMap::new(), parent: None })))
    }

    pub fn child(&self) -> Self {
        Env(Rc::new(RefCell::new(Frame { vars: HashMap::new(), parent: Some(self.clone()) })))
    }

    pub fn ptr_eq(&self, other: &Env) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn parent(&self) -> Option<Env> {
        self.0.borrow().parent.clone()
    }

    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.0.borrow().vars.get(name).cloned()
    }

    /// Looks a name up through the chain of enclosing scopes.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut env = Some(self.clone());
        while let Some(current) = env {
            if let Some(value) = current.get_local(name) {
                return Some(value);
            }
            env = current.parent();
        }
        None
    }

    /// Like `get`, skipping bindings that are not functions.
    pub fn get_function(&self, name: &str) -> Option<Value> {
        let mut env = Some(self.clone());
        while let Some(current) = env {
            if let Some(value) = current.get_local(name) {
                if value.is_function() {
                    return Some(value);
                }
            }
            env = current.parent();
        }
        None
    }

    pub fn set(&self, name: &str, value: Value) {
        self.0.borrow_mut().vars.insert(name.to_string(), value);
    }

    /// `<<-`: assigns in the nearest enclosing scope that already binds the
    /// name, otherwise in the outermost scope.
    pub fn set_super(&self, name: &str, value: Value) {
        let mut env = self.parent();
        let mut outermost = self.clone();
        while let Some(current) = env {
            if current.0.borrow().vars.contains_key(name) {
                current.set(name, value);
                return;
            }
            env = current.parent();
            outermost = current;
        }
        outermost.set(name, value);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.borrow().vars.keys().cloned().collect();
        names.sort();
        names
    }
}
