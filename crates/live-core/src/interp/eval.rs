//! Tree-walking evaluation.

use std::collections::HashSet;
use std::rc::Rc;
use std::time::Instant;

use super::ast::{deparse, BinOp, Expr, UnOp};
use super::builtins;
use super::graphics::Device;
use super::ops;
use super::value::{Closure, Env, Value};
use crate::runtime::Condition;

const MAX_DEPTH: usize = 256;
/// Nested `eval` frames across all calls.
const MAX_NESTING: usize = 2048;

const TOO_DEEP: &str = "evaluation nested too deeply: infinite recursion / options(expressions=)?";

pub const TIME_LIMIT_MESSAGE: &str = "reached elapsed time limit";

/// Non-local exits.
#[derive(Debug)]
pub enum Flow {
    Error(Condition),
    Break,
    Next,
    Return(Value),
}

pub type EvalResult = Result<Value, Flow>;

/// Side output produced while evaluating, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Text(String),
    Warning(Condition),
    Message(Condition),
}

pub struct Machine {
    pub device: Device,
    pub events: Vec<Event>,
    /// Visibility of the last value produced.
    pub visible: bool,
    deadline: Option<Instant>,
    timed_out: bool,
    calls: Vec<String>,
    nesting: usize,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self {
            device: Device::default(),
            events: Vec::new(),
            visible: true,
            deadline: None,
            timed_out: false,
            calls: Vec::new(),
            nesting: 0,
        }
    }

    /// Arms the time limit for the next top-level run and clears any call
    /// state a previous, aborted run left behind.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
        self.timed_out = false;
        self.calls.clear();
        self.nesting = 0;
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn emit(&mut self, text: impl Into<String>) {
        let text = text.into();
        if let Some(Event::Text(last)) = self.events.last_mut() {
            last.push_str(&text);
        } else {
            self.events.push(Event::Text(text));
        }
    }

    /// Deparsed call of the innermost closure being evaluated.
    pub fn current_call(&self) -> Option<String> {
        self.calls.last().cloned()
    }

    /// An error attributed to the innermost closure call.
    pub fn error(&self, message: impl Into<String>) -> Flow {
        Flow::Error(Condition::error(message, self.current_call()))
    }

    fn error_in(&self, message: impl Into<String>, call: &Expr) -> Flow {
        Flow::Error(Condition::error(message, Some(deparse(call))))
    }

    fn check_deadline(&mut self) -> Result<(), Flow> {
        if let Some(deadline) = self.deadline {
            if self.timed_out || Instant::now() >= deadline {
                self.timed_out = true;
                return Err(Flow::Error(Condition::error(TIME_LIMIT_MESSAGE, None)));
            }
        }
        Ok(())
    }

    pub fn eval(&mut self, expr: &Expr, env: &Env) -> EvalResult {
        if self.nesting >= MAX_NESTING {
            return Err(Flow::Error(Condition::error(TOO_DEEP, self.current_call())));
        }
        self.nesting += 1;
        let result = self.eval_expr(expr, env);
        self.nesting -= 1;
        result
    }

    fn eval_expr(&mut self, expr: &Expr, env: &Env) -> EvalResult {
        self.check_deadline()?;
        self.visible = true;
        match expr {
            Expr::Num(n) => Ok(Value::num(*n)),
            Expr::Str(s) => Ok(Value::str(s.clone())),
            Expr::Bool(b) => Ok(Value::bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Ident(name) => env
                .get(name)
                .or_else(|| builtins::lookup(name).map(Value::Builtin))
                .ok_or_else(|| self.error(format!("object '{}' not found", name))),
            Expr::Paren(inner) => {
                let value = self.eval(inner, env)?;
                self.visible = true;
                Ok(value)
            }
            Expr::Unary { op, expr: inner } => {
                let value = self.eval(inner, env)?;
                self.visible = true;
                match op {
                    UnOp::Not => value
                        .as_logicals()
                        .map(|v| Value::Logical(v.into_iter().map(|b| !b).collect()))
                        .ok_or_else(|| self.error_in("invalid argument type", expr)),
                    UnOp::Neg => value
                        .as_doubles()
                        .filter(|_| !matches!(value, Value::Null))
                        .map(|v| Value::Double(v.into_iter().map(|n| -n).collect()))
                        .ok_or_else(|| self.error_in("invalid argument to unary operator", expr)),
                    UnOp::Plus => value
                        .as_doubles()
                        .map(Value::Double)
                        .ok_or_else(|| self.error_in("invalid argument to unary operator", expr)),
                }
            }
            Expr::Binary { op, lhs, rhs } => self.eval_binary(expr, *op, lhs, rhs, env),
            Expr::Assign { target, value, superassign } => {
                let value = self.eval(value, env)?;
                self.assign(target, value.clone(), env, *superassign)?;
                self.visible = false;
                Ok(value)
            }
            Expr::Call { func, args } => self.eval_call(expr, func, args, env),
            Expr::Index { target, index, double } => {
                let target = self.eval(target, env)?;
                let index = self.eval(index, env)?;
                self.visible = true;
                ops::index(&target, &index, *double).map_err(|m| self.error_in(m, expr))
            }
            Expr::Dollar { target, name } => {
                let target = self.eval(target, env)?;
                self.visible = true;
                ops::dollar(&target, name).map_err(|m| self.error_in(m, expr))
            }
            Expr::Block(exprs) => {
                let mut last = Value::Null;
                for e in exprs {
                    last = self.eval(e, env)?;
                }
                Ok(last)
            }
            Expr::If { cond, then, otherwise } => {
                let test = self.eval(cond, env)?;
                let truth = ops::truthy(&test).map_err(|m| self.error_in(m, expr))?;
                if truth {
                    self.eval(then, env)
                } else if let Some(otherwise) = otherwise {
                    self.eval(otherwise, env)
                } else {
                    self.visible = false;
                    Ok(Value::Null)
                }
            }
            Expr::While { cond, body } => {
                loop {
                    let test = self.eval(cond, env)?;
                    if !ops::truthy(&test).map_err(|m| self.error_in(m, expr))? {
                        break;
                    }
                    if self.run_body(body, env)? {
                        break;
                    }
                }
                self.visible = false;
                Ok(Value::Null)
            }
            Expr::For { var, seq, body } => {
                let seq = self.eval(seq, env)?;
                for item in elements(&seq) {
                    self.check_deadline()?;
                    env.set(var, item);
                    if self.run_body(body, env)? {
                        break;
                    }
                }
                self.visible = false;
                Ok(Value::Null)
            }
            Expr::Repeat(body) => {
                while !self.run_body(body, env)? {}
                self.visible = false;
                Ok(Value::Null)
            }
            Expr::Break => Err(Flow::Break),
            Expr::Next => Err(Flow::Next),
            Expr::Function { params, body } => Ok(Value::Closure(Rc::new(Closure {
                params: params.clone(),
                body: body.clone(),
                env: env.clone(),
            }))),
        }
    }

    /// Runs a loop body. Returns true when the loop should stop.
    fn run_body(&mut self, body: &Expr, env: &Env) -> Result<bool, Flow> {
        self.check_deadline()?;
        match self.eval(body, env) {
            Ok(_) | Err(Flow::Next) => Ok(false),
            Err(Flow::Break) => Ok(true),
            Err(other) => Err(other),
        }
    }

    fn eval_binary(&mut self, expr: &Expr, op: BinOp, lhs: &Expr, rhs: &Expr, env: &Env) -> EvalResult {
        if matches!(op, BinOp::AndAnd | BinOp::OrOr) {
            let left = self.scalar_logical(lhs, env, expr)?;
            let result = match (op, left) {
                (BinOp::AndAnd, false) => false,
                (BinOp::OrOr, true) => true,
                _ => self.scalar_logical(rhs, env, expr)?,
            };
            self.visible = true;
            return Ok(Value::bool(result));
        }

        let a = self.eval(lhs, env)?;
        let b = self.eval(rhs, env)?;
        self.visible = true;
        let result = match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Pow | BinOp::Mod => {
                ops::arithmetic(op, &a, &b)
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                ops::comparison(op, &a, &b)
            }
            BinOp::And | BinOp::AndAnd => ops::logical(BinOp::And, &a, &b),
            BinOp::Or | BinOp::OrOr => ops::logical(BinOp::Or, &a, &b),
            BinOp::Range => ops::range(&a, &b),
        };
        result.map_err(|m| self.error_in(m, expr))
    }

    fn scalar_logical(&mut self, operand: &Expr, env: &Env, expr: &Expr) -> Result<bool, Flow> {
        let value = self.eval(operand, env)?;
        match value.as_logicals() {
            Some(v) if v.len() == 1 => Ok(v[0]),
            Some(v) => Err(self.error_in(format!("'length = {}' in coercion to 'logical(1)'", v.len()), expr)),
            None => Err(self.error_in(
                format!("invalid 'x' type in '{}'", deparse(expr)),
                expr,
            )),
        }
    }

    fn eval_call(&mut self, expr: &Expr, func: &Expr, args: &[super::ast::Arg], env: &Env) -> EvalResult {
        let function = match func {
            Expr::Ident(name) | Expr::Str(name) => env
                .get_function(name)
                .or_else(|| builtins::lookup(name).map(Value::Builtin))
                .ok_or_else(|| self.error(format!("could not find function \"{}\"", name)))?,
            other => self.eval(other, env)?,
        };

        let mut evaluated = Vec::with_capacity(args.len());
        for arg in args {
            evaluated.push((arg.name.clone(), self.eval(&arg.value, env)?));
        }
        self.apply(&function, evaluated, &deparse(expr))
    }

    /// Calls a function value with evaluated arguments.
    pub fn apply(&mut self, function: &Value, args: Vec<(Option<String>, Value)>, call: &str) -> EvalResult {
        match function {
            Value::Builtin(name) => {
                // `return` keeps the visibility of its argument.
                if *name != "return" {
                    self.visible = true;
                }
                builtins::call(self, name, args, call)
            }
            Value::Closure(closure) => self.call_closure(closure, args, call),
            _ => Err(self.error("attempt to apply non-function")),
        }
    }

    fn call_closure(&mut self, closure: &Closure, args: Vec<(Option<String>, Value)>, call: &str) -> EvalResult {
        self.check_deadline()?;
        if self.calls.len() >= MAX_DEPTH {
            return Err(Flow::Error(Condition::error(TOO_DEEP, Some(call.to_string()))));
        }

        let frame = closure.env.child();
        let mut bound = HashSet::new();
        let mut positional = Vec::new();
        for (name, value) in args {
            match name {
                Some(name) => {
                    if !closure.params.iter().any(|p| p.name == name) {
                        return Err(Flow::Error(Condition::error(
                            format!("unused argument ({} = {})", name, value.type_name()),
                            Some(call.to_string()),
                        )));
                    }
                    frame.set(&name, value);
                    bound.insert(name);
                }
                None => positional.push(value),
            }
        }
        let mut positional = positional.into_iter();
        for param in closure.params.iter() {
            if bound.contains(&param.name) {
                continue;
            }
            match positional.next() {
                Some(value) => {
                    frame.set(&param.name, value);
                    bound.insert(param.name.clone());
                }
                None => break,
            }
        }
        if positional.next().is_some() {
            return Err(Flow::Error(Condition::error("unused argument", Some(call.to_string()))));
        }

        self.calls.push(call.to_string());
        let result = self.bind_defaults_and_run(closure, &frame, &bound);
        self.calls.pop();

        match result {
            Err(Flow::Return(value)) => Ok(value),
            Err(Flow::Break) | Err(Flow::Next) => {
                Err(Flow::Error(Condition::error("no loop for break/next, jumping to top level", None)))
            }
            other => other,
        }
    }

    fn bind_defaults_and_run(&mut self, closure: &Closure, frame: &Env, bound: &HashSet<String>) -> EvalResult {
        for param in closure.params.iter() {
            if bound.contains(&param.name) {
                continue;
            }
            if let Some(default) = &param.default {
                let value = self.eval(default, frame)?;
                frame.set(&param.name, value);
            }
        }
        self.eval(&closure.body, frame)
    }

    fn current_value(&mut self, target: &Expr, env: &Env) -> EvalResult {
        match target {
            Expr::Ident(name) | Expr::Str(name) => Ok(env.get(name).unwrap_or(Value::Null)),
            other => self.eval(other, env),
        }
    }

    fn assign(&mut self, target: &Expr, value: Value, env: &Env, superassign: bool) -> Result<(), Flow> {
        match target {
            Expr::Ident(name) | Expr::Str(name) => {
                if superassign {
                    env.set_super(name, value);
                } else {
                    env.set(name, value);
                }
                Ok(())
            }
            Expr::Dollar { target: inner, name } => {
                let current = self.current_value(inner, env)?;
                let updated = ops::set_dollar(current, name, value).map_err(|m| self.error(m))?;
                self.assign(inner, updated, env, superassign)
            }
            Expr::Index { target: inner, index, double } => {
                let current = self.current_value(inner, env)?;
                let index = self.eval(index, env)?;
                let updated = ops::assign_index(current, &index, value, *double).map_err(|m| self.error(m))?;
                self.assign(inner, updated, env, superassign)
            }
            Expr::Call { func, args } if matches!(func.as_ref(), Expr::Ident(f) if f == "names") && args.len() == 1 => {
                let current = self.current_value(&args[0].value, env)?;
                let updated = builtins::set_names(current, value).map_err(|m| self.error(m))?;
                self.assign(&args[0].value, updated, env, superassign)
            }
            _ => Err(self.error("invalid assignment target")),
        }
    }
}

/// Elements iterated over by `for`.
fn elements(seq: &Value) -> Vec<Value> {
    match seq {
        Value::Logical(v) => v.iter().map(|b| Value::bool(*b)).collect(),
        Value::Double(v) => v.iter().map(|n| Value::num(*n)).collect(),
        Value::Character(v) => v.iter().map(|s| Value::str(s.clone())).collect(),
        Value::List(list) => list.values.clone(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::parser::parse_program;

    fn run(src: &str) -> (Result<Value, Flow>, Machine) {
        let mut machine = Machine::new();
        let env = Env::root();
        let mut result = Ok(Value::Null);
        for statement in parse_program(src).unwrap() {
            result = machine.eval(&statement.expr, &env);
            if result.is_err() {
                break;
            }
        }
        (result, machine)
    }

    fn value(src: &str) -> Value {
        match run(src).0 {
            Ok(v) => v,
            Err(flow) => panic!("evaluation failed: {:?}", flow),
        }
    }

    #[test]
    fn closures_capture_their_environment() {
        let src = "make <- function() { n <- 0; function() { n <<- n + 1; n } }\ncounter <- make()\ncounter()\ncounter()";
        assert_eq!(value(src), Value::num(2.0));
    }

    #[test]
    fn defaults_see_earlier_parameters() {
        assert_eq!(value("f <- function(x, y = x * 2) x + y\nf(3)"), Value::num(9.0));
        assert_eq!(value("f <- function(x, y = x * 2) x + y\nf(y = 1, 3)"), Value::num(4.0));
    }

    #[test]
    fn loops_with_break_and_next() {
        let src = "total <- 0\nfor (i in 1:10) { if (i %% 2 == 0) next; if (i > 7) break; total <- total + i }\ntotal";
        assert_eq!(value(src), Value::num(16.0));
    }

    #[test]
    fn assignment_is_invisible() {
        let (result, machine) = run("x <- 5");
        assert_eq!(result.unwrap(), Value::num(5.0));
        assert!(!machine.visible);
    }

    #[test]
    fn missing_object_error_names_the_call() {
        let (result, _) = run("f <- function() y\nf()");
        match result {
            Err(Flow::Error(cnd)) => {
                assert_eq!(cnd.message, "object 'y' not found");
                assert_eq!(cnd.call.as_deref(), Some("f()"));
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn nested_field_assignment() {
        assert_eq!(value("x <- list()\nx$a$b <- 3\nx$a$b"), Value::num(3.0));
    }

    #[test]
    fn deadline_interrupts_infinite_loops() {
        let mut machine = Machine::new();
        machine.set_deadline(Some(Instant::now()));
        let env = Env::root();
        let program = parse_program("while (TRUE) {}").unwrap();
        match machine.eval(&program[0].expr, &env) {
            Err(Flow::Error(cnd)) => assert_eq!(cnd.message, TIME_LIMIT_MESSAGE),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        assert!(machine.timed_out());
    }

    #[test]
    fn runaway_recursion_is_an_error() {
        let message = std::thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(|| match run("f <- function(n) f(n + 1)\nf(1)").0 {
                Err(Flow::Error(cnd)) => Some(cnd.message),
                _ => None,
            })
            .unwrap()
            .join()
            .unwrap();
        assert!(message.unwrap().starts_with("evaluation nested too deeply"));
    }

    // Carries the thread's result back across `join`. The values are plain
    // numbers/strings with no `Rc` shared outside the spawned thread.
    struct SendResult<T>(T);
    unsafe impl<T> Send for SendResult<T> {}

    #[test]
    fn deeply_nested_expressions_are_an_error() {
        let message = std::thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(|| {
                let mut expr = Expr::Num(1.0);
                for _ in 0..10_000 {
                    expr = Expr::Paren(Box::new(expr));
                }
                let mut machine = Machine::new();
                let outcome = match machine.eval(&expr, &Env::root()) {
                    Err(Flow::Error(cnd)) => Some(cnd.message),
                    _ => None,
                };
                // The counter unwinds with the error.
                let after = machine.eval(&Expr::Num(2.0), &Env::root()).ok();
                SendResult((outcome, after))
            })
            .unwrap()
            .join()
            .unwrap()
            .0;
        assert_eq!(message.0.as_deref(), Some(TOO_DEEP));
        assert_eq!(message.1, Some(Value::num(2.0)));
    }
}
