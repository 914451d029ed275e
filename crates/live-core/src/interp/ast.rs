use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    AndAnd,
    OrOr,
    Range,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "^",
            BinOp::Mod => "%%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::AndAnd => "&&",
            BinOp::OrOr => "||",
            BinOp::Range => ":",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident(String),
    Unary { op: UnOp, expr: Box<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Assign { target: Box<Expr>, value: Box<Expr>, superassign: bool },
    Call { func: Box<Expr>, args: Vec<Arg> },
    Index { target: Box<Expr>, index: Box<Expr>, double: bool },
    Dollar { target: Box<Expr>, name: String },
    Block(Vec<Expr>),
    Paren(Box<Expr>),
    If { cond: Box<Expr>, then: Box<Expr>, otherwise: Option<Box<Expr>> },
    While { cond: Box<Expr>, body: Box<Expr> },
    For { var: String, seq: Box<Expr>, body: Box<Expr> },
    Repeat(Box<Expr>),
    Break,
    Next,
    Function { params: Rc<Vec<Param>>, body: Rc<Expr> },
}

/// A top-level expression together with the lines it spans.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub expr: Expr,
    pub first_line: usize,
    pub last_line: usize,
}

fn format_number(n: f64) -> String {
    if n.is_infinite() {
        if n > 0.0 { "Inf".into() } else { "-Inf".into() }
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Renders an expression back to source text.
pub fn deparse(expr: &Expr) -> String {
    match expr {
        Expr::Num(n) => format_number(*n),
        Expr::Str(s) => format!("{:?}", s),
        Expr::Bool(true) => "TRUE".into(),
        Expr::Bool(false) => "FALSE".into(),
        Expr::Null => "NULL".into(),
        Expr::Ident(name) => name.clone(),
        Expr::Unary { op, expr } => {
            let sym = match op {
                UnOp::Neg => "-",
                UnOp::Plus => "+",
                UnOp::Not => "!",
            };
            format!("{}{}", sym, deparse(expr))
        }
        Expr::Binary { op: BinOp::Range, lhs, rhs } => {
            format!("{}:{}", deparse(lhs), deparse(rhs))
        }
        Expr::Binary { op, lhs, rhs } => {
            format!("{} {} {}", deparse(lhs), op.symbol(), deparse(rhs))
        }
        Expr::Assign { target, value, superassign } => format!(
            "{} {} {}",
            deparse(target),
            if *superassign { "<<-" } else { "<-" },
            deparse(value)
        ),
        Expr::Call { func, args } => {
            let args: Vec<String> = args
                .iter()
                .map(|arg| match &arg.name {
                    Some(name) => format!("{} = {}", name, deparse(&arg.value)),
                    None => deparse(&arg.value),
                })
                .collect();
            format!("{}({})", deparse(func), args.join(", "))
        }
        Expr::Index { target, index, double: true } => {
            format!("{}[[{}]]", deparse(target), deparse(index))
        }
        Expr::Index { target, index, .. } => format!("{}[{}]", deparse(target), deparse(index)),
        Expr::Dollar { target, name } => format!("{}${}", deparse(target), name),
        Expr::Block(exprs) => {
            if exprs.is_empty() {
                return "{\n}".into();
            }
            let body: Vec<String> = exprs
                .iter()
                .map(|e| {
                    deparse(e)
                        .lines()
                        .map(|line| format!("    {}", line))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .collect();
            format!("{{\n{}\n}}", body.join("\n"))
        }
        Expr::Paren(inner) => format!("({})", deparse(inner)),
        Expr::If { cond, then, otherwise } => match otherwise {
            Some(otherwise) => format!(
                "if ({}) {} else {}",
                deparse(cond),
                deparse(then),
                deparse(otherwise)
            ),
            None => format!("if ({}) {}", deparse(cond), deparse(then)),
        },
        Expr::While { cond, body } => format!("while ({}) {}", deparse(cond), deparse(body)),
        Expr::For { var, seq, body } => {
            format!("for ({} in {}) {}", var, deparse(seq), deparse(body))
        }
        Expr::Repeat(body) => format!("repeat {}", deparse(body)),
        Expr::Break => "break".into(),
        Expr::Next => "next".into(),
        Expr::Function { params, body } => {
            let params: Vec<String> = params
                .iter()
                .map(|p| match &p.default {
                    Some(default) => format!("{} = {}", p.name, deparse(default)),
                    None => p.name.clone(),
                })
                .collect();
            format!("function({}) {}", params.join(", "), deparse(body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deparses_calls_and_operators() {
        let expr = Expr::Call {
            func: Box::new(Expr::Ident("f".into())),
            args: vec![
                Arg { name: None, value: Expr::Binary {
                    op: BinOp::Add,
                    lhs: Box::new(Expr::Ident("x".into())),
                    rhs: Box::new(Expr::Num(1.0)),
                } },
                Arg { name: Some("na.rm".into()), value: Expr::Bool(true) },
            ],
        };
        assert_eq!(deparse(&expr), "f(x + 1, na.rm = TRUE)");
    }

    #[test]
    fn numbers_deparse_without_trailing_zeros() {
        assert_eq!(deparse(&Expr::Num(2.0)), "2");
        assert_eq!(deparse(&Expr::Num(0.5)), "0.5");
    }
}
