//! Recursive-descent parser for the minir dialect.
//!
//! Operator precedence, loosest first: `=`, `<-`/`<<-`, `||`/`|`,
//! `&&`/`&`, `!`, comparisons, `+`/`-`, `*`/`/`, `%%`, `:`, unary minus,
//! `^`, then postfix calls, indexing and `$`.

use std::rc::Rc;

use super::ast::{Arg, BinOp, Expr, Param, Statement, UnOp};
use super::lexer::{tokenize, Tok, Token};

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<text>:{}:{}: {}", self.line, self.column, self.message)
    }
}

pub fn parse_program(src: &str) -> Result<Vec<Statement>, ParseError> {
    let lines = LineIndex::new(src);
    let tokens = tokenize(src).map_err(|e| {
        let (line, column) = lines.locate(e.offset);
        ParseError { message: e.message, line, column }
    })?;
    let mut parser = Parser { tokens, pos: 0, depth: 0, ignore_newlines: vec![false], lines };
    parser.program()
}

struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(src: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(src.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    /// One-based line and column of a byte offset.
    fn locate(&self, offset: usize) -> (usize, usize) {
        let line = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        (line + 1, offset - self.starts[line] + 1)
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Num(_) | Tok::Inf => "numeric constant".into(),
        Tok::Str(_) => "string constant".into(),
        Tok::Ident(_) => "symbol".into(),
        Tok::Eof => "end of input".into(),
        Tok::Newline => "end of line".into(),
        Tok::True | Tok::False | Tok::Null => "constant".into(),
        Tok::Function => "'function'".into(),
        Tok::If => "'if'".into(),
        Tok::Else => "'else'".into(),
        Tok::While => "'while'".into(),
        Tok::For => "'for'".into(),
        Tok::In => "'in'".into(),
        Tok::Repeat => "'repeat'".into(),
        Tok::Break => "'break'".into(),
        Tok::Next => "'next'".into(),
        Tok::LArrow => "assignment".into(),
        Tok::SuperArrow => "SUPER_ASSIGN".into(),
        Tok::Eq => "'='".into(),
        Tok::EqEq => "'=='".into(),
        Tok::NotEq => "'!='".into(),
        Tok::Lt => "'<'".into(),
        Tok::Le => "'<='".into(),
        Tok::Gt => "'>'".into(),
        Tok::Ge => "'>='".into(),
        Tok::Plus => "'+'".into(),
        Tok::Minus => "'-'".into(),
        Tok::Star => "'*'".into(),
        Tok::Slash => "'/'".into(),
        Tok::Caret => "'^'".into(),
        Tok::Mod => "'%%'".into(),
        Tok::Bang => "'!'".into(),
        Tok::AndAnd => "'&&'".into(),
        Tok::And => "'&'".into(),
        Tok::OrOr => "'||'".into(),
        Tok::Or => "'|'".into(),
        Tok::Colon => "':'".into(),
        Tok::Dollar => "'$'".into(),
        Tok::LParen => "'('".into(),
        Tok::RParen => "')'".into(),
        Tok::LBrace => "'{'".into(),
        Tok::RBrace => "'}'".into(),
        Tok::LBracket => "'['".into(),
        Tok::RBracket => "']'".into(),
        Tok::Comma => "','".into(),
        Tok::Semi => "';'".into(),
    }
}

/// Deepest syntactic nesting accepted. Each level costs a dozen parser
/// frames and, later, several evaluator frames.
const MAX_NESTING: usize = 1024;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    /// Newlines are insignificant inside parentheses and brackets.
    ignore_newlines: Vec<bool>,
    lines: LineIndex,
}

type PResult<T> = Result<T, ParseError>;

impl Parser {
    fn skip_insignificant(&mut self) {
        if self.ignore_newlines.last().copied().unwrap_or(false) {
            while self.tokens[self.pos].tok == Tok::Newline {
                self.pos += 1;
            }
        }
    }

    fn peek(&mut self) -> &Tok {
        self.skip_insignificant();
        &self.tokens[self.pos].tok
    }

    fn peek_at(&mut self, ahead: usize) -> &Tok {
        self.skip_insignificant();
        let idx = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[idx].tok
    }

    fn advance(&mut self) -> Token {
        self.skip_insignificant();
        let token = self.tokens[self.pos].clone();
        if token.tok != Tok::Eof {
            self.pos += 1;
        }
        token
    }

    fn skip_newlines(&mut self) {
        while matches!(self.tokens[self.pos].tok, Tok::Newline) {
            self.pos += 1;
        }
    }

    fn unexpected(&mut self) -> ParseError {
        self.skip_insignificant();
        let token = &self.tokens[self.pos];
        let (line, column) = self.lines.locate(token.start);
        ParseError { message: format!("unexpected {}", describe(&token.tok)), line, column }
    }

    fn unexpected_token(&self, token: &Token) -> ParseError {
        let (line, column) = self.lines.locate(token.start);
        ParseError { message: format!("unexpected {}", describe(&token.tok)), line, column }
    }

    fn expect(&mut self, tok: Tok) -> PResult<()> {
        if *self.peek() == tok {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn line_of(&self, offset: usize) -> usize {
        self.lines.locate(offset).0
    }

    fn program(&mut self) -> PResult<Vec<Statement>> {
        let mut statements = Vec::new();
        loop {
            while matches!(self.tokens[self.pos].tok, Tok::Newline | Tok::Semi) {
                self.pos += 1;
            }
            if self.tokens[self.pos].tok == Tok::Eof {
                return Ok(statements);
            }
            let first_line = self.line_of(self.tokens[self.pos].start);
            let expr = self.expr()?;
            let last = self.tokens[self.pos.saturating_sub(1)].end.saturating_sub(1);
            let last_line = self.line_of(last).max(first_line);
            statements.push(Statement { expr, first_line, last_line });
            match self.tokens[self.pos].tok {
                Tok::Newline | Tok::Semi | Tok::Eof => {}
                _ => return Err(self.unexpected()),
            }
        }
    }

    /// One level deeper into the tree being built. The enclosing `expr`
    /// restores the depth on the way out.
    fn descend(&mut self) -> PResult<()> {
        if self.depth >= MAX_NESTING {
            let (line, column) = self.lines.locate(self.tokens[self.pos].start);
            return Err(ParseError { message: "contextstack overflow".into(), line, column });
        }
        self.depth += 1;
        Ok(())
    }

    fn expr(&mut self) -> PResult<Expr> {
        let depth = self.depth;
        let expr = self.descend().and_then(|_| self.assignment());
        self.depth = depth;
        expr
    }

    fn assignment(&mut self) -> PResult<Expr> {
        let lhs = self.or()?;
        let superassign = match self.peek() {
            Tok::LArrow | Tok::Eq => false,
            Tok::SuperArrow => true,
            _ => return Ok(lhs),
        };
        self.advance();
        self.skip_newlines();
        self.descend()?;
        let value = self.assignment()?;
        Ok(Expr::Assign { target: Box::new(lhs), value: Box::new(value), superassign })
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> PResult<Expr>,
        ops: &[(Tok, BinOp)],
    ) -> PResult<Expr> {
        let mut lhs = next(self)?;
        loop {
            let tok = self.peek().clone();
            let Some((_, op)) = ops.iter().find(|(t, _)| *t == tok) else {
                return Ok(lhs);
            };
            let op = *op;
            self.advance();
            self.skip_newlines();
            self.descend()?;
            let rhs = next(self)?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
    }

    fn or(&mut self) -> PResult<Expr> {
        self.binary_level(Self::and, &[(Tok::OrOr, BinOp::OrOr), (Tok::Or, BinOp::Or)])
    }

    fn and(&mut self) -> PResult<Expr> {
        self.binary_level(Self::not, &[(Tok::AndAnd, BinOp::AndAnd), (Tok::And, BinOp::And)])
    }

    fn not(&mut self) -> PResult<Expr> {
        if *self.peek() == Tok::Bang {
            self.advance();
            self.descend()?;
            let expr = self.not()?;
            return Ok(Expr::Unary { op: UnOp::Not, expr: Box::new(expr) });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PResult<Expr> {
        self.binary_level(
            Self::additive,
            &[
                (Tok::EqEq, BinOp::Eq),
                (Tok::NotEq, BinOp::Ne),
                (Tok::Lt, BinOp::Lt),
                (Tok::Le, BinOp::Le),
                (Tok::Gt, BinOp::Gt),
                (Tok::Ge, BinOp::Ge),
            ],
        )
    }

    fn additive(&mut self) -> PResult<Expr> {
        self.binary_level(
            Self::multiplicative,
            &[(Tok::Plus, BinOp::Add), (Tok::Minus, BinOp::Sub)],
        )
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        self.binary_level(Self::special, &[(Tok::Star, BinOp::Mul), (Tok::Slash, BinOp::Div)])
    }

    fn special(&mut self) -> PResult<Expr> {
        self.binary_level(Self::range, &[(Tok::Mod, BinOp::Mod)])
    }

    fn range(&mut self) -> PResult<Expr> {
        self.binary_level(Self::unary, &[(Tok::Colon, BinOp::Range)])
    }

    fn unary(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Tok::Minus => UnOp::Neg,
            Tok::Plus => UnOp::Plus,
            _ => return self.power(),
        };
        self.advance();
        self.descend()?;
        let expr = self.unary()?;
        Ok(Expr::Unary { op, expr: Box::new(expr) })
    }

    fn power(&mut self) -> PResult<Expr> {
        let base = self.postfix()?;
        if *self.peek() == Tok::Caret {
            self.advance();
            self.skip_newlines();
            self.descend()?;
            let exponent = self.unary()?;
            return Ok(Expr::Binary { op: BinOp::Pow, lhs: Box::new(base), rhs: Box::new(exponent) });
        }
        Ok(base)
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            let tok = self.peek().clone();
            if matches!(tok, Tok::LParen | Tok::LBracket | Tok::Dollar) {
                self.descend()?;
            }
            match tok {
                Tok::LParen => {
                    self.advance();
                    let args = self.args(Tok::RParen)?;
                    expr = Expr::Call { func: Box::new(expr), args };
                }
                Tok::LBracket => {
                    self.advance();
                    let double = self.tokens[self.pos].tok == Tok::LBracket;
                    if double {
                        self.pos += 1;
                    }
                    self.ignore_newlines.push(true);
                    let index = self.expr();
                    let closed = index.and_then(|index| {
                        self.expect(Tok::RBracket)?;
                        if double {
                            self.expect(Tok::RBracket)?;
                        }
                        Ok(index)
                    });
                    self.ignore_newlines.pop();
                    expr = Expr::Index { target: Box::new(expr), index: Box::new(closed?), double };
                }
                Tok::Dollar => {
                    self.advance();
                    let token = self.advance();
                    let name = match token.tok {
                        Tok::Ident(name) | Tok::Str(name) => name,
                        _ => return Err(self.unexpected_token(&token)),
                    };
                    expr = Expr::Dollar { target: Box::new(expr), name };
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Arguments up to the closing token, which is consumed.
    fn args(&mut self, close: Tok) -> PResult<Vec<Arg>> {
        self.ignore_newlines.push(true);
        let result = self.args_inner(close);
        self.ignore_newlines.pop();
        result
    }

    fn args_inner(&mut self, close: Tok) -> PResult<Vec<Arg>> {
        let mut args = Vec::new();
        if *self.peek() == close {
            self.advance();
            return Ok(args);
        }
        loop {
            let named = matches!(self.peek(), Tok::Ident(_) | Tok::Str(_))
                && *self.peek_at(1) == Tok::Eq;
            let name = if named {
                match self.advance().tok {
                    Tok::Ident(name) | Tok::Str(name) => {
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                }
            } else {
                None
            };
            let value = self.or()?;
            args.push(Arg { name, value });
            match self.peek().clone() {
                Tok::Comma => {
                    self.advance();
                }
                tok if tok == close => {
                    self.advance();
                    return Ok(args);
                }
                _ => return Err(self.unexpected()),
            }
        }
    }

    fn parenthesized(&mut self) -> PResult<Expr> {
        self.expect(Tok::LParen)?;
        self.ignore_newlines.push(true);
        let inner = self.expr().and_then(|e| {
            self.expect(Tok::RParen)?;
            Ok(e)
        });
        self.ignore_newlines.pop();
        inner
    }

    fn primary(&mut self) -> PResult<Expr> {
        let token = self.advance();
        let expr = match token.tok.clone() {
            Tok::Num(n) => Expr::Num(n),
            Tok::Inf => Expr::Num(f64::INFINITY),
            Tok::Str(s) => Expr::Str(s),
            Tok::True => Expr::Bool(true),
            Tok::False => Expr::Bool(false),
            Tok::Null => Expr::Null,
            Tok::Ident(name) => Expr::Ident(name),
            Tok::LParen => {
                self.ignore_newlines.push(true);
                let inner = self.expr().and_then(|e| {
                    self.expect(Tok::RParen)?;
                    Ok(e)
                });
                self.ignore_newlines.pop();
                Expr::Paren(Box::new(inner?))
            }
            Tok::LBrace => self.block()?,
            Tok::If => {
                let cond = self.parenthesized()?;
                self.skip_newlines();
                let then = self.expr()?;
                let otherwise = self.else_branch()?;
                Expr::If { cond: Box::new(cond), then: Box::new(then), otherwise }
            }
            Tok::While => {
                let cond = self.parenthesized()?;
                self.skip_newlines();
                let body = self.expr()?;
                Expr::While { cond: Box::new(cond), body: Box::new(body) }
            }
            Tok::For => {
                self.expect(Tok::LParen)?;
                self.ignore_newlines.push(true);
                let header = self.for_header();
                self.ignore_newlines.pop();
                let (var, seq) = header?;
                self.skip_newlines();
                let body = self.expr()?;
                Expr::For { var, seq: Box::new(seq), body: Box::new(body) }
            }
            Tok::Repeat => {
                self.skip_newlines();
                Expr::Repeat(Box::new(self.expr()?))
            }
            Tok::Break => Expr::Break,
            Tok::Next => Expr::Next,
            Tok::Function => {
                self.expect(Tok::LParen)?;
                self.ignore_newlines.push(true);
                let params = self.params();
                self.ignore_newlines.pop();
                let params = params?;
                self.skip_newlines();
                let body = self.expr()?;
                Expr::Function { params: Rc::new(params), body: Rc::new(body) }
            }
            _ => return Err(self.unexpected_token(&token)),
        };
        Ok(expr)
    }

    fn else_branch(&mut self) -> PResult<Option<Box<Expr>>> {
        let saved = self.pos;
        // Inside braces an `else` may start a new line.
        if self.ignore_newlines.len() > 1 {
            self.skip_newlines();
        }
        if *self.peek() == Tok::Else {
            self.advance();
            self.skip_newlines();
            return Ok(Some(Box::new(self.expr()?)));
        }
        self.pos = saved;
        Ok(None)
    }

    fn for_header(&mut self) -> PResult<(String, Expr)> {
        let token = self.advance();
        let var = match token.tok {
            Tok::Ident(ref name) => name.clone(),
            _ => return Err(self.unexpected_token(&token)),
        };
        self.expect(Tok::In)?;
        let seq = self.expr()?;
        self.expect(Tok::RParen)?;
        Ok((var, seq))
    }

    fn params(&mut self) -> PResult<Vec<Param>> {
        let mut params = Vec::new();
        if *self.peek() == Tok::RParen {
            self.advance();
            return Ok(params);
        }
        loop {
            let token = self.advance();
            let name = match token.tok {
                Tok::Ident(ref name) => name.clone(),
                _ => return Err(self.unexpected_token(&token)),
            };
            let default = if *self.peek() == Tok::Eq {
                self.advance();
                Some(self.or()?)
            } else {
                None
            };
            params.push(Param { name, default });
            let token = self.advance();
            match token.tok {
                Tok::Comma => continue,
                Tok::RParen => return Ok(params),
                _ => return Err(self.unexpected_token(&token)),
            }
        }
    }

    /// Body of a `{ ... }` block; the opening brace is already consumed.
    fn block(&mut self) -> PResult<Expr> {
        self.ignore_newlines.push(false);
        let result = self.block_inner();
        self.ignore_newlines.pop();
        result
    }

    fn block_inner(&mut self) -> PResult<Expr> {
        let mut exprs = Vec::new();
        loop {
            while matches!(self.tokens[self.pos].tok, Tok::Newline | Tok::Semi) {
                self.pos += 1;
            }
            if self.tokens[self.pos].tok == Tok::RBrace {
                self.pos += 1;
                return Ok(Expr::Block(exprs));
            }
            exprs.push(self.expr()?);
            match self.tokens[self.pos].tok {
                Tok::Newline | Tok::Semi | Tok::RBrace => {}
                _ => return Err(self.unexpected()),
            }
        }
    }
}
