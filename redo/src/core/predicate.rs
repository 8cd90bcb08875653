//! Success conditions: a small, closed expression language over one attempt.
//!
//! A condition is parsed once into an [`Expr`] tree and evaluated against each
//! attempt's exit code, stdout, and stderr. The language has literals, the three
//! named fields, comparisons, `contains`/`in`, and `and`/`or`/`not`. There are no
//! variables, calls, or any other way to reach outside the attempt result.
//!
//! ```text
//! exit_code == 0
//! "hello" in stdout
//! exit_code != 0 and not (stderr contains "fatal")
//! ```

use std::fmt;

use thiserror::Error;

use crate::core::lexer::{Spanned, Token, tokenize};

/// Condition used when none is supplied.
pub const DEFAULT_CONDITION: &str = "exit_code == 0";

/// Nesting limit for parentheses and `not` chains.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredicateError {
    #[error("invalid condition at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("condition nests deeper than {} levels", MAX_DEPTH)]
    TooDeep,
    #[error("cannot apply `{op}` to {lhs} and {rhs}")]
    TypeMismatch {
        op: CmpOp,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("`{op}` expects boolean operands, got {found}")]
    NotBoolean { op: &'static str, found: &'static str },
    #[error("condition produced {0}, expected a boolean")]
    NonBooleanResult(&'static str),
    #[error("exit code is unavailable for this attempt")]
    MissingExitCode,
}

/// Named values a condition may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    ExitCode,
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `lhs contains rhs`
    Contains,
    /// `lhs in rhs`, i.e. `rhs contains lhs`
    In,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Contains => "contains",
            CmpOp::In => "in",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Int(i64),
    Text(String),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(Literal),
    Field(Field),
    Not(Box<Expr>),
    /// Operands of a chain of `and`, in source order. Always at least two.
    And(Vec<Expr>),
    /// Operands of a chain of `or`, in source order. Always at least two.
    Or(Vec<Expr>),
    Compare {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// The attempt data a condition is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct Subject<'a> {
    pub exit_code: Option<i64>,
    pub stdout: &'a str,
    pub stderr: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value<'a> {
    Int(i64),
    Text(&'a str),
    Bool(bool),
}

impl Value<'_> {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Text(_) => "text",
            Value::Bool(_) => "boolean",
        }
    }
}

/// A compiled success condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    source: String,
    expr: Expr,
}

impl Predicate {
    /// Parse `source` into a predicate. Fails on any syntax error.
    pub fn parse(source: &str) -> Result<Self, PredicateError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            end: source.len(),
        };
        let expr = parser.expr()?;
        if let Some(extra) = parser.peek() {
            return Err(PredicateError::Syntax {
                offset: extra.offset,
                message: format!("unexpected {}", extra.token.describe()),
            });
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Evaluate against one attempt. Pure: no I/O, no state.
    pub fn evaluate(&self, subject: &Subject<'_>) -> Result<bool, PredicateError> {
        match eval(&self.expr, subject)? {
            Value::Bool(b) => Ok(b),
            other => Err(PredicateError::NonBooleanResult(other.type_name())),
        }
    }
}

impl Default for Predicate {
    fn default() -> Self {
        Self {
            source: DEFAULT_CONDITION.to_string(),
            expr: Expr::Compare {
                op: CmpOp::Eq,
                lhs: Box::new(Expr::Field(Field::ExitCode)),
                rhs: Box::new(Expr::Literal(Literal::Int(0))),
            },
        }
    }
}

fn eval<'a>(expr: &'a Expr, subject: &Subject<'a>) -> Result<Value<'a>, PredicateError> {
    match expr {
        Expr::Literal(Literal::Int(n)) => Ok(Value::Int(*n)),
        Expr::Literal(Literal::Text(s)) => Ok(Value::Text(s.as_str())),
        Expr::Literal(Literal::Bool(b)) => Ok(Value::Bool(*b)),
        Expr::Field(Field::ExitCode) => subject
            .exit_code
            .map(Value::Int)
            .ok_or(PredicateError::MissingExitCode),
        Expr::Field(Field::Stdout) => Ok(Value::Text(subject.stdout)),
        Expr::Field(Field::Stderr) => Ok(Value::Text(subject.stderr)),
        Expr::Not(inner) => Ok(Value::Bool(!as_bool(eval(inner, subject)?, "not")?)),
        Expr::And(terms) => {
            for term in terms {
                if !as_bool(eval(term, subject)?, "and")? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        Expr::Or(terms) => {
            for term in terms {
                if as_bool(eval(term, subject)?, "or")? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Expr::Compare { op, lhs, rhs } => {
            let lhs = eval(lhs, subject)?;
            let rhs = eval(rhs, subject)?;
            compare(*op, lhs, rhs).map(Value::Bool)
        }
    }
}

fn as_bool(value: Value<'_>, op: &'static str) -> Result<bool, PredicateError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(PredicateError::NotBoolean {
            op,
            found: other.type_name(),
        }),
    }
}

fn compare(op: CmpOp, lhs: Value<'_>, rhs: Value<'_>) -> Result<bool, PredicateError> {
    use std::cmp::Ordering;

    let mismatch = |lhs: &Value<'_>, rhs: &Value<'_>| PredicateError::TypeMismatch {
        op,
        lhs: lhs.type_name(),
        rhs: rhs.type_name(),
    };

    let ordering = match (&lhs, &rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) if matches!(op, CmpOp::Eq | CmpOp::Ne) => {
            Some(a.cmp(b))
        }
        _ => None,
    };

    match op {
        CmpOp::Contains | CmpOp::In => {
            let (haystack, needle) = match (&lhs, &rhs, op) {
                (Value::Text(h), Value::Text(n), CmpOp::Contains) => (h, n),
                (Value::Text(n), Value::Text(h), CmpOp::In) => (h, n),
                _ => return Err(mismatch(&lhs, &rhs)),
            };
            Ok(haystack.contains(*needle))
        }
        _ => {
            let ordering = ordering.ok_or_else(|| mismatch(&lhs, &rhs))?;
            Ok(match op {
                CmpOp::Eq => ordering == Ordering::Equal,
                CmpOp::Ne => ordering != Ordering::Equal,
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::Le => ordering != Ordering::Greater,
                CmpOp::Gt => ordering == Ordering::Greater,
                CmpOp::Ge => ordering != Ordering::Less,
                CmpOp::Contains | CmpOp::In => unreachable!("handled above"),
            })
        }
    }
}

/// Recursive-descent parser over the token stream.
struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    /// Offset reported for errors at end of input.
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Spanned> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek().is_some_and(|s| &s.token == token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error_here(&self, message: impl Into<String>) -> PredicateError {
        PredicateError::Syntax {
            offset: self.peek().map_or(self.end, |s| s.offset),
            message: message.into(),
        }
    }

    fn enter(&mut self) -> Result<(), PredicateError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(PredicateError::TooDeep);
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr, PredicateError> {
        self.or()
    }

    // `and`/`or` chains are collected flat so their length never adds nesting;
    // only parentheses and `not` count against MAX_DEPTH.
    fn or(&mut self) -> Result<Expr, PredicateError> {
        let mut terms = vec![self.and()?];
        while self.eat(&Token::Or) {
            terms.push(self.and()?);
        }
        Ok(collapse(terms, Expr::Or))
    }

    fn and(&mut self) -> Result<Expr, PredicateError> {
        let mut terms = vec![self.not()?];
        while self.eat(&Token::And) {
            terms.push(self.not()?);
        }
        Ok(collapse(terms, Expr::And))
    }

    fn not(&mut self) -> Result<Expr, PredicateError> {
        if self.eat(&Token::Not) {
            self.enter()?;
            let inner = self.not()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, PredicateError> {
        let lhs = self.operand()?;
        let Some(op) = self.peek().and_then(|s| cmp_op(&s.token)) else {
            return Ok(lhs);
        };
        self.pos += 1;
        let rhs = self.operand()?;
        Ok(Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn operand(&mut self) -> Result<Expr, PredicateError> {
        let Some(Spanned { token, offset }) = self.next() else {
            return Err(self.error_here("unexpected end of condition"));
        };
        match token {
            Token::Int(n) => Ok(Expr::Literal(Literal::Int(n))),
            Token::Str(s) => Ok(Expr::Literal(Literal::Text(s))),
            Token::LParen => {
                self.enter()?;
                let inner = self.expr()?;
                self.depth -= 1;
                if !self.eat(&Token::RParen) {
                    return Err(self.error_here("expected `)`"));
                }
                Ok(inner)
            }
            Token::Ident(name) => self.named(&name, offset),
            other => Err(PredicateError::Syntax {
                offset,
                message: format!("expected a value, found {}", other.describe()),
            }),
        }
    }

    fn named(&mut self, name: &str, offset: usize) -> Result<Expr, PredicateError> {
        match name {
            "true" => Ok(Expr::Literal(Literal::Bool(true))),
            "false" => Ok(Expr::Literal(Literal::Bool(false))),
            "stdout" => Ok(Expr::Field(Field::Stdout)),
            "stderr" => Ok(Expr::Field(Field::Stderr)),
            "exit_code" | "returncode" => Ok(Expr::Field(Field::ExitCode)),
            // `exit code` written as two words.
            "exit" if self.eat(&Token::Ident("code".to_string())) => {
                Ok(Expr::Field(Field::ExitCode))
            }
            _ => Err(PredicateError::Syntax {
                offset,
                message: format!(
                    "unknown name `{name}` (expected exit_code, stdout, stderr, true, or false)"
                ),
            }),
        }
    }
}

fn collapse(mut terms: Vec<Expr>, chain: fn(Vec<Expr>) -> Expr) -> Expr {
    if terms.len() == 1
        && let Some(only) = terms.pop()
    {
        return only;
    }
    chain(terms)
}

fn cmp_op(token: &Token) -> Option<CmpOp> {
    match token {
        Token::Eq => Some(CmpOp::Eq),
        Token::Ne => Some(CmpOp::Ne),
        Token::Lt => Some(CmpOp::Lt),
        Token::Le => Some(CmpOp::Le),
        Token::Gt => Some(CmpOp::Gt),
        Token::Ge => Some(CmpOp::Ge),
        Token::Ident(word) if word == "contains" => Some(CmpOp::Contains),
        Token::Ident(word) if word == "in" => Some(CmpOp::In),
        _ => None,
    }
}
