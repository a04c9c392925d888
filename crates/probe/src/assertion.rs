//! Alert assertion expressions.
//!
//! An assertion is a small boolean expression evaluated against a
//! [`ProbeResult`], for example:
//!
//! ```text
//! response.status != 200 or response.time > 2000
//! has(response.body.token) and lowercase(response.headers.content-type) == 'application/json'
//! ```

use crate::types::ProbeResult;
use common::{Error, Result};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Cmp(CmpOp),
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Has,
    Lowercase,
    Uppercase,
    StartsWith,
    EndsWith,
    Includes,
    Size,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "has" => Func::Has,
            "lowercase" => Func::Lowercase,
            "uppercase" => Func::Uppercase,
            "startsWith" => Func::StartsWith,
            "endsWith" => Func::EndsWith,
            "includes" => Func::Includes,
            "size" => Func::Size,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Func::Has | Func::Lowercase | Func::Uppercase | Func::Size => 1,
            Func::StartsWith | Func::EndsWith | Func::Includes => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(Vec<Segment>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

/// A parsed assertion, ready to be evaluated many times.
#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    source: String,
    expr: Expr,
}

impl Assertion {
    /// Parse an assertion expression.
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(Error::assertion("empty assertion"));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(Error::assertion(format!(
                "unexpected token {:?} in '{}'",
                tok, source
            )));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against an arbitrary JSON context.
    pub fn evaluate(&self, context: &Value) -> bool {
        truthy(&eval(&self.expr, context))
    }

    /// Evaluate against a probe result; true means the alert condition holds.
    pub fn matches(&self, result: &ProbeResult) -> bool {
        self.evaluate(&result.assertion_context())
    }
}

impl FromStr for Assertion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Assertion::parse(s)
    }
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '-'
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let (token, width) = match (c, next) {
                    ('=', Some('=')) => (Token::Cmp(CmpOp::Eq), 2),
                    ('!', Some('=')) => (Token::Cmp(CmpOp::Ne), 2),
                    ('<', Some('=')) => (Token::Cmp(CmpOp::Le), 2),
                    ('>', Some('=')) => (Token::Cmp(CmpOp::Ge), 2),
                    ('<', _) => (Token::Cmp(CmpOp::Lt), 1),
                    ('>', _) => (Token::Cmp(CmpOp::Gt), 1),
                    ('!', _) => (Token::Not, 1),
                    _ => {
                        return Err(Error::assertion(format!(
                            "unexpected '=' at position {} in '{}'",
                            i, source
                        )));
                    }
                };
                // Accept JavaScript style strict operators
                let mut width = width;
                if matches!(token, Token::Cmp(CmpOp::Eq) | Token::Cmp(CmpOp::Ne))
                    && chars.get(i + 2) == Some(&'=')
                {
                    width += 1;
                }
                tokens.push(token);
                i += width;
            }
            '&' | '|' => {
                if chars.get(i + 1) != Some(&c) {
                    return Err(Error::assertion(format!(
                        "unexpected '{}' at position {} in '{}'",
                        c, i, source
                    )));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(Error::assertion(format!(
                                "unterminated string in '{}'",
                                source
                            )));
                        }
                        Some('\\') => {
                            if let Some(escaped) = chars.get(i + 1) {
                                value.push(*escaped);
                            }
                            i += 2;
                        }
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                // Only treat '.' as a decimal point when a digit follows
                if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let num = text
                    .parse::<f64>()
                    .map_err(|e| Error::assertion(format!("invalid number '{}': {}", text, e)))?;
                tokens.push(Token::Num(num));
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_continue(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(Error::assertion(format!(
                    "unexpected character '{}' at position {} in '{}'",
                    other, i, source
                )));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(tok) if tok == expected => Ok(()),
            other => Err(Error::assertion(format!(
                "expected {:?}, found {:?}",
                expected, other
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let lhs = self.parse_primary()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.parse_primary()?;
            return Ok(Expr::Compare(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Literal(number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ if self.peek() == Some(&Token::LParen) => self.parse_call(&name),
                _ => self.parse_path(name),
            },
            other => Err(Error::assertion(format!(
                "expected a value, found {:?}",
                other
            ))),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr> {
        let func = Func::from_name(name)
            .ok_or_else(|| Error::assertion(format!("unknown function '{}'", name)))?;
        self.expect(Token::LParen)?;

        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;

        if args.len() != func.arity() {
            return Err(Error::assertion(format!(
                "function '{}' takes {} argument(s), got {}",
                name,
                func.arity(),
                args.len()
            )));
        }
        Ok(Expr::Call(func, args))
    }

    fn parse_path(&mut self, head: String) -> Result<Expr> {
        let mut segments = vec![Segment::Key(head)];
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Ident(key)) => segments.push(Segment::Key(key)),
                        Some(Token::Num(n)) => segments.push(index_segment(n)?),
                        Some(Token::LBracket) => segments.push(self.parse_bracket()?),
                        other => {
                            return Err(Error::assertion(format!(
                                "expected a field name after '.', found {:?}",
                                other
                            )));
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    segments.push(self.parse_bracket()?);
                }
                _ => break,
            }
        }
        Ok(Expr::Path(segments))
    }

    /// Parses the remainder of `[0]` or `["key"]`; the opening bracket is consumed.
    fn parse_bracket(&mut self) -> Result<Segment> {
        let segment = match self.next() {
            Some(Token::Num(n)) => index_segment(n)?,
            Some(Token::Str(s)) => Segment::Key(s),
            other => {
                return Err(Error::assertion(format!(
                    "expected an index or quoted key, found {:?}",
                    other
                )));
            }
        };
        self.expect(Token::RBracket)?;
        Ok(segment)
    }
}

fn index_segment(n: f64) -> Result<Segment> {
    if n < 0.0 || n.fract() != 0.0 {
        return Err(Error::assertion(format!("invalid index {}", n)));
    }
    Ok(Segment::Index(n as usize))
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn resolve<'a>(context: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    let mut current = context;
    for segment in segments {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Index(idx), Value::Array(items)) => items.get(*idx)?,
            (Segment::Index(idx), Value::Object(map)) => map.get(&idx.to_string())?,
            (Segment::Key(key), Value::Array(items)) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            match (as_number(lhs), as_number(rhs)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> bool {
    match op {
        CmpOp::Eq => return loose_eq(lhs, rhs),
        CmpOp::Ne => return !loose_eq(lhs, rhs),
        _ => {}
    }

    let ordering = match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Null, _) | (_, Value::Null) => None,
        _ => match (as_number(lhs), as_number(rhs)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };

    match (op, ordering) {
        (CmpOp::Lt, Some(o)) => o == Ordering::Less,
        (CmpOp::Le, Some(o)) => o != Ordering::Greater,
        (CmpOp::Gt, Some(o)) => o == Ordering::Greater,
        (CmpOp::Ge, Some(o)) => o != Ordering::Less,
        _ => false,
    }
}

fn call(func: Func, args: &[Value]) -> Value {
    match func {
        Func::Has => Value::Bool(!args[0].is_null()),
        Func::Lowercase => as_text(&args[0])
            .map(|s| Value::String(s.to_lowercase()))
            .unwrap_or(Value::Null),
        Func::Uppercase => as_text(&args[0])
            .map(|s| Value::String(s.to_uppercase()))
            .unwrap_or(Value::Null),
        Func::StartsWith => match (as_text(&args[0]), as_text(&args[1])) {
            (Some(s), Some(p)) => Value::Bool(s.starts_with(&p)),
            _ => Value::Bool(false),
        },
        Func::EndsWith => match (as_text(&args[0]), as_text(&args[1])) {
            (Some(s), Some(p)) => Value::Bool(s.ends_with(&p)),
            _ => Value::Bool(false),
        },
        Func::Includes => match &args[0] {
            Value::Array(items) => Value::Bool(items.iter().any(|v| loose_eq(v, &args[1]))),
            other => match (as_text(other), as_text(&args[1])) {
                (Some(s), Some(p)) => Value::Bool(s.contains(&p)),
                _ => Value::Bool(false),
            },
        },
        Func::Size => match &args[0] {
            Value::String(s) => Value::from(s.chars().count()),
            Value::Array(items) => Value::from(items.len()),
            Value::Object(map) => Value::from(map.len()),
            _ => Value::from(0),
        },
    }
}

fn eval(expr: &Expr, context: &Value) -> Value {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Path(segments) => resolve(context, segments).cloned().unwrap_or(Value::Null),
        Expr::Not(inner) => Value::Bool(!truthy(&eval(inner, context))),
        Expr::And(lhs, rhs) => {
            Value::Bool(truthy(&eval(lhs, context)) && truthy(&eval(rhs, context)))
        }
        Expr::Or(lhs, rhs) => {
            Value::Bool(truthy(&eval(lhs, context)) || truthy(&eval(rhs, context)))
        }
        Expr::Compare(op, lhs, rhs) => {
            Value::Bool(compare(*op, &eval(lhs, context), &eval(rhs, context)))
        }
        Expr::Call(func, args) => {
            let values: Vec<Value> = args.iter().map(|a| eval(a, context)).collect();
            call(*func, &values)
        }
    }
}
