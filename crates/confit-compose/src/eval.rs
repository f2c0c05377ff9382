//! The sandboxed expression evaluator.
//!
//! Interpolation expressions are evaluated by a small, closed evaluator:
//! literals, arithmetic, comparisons, boolean operators, string
//! concatenation, indexing/attribute access, list literals and a fixed set
//! of builtin functions, with symbols supplied by the caller's context.
//! This is deliberately not a general-purpose language; anything beyond
//! this surface belongs in the host program. The [`ExprEngine`] trait is
//! the seam a caller can hang a different evaluator on.

use crate::error::{Error, ErrorKind, Result};
use confit_yaml::{Context, Value};

/// The evaluation seam: text plus symbols in, value out.
pub trait ExprEngine: Send + Sync {
    fn eval(&self, expr: &str, symbols: &Context) -> Result<Value>;
}

/// The built-in evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleEngine;

impl ExprEngine for SimpleEngine {
    fn eval(&self, expr: &str, symbols: &Context) -> Result<Value> {
        let tokens = lex(expr)?;
        let mut parser = ExprParser {
            tokens,
            pos: 0,
            source: expr,
        };
        let ast = parser.parse_expr()?;
        parser.expect_eof()?;
        eval_expr(&ast, symbols, expr)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Not,
    AndAnd,
    OrOr,
    Eof,
}

fn lex(expr: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = expr.char_indices().peekable();

    let err = |message: String| Error::evaluation(message);

    while let Some(&(_, c)) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '0'..='9' => {
                let mut number = String::new();
                let mut is_float = false;
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_ascii_digit() {
                        number.push(d);
                        chars.next();
                    } else if d == '.' && !is_float {
                        // lookahead: `1.x` is attribute access, `1.5` a float
                        let mut ahead = chars.clone();
                        ahead.next();
                        match ahead.peek() {
                            Some(&(_, n)) if n.is_ascii_digit() => {
                                is_float = true;
                                number.push(d);
                                chars.next();
                            }
                            _ => break,
                        }
                    } else {
                        break;
                    }
                }
                if is_float {
                    let value = number
                        .parse::<f64>()
                        .map_err(|e| err(format!("bad float literal `{number}`: {e}")))?;
                    tokens.push(Token::Float(value));
                } else {
                    let value = number
                        .parse::<i64>()
                        .map_err(|e| err(format!("bad int literal `{number}`: {e}")))?;
                    tokens.push(Token::Int(value));
                }
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some((_, d)) = chars.next() {
                    if d == '\\' {
                        match chars.next() {
                            Some((_, 'n')) => s.push('\n'),
                            Some((_, 't')) => s.push('\t'),
                            Some((_, other)) => s.push(other),
                            None => break,
                        }
                    } else if d == quote {
                        closed = true;
                        break;
                    } else {
                        s.push(d);
                    }
                }
                if !closed {
                    return Err(err("unterminated string literal".to_string()));
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            _ => {
                chars.next();
                let two = chars.peek().map(|&(_, n)| n);
                let token = match (c, two) {
                    ('=', Some('=')) => {
                        chars.next();
                        Token::EqEq
                    }
                    ('!', Some('=')) => {
                        chars.next();
                        Token::NotEq
                    }
                    ('<', Some('=')) => {
                        chars.next();
                        Token::Le
                    }
                    ('>', Some('=')) => {
                        chars.next();
                        Token::Ge
                    }
                    ('&', Some('&')) => {
                        chars.next();
                        Token::AndAnd
                    }
                    ('|', Some('|')) => {
                        chars.next();
                        Token::OrOr
                    }
                    ('+', _) => Token::Plus,
                    ('-', _) => Token::Minus,
                    ('*', _) => Token::Star,
                    ('/', _) => Token::Slash,
                    ('%', _) => Token::Percent,
                    ('(', _) => Token::LParen,
                    (')', _) => Token::RParen,
                    ('[', _) => Token::LBracket,
                    (']', _) => Token::RBracket,
                    (',', _) => Token::Comma,
                    ('.', _) => Token::Dot,
                    ('<', _) => Token::Lt,
                    ('>', _) => Token::Gt,
                    ('!', _) => Token::Not,
                    (other, _) => {
                        return Err(err(format!("unexpected character `{other}` in expression")))
                    }
                };
                tokens.push(token);
            }
        }
    }
    tokens.push(Token::Eof);
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Lit(Value),
    Var(String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Attr(Box<Expr>, String),
    List(Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

struct ExprParser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'a str,
}

impl<'a> ExprParser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn next(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(Error::evaluation(format!(
                "expected {:?} in `{}`, found {:?}",
                token,
                self.source,
                self.peek()
            )))
        }
    }

    fn expect_eof(&mut self) -> Result<()> {
        self.expect(Token::Eof)
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let right = self.parse_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_cmp()?;
        while self.eat(&Token::AndAnd) {
            let right = self.parse_cmp()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let left = self.parse_add()?;
        let op = match self.peek() {
            Token::EqEq => BinOp::Eq,
            Token::NotEq => BinOp::Ne,
            Token::Lt => BinOp::Lt,
            Token::Le => BinOp::Le,
            Token::Gt => BinOp::Gt,
            Token::Ge => BinOp::Ge,
            _ => return Ok(left),
        };
        self.next();
        let right = self.parse_add()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut left = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.next();
            let right = self.parse_mul()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.next();
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::LBracket) {
                let index = self.parse_expr()?;
                self.expect(Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat(&Token::Dot) {
                match self.next() {
                    Token::Ident(name) => expr = Expr::Attr(Box::new(expr), name),
                    other => {
                        return Err(Error::evaluation(format!(
                            "expected attribute name after `.`, found {other:?}"
                        )))
                    }
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            Token::Int(i) => Ok(Expr::Lit(Value::Int(i))),
            Token::Float(f) => Ok(Expr::Lit(Value::Float(f))),
            Token::Str(s) => Ok(Expr::Lit(Value::String(s))),
            Token::Ident(name) => match name.as_str() {
                "true" | "True" => Ok(Expr::Lit(Value::Bool(true))),
                "false" | "False" => Ok(Expr::Lit(Value::Bool(false))),
                "null" | "None" => Ok(Expr::Lit(Value::Null)),
                _ => {
                    if self.eat(&Token::LParen) {
                        let mut args = Vec::new();
                        if !self.eat(&Token::RParen) {
                            loop {
                                args.push(self.parse_expr()?);
                                if !self.eat(&Token::Comma) {
                                    break;
                                }
                            }
                            self.expect(Token::RParen)?;
                        }
                        Ok(Expr::Call(name, args))
                    } else {
                        Ok(Expr::Var(name))
                    }
                }
            },
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(Token::RBracket)?;
                }
                Ok(Expr::List(items))
            }
            other => Err(Error::evaluation(format!(
                "unexpected token {:?} in `{}`",
                other, self.source
            ))),
        }
    }
}

fn eval_expr(expr: &Expr, symbols: &Context, source: &str) -> Result<Value> {
    match expr {
        Expr::Lit(value) => Ok(value.clone()),
        Expr::Var(name) => symbols.get(name).cloned().ok_or_else(|| {
            Error::new(ErrorKind::UndefinedVariable {
                name: name.clone(),
                expr: source.to_string(),
            })
        }),
        Expr::Neg(inner) => match eval_expr(inner, symbols, source)? {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(Error::evaluation(format!(
                "cannot negate a {}",
                other.type_name()
            ))),
        },
        Expr::Not(inner) => Ok(Value::Bool(!eval_expr(inner, symbols, source)?.is_truthy())),
        Expr::Binary(op, left, right) => {
            if *op == BinOp::And {
                let lhs = eval_expr(left, symbols, source)?;
                if !lhs.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                return Ok(Value::Bool(eval_expr(right, symbols, source)?.is_truthy()));
            }
            if *op == BinOp::Or {
                let lhs = eval_expr(left, symbols, source)?;
                if lhs.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                return Ok(Value::Bool(eval_expr(right, symbols, source)?.is_truthy()));
            }
            let lhs = eval_expr(left, symbols, source)?;
            let rhs = eval_expr(right, symbols, source)?;
            eval_binary(*op, &lhs, &rhs)
        }
        Expr::Call(name, args) => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_expr(arg, symbols, source)?);
            }
            eval_builtin(name, &values)
        }
        Expr::Index(target, index) => {
            let target = eval_expr(target, symbols, source)?;
            let index = eval_expr(index, symbols, source)?;
            match (&target, &index) {
                (Value::Sequence(items), Value::Int(i)) => {
                    let len = items.len() as i64;
                    let idx = if *i < 0 { len + *i } else { *i };
                    items
                        .get(idx.max(0) as usize)
                        .cloned()
                        .ok_or_else(|| Error::evaluation(format!("index {i} out of bounds")))
                }
                (Value::Mapping(map), Value::String(k)) => map
                    .get(k)
                    .cloned()
                    .ok_or_else(|| Error::evaluation(format!("key `{k}` not found"))),
                (Value::String(s), Value::Int(i)) => {
                    let chars: Vec<char> = s.chars().collect();
                    let len = chars.len() as i64;
                    let idx = if *i < 0 { len + *i } else { *i };
                    chars
                        .get(idx.max(0) as usize)
                        .map(|c| Value::String(c.to_string()))
                        .ok_or_else(|| Error::evaluation(format!("index {i} out of bounds")))
                }
                _ => Err(Error::evaluation(format!(
                    "cannot index a {} with a {}",
                    target.type_name(),
                    index.type_name()
                ))),
            }
        }
        Expr::Attr(target, name) => {
            let target = eval_expr(target, symbols, source)?;
            match &target {
                Value::Mapping(map) => map
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::evaluation(format!("key `{name}` not found"))),
                _ => Err(Error::evaluation(format!(
                    "cannot access attribute `{}` of a {}",
                    name,
                    target.type_name()
                ))),
            }
        }
        Expr::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval_expr(item, symbols, source)?);
            }
            Ok(Value::Sequence(values))
        }
    }
}

fn eval_binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    use BinOp::*;
    match op {
        Add => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            (Value::String(a), b) => Ok(Value::String(format!("{a}{}", b.coerce_string()))),
            (a, Value::String(b)) => Ok(Value::String(format!("{}{b}", a.coerce_string()))),
            (Value::Sequence(a), Value::Sequence(b)) => {
                let mut out = a.clone();
                out.extend(b.iter().cloned());
                Ok(Value::Sequence(out))
            }
            (a, b) => numeric_op(a, b, |x, y| x + y),
        },
        Sub => numeric_op_int(lhs, rhs, |a, b| a - b, |a, b| a - b),
        Mul => numeric_op_int(lhs, rhs, |a, b| a * b, |a, b| a * b),
        Div => match (lhs, rhs) {
            (Value::Int(_), Value::Int(0)) => Err(Error::evaluation("division by zero")),
            (Value::Int(a), Value::Int(b)) if a % b == 0 => Ok(Value::Int(a / b)),
            (a, b) => numeric_op(a, b, |x, y| x / y),
        },
        Mod => match (lhs, rhs) {
            (Value::Int(_), Value::Int(0)) => Err(Error::evaluation("modulo by zero")),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a % b)),
            (a, b) => Err(Error::evaluation(format!(
                "cannot apply % to {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        },
        Eq => Ok(Value::Bool(values_equal(lhs, rhs))),
        Ne => Ok(Value::Bool(!values_equal(lhs, rhs))),
        Lt | Le | Gt | Ge => {
            let ordering = compare_values(lhs, rhs)?;
            let result = match op {
                Lt => ordering.is_lt(),
                Le => ordering.is_le(),
                Gt => ordering.is_gt(),
                Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        And | Or => unreachable!("short-circuit ops handled above"),
    }
}

fn numeric_op(lhs: &Value, rhs: &Value, f: impl Fn(f64, f64) -> f64) -> Result<Value> {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => Ok(Value::Float(f(a, b))),
        _ => Err(Error::evaluation(format!(
            "cannot combine {} and {} numerically",
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

fn numeric_op_int(
    lhs: &Value,
    rhs: &Value,
    int_f: impl Fn(i64, i64) -> i64,
    float_f: impl Fn(f64, f64) -> f64,
) -> Result<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_f(*a, *b))),
        (a, b) => numeric_op(a, b, float_f),
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        _ => lhs == rhs,
    }
}

fn compare_values(lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering> {
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).ok_or_else(|| {
                Error::evaluation("cannot order NaN")
            }),
            _ => Err(Error::evaluation(format!(
                "cannot order {} and {}",
                lhs.type_name(),
                rhs.type_name()
            ))),
        },
    }
}

fn eval_builtin(name: &str, args: &[Value]) -> Result<Value> {
    let arity = |n: usize| -> Result<()> {
        if args.len() == n {
            Ok(())
        } else {
            Err(Error::evaluation(format!(
                "{name}() takes {n} argument(s), got {}",
                args.len()
            )))
        }
    };

    match name {
        "range" => {
            let (start, end) = match args {
                [Value::Int(end)] => (0, *end),
                [Value::Int(start), Value::Int(end)] => (*start, *end),
                _ => {
                    return Err(Error::evaluation(
                        "range() takes one or two integer arguments",
                    ))
                }
            };
            Ok(Value::Sequence((start..end).map(Value::Int).collect()))
        }
        "len" => {
            arity(1)?;
            let len = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Sequence(items) => items.len(),
                Value::Mapping(map) => map.len(),
                other => {
                    return Err(Error::evaluation(format!(
                        "len() of a {}",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Int(len as i64))
        }
        "str" => {
            arity(1)?;
            Ok(Value::String(args[0].coerce_string()))
        }
        "int" => {
            arity(1)?;
            match &args[0] {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Float(f) => Ok(Value::Int(*f as i64)),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| Error::evaluation(format!("cannot parse `{s}` as int"))),
                other => Err(Error::evaluation(format!(
                    "int() of a {}",
                    other.type_name()
                ))),
            }
        }
        "float" => {
            arity(1)?;
            match &args[0] {
                Value::Float(f) => Ok(Value::Float(*f)),
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| Error::evaluation(format!("cannot parse `{s}` as float"))),
                other => Err(Error::evaluation(format!(
                    "float() of a {}",
                    other.type_name()
                ))),
            }
        }
        "bool" => {
            arity(1)?;
            Ok(Value::Bool(args[0].is_truthy()))
        }
        "keys" => {
            arity(1)?;
            match &args[0] {
                Value::Mapping(map) => Ok(Value::Sequence(
                    map.keys().map(|k| Value::String(k.clone())).collect(),
                )),
                other => Err(Error::evaluation(format!(
                    "keys() of a {}",
                    other.type_name()
                ))),
            }
        }
        "getenv" => match args {
            [Value::String(name)] => std::env::var(name)
                .map(Value::String)
                .map_err(|_| Error::evaluation(format!("environment variable `{name}` not set"))),
            [Value::String(name), default] => Ok(std::env::var(name)
                .map(Value::String)
                .unwrap_or_else(|_| default.clone())),
            _ => Err(Error::evaluation("getenv() takes a name and optional default")),
        },
        _ => Err(Error::evaluation(format!("unknown function `{name}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn eval(expr: &str) -> Value {
        SimpleEngine.eval(expr, &Context::new()).unwrap()
    }

    fn eval_with(expr: &str, pairs: &[(&str, Value)]) -> Value {
        let symbols: Context = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<IndexMap<_, _>>();
        SimpleEngine.eval(expr, &symbols).unwrap()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 + 2").as_i64(), Some(3));
        assert_eq!(eval("2 * 3 + 4").as_i64(), Some(10));
        assert_eq!(eval("2 + 3 * 4").as_i64(), Some(14));
        assert_eq!(eval("(2 + 3) * 4").as_i64(), Some(20));
        assert_eq!(eval("-5 + 2").as_i64(), Some(-3));
        assert_eq!(eval("7 % 3").as_i64(), Some(1));
        assert_eq!(eval("6 / 2").as_i64(), Some(3));
        assert_eq!(eval("7 / 2").as_f64(), Some(3.5));
    }

    #[test]
    fn test_string_ops() {
        assert_eq!(eval("'a' + 'b'").as_str(), Some("ab"));
        assert_eq!(eval("'n=' + 3").as_str(), Some("n=3"));
        assert_eq!(eval("len('hello')").as_i64(), Some(5));
    }

    #[test]
    fn test_comparisons_and_bools() {
        assert_eq!(eval("1 < 2").as_bool(), Some(true));
        assert_eq!(eval("2 <= 1").as_bool(), Some(false));
        assert_eq!(eval("'a' == 'a'").as_bool(), Some(true));
        assert_eq!(eval("1 == 1.0").as_bool(), Some(true));
        assert_eq!(eval("true && false").as_bool(), Some(false));
        assert_eq!(eval("true || false").as_bool(), Some(true));
        assert_eq!(eval("!false").as_bool(), Some(true));
    }

    #[test]
    fn test_variables() {
        assert_eq!(eval_with("x + 1", &[("x", Value::Int(4))]).as_i64(), Some(5));
    }

    #[test]
    fn test_undefined_variable() {
        let err = SimpleEngine.eval("missing + 1", &Context::new()).unwrap_err();
        assert!(matches!(
            err.kind,
            ErrorKind::UndefinedVariable { ref name, .. } if name == "missing"
        ));
    }

    #[test]
    fn test_indexing_and_attrs() {
        let mut map = IndexMap::new();
        map.insert("inner".to_string(), Value::Int(7));
        let symbols = &[
            ("seq", Value::Sequence(vec![Value::Int(10), Value::Int(20)])),
            ("map", Value::Mapping(map)),
        ];
        assert_eq!(eval_with("seq[1]", symbols).as_i64(), Some(20));
        assert_eq!(eval_with("seq[-1]", symbols).as_i64(), Some(20));
        assert_eq!(eval_with("map['inner']", symbols).as_i64(), Some(7));
        assert_eq!(eval_with("map.inner", symbols).as_i64(), Some(7));
    }

    #[test]
    fn test_builtins() {
        assert_eq!(
            eval("range(3)").as_sequence().unwrap().len(),
            3
        );
        assert_eq!(eval("range(1, 3)").as_sequence().unwrap()[0].as_i64(), Some(1));
        assert_eq!(eval("str(42)").as_str(), Some("42"));
        assert_eq!(eval("int('17')").as_i64(), Some(17));
        assert_eq!(eval("float(1)").as_f64(), Some(1.0));
    }

    #[test]
    fn test_list_literal() {
        let value = eval("[1, 'a', 2 + 3]");
        let items = value.as_sequence().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[2].as_i64(), Some(5));
    }

    #[test]
    fn test_division_by_zero() {
        assert!(SimpleEngine.eval("1 / 0", &Context::new()).is_err());
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        assert!(SimpleEngine.eval("1 + 2 )", &Context::new()).is_err());
    }
}
