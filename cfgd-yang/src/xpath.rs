//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Evaluator for the XPath subset used by `must`, `when` and `leafref`
//! statements: location paths, `not`/`contains`/`starts-with`/`count`/
//! `current`, comparisons, and `and`/`or` chains.
//!
//! The evaluator is schema-agnostic; list-entry expansion and parent
//! steps are delegated to the data-tree through [`XpathContext`].

use std::fmt;

use cfgd_utils::path::Path;

/// Data-tree access needed by the evaluator.
///
/// Paths handed through this trait are data paths: list entries appear as
/// an extra key-value element below the list node, which is why parent
/// navigation is delegated here rather than done textually.
pub trait XpathContext {
    /// Child data nodes of `from` matching `name`, with list entries
    /// expanded (stepping `dataplane` from `/interfaces` yields every
    /// `/interfaces/dataplane/<key>` entry).
    fn step(&self, from: &Path, name: &str) -> Vec<Path>;

    /// XPath parent of a data node (skips the synthetic list level).
    fn parent(&self, of: &Path) -> Option<Path>;

    /// XPath string-value of a data node: leaf value, or concatenated
    /// descendant leaf values for interior nodes.
    fn string_value(&self, path: &Path) -> String;

    fn exists(&self, path: &Path) -> bool;
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Literal(String),
    Nodeset(Vec<Path>),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Error {
    pub message: String,
}

type Result<T> = std::result::Result<T, Error>;

// ===== lexer =====

#[derive(Clone, Debug, PartialEq)]
enum Token {
    LParen,
    RParen,
    Comma,
    Slash,
    Dot,
    DotDot,
    Name(String),
    Literal(String),
    Number(f64),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

fn lex(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '!' => {
                chars.next();
                if chars.next_if_eq(&'=').is_none() {
                    return Err(error("expected '=' after '!'"));
                }
                tokens.push(Token::Ne);
            }
            '<' => {
                chars.next();
                tokens.push(match chars.next_if_eq(&'=') {
                    Some(_) => Token::Le,
                    None => Token::Lt,
                });
            }
            '>' => {
                chars.next();
                tokens.push(match chars.next_if_eq(&'=') {
                    Some(_) => Token::Ge,
                    None => Token::Gt,
                });
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some(c) => literal.push(c),
                        None => return Err(error("unterminated literal")),
                    }
                }
                tokens.push(Token::Literal(literal));
            }
            '.' => {
                chars.next();
                if chars.next_if_eq(&'.').is_some() {
                    tokens.push(Token::DotDot);
                } else {
                    tokens.push(Token::Dot);
                }
            }
            c if c.is_ascii_digit() => {
                let mut number = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        number.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = number
                    .parse()
                    .map_err(|_| error(&format!("bad number '{number}'")))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric()
                        || c == '_'
                        || c == '-'
                        || c == ':'
                    {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match name.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    _ => Token::Name(name),
                });
            }
            c => return Err(error(&format!("unexpected character '{c}'"))),
        }
    }

    Ok(tokens)
}

// ===== parser =====

#[derive(Clone, Debug, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CompareOp, Box<Expr>),
    Call(String, Vec<Expr>),
    Literal(String),
    Number(f64),
    Location(LocationPath),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct LocationPath {
    absolute: bool,
    steps: Vec<PathStep>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum PathStep {
    Current,
    Parent,
    Child(String),
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
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(error(&format!(
                "expected {token:?}, found {other:?}"
            ))),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_compare()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let rhs = self.parse_compare()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_compare(&mut self) -> Result<Expr> {
        let lhs = self.parse_primary()?;
        let op = match self.peek() {
            Some(Token::Eq) => CompareOp::Eq,
            Some(Token::Ne) => CompareOp::Ne,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::Le) => CompareOp::Le,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::Ge) => CompareOp::Ge,
            _ => return Ok(lhs),
        };
        self.next();
        let rhs = self.parse_primary()?;
        Ok(Expr::Compare(Box::new(lhs), op, Box::new(rhs)))
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::LParen) => {
                self.next();
                let expr = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some(Token::Literal(_)) => match self.next() {
                Some(Token::Literal(literal)) => Ok(Expr::Literal(literal)),
                _ => unreachable!(),
            },
            Some(Token::Number(_)) => match self.next() {
                Some(Token::Number(number)) => Ok(Expr::Number(number)),
                _ => unreachable!(),
            },
            Some(Token::Name(_)) => {
                let name = match self.next() {
                    Some(Token::Name(name)) => name,
                    _ => unreachable!(),
                };
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.peek() == Some(&Token::Comma) {
                                self.next();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    // A call followed by '/' begins a location path
                    // (e.g. `current()/../name`).
                    if name == "current" && self.peek() == Some(&Token::Slash)
                    {
                        let mut steps = vec![PathStep::Current];
                        self.parse_steps(&mut steps)?;
                        return Ok(Expr::Location(LocationPath {
                            absolute: false,
                            steps,
                        }));
                    }
                    Ok(Expr::Call(name, args))
                } else {
                    let mut steps = vec![PathStep::Child(name)];
                    self.parse_steps(&mut steps)?;
                    Ok(Expr::Location(LocationPath {
                        absolute: false,
                        steps,
                    }))
                }
            }
            Some(Token::Slash) | Some(Token::Dot) | Some(Token::DotDot) => {
                let absolute = self.peek() == Some(&Token::Slash);
                let mut steps = Vec::new();
                if absolute {
                    self.next();
                    match self.next() {
                        Some(Token::Name(name)) => {
                            steps.push(PathStep::Child(name));
                        }
                        None => {}
                        other => {
                            return Err(error(&format!(
                                "unexpected token {other:?} after '/'"
                            )));
                        }
                    }
                } else {
                    match self.next() {
                        Some(Token::Dot) => steps.push(PathStep::Current),
                        Some(Token::DotDot) => steps.push(PathStep::Parent),
                        _ => unreachable!(),
                    }
                }
                self.parse_steps(&mut steps)?;
                Ok(Expr::Location(LocationPath { absolute, steps }))
            }
            other => Err(error(&format!("unexpected token {other:?}"))),
        }
    }

    fn parse_steps(&mut self, steps: &mut Vec<PathStep>) -> Result<()> {
        while self.peek() == Some(&Token::Slash) {
            self.next();
            match self.next() {
                Some(Token::Name(name)) => steps.push(PathStep::Child(name)),
                Some(Token::Dot) => steps.push(PathStep::Current),
                Some(Token::DotDot) => steps.push(PathStep::Parent),
                other => {
                    return Err(error(&format!(
                        "unexpected token {other:?} in path"
                    )));
                }
            }
        }
        Ok(())
    }
}

// ===== evaluation =====

struct Eval<'a, C: XpathContext + ?Sized> {
    ctx: &'a C,
    current: &'a Path,
}

impl<'a, C: XpathContext + ?Sized> Eval<'a, C> {
    fn eval(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Or(lhs, rhs) => {
                let value = self.boolean(&self.eval(lhs)?)
                    || self.boolean(&self.eval(rhs)?);
                Ok(Value::Bool(value))
            }
            Expr::And(lhs, rhs) => {
                let value = self.boolean(&self.eval(lhs)?)
                    && self.boolean(&self.eval(rhs)?);
                Ok(Value::Bool(value))
            }
            Expr::Compare(lhs, op, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                Ok(Value::Bool(self.compare(&lhs, *op, &rhs)))
            }
            Expr::Literal(literal) => Ok(Value::Literal(literal.clone())),
            Expr::Number(number) => Ok(Value::Number(*number)),
            Expr::Location(location) => {
                Ok(Value::Nodeset(self.select(location)))
            }
            Expr::Call(name, args) => self.call(name, args),
        }
    }

    fn call(&self, name: &str, args: &[Expr]) -> Result<Value> {
        match (name, args.len()) {
            ("not", 1) => {
                let value = self.eval(&args[0])?;
                Ok(Value::Bool(!self.boolean(&value)))
            }
            ("contains", 2) => {
                let haystack = self.string(&self.eval(&args[0])?);
                let needle = self.string(&self.eval(&args[1])?);
                Ok(Value::Bool(haystack.contains(&needle)))
            }
            ("starts-with", 2) => {
                let haystack = self.string(&self.eval(&args[0])?);
                let prefix = self.string(&self.eval(&args[1])?);
                Ok(Value::Bool(haystack.starts_with(&prefix)))
            }
            ("count", 1) => match self.eval(&args[0])? {
                Value::Nodeset(nodes) => {
                    Ok(Value::Number(nodes.len() as f64))
                }
                _ => Err(error("count() requires a node-set")),
            },
            ("string", 1) => {
                let value = self.eval(&args[0])?;
                Ok(Value::Literal(self.string(&value)))
            }
            ("current", 0) => {
                Ok(Value::Nodeset(vec![self.current.clone()]))
            }
            _ => Err(error(&format!(
                "unsupported function {name}() with {} argument(s)",
                args.len()
            ))),
        }
    }

    fn select(&self, location: &LocationPath) -> Vec<Path> {
        let mut nodes = if location.absolute {
            vec![Path::root()]
        } else {
            vec![self.current.clone()]
        };

        for step in &location.steps {
            let mut next = Vec::new();
            for node in &nodes {
                match step {
                    PathStep::Current => next.push(node.clone()),
                    PathStep::Parent => {
                        if let Some(parent) = self.ctx.parent(node) {
                            next.push(parent);
                        }
                    }
                    PathStep::Child(name) => {
                        next.extend(self.ctx.step(node, name));
                    }
                }
            }
            next.dedup();
            nodes = next;
        }

        nodes.retain(|node| self.ctx.exists(node) || node.is_root());
        nodes
    }

    fn boolean(&self, value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Literal(s) => !s.is_empty(),
            Value::Nodeset(nodes) => !nodes.is_empty(),
        }
    }

    fn string(&self, value: &Value) -> String {
        match value {
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Value::Literal(s) => s.clone(),
            Value::Nodeset(nodes) => match nodes.first() {
                Some(node) => self.ctx.string_value(node),
                None => String::new(),
            },
        }
    }

    fn number(&self, value: &Value) -> f64 {
        match value {
            Value::Number(n) => *n,
            other => self.string(other).trim().parse().unwrap_or(f64::NAN),
        }
    }

    fn compare(&self, lhs: &Value, op: CompareOp, rhs: &Value) -> bool {
        // Node-set comparisons hold when any member satisfies the
        // relation, per XPath 1.0.
        if let Value::Nodeset(nodes) = lhs {
            return nodes.iter().any(|node| {
                let value = Value::Literal(self.ctx.string_value(node));
                self.compare(&value, op, rhs)
            });
        }
        if let Value::Nodeset(nodes) = rhs {
            return nodes.iter().any(|node| {
                let value = Value::Literal(self.ctx.string_value(node));
                self.compare(lhs, op, &value)
            });
        }

        match op {
            CompareOp::Eq | CompareOp::Ne => {
                let equal = match (lhs, rhs) {
                    (Value::Number(_), _) | (_, Value::Number(_)) => {
                        self.number(lhs) == self.number(rhs)
                    }
                    (Value::Bool(_), _) | (_, Value::Bool(_)) => {
                        self.boolean(lhs) == self.boolean(rhs)
                    }
                    _ => self.string(lhs) == self.string(rhs),
                };
                (op == CompareOp::Eq) == equal
            }
            CompareOp::Lt => self.number(lhs) < self.number(rhs),
            CompareOp::Le => self.number(lhs) <= self.number(rhs),
            CompareOp::Gt => self.number(lhs) > self.number(rhs),
            CompareOp::Ge => self.number(lhs) >= self.number(rhs),
        }
    }
}

// ===== global functions =====

fn error(message: &str) -> Error {
    Error {
        message: message.to_owned(),
    }
}

fn parse(input: &str) -> Result<Expr> {
    let tokens = lex(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(error("trailing input after expression"));
    }
    Ok(expr)
}

/// Evaluates an expression to a boolean, with `current` as the context
/// node. Used for `must` and `when`.
pub fn eval_boolean<C: XpathContext + ?Sized>(
    input: &str,
    ctx: &C,
    current: &Path,
) -> Result<bool> {
    let expr = parse(input)?;
    let eval = Eval { ctx, current };
    let value = eval.eval(&expr)?;
    Ok(eval.boolean(&value))
}

/// Evaluates a location path to the set of matched data nodes. Used for
/// `leafref` target resolution and completion.
pub fn eval_path<C: XpathContext + ?Sized>(
    input: &str,
    ctx: &C,
    current: &Path,
) -> Result<Vec<Path>> {
    let expr = parse(input)?;
    let eval = Eval { ctx, current };
    match eval.eval(&expr)? {
        Value::Nodeset(nodes) => Ok(nodes),
        _ => Err(error("expression is not a location path")),
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid XPath expression: {}", self.message)
    }
}

impl std::error::Error for Error {}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    // Flat fake data tree: path -> string value. Interior nodes have the
    // concatenation of their descendants as string-value.
    #[derive(Default)]
    struct FakeTree {
        nodes: BTreeMap<String, String>,
    }

    impl FakeTree {
        fn insert(&mut self, path: &str, value: &str) {
            self.nodes.insert(path.to_owned(), value.to_owned());
        }
    }

    impl XpathContext for FakeTree {
        fn step(&self, from: &Path, name: &str) -> Vec<Path> {
            let child = from.join(name);
            if self.exists(&child) {
                vec![child]
            } else {
                Vec::new()
            }
        }

        fn parent(&self, of: &Path) -> Option<Path> {
            if of.is_root() {
                return None;
            }
            Some(of.parent())
        }

        fn string_value(&self, path: &Path) -> String {
            let path_str = path.to_string();
            if let Some(value) = self.nodes.get(&path_str) {
                if !value.is_empty() {
                    return value.clone();
                }
            }
            // Concatenate descendant values.
            self.nodes
                .iter()
                .filter(|(key, _)| key.starts_with(&format!("{path_str}/")))
                .map(|(_, value)| value.as_str())
                .collect()
        }

        fn exists(&self, path: &Path) -> bool {
            let path_str = path.to_string();
            self.nodes.contains_key(&path_str)
                || self
                    .nodes
                    .keys()
                    .any(|key| key.starts_with(&format!("{path_str}/")))
        }
    }

    fn tree() -> FakeTree {
        let mut tree = FakeTree::default();
        tree.insert("/c", "");
        tree.insert("/c/v", "foo");
        tree.insert("/mtu", "1500");
        tree
    }

    #[test]
    fn contains_on_container() {
        let tree = tree();
        let current: Path = "/c".parse().unwrap();
        assert!(
            eval_boolean("contains(., 'foo')", &tree, &current).unwrap()
        );
        assert!(
            !eval_boolean("not(contains(., 'foo'))", &tree, &current)
                .unwrap()
        );
        assert!(
            eval_boolean("not(contains(., 'bar'))", &tree, &current).unwrap()
        );
    }

    #[test]
    fn comparisons() {
        let tree = tree();
        let current: Path = "/mtu".parse().unwrap();
        assert!(eval_boolean(". = 1500", &tree, &current).unwrap());
        assert!(eval_boolean(". >= 68 and . <= 9000", &tree, &current)
            .unwrap());
        assert!(eval_boolean("../c/v = 'foo'", &tree, &current).unwrap());
        assert!(!eval_boolean("/c/v != 'foo'", &tree, &current).unwrap());
    }

    #[test]
    fn paths_and_count() {
        let tree = tree();
        let current: Path = "/c".parse().unwrap();
        assert!(eval_boolean("count(v) = 1", &tree, &current).unwrap());
        assert!(eval_boolean("count(missing) = 0", &tree, &current).unwrap());
        let nodes = eval_path("/c/v", &tree, &current).unwrap();
        assert_eq!(nodes, vec!["/c/v".parse().unwrap()]);
    }
}
