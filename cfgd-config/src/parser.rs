//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Parser for the curly-brace configuration file grammar:
//!
//! ```text
//! interfaces {
//!     dataplane dp0s3 {
//!         mtu 1500
//!     }
//! }
//! /* === vyatta-config-version: "cfgd-system@2024-06-01" === */
//! ```
//!
//! Containers and list entries open brace blocks, leaves are one
//! `name value` per line, block comments annotate the following node, and
//! the final comment carries the schema-revision trailer.

use std::fmt;

use crate::node::Node;

const VERSION_PREFIX: &str = "=== vyatta-config-version: \"";
const VERSION_SUFFIX: &str = "\" ===";

/// A parsed configuration file: the raw data tree plus the
/// schema-revision trailer, if present.
#[derive(Clone, Debug, Default)]
pub struct ConfigFile {
    pub root: Node,
    pub version: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Word(String),
    LBrace,
    RBrace,
    Newline,
    Comment(String),
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

// ===== impl ConfigFile =====

impl ConfigFile {
    /// Formats the trailer comment for the given schema-revision string.
    pub fn version_trailer(version: &str) -> String {
        format!("/* {VERSION_PREFIX}{version}{VERSION_SUFFIX} */")
    }
}

// ===== impl Lexer =====

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Lexer<'a> {
        Lexer {
            chars: input.chars().peekable(),
            line: 1,
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            line: self.line,
            message: message.into(),
        }
    }

    fn next_token(&mut self) -> Result<Option<(usize, Token)>, ParseError> {
        loop {
            let Some(&c) = self.chars.peek() else {
                return Ok(None);
            };
            let line = self.line;
            match c {
                '\n' => {
                    self.chars.next();
                    self.line += 1;
                    return Ok(Some((line, Token::Newline)));
                }
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '{' => {
                    self.chars.next();
                    return Ok(Some((line, Token::LBrace)));
                }
                '}' => {
                    self.chars.next();
                    return Ok(Some((line, Token::RBrace)));
                }
                '/' => {
                    self.chars.next();
                    if self.chars.next_if_eq(&'*').is_none() {
                        return Err(self.error("expected '/*'"));
                    }
                    let mut text = String::new();
                    loop {
                        match self.chars.next() {
                            Some('*') => {
                                if self.chars.next_if_eq(&'/').is_some() {
                                    break;
                                }
                                text.push('*');
                            }
                            Some('\n') => {
                                self.line += 1;
                                text.push('\n');
                            }
                            Some(c) => text.push(c),
                            None => {
                                return Err(
                                    self.error("unterminated comment")
                                );
                            }
                        }
                    }
                    let text = text.trim().to_owned();
                    return Ok(Some((line, Token::Comment(text))));
                }
                '"' => {
                    self.chars.next();
                    let mut word = String::new();
                    loop {
                        match self.chars.next() {
                            Some('"') => break,
                            Some('\\') => match self.chars.next() {
                                Some(c) => word.push(c),
                                None => {
                                    return Err(self
                                        .error("unterminated string"));
                                }
                            },
                            Some('\n') => {
                                self.line += 1;
                                word.push('\n');
                            }
                            Some(c) => word.push(c),
                            None => {
                                return Err(
                                    self.error("unterminated string")
                                );
                            }
                        }
                    }
                    return Ok(Some((line, Token::Word(word))));
                }
                _ => {
                    let mut word = String::new();
                    while let Some(&c) = self.chars.peek() {
                        if c.is_whitespace()
                            || c == '{'
                            || c == '}'
                            || c == '"'
                        {
                            break;
                        }
                        word.push(c);
                        self.chars.next();
                    }
                    return Ok(Some((line, Token::Word(word))));
                }
            }
        }
    }
}

// ===== parser =====

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, token)| token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(line, _)| *line)
            .unwrap_or(1)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, token)| token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            line: self.line(),
            message: message.into(),
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek() == Some(&Token::Newline) {
            self.next();
        }
    }

    /// Parses a statement list into children of `parent`. Returns the
    /// dangling final comment, if any (candidate version trailer).
    fn parse_stmts(
        &mut self,
        parent: &mut Node,
        top: bool,
    ) -> Result<Option<String>, ParseError> {
        let mut comment: Option<String> = None;

        loop {
            self.skip_newlines();
            match self.peek() {
                None => {
                    if !top {
                        return Err(self.error("missing '}'"));
                    }
                    return Ok(comment);
                }
                Some(Token::RBrace) => {
                    if top {
                        return Err(self.error("unbalanced '}'"));
                    }
                    self.next();
                    return Ok(comment);
                }
                Some(Token::Comment(_)) => {
                    if let Some(Token::Comment(text)) = self.next() {
                        comment = Some(text);
                    }
                }
                Some(Token::Word(_)) => {
                    let Some(Token::Word(name)) = self.next() else {
                        unreachable!();
                    };
                    self.parse_stmt_body(parent, name, comment.take())?;
                }
                Some(token) => {
                    return Err(
                        self.error(format!("unexpected token {token:?}"))
                    );
                }
            }
        }
    }

    fn parse_stmt_body(
        &mut self,
        parent: &mut Node,
        name: String,
        comment: Option<String>,
    ) -> Result<(), ParseError> {
        // Optional single argument (list key or leaf value).
        let arg = match self.peek() {
            Some(Token::Word(_)) => match self.next() {
                Some(Token::Word(arg)) => Some(arg),
                _ => unreachable!(),
            },
            _ => None,
        };

        let idx = match parent.child_index(&name) {
            Some(idx) => idx,
            None => {
                parent.push_child(Node::new(&name));
                parent.children().len() - 1
            }
        };
        let node = parent.child_at_mut(idx);
        if comment.is_some() && arg.is_none() {
            node.set_comment(comment.clone());
        }

        let target = match arg {
            Some(arg) => {
                let idx = match node.child_index(&arg) {
                    Some(idx) => idx,
                    None => {
                        node.push_child(Node::new(&arg));
                        node.children().len() - 1
                    }
                };
                let node = node.child_at_mut(idx);
                if comment.is_some() {
                    node.set_comment(comment);
                }
                node
            }
            None => node,
        };

        match self.peek() {
            Some(Token::LBrace) => {
                self.next();
                self.parse_stmts(target, false)?;
            }
            Some(Token::Newline) | Some(Token::RBrace) | None => {}
            Some(token) => {
                return Err(
                    self.error(format!("unexpected token {token:?}"))
                );
            }
        }

        Ok(())
    }
}

// ===== global functions =====

/// Parses configuration file text into a raw (schema-free) data tree.
pub fn parse(input: &str) -> Result<ConfigFile, ParseError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }

    let mut parser = Parser { tokens, pos: 0 };
    let mut root = Node::root();
    let trailing = parser.parse_stmts(&mut root, true)?;

    // The final dangling comment may carry the schema-revision trailer.
    let version = trailing.and_then(|text| {
        let text = text
            .strip_prefix(VERSION_PREFIX)?
            .strip_suffix(VERSION_SUFFIX)?;
        Some(text.to_owned())
    });

    Ok(ConfigFile { root, version })
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;
    use cfgd_utils::path::Path;

    #[test]
    fn parse_basic() {
        let input = "\
interfaces {
    dataplane dp0s3 {
        mtu 1500
        address 192.0.2.1/24
        address 192.0.2.2/24
    }
}
system {
    host-name \"core router\"
}
";
        let file = parse(input).unwrap();
        let mtu: Path = "/interfaces/dataplane/dp0s3/mtu".parse().unwrap();
        assert_eq!(file.root.get(&mtu).unwrap().value(), Some("1500"));

        let addrs: Path =
            "/interfaces/dataplane/dp0s3/address".parse().unwrap();
        let values: Vec<_> =
            file.root.get(&addrs).unwrap().values().collect();
        assert_eq!(values, ["192.0.2.1/24", "192.0.2.2/24"]);

        let host: Path = "/system/host-name".parse().unwrap();
        assert_eq!(file.root.get(&host).unwrap().value(), Some("core router"));
        assert!(file.version.is_none());
    }

    #[test]
    fn parse_version_trailer() {
        let input = "\
system {
    host-name r1
}
/* === vyatta-config-version: \"cfgd-system@2024-06-01:cfgd-if@2024-01-01\" === */
";
        let file = parse(input).unwrap();
        assert_eq!(
            file.version.as_deref(),
            Some("cfgd-system@2024-06-01:cfgd-if@2024-01-01")
        );
    }

    #[test]
    fn parse_comments() {
        let input = "\
/* uplink to core */
interfaces {
    dataplane dp0s3 {
        mtu 1500
    }
}
";
        let file = parse(input).unwrap();
        let iface: Path = "/interfaces".parse().unwrap();
        assert_eq!(
            file.root.get(&iface).unwrap().comment(),
            Some("uplink to core")
        );
    }

    #[test]
    fn parse_errors() {
        assert!(parse("a {\n").is_err());
        assert!(parse("}\n").is_err());
        assert!(parse("a \"unterminated\n").is_err());
    }
}
