// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! The agent filter DSL.
//!
//! ```text
//! FILTER    <- Expr EOF
//! Expr      <- factor (WSP 'or' WSP factor)*
//! factor    <- primary (WSP 'and' WSP primary)*
//! primary   <- label / agent / '(' WS Expr WS ')' / 'not' WSP primary
//! agent     <- [Aa] '@' regex
//! label     <- [Ll] '@' ident ':' ident
//! ```
//!
//! Keywords are case-insensitive; `and` binds tighter than `or`, `not`
//! tightest; the regex of an agent term runs to the next whitespace with
//! parens balanced. No partial expression is accepted.

use regex::Regex;
use thiserror::Error;

use super::capability::Capability;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid filter syntax")]
    Syntax,
    #[error("trailing input after filter expression")]
    Stack,
    #[error("invalid filter regex: {0}")]
    Regex(#[from] regex::Error),
}

/// A parsed filter expression, evaluated against a capability snapshot.
#[derive(Debug)]
pub enum Expr {
    Agent(Regex),
    Label(String, String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn eval(&self, capability: &Capability) -> bool {
        match self {
            Expr::Agent(re) => re.is_match(&capability.agent),
            Expr::Label(name, value) => capability.labels.get(name) == Some(value),
            Expr::Not(inner) => !inner.eval(capability),
            Expr::And(left, right) => left.eval(capability) && right.eval(capability),
            Expr::Or(left, right) => left.eval(capability) || right.eval(capability),
        }
    }
}

/// Parse a filter expression, rejecting anything but a complete match.
pub fn parse(input: &str) -> Result<Expr, FilterError> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };
    let expr = parser.expr()?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        return Err(FilterError::Stack);
    }
    Ok(expr)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    /// Consume the given keyword (case-insensitive) plus the mandatory
    /// whitespace on both sides; restores the position on mismatch.
    fn keyword(&mut self, word: &str) -> bool {
        let start = self.pos;
        self.skip_ws();
        if self.pos == start {
            return false;
        }
        for expected in word.chars() {
            match self.bump() {
                Some(c) if c.to_ascii_lowercase() == expected => {}
                _ => {
                    self.pos = start;
                    return false;
                }
            }
        }
        match self.peek() {
            Some(c) if c.is_whitespace() => {
                self.skip_ws();
                true
            }
            _ => {
                self.pos = start;
                false
            }
        }
    }

    fn expr(&mut self) -> Result<Expr, FilterError> {
        let mut left = self.factor()?;
        while self.keyword("or") {
            let right = self.factor()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, FilterError> {
        let mut left = self.primary()?;
        while self.keyword("and") {
            let right = self.primary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Expr, FilterError> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.bump();
                let inner = self.expr()?;
                self.skip_ws();
                if self.bump() != Some(')') {
                    return Err(FilterError::Syntax);
                }
                Ok(inner)
            }
            Some('a') | Some('A') | Some('l') | Some('L') | Some('n') | Some('N') => {
                let tag = self.peek().unwrap().to_ascii_lowercase();
                if (tag == 'a' || tag == 'l') && self.chars.get(self.pos + 1) == Some(&'@') {
                    self.pos += 2;
                    if tag == 'a' {
                        self.agent_term()
                    } else {
                        self.label_term()
                    }
                } else if self.not_keyword() {
                    Ok(Expr::Not(Box::new(self.primary()?)))
                } else {
                    Err(FilterError::Syntax)
                }
            }
            _ => Err(FilterError::Syntax),
        }
    }

    /// `not` followed by mandatory whitespace.
    fn not_keyword(&mut self) -> bool {
        let start = self.pos;
        for expected in "not".chars() {
            match self.bump() {
                Some(c) if c.to_ascii_lowercase() == expected => {}
                _ => {
                    self.pos = start;
                    return false;
                }
            }
        }
        match self.peek() {
            Some(c) if c.is_whitespace() => true,
            _ => {
                self.pos = start;
                false
            }
        }
    }

    /// Regex characters up to whitespace or the closing paren of an
    /// enclosing group, with parens inside the pattern balanced.
    fn agent_term(&mut self) -> Result<Expr, FilterError> {
        let mut pattern = String::new();
        let mut depth = 0usize;
        loop {
            match self.peek() {
                None => break,
                Some(c) if c.is_whitespace() => break,
                Some('(') => {
                    depth += 1;
                    pattern.push('(');
                    self.bump();
                }
                Some(')') => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    pattern.push(')');
                    self.bump();
                }
                Some(c) => {
                    pattern.push(c);
                    self.bump();
                }
            }
        }
        if pattern.is_empty() || depth != 0 {
            return Err(FilterError::Syntax);
        }
        Ok(Expr::Agent(Regex::new(&pattern)?))
    }

    fn label_term(&mut self) -> Result<Expr, FilterError> {
        let name = self.ident();
        if self.bump() != Some(':') {
            return Err(FilterError::Syntax);
        }
        let value = self.ident();
        if name.is_empty() || value.is_empty() {
            return Err(FilterError::Syntax);
        }
        Ok(Expr::Label(name, value))
    }

    fn ident(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == ':' || c == '(' || c == ')' {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }
}
