//! Compiler for the synthesized expression family
//!
//! The mode machine emits a closed family of strings: affine forms with
//! scalar or vector coefficients (`y=x*0.1+2`, `y[0:1]=x*[a,b]+[c,d]`),
//! slice adaptations (`y=x[0:2]`, `y[0]=x`), and multi-source means with
//! zero padding (`y=(x0+[x1,0])/2`). This module parses exactly that
//! family into a small AST and evaluates it elementwise in f64. Strings
//! outside the family fail to compile and the requesting mode transition
//! is rejected.

use crate::error::{Result, SigmapError};
use crate::expr::{ExprCompiler, Expression, Typestring, VectorSpec};
use crate::history::HistoryBuffer;
use crate::value::{Timetag, ValueType};

/// Builtin compiler for the synthesized affine family
#[derive(Debug, Default, Clone)]
pub struct AffineCompiler;

impl ExprCompiler for AffineCompiler {
    fn compile(
        &self,
        source: &str,
        sources: &[VectorSpec],
        destination: VectorSpec,
    ) -> Result<Box<dyn Expression>> {
        let compiled = Parser::new(source, sources, destination).parse()?;
        Ok(Box::new(compiled))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone)]
enum Node {
    Scalar(f64),
    Source {
        index: usize,
        start: usize,
        len: usize,
    },
    Vector(Vec<Node>),
    Binary {
        op: Op,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Negate(Box<Node>),
}

impl Node {
    /// Vector length of this node; scalars report 1 and broadcast
    fn length(&self) -> usize {
        match self {
            Node::Scalar(_) => 1,
            Node::Source { len, .. } => *len,
            Node::Vector(items) => items.iter().map(Node::length).sum(),
            Node::Binary { lhs, rhs, .. } => lhs.length().max(rhs.length()),
            Node::Negate(inner) => inner.length(),
        }
    }

    fn eval(&self, sources: &[&HistoryBuffer]) -> Vec<f64> {
        match self {
            Node::Scalar(v) => vec![*v],
            Node::Source { index, start, len } => {
                let buffer = sources[*index];
                match buffer.read(0) {
                    Ok((sample, _)) => sample[*start..*start + *len]
                        .iter()
                        .map(|v| v.as_f64())
                        .collect(),
                    // zero-initialized history: a never-updated source reads as zeros
                    Err(_) => vec![0.0; *len],
                }
            }
            Node::Vector(items) => items.iter().flat_map(|n| n.eval(sources)).collect(),
            Node::Binary { op, lhs, rhs } => {
                let a = lhs.eval(sources);
                let b = rhs.eval(sources);
                let len = a.len().max(b.len());
                (0..len)
                    .map(|i| {
                        let x = a[if a.len() == 1 { 0 } else { i }];
                        let y = b[if b.len() == 1 { 0 } else { i }];
                        match op {
                            Op::Add => x + y,
                            Op::Sub => x - y,
                            Op::Mul => x * y,
                            Op::Div => x / y,
                        }
                    })
                    .collect()
            }
            Node::Negate(inner) => inner.eval(sources).into_iter().map(|v| -v).collect(),
        }
    }
}

/// A compiled affine expression: one RHS vector written through an LHS slice
#[derive(Debug)]
pub struct AffineExpr {
    rhs: Node,
    /// First destination element written
    dst_start: usize,
    /// Number of destination elements written
    dst_len: usize,
    /// Full destination shape
    destination: VectorSpec,
    num_sources: usize,
}

impl Expression for AffineExpr {
    fn input_history_size(&self, _index: usize) -> usize {
        1
    }

    fn output_history_size(&self) -> usize {
        1
    }

    fn num_variables(&self) -> usize {
        0
    }

    fn variable_history_size(&self, _index: usize) -> usize {
        0
    }

    fn variable_vector_length(&self, _index: usize) -> usize {
        0
    }

    fn evaluate(
        &self,
        sources: &[&HistoryBuffer],
        timetag: Timetag,
        output: &mut HistoryBuffer,
        _variables: &mut [HistoryBuffer],
        _instance: usize,
        typestring: &mut Typestring,
    ) -> Result<bool> {
        debug_assert_eq!(sources.len(), self.num_sources);
        let computed = self.rhs.eval(sources);

        let mut sample = vec![0.0; self.destination.length];
        for j in 0..self.dst_len {
            let v = computed[if computed.len() == 1 { 0 } else { j }];
            sample[self.dst_start + j] = v;
        }
        output.write_f64(&sample, timetag)?;

        typestring.clear();
        for i in 0..self.destination.length {
            if i >= self.dst_start && i < self.dst_start + self.dst_len {
                typestring.push(Some(self.destination.ty));
            } else {
                typestring.push(None);
            }
        }
        Ok(true)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Equals,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Colon,
    Comma,
}

fn lex(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '=' => {
                chars.next();
                tokens.push(Token::Equals);
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            c if c.is_ascii_alphabetic() => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut text = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        text.push(c);
                        chars.next();
                    } else if c == 'e' || c == 'E' {
                        text.push(c);
                        chars.next();
                        if let Some(&sign) = chars.peek() {
                            if sign == '+' || sign == '-' {
                                text.push(sign);
                                chars.next();
                            }
                        }
                    } else {
                        break;
                    }
                }
                let value: f64 = text
                    .parse()
                    .map_err(|_| SigmapError::parse(format!("bad number '{text}'")))?;
                tokens.push(Token::Number(value));
            }
            other => {
                return Err(SigmapError::parse(format!("unexpected character '{other}'")));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    text: &'a str,
    sources: &'a [VectorSpec],
    destination: VectorSpec,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, sources: &'a [VectorSpec], destination: VectorSpec) -> Self {
        Self {
            tokens: Vec::new(),
            pos: 0,
            text,
            sources,
            destination,
        }
    }

    fn parse(mut self) -> Result<AffineExpr> {
        self.tokens = lex(self.text)?;
        let (dst_start, dst_len) = self.parse_lhs()?;
        self.expect(Token::Equals)?;
        let rhs = self.parse_expr()?;
        if self.pos != self.tokens.len() {
            return Err(SigmapError::parse("trailing tokens after expression"));
        }
        let rhs_len = rhs.length();
        if rhs_len != 1 && rhs_len != dst_len {
            return Err(SigmapError::parse(format!(
                "expression produces {rhs_len} elements, destination slice holds {dst_len}"
            )));
        }
        Ok(AffineExpr {
            rhs,
            dst_start,
            dst_len,
            destination: self.destination,
            num_sources: self.sources.len(),
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(SigmapError::parse(format!(
                "expected {token:?}, found {other:?}"
            ))),
        }
    }

    fn parse_lhs(&mut self) -> Result<(usize, usize)> {
        match self.next() {
            Some(Token::Ident(name)) if name == "y" => {}
            other => {
                return Err(SigmapError::parse(format!(
                    "expected 'y' on left-hand side, found {other:?}"
                )))
            }
        }
        let (start, len) = match self.peek() {
            Some(Token::LBracket) => self.parse_slice(self.destination.length)?,
            _ => (0, self.destination.length),
        };
        Ok((start, len))
    }

    /// Parse `[i]` or `[a:b]` (inclusive) bounded by `limit`
    fn parse_slice(&mut self, limit: usize) -> Result<(usize, usize)> {
        self.expect(Token::LBracket)?;
        let start = self.parse_index()?;
        let end = match self.peek() {
            Some(Token::Colon) => {
                self.next();
                self.parse_index()?
            }
            _ => start,
        };
        self.expect(Token::RBracket)?;
        if end < start || end >= limit {
            return Err(SigmapError::parse(format!(
                "slice [{start}:{end}] out of range for length {limit}"
            )));
        }
        Ok((start, end - start + 1))
    }

    fn parse_index(&mut self) -> Result<usize> {
        match self.next() {
            Some(Token::Number(v)) if v >= 0.0 && v.fract() == 0.0 => Ok(v as usize),
            other => Err(SigmapError::parse(format!(
                "expected integer index, found {other:?}"
            ))),
        }
    }

    fn parse_expr(&mut self) -> Result<Node> {
        let mut node = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => Op::Add,
                Some(Token::Minus) => Op::Sub,
                _ => break,
            };
            self.next();
            let rhs = self.parse_term()?;
            node = self.combine(op, node, rhs)?;
        }
        Ok(node)
    }

    fn parse_term(&mut self) -> Result<Node> {
        let mut node = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => Op::Mul,
                Some(Token::Slash) => Op::Div,
                _ => break,
            };
            self.next();
            let rhs = self.parse_factor()?;
            node = self.combine(op, node, rhs)?;
        }
        Ok(node)
    }

    fn combine(&self, op: Op, lhs: Node, rhs: Node) -> Result<Node> {
        let (l, r) = (lhs.length(), rhs.length());
        if l != r && l != 1 && r != 1 {
            return Err(SigmapError::parse(format!(
                "operand length mismatch: {l} vs {r}"
            )));
        }
        if op == Op::Div && r != 1 {
            return Err(SigmapError::parse("divisor must be scalar"));
        }
        Ok(Node::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_factor(&mut self) -> Result<Node> {
        match self.peek().cloned() {
            Some(Token::Number(v)) => {
                self.next();
                Ok(Node::Scalar(v))
            }
            Some(Token::Minus) => {
                self.next();
                let inner = self.parse_factor()?;
                Ok(Node::Negate(Box::new(inner)))
            }
            Some(Token::LParen) => {
                self.next();
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => self.parse_vector(),
            Some(Token::Ident(name)) => {
                self.next();
                self.parse_source(&name)
            }
            other => Err(SigmapError::parse(format!(
                "unexpected token {other:?} in expression"
            ))),
        }
    }

    fn parse_vector(&mut self) -> Result<Node> {
        self.expect(Token::LBracket)?;
        let mut items = vec![self.parse_expr()?];
        while self.peek() == Some(&Token::Comma) {
            self.next();
            items.push(self.parse_expr()?);
        }
        self.expect(Token::RBracket)?;
        Ok(Node::Vector(items))
    }

    fn parse_source(&mut self, name: &str) -> Result<Node> {
        let index = match name.strip_prefix('x') {
            Some("") => 0,
            Some(digits) => digits
                .parse::<usize>()
                .map_err(|_| SigmapError::parse(format!("unknown identifier '{name}'")))?,
            None => return Err(SigmapError::parse(format!("unknown identifier '{name}'"))),
        };
        let spec = *self.sources.get(index).ok_or_else(|| {
            SigmapError::parse(format!(
                "source x{index} out of range ({} sources)",
                self.sources.len()
            ))
        })?;
        let (start, len) = match self.peek() {
            Some(Token::LBracket) => self.parse_slice(spec.length)?,
            _ => (0, spec.length),
        };
        Ok(Node::Source { index, start, len })
    }
}
