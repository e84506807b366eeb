use super::error::CompileError;
use super::lexer::{Token, TokenKind};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Constant(f64),
    Param(usize),
    Neg(Box<Node>),
    Add(Box<Node>, Box<Node>),
    Sub(Box<Node>, Box<Node>),
    Mul(Box<Node>, Box<Node>),
    Div(Box<Node>, Box<Node>),
    Pow(Box<Node>, Box<Node>),
}

impl Node {
    #[inline]
    pub fn evaluate(&self, args: &[f64]) -> f64 {
        match self {
            Self::Constant(value) => *value,
            Self::Param(slot) => args.get(*slot).copied().unwrap_or(f64::NAN),
            Self::Neg(value) => -value.evaluate(args),
            Self::Add(left, right) => left.evaluate(args) + right.evaluate(args),
            Self::Sub(left, right) => left.evaluate(args) - right.evaluate(args),
            Self::Mul(left, right) => left.evaluate(args) * right.evaluate(args),
            Self::Div(left, right) => left.evaluate(args) / right.evaluate(args),
            Self::Pow(left, right) => left.evaluate(args).powf(right.evaluate(args)),
        }
    }

    /// Collapse every sub-tree that does not depend on a parameter.
    pub fn fold(self) -> Self {
        match self {
            Self::Constant(_) | Self::Param(_) => self,
            Self::Neg(value) => match value.fold() {
                Self::Constant(value) => Self::Constant(-value),
                other => Self::Neg(Box::new(other)),
            },
            Self::Add(left, right) => fold_binary(*left, *right, Self::Add),
            Self::Sub(left, right) => fold_binary(*left, *right, Self::Sub),
            Self::Mul(left, right) => fold_binary(*left, *right, Self::Mul),
            Self::Div(left, right) => fold_binary(*left, *right, Self::Div),
            Self::Pow(left, right) => fold_binary(*left, *right, Self::Pow),
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }
}

fn fold_binary(left: Node, right: Node, build: fn(Box<Node>, Box<Node>) -> Node) -> Node {
    let node = build(Box::new(left.fold()), Box::new(right.fold()));
    let constant_operands = match &node {
        Node::Add(l, r) | Node::Sub(l, r) | Node::Mul(l, r) | Node::Div(l, r) | Node::Pow(l, r) => {
            l.is_constant() && r.is_constant()
        }
        _ => false,
    };
    if constant_operands {
        Node::Constant(node.evaluate(&[]))
    } else {
        node
    }
}

/// Deepest chain of parentheses, signs and exponents a formula may nest.
pub(crate) const MAX_NESTING: usize = 256;
/// Longest formula, in tokens. Bounds the depth of left-leaning operator
/// chains such as `x+x+x+...`, which evaluation walks recursively.
pub(crate) const MAX_TOKENS: usize = 4096;

/// Recursive-descent parser over normalized tokens.
///
/// ```text
/// expr    := term (('+' | '-') term)*
/// term    := unary (('*' | '/') unary)*
/// unary   := ('+' | '-') unary | power
/// power   := primary ('^' unary)?
/// primary := number | variable | '(' expr ')'
/// ```
pub(crate) struct Parser<'a> {
    text: &'a str,
    tokens: &'a [Token],
    index: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(text: &'a str, tokens: &'a [Token]) -> Self {
        Self {
            text,
            tokens,
            index: 0,
            depth: 0,
        }
    }

    pub fn parse(mut self) -> Result<Node, CompileError> {
        if self.tokens.is_empty() {
            return Err(CompileError::syntax(self.text, "empty formula", 0));
        }
        if let Some(token) = self.tokens.get(MAX_TOKENS) {
            return Err(CompileError::syntax(
                self.text,
                format!("formula is longer than {MAX_TOKENS} tokens"),
                self.char_offset(token.start),
            ));
        }

        let expression = self.parse_expr()?;
        if let Some(token) = self.peek() {
            let message = match token.kind {
                TokenKind::RParen => "unmatched ')'".to_owned(),
                _ => format!("unexpected '{}'", self.token_text(token)),
            };
            return Err(CompileError::syntax(self.text, message, self.char_offset(token.start)));
        }
        Ok(expression)
    }

    fn parse_expr(&mut self) -> Result<Node, CompileError> {
        let mut node = self.parse_term()?;
        loop {
            match self.peek_kind() {
                Some(TokenKind::Plus) => {
                    self.index += 1;
                    node = Node::Add(Box::new(node), Box::new(self.parse_term()?));
                }
                Some(TokenKind::Minus) => {
                    self.index += 1;
                    node = Node::Sub(Box::new(node), Box::new(self.parse_term()?));
                }
                _ => return Ok(node),
            }
        }
    }

    fn parse_term(&mut self) -> Result<Node, CompileError> {
        let mut node = self.parse_unary()?;
        loop {
            match self.peek_kind() {
                Some(TokenKind::Star) => {
                    self.index += 1;
                    node = Node::Mul(Box::new(node), Box::new(self.parse_unary()?));
                }
                Some(TokenKind::Slash) => {
                    self.index += 1;
                    node = Node::Div(Box::new(node), Box::new(self.parse_unary()?));
                }
                _ => return Ok(node),
            }
        }
    }

    /// Every recursive path (parentheses, signs, exponents) passes through
    /// here, so this is where nesting is counted.
    fn parse_unary(&mut self) -> Result<Node, CompileError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            let position = self
                .peek()
                .map_or(self.text.chars().count(), |token| self.char_offset(token.start));
            return Err(CompileError::syntax(
                self.text,
                format!("formula nested too deeply (limit {MAX_NESTING})"),
                position,
            ));
        }
        let node = self.parse_signed();
        self.depth -= 1;
        node
    }

    fn parse_signed(&mut self) -> Result<Node, CompileError> {
        match self.peek_kind() {
            Some(TokenKind::Plus) => {
                self.index += 1;
                self.parse_unary()
            }
            Some(TokenKind::Minus) => {
                self.index += 1;
                Ok(Node::Neg(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Node, CompileError> {
        let base = self.parse_primary()?;
        if self.peek_kind() == Some(TokenKind::Caret) {
            self.index += 1;
            let exponent = self.parse_unary()?;
            return Ok(Node::Pow(Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Node, CompileError> {
        let Some(token) = self.peek() else {
            return Err(CompileError::syntax(
                self.text,
                "unexpected end of formula",
                self.text.chars().count(),
            ));
        };

        match token.kind {
            TokenKind::Number(value) => {
                self.index += 1;
                Ok(Node::Constant(value))
            }
            TokenKind::Param(slot) => {
                self.index += 1;
                Ok(Node::Param(slot))
            }
            TokenKind::LParen => {
                self.index += 1;
                let inner = self.parse_expr()?;
                match self.peek() {
                    Some(close) if close.kind == TokenKind::RParen => {
                        self.index += 1;
                        Ok(inner)
                    }
                    Some(other) => Err(CompileError::syntax(
                        self.text,
                        "expected ')'",
                        self.char_offset(other.start),
                    )),
                    None => Err(CompileError::syntax(
                        self.text,
                        "unclosed '('",
                        self.char_offset(token.start),
                    )),
                }
            }
            _ => Err(CompileError::syntax(
                self.text,
                format!("expected a number, variable or '(' but found '{}'", self.token_text(token)),
                self.char_offset(token.start),
            )),
        }
    }

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.index).copied()
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|token| token.kind)
    }

    fn token_text(&self, token: Token) -> &str {
        if token.start == token.end {
            return "*";
        }
        self.text.get(token.start..token.end).unwrap_or("*")
    }

    fn char_offset(&self, byte: usize) -> usize {
        self.text.get(..byte).map_or(byte, |prefix| prefix.chars().count())
    }
}
