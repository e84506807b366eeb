use regex::Regex;

use super::error::CompileError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum TokenKind {
    Number(f64),
    Param(usize),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Byte range in the lowercased source. Implicit `*` tokens are empty.
    pub start: usize,
    pub end: usize,
}

impl Token {
    fn implicit_mul(at: usize) -> Self {
        Self {
            kind: TokenKind::Star,
            start: at,
            end: at,
        }
    }

    fn ends_operand(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Number(_) | TokenKind::Param(_) | TokenKind::RParen
        )
    }

    fn starts_operand(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Number(_) | TokenKind::Param(_) | TokenKind::LParen
        )
    }
}

/// Character whitelist for one parameter list: digits, `.`, the letters of
/// the parameter names, arithmetic operators, parentheses and spaces.
#[derive(Debug, Clone)]
pub(crate) struct Whitelist {
    disallowed: Regex,
}

impl Whitelist {
    pub fn for_params(params: &[String]) -> Result<Self, CompileError> {
        let mut class = String::from(r"[^0-9.+\-*/^() ");
        let mut seen = Vec::new();
        for ch in params.iter().flat_map(|name| name.chars()) {
            if !seen.contains(&ch) {
                seen.push(ch);
                class.push_str(&regex::escape(&ch.to_string()));
            }
        }
        class.push(']');

        let disallowed = Regex::new(&class).map_err(|error| CompileError::Signature {
            message: format!("failed to build character whitelist: {error}"),
        })?;
        Ok(Self { disallowed })
    }

    /// First character outside the whitelist as `(char offset, char)`.
    pub fn first_violation(&self, text: &str) -> Option<(usize, char)> {
        let found = self.disallowed.find(text)?;
        let offending = found.as_str().chars().next()?;
        Some((text[..found.start()].chars().count(), offending))
    }
}

/// Split whitelisted text into tokens and make implicit multiplication
/// explicit.
///
/// A `*` is inserted between two adjacent tokens whenever the left one ends an
/// operand (number, parameter, `)`) and the right one starts an operand
/// (number, parameter, `(`): `2x`, `x(y)`, `)(`, `xy`, `2 3`.
pub(crate) fn tokenize(text: &str, params: &[String]) -> Result<Vec<Token>, CompileError> {
    let bytes = text.as_bytes();
    let mut tokens: Vec<Token> = Vec::with_capacity(text.len());
    let mut index = 0;

    while index < bytes.len() {
        let start = index;
        let kind = match bytes[index] {
            b' ' => {
                index += 1;
                continue;
            }
            b'+' => {
                index += 1;
                TokenKind::Plus
            }
            b'-' => {
                index += 1;
                TokenKind::Minus
            }
            b'*' if bytes.get(index + 1) == Some(&b'*') => {
                index += 2;
                TokenKind::Caret
            }
            b'*' => {
                index += 1;
                TokenKind::Star
            }
            b'/' => {
                index += 1;
                TokenKind::Slash
            }
            b'^' => {
                index += 1;
                TokenKind::Caret
            }
            b'(' => {
                index += 1;
                TokenKind::LParen
            }
            b')' => {
                index += 1;
                TokenKind::RParen
            }
            b'0'..=b'9' | b'.' => {
                let (value, end) = scan_number(text, index)?;
                index = end;
                TokenKind::Number(value)
            }
            _ => {
                let (param, end) = scan_param(text, index, params)?;
                index = end;
                TokenKind::Param(param)
            }
        };

        let token = Token {
            kind,
            start,
            end: index,
        };
        if let Some(previous) = tokens.last() {
            if previous.ends_operand() && token.starts_operand() {
                tokens.push(Token::implicit_mul(start));
            }
        }
        tokens.push(token);
    }

    Ok(tokens)
}

fn scan_number(text: &str, start: usize) -> Result<(f64, usize), CompileError> {
    let bytes = text.as_bytes();
    let mut index = start;

    while matches!(bytes.get(index), Some(b'0'..=b'9')) {
        index += 1;
    }
    if bytes.get(index) == Some(&b'.') {
        index += 1;
        while matches!(bytes.get(index), Some(b'0'..=b'9')) {
            index += 1;
        }
    }
    if bytes.get(index) == Some(&b'.') {
        return Err(CompileError::syntax(text, "malformed number", index));
    }

    let literal = &text[start..index];
    if literal == "." {
        return Err(CompileError::syntax(text, "malformed number", start));
    }
    let value = literal
        .parse::<f64>()
        .map_err(|error| CompileError::syntax(text, format!("invalid number '{literal}': {error}"), start))?;
    Ok((value, index))
}

/// Longest parameter name matching at `start`, so `xy` lexes as `x`, `y`
/// unless a parameter is literally called `xy`.
fn scan_param(text: &str, start: usize, params: &[String]) -> Result<(usize, usize), CompileError> {
    let rest = &text[start..];
    params
        .iter()
        .enumerate()
        .filter(|(_, name)| rest.starts_with(name.as_str()))
        .max_by_key(|(_, name)| name.len())
        .map(|(slot, name)| (slot, start + name.len()))
        .ok_or_else(|| {
            let ch = rest.chars().next().unwrap_or('?');
            CompileError::syntax(text, format!("unknown variable starting with '{ch}'"), start)
        })
}

/// Render tokens back to text with every operator explicit.
pub(crate) fn render(tokens: &[Token], text: &str, params: &[String]) -> String {
    let mut out = String::with_capacity(text.len() + tokens.len());
    for token in tokens {
        match token.kind {
            TokenKind::Number(_) => out.push_str(&text[token.start..token.end]),
            TokenKind::Param(slot) => {
                if let Some(name) = params.get(slot) {
                    out.push_str(name);
                }
            }
            TokenKind::Plus => out.push('+'),
            TokenKind::Minus => out.push('-'),
            TokenKind::Star => out.push('*'),
            TokenKind::Slash => out.push('/'),
            TokenKind::Caret => out.push('^'),
            TokenKind::LParen => out.push('('),
            TokenKind::RParen => out.push(')'),
        }
    }
    out
}
