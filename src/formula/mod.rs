//! Compiles user-typed arithmetic into reusable per-pixel functions.
//!
//! Pipeline: lowercase → character whitelist → tokenize (with implicit
//! multiplication) → recursive-descent parse → constant folding. The result
//! is a [`Formula`] that is evaluated once per channel per pixel per pass, so
//! all text handling happens exactly once, in [`compile`].

mod error;
mod lexer;
mod parser;

pub use error::{CompileError, CompileErrorKind};

use lexer::{render, tokenize, Whitelist};
use parser::{Node, Parser};

/// A compiled formula over a fixed, ordered parameter list.
#[derive(Debug, Clone)]
pub struct Formula {
    source: String,
    normalized: String,
    params: Vec<String>,
    root: Node,
}

impl Formula {
    /// Evaluate with `args` bound positionally to the parameter list.
    ///
    /// The result is not clamped and may be non-finite (`x/0`). A missing
    /// argument evaluates as NaN.
    #[inline]
    pub fn evaluate(&self, args: &[f64]) -> f64 {
        self.root.evaluate(args)
    }

    /// The text as the user typed it.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The rewritten text with every multiplication and power explicit.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// True when the formula ignores all of its parameters.
    pub fn is_constant(&self) -> bool {
        self.root.is_constant()
    }
}

impl PartialEq for Formula {
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params && self.root == other.root
    }
}

/// Compile `text` into a function of `params` (in order).
///
/// Parameter names must be non-empty lowercase ASCII identifiers and unique.
/// Text is case-folded before validation, so `2X` is accepted for `x`.
pub fn compile(params: &[&str], text: &str) -> Result<Formula, CompileError> {
    let params = validate_params(params)?;
    let source = text.to_owned();
    let lowered = text.to_lowercase();

    let whitelist = Whitelist::for_params(&params)?;
    if let Some((position, offending)) = whitelist.first_violation(&lowered) {
        return Err(CompileError::invalid(&lowered, offending, position));
    }

    let tokens = tokenize(&lowered, &params)?;
    let normalized = render(&tokens, &lowered, &params);
    let root = Parser::new(&lowered, &tokens).parse()?.fold();

    Ok(Formula {
        source,
        normalized,
        params,
        root,
    })
}

fn validate_params(params: &[&str]) -> Result<Vec<String>, CompileError> {
    let mut names: Vec<String> = Vec::with_capacity(params.len());
    for name in params {
        if name.is_empty() || !name.chars().all(|ch| ch.is_ascii_lowercase()) {
            return Err(CompileError::Signature {
                message: format!("parameter '{name}' must be lowercase ASCII letters"),
            });
        }
        if names.iter().any(|existing| existing == name) {
            return Err(CompileError::Signature {
                message: format!("parameter '{name}' is listed twice"),
            });
        }
        names.push((*name).to_owned());
    }
    Ok(names)
}
