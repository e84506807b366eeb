use std::error::Error;
use std::fmt::{Display, Formatter};

/// Why a formula could not be compiled.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// The text contains a character outside the whitelist for the
    /// parameter list (letters that are not parameters, quotes, `;`, ...).
    InvalidExpression {
        text: String,
        offending: char,
        position: usize,
    },
    /// Every character is allowed but the text is not a well-formed
    /// arithmetic expression (unbalanced parentheses, missing operand).
    Syntax {
        text: String,
        message: String,
        position: usize,
    },
    /// The parameter list itself is unusable.
    Signature { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    InvalidExpression,
    Syntax,
    Signature,
}

impl CompileError {
    pub(crate) fn invalid(text: &str, offending: char, position: usize) -> Self {
        Self::InvalidExpression {
            text: text.to_owned(),
            offending,
            position,
        }
    }

    pub(crate) fn syntax(text: &str, message: impl Into<String>, position: usize) -> Self {
        Self::Syntax {
            text: text.to_owned(),
            message: message.into(),
            position,
        }
    }

    pub fn kind(&self) -> CompileErrorKind {
        match self {
            Self::InvalidExpression { .. } => CompileErrorKind::InvalidExpression,
            Self::Syntax { .. } => CompileErrorKind::Syntax,
            Self::Signature { .. } => CompileErrorKind::Signature,
        }
    }

    /// Character offset of the problem within the (lowercased) text, if any.
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::InvalidExpression { position, .. } | Self::Syntax { position, .. } => {
                Some(*position)
            }
            Self::Signature { .. } => None,
        }
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidExpression {
                text,
                offending,
                position,
            } => write!(
                f,
                "character '{offending}' at position {position} is not allowed in '{text}'"
            ),
            Self::Syntax {
                text,
                message,
                position,
            } => write!(f, "{message} at position {position} in '{text}'"),
            Self::Signature { message } => write!(f, "unusable parameter list: {message}"),
        }
    }
}

impl Error for CompileError {}
