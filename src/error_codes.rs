use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::{json, Value};

use crate::formula::CompileErrorKind;
use crate::slots::SlotError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedErrorKind {
    Usage,
    Formula,
    Session,
    Export,
}

/// An error with a stable machine-readable code, surfaced by `--json`.
#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn usage(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Usage,
        }
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self {
            code: "INVALID_SESSION",
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Session,
        }
    }

    pub fn unsupported_format(message: impl Into<String>) -> Self {
        Self {
            code: "UNSUPPORTED_FORMAT",
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Export,
        }
    }

    /// A rejected formula, with its slot and position in the details.
    pub fn formula(error: &SlotError) -> Self {
        let code = match error.source.kind() {
            CompileErrorKind::InvalidExpression => "INVALID_EXPRESSION",
            CompileErrorKind::Syntax | CompileErrorKind::Signature => "EXPRESSION_SYNTAX",
        };
        Self {
            code,
            message: error.to_string(),
            details: Some(json!({
                "slot": error.slot.to_string(),
                "signature": error.signature,
                "text": error.text,
                "position": error.source.position(),
            })),
            kind: CodedErrorKind::Formula,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}

/// Envelope for any error: the coded one if present, otherwise `INTERNAL`.
pub fn envelope_for(error: &Error) -> ErrorEnvelope {
    match find_coded_error(error) {
        Some(coded) => coded.envelope(),
        None => ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: "INTERNAL".to_owned(),
                message: format!("{error:#}"),
                details: None,
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::{FormulaLayout, FormulaSet, SlotId};

    #[test]
    fn formula_errors_carry_slot_details() {
        let mut set = FormulaSet::new(FormulaLayout::Full).expect("defaults");
        let error = set
            .set("r.start".parse::<SlotId>().expect("slot"), "x+(y")
            .expect_err("syntax");
        let coded = CodedError::formula(&error);
        assert_eq!(coded.code, "EXPRESSION_SYNTAX");

        let envelope = serde_json::to_value(coded.envelope()).expect("serialize");
        assert_eq!(envelope["ok"], false);
        assert_eq!(envelope["error"]["details"]["slot"], "r.start");
        assert_eq!(envelope["error"]["details"]["text"], "x+(y");
    }

    #[test]
    fn uncoded_errors_fall_back_to_internal() {
        let error = anyhow::anyhow!("disk on fire");
        assert_eq!(envelope_for(&error).error.code, "INTERNAL");

        let coded = anyhow::Error::new(CodedError::usage("USAGE", "bad flag"))
            .context("while parsing arguments");
        assert_eq!(envelope_for(&coded).error.code, "USAGE");
    }
}
