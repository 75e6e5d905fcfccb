//! Turns the outcome of one evaluation into the single string handed back
//! to the host.

use crate::{
    diagnostics::{Diagnostic, Failure},
    value::Value,
};

/// Everything an evaluation can end in.
#[derive(Debug, Clone)]
pub enum Outcome {
    Parse(Diagnostic),
    Runtime(Diagnostic),
    Value(Value),
    /// The program finished without producing a value.
    Absent,
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::Runtime(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Self::Parse(diag) | Self::Runtime(diag) => Some(diag),
            _ => None,
        }
    }
}

impl From<Failure> for Outcome {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Parse(diag) => Self::Parse(diag),
            Failure::Runtime(diag) => Self::Runtime(diag),
        }
    }
}

impl From<Option<Value>> for Outcome {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Self::Absent, Self::Value)
    }
}

/// Failures render verbatim. Values render canonically when they can;
/// anything else, including no value at all, is the empty string.
pub fn marshal(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Parse(diag) | Outcome::Runtime(diag) => diag.to_string(),
        Outcome::Value(value) => value.render().unwrap_or_default(),
        Outcome::Absent => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticKind;

    #[test]
    fn failures_render_verbatim() {
        let diag = Diagnostic::new(DiagnosticKind::Parser, "unexpected end of input");
        assert_eq!(
            marshal(&Outcome::Parse(diag)),
            "Parse error: unexpected end of input"
        );
        let diag = Diagnostic::runtime("Division by zero");
        assert_eq!(marshal(&Outcome::Runtime(diag)), "Fatal error: Division by zero");
    }

    #[test]
    fn unrenderable_values_are_empty() {
        assert_eq!(marshal(&Outcome::Value(Value::null())), "");
        assert_eq!(marshal(&Outcome::Absent), "");
        assert_eq!(marshal(&Outcome::Value(Value::int(3))), "3");
        assert_eq!(marshal(&Outcome::Value(Value::bool(false))), "false");
    }
}
