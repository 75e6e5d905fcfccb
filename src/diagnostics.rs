use std::fmt;

use thiserror::Error;

use crate::source::SourceMap;

/// Byte span inside one of the files a program was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSpan {
    pub file: usize,
    pub start: usize,
    pub end: usize,
}

impl SourceSpan {
    pub const fn new(file: usize, start: usize, end: usize) -> Self {
        Self { file, start, end }
    }

    /// Span covering `self` through the end of `other`.
    pub const fn to(self, other: SourceSpan) -> Self {
        Self {
            file: self.file,
            start: self.start,
            end: other.end,
        }
    }
}

/// Human-facing position of a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

/// Classification of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Lexer,
    Parser,
    Namespace,
    Runtime,
    Limit,
}

impl DiagnosticKind {
    pub fn is_parse_time(self) -> bool {
        matches!(self, Self::Lexer | Self::Parser | Self::Namespace)
    }

    pub fn label(self) -> &'static str {
        if self.is_parse_time() {
            "Parse error"
        } else {
            "Fatal error"
        }
    }
}

/// Rich diagnostic information surfaced to end users.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Option<SourceSpan>,
    pub location: Option<Location>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            location: None,
            notes: Vec::new(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Runtime, message)
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Attaches `span` unless the diagnostic already points somewhere.
    pub fn or_span(mut self, span: SourceSpan) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }

    /// Resolves the span against the files of the program it came from.
    pub fn locate(mut self, sources: &[SourceMap]) -> Self {
        if self.location.is_none() {
            if let Some(span) = self.span {
                if let Some(map) = sources.get(span.file) {
                    self.location = Some(map.location(span.start));
                }
            }
        }
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)?;
        if let Some(location) = &self.location {
            write!(f, " in {} on line {}", location.file, location.line)?;
        }
        for note in &self.notes {
            write!(f, "\n  note: {note}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Outcome of a call that did not produce a value.
#[derive(Debug, Clone, Error)]
pub enum Failure {
    #[error("{0}")]
    Parse(Diagnostic),
    #[error("{0}")]
    Runtime(Diagnostic),
}

impl Failure {
    pub fn diagnostic(&self) -> &Diagnostic {
        match self {
            Self::Parse(diag) | Self::Runtime(diag) => diag,
        }
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse(_))
    }

    /// The message handed to the host, verbatim.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl From<Diagnostic> for Failure {
    fn from(diag: Diagnostic) -> Self {
        if diag.kind.is_parse_time() {
            Self::Parse(diag)
        } else {
            Self::Runtime(diag)
        }
    }
}

/// Unified error type for the host tools.
#[derive(Debug, Error)]
pub enum OrigamiError {
    #[error("{0}")]
    Failure(#[from] Failure),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OrigamiError>;
