//! Origami: a single-shot, isolated evaluation engine for a PHP-flavoured
//! scripting language.
//!
//! [`evaluate`] takes source code and returns one string: the rendered
//! value of the program, the empty string, or a `Parse error: ...` /
//! `Fatal error: ...` message. Each call builds a fresh [`vm::Vm`], installs
//! the standard libraries into it, evaluates, and throws everything away.

pub mod ast;
pub mod classpath;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod environment;
#[cfg(feature = "ffi")]
pub mod ffi;
pub mod lexer;
pub mod library;
pub mod marshal;
pub mod parser;
pub mod repl;
pub mod runtime;
pub mod source;
pub mod stack;
pub mod value;
pub mod vm;

pub use classpath::{ClassPathResolver, LoadableDefinition, ResolveError, ResolverMode};
pub use config::{EngineConfig, Limits, OutputBuffer, OutputTarget};
pub use diagnostics::{Diagnostic, DiagnosticKind, Failure, OrigamiError, SourceSpan};
pub use engine::{evaluate, Engine, Stage};
pub use library::{Library, LibraryScope, Registrar, RegistrationError};
pub use marshal::{marshal, Outcome};
pub use repl::Repl;
pub use runtime::{Context, RuntimeError};
pub use source::SourceUnit;
pub use value::{Arity, Value, ValueKind};
