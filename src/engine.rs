//! The single exported operation: evaluate one source string in a brand-new
//! environment and return one string.
//!
//! Every call builds its own resolver, parser, [`Vm`] and [`Context`], runs
//! the registered libraries against that VM, and drops all of it before
//! returning. Nothing an evaluation does is visible to the next one.
//!
//! [`Context`]: crate::runtime::Context

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
};

use crate::{
    classpath::ClassPathResolver,
    config::EngineConfig,
    diagnostics::Diagnostic,
    library::Registrar,
    marshal::{marshal, Outcome},
    parser::Parser,
    source::SourceUnit,
    vm::Vm,
};

/// Where a call currently is. Transitions only move forward; `Done` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    ResolvingClassPath,
    Parsing,
    Evaluating,
    Failed,
    Marshalling,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::ResolvingClassPath => "resolving class path",
            Stage::Parsing => "parsing",
            Stage::Evaluating => "evaluating",
            Stage::Failed => "failed",
            Stage::Marshalling => "marshalling",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

struct Pipeline {
    stage: Stage,
}

impl Pipeline {
    fn new() -> Self {
        Self { stage: Stage::Idle }
    }

    fn advance(&mut self, next: Stage) {
        tracing::trace!(from = %self.stage, to = %next, "stage");
        self.stage = next;
    }
}

/// Evaluation engine. Holds only configuration and stateless libraries, so
/// one instance can be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
    registrar: Registrar,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registrar(config, Registrar::standard())
    }

    pub fn with_registrar(config: EngineConfig, registrar: Registrar) -> Self {
        Self { config, registrar }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registrar(&self) -> &Registrar {
        &self.registrar
    }

    /// Runs `code` under the configured virtual name and marshals the
    /// outcome. Never panics.
    #[tracing::instrument(level = "debug", skip_all, fields(len = code.len()))]
    pub fn evaluate(&self, code: &str) -> String {
        let unit = SourceUnit::new(code, self.config.virtual_name.as_str());
        let mut pipeline = Pipeline::new();
        let outcome = self.drive(&mut pipeline, &unit);
        pipeline.advance(Stage::Marshalling);
        let rendered = panic::catch_unwind(AssertUnwindSafe(|| marshal(&outcome)))
            .unwrap_or_else(|payload| marshal(&internal_error(payload.as_ref(), pipeline.stage)));
        pipeline.advance(Stage::Done);
        rendered
    }

    /// Runs `unit` and returns the unmarshalled outcome.
    pub fn run(&self, unit: &SourceUnit) -> Outcome {
        let mut pipeline = Pipeline::new();
        self.drive(&mut pipeline, unit)
    }

    fn drive(&self, pipeline: &mut Pipeline, unit: &SourceUnit) -> Outcome {
        tracing::debug!(
            file = unit.virtual_name(),
            len = unit.code().len(),
            resolver = self.config.resolver.name(),
            "evaluation started"
        );
        match panic::catch_unwind(AssertUnwindSafe(|| self.execute(pipeline, unit))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let outcome = internal_error(payload.as_ref(), pipeline.stage);
                tracing::warn!(stage = %pipeline.stage, "evaluation panicked");
                pipeline.advance(Stage::Failed);
                outcome
            }
        }
    }

    fn execute(&self, pipeline: &mut Pipeline, unit: &SourceUnit) -> Outcome {
        pipeline.advance(Stage::ResolvingClassPath);
        let resolver = ClassPathResolver::new(self.config.resolver.clone());
        let parser = Parser::new(resolver);
        let mut vm = Vm::new(parser, self.config.output.clone(), self.config.limits);
        vm.register(&self.registrar);

        pipeline.advance(Stage::Parsing);
        let program = match vm.parse(unit) {
            Ok(program) => program,
            Err(failure) => {
                tracing::debug!(%failure, "parse failed");
                pipeline.advance(Stage::Failed);
                return failure.into();
            }
        };

        pipeline.advance(Stage::Evaluating);
        let variables = vm.parser().variables();
        let mut ctx = vm.create_context(&variables);
        let result = program.evaluate(&mut ctx);
        tracing::debug!(steps = ctx.steps(), "evaluation finished");
        self.config.output.flush();
        match result {
            Ok(value) => value.into(),
            Err(failure) => {
                tracing::debug!(%failure, "runtime failure");
                failure.into()
            }
        }
    }
}

fn internal_error(payload: &(dyn Any + Send), stage: Stage) -> Outcome {
    let diag = Diagnostic::runtime(format!("Internal error: {}", panic_message(payload)))
        .with_note(format!("raised while {stage}"));
    Outcome::Runtime(diag)
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Evaluates `code` with the default configuration and libraries.
pub fn evaluate(code: &str) -> String {
    Engine::default().evaluate(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn engine_is_shareable() {
        assert_send_sync::<Engine>();
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
