//! Engine configuration: resolver strategy, resource limits and where `echo`
//! output goes.

use std::{io::Write, sync::Arc};

use parking_lot::Mutex;

use crate::{classpath::ResolverMode, source::DEFAULT_VIRTUAL_NAME};

pub const DEFAULT_MAX_CALL_DEPTH: usize = 512;
/// Longest string, in bytes, a script may build.
pub const MAX_STRING_LEN: usize = 64 * 1024 * 1024;
/// Most elements a library function may produce in one array.
pub const MAX_ARRAY_LEN: u64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_call_depth: usize,
    /// Statements and loop iterations one evaluation may execute.
    pub max_steps: Option<u64>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_steps: None,
        }
    }
}

/// Shared buffer collecting script output for hosts and tests.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer(Arc<Mutex<String>>);

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_str(&self, text: &str) {
        self.0.lock().push_str(text);
    }

    pub fn contents(&self) -> String {
        self.0.lock().clone()
    }

    pub fn take(&self) -> String {
        std::mem::take(&mut *self.0.lock())
    }
}

#[derive(Debug, Clone, Default)]
pub enum OutputTarget {
    #[default]
    Stdout,
    Discard,
    Capture(OutputBuffer),
}

impl OutputTarget {
    pub fn write(&self, text: &str) {
        match self {
            OutputTarget::Stdout => {
                let mut stdout = std::io::stdout().lock();
                if let Err(err) = stdout.write_all(text.as_bytes()) {
                    tracing::debug!(%err, "dropping script output");
                }
            }
            OutputTarget::Discard => {}
            OutputTarget::Capture(buffer) => buffer.push_str(text),
        }
    }

    pub fn flush(&self) {
        if let OutputTarget::Stdout = self {
            if let Err(err) = std::io::stdout().flush() {
                tracing::debug!(%err, "dropping buffered script output");
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub resolver: ResolverMode,
    pub virtual_name: String,
    pub limits: Limits,
    pub output: OutputTarget,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolver: ResolverMode::Restricted,
            virtual_name: DEFAULT_VIRTUAL_NAME.to_string(),
            limits: Limits::default(),
            output: OutputTarget::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_resolver(mut self, resolver: ResolverMode) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_virtual_name(mut self, name: impl Into<String>) -> Self {
        self.virtual_name = name.into();
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.limits.max_call_depth = depth;
        self
    }

    pub fn with_max_steps(mut self, steps: Option<u64>) -> Self {
        self.limits.max_steps = steps;
        self
    }

    pub fn with_output(mut self, output: OutputTarget) -> Self {
        self.output = output;
        self
    }
}
