use indexmap::IndexMap;

use crate::{
    diagnostics::{Diagnostic, SourceSpan},
    runtime::RuntimeError,
    value::Value,
};

/// Variables of one function frame. Scopes are flat: blocks do not nest.
#[derive(Debug, Default, Clone)]
pub struct Environment {
    bindings: IndexMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bindings(bindings: IndexMap<String, Value>) -> Self {
        Self { bindings }
    }

    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn get(&self, name: &str, span: SourceSpan) -> Result<Value, RuntimeError> {
        self.bindings.get(name).cloned().ok_or_else(|| {
            RuntimeError::from(
                Diagnostic::runtime(format!("Undefined variable ${name}")).with_span(span),
            )
        })
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Moves the value out, leaving `null` in place so the slot keeps its
    /// position. Lets in-place array writes avoid a copy.
    pub fn take(&mut self, name: &str) -> Option<Value> {
        self.bindings
            .get_mut(name)
            .map(|slot| std::mem::replace(slot, Value::null()))
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.bindings.shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn bindings(&self) -> &IndexMap<String, Value> {
        &self.bindings
    }
}
