//! Built-in symbol sets installed into every fresh [`Vm`].
//!
//! A [`Library`] is a stateless description. Each call to [`Library::load`]
//! stages its functions, classes, constants and namespaces into a
//! [`LibraryScope`], and the [`Registrar`] commits them only when the whole
//! library loaded cleanly. State a native function needs is created inside
//! `load` and captured by its closure, so it lives and dies with one VM.

pub mod php;
pub mod standard;
pub mod system;

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    path::Path,
    rc::Rc,
    sync::Arc,
};

use indexmap::IndexMap;
use thiserror::Error;

use crate::{
    classpath::{canonical_namespace, LoadableDefinition, ResolverMode},
    config::{MAX_ARRAY_LEN, MAX_STRING_LEN},
    engine::panic_message,
    runtime::{Context, RuntimeError},
    value::{ArrayKey, ArrayValue, Arity, NativeFunction, Number, Value, ValueKind},
    vm::{fold, Callable, ClassDef, Vm},
};

pub use php::PhpLibrary;
pub use standard::StandardLibrary;
pub use system::SystemLibrary;

pub trait Library: Send + Sync {
    fn name(&self) -> &'static str;

    fn load(&self, scope: &mut LibraryScope<'_>) -> Result<(), RegistrationError>;
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("`{0}` is already defined")]
    Duplicate(String),
    #[error("invalid namespace `{0}`")]
    InvalidNamespace(String),
    #[error("library panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Failed(String),
}

/// A library's view of the VM being built.
pub struct LibraryScope<'vm> {
    vm: &'vm Vm,
    staged: Staged,
    conflicts: Vec<String>,
}

#[derive(Default)]
struct Staged {
    functions: IndexMap<String, Callable>,
    classes: IndexMap<String, Rc<ClassDef>>,
    constants: IndexMap<String, Value>,
    variables: IndexMap<String, Value>,
    namespaces: IndexMap<String, Vec<String>>,
}

impl<'vm> LibraryScope<'vm> {
    fn new(vm: &'vm Vm) -> Self {
        Self {
            vm,
            staged: Staged::default(),
            conflicts: Vec::new(),
        }
    }

    pub fn resolver_mode(&self) -> &ResolverMode {
        self.vm.parser().resolver().mode()
    }

    /// Filesystem root of the resolver, if it has one.
    pub fn root(&self) -> Option<&Path> {
        self.resolver_mode().root()
    }

    pub fn function<F>(&mut self, name: &str, arity: Arity, callback: F) -> &mut Self
    where
        F: Fn(&mut Context<'_>, &[Value]) -> Result<Value, RuntimeError> + 'static,
    {
        let key = fold(name);
        if self.vm.globals().functions.contains_key(&key) || self.staged.functions.contains_key(&key) {
            self.conflicts.push(format!("function {name}()"));
            return self;
        }
        let native = NativeFunction::new(name, arity, callback);
        self.staged.functions.insert(key, Callable::Native(native));
        self
    }

    /// Stages `class` and returns it so later classes can extend it.
    pub fn define_class(&mut self, class: ClassDef) -> Rc<ClassDef> {
        let key = fold(&class.name);
        if self.vm.globals().classes.contains_key(&key) || self.staged.classes.contains_key(&key) {
            self.conflicts.push(format!("class {}", class.name));
        }
        let class = Rc::new(class);
        self.staged.classes.entry(key).or_insert_with(|| Rc::clone(&class));
        class
    }

    /// A class staged by this library or registered by an earlier one.
    pub fn find_class(&self, name: &str) -> Option<Rc<ClassDef>> {
        let key = fold(name);
        self.staged
            .classes
            .get(&key)
            .or_else(|| self.vm.globals().classes.get(&key))
            .cloned()
    }

    pub fn constant(&mut self, name: &str, value: Value) -> &mut Self {
        if self.vm.globals().constants.contains_key(name) || self.staged.constants.contains_key(name) {
            self.conflicts.push(format!("constant {name}"));
            return self;
        }
        self.staged.constants.insert(name.to_string(), value);
        self
    }

    /// Seeds a global variable visible to the script's top level.
    pub fn variable(&mut self, name: &str, value: Value) -> &mut Self {
        if self.vm.globals().variables.contains_key(name) || self.staged.variables.contains_key(name) {
            self.conflicts.push(format!("variable ${name}"));
            return self;
        }
        self.staged.variables.insert(name.to_string(), value);
        self
    }

    /// Opens a namespace importable with `use`; symbols added through the
    /// returned builder are prefixed with it.
    pub fn namespace(&mut self, namespace: &str) -> Result<NamespaceBuilder<'_, 'vm>, RegistrationError> {
        let namespace = canonical_namespace(namespace)
            .ok_or_else(|| RegistrationError::InvalidNamespace(namespace.to_string()))?;
        if self.vm.parser().resolver().is_registered(&namespace) {
            self.conflicts.push(format!("namespace {namespace}"));
        }
        self.staged.namespaces.entry(namespace.clone()).or_default();
        Ok(NamespaceBuilder {
            scope: self,
            namespace,
        })
    }

    fn finish(self) -> Result<Staged, RegistrationError> {
        match self.conflicts.into_iter().next() {
            Some(conflict) => Err(RegistrationError::Duplicate(conflict)),
            None => Ok(self.staged),
        }
    }
}

pub struct NamespaceBuilder<'s, 'vm> {
    scope: &'s mut LibraryScope<'vm>,
    namespace: String,
}

impl NamespaceBuilder<'_, '_> {
    pub fn function<F>(&mut self, name: &str, arity: Arity, callback: F) -> &mut Self
    where
        F: Fn(&mut Context<'_>, &[Value]) -> Result<Value, RuntimeError> + 'static,
    {
        let qualified = format!("{}\\{name}", self.namespace);
        self.scope.function(&qualified, arity, callback);
        self.record(name);
        self
    }

    pub fn constant(&mut self, name: &str, value: Value) -> &mut Self {
        let qualified = format!("{}\\{name}", self.namespace);
        self.scope.constant(&qualified, value);
        self.record(name);
        self
    }

    fn record(&mut self, name: &str) {
        if let Some(symbols) = self.scope.staged.namespaces.get_mut(&self.namespace) {
            symbols.push(name.to_string());
        }
    }
}

impl Staged {
    fn commit(self, vm: &mut Vm) {
        let globals = vm.globals_mut();
        globals.functions.extend(self.functions);
        globals.classes.extend(self.classes);
        globals.constants.extend(self.constants);
        globals.variables.extend(self.variables);
        for (namespace, symbols) in self.namespaces {
            let definition = LoadableDefinition::Library {
                namespace: namespace.clone(),
                symbols: symbols.clone(),
            };
            if let Err(err) = vm.parser_mut().resolver_mut().register(&namespace, definition) {
                tracing::warn!(%namespace, %err, "namespace not importable");
                continue;
            }
            vm.globals_mut().namespaces.insert(namespace, symbols);
        }
    }
}

/// Ordered set of libraries installed into each VM.
#[derive(Clone)]
pub struct Registrar {
    libraries: Vec<Arc<dyn Library>>,
}

impl Registrar {
    pub fn empty() -> Self {
        Self {
            libraries: Vec::new(),
        }
    }

    /// `std`, `php` and `system`, in that order.
    pub fn standard() -> Self {
        Self::empty()
            .with(StandardLibrary)
            .with(PhpLibrary)
            .with(SystemLibrary)
    }

    pub fn with(mut self, library: impl Library + 'static) -> Self {
        self.libraries.push(Arc::new(library));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.libraries.iter().map(|library| library.name()).collect()
    }

    /// Loads every library into `vm`. A library that fails, panics or
    /// collides with an existing symbol contributes nothing.
    pub fn install(&self, vm: &mut Vm) {
        for library in &self.libraries {
            let name = library.name();
            let staged = {
                let mut scope = LibraryScope::new(vm);
                let loaded = panic::catch_unwind(AssertUnwindSafe(|| library.load(&mut scope)));
                match loaded {
                    Ok(Ok(())) => scope.finish(),
                    Ok(Err(err)) => Err(err),
                    Err(payload) => Err(RegistrationError::Panicked(panic_message(payload.as_ref()))),
                }
            };
            match staged {
                Ok(staged) => {
                    staged.commit(vm);
                    vm.record_library(name);
                    tracing::debug!(library = name, "library loaded");
                }
                Err(err) => tracing::warn!(library = name, %err, "library dropped"),
            }
        }
    }
}

impl Default for Registrar {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for Registrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

type NativeResult = Result<Value, RuntimeError>;

fn type_error(function: &str, index: usize, expected: &str, given: &Value) -> RuntimeError {
    RuntimeError::message(format!(
        "{function}(): Argument #{} must be of type {expected}, {} given",
        index + 1,
        given.describe()
    ))
}

/// Optional argument, `null` when omitted.
pub(crate) fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_else(Value::null)
}

pub(crate) fn expect_string(
    ctx: &mut Context<'_>,
    function: &str,
    args: &[Value],
    index: usize,
) -> Result<String, RuntimeError> {
    let value = arg(args, index);
    match value.kind() {
        ValueKind::Array(_) | ValueKind::Closure(_) | ValueKind::Native(_) => {
            Err(type_error(function, index, "string", &value))
        }
        _ => ctx.to_string_value(&value),
    }
}

pub(crate) fn expect_array<'a>(
    function: &str,
    args: &'a [Value],
    index: usize,
) -> Result<&'a ArrayValue, RuntimeError> {
    match args.get(index) {
        Some(value) => value
            .as_array()
            .ok_or_else(|| type_error(function, index, "array", value)),
        None => Err(type_error(function, index, "array", &Value::null())),
    }
}

pub(crate) fn expect_number(function: &str, args: &[Value], index: usize) -> Result<Number, RuntimeError> {
    let value = arg(args, index);
    match value.kind() {
        ValueKind::Null | ValueKind::Bool(_) | ValueKind::Int(_) | ValueKind::Float(_) | ValueKind::String(_) => {
            value
                .to_number()
                .ok_or_else(|| type_error(function, index, "int|float", &value))
        }
        _ => Err(type_error(function, index, "int|float", &value)),
    }
}

pub(crate) fn expect_int(function: &str, args: &[Value], index: usize) -> Result<i64, RuntimeError> {
    Ok(match expect_number(function, args, index)? {
        Number::Int(n) => n,
        Number::Float(f) => crate::value::float_to_int(f),
    })
}

pub(crate) fn expect_callable(
    ctx: &Context<'_>,
    function: &str,
    args: &[Value],
    index: usize,
) -> Result<Value, RuntimeError> {
    let value = arg(args, index);
    if ctx.is_callable(&value) {
        Ok(value)
    } else {
        Err(RuntimeError::message(format!(
            "{function}(): Argument #{} must be a valid callback",
            index + 1
        )))
    }
}

/// Length in code points.
/// Checks the byte length a string builder is about to allocate. `None`
/// means the length already overflowed `usize`.
pub(crate) fn ensure_string_len(function: &str, len: Option<usize>) -> Result<usize, RuntimeError> {
    match len {
        Some(len) if len <= MAX_STRING_LEN => Ok(len),
        _ => Err(RuntimeError::limit(format!(
            "{function}(): Result string exceeds the maximum length of {MAX_STRING_LEN} bytes"
        ))),
    }
}

fn ensure_array_len(function: &str, len: Option<u64>) -> Result<u64, RuntimeError> {
    match len {
        Some(len) if len <= MAX_ARRAY_LEN => Ok(len),
        _ => Err(RuntimeError::limit(format!(
            "{function}(): The supplied range exceeds the maximum array size"
        ))),
    }
}

pub(crate) fn char_count(text: &str) -> i64 {
    text.chars().count() as i64
}

/// Extremum of the arguments, or of a single array argument.
pub(crate) fn extremum(function: &str, args: &[Value], wanted: std::cmp::Ordering) -> NativeResult {
    let candidates: Vec<Value> = match args {
        [single] => match single.as_array() {
            Some(array) => array.values().cloned().collect(),
            None => return Err(type_error(function, 0, "array", single)),
        },
        _ => args.to_vec(),
    };
    let mut best: Option<Value> = None;
    for candidate in candidates {
        best = match best {
            Some(current) if candidate.compare(&current) != Some(wanted) => Some(current),
            _ => Some(candidate),
        };
    }
    best.ok_or_else(|| {
        RuntimeError::message(format!(
            "{function}(): Argument #1 ($value) must contain at least one element"
        ))
    })
}

/// `range()` for integer, float and single-character bounds.
pub(crate) fn range(function: &str, args: &[Value]) -> NativeResult {
    let (start, end) = (arg(args, 0), arg(args, 1));
    if let (Some(a), Some(b)) = (start.as_str(), end.as_str()) {
        let (mut a_chars, mut b_chars) = (a.chars(), b.chars());
        if let (Some(a), None, Some(b), None) = (a_chars.next(), a_chars.next(), b_chars.next(), b_chars.next()) {
            if !a.is_ascii_digit() || !b.is_ascii_digit() {
                let (low, high) = (a as u32, b as u32);
                let codes: Vec<u32> = if low <= high {
                    (low..=high).collect()
                } else {
                    (high..=low).rev().collect()
                };
                return Ok(Value::list(
                    codes
                        .into_iter()
                        .filter_map(char::from_u32)
                        .map(|ch| Value::string(ch.to_string())),
                ));
            }
        }
    }
    let first = expect_number(function, args, 0)?;
    let last = expect_number(function, args, 1)?;
    let step = match args.get(2) {
        Some(_) => expect_number(function, args, 2)?,
        None => Number::Int(1),
    };
    if step.as_f64() == 0.0 {
        return Err(RuntimeError::message(format!(
            "{function}(): Argument #3 ($step) cannot be 0"
        )));
    }
    match (first, last, step) {
        (Number::Int(a), Number::Int(b), Number::Int(step)) => {
            let step = step.unsigned_abs();
            let count = ensure_array_len(function, (a.abs_diff(b) / step).checked_add(1))?;
            let values = (0..count).map(|i| {
                let offset = (i * step) as i128;
                let value = if a <= b { a as i128 + offset } else { a as i128 - offset };
                Value::int(value as i64)
            });
            Ok(Value::list(values))
        }
        _ => {
            let (a, b, step) = (first.as_f64(), last.as_f64(), step.as_f64().abs());
            if !a.is_finite() || !b.is_finite() || !step.is_finite() {
                return Err(RuntimeError::message(format!(
                    "{function}(): Arguments must be finite numbers"
                )));
            }
            let span = ((a - b).abs() / step).floor();
            let count = if span < MAX_ARRAY_LEN as f64 {
                ensure_array_len(function, (span as u64).checked_add(1))?
            } else {
                ensure_array_len(function, None)?
            };
            let values = (0..count).map(|i| {
                let offset = i as f64 * step;
                Value::float(if a <= b { a + offset } else { a - offset })
            });
            Ok(Value::list(values))
        }
    }
}

/// Calls `callback` for each element; the shared core of `map` and
/// `array_map`.
pub(crate) fn map_array(ctx: &mut Context<'_>, callback: &Value, array: &ArrayValue) -> NativeResult {
    let list = array.is_list();
    let mut mapped = ArrayValue::new();
    for (key, value) in array.iter() {
        let result = ctx.call_value(callback, vec![value.clone()])?;
        if list {
            mapped.push(result);
        } else {
            mapped.insert(key.clone(), result);
        }
    }
    Ok(Value::array(mapped))
}

/// Keeps entries for which `callback` (or truthiness, without one) holds.
/// Keys are preserved.
pub(crate) fn filter_array(ctx: &mut Context<'_>, callback: Option<&Value>, array: &ArrayValue) -> NativeResult {
    let mut kept = ArrayValue::new();
    for (key, value) in array.iter() {
        let keep = match callback {
            Some(callback) => ctx.call_value(callback, vec![value.clone()])?.is_truthy(),
            None => value.is_truthy(),
        };
        if keep {
            kept.insert(key.clone(), value.clone());
        }
    }
    Ok(Value::array(kept))
}

pub(crate) fn reduce_array(
    ctx: &mut Context<'_>,
    callback: &Value,
    array: &ArrayValue,
    initial: Value,
) -> NativeResult {
    let mut carry = initial;
    for value in array.values() {
        carry = ctx.call_value(callback, vec![carry, value.clone()])?;
    }
    Ok(carry)
}

pub(crate) fn sum_array(array: &ArrayValue) -> Value {
    let mut total = Number::Int(0);
    for value in array.values() {
        let number = value.to_number().unwrap_or(Number::Int(0));
        total = match (total, number) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_add(b)
                .map(Number::Int)
                .unwrap_or(Number::Float(a as f64 + b as f64)),
            (a, b) => Number::Float(a.as_f64() + b.as_f64()),
        };
    }
    total.into_value()
}

/// Reverses entry order; integer keys are renumbered, string keys kept.
pub(crate) fn reverse_array(array: &ArrayValue) -> Value {
    let mut reversed = ArrayValue::new();
    let entries: Vec<_> = array.iter().collect();
    for (key, value) in entries.into_iter().rev() {
        match key {
            ArrayKey::Int(_) => reversed.push(value.clone()),
            ArrayKey::String(_) => reversed.insert(key.clone(), value.clone()),
        }
    }
    Value::array(reversed)
}

pub(crate) fn contains_value(array: &ArrayValue, needle: &Value, strict: bool) -> bool {
    array.values().any(|value| {
        if strict {
            value.strict_equals(needle)
        } else {
            value.loose_equals(needle)
        }
    })
}
