use std::{cell::RefCell, cmp::Ordering, fmt, rc::Rc};

use indexmap::IndexMap;

use crate::{
    ast::FunctionDecl,
    runtime::{Context, RuntimeError},
    vm::ClassDef,
};

#[derive(Clone)]
pub struct Value(pub Rc<ValueKind>);

#[derive(Clone)]
pub enum ValueKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(ArrayValue),
    Object(ObjectRef),
    Closure(Closure),
    Native(NativeFunction),
}

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Self(Rc::new(kind))
    }

    pub fn null() -> Self {
        Self::new(ValueKind::Null)
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ValueKind::Bool(value))
    }

    pub fn int(value: i64) -> Self {
        Self::new(ValueKind::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new(ValueKind::Float(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ValueKind::String(value.into()))
    }

    pub fn array(array: ArrayValue) -> Self {
        Self::new(ValueKind::Array(array))
    }

    pub fn list(values: impl IntoIterator<Item = Value>) -> Self {
        Self::array(values.into_iter().collect())
    }

    pub fn object(object: Object) -> Self {
        Self::new(ValueKind::Object(Rc::new(RefCell::new(object))))
    }

    pub fn native(function: NativeFunction) -> Self {
        Self::new(ValueKind::Native(function))
    }

    pub fn kind(&self) -> &ValueKind {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        matches!(&*self.0, ValueKind::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &*self.0 {
            ValueKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayValue> {
        match &*self.0 {
            ValueKind::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match &*self.0 {
            ValueKind::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn is_callable_value(&self) -> bool {
        matches!(&*self.0, ValueKind::Closure(_) | ValueKind::Native(_))
    }

    pub fn type_name(&self) -> &'static str {
        match &*self.0 {
            ValueKind::Null => "null",
            ValueKind::Bool(_) => "bool",
            ValueKind::Int(_) => "int",
            ValueKind::Float(_) => "float",
            ValueKind::String(_) => "string",
            ValueKind::Array(_) => "array",
            ValueKind::Object(_) => "object",
            ValueKind::Closure(_) | ValueKind::Native(_) => "Closure",
        }
    }

    /// Type name as reported in messages: the class name for objects.
    pub fn describe(&self) -> String {
        match &*self.0 {
            ValueKind::Object(object) => object.borrow().class.name.clone(),
            _ => self.type_name().to_string(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match &*self.0 {
            ValueKind::Null => false,
            ValueKind::Bool(b) => *b,
            ValueKind::Int(n) => *n != 0,
            ValueKind::Float(f) => *f != 0.0,
            ValueKind::String(s) => !(s.is_empty() || s == "0"),
            ValueKind::Array(array) => !array.is_empty(),
            ValueKind::Object(_) | ValueKind::Closure(_) | ValueKind::Native(_) => true,
        }
    }

    /// Numeric view used by arithmetic: `null`, bools, numbers and numeric strings.
    pub fn to_number(&self) -> Option<Number> {
        match &*self.0 {
            ValueKind::Null => Some(Number::Int(0)),
            ValueKind::Bool(b) => Some(Number::Int(i64::from(*b))),
            ValueKind::Int(n) => Some(Number::Int(*n)),
            ValueKind::Float(f) => Some(Number::Float(*f)),
            ValueKind::String(s) => parse_numeric(s),
            _ => None,
        }
    }

    pub fn to_int(&self) -> i64 {
        match &*self.0 {
            ValueKind::String(s) => match leading_number(s) {
                Some(Number::Int(n)) => n,
                Some(Number::Float(f)) => float_to_int(f),
                None => 0,
            },
            ValueKind::Array(array) => i64::from(!array.is_empty()),
            ValueKind::Object(_) | ValueKind::Closure(_) | ValueKind::Native(_) => 1,
            _ => match self.to_number() {
                Some(Number::Int(n)) => n,
                Some(Number::Float(f)) => float_to_int(f),
                None => 0,
            },
        }
    }

    pub fn to_float(&self) -> f64 {
        match &*self.0 {
            ValueKind::String(s) => leading_number(s).map(Number::as_f64).unwrap_or(0.0),
            ValueKind::Float(f) => *f,
            _ => self.to_int() as f64,
        }
    }

    /// String conversion for scalars; `None` for arrays, objects and callables,
    /// which need the runtime (`__toString`) or cannot be converted.
    pub fn scalar_string(&self) -> Option<String> {
        match &*self.0 {
            ValueKind::Null => Some(String::new()),
            ValueKind::Bool(true) => Some("1".to_string()),
            ValueKind::Bool(false) => Some(String::new()),
            ValueKind::Int(n) => Some(n.to_string()),
            ValueKind::Float(f) => Some(format_float(*f)),
            ValueKind::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Whether [`Value::render`] produces a string for this value.
    pub fn renderable(&self) -> bool {
        self.render().is_some()
    }

    /// Canonical rendering handed to the host.
    pub fn render(&self) -> Option<String> {
        match &*self.0 {
            ValueKind::Int(n) => Some(n.to_string()),
            ValueKind::Float(f) => Some(format_float(*f)),
            ValueKind::String(s) => Some(s.clone()),
            ValueKind::Bool(b) => Some(b.to_string()),
            ValueKind::Array(array) => render_array(array),
            ValueKind::Null
            | ValueKind::Object(_)
            | ValueKind::Closure(_)
            | ValueKind::Native(_) => None,
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (&*self.0, &*other.0) {
            (ValueKind::Null, ValueKind::Null) => true,
            (ValueKind::Bool(a), ValueKind::Bool(b)) => a == b,
            (ValueKind::Int(a), ValueKind::Int(b)) => a == b,
            (ValueKind::Float(a), ValueKind::Float(b)) => a == b,
            (ValueKind::String(a), ValueKind::String(b)) => a == b,
            (ValueKind::Array(a), ValueKind::Array(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.strict_equals(vb))
            }
            (ValueKind::Object(a), ValueKind::Object(b)) => Rc::ptr_eq(a, b),
            (ValueKind::Closure(a), ValueKind::Closure(b)) => Rc::ptr_eq(&a.function, &b.function),
            (ValueKind::Native(a), ValueKind::Native(b)) => Rc::ptr_eq(&a.callback, &b.callback),
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (&*self.0, &*other.0) {
            (ValueKind::Null | ValueKind::Bool(_), _) | (_, ValueKind::Null | ValueKind::Bool(_)) => {
                self.is_truthy() == other.is_truthy()
            }
            (ValueKind::String(a), ValueKind::String(b)) => {
                match (parse_numeric(a), parse_numeric(b)) {
                    (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
                    _ => a == b,
                }
            }
            (ValueKind::Int(_) | ValueKind::Float(_), ValueKind::String(s))
            | (ValueKind::String(s), ValueKind::Int(_) | ValueKind::Float(_)) => {
                let number = if matches!(&*self.0, ValueKind::String(_)) {
                    other
                } else {
                    self
                };
                match parse_numeric(s) {
                    Some(parsed) => number.to_float() == parsed.as_f64(),
                    None => number.scalar_string().as_deref() == Some(s.as_str()),
                }
            }
            (ValueKind::Int(a), ValueKind::Int(b)) => a == b,
            (ValueKind::Int(_) | ValueKind::Float(_), ValueKind::Int(_) | ValueKind::Float(_)) => {
                self.to_float() == other.to_float()
            }
            (ValueKind::Array(a), ValueKind::Array(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(key, value)| {
                        b.get(key)
                            .map(|other| value.loose_equals(other))
                            .unwrap_or(false)
                    })
            }
            (ValueKind::Object(a), ValueKind::Object(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                Rc::ptr_eq(&a.class, &b.class)
                    && a.properties.len() == b.properties.len()
                    && a.properties.iter().all(|(name, value)| {
                        b.properties
                            .get(name)
                            .map(|other| value.loose_equals(other))
                            .unwrap_or(false)
                    })
            }
            _ => self.strict_equals(other),
        }
    }

    /// Ordering used by `<`, `<=`, `>`, `>=` and sorting; `None` when the
    /// operands are not comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (&*self.0, &*other.0) {
            (ValueKind::Null | ValueKind::Bool(_), _) | (_, ValueKind::Null | ValueKind::Bool(_)) => {
                Some(self.is_truthy().cmp(&other.is_truthy()))
            }
            (ValueKind::String(a), ValueKind::String(b)) => {
                match (parse_numeric(a), parse_numeric(b)) {
                    (Some(x), Some(y)) => x.as_f64().partial_cmp(&y.as_f64()),
                    _ => Some(a.cmp(b)),
                }
            }
            (ValueKind::Array(a), ValueKind::Array(b)) => match a.len().cmp(&b.len()) {
                Ordering::Equal if self.loose_equals(other) => Some(Ordering::Equal),
                Ordering::Equal => None,
                ordering => Some(ordering),
            },
            _ => match (self.to_number(), other.to_number()) {
                (Some(Number::Int(a)), Some(Number::Int(b))) => Some(a.cmp(&b)),
                (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()),
                _ => match (self.scalar_string(), other.scalar_string()) {
                    (Some(a), Some(b)) => Some(a.cmp(&b)),
                    _ => None,
                },
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ValueKind::Null => write!(f, "null"),
            ValueKind::Bool(b) => write!(f, "{b}"),
            ValueKind::Int(n) => write!(f, "{n}"),
            ValueKind::Float(n) => write!(f, "{}", format_float(*n)),
            ValueKind::String(s) => write!(f, "{s:?}"),
            ValueKind::Array(array) => f
                .debug_map()
                .entries(array.iter().map(|(key, value)| (key.to_string(), value)))
                .finish(),
            ValueKind::Object(object) => write!(f, "<object {}>", object.borrow().class.name),
            ValueKind::Closure(closure) => write!(f, "<closure {}>", closure.function.name),
            ValueKind::Native(native) => write!(f, "<native fn {}>", native.name),
        }
    }
}

impl From<ArrayValue> for Value {
    fn from(array: ArrayValue) -> Self {
        Value::array(array)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(f) => f,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Number::Int(n) => Value::int(n),
            Number::Float(f) => Value::float(f),
        }
    }
}

/// Whole-string numeric parse; surrounding whitespace is allowed.
pub fn parse_numeric(text: &str) -> Option<Number> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let unsigned = trimmed.strip_prefix(['+', '-']).unwrap_or(trimmed);
    if unsigned.is_empty()
        || !unsigned
            .chars()
            .all(|ch| ch.is_ascii_digit() || matches!(ch, '.' | 'e' | 'E' | '+' | '-'))
        || !unsigned.starts_with(|ch: char| ch.is_ascii_digit() || ch == '.')
    {
        return None;
    }
    if unsigned.chars().all(|ch| ch.is_ascii_digit()) {
        if let Ok(n) = trimmed.parse::<i64>() {
            return Some(Number::Int(n));
        }
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Number::Float)
}

/// Longest numeric prefix, as `(int)"12abc"` uses.
fn leading_number(text: &str) -> Option<Number> {
    let trimmed = text.trim_start();
    let mut end = 0;
    for (idx, _) in trimmed.char_indices().chain(std::iter::once((trimmed.len(), ' '))) {
        if idx > 0 && parse_numeric(&trimmed[..idx]).is_some() {
            end = idx;
        }
    }
    parse_numeric(&trimmed[..end])
}

pub fn float_to_int(value: f64) -> i64 {
    if value.is_finite() && value >= i64::MIN as f64 && value <= i64::MAX as f64 {
        value as i64
    } else {
        0
    }
}

/// Shortest round-trip form; integral floats drop the fraction.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "NAN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-5..1e15).contains(&magnitude) {
        let formatted = format!("{value:e}");
        let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let mantissa = if mantissa.contains('.') {
            mantissa.to_string()
        } else {
            format!("{mantissa}.0")
        };
        let exponent = match exponent.strip_prefix('-') {
            Some(digits) => format!("-{digits}"),
            None => format!("+{exponent}"),
        };
        return format!("{mantissa}E{exponent}");
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    format!("{value}")
}

fn render_array(array: &ArrayValue) -> Option<String> {
    let list = array.is_list();
    let mut parts = Vec::with_capacity(array.len());
    for (key, value) in array.iter() {
        let rendered = render_element(value)?;
        if list {
            parts.push(rendered);
        } else {
            let key = match key {
                ArrayKey::Int(n) => n.to_string(),
                ArrayKey::String(s) => quote(s),
            };
            parts.push(format!("{key} => {rendered}"));
        }
    }
    Some(format!("[{}]", parts.join(", ")))
}

fn render_element(value: &Value) -> Option<String> {
    match &*value.0 {
        ValueKind::Null => Some("null".to_string()),
        ValueKind::String(s) => Some(quote(s)),
        _ => value.render(),
    }
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArrayKey {
    Int(i64),
    String(String),
}

impl ArrayKey {
    /// Decimal integer strings become integer keys, as in `$a["1"]`.
    pub fn from_string(key: String) -> Self {
        let digits = key.strip_prefix('-').unwrap_or(&key);
        let canonical = !digits.is_empty()
            && digits.chars().all(|ch| ch.is_ascii_digit())
            && (digits == "0" || !digits.starts_with('0'))
            && key != "-0";
        if canonical {
            if let Ok(n) = key.parse::<i64>() {
                return ArrayKey::Int(n);
            }
        }
        ArrayKey::String(key)
    }

    /// Key a value is stored under; `None` for arrays, objects and callables.
    pub fn from_value(value: &Value) -> Option<Self> {
        match &*value.0 {
            ValueKind::Int(n) => Some(ArrayKey::Int(*n)),
            ValueKind::String(s) => Some(ArrayKey::from_string(s.clone())),
            ValueKind::Bool(b) => Some(ArrayKey::Int(i64::from(*b))),
            ValueKind::Float(f) => Some(ArrayKey::Int(float_to_int(*f))),
            ValueKind::Null => Some(ArrayKey::String(String::new())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            ArrayKey::Int(n) => Value::int(*n),
            ArrayKey::String(s) => Value::string(s.clone()),
        }
    }
}

impl fmt::Display for ArrayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayKey::Int(n) => write!(f, "{n}"),
            ArrayKey::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for ArrayKey {
    fn from(key: &str) -> Self {
        ArrayKey::from_string(key.to_string())
    }
}

impl From<i64> for ArrayKey {
    fn from(key: i64) -> Self {
        ArrayKey::Int(key)
    }
}

/// Ordered array with value semantics; copies happen on write through `Rc`.
#[derive(Clone, Default)]
pub struct ArrayValue {
    entries: IndexMap<ArrayKey, Value>,
    next_index: i64,
}

impl ArrayValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &ArrayKey) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &ArrayKey) -> Option<&mut Value> {
        self.entries.get_mut(key)
    }

    pub fn contains_key(&self, key: &ArrayKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: ArrayKey, value: Value) {
        if let ArrayKey::Int(n) = key {
            if n >= self.next_index {
                self.next_index = n.saturating_add(1);
            }
        }
        self.entries.insert(key, value);
    }

    pub fn push(&mut self, value: Value) {
        let key = ArrayKey::Int(self.next_index);
        self.insert(key, value);
    }

    pub fn remove(&mut self, key: &ArrayKey) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    pub fn pop(&mut self) -> Option<Value> {
        let (_, value) = self.entries.pop()?;
        self.next_index = self
            .entries
            .keys()
            .filter_map(|key| match key {
                ArrayKey::Int(n) => Some(n.saturating_add(1)),
                ArrayKey::String(_) => None,
            })
            .max()
            .unwrap_or(0);
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArrayKey, &Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ArrayKey> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }

    /// Keys are exactly `0..len` in order.
    pub fn is_list(&self) -> bool {
        self.entries
            .keys()
            .enumerate()
            .all(|(idx, key)| matches!(key, ArrayKey::Int(n) if *n == idx as i64))
    }
}

impl FromIterator<Value> for ArrayValue {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        let mut array = ArrayValue::new();
        for value in iter {
            array.push(value);
        }
        array
    }
}

impl FromIterator<(ArrayKey, Value)> for ArrayValue {
    fn from_iter<T: IntoIterator<Item = (ArrayKey, Value)>>(iter: T) -> Self {
        let mut array = ArrayValue::new();
        for (key, value) in iter {
            array.insert(key, value);
        }
        array
    }
}

pub type ObjectRef = Rc<RefCell<Object>>;

pub struct Object {
    pub class: Rc<ClassDef>,
    pub properties: IndexMap<String, Value>,
}

impl Object {
    pub fn new(class: Rc<ClassDef>) -> Self {
        Self {
            class,
            properties: IndexMap::new(),
        }
    }
}

/// Function value created by `function () use (...) {}` or `fn () =>`.
#[derive(Clone)]
pub struct Closure {
    pub function: Rc<FunctionDecl>,
    pub bound: IndexMap<String, Value>,
    pub this: Option<Value>,
    pub scope: Option<Rc<ClassDef>>,
}

pub type NativeCallback = Rc<dyn Fn(&mut Context<'_>, &[Value]) -> Result<Value, RuntimeError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Range(usize, usize),
    AtLeast(usize),
}

impl Arity {
    pub fn check(self, name: &str, given: usize) -> Result<(), RuntimeError> {
        let (ok, expected) = match self {
            Arity::Exact(n) => (given == n, format!("exactly {n}")),
            Arity::Range(min, _) if given < min => (false, format!("at least {min}")),
            Arity::Range(_, max) => (given <= max, format!("at most {max}")),
            Arity::AtLeast(min) => (given >= min, format!("at least {min}")),
        };
        if ok {
            return Ok(());
        }
        let noun = if expected.ends_with(" 1") {
            "argument"
        } else {
            "arguments"
        };
        Err(RuntimeError::message(format!(
            "{name}() expects {expected} {noun}, {given} given"
        )))
    }
}

#[derive(Clone)]
pub struct NativeFunction {
    pub name: String,
    pub arity: Arity,
    pub callback: NativeCallback,
}

impl NativeFunction {
    pub fn new<F>(name: impl Into<String>, arity: Arity, callback: F) -> Self
    where
        F: Fn(&mut Context<'_>, &[Value]) -> Result<Value, RuntimeError> + 'static,
    {
        Self {
            name: name.into(),
            arity,
            callback: Rc::new(callback),
        }
    }

    pub fn call(&self, ctx: &mut Context<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
        self.arity.check(&self.name, args.len())?;
        (self.callback)(ctx, args)
    }
}
