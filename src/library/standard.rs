//! The `std` library: output helpers, the exception hierarchy and the
//! `std\math`, `std\string` and `std\array` namespaces.

use std::{cmp::Ordering, f64::consts};

use crate::{
    runtime::{Context, RuntimeError},
    value::{ArrayKey, ArrayValue, Arity, NativeFunction, Number, ObjectRef, Value, ValueKind},
    vm::ClassDef,
};

use super::{
    arg, char_count, contains_value, ensure_string_len, expect_array, expect_callable, expect_int,
    expect_number, expect_string, extremum, filter_array, map_array, range, reduce_array, reverse_array,
    sum_array, Library, LibraryScope, NativeResult, RegistrationError,
};

pub struct StandardLibrary;

impl Library for StandardLibrary {
    fn name(&self) -> &'static str {
        "std"
    }

    fn load(&self, scope: &mut LibraryScope<'_>) -> Result<(), RegistrationError> {
        scope
            .function("print", Arity::AtLeast(0), io_print)
            .function("println", Arity::AtLeast(0), io_println)
            .function("type_of", Arity::Exact(1), type_of)
            .function("len", Arity::Exact(1), collections_len);

        install_exceptions(scope);

        scope
            .namespace("std\\math")?
            .function("abs", Arity::Exact(1), math_abs)
            .function("floor", Arity::Exact(1), math_floor)
            .function("ceil", Arity::Exact(1), math_ceil)
            .function("sqrt", Arity::Exact(1), math_sqrt)
            .function("round", Arity::Range(1, 2), math_round)
            .function("pow", Arity::Exact(2), math_pow)
            .function("max", Arity::AtLeast(1), math_max)
            .function("min", Arity::AtLeast(1), math_min)
            .function("intdiv", Arity::Exact(2), math_intdiv)
            .constant("PI", Value::float(consts::PI))
            .constant("E", Value::float(consts::E));

        scope
            .namespace("std\\string")?
            .function("len", Arity::Exact(1), string_len)
            .function("upper", Arity::Exact(1), string_upper)
            .function("lower", Arity::Exact(1), string_lower)
            .function("trim", Arity::Exact(1), string_trim)
            .function("split", Arity::Exact(2), string_split)
            .function("join", Arity::Exact(2), string_join)
            .function("replace", Arity::Exact(3), string_replace)
            .function("starts_with", Arity::Exact(2), string_starts_with)
            .function("ends_with", Arity::Exact(2), string_ends_with)
            .function("contains", Arity::Exact(2), string_contains)
            .function("repeat", Arity::Exact(2), string_repeat)
            .function("reverse", Arity::Exact(1), string_reverse);

        scope
            .namespace("std\\array")?
            .function("len", Arity::Exact(1), collections_len)
            .function("push", Arity::AtLeast(2), collections_push)
            .function("pop", Arity::Exact(1), collections_pop)
            .function("keys", Arity::Exact(1), collections_keys)
            .function("values", Arity::Exact(1), collections_values)
            .function("range", Arity::Range(2, 3), collections_range)
            .function("map", Arity::Exact(2), collections_map)
            .function("filter", Arity::Range(1, 2), collections_filter)
            .function("reduce", Arity::Range(2, 3), collections_reduce)
            .function("contains", Arity::Exact(2), collections_contains)
            .function("sum", Arity::Exact(1), collections_sum)
            .function("reverse", Arity::Exact(1), collections_reverse)
            .function("sort", Arity::Range(1, 2), collections_sort);

        Ok(())
    }
}

/// `Exception` and its subclasses. Script classes extend these like any
/// other class.
fn install_exceptions(scope: &mut LibraryScope<'_>) {
    let exception = scope.define_class(
        ClassDef::new("Exception", None)
            .with_property("message", Value::string(""))
            .with_property("code", Value::int(0))
            .with_property("previous", Value::null())
            .with_method(NativeFunction::new(
                "__construct",
                Arity::Range(0, 3),
                exception_construct,
            ))
            .with_method(NativeFunction::new(
                "getMessage",
                Arity::Exact(0),
                exception_message,
            ))
            .with_method(NativeFunction::new("getCode", Arity::Exact(0), exception_code))
            .with_method(NativeFunction::new(
                "getPrevious",
                Arity::Exact(0),
                exception_previous,
            ))
            .with_method(NativeFunction::new(
                "__toString",
                Arity::Exact(0),
                exception_to_string,
            )),
    );
    let logic = scope.define_class(ClassDef::new("LogicException", Some(exception.clone())));
    scope.define_class(ClassDef::new("RuntimeException", Some(exception)));
    scope.define_class(ClassDef::new("InvalidArgumentException", Some(logic)));
}

fn this_object(ctx: &Context<'_>, method: &str) -> Result<ObjectRef, RuntimeError> {
    ctx.this()
        .and_then(|this| this.as_object().cloned())
        .ok_or_else(|| RuntimeError::message(format!("{method}() called outside an object")))
}

fn exception_property(ctx: &Context<'_>, method: &str, name: &str) -> NativeResult {
    let this = this_object(ctx, method)?;
    let value = this
        .borrow()
        .properties
        .get(name)
        .cloned()
        .unwrap_or_else(Value::null);
    Ok(value)
}

fn exception_construct(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let this = this_object(ctx, "Exception::__construct")?;
    let message = expect_string(ctx, "Exception::__construct", args, 0)?;
    let code = match args.get(1) {
        Some(_) => expect_int("Exception::__construct", args, 1)?,
        None => 0,
    };
    let mut object = this.borrow_mut();
    object
        .properties
        .insert("message".to_string(), Value::string(message));
    object.properties.insert("code".to_string(), Value::int(code));
    object.properties.insert("previous".to_string(), arg(args, 2));
    Ok(Value::null())
}

fn exception_message(ctx: &mut Context<'_>, _args: &[Value]) -> NativeResult {
    exception_property(ctx, "Exception::getMessage", "message")
}

fn exception_code(ctx: &mut Context<'_>, _args: &[Value]) -> NativeResult {
    exception_property(ctx, "Exception::getCode", "code")
}

fn exception_previous(ctx: &mut Context<'_>, _args: &[Value]) -> NativeResult {
    exception_property(ctx, "Exception::getPrevious", "previous")
}

fn exception_to_string(ctx: &mut Context<'_>, _args: &[Value]) -> NativeResult {
    let this = this_object(ctx, "Exception::__toString")?;
    let this = this.borrow();
    let message = this
        .properties
        .get("message")
        .and_then(Value::scalar_string)
        .unwrap_or_default();
    Ok(Value::string(format!("{}: {message}", this.class.name)))
}

fn join_args(ctx: &mut Context<'_>, args: &[Value]) -> Result<String, RuntimeError> {
    let mut parts = Vec::with_capacity(args.len());
    for value in args {
        parts.push(ctx.to_string_value(value)?);
    }
    Ok(parts.join(" "))
}

fn io_print(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = join_args(ctx, args)?;
    ctx.write(&text);
    Ok(Value::null())
}

fn io_println(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let mut text = join_args(ctx, args)?;
    text.push('\n');
    ctx.write(&text);
    Ok(Value::null())
}

fn type_of(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::string(arg(args, 0).describe()))
}

pub(crate) fn collections_len(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let value = arg(args, 0);
    match value.kind() {
        ValueKind::String(s) => Ok(Value::int(char_count(s))),
        ValueKind::Array(array) => Ok(Value::int(array.len() as i64)),
        _ => Err(RuntimeError::message(format!(
            "len(): Argument #1 must be of type string|array, {} given",
            value.describe()
        ))),
    }
}

pub(crate) fn math_abs(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(match expect_number("abs", args, 0)? {
        Number::Int(n) => n
            .checked_abs()
            .map(Value::int)
            .unwrap_or_else(|| Value::float((n as f64).abs())),
        Number::Float(f) => Value::float(f.abs()),
    })
}

pub(crate) fn math_floor(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::float(expect_number("floor", args, 0)?.as_f64().floor()))
}

pub(crate) fn math_ceil(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::float(expect_number("ceil", args, 0)?.as_f64().ceil()))
}

pub(crate) fn math_sqrt(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::float(expect_number("sqrt", args, 0)?.as_f64().sqrt()))
}

/// Rounds half away from zero to `precision` decimal places.
pub(crate) fn math_round(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let value = expect_number("round", args, 0)?.as_f64();
    let precision = match args.get(1) {
        Some(_) => expect_int("round", args, 1)?.clamp(-308, 308) as i32,
        None => 0,
    };
    let factor = 10f64.powi(precision);
    let scaled = value * factor;
    let rounded = if scaled.is_finite() {
        scaled.round() / factor
    } else {
        value
    };
    Ok(Value::float(rounded))
}

pub(crate) fn math_pow(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let base = expect_number("pow", args, 0)?;
    let exponent = expect_number("pow", args, 1)?;
    if let (Number::Int(b), Number::Int(e)) = (base, exponent) {
        if let Ok(e) = u32::try_from(e) {
            if let Some(result) = b.checked_pow(e) {
                return Ok(Value::int(result));
            }
        }
    }
    Ok(Value::float(base.as_f64().powf(exponent.as_f64())))
}

pub(crate) fn math_max(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    extremum("max", args, Ordering::Greater)
}

pub(crate) fn math_min(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    extremum("min", args, Ordering::Less)
}

pub(crate) fn math_intdiv(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let dividend = expect_int("intdiv", args, 0)?;
    let divisor = expect_int("intdiv", args, 1)?;
    if divisor == 0 {
        return Err(RuntimeError::message("Division by zero"));
    }
    dividend.checked_div(divisor).map(Value::int).ok_or_else(|| {
        RuntimeError::message("Division of PHP_INT_MIN by -1 is not an integer")
    })
}

fn string_len(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = expect_string(ctx, "len", args, 0)?;
    Ok(Value::int(char_count(&text)))
}

fn string_upper(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::string(expect_string(ctx, "upper", args, 0)?.to_uppercase()))
}

fn string_lower(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::string(expect_string(ctx, "lower", args, 0)?.to_lowercase()))
}

fn string_trim(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::string(expect_string(ctx, "trim", args, 0)?.trim()))
}

fn string_split(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = expect_string(ctx, "split", args, 0)?;
    let separator = expect_string(ctx, "split", args, 1)?;
    if separator.is_empty() {
        return Err(RuntimeError::message(
            "split(): Argument #2 ($separator) cannot be empty",
        ));
    }
    Ok(Value::list(text.split(separator.as_str()).map(Value::string)))
}

fn string_join(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let items = expect_array("join", args, 0)?;
    let separator = expect_string(ctx, "join", args, 1)?;
    let mut parts = Vec::with_capacity(items.len());
    for item in items.values() {
        parts.push(ctx.to_string_value(item)?);
    }
    Ok(Value::string(parts.join(&separator)))
}

fn string_replace(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = expect_string(ctx, "replace", args, 0)?;
    let from = expect_string(ctx, "replace", args, 1)?;
    let to = expect_string(ctx, "replace", args, 2)?;
    if from.is_empty() {
        return Ok(Value::string(text));
    }
    Ok(Value::string(text.replace(&from, &to)))
}

fn string_starts_with(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = expect_string(ctx, "starts_with", args, 0)?;
    let prefix = expect_string(ctx, "starts_with", args, 1)?;
    Ok(Value::bool(text.starts_with(&prefix)))
}

fn string_ends_with(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = expect_string(ctx, "ends_with", args, 0)?;
    let suffix = expect_string(ctx, "ends_with", args, 1)?;
    Ok(Value::bool(text.ends_with(&suffix)))
}

fn string_contains(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = expect_string(ctx, "contains", args, 0)?;
    let needle = expect_string(ctx, "contains", args, 1)?;
    Ok(Value::bool(text.contains(&needle)))
}

fn string_repeat(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = expect_string(ctx, "repeat", args, 0)?;
    let times = expect_int("repeat", args, 1)?;
    let times = usize::try_from(times).map_err(|_| {
        RuntimeError::message("repeat(): Argument #2 ($times) must be greater than or equal to 0")
    })?;
    ensure_string_len("repeat", text.len().checked_mul(times))?;
    Ok(Value::string(text.repeat(times)))
}

fn string_reverse(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = expect_string(ctx, "reverse", args, 0)?;
    Ok(Value::string(text.chars().rev().collect::<String>()))
}

fn collections_push(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let mut array = expect_array("push", args, 0)?.clone();
    for value in &args[1..] {
        array.push(value.clone());
    }
    Ok(Value::array(array))
}

/// Returns `["value" => last, "array" => rest]`; arrays are values, so the
/// shortened array has to be handed back.
fn collections_pop(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let mut array = expect_array("pop", args, 0)?.clone();
    let Some(value) = array.pop() else {
        return Err(RuntimeError::message("pop(): Argument #1 ($array) must not be empty"));
    };
    let mut result = ArrayValue::new();
    result.insert(ArrayKey::from("value"), value);
    result.insert(ArrayKey::from("array"), Value::array(array));
    Ok(Value::array(result))
}

pub(crate) fn collections_keys(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let array = expect_array("keys", args, 0)?;
    Ok(Value::list(array.keys().map(ArrayKey::to_value)))
}

pub(crate) fn collections_values(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let array = expect_array("values", args, 0)?;
    Ok(Value::list(array.values().cloned()))
}

fn collections_range(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    range("range", args)
}

/// `map(array, callback)`.
fn collections_map(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let array = expect_array("map", args, 0)?;
    let callback = expect_callable(ctx, "map", args, 1)?;
    map_array(ctx, &callback, array)
}

fn collections_filter(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let array = expect_array("filter", args, 0)?;
    let callback = match args.get(1) {
        Some(_) => Some(expect_callable(ctx, "filter", args, 1)?),
        None => None,
    };
    filter_array(ctx, callback.as_ref(), array)
}

fn collections_reduce(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let array = expect_array("reduce", args, 0)?;
    let callback = expect_callable(ctx, "reduce", args, 1)?;
    reduce_array(ctx, &callback, array, arg(args, 2))
}

fn collections_contains(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let array = expect_array("contains", args, 0)?;
    Ok(Value::bool(contains_value(array, &arg(args, 1), false)))
}

fn collections_sum(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(sum_array(expect_array("sum", args, 0)?))
}

fn collections_reverse(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(reverse_array(expect_array("reverse", args, 0)?))
}

/// Sorted copy as a list; an optional comparator returns `<0`, `0` or `>0`.
fn collections_sort(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let array = expect_array("sort", args, 0)?;
    let mut values: Vec<Value> = array.values().cloned().collect();
    match args.get(1) {
        None => values.sort_by(|a, b| a.compare(b).unwrap_or(Ordering::Equal)),
        Some(_) => {
            let comparator = expect_callable(ctx, "sort", args, 1)?;
            sort_with(ctx, &mut values, &comparator)?;
        }
    }
    Ok(Value::list(values))
}

/// Stable merge sort driven by a script comparator, which may fail.
pub(crate) fn sort_with(
    ctx: &mut Context<'_>,
    values: &mut Vec<Value>,
    comparator: &Value,
) -> Result<(), RuntimeError> {
    if values.len() < 2 {
        return Ok(());
    }
    let mut right = values.split_off(values.len() / 2);
    let mut left = std::mem::take(values);
    sort_with(ctx, &mut left, comparator)?;
    sort_with(ctx, &mut right, comparator)?;
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(a), Some(b)) => {
                ctx.call_value(comparator, vec![a.clone(), b.clone()])?
                    .to_int()
                    > 0
            }
            _ => break,
        };
        if take_right {
            merged.extend(right.next());
        } else {
            merged.extend(left.next());
        }
    }
    merged.extend(left);
    merged.extend(right);
    *values = merged;
    Ok(())
}
