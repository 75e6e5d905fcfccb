//! PHP-compatible function names and constants. String functions work on
//! code points, not bytes.

use std::f64::consts;

use crate::{
    runtime::{Context, RuntimeError},
    value::{format_float, parse_numeric, ArrayKey, ArrayValue, Arity, Value, ValueKind},
};

use super::{
    arg, char_count, contains_value, ensure_string_len, expect_array, expect_callable, expect_int,
    expect_string, filter_array, map_array, range, reduce_array, reverse_array,
    standard::{
        collections_keys, collections_values, math_abs, math_ceil, math_floor, math_intdiv,
        math_max, math_min, math_pow, math_round, math_sqrt,
    },
    sum_array, Library, LibraryScope, NativeResult, RegistrationError,
};

pub struct PhpLibrary;

impl Library for PhpLibrary {
    fn name(&self) -> &'static str {
        "php"
    }

    fn load(&self, scope: &mut LibraryScope<'_>) -> Result<(), RegistrationError> {
        scope
            .function("strlen", Arity::Exact(1), strlen)
            .function("strtoupper", Arity::Exact(1), strtoupper)
            .function("strtolower", Arity::Exact(1), strtolower)
            .function("ucfirst", Arity::Exact(1), ucfirst)
            .function("trim", Arity::Range(1, 2), trim)
            .function("ltrim", Arity::Range(1, 2), ltrim)
            .function("rtrim", Arity::Range(1, 2), rtrim)
            .function("str_repeat", Arity::Exact(2), str_repeat)
            .function("str_replace", Arity::Exact(3), str_replace)
            .function("str_contains", Arity::Exact(2), str_contains)
            .function("str_starts_with", Arity::Exact(2), str_starts_with)
            .function("str_ends_with", Arity::Exact(2), str_ends_with)
            .function("str_pad", Arity::Range(2, 4), str_pad)
            .function("strpos", Arity::Range(2, 3), strpos)
            .function("substr", Arity::Range(2, 3), substr)
            .function("explode", Arity::Range(2, 3), explode)
            .function("implode", Arity::Range(1, 2), implode)
            .function("strrev", Arity::Exact(1), strrev)
            .function("sprintf", Arity::AtLeast(1), sprintf)
            .function("printf", Arity::AtLeast(1), printf);

        scope
            .function("count", Arity::Exact(1), count)
            .function("array_keys", Arity::Exact(1), collections_keys)
            .function("array_values", Arity::Exact(1), collections_values)
            .function("array_merge", Arity::AtLeast(0), array_merge)
            .function("array_map", Arity::AtLeast(2), array_map)
            .function("array_filter", Arity::Range(1, 3), array_filter)
            .function("array_reduce", Arity::Range(2, 3), array_reduce)
            .function("array_sum", Arity::Exact(1), array_sum)
            .function("array_reverse", Arity::Range(1, 2), array_reverse)
            .function("array_slice", Arity::Range(2, 4), array_slice)
            .function("array_search", Arity::Range(2, 3), array_search)
            .function("in_array", Arity::Range(2, 3), in_array)
            .function("array_key_exists", Arity::Exact(2), array_key_exists)
            .function("range", Arity::Range(2, 3), php_range);

        scope
            .function("is_int", Arity::Exact(1), is_int)
            .function("is_float", Arity::Exact(1), is_float)
            .function("is_string", Arity::Exact(1), is_string)
            .function("is_bool", Arity::Exact(1), is_bool)
            .function("is_array", Arity::Exact(1), is_array)
            .function("is_null", Arity::Exact(1), is_null)
            .function("is_numeric", Arity::Exact(1), is_numeric)
            .function("is_callable", Arity::Exact(1), is_callable)
            .function("intval", Arity::Range(1, 2), intval)
            .function("floatval", Arity::Exact(1), floatval)
            .function("strval", Arity::Exact(1), strval)
            .function("boolval", Arity::Exact(1), boolval)
            .function("gettype", Arity::Exact(1), gettype);

        scope
            .function("abs", Arity::Exact(1), math_abs)
            .function("floor", Arity::Exact(1), math_floor)
            .function("ceil", Arity::Exact(1), math_ceil)
            .function("round", Arity::Range(1, 2), math_round)
            .function("sqrt", Arity::Exact(1), math_sqrt)
            .function("pow", Arity::Exact(2), math_pow)
            .function("max", Arity::AtLeast(1), math_max)
            .function("min", Arity::AtLeast(1), math_min)
            .function("intdiv", Arity::Exact(2), math_intdiv);

        scope
            .function("define", Arity::Exact(2), define)
            .function("defined", Arity::Exact(1), defined)
            .function("function_exists", Arity::Exact(1), function_exists)
            .function("class_exists", Arity::Exact(1), class_exists)
            .function("call_user_func", Arity::AtLeast(1), call_user_func)
            .function("call_user_func_array", Arity::Exact(2), call_user_func_array);

        scope
            .constant("PHP_EOL", Value::string("\n"))
            .constant("PHP_INT_MAX", Value::int(i64::MAX))
            .constant("PHP_INT_MIN", Value::int(i64::MIN))
            .constant("PHP_INT_SIZE", Value::int(8))
            .constant("PHP_FLOAT_EPSILON", Value::float(f64::EPSILON))
            .constant("M_PI", Value::float(consts::PI))
            .constant("M_E", Value::float(consts::E))
            .constant("NAN", Value::float(f64::NAN))
            .constant("INF", Value::float(f64::INFINITY));

        Ok(())
    }
}

fn strlen(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = expect_string(ctx, "strlen", args, 0)?;
    Ok(Value::int(char_count(&text)))
}

fn strtoupper(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::string(expect_string(ctx, "strtoupper", args, 0)?.to_uppercase()))
}

fn strtolower(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::string(expect_string(ctx, "strtolower", args, 0)?.to_lowercase()))
}

fn ucfirst(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = expect_string(ctx, "ucfirst", args, 0)?;
    let mut chars = text.chars();
    Ok(Value::string(match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }))
}

/// Characters stripped by `trim` when no list is given.
const TRIM_DEFAULT: &[char] = &[' ', '\t', '\n', '\r', '\0', '\x0B'];

fn trim_set(ctx: &mut Context<'_>, function: &str, args: &[Value]) -> Result<Vec<char>, RuntimeError> {
    match args.get(1) {
        Some(_) => Ok(expect_string(ctx, function, args, 1)?.chars().collect()),
        None => Ok(TRIM_DEFAULT.to_vec()),
    }
}

fn trim(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = expect_string(ctx, "trim", args, 0)?;
    let set = trim_set(ctx, "trim", args)?;
    Ok(Value::string(text.trim_matches(set.as_slice())))
}

fn ltrim(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = expect_string(ctx, "ltrim", args, 0)?;
    let set = trim_set(ctx, "ltrim", args)?;
    Ok(Value::string(text.trim_start_matches(set.as_slice())))
}

fn rtrim(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = expect_string(ctx, "rtrim", args, 0)?;
    let set = trim_set(ctx, "rtrim", args)?;
    Ok(Value::string(text.trim_end_matches(set.as_slice())))
}

fn str_repeat(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = expect_string(ctx, "str_repeat", args, 0)?;
    let times = usize::try_from(expect_int("str_repeat", args, 1)?).map_err(|_| {
        RuntimeError::message(
            "str_repeat(): Argument #2 ($times) must be greater than or equal to 0",
        )
    })?;
    ensure_string_len("str_repeat", text.len().checked_mul(times))?;
    Ok(Value::string(text.repeat(times)))
}

/// `str_replace` with string or array search/replace, over one subject.
fn replace_in(ctx: &mut Context<'_>, search: &Value, replace: &Value, subject: String) -> Result<String, RuntimeError> {
    let pairs: Vec<(String, String)> = match search.as_array() {
        Some(searches) => {
            let replacements: Option<Vec<Value>> =
                replace.as_array().map(|array| array.values().cloned().collect());
            let mut pairs = Vec::with_capacity(searches.len());
            for (idx, needle) in searches.values().enumerate() {
                let needle = ctx.to_string_value(needle)?;
                let replacement = match &replacements {
                    Some(values) => match values.get(idx) {
                        Some(value) => ctx.to_string_value(value)?,
                        None => String::new(),
                    },
                    None => ctx.to_string_value(replace)?,
                };
                pairs.push((needle, replacement));
            }
            pairs
        }
        None => vec![(ctx.to_string_value(search)?, ctx.to_string_value(replace)?)],
    };
    let mut result = subject;
    for (needle, replacement) in pairs {
        if !needle.is_empty() {
            result = result.replace(&needle, &replacement);
        }
    }
    Ok(result)
}

fn str_replace(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let (search, replace, subject) = (arg(args, 0), arg(args, 1), arg(args, 2));
    match subject.as_array() {
        Some(subjects) => {
            let mut replaced = ArrayValue::new();
            for (key, value) in subjects.iter() {
                let text = ctx.to_string_value(value)?;
                replaced.insert(key.clone(), Value::string(replace_in(ctx, &search, &replace, text)?));
            }
            Ok(Value::array(replaced))
        }
        None => {
            let text = expect_string(ctx, "str_replace", args, 2)?;
            Ok(Value::string(replace_in(ctx, &search, &replace, text)?))
        }
    }
}

fn str_contains(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let haystack = expect_string(ctx, "str_contains", args, 0)?;
    let needle = expect_string(ctx, "str_contains", args, 1)?;
    Ok(Value::bool(haystack.contains(&needle)))
}

fn str_starts_with(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let haystack = expect_string(ctx, "str_starts_with", args, 0)?;
    let needle = expect_string(ctx, "str_starts_with", args, 1)?;
    Ok(Value::bool(haystack.starts_with(&needle)))
}

fn str_ends_with(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let haystack = expect_string(ctx, "str_ends_with", args, 0)?;
    let needle = expect_string(ctx, "str_ends_with", args, 1)?;
    Ok(Value::bool(haystack.ends_with(&needle)))
}

/// `str_pad($string, $length, $pad = " ", $type = STR_PAD_RIGHT)`; type 0
/// pads left, 2 pads both sides.
fn str_pad(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = expect_string(ctx, "str_pad", args, 0)?;
    let length = expect_int("str_pad", args, 1)?;
    let pad = match args.get(2) {
        Some(_) => expect_string(ctx, "str_pad", args, 2)?,
        None => " ".to_string(),
    };
    let mode = match args.get(3) {
        Some(_) => expect_int("str_pad", args, 3)?,
        None => 1,
    };
    if pad.is_empty() {
        return Err(RuntimeError::message(
            "str_pad(): Argument #3 ($pad_string) must be a non-empty string",
        ));
    }
    let missing = usize::try_from(length.saturating_sub(char_count(&text))).unwrap_or(0);
    let widest = pad.chars().map(char::len_utf8).max().unwrap_or(1);
    ensure_string_len(
        "str_pad",
        missing
            .checked_mul(widest)
            .and_then(|padding| padding.checked_add(text.len())),
    )?;
    let filler = |count: usize| pad.chars().cycle().take(count).collect::<String>();
    Ok(Value::string(match mode {
        0 => format!("{}{text}", filler(missing)),
        2 => {
            let left = missing / 2;
            format!("{}{text}{}", filler(left), filler(missing - left))
        }
        _ => format!("{text}{}", filler(missing)),
    }))
}

/// Byte offset of the `index`th character, clamped to the end.
fn byte_offset(text: &str, index: usize) -> usize {
    text.char_indices()
        .nth(index)
        .map(|(offset, _)| offset)
        .unwrap_or(text.len())
}

fn strpos(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let haystack = expect_string(ctx, "strpos", args, 0)?;
    let needle = expect_string(ctx, "strpos", args, 1)?;
    let len = char_count(&haystack);
    let offset = match args.get(2) {
        Some(_) => expect_int("strpos", args, 2)?,
        None => 0,
    };
    let start = if offset < 0 { len + offset } else { offset };
    if start < 0 || start > len {
        return Err(RuntimeError::message(
            "strpos(): Argument #3 ($offset) must be contained in argument #1 ($haystack)",
        ));
    }
    let from = byte_offset(&haystack, start as usize);
    Ok(match haystack[from..].find(&needle) {
        Some(found) => Value::int(char_count(&haystack[..from + found])),
        None => Value::bool(false),
    })
}

fn substr(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = expect_string(ctx, "substr", args, 0)?;
    let len = char_count(&text);
    let offset = expect_int("substr", args, 1)?;
    let start = if offset < 0 { (len + offset).max(0) } else { offset.min(len) };
    let end = match args.get(2).filter(|length| !length.is_null()) {
        None => len,
        Some(_) => {
            let length = expect_int("substr", args, 2)?;
            if length < 0 {
                (len + length).max(start)
            } else {
                start.saturating_add(length).min(len)
            }
        }
    };
    let slice: String = text
        .chars()
        .skip(start as usize)
        .take(end.saturating_sub(start).max(0) as usize)
        .collect();
    Ok(Value::string(slice))
}

fn explode(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let separator = expect_string(ctx, "explode", args, 0)?;
    let text = expect_string(ctx, "explode", args, 1)?;
    if separator.is_empty() {
        return Err(RuntimeError::message(
            "explode(): Argument #1 ($separator) cannot be empty",
        ));
    }
    let limit = match args.get(2) {
        Some(_) => expect_int("explode", args, 2)?,
        None => i64::MAX,
    };
    let parts: Vec<&str> = match limit {
        limit if limit > 0 => text
            .splitn(usize::try_from(limit).unwrap_or(usize::MAX), separator.as_str())
            .collect(),
        0 => vec![text.as_str()],
        limit => {
            let all: Vec<&str> = text.split(separator.as_str()).collect();
            let keep = all.len().saturating_sub(limit.unsigned_abs() as usize);
            all[..keep].to_vec()
        }
    };
    Ok(Value::list(parts.into_iter().map(Value::string)))
}

fn implode(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let (separator, pieces) = match (args.first(), args.get(1)) {
        (Some(first), second) if first.as_array().is_some() => {
            let separator = match second {
                Some(value) => ctx.to_string_value(value)?,
                None => String::new(),
            };
            (separator, first.clone())
        }
        (Some(_), Some(second)) if second.as_array().is_some() => {
            (expect_string(ctx, "implode", args, 0)?, second.clone())
        }
        _ => {
            return Err(RuntimeError::message(
                "implode(): Argument #2 ($array) must be of type ?array",
            ));
        }
    };
    let mut parts = Vec::new();
    if let Some(array) = pieces.as_array() {
        for value in array.values() {
            parts.push(ctx.to_string_value(value)?);
        }
    }
    Ok(Value::string(parts.join(&separator)))
}

fn strrev(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = expect_string(ctx, "strrev", args, 0)?;
    Ok(Value::string(text.chars().rev().collect::<String>()))
}

/// One `%` directive of a format string.
#[derive(Default)]
struct Directive {
    argument: Option<usize>,
    left: bool,
    plus: bool,
    pad: Option<char>,
    width: usize,
    precision: Option<usize>,
}

fn format_string(ctx: &mut Context<'_>, function: &str, args: &[Value]) -> Result<String, RuntimeError> {
    let format = expect_string(ctx, function, args, 0)?;
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    let mut next_arg = 1;
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let mut directive = Directive::default();

        let mut digits = String::new();
        while let Some(digit) = chars.peek().copied().filter(char::is_ascii_digit) {
            digits.push(digit);
            chars.next();
        }
        if chars.peek() == Some(&'$') && !digits.is_empty() {
            chars.next();
            directive.argument = digits.parse::<usize>().ok();
            digits.clear();
        }
        if digits.is_empty() {
            loop {
                match chars.peek().copied() {
                    Some('-') => directive.left = true,
                    Some('+') => directive.plus = true,
                    Some('0') => directive.pad = Some('0'),
                    Some(' ') => directive.pad = Some(' '),
                    Some('\'') => {
                        chars.next();
                        directive.pad = chars.peek().copied();
                    }
                    _ => break,
                }
                chars.next();
            }
            while let Some(digit) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(digit);
                chars.next();
            }
        } else if digits.starts_with('0') && digits.len() > 1 {
            directive.pad = Some('0');
        }
        directive.width = ensure_string_len(function, Some(field_size(&digits)))?;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut precision = String::new();
            while let Some(digit) = chars.peek().copied().filter(char::is_ascii_digit) {
                precision.push(digit);
                chars.next();
            }
            directive.precision = Some(ensure_string_len(function, Some(field_size(&precision)))?);
        }
        let Some(conversion) = chars.next() else {
            return Err(RuntimeError::message(format!(
                "{function}(): Missing format specifier at end of string"
            )));
        };
        let index = match directive.argument {
            Some(position) => position,
            None => {
                let index = next_arg;
                next_arg += 1;
                index
            }
        };
        let Some(value) = args.get(index).cloned() else {
            return Err(RuntimeError::message(format!(
                "{} arguments are required, {} given",
                index + 1,
                args.len()
            )));
        };
        let body = match conversion {
            's' => {
                let text = ctx.to_string_value(&value)?;
                match directive.precision {
                    Some(precision) => text.chars().take(precision).collect(),
                    None => text,
                }
            }
            'd' | 'i' => signed(value.to_int().to_string(), directive.plus),
            'u' => (value.to_int() as u64).to_string(),
            'f' | 'F' => signed(
                format!("{:.*}", directive.precision.unwrap_or(6), value.to_float()),
                directive.plus,
            ),
            'e' | 'E' => {
                let text = exponent(value.to_float(), directive.precision.unwrap_or(6));
                let text = if conversion == 'E' { text.to_uppercase() } else { text };
                signed(text, directive.plus)
            }
            'g' | 'G' => format_float(value.to_float()),
            'x' => format!("{:x}", value.to_int()),
            'X' => format!("{:X}", value.to_int()),
            'o' => format!("{:o}", value.to_int()),
            'b' => format!("{:b}", value.to_int()),
            'c' => u32::try_from(value.to_int())
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_default(),
            other => {
                return Err(RuntimeError::message(format!(
                    "{function}(): Unknown format specifier \"{other}\""
                )));
            }
        };
        out.push_str(&pad(body, &directive));
        ensure_string_len(function, Some(out.len()))?;
    }
    Ok(out)
}

/// Width or precision digits; too many digits to fit count as unbounded.
fn field_size(digits: &str) -> usize {
    if digits.is_empty() {
        0
    } else {
        digits.parse().unwrap_or(usize::MAX)
    }
}

fn signed(text: String, plus: bool) -> String {
    if plus && !text.starts_with('-') {
        format!("+{text}")
    } else {
        text
    }
}

/// `1.5e+3` style, as `%e` prints it.
fn exponent(value: f64, precision: usize) -> String {
    let formatted = format!("{value:.precision$e}");
    match formatted.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
        _ => formatted,
    }
}

fn pad(body: String, directive: &Directive) -> String {
    let len = body.chars().count();
    if len >= directive.width {
        return body;
    }
    let fill = directive.pad.unwrap_or(' ');
    if directive.left {
        let fill = if fill == '0' { ' ' } else { fill };
        let padding: String = std::iter::repeat_n(fill, directive.width - len).collect();
        return format!("{body}{padding}");
    }
    let padding: String = std::iter::repeat_n(fill, directive.width - len).collect();
    if fill == '0' && (body.starts_with('-') || body.starts_with('+')) {
        let (sign, digits) = body.split_at(1);
        format!("{sign}{padding}{digits}")
    } else {
        format!("{padding}{body}")
    }
}

fn sprintf(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::string(format_string(ctx, "sprintf", args)?))
}

fn printf(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let text = format_string(ctx, "printf", args)?;
    ctx.write(&text);
    Ok(Value::int(text.len() as i64))
}

fn count(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let value = arg(args, 0);
    match value.as_array() {
        Some(array) => Ok(Value::int(array.len() as i64)),
        None => Err(RuntimeError::message(format!(
            "count(): Argument #1 ($value) must be of type Countable|array, {} given",
            value.describe()
        ))),
    }
}

fn array_merge(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let mut merged = ArrayValue::new();
    for index in 0..args.len() {
        for (key, value) in expect_array("array_merge", args, index)?.iter() {
            match key {
                ArrayKey::Int(_) => merged.push(value.clone()),
                ArrayKey::String(_) => merged.insert(key.clone(), value.clone()),
            }
        }
    }
    Ok(Value::array(merged))
}

fn array_map(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let callback = match args.first() {
        Some(value) if value.is_null() => None,
        _ => Some(expect_callable(ctx, "array_map", args, 0)?),
    };
    if args.len() == 2 {
        let array = expect_array("array_map", args, 1)?;
        return match &callback {
            Some(callback) => map_array(ctx, callback, array),
            None => Ok(Value::array(array.clone())),
        };
    }
    let mut columns = Vec::with_capacity(args.len() - 1);
    for index in 1..args.len() {
        let array = expect_array("array_map", args, index)?;
        columns.push(array.values().cloned().collect::<Vec<_>>());
    }
    let rows = columns.iter().map(Vec::len).max().unwrap_or(0);
    let mut mapped = ArrayValue::new();
    for row in 0..rows {
        let values: Vec<Value> = columns
            .iter()
            .map(|column| column.get(row).cloned().unwrap_or_else(Value::null))
            .collect();
        mapped.push(match &callback {
            Some(callback) => ctx.call_value(callback, values)?,
            None => Value::list(values),
        });
    }
    Ok(Value::array(mapped))
}

fn array_filter(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let array = expect_array("array_filter", args, 0)?;
    let callback = match args.get(1).filter(|value| !value.is_null()) {
        Some(_) => Some(expect_callable(ctx, "array_filter", args, 1)?),
        None => None,
    };
    filter_array(ctx, callback.as_ref(), array)
}

fn array_reduce(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let array = expect_array("array_reduce", args, 0)?;
    let callback = expect_callable(ctx, "array_reduce", args, 1)?;
    reduce_array(ctx, &callback, array, arg(args, 2))
}

fn array_sum(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(sum_array(expect_array("array_sum", args, 0)?))
}

fn array_reverse(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let array = expect_array("array_reverse", args, 0)?;
    if arg(args, 1).is_truthy() {
        let entries: Vec<_> = array.iter().collect();
        return Ok(Value::array(
            entries
                .into_iter()
                .rev()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ));
    }
    Ok(reverse_array(array))
}

fn array_slice(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let array = expect_array("array_slice", args, 0)?;
    let len = array.len() as i64;
    let offset = expect_int("array_slice", args, 1)?;
    let start = if offset < 0 { (len + offset).max(0) } else { offset.min(len) };
    let end = match args.get(2).filter(|length| !length.is_null()) {
        None => len,
        Some(_) => {
            let length = expect_int("array_slice", args, 2)?;
            if length < 0 {
                (len + length).max(start)
            } else {
                start.saturating_add(length).min(len)
            }
        }
    };
    let preserve = arg(args, 3).is_truthy();
    let mut slice = ArrayValue::new();
    for (key, value) in array
        .iter()
        .skip(start as usize)
        .take((end - start).max(0) as usize)
    {
        match key {
            ArrayKey::Int(_) if !preserve => slice.push(value.clone()),
            _ => slice.insert(key.clone(), value.clone()),
        }
    }
    Ok(Value::array(slice))
}

fn array_search(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let needle = arg(args, 0);
    let haystack = expect_array("array_search", args, 1)?;
    let strict = arg(args, 2).is_truthy();
    let found = haystack.iter().find(|(_, value)| {
        if strict {
            value.strict_equals(&needle)
        } else {
            value.loose_equals(&needle)
        }
    });
    Ok(match found {
        Some((key, _)) => key.to_value(),
        None => Value::bool(false),
    })
}

fn in_array(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let haystack = expect_array("in_array", args, 1)?;
    Ok(Value::bool(contains_value(
        haystack,
        &arg(args, 0),
        arg(args, 2).is_truthy(),
    )))
}

fn array_key_exists(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let array = expect_array("array_key_exists", args, 1)?;
    let key = arg(args, 0);
    let key = ArrayKey::from_value(&key).ok_or_else(|| {
        RuntimeError::message(format!(
            "array_key_exists(): Argument #1 ($key) must be a valid array offset type, {} given",
            key.describe()
        ))
    })?;
    Ok(Value::bool(array.contains_key(&key)))
}

fn php_range(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    range("range", args)
}

fn is_int(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::bool(matches!(arg(args, 0).kind(), ValueKind::Int(_))))
}

fn is_float(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::bool(matches!(arg(args, 0).kind(), ValueKind::Float(_))))
}

fn is_string(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::bool(matches!(arg(args, 0).kind(), ValueKind::String(_))))
}

fn is_bool(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::bool(matches!(arg(args, 0).kind(), ValueKind::Bool(_))))
}

fn is_array(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::bool(matches!(arg(args, 0).kind(), ValueKind::Array(_))))
}

fn is_null(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::bool(arg(args, 0).is_null()))
}

fn is_numeric(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let value = arg(args, 0);
    Ok(Value::bool(match value.kind() {
        ValueKind::Int(_) | ValueKind::Float(_) => true,
        ValueKind::String(s) => parse_numeric(s).is_some(),
        _ => false,
    }))
}

fn is_callable(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::bool(ctx.is_callable(&arg(args, 0))))
}

fn intval(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let value = arg(args, 0);
    let base = match args.get(1) {
        Some(_) => expect_int("intval", args, 1)?,
        None => 10,
    };
    if let (Some(text), true) = (value.as_str(), base != 10) {
        let radix = u32::try_from(base).ok().filter(|radix| (2..=36).contains(radix));
        let Some(radix) = radix else {
            return Err(RuntimeError::message(
                "intval(): Argument #2 ($base) must be between 2 and 36 (inclusive)",
            ));
        };
        let trimmed = text.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let digits: String = digits.chars().take_while(|ch| ch.is_digit(radix)).collect();
        let parsed = i64::from_str_radix(&digits, radix).unwrap_or(0);
        return Ok(Value::int(if negative { -parsed } else { parsed }));
    }
    Ok(Value::int(value.to_int()))
}

fn floatval(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::float(arg(args, 0).to_float()))
}

fn strval(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::string(ctx.to_string_value(&arg(args, 0))?))
}

fn boolval(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::bool(arg(args, 0).is_truthy()))
}

fn gettype(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let name = match arg(args, 0).kind() {
        ValueKind::Null => "NULL",
        ValueKind::Bool(_) => "boolean",
        ValueKind::Int(_) => "integer",
        ValueKind::Float(_) => "double",
        ValueKind::String(_) => "string",
        ValueKind::Array(_) => "array",
        ValueKind::Object(_) | ValueKind::Closure(_) | ValueKind::Native(_) => "object",
    };
    Ok(Value::string(name))
}

fn define(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let name = expect_string(ctx, "define", args, 0)?;
    ctx.define_constant(&name, arg(args, 1))?;
    Ok(Value::bool(true))
}

fn defined(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let name = expect_string(ctx, "defined", args, 0)?;
    Ok(Value::bool(ctx.constant_value(&name).is_some()))
}

fn function_exists(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let name = expect_string(ctx, "function_exists", args, 0)?;
    Ok(Value::bool(ctx.function_exists(&name)))
}

fn class_exists(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let name = expect_string(ctx, "class_exists", args, 0)?;
    Ok(Value::bool(ctx.class_exists(&name)))
}

fn call_user_func(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let callback = expect_callable(ctx, "call_user_func", args, 0)?;
    ctx.call_value(&callback, args[1..].to_vec())
}

fn call_user_func_array(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let callback = expect_callable(ctx, "call_user_func_array", args, 0)?;
    let arguments = expect_array("call_user_func_array", args, 1)?;
    ctx.call_value(&callback, arguments.values().cloned().collect())
}
