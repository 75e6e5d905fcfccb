//! Platform bindings. File access is only offered when the resolver has a
//! filesystem root, and every path is confined below that root.

use std::{
    fs,
    path::{Component, Path, PathBuf},
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::{
    runtime::{Context, RuntimeError},
    value::{Arity, Value},
};

use super::{arg, expect_number, expect_string, Library, LibraryScope, NativeResult, RegistrationError};

pub struct SystemLibrary;

impl Library for SystemLibrary {
    fn name(&self) -> &'static str {
        "system"
    }

    fn load(&self, scope: &mut LibraryScope<'_>) -> Result<(), RegistrationError> {
        scope
            .function("time", Arity::Exact(0), time)
            .function("microtime", Arity::Range(0, 1), microtime)
            .function("getenv", Arity::Exact(1), getenv)
            .function("usleep", Arity::Exact(1), usleep);

        let Some(root) = scope.root().map(Path::to_path_buf) else {
            return Ok(());
        };

        let cwd = root.clone();
        let read_root = root.clone();
        let write_root = root.clone();
        scope
            .namespace("std\\os")?
            .function("getcwd", Arity::Exact(0), move |_ctx, _args| {
                Ok(Value::string(cwd.display().to_string()))
            })
            .function("file_get_contents", Arity::Exact(1), move |ctx, args| {
                file_get_contents(ctx, args, &read_root)
            })
            .function("file_put_contents", Arity::Exact(2), move |ctx, args| {
                file_put_contents(ctx, args, &write_root)
            })
            .function("file_exists", Arity::Exact(1), move |ctx, args| {
                file_exists(ctx, args, &root)
            });
        Ok(())
    }
}

fn since_epoch() -> Result<Duration, RuntimeError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| RuntimeError::message("system clock went backwards"))
}

fn time(_ctx: &mut Context<'_>, _args: &[Value]) -> NativeResult {
    Ok(Value::int(since_epoch()?.as_secs() as i64))
}

/// `microtime(true)` is a float of seconds; without the flag it is the
/// `"0.micros seconds"` string form.
fn microtime(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let now = since_epoch()?;
    if arg(args, 0).is_truthy() {
        return Ok(Value::float(now.as_secs_f64()));
    }
    Ok(Value::string(format!(
        "0.{:06}00 {}",
        now.subsec_micros(),
        now.as_secs()
    )))
}

fn getenv(ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let name = expect_string(ctx, "getenv", args, 0)?;
    Ok(match std::env::var(&name) {
        Ok(value) => Value::string(value),
        Err(_) => Value::bool(false),
    })
}

fn usleep(_ctx: &mut Context<'_>, args: &[Value]) -> NativeResult {
    let micros = expect_number("usleep", args, 0)?.as_f64();
    if micros < 0.0 {
        return Err(RuntimeError::message(
            "usleep(): Argument #1 ($microseconds) must be greater than or equal to 0",
        ));
    }
    thread::sleep(Duration::from_micros(micros as u64));
    Ok(Value::null())
}

/// Joins a script-supplied relative path onto `root`, refusing anything
/// that could leave it.
fn confine(root: &Path, function: &str, path: &str) -> Result<PathBuf, RuntimeError> {
    let relative = Path::new(path);
    let escapes = relative
        .components()
        .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || escapes {
        return Err(RuntimeError::message(format!(
            "{function}(): path \"{path}\" is outside the script root"
        )));
    }
    Ok(root.join(relative))
}

fn file_get_contents(ctx: &mut Context<'_>, args: &[Value], root: &Path) -> NativeResult {
    let path = expect_string(ctx, "file_get_contents", args, 0)?;
    let full = confine(root, "file_get_contents", &path)?;
    Ok(match fs::read_to_string(&full) {
        Ok(contents) => Value::string(contents),
        Err(err) => {
            tracing::debug!(path = %full.display(), %err, "file_get_contents failed");
            Value::bool(false)
        }
    })
}

fn file_put_contents(ctx: &mut Context<'_>, args: &[Value], root: &Path) -> NativeResult {
    let path = expect_string(ctx, "file_put_contents", args, 0)?;
    let contents = expect_string(ctx, "file_put_contents", args, 1)?;
    let full = confine(root, "file_put_contents", &path)?;
    Ok(match fs::write(&full, contents.as_bytes()) {
        Ok(()) => Value::int(contents.len() as i64),
        Err(err) => {
            tracing::debug!(path = %full.display(), %err, "file_put_contents failed");
            Value::bool(false)
        }
    })
}

fn file_exists(ctx: &mut Context<'_>, args: &[Value], root: &Path) -> NativeResult {
    let path = expect_string(ctx, "file_exists", args, 0)?;
    let full = confine(root, "file_exists", &path)?;
    Ok(Value::bool(full.exists()))
}
