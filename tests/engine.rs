use std::{cell::Cell, io, rc::Rc};

use origami::{
    evaluate, Arity, Engine, EngineConfig, Library, LibraryScope, OutputBuffer, OutputTarget,
    Registrar, RegistrationError, ResolverMode, SourceUnit, Value,
};
use pretty_assertions::assert_eq;

/// Keeps a counter in VM scope and seeds a global variable.
struct CounterLibrary;

impl Library for CounterLibrary {
    fn name(&self) -> &'static str {
        "counter"
    }

    fn load(&self, scope: &mut LibraryScope<'_>) -> Result<(), RegistrationError> {
        let counter = Rc::new(Cell::new(0_i64));
        scope
            .function("bump", Arity::Exact(0), move |_ctx, _args| {
                counter.set(counter.get() + 1);
                Ok(Value::int(counter.get()))
            })
            .variable("seeded", Value::int(10));
        Ok(())
    }
}

struct FailingLibrary;

impl Library for FailingLibrary {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn load(&self, scope: &mut LibraryScope<'_>) -> Result<(), RegistrationError> {
        scope.function("half_loaded", Arity::Exact(0), |_ctx, _args| Ok(Value::int(1)));
        Err(RegistrationError::Failed("backend unavailable".into()))
    }
}

struct PanickingLibrary;

impl Library for PanickingLibrary {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn load(&self, scope: &mut LibraryScope<'_>) -> Result<(), RegistrationError> {
        scope.function("never_seen", Arity::Exact(0), |_ctx, _args| Ok(Value::int(1)));
        panic!("library blew up");
    }
}

/// Redefines `strlen`, so the whole library must be rejected.
struct ClashingLibrary;

impl Library for ClashingLibrary {
    fn name(&self) -> &'static str {
        "clashing"
    }

    fn load(&self, scope: &mut LibraryScope<'_>) -> Result<(), RegistrationError> {
        scope
            .function("clash_only", Arity::Exact(0), |_ctx, _args| Ok(Value::int(1)))
            .function("STRLEN", Arity::Exact(1), |_ctx, _args| Ok(Value::int(-1)));
        Ok(())
    }
}

fn quiet() -> EngineConfig {
    EngineConfig::default().with_output(OutputTarget::Discard)
}

fn engine_with(library: impl Library + 'static) -> Engine {
    Engine::with_registrar(quiet(), Registrar::standard().with(library))
}

#[test]
fn library_state_is_fresh_on_every_call() {
    let engine = engine_with(CounterLibrary);
    for _ in 0..3 {
        assert_eq!(engine.evaluate("bump(); bump();"), "2");
    }
}

#[test]
fn library_variables_reset_between_calls() {
    let engine = engine_with(CounterLibrary);
    let script = "$seeded = $seeded + 1; $seeded;";
    assert_eq!(engine.evaluate(script), "11");
    assert_eq!(engine.evaluate(script), "11");
}

#[test]
fn script_declarations_do_not_leak() {
    let engine = Engine::new(quiet());
    assert_eq!(engine.evaluate("function once() { return 1; } once();"), "1");
    assert_eq!(engine.evaluate("function once() { return 2; } once();"), "2");
    assert_eq!(engine.evaluate("define('LIMIT', 3); LIMIT;"), "3");
    let second = engine.evaluate("LIMIT;");
    assert!(second.starts_with("Fatal error: Undefined constant \"LIMIT\""), "{second}");
}

#[test]
fn empty_scripts_produce_nothing() {
    for script in ["", "   \n\t", "// just a comment", "/* block */ # hash", "<?php\n"] {
        assert_eq!(evaluate(script), "", "script {script:?}");
    }
}

#[test]
fn malformed_syntax_is_a_parse_error() {
    let result = evaluate("1 +");
    assert!(result.starts_with("Parse error: "), "{result}");
    assert!(result.contains("inmem.zy"), "{result}");
    assert!(evaluate("if (true { 1; }").starts_with("Parse error: "));
}

#[test]
fn evaluates_simple_arithmetic() {
    assert_eq!(evaluate("1 + 2;"), "3");
    assert_eq!(evaluate("1 + 2"), "3");
}

#[test]
fn restricted_mode_still_runs_builtins() {
    let mode = ResolverMode::select(Err(io::Error::other("cwd removed")));
    assert_eq!(mode, ResolverMode::Restricted);
    let engine = Engine::new(quiet().with_resolver(mode));
    assert_eq!(engine.evaluate("strtoupper('abc');"), "ABC");
    assert_eq!(engine.evaluate("use std\\math; math::intdiv(7, 2);"), "3");
}

#[test]
fn restricted_mode_never_reads_namespace_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("greeting.zy"), "function hello() { return 'hi'; }")
        .expect("write namespace file");

    let restricted = Engine::new(quiet().with_resolver(ResolverMode::Restricted));
    let result = restricted.evaluate("use greeting; hello();");
    assert!(result.starts_with("Parse error: "), "{result}");
    assert!(result.contains("greeting"), "{result}");

    let filesystem = Engine::new(quiet().with_resolver(ResolverMode::filesystem(dir.path())));
    assert_eq!(filesystem.evaluate("use greeting; hello();"), "hi");
}

#[test]
fn repeated_runs_are_identical() {
    let script = r#"
        $items = [3, 1, 2];
        $total = 0;
        foreach ($items as $item) { $total += $item * bump_free($item); }
        function bump_free($n) { return $n + 1; }
        $total;
    "#;
    let first = evaluate(script);
    assert_eq!(first, "20");
    assert_eq!(evaluate(script), first);
}

#[test]
fn runtime_fault_replaces_earlier_values() {
    let result = evaluate("$x = 10; $x; intdiv($x, 0);");
    assert_eq!(result, "Fatal error: Division by zero in inmem.zy on line 1");
}

#[test]
fn uncaught_exceptions_are_reported() {
    let result = evaluate("\n\nthrow new RuntimeException('boom');");
    assert_eq!(result, "Fatal error: Uncaught RuntimeException: boom in inmem.zy on line 3");
}

#[test]
fn unrenderable_values_marshal_to_empty() {
    assert_eq!(evaluate("null;"), "");
    assert_eq!(evaluate("new Exception('x');"), "");
    assert_eq!(evaluate("fn ($x) => $x;"), "");
    assert_eq!(evaluate("[1, new Exception('x')];"), "");
}

#[test]
fn values_render_canonically() {
    assert_eq!(evaluate("true;"), "true");
    assert_eq!(evaluate("false;"), "false");
    assert_eq!(evaluate("3.0;"), "3");
    assert_eq!(evaluate("0.1 + 0.2;"), "0.30000000000000004");
    assert_eq!(evaluate("1e20;"), "1.0E+20");
    assert_eq!(evaluate("[1, 'two', null];"), r#"[1, "two", null]"#);
    assert_eq!(evaluate("['a' => 1, 'b' => [true]];"), r#"["a" => 1, "b" => [true]]"#);
    assert_eq!(evaluate("'plain';"), "plain");
}

#[test]
fn top_level_return_ends_the_program() {
    assert_eq!(evaluate("return 5; 6;"), "5");
    assert_eq!(evaluate("echo 'x'; return;"), "");
}

#[test]
fn failing_libraries_register_nothing() {
    let registrar = Registrar::standard()
        .with(FailingLibrary)
        .with(PanickingLibrary)
        .with(ClashingLibrary)
        .with(CounterLibrary);
    let engine = Engine::with_registrar(quiet(), registrar);

    assert_eq!(engine.evaluate("strlen('four');"), "4");
    assert_eq!(engine.evaluate("bump();"), "1");
    for missing in ["half_loaded", "never_seen", "clash_only"] {
        let result = engine.evaluate(&format!("{missing}();"));
        assert_eq!(
            result,
            format!("Fatal error: Call to undefined function {missing}() in inmem.zy on line 1")
        );
    }
}

#[test]
fn call_depth_is_bounded() {
    let engine = Engine::new(quiet().with_max_call_depth(50));
    let result = engine.evaluate("function down($n) { return down($n + 1); } down(0);");
    assert!(
        result.starts_with("Fatal error: Maximum call depth of 50 exceeded"),
        "{result}"
    );
    assert_eq!(
        engine.evaluate("function count_to($n) { return $n == 0 ? 0 : 1 + count_to($n - 1); } count_to(40);"),
        "40"
    );
}

#[test]
fn deep_recursion_within_the_limit_succeeds() {
    let script = "function depth($n) { return $n == 0 ? 0 : 1 + depth($n - 1); } depth(500);";
    assert_eq!(evaluate(script), "500");
}

#[test]
fn deeply_nested_source_is_a_parse_error() {
    let nested = |depth: usize| format!("{}1{};", "(".repeat(depth), ")".repeat(depth));
    assert_eq!(evaluate(&nested(1_000)), "1");

    let result = evaluate(&nested(200_000));
    assert!(
        result.starts_with("Parse error: maximum nesting depth of 10000 exceeded in inmem.zy on line 1"),
        "{result}"
    );
    let result = evaluate(&format!("{}1;", "!".repeat(50_000)));
    assert!(result.starts_with("Parse error: maximum nesting depth"), "{result}");
    let result = evaluate(&format!("{}1;", "$a = ".repeat(50_000)));
    assert!(result.starts_with("Parse error: maximum nesting depth"), "{result}");
}

#[test]
fn string_growth_is_bounded() {
    let result = evaluate("$s = 'xxxxxxxx'; while (true) { $s .= $s; }");
    assert_eq!(
        result,
        "Fatal error: Maximum string length of 67108864 bytes exceeded in inmem.zy on line 1"
    );
    assert_eq!(evaluate("$s = 'ab'; for ($i = 0; $i < 10; $i++) { $s = $s . $s; } strlen($s);"), "2048");
}

#[test]
fn step_budget_stops_runaway_loops() {
    let engine = Engine::new(quiet().with_max_steps(Some(1_000)));
    let result = engine.evaluate("while (true) { }");
    assert!(
        result.starts_with("Fatal error: Maximum execution steps of 1000 exceeded"),
        "{result}"
    );
    assert_eq!(engine.evaluate("$i = 0; while ($i < 10) { $i++; } $i;"), "10");
}

#[test]
fn echo_output_goes_to_the_configured_target() {
    let buffer = OutputBuffer::new();
    let engine = Engine::new(EngineConfig::default().with_output(OutputTarget::Capture(buffer.clone())));
    assert_eq!(engine.evaluate("echo 'a', 1, true; println('b', 2);"), "");
    assert_eq!(buffer.take(), "a11b 2\n");
}

#[test]
fn run_exposes_the_outcome() {
    let engine = Engine::new(quiet());
    let outcome = engine.run(&SourceUnit::new("1 +", "snippet.zy"));
    assert!(outcome.is_failure());
    let diag = outcome.diagnostic().expect("failure carries a diagnostic");
    assert!(diag.kind.is_parse_time());
    assert_eq!(diag.location.as_ref().map(|loc| loc.file.as_str()), Some("snippet.zy"));

    let outcome = engine.run(&SourceUnit::inline("[1, 2];"));
    assert_eq!(outcome.value().and_then(Value::render).as_deref(), Some("[1, 2]"));
}

#[test]
fn engines_can_be_shared_across_threads() {
    let engine = std::sync::Arc::new(Engine::new(quiet()));
    let handles: Vec<_> = (0..4)
        .map(|n| {
            let engine = std::sync::Arc::clone(&engine);
            std::thread::spawn(move || engine.evaluate(&format!("{n} * 10;")))
        })
        .collect();
    let results: Vec<String> = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread finished"))
        .collect();
    assert_eq!(results, vec!["0", "10", "20", "30"]);
}
