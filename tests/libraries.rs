use origami::{evaluate, Engine, EngineConfig, OutputBuffer, OutputTarget, ResolverMode};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn fatal(result: &str, message: &str) {
    assert!(
        result.starts_with(&format!("Fatal error: {message}")),
        "expected fatal error {message:?}, got {result:?}"
    );
}

fn capturing() -> (Engine, OutputBuffer) {
    let buffer = OutputBuffer::new();
    let engine = Engine::new(EngineConfig::default().with_output(OutputTarget::Capture(buffer.clone())));
    (engine, buffer)
}

fn rooted(dir: &TempDir) -> Engine {
    Engine::new(
        EngineConfig::default()
            .with_resolver(ResolverMode::filesystem(dir.path()))
            .with_output(OutputTarget::Discard),
    )
}

mod strings {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn measure_and_case_by_code_point() {
        assert_eq!(evaluate("strlen('héllo');"), "5");
        assert_eq!(evaluate("[strtoupper('abc'), strtolower('ÀB'), ucfirst('élan')];"), r#"["ABC", "àb", "Élan"]"#);
        assert_eq!(evaluate("strrev('abc');"), "cba");
    }

    #[test]
    fn trim_with_default_and_custom_sets() {
        assert_eq!(
            evaluate("[trim(\"  x \\n\"), trim('xxhixx', 'x'), ltrim('007', '0'), rtrim('1.500', '0')];"),
            r#"["x", "hi", "7", "1.5"]"#
        );
    }

    #[test]
    fn replace_scalars_and_arrays() {
        assert_eq!(evaluate("str_replace('l', 'L', 'hello');"), "heLLo");
        assert_eq!(evaluate("str_replace(['a', 'b'], ['1', '2'], 'aabbc');"), "1122c");
        assert_eq!(evaluate("str_repeat('ab', 3);"), "ababab");
    }

    #[test]
    fn oversized_results_are_refused() {
        let too_long = "Result string exceeds the maximum length of 67108864 bytes";
        fatal(
            &evaluate("str_repeat('x', 10000000000000);"),
            &format!("str_repeat(): {too_long}"),
        );
        fatal(
            &evaluate("str_repeat('ab', PHP_INT_MAX);"),
            &format!("str_repeat(): {too_long}"),
        );
        fatal(
            &evaluate("str_pad('x', 10000000000000);"),
            &format!("str_pad(): {too_long}"),
        );
        fatal(
            &evaluate("sprintf('%999999999999d', 1);"),
            &format!("sprintf(): {too_long}"),
        );
        fatal(
            &evaluate("sprintf('%.99999999999999999999f', 1);"),
            &format!("sprintf(): {too_long}"),
        );
        fatal(
            &evaluate("use std\\string; string::repeat('x', PHP_INT_MAX);"),
            &format!("repeat(): {too_long}"),
        );
        assert_eq!(evaluate("str_pad('x', -5);"), "x");
        assert_eq!(evaluate("strlen(str_repeat('x', 1000000));"), "1000000");
    }

    #[test]
    fn pad_in_every_direction() {
        assert_eq!(
            evaluate("[str_pad('5', 3, '0', 0), str_pad('x', 5, '-', 2), str_pad('ab', 4), str_pad('long', 2)];"),
            r#"["005", "--x--", "ab  ", "long"]"#
        );
    }

    #[test]
    fn search_and_slice() {
        assert_eq!(
            evaluate("[strpos('hello', 'l'), strpos('hello', 'z'), strpos('hello', 'l', 3)];"),
            "[2, false, 3]"
        );
        assert_eq!(
            evaluate("[substr('hello', 1, 3), substr('hello', -3), substr('héllo', 1, -1)];"),
            r#"["ell", "llo", "éll"]"#
        );
        assert_eq!(
            evaluate("[str_contains('abc', 'b'), str_starts_with('abc', 'ab'), str_ends_with('abc', 'x')];"),
            "[true, true, false]"
        );
    }

    #[test]
    fn explode_and_implode() {
        assert_eq!(evaluate("explode(',', 'a,b,c');"), r#"["a", "b", "c"]"#);
        assert_eq!(evaluate("explode(',', 'a,b,c', 2);"), r#"["a", "b,c"]"#);
        assert_eq!(evaluate("explode(',', 'a,b,c', -1);"), r#"["a", "b"]"#);
        assert_eq!(evaluate("[implode('-', [1, 2]), implode(['a', 'b'], '+'), implode(['x'])];"), r#"["1-2", "a+b", "x"]"#);
        fatal(
            &evaluate("explode('', 'abc');"),
            "explode(): Argument #1 ($separator) cannot be empty",
        );
    }

    #[test]
    fn sprintf_conversions() {
        let cases = [
            ("sprintf('%05.2f', 3.14159);", "03.14"),
            ("sprintf('%-5s|', 'ab');", "ab   |"),
            ("sprintf('%+d and %+d', 5, -5);", "+5 and -5"),
            ("sprintf('%x %X %o %b', 255, 255, 8, 5);", "ff FF 10 101"),
            ("sprintf('%2$s %1$s', 'a', 'b');", "b a"),
            ("sprintf('100%%');", "100%"),
            ("sprintf(\"%'*8s\", 'pad');", "*****pad"),
            ("sprintf('%.1e', 1234.5);", "1.2e+3"),
            ("sprintf('%c%c', 72, 105);", "Hi"),
            ("sprintf('%.3s', 'abcdef');", "abc"),
            ("sprintf('%05d', -42);", "-0042"),
            ("sprintf('%s', [1]);", "Array"),
            ("sprintf('%d items', '12 apples');", "12 items"),
        ];
        for (script, expected) in cases {
            assert_eq!(evaluate(script), expected, "{script}");
        }
    }

    #[test]
    fn sprintf_reports_missing_arguments() {
        fatal(&evaluate("sprintf('%d %d', 1);"), "3 arguments are required, 2 given");
        fatal(&evaluate("sprintf('%');"), "sprintf(): Missing format specifier at end of string");
        fatal(&evaluate("sprintf('%y', 1);"), "sprintf(): Unknown format specifier \"y\"");
    }

    #[test]
    fn printf_writes_and_returns_length() {
        let (engine, buffer) = capturing();
        assert_eq!(engine.evaluate("printf('%s!', 'hi');"), "3");
        assert_eq!(buffer.take(), "hi!");
    }
}

mod arrays {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn count_rejects_scalars() {
        assert_eq!(evaluate("count([1, 2, 3]);"), "3");
        fatal(
            &evaluate("count('x');"),
            "count(): Argument #1 ($value) must be of type Countable|array, string given",
        );
    }

    #[test]
    fn merge_renumbers_integer_keys() {
        assert_eq!(
            evaluate("array_merge([1, 2], ['a' => 1], [3]);"),
            r#"[0 => 1, 1 => 2, "a" => 1, 2 => 3]"#
        );
        assert_eq!(evaluate("array_merge(['a' => 1], ['a' => 2]);"), r#"["a" => 2]"#);
    }

    #[test]
    fn map_zips_multiple_arrays() {
        assert_eq!(evaluate("array_map(null, [1, 2], ['a', 'b']);"), r#"[[1, "a"], [2, "b"]]"#);
        assert_eq!(
            evaluate("array_map(fn ($a, $b) => $a . $b, ['x', 'y'], [1, 2]);"),
            r#"["x1", "y2"]"#
        );
        assert_eq!(
            evaluate("array_map(fn ($v) => $v * 2, ['a' => 1, 'b' => 2]);"),
            r#"["a" => 2, "b" => 4]"#
        );
    }

    #[test]
    fn filter_preserves_keys() {
        assert_eq!(evaluate("array_filter([1, 0, 2, null, 3]);"), "[0 => 1, 2 => 2, 4 => 3]");
        assert_eq!(
            evaluate("array_filter(['a' => 1, 'b' => 2], fn ($v) => $v > 1);"),
            r#"["b" => 2]"#
        );
    }

    #[test]
    fn reduce_sum_and_reverse() {
        assert_eq!(evaluate("array_reduce([1, 2, 3], fn ($c, $v) => $c + $v, 10);"), "16");
        assert_eq!(evaluate("[array_sum([1, 2.5, '3']), array_sum([])];"), "[6.5, 0]");
        assert_eq!(evaluate("array_reverse([1, 2, 3]);"), "[3, 2, 1]");
        assert_eq!(evaluate("array_reverse([1, 2, 3], true);"), "[2 => 3, 1 => 2, 0 => 1]");
        assert_eq!(
            evaluate("array_reverse(['x' => 1, 2, 3]);"),
            r#"[0 => 3, 1 => 2, "x" => 1]"#
        );
    }

    #[test]
    fn slice_with_offsets_and_lengths() {
        assert_eq!(evaluate("array_slice([1, 2, 3, 4], 1, 2);"), "[2, 3]");
        assert_eq!(evaluate("array_slice([1, 2, 3, 4], -2);"), "[3, 4]");
        assert_eq!(evaluate("array_slice([1, 2, 3, 4], 1, 2, true);"), "[1 => 2, 2 => 3]");
    }

    #[test]
    fn search_and_membership() {
        assert_eq!(
            evaluate("[array_search('2', [1, 2, 3]), array_search('2', [1, 2, 3], true), in_array('a', ['a']), in_array('1', [1], true)];"),
            "[1, false, true, false]"
        );
        assert_eq!(
            evaluate("[array_key_exists('k', ['k' => null]), array_key_exists(0, [])];"),
            "[true, false]"
        );
        assert_eq!(
            evaluate("[array_keys(['a' => 1, 'b' => 2]), array_values(['a' => 1, 'b' => 2])];"),
            r#"[["a", "b"], [1, 2]]"#
        );
    }

    #[test]
    fn ranges_of_numbers_and_letters() {
        assert_eq!(evaluate("range(1, 5);"), "[1, 2, 3, 4, 5]");
        assert_eq!(evaluate("range(10, 0, 5);"), "[10, 5, 0]");
        assert_eq!(evaluate("range('a', 'c');"), r#"["a", "b", "c"]"#);
        assert_eq!(evaluate("range(0, 1, 0.5);"), "[0, 0.5, 1]");
        fatal(&evaluate("range(1, 2, 0);"), "range(): Argument #3 ($step) cannot be 0");
    }

    #[test]
    fn ranges_are_bounded() {
        fatal(&evaluate("range(0, INF);"), "range(): Arguments must be finite numbers");
        fatal(&evaluate("range(-INF, 0, 0.5);"), "range(): Arguments must be finite numbers");
        for script in ["range(0, 1e12);", "range(0, 100000000);", "range(PHP_INT_MIN, PHP_INT_MAX);"] {
            fatal(
                &evaluate(script),
                "range(): The supplied range exceeds the maximum array size",
            );
        }
        assert_eq!(evaluate("count(range(1, 1000000));"), "1000000");
    }
}

mod types {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn predicates() {
        assert_eq!(
            evaluate("[is_int(1), is_float(1.0), is_string(''), is_bool(false), is_array([]), is_null(null)];"),
            "[true, true, true, true, true, true]"
        );
        assert_eq!(
            evaluate("[is_numeric('1e3'), is_numeric('abc'), is_callable('strlen'), is_callable('nope'), is_callable(fn () => 1)];"),
            "[true, false, true, false, true]"
        );
    }

    #[test]
    fn conversions() {
        assert_eq!(
            evaluate("[intval(3.99), intval('42abc'), intval('ff', 16), intval('101', 2), floatval('1.5'), strval(2.0), boolval('0')];"),
            r#"[3, 42, 255, 5, 1.5, "2", false]"#
        );
        assert_eq!(
            evaluate("[gettype(1), gettype(1.0), gettype(null), gettype('s'), gettype([]), gettype(true)];"),
            r#"["integer", "double", "NULL", "string", "array", "boolean"]"#
        );
        fatal(
            &evaluate("intval('1', 99);"),
            "intval(): Argument #2 ($base) must be between 2 and 36 (inclusive)",
        );
    }
}

mod math {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rounding_returns_floats() {
        assert_eq!(
            evaluate("[floor(2.7), ceil(2.1), round(2.456, 2), round(-2.5), is_float(floor(1))];"),
            "[2, 3, 2.46, -3, true]"
        );
    }

    #[test]
    fn powers_roots_and_extremes() {
        assert_eq!(evaluate("[pow(2, 10), pow(2, -1), abs(-5), intdiv(7, 2)];"), "[1024, 0.5, 5, 3]");
        assert_eq!(evaluate("sqrt(2);"), "1.4142135623730951");
        assert_eq!(evaluate("[max(1, 5, 3), max([4, 9]), min(2, -1)];"), "[5, 9, -1]");
        assert_eq!(
            evaluate("min();"),
            "Fatal error: min() expects at least 1 argument, 0 given in inmem.zy on line 1"
        );
    }

    #[test]
    fn special_floats_render_by_name() {
        assert_eq!(evaluate("[NAN, INF, -INF];"), "[NAN, INF, -INF]");
        assert_eq!(evaluate("[PHP_INT_SIZE, PHP_EOL === \"\\n\", M_PI > 3];"), "[8, true, true]");
    }
}

mod symbols {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn constants_are_case_sensitive_and_write_once() {
        assert_eq!(
            evaluate("define('X', 1); [defined('X'), defined('x'), X];"),
            "[true, false, 1]"
        );
        fatal(&evaluate("define('X', 1); define('X', 2);"), "Constant X already defined");
    }

    #[test]
    fn symbol_lookup_ignores_function_case() {
        assert_eq!(
            evaluate("function mine() {} [function_exists('MINE'), function_exists('STRLEN'), function_exists('nope'), class_exists('exception')];"),
            "[true, true, false, true]"
        );
    }

    #[test]
    fn dynamic_calls() {
        assert_eq!(evaluate("call_user_func('str_repeat', 'ab', 2);"), "abab");
        assert_eq!(evaluate("call_user_func_array(fn ($a, $b) => $a * $b, [3, 4]);"), "12");
        fatal(
            &evaluate("call_user_func('missing_fn');"),
            "call_user_func(): Argument #1 must be a valid callback",
        );
    }

    #[test]
    fn arity_is_checked_for_natives() {
        assert_eq!(
            evaluate("strlen();"),
            "Fatal error: strlen() expects exactly 1 argument, 0 given in inmem.zy on line 1"
        );
        fatal(&evaluate("trim('a', 'b', 'c');"), "trim() expects at most 2 arguments, 3 given");
    }
}

mod standard {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn output_helpers_join_with_spaces() {
        let (engine, buffer) = capturing();
        assert_eq!(engine.evaluate("print('a', 'b'); println(); print(1.0);"), "");
        assert_eq!(buffer.take(), "a b\n1");
    }

    #[test]
    fn type_of_and_len() {
        assert_eq!(
            evaluate("[type_of(1), type_of('s'), type_of(new Exception('')), len('héllo'), len([1, 2])];"),
            r#"["int", "string", "Exception", 5, 2]"#
        );
        fatal(&evaluate("len(5);"), "len(): Argument #1 must be of type string|array, int given");
    }

    #[test]
    fn string_namespace() {
        assert_eq!(
            evaluate("use std\\string; [string::split('a-b', '-'), string::join(['a', 'b'], '+'), string::reverse('ab'), string::len('né')];"),
            r#"[["a", "b"], "a+b", "ba", 2]"#
        );
    }

    #[test]
    fn array_namespace_returns_new_arrays() {
        assert_eq!(
            evaluate("use std\\array; array::pop([1, 2, 3]);"),
            r#"["value" => 3, "array" => [1, 2]]"#
        );
        assert_eq!(
            evaluate("use std\\array; $a = [1]; $b = array::push($a, 2, 3); [$a, $b];"),
            "[[1], [1, 2, 3]]"
        );
        assert_eq!(
            evaluate("use std\\array; [array::sort([3, 1, 2]), array::sort([3, 1, 2], fn ($a, $b) => $b - $a)];"),
            "[[1, 2, 3], [3, 2, 1]]"
        );
        fatal(
            &evaluate("use std\\array; array::pop([]);"),
            "pop(): Argument #1 ($array) must not be empty",
        );
    }

    #[test]
    fn namespace_functions_are_not_global() {
        assert_eq!(
            evaluate("upper('x');"),
            "Fatal error: Call to undefined function upper() in inmem.zy on line 1"
        );
    }
}

mod system {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn clock_functions() {
        assert_eq!(
            evaluate("[time() > 1600000000, is_float(microtime(true)), str_contains(microtime(), ' ')];"),
            "[true, true, true]"
        );
        assert_eq!(evaluate("usleep(0);"), "");
        fatal(
            &evaluate("usleep(-1);"),
            "usleep(): Argument #1 ($microseconds) must be greater than or equal to 0",
        );
    }

    #[test]
    fn getenv_reports_missing_variables_as_false() {
        assert_eq!(evaluate("getenv('ORIGAMI_TEST_SURELY_UNSET_VARIABLE');"), "false");
    }

    #[test]
    fn os_namespace_requires_a_root() {
        let restricted = Engine::new(EngineConfig::default().with_resolver(ResolverMode::Restricted));
        assert_eq!(
            restricted.evaluate("use std\\os;"),
            "Parse error: namespace `std\\os` not found in inmem.zy on line 1"
        );
    }

    #[test]
    fn files_round_trip_below_the_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = rooted(&dir);
        let script = r#"
            use std\os;
            [
                os::file_exists('note.txt'),
                os::file_put_contents('note.txt', 'hi'),
                os::file_get_contents('note.txt'),
                os::file_exists('./note.txt'),
                os::file_get_contents('missing.txt'),
            ];
        "#;
        assert_eq!(engine.evaluate(script), r#"[false, 2, "hi", true, false]"#);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("note.txt")).expect("written by script"),
            "hi"
        );
        assert_eq!(
            engine.evaluate("use std\\os; os::getcwd();"),
            dir.path().display().to_string()
        );
    }

    #[test]
    fn paths_cannot_escape_the_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = rooted(&dir);
        fatal(
            &engine.evaluate("use std\\os; os::file_get_contents('../secret');"),
            "file_get_contents(): path \"../secret\" is outside the script root",
        );
        fatal(
            &engine.evaluate("use std\\os; os::file_put_contents('/tmp/x', 'y');"),
            "file_put_contents(): path \"/tmp/x\" is outside the script root",
        );
        fatal(
            &engine.evaluate("use std\\os; os::file_exists('');"),
            "file_exists(): path \"\" is outside the script root",
        );
    }
}
