use origami::evaluate;
use pretty_assertions::assert_eq;

fn fatal(result: &str, message: &str) {
    assert!(
        result.starts_with(&format!("Fatal error: {message}")),
        "expected fatal error {message:?}, got {result:?}"
    );
}

#[test]
fn loops_honour_break_and_continue() {
    let script = r#"
        $out = [];
        for ($i = 0; $i < 10; $i++) {
            if ($i % 2 == 0) { continue; }
            if ($i > 7) { break; }
            $out[] = $i;
        }
        $out;
    "#;
    assert_eq!(evaluate(script), "[1, 3, 5, 7]");
    assert_eq!(evaluate("$n = 0; do { $n++; } while ($n < 5); $n;"), "5");
    assert_eq!(evaluate("$n = 10; do { $n++; } while (false); $n;"), "11");
}

#[test]
fn if_chains_pick_one_branch() {
    let script = r#"
        function classify($n) {
            if ($n < 0) {
                return 'neg';
            } elseif ($n == 0) {
                return 'zero';
            } else if ($n < 10) {
                return 'small';
            } else {
                return 'big';
            }
        }
        [classify(-1), classify(0), classify(5), classify(50)];
    "#;
    assert_eq!(evaluate(script), r#"["neg", "zero", "small", "big"]"#);
}

#[test]
fn foreach_walks_keys_and_values_in_order() {
    let script = r#"
        $pairs = [];
        foreach (['b' => 2, 'a' => 1] as $key => $value) {
            $pairs[] = "$key=$value";
        }
        implode(',', $pairs);
    "#;
    assert_eq!(evaluate(script), "b=2,a=1");
    assert_eq!(
        evaluate("$sum = 0; foreach ([1, 2, 3] as $n) { $sum += $n; } $sum;"),
        "6"
    );
}

#[test]
fn foreach_rejects_scalars() {
    fatal(
        &evaluate("foreach (5 as $x) { }"),
        "foreach() argument must be of type array|object, int given",
    );
}

#[test]
fn functions_support_defaults_variadics_and_spread() {
    assert_eq!(
        evaluate("function greet($name, $greeting = 'Hello') { return \"$greeting, $name!\"; } greet('Ada');"),
        "Hello, Ada!"
    );
    assert_eq!(
        evaluate("function total(...$nums) { return array_sum($nums); } [total(1, 2, 3), total(...[4, 5])];"),
        "[6, 9]"
    );
}

#[test]
fn functions_are_hoisted_and_case_insensitive() {
    assert_eq!(evaluate("SHOUT('x'); function Shout($s) { return strtoupper($s); }"), "X");
    assert_eq!(evaluate("STRLEN('abc');"), "3");
}

#[test]
fn calling_with_too_few_arguments_fails() {
    fatal(
        &evaluate("function pair($a, $b) { return $a; } pair(1);"),
        "Too few arguments to function pair()",
    );
}

#[test]
fn undefined_functions_and_variables_are_fatal() {
    assert_eq!(
        evaluate("nope();"),
        "Fatal error: Call to undefined function nope() in inmem.zy on line 1"
    );
    assert_eq!(
        evaluate("\n$missing + 1;"),
        "Fatal error: Undefined variable $missing in inmem.zy on line 2"
    );
}

#[test]
fn duplicate_function_declarations_fail() {
    let result = evaluate("function twice() {} function TWICE() {}");
    assert!(result.starts_with("Parse error: Cannot redeclare function TWICE()"), "{result}");
}

#[test]
fn closures_capture_by_value() {
    let script = r#"
        $factor = 3;
        $mul = function ($x) use ($factor) { return $x * $factor; };
        $factor = 10;
        $mul(2);
    "#;
    assert_eq!(evaluate(script), "6");
    assert_eq!(
        evaluate("$base = 5; $add = fn ($x) => $x + $base; array_map($add, [1, 2]);"),
        "[6, 7]"
    );
    assert_eq!(evaluate("array_map('strtoupper', ['a', 'b']);"), r#"["A", "B"]"#);
}

#[test]
fn arrays_copy_on_assignment() {
    assert_eq!(
        evaluate("$a = [1, 2]; $b = $a; $b[] = 3; [count($a), count($b)];"),
        "[2, 3]"
    );
    assert_eq!(
        evaluate("$m = ['x' => ['y' => 1]]; $m['x']['y'] = 5; $m['x']['z'] = 6; $m;"),
        r#"["x" => ["y" => 5, "z" => 6]]"#
    );
}

#[test]
fn unset_leaves_holes_in_lists() {
    assert_eq!(evaluate("$a = [1, 2, 3]; unset($a[1]); $a;"), "[0 => 1, 2 => 3]");
    assert_eq!(evaluate("$a = [1, 2]; $a[] = 3; $a;"), "[1, 2, 3]");
}

#[test]
fn array_union_keeps_left_keys() {
    assert_eq!(
        evaluate("['a' => 1] + ['a' => 2, 'b' => 3];"),
        r#"["a" => 1, "b" => 3]"#
    );
}

#[test]
fn isset_empty_and_coalesce_read_quietly() {
    assert_eq!(
        evaluate("$a = ['k' => null]; [isset($a['k']), isset($a['z']), empty($a['z']), $a['z'] ?? 'dflt'];"),
        r#"[false, false, true, "dflt"]"#
    );
    assert_eq!(evaluate("$x ??= 4; $x;"), "4");
    assert_eq!(evaluate("0 ?: 'fallback';"), "fallback");
}

#[test]
fn arithmetic_follows_integer_and_float_rules() {
    assert_eq!(evaluate("[7 / 2, 6 / 2, 7 % 3, -7 % 3, 2 * 3 + 1];"), "[3.5, 3, 1, -1, 7]");
    assert_eq!(evaluate("PHP_INT_MAX + 1;"), "9.223372036854776E+18");
    fatal(&evaluate("1 / 0;"), "Division by zero");
    fatal(&evaluate("1 % 0;"), "Modulo by zero");
    fatal(&evaluate("[] - 1;"), "Unsupported operand types: array - int");
}

#[test]
fn increments_and_decrements() {
    assert_eq!(evaluate("$i = 5; [$i++, $i, ++$i, $i--, $i];"), "[5, 6, 7, 7, 6]");
}

#[test]
fn comparisons_and_casts() {
    assert_eq!(
        evaluate("[1 == '1', 1 === '1', 'abc' < 'abd', null ?? 5, !0];"),
        "[true, false, true, 5, true]"
    );
    assert_eq!(
        evaluate("[(int) 3.9, (float) '2.5', (bool) '', (string) 10];"),
        r#"[3, 2.5, false, "10"]"#
    );
}

#[test]
fn strings_concatenate_and_interpolate() {
    assert_eq!(evaluate("'abc' . 1 . 2.5;"), "abc12.5");
    assert_eq!(evaluate("$s = 'a'; $s .= 'b'; $s .= 3; $s;"), "ab3");
    assert_eq!(evaluate("$who = 'world'; \"hello $who\";"), "hello world");
    assert_eq!(evaluate("'no $interpolation here';"), "no $interpolation here");
    assert_eq!(evaluate("\"tab\\tnewline\\n\";"), "tab\tnewline\n");
}

#[test]
fn classes_support_inheritance_and_late_static_binding() {
    let script = r#"
        class Animal {
            const KIND = 'animal';
            protected $name;

            public function __construct($name) { $this->name = $name; }
            public function speak() { return $this->name . ' makes ' . $this->sound(); }
            public function sound() { return '...'; }
            public static function create($name) { return new static($name); }
        }

        class Dog extends Animal {
            const KIND = 'dog';
            public function sound() { return 'woof'; }
            public function describe() { return parent::speak() . ' (' . self::KIND . ')'; }
        }

        $dog = Dog::create('Rex');
        [$dog->speak(), $dog->describe(), $dog instanceof Animal, Animal::KIND];
    "#;
    assert_eq!(
        evaluate(script),
        r#"["Rex makes woof", "Rex makes woof (dog)", true, "animal"]"#
    );
}

#[test]
fn objects_are_shared_handles() {
    assert_eq!(
        evaluate("class Counter { public $n = 0; } $a = new Counter(); $b = $a; $b->n = 2; $a->n;"),
        "2"
    );
}

#[test]
fn class_errors_are_reported() {
    assert_eq!(
        evaluate("new Missing();"),
        "Fatal error: Class \"Missing\" not found in inmem.zy on line 1"
    );
    fatal(
        &evaluate("class A {} $a = new A(); $a->nothing();"),
        "Call to undefined method A::nothing()",
    );
    fatal(&evaluate("class Child extends Nowhere {}"), "Class \"Nowhere\" not found");
}

#[test]
fn exceptions_are_caught_by_class() {
    let script = r#"
        function risky($n) {
            if ($n > 1) {
                throw new InvalidArgumentException("too big: $n", 7);
            }
            return $n;
        }
        $log = [];
        try {
            risky(5);
            $log[] = 'unreachable';
        } catch (RuntimeException $e) {
            $log[] = 'runtime';
        } catch (LogicException $e) {
            $log[] = $e->getMessage();
            $log[] = $e->getCode();
        } finally {
            $log[] = 'finally';
        }
        $log;
    "#;
    assert_eq!(evaluate(script), r#"["too big: 5", 7, "finally"]"#);
}

#[test]
fn throwable_catches_script_exceptions() {
    let script = r#"
        class MyError extends Exception {}
        $caught = '';
        try {
            throw new MyError('custom');
        } catch (Throwable $t) {
            $caught = $t->getMessage();
        }
        $caught;
    "#;
    assert_eq!(evaluate(script), "custom");
    assert_eq!(
        evaluate("try { throw new Exception('a'); } catch (TypeError | Exception) { 'multi'; }"),
        "multi"
    );
}

#[test]
fn runtime_faults_are_not_catchable() {
    assert_eq!(
        evaluate("try { intdiv(1, 0); } catch (Throwable $t) { 'caught'; }"),
        "Fatal error: Division by zero in inmem.zy on line 1"
    );
}

#[test]
fn only_exceptions_can_be_thrown() {
    fatal(
        &evaluate("class Plain {} throw new Plain();"),
        "Cannot throw objects that do not extend Exception",
    );
    fatal(&evaluate("throw 5;"), "Can only throw objects");
}

#[test]
fn exceptions_convert_to_strings() {
    assert_eq!(evaluate("(string) new RuntimeException('oops');"), "RuntimeException: oops");
}

#[test]
fn namespaces_qualify_declarations() {
    assert_eq!(
        evaluate("namespace app\\util; function twice($x) { return $x * 2; } twice(4);"),
        "8"
    );
    assert_eq!(evaluate("namespace app; strlen('ab');"), "2");
    assert_eq!(evaluate("\\std\\math\\abs(-2);"), "2");
}

#[test]
fn library_namespaces_import_with_aliases() {
    assert_eq!(evaluate("use std\\math; math::sqrt(16);"), "4");
    assert_eq!(evaluate("use std\\math; math::PI;"), "3.141592653589793");
    assert_eq!(evaluate("use std\\string as s; s::upper('x');"), "X");
    assert_eq!(evaluate("use std\\array; array::sum([1, 2, 3]);"), "6");
    assert_eq!(evaluate("use std/array, std\\math; array::len([math::E]);"), "1");
}

#[test]
fn unknown_namespaces_fail_at_parse_time() {
    assert_eq!(
        evaluate("use nowhere;"),
        "Parse error: namespace `nowhere` not found in inmem.zy on line 1"
    );
}

#[test]
fn syntax_errors_are_parse_errors() {
    for script in [
        "$x = ;",
        "'unterminated",
        "function f() { class A {} }",
        "if (true) { use std\\math; }",
        "1 = 2;",
    ] {
        let result = evaluate(script);
        assert!(result.starts_with("Parse error: "), "{script:?} gave {result:?}");
    }
}

#[test]
fn block_results_flow_to_the_top_level() {
    assert_eq!(evaluate("if (true) { 1; 2; }"), "2");
    assert_eq!(evaluate("$x = 1; if ($x) { 'yes'; } else { 'no'; }"), "yes");
    assert_eq!(evaluate("1; echo '';"), "");
}
