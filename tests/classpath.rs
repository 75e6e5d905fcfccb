use std::{fs, io, path::Path};

use origami::{
    classpath::canonical_namespace, ClassPathResolver, Engine, EngineConfig, LoadableDefinition,
    OutputTarget, ResolveError, ResolverMode,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn write(root: &Path, relative: &str, code: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create namespace directory");
    }
    fs::write(path, code).expect("write namespace file");
}

fn project() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    write(
        dir.path(),
        "lib/geometry.zy",
        r#"<?php
namespace lib\geometry;

const UNIT = 1;

class Point {
    public $x;
    public $y;

    public function __construct($x, $y) {
        $this->x = $x;
        $this->y = $y;
    }

    public function sum() {
        return $this->x + $this->y;
    }
}

function origin() {
    return new Point(0, 0);
}
"#,
    );
    write(dir.path(), "greeting.zy", "function hello($who) { return \"hello $who\"; }");
    write(dir.path(), "cycle/a.zy", "use cycle\\b; function fa() { return 'a'; }");
    write(dir.path(), "cycle/b.zy", "use cycle\\a; function fb() { return fa() . 'b'; }");
    write(dir.path(), "bad.zy", "function ok() {}\necho 'side effect';");
    dir
}

fn engine(mode: ResolverMode) -> Engine {
    Engine::new(
        EngineConfig::default()
            .with_resolver(mode)
            .with_output(OutputTarget::Discard),
    )
}

#[test]
fn imports_namespace_files_below_the_root() {
    let dir = project();
    let engine = engine(ResolverMode::filesystem(dir.path()));
    let script = r#"
        use lib\geometry;
        $p = new geometry\Point(1, 2);
        [$p->sum(), geometry::origin()->sum(), geometry::UNIT, $p instanceof \lib\geometry\Point];
    "#;
    assert_eq!(engine.evaluate(script), "[3, 0, 1, true]");
}

#[test]
fn files_without_a_namespace_declare_globals() {
    let dir = project();
    let engine = engine(ResolverMode::filesystem(dir.path()));
    assert_eq!(engine.evaluate("use greeting; hello('zy');"), "hello zy");
    assert_eq!(engine.evaluate("use greeting, greeting; hello('twice');"), "hello twice");
}

#[test]
fn cyclic_imports_load_each_file_once() {
    let dir = project();
    let engine = engine(ResolverMode::filesystem(dir.path()));
    assert_eq!(engine.evaluate("use cycle\\a; fb();"), "ab");
}

#[test]
fn imported_files_may_only_declare() {
    let dir = project();
    let engine = engine(ResolverMode::filesystem(dir.path()));
    let result = engine.evaluate("use bad;");
    assert!(
        result.starts_with("Parse error: only declarations are allowed in imported namespace files in "),
        "{result}"
    );
    assert!(result.contains("bad.zy on line 2"), "{result}");
}

#[test]
fn library_namespaces_win_over_files() {
    let dir = project();
    write(dir.path(), "std/math.zy", "function sqrt($x) { return 'shadowed'; }");
    let engine = engine(ResolverMode::filesystem(dir.path()));
    assert_eq!(engine.evaluate("use std\\math; math::sqrt(9);"), "3");
}

#[test]
fn restricted_mode_ignores_files_that_exist() {
    let dir = project();
    let engine = engine(ResolverMode::Restricted);
    assert_eq!(
        engine.evaluate("use greeting;"),
        "Parse error: namespace `greeting` not found in inmem.zy on line 1"
    );
}

#[test]
fn resolver_loads_sources_by_path() {
    let dir = project();
    let resolver = ClassPathResolver::new(ResolverMode::filesystem(dir.path()));
    match resolver.resolve("/lib/geometry") {
        Ok(LoadableDefinition::Source(unit)) => {
            assert!(unit.code().contains("namespace lib\\geometry;"));
            assert!(unit.virtual_name().ends_with("geometry.zy"), "{}", unit.virtual_name());
        }
        other => panic!("expected a source file, got {other:?}"),
    }
    assert!(matches!(
        resolver.resolve("missing"),
        Err(ResolveError::NotFound(name)) if name == "missing"
    ));
    assert!(matches!(resolver.resolve("../escape"), Err(ResolveError::Invalid(_))));
}

#[test]
fn registered_definitions_resolve_in_every_mode() {
    let mut resolver = ClassPathResolver::restricted();
    let key = resolver
        .register(
            "/vendor/tools",
            LoadableDefinition::Library {
                namespace: "vendor\\tools".into(),
                symbols: vec!["run".into()],
            },
        )
        .expect("valid namespace");
    assert_eq!(key, "vendor\\tools");
    assert!(resolver.is_registered("vendor/tools"));
    assert!(matches!(
        resolver.resolve("vendor\\tools"),
        Ok(LoadableDefinition::Library { symbols, .. }) if symbols == ["run"]
    ));
    assert!(matches!(resolver.resolve("greeting"), Err(ResolveError::NotFound(_))));
    assert_eq!(resolver.namespaces().collect::<Vec<_>>(), vec!["vendor\\tools"]);
}

#[test]
fn namespace_identifiers_are_normalised() {
    assert_eq!(canonical_namespace("std\\math").as_deref(), Some("std\\math"));
    assert_eq!(canonical_namespace("\\std/math").as_deref(), Some("std\\math"));
    assert_eq!(canonical_namespace(" _private\\x1 ").as_deref(), Some("_private\\x1"));
    for invalid in ["", "\\", "..", "a\\..\\b", "a\\1b", "a b", "a\\\\b"] {
        assert_eq!(canonical_namespace(invalid), None, "{invalid:?}");
    }
}

#[test]
fn mode_selection_depends_on_the_working_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mode = ResolverMode::select(Ok(dir.path().to_path_buf()));
    assert_eq!(mode, ResolverMode::filesystem(dir.path()));
    assert_eq!(mode.name(), "filesystem");
    assert_eq!(mode.root(), Some(dir.path()));

    let gone = dir.path().join("removed");
    assert_eq!(ResolverMode::select(Ok(gone)), ResolverMode::Restricted);
    let failed = ResolverMode::select(Err(io::Error::new(io::ErrorKind::NotFound, "no cwd")));
    assert_eq!(failed.name(), "restricted");
    assert_eq!(failed.root(), None);
}
