//! The per-call execution environment: global symbol table, parser and
//! output sink. A `Vm` is built, populated by libraries, used for one
//! evaluation and dropped.

use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use crate::{
    ast::{ClassDecl, Expr, FunctionDecl, Program, Symbol},
    config::{Limits, OutputTarget},
    diagnostics::{Diagnostic, DiagnosticKind, Failure},
    library::Registrar,
    parser::Parser,
    runtime::Context,
    source::SourceUnit,
    value::{NativeFunction, Value},
};

/// Function and class names are case-insensitive.
pub fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

#[derive(Clone)]
pub enum Callable {
    User(Rc<FunctionDecl>),
    Native(NativeFunction),
}

impl Callable {
    pub fn name(&self) -> &str {
        match self {
            Callable::User(decl) => &decl.name,
            Callable::Native(native) => &native.name,
        }
    }
}

/// Class constant or property default: a ready value for library classes,
/// an expression evaluated on demand for script classes.
#[derive(Clone)]
pub enum Initializer {
    Value(Value),
    Expr(Expr),
}

#[derive(Clone)]
pub struct Method {
    pub name: String,
    pub callable: Callable,
    pub is_static: bool,
}

pub struct ClassDef {
    pub name: String,
    pub parent: Option<Rc<ClassDef>>,
    pub constants: IndexMap<String, Initializer>,
    pub properties: IndexMap<String, Initializer>,
    pub methods: IndexMap<String, Method>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>, parent: Option<Rc<ClassDef>>) -> Self {
        Self {
            name: name.into(),
            parent,
            constants: IndexMap::new(),
            properties: IndexMap::new(),
            methods: IndexMap::new(),
        }
    }

    pub fn from_decl(decl: &ClassDecl, parent: Option<Rc<ClassDef>>) -> Self {
        let mut class = Self::new(decl.qualified.clone(), parent);
        for (name, value) in &decl.constants {
            class
                .constants
                .insert(name.clone(), Initializer::Expr(value.clone()));
        }
        for property in &decl.properties {
            let init = match &property.default {
                Some(expr) => Initializer::Expr(expr.clone()),
                None => Initializer::Value(Value::null()),
            };
            class.properties.insert(property.name.clone(), init);
        }
        for method in &decl.methods {
            class.methods.insert(
                fold(&method.function.name),
                Method {
                    name: method.function.name.clone(),
                    callable: Callable::User(Rc::clone(&method.function)),
                    is_static: method.is_static,
                },
            );
        }
        class
    }

    pub fn with_constant(mut self, name: impl Into<String>, value: Value) -> Self {
        self.constants
            .insert(name.into(), Initializer::Value(value));
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties
            .insert(name.into(), Initializer::Value(value));
        self
    }

    pub fn with_method(self, function: NativeFunction) -> Self {
        self.with_native(function, false)
    }

    pub fn with_static_method(self, function: NativeFunction) -> Self {
        self.with_native(function, true)
    }

    fn with_native(mut self, function: NativeFunction, is_static: bool) -> Self {
        self.methods.insert(
            fold(&function.name),
            Method {
                name: function.name.clone(),
                callable: Callable::Native(function),
                is_static,
            },
        );
        self
    }

    /// Finds a method along the inheritance chain together with the class
    /// that declares it.
    pub fn find_method(self: &Rc<Self>, name: &str) -> Option<(Rc<ClassDef>, Method)> {
        let key = fold(name);
        let mut class = Some(Rc::clone(self));
        while let Some(current) = class {
            if let Some(method) = current.methods.get(&key) {
                return Some((Rc::clone(&current), method.clone()));
            }
            class = current.parent.clone();
        }
        None
    }

    pub fn find_constant(self: &Rc<Self>, name: &str) -> Option<(Rc<ClassDef>, Initializer)> {
        let mut class = Some(Rc::clone(self));
        while let Some(current) = class {
            if let Some(init) = current.constants.get(name) {
                return Some((Rc::clone(&current), init.clone()));
            }
            class = current.parent.clone();
        }
        None
    }

    /// `self` and its ancestors, root first.
    pub fn lineage(self: &Rc<Self>) -> Vec<Rc<ClassDef>> {
        let mut chain = vec![Rc::clone(self)];
        while let Some(parent) = chain.last().and_then(|class| class.parent.clone()) {
            chain.push(parent);
        }
        chain.reverse();
        chain
    }

    pub fn is_a(&self, name: &str) -> bool {
        let key = fold(name);
        let mut class = Some(self);
        while let Some(current) = class {
            if fold(&current.name) == key {
                return true;
            }
            class = current.parent.as_deref();
        }
        false
    }
}

/// Everything a script can reach by name.
#[derive(Default)]
pub struct Globals {
    pub functions: IndexMap<String, Callable>,
    pub classes: IndexMap<String, Rc<ClassDef>>,
    pub constants: IndexMap<String, Value>,
    pub variables: IndexMap<String, Value>,
    /// Library namespaces and the symbols registered under them.
    pub namespaces: IndexMap<String, Vec<String>>,
}

impl Globals {
    pub fn function(&self, name: &str) -> Option<&Callable> {
        self.functions.get(&fold(name))
    }

    pub fn class(&self, name: &str) -> Option<&Rc<ClassDef>> {
        self.classes.get(&fold(name))
    }

    pub fn find_class(&self, symbol: &Symbol) -> Option<Rc<ClassDef>> {
        symbol
            .candidates()
            .find_map(|name| self.class(name))
            .cloned()
    }
}

pub struct Vm {
    parser: Parser,
    globals: Globals,
    output: OutputTarget,
    limits: Limits,
    libraries: Vec<&'static str>,
}

impl Vm {
    pub fn new(parser: Parser, output: OutputTarget, limits: Limits) -> Self {
        Self {
            parser,
            globals: Globals::default(),
            output,
            limits,
            libraries: Vec::new(),
        }
    }

    /// Runs every library of `registrar` against this VM, once, in order.
    pub fn register(&mut self, registrar: &Registrar) {
        registrar.install(self);
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub(crate) fn globals_mut(&mut self) -> &mut Globals {
        &mut self.globals
    }

    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    pub(crate) fn parser_mut(&mut self) -> &mut Parser {
        &mut self.parser
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Names of the libraries that registered successfully.
    pub fn libraries(&self) -> &[&'static str] {
        &self.libraries
    }

    pub(crate) fn record_library(&mut self, name: &'static str) {
        self.libraries.push(name);
    }

    pub fn write(&self, text: &str) {
        self.output.write(text);
    }

    /// Parses `unit` and hoists its functions and classes into the global table.
    pub fn parse(&mut self, unit: &SourceUnit) -> Result<Program, Failure> {
        let program = self
            .parser
            .parse_string(unit.code(), unit.virtual_name())?;
        self.hoist(&program)
            .map_err(|diag| Failure::from(diag.locate(&program.sources)))?;
        Ok(program)
    }

    fn hoist(&mut self, program: &Program) -> Result<(), Diagnostic> {
        for (qualified, function) in &program.functions {
            let key = fold(qualified);
            if self.globals.functions.contains_key(&key) {
                return Err(Diagnostic::new(
                    DiagnosticKind::Parser,
                    format!("Cannot redeclare function {qualified}()"),
                )
                .with_span(function.span));
            }
            self.globals
                .functions
                .insert(key, Callable::User(Rc::clone(function)));
        }

        let mut declared = IndexSet::new();
        for decl in &program.classes {
            let key = fold(&decl.qualified);
            if self.globals.classes.contains_key(&key) || !declared.insert(key) {
                return Err(Diagnostic::new(
                    DiagnosticKind::Parser,
                    format!(
                        "Cannot declare class {}, because the name is already in use",
                        decl.qualified
                    ),
                )
                .with_span(decl.span));
            }
        }

        // Parents may be declared after their children.
        let mut pending: Vec<&Rc<ClassDecl>> = program.classes.iter().collect();
        while !pending.is_empty() {
            let before = pending.len();
            let mut blocked = Vec::new();
            for decl in pending {
                let parent = match &decl.parent {
                    None => Some(None),
                    Some(symbol) => self.globals.find_class(symbol).map(Some),
                };
                match parent {
                    Some(parent) => {
                        let class = ClassDef::from_decl(decl, parent);
                        self.globals
                            .classes
                            .insert(fold(&decl.qualified), Rc::new(class));
                    }
                    None => blocked.push(decl),
                }
            }
            if blocked.len() == before {
                let decl = blocked[0];
                let parent = decl
                    .parent
                    .as_ref()
                    .map(|symbol| symbol.qualified.as_str())
                    .unwrap_or_default();
                return Err(
                    Diagnostic::runtime(format!("Class \"{parent}\" not found")).with_span(decl.span)
                );
            }
            pending = blocked;
        }
        Ok(())
    }

    /// Context whose first frame holds the global variables plus every
    /// name in `initial_variables` (as `null` unless already set).
    pub fn create_context(&self, initial_variables: &[String]) -> Context<'_> {
        let mut scope = self.globals.variables.clone();
        for name in initial_variables {
            scope.entry(name.clone()).or_insert_with(Value::null);
        }
        Context::new(self, scope)
    }
}
