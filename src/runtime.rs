use std::{cmp::Ordering, rc::Rc};

use indexmap::IndexMap;

use crate::{
    ast::{
        Argument, ArrayItem, BinaryOp, CastType, CatchClause, ClassRef, Expr, ExprKind, FunctionDecl,
        Literal, LogicalOp, Program, Stmt, StmtKind, Symbol, UnaryOp,
    },
    config::MAX_STRING_LEN,
    diagnostics::{Diagnostic, DiagnosticKind, Failure, SourceSpan},
    environment::Environment,
    stack::ensure_sufficient_stack,
    value::{
        float_to_int, ArrayKey, ArrayValue, Closure, NativeFunction, Number, Object, ObjectRef, Value,
        ValueKind,
    },
    vm::{fold, Callable, ClassDef, Initializer, Method, Vm},
};

/// Why evaluation stopped early: an engine fault or a thrown script object.
#[derive(Debug, Clone)]
pub enum RuntimeError {
    Fault(Diagnostic),
    Exception {
        value: Value,
        span: Option<SourceSpan>,
    },
}

impl RuntimeError {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Fault(Diagnostic::runtime(message))
    }

    pub fn limit(message: impl Into<String>) -> Self {
        Self::Fault(Diagnostic::new(DiagnosticKind::Limit, message))
    }

    pub fn or_span(self, span: SourceSpan) -> Self {
        match self {
            Self::Fault(diag) => Self::Fault(diag.or_span(span)),
            Self::Exception { value, span: None } => Self::Exception {
                value,
                span: Some(span),
            },
            other => other,
        }
    }

    pub fn into_diagnostic(self) -> Diagnostic {
        match self {
            Self::Fault(diag) => diag,
            Self::Exception { value, span } => {
                let (class, message) = exception_summary(&value);
                let diag = Diagnostic::runtime(format!("Uncaught {class}: {message}"));
                match span {
                    Some(span) => diag.with_span(span),
                    None => diag,
                }
            }
        }
    }
}

impl From<Diagnostic> for RuntimeError {
    fn from(diag: Diagnostic) -> Self {
        Self::Fault(diag)
    }
}

fn exception_summary(value: &Value) -> (String, String) {
    match value.as_object() {
        Some(object) => {
            let object = object.borrow();
            let message = object
                .properties
                .get("message")
                .and_then(|message| message.scalar_string())
                .unwrap_or_default();
            (object.class.name.clone(), message)
        }
        None => (value.describe(), String::new()),
    }
}

type Result<T> = std::result::Result<T, RuntimeError>;

trait At<T> {
    fn at(self, span: SourceSpan) -> Result<T>;
}

impl<T> At<T> for Result<T> {
    fn at(self, span: SourceSpan) -> Result<T> {
        self.map_err(|err| err.or_span(span))
    }
}

fn append_text(text: &mut String, tail: &str) -> Result<()> {
    if text.len().saturating_add(tail.len()) > MAX_STRING_LEN {
        return Err(RuntimeError::limit(format!(
            "Maximum string length of {MAX_STRING_LEN} bytes exceeded"
        )));
    }
    text.push_str(tail);
    Ok(())
}

fn fault(message: impl Into<String>, span: SourceSpan) -> RuntimeError {
    RuntimeError::from(Diagnostic::runtime(message).with_span(span))
}

enum FlowControl {
    Next,
    NextValue(Value),
    Return(Option<Value>),
    Break,
    Continue,
}

/// `$this` and class scope of a frame.
#[derive(Default, Clone)]
struct Binding {
    this: Option<Value>,
    class: Option<Rc<ClassDef>>,
    static_class: Option<Rc<ClassDef>>,
}

struct Frame {
    scope: Environment,
    binding: Binding,
}

impl Frame {
    fn new(scope: Environment, binding: Binding) -> Self {
        Self { scope, binding }
    }
}

/// Where an assignment lands before any array path is applied.
enum Place {
    Variable(String),
    Property(ObjectRef, String),
}

/// Mutable state of one evaluation. Borrows the [`Vm`] it runs in, so it
/// cannot outlive the call that created it.
pub struct Context<'vm> {
    vm: &'vm Vm,
    global: Frame,
    stack: Vec<Frame>,
    functions: IndexMap<String, Callable>,
    constants: IndexMap<String, Value>,
    depth: usize,
    steps: u64,
}

impl Program {
    /// Runs the program and returns the value of its last expression
    /// statement, or of a top-level `return`.
    pub fn evaluate(&self, ctx: &mut Context<'_>) -> std::result::Result<Option<Value>, Failure> {
        ctx.run(self)
            .map_err(|err| Failure::Runtime(err.into_diagnostic().locate(&self.sources)))
    }
}

impl<'vm> Context<'vm> {
    pub(crate) fn new(vm: &'vm Vm, globals: IndexMap<String, Value>) -> Self {
        Self {
            vm,
            global: Frame::new(Environment::with_bindings(globals), Binding::default()),
            stack: Vec::new(),
            functions: IndexMap::new(),
            constants: IndexMap::new(),
            depth: 0,
            steps: 0,
        }
    }

    pub fn vm(&self) -> &'vm Vm {
        self.vm
    }

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.frame().scope.lookup(name).cloned()
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.frame_mut().scope.define(name, value);
    }

    pub fn variables(&self) -> &IndexMap<String, Value> {
        self.frame().scope.bindings()
    }

    /// `$this` of the innermost frame, set while a method runs.
    pub fn this(&self) -> Option<Value> {
        self.frame().binding.this.clone()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn write(&self, text: &str) {
        self.vm.write(text);
    }

    pub fn function_exists(&self, name: &str) -> bool {
        self.lookup_function(name.trim_start_matches('\\')).is_some()
    }

    pub fn class_exists(&self, name: &str) -> bool {
        self.vm.globals().class(name.trim_start_matches('\\')).is_some()
    }

    pub fn constant_value(&self, name: &str) -> Option<Value> {
        self.lookup_constant(name.trim_start_matches('\\'))
    }

    /// Defines a constant at runtime, as `define()` does.
    pub fn define_constant(&mut self, name: &str, value: Value) -> Result<()> {
        let name = name.trim_start_matches('\\');
        if self.lookup_constant(name).is_some() {
            return Err(RuntimeError::message(format!(
                "Constant {name} already defined"
            )));
        }
        self.constants.insert(name.to_string(), value);
        Ok(())
    }

    /// String conversion as `echo` and `.` apply it, including `__toString`.
    pub fn to_string_value(&mut self, value: &Value) -> Result<String> {
        if let Some(text) = value.scalar_string() {
            return Ok(text);
        }
        match value.kind() {
            ValueKind::Array(_) => Ok("Array".to_string()),
            ValueKind::Object(object) => {
                let class = Rc::clone(&object.borrow().class);
                let Some((declaring, method)) = class.find_method("__toString") else {
                    return Err(RuntimeError::message(format!(
                        "Object of class {} could not be converted to string",
                        class.name
                    )));
                };
                let result =
                    self.invoke_method(Some(value.clone()), Rc::clone(&class), declaring, &method, Vec::new())?;
                match result.as_str() {
                    Some(text) => Ok(text.to_string()),
                    None => Err(RuntimeError::message(format!(
                        "{}::__toString(): Return value must be of type string, {} returned",
                        class.name,
                        result.type_name()
                    ))),
                }
            }
            _ => Err(RuntimeError::message(
                "Object of class Closure could not be converted to string",
            )),
        }
    }

    /// Whether `value` can be invoked through [`Context::call_value`].
    pub fn is_callable(&self, value: &Value) -> bool {
        match value.kind() {
            ValueKind::Closure(_) | ValueKind::Native(_) => true,
            ValueKind::String(name) => match name.split_once("::") {
                Some((class, method)) => self
                    .vm
                    .globals()
                    .class(class.trim_start_matches('\\'))
                    .is_some_and(|class| class.find_method(method).is_some()),
                None => self.function_exists(name),
            },
            ValueKind::Array(array) if array.len() == 2 => {
                let (Some(target), Some(method)) = (
                    array.get(&ArrayKey::Int(0)),
                    array.get(&ArrayKey::Int(1)).and_then(Value::as_str),
                ) else {
                    return false;
                };
                let class = match target.kind() {
                    ValueKind::Object(object) => Some(Rc::clone(&object.borrow().class)),
                    ValueKind::String(name) => self.vm.globals().class(name).cloned(),
                    _ => None,
                };
                class.is_some_and(|class| class.find_method(method).is_some())
            }
            _ => false,
        }
    }

    /// Invokes a closure, native function, function name, `"Class::method"`
    /// string or `[$object, "method"]` pair.
    pub fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value> {
        match callee.kind() {
            ValueKind::Closure(closure) => self.call_closure(closure, args),
            ValueKind::Native(native) => native.call(self, &args),
            ValueKind::String(name) => {
                if let Some((class, method)) = name.split_once("::") {
                    let class = self.class_named(class)?;
                    return self.call_static_on(class, method, args, false);
                }
                match self.lookup_function(name.trim_start_matches('\\')) {
                    Some(callable) => self.invoke(&callable, args, Binding::default()),
                    None => Err(RuntimeError::message(format!(
                        "Call to undefined function {name}()"
                    ))),
                }
            }
            ValueKind::Array(array) if array.len() == 2 => {
                let target = array.get(&ArrayKey::Int(0)).cloned();
                let method = array
                    .get(&ArrayKey::Int(1))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                match (target, method) {
                    (Some(target), Some(method)) if target.as_object().is_some() => {
                        self.call_method(&target, &method, args)
                    }
                    (Some(target), Some(method)) => match target.as_str() {
                        Some(class) => {
                            let class = self.class_named(class)?;
                            self.call_static_on(class, &method, args, false)
                        }
                        None => Err(RuntimeError::message("Array callback must have exactly two elements")),
                    },
                    _ => Err(RuntimeError::message("Array callback must have exactly two elements")),
                }
            }
            _ => Err(RuntimeError::message(format!(
                "Value of type {} is not callable",
                callee.describe()
            ))),
        }
    }

    /// Instantiates a class by name and runs its constructor.
    pub fn new_object(&mut self, class: &str, args: Vec<Value>) -> Result<Value> {
        let class = self.class_named(class)?;
        self.instantiate(&class, args)
    }

    /// Builds a script exception of `class` carrying `message`, ready to be
    /// returned from a native function.
    pub fn throw(&mut self, class: &str, message: impl Into<String>) -> RuntimeError {
        match self.new_object(class, vec![Value::string(message)]) {
            Ok(value) => RuntimeError::Exception { value, span: None },
            Err(err) => err,
        }
    }

    fn frame(&self) -> &Frame {
        self.stack.last().unwrap_or(&self.global)
    }

    fn frame_mut(&mut self) -> &mut Frame {
        match self.stack.last_mut() {
            Some(frame) => frame,
            None => &mut self.global,
        }
    }

    fn tick(&mut self, span: SourceSpan) -> Result<()> {
        self.steps += 1;
        match self.vm.limits().max_steps {
            Some(max) if self.steps > max => Err(RuntimeError::from(
                Diagnostic::new(
                    DiagnosticKind::Limit,
                    format!("Maximum execution steps of {max} exceeded"),
                )
                .with_span(span),
            )),
            _ => Ok(()),
        }
    }

    fn enter(&mut self, frame: Frame) -> Result<()> {
        let limit = self.vm.limits().max_call_depth;
        if self.depth >= limit {
            return Err(RuntimeError::limit(format!(
                "Maximum call depth of {limit} exceeded"
            )));
        }
        self.depth += 1;
        self.stack.push(frame);
        Ok(())
    }

    fn leave(&mut self) {
        self.stack.pop();
        self.depth = self.depth.saturating_sub(1);
    }

    fn run(&mut self, program: &Program) -> Result<Option<Value>> {
        for stmt in &program.prelude {
            self.execute_statement(stmt)?;
        }
        let mut last = None;
        for stmt in &program.statements {
            match self.execute_statement(stmt)? {
                FlowControl::Next => last = None,
                FlowControl::NextValue(value) => last = Some(value),
                FlowControl::Return(value) => return Ok(value),
                FlowControl::Break => return Err(fault("`break` outside loop", stmt.span)),
                FlowControl::Continue => return Err(fault("`continue` outside loop", stmt.span)),
            }
        }
        Ok(last)
    }

    fn execute_statement(&mut self, stmt: &Stmt) -> Result<FlowControl> {
        ensure_sufficient_stack(|| self.execute_statement_inner(stmt))
    }

    fn execute_statement_inner(&mut self, stmt: &Stmt) -> Result<FlowControl> {
        self.tick(stmt.span)?;
        match &stmt.kind {
            StmtKind::Expr(expr) => Ok(FlowControl::NextValue(self.evaluate(expr)?)),
            StmtKind::Echo(values) => {
                for expr in values {
                    let value = self.evaluate(expr)?;
                    let text = self.to_string_value(&value).at(expr.span)?;
                    self.vm.write(&text);
                }
                Ok(FlowControl::Next)
            }
            StmtKind::Block(statements) => self.execute_block(statements),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute_block(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute_block(else_branch)
                } else {
                    Ok(FlowControl::Next)
                }
            }
            StmtKind::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    match self.execute_block(body)? {
                        FlowControl::Break => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                        _ => {}
                    }
                    self.tick(stmt.span)?;
                }
                Ok(FlowControl::Next)
            }
            StmtKind::DoWhile { body, condition } => {
                loop {
                    match self.execute_block(body)? {
                        FlowControl::Break => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                        _ => {}
                    }
                    if !self.evaluate(condition)?.is_truthy() {
                        break;
                    }
                    self.tick(stmt.span)?;
                }
                Ok(FlowControl::Next)
            }
            StmtKind::For {
                init,
                condition,
                step,
                body,
            } => {
                for expr in init {
                    self.evaluate(expr)?;
                }
                loop {
                    let mut proceed = true;
                    for expr in condition {
                        proceed = self.evaluate(expr)?.is_truthy();
                    }
                    if !proceed {
                        break;
                    }
                    match self.execute_block(body)? {
                        FlowControl::Break => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                        _ => {}
                    }
                    for expr in step {
                        self.evaluate(expr)?;
                    }
                    self.tick(stmt.span)?;
                }
                Ok(FlowControl::Next)
            }
            StmtKind::Foreach {
                subject,
                key,
                value,
                body,
            } => {
                let iterated = self.evaluate(subject)?;
                let entries: Vec<(Value, Value)> = match iterated.kind() {
                    ValueKind::Array(array) => array
                        .iter()
                        .map(|(key, value)| (key.to_value(), value.clone()))
                        .collect(),
                    ValueKind::Object(object) => object
                        .borrow()
                        .properties
                        .iter()
                        .map(|(name, value)| (Value::string(name.clone()), value.clone()))
                        .collect(),
                    _ => {
                        return Err(fault(
                            format!(
                                "foreach() argument must be of type array|object, {} given",
                                iterated.type_name()
                            ),
                            subject.span,
                        ));
                    }
                };
                for (entry_key, entry_value) in entries {
                    if let Some(key) = key {
                        self.set_variable(key.clone(), entry_key);
                    }
                    self.set_variable(value.clone(), entry_value);
                    match self.execute_block(body)? {
                        FlowControl::Break => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                        _ => {}
                    }
                    self.tick(stmt.span)?;
                }
                Ok(FlowControl::Next)
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => Some(self.evaluate(expr)?),
                    None => None,
                };
                Ok(FlowControl::Return(value))
            }
            StmtKind::Unset(targets) => {
                for target in targets {
                    self.unset(target)?;
                }
                Ok(FlowControl::Next)
            }
            StmtKind::Break => Ok(FlowControl::Break),
            StmtKind::Continue => Ok(FlowControl::Continue),
            StmtKind::Throw(expr) => {
                let value = self.evaluate(expr)?;
                match value.as_object() {
                    Some(object) if object.borrow().class.is_a("Exception") => {
                        Err(RuntimeError::Exception {
                            value,
                            span: Some(stmt.span),
                        })
                    }
                    Some(_) => Err(fault(
                        "Cannot throw objects that do not extend Exception",
                        expr.span,
                    )),
                    None => Err(fault("Can only throw objects", expr.span)),
                }
            }
            StmtKind::Try {
                body,
                catches,
                finally,
            } => self.execute_try(body, catches, finally.as_deref()),
            StmtKind::Function { qualified, function } => {
                if self.lookup_function(qualified).is_some() {
                    return Err(fault(
                        format!("Cannot redeclare function {qualified}()"),
                        stmt.span,
                    ));
                }
                self.functions
                    .insert(fold(qualified), Callable::User(Rc::clone(function)));
                Ok(FlowControl::Next)
            }
            StmtKind::Const { qualified, value } => {
                let value = self.evaluate(value)?;
                self.define_constant(qualified, value).at(stmt.span)?;
                Ok(FlowControl::Next)
            }
        }
    }

    fn execute_block(&mut self, statements: &[Stmt]) -> Result<FlowControl> {
        let mut last = FlowControl::Next;
        for stmt in statements {
            match self.execute_statement(stmt)? {
                flow @ (FlowControl::Next | FlowControl::NextValue(_)) => last = flow,
                flow => return Ok(flow),
            }
        }
        Ok(last)
    }

    fn execute_try(
        &mut self,
        body: &[Stmt],
        catches: &[CatchClause],
        finally: Option<&[Stmt]>,
    ) -> Result<FlowControl> {
        let mut outcome = self.execute_block(body);
        let thrown = match &outcome {
            Err(RuntimeError::Exception { value, .. }) => Some(value.clone()),
            _ => None,
        };
        if let Some(value) = thrown {
            let mut handler = None;
            for clause in catches {
                if self.catches(clause, &value)? {
                    handler = Some(clause);
                    break;
                }
            }
            if let Some(clause) = handler {
                if let Some(binding) = &clause.binding {
                    self.set_variable(binding.clone(), value);
                }
                outcome = self.execute_block(&clause.body);
            }
        }
        if let Some(finally) = finally {
            match self.execute_block(finally)? {
                FlowControl::Next | FlowControl::NextValue(_) => {}
                flow => return Ok(flow),
            }
        }
        outcome
    }

    fn catches(&mut self, clause: &CatchClause, value: &Value) -> Result<bool> {
        for class in &clause.classes {
            if let ClassRef::Named(symbol) = class {
                if symbol.candidates().any(|name| fold(name) == "throwable") {
                    return Ok(true);
                }
            }
            if self.instance_of(value, class)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub(crate) fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        ensure_sufficient_stack(|| self.evaluate_inner(expr))
    }

    fn evaluate_inner(&mut self, expr: &Expr) -> Result<Value> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(literal_value(literal)),
            ExprKind::Interpolated(parts) => {
                let mut text = String::new();
                for part in parts {
                    let value = self.evaluate(part)?;
                    let piece = self.to_string_value(&value).at(part.span)?;
                    append_text(&mut text, &piece).at(part.span)?;
                }
                Ok(Value::string(text))
            }
            ExprKind::Variable(name) => self.read_variable(name, span),
            ExprKind::Constant(symbol) => self.constant(symbol).at(span),
            ExprKind::ArrayLiteral(items) => self.array_literal(items),
            ExprKind::Binary { op, left, right } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                self.binary(*op, &left, &right).at(span)
            }
            ExprKind::Logical { op, left, right } => match op {
                LogicalOp::And => Ok(Value::bool(
                    self.evaluate(left)?.is_truthy() && self.evaluate(right)?.is_truthy(),
                )),
                LogicalOp::Or => Ok(Value::bool(
                    self.evaluate(left)?.is_truthy() || self.evaluate(right)?.is_truthy(),
                )),
                LogicalOp::Coalesce => match self.evaluate_quiet(left)? {
                    Some(value) if !value.is_null() => Ok(value),
                    _ => self.evaluate(right),
                },
            },
            ExprKind::Unary { op, expr: operand } => {
                let value = self.evaluate(operand)?;
                unary(*op, &value).at(span)
            }
            ExprKind::Cast { target, expr: inner } => {
                let value = self.evaluate(inner)?;
                self.cast(*target, value).at(span)
            }
            ExprKind::Assign { target, op, value } => self.assign(target, *op, value, span),
            ExprKind::CoalesceAssign { target, value } => {
                if let Some(current) = self.evaluate_quiet(target)? {
                    if !current.is_null() {
                        return Ok(current);
                    }
                }
                let value = self.evaluate(value)?;
                self.store(target, value.clone())?;
                Ok(value)
            }
            ExprKind::Step {
                target,
                increment,
                prefix,
            } => self.step(target, *increment, *prefix, span),
            ExprKind::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.evaluate(condition)?;
                if condition.is_truthy() {
                    match then_branch {
                        Some(then_branch) => self.evaluate(then_branch),
                        None => Ok(condition),
                    }
                } else {
                    self.evaluate(else_branch)
                }
            }
            ExprKind::Call { function, args } => {
                let args = self.evaluate_args(args)?;
                self.call_function(function, args).at(span)
            }
            ExprKind::CallValue { callee, args } => {
                let callee = self.evaluate(callee)?;
                let args = self.evaluate_args(args)?;
                self.call_value(&callee, args).at(span)
            }
            ExprKind::MethodCall {
                target,
                method,
                args,
            } => {
                let target = self.evaluate(target)?;
                let args = self.evaluate_args(args)?;
                self.call_method(&target, method, args).at(span)
            }
            ExprKind::StaticCall {
                class,
                method,
                args,
            } => {
                let args = self.evaluate_args(args)?;
                self.call_static(class, method, args).at(span)
            }
            ExprKind::ClassConstant { class, name } => self.class_constant(class, name).at(span),
            ExprKind::Property { target, name } => {
                let target = self.evaluate(target)?;
                read_property(&target, name).at(span)
            }
            ExprKind::Index { target, index } => {
                let Some(index) = index else {
                    return Err(fault("Cannot use [] for reading", span));
                };
                let target = self.evaluate(target)?;
                let key = self.evaluate(index)?;
                read_index(&target, &key).at(span)
            }
            ExprKind::New { class, args } => {
                let class = self.resolve_class(class).at(span)?;
                let args = self.evaluate_args(args)?;
                self.instantiate(&class, args).at(span)
            }
            ExprKind::InstanceOf { expr: inner, class } => {
                let value = self.evaluate(inner)?;
                Ok(Value::bool(self.instance_of(&value, class).at(span)?))
            }
            ExprKind::Closure { function, captures } => {
                let mut bound = IndexMap::new();
                for name in captures {
                    let value = self.variable(name).unwrap_or_else(Value::null);
                    bound.insert(name.clone(), value);
                }
                Ok(self.closure(function, bound))
            }
            ExprKind::ArrowFunction { function } => {
                let bound = self.frame().scope.bindings().clone();
                Ok(self.closure(function, bound))
            }
            ExprKind::Isset(targets) => {
                for target in targets {
                    match self.evaluate_quiet(target)? {
                        Some(value) if !value.is_null() => {}
                        _ => return Ok(Value::bool(false)),
                    }
                }
                Ok(Value::bool(true))
            }
            ExprKind::Empty(target) => {
                let value = self.evaluate_quiet(target)?;
                Ok(Value::bool(!value.is_some_and(|value| value.is_truthy())))
            }
        }
    }

    fn read_variable(&self, name: &str, span: SourceSpan) -> Result<Value> {
        if name == "this" {
            return self
                .frame()
                .binding
                .this
                .clone()
                .ok_or_else(|| fault("Using $this when not in object context", span));
        }
        self.frame().scope.get(name, span)
    }

    /// Reads without failing on missing variables, keys or properties, as
    /// `??`, `isset` and `empty` do.
    fn evaluate_quiet(&mut self, expr: &Expr) -> Result<Option<Value>> {
        match &expr.kind {
            ExprKind::Variable(name) if name == "this" => Ok(self.frame().binding.this.clone()),
            ExprKind::Variable(name) => Ok(self.variable(name)),
            ExprKind::Index {
                target,
                index: Some(index),
            } => {
                let Some(target) = self.evaluate_quiet(target)? else {
                    return Ok(None);
                };
                let key = self.evaluate(index)?;
                match target.kind() {
                    ValueKind::Array(array) => {
                        let key = array_key(&key).at(index.span)?;
                        Ok(array.get(&key).cloned())
                    }
                    ValueKind::String(text) => Ok(string_offset(text, key.to_int()).map(Value::string)),
                    ValueKind::Object(_) => read_index(&target, &key).at(expr.span).map(Some),
                    _ => Ok(None),
                }
            }
            ExprKind::Property { target, name } => {
                let Some(target) = self.evaluate_quiet(target)? else {
                    return Ok(None);
                };
                Ok(target
                    .as_object()
                    .and_then(|object| object.borrow().properties.get(name).cloned()))
            }
            _ => self.evaluate(expr).map(Some),
        }
    }

    fn constant(&self, symbol: &Symbol) -> Result<Value> {
        symbol
            .candidates()
            .find_map(|name| self.lookup_constant(name))
            .ok_or_else(|| {
                RuntimeError::message(format!("Undefined constant \"{}\"", symbol.qualified))
            })
    }

    fn lookup_constant(&self, name: &str) -> Option<Value> {
        self.constants
            .get(name)
            .or_else(|| self.vm.globals().constants.get(name))
            .cloned()
    }

    fn lookup_function(&self, name: &str) -> Option<Callable> {
        let key = fold(name);
        self.functions
            .get(&key)
            .or_else(|| self.vm.globals().functions.get(&key))
            .cloned()
    }

    fn array_literal(&mut self, items: &[ArrayItem]) -> Result<Value> {
        let mut array = ArrayValue::new();
        for item in items {
            if item.spread {
                let value = self.evaluate(&item.value)?;
                let Some(source) = value.as_array() else {
                    return Err(fault("Only arrays can be unpacked", item.value.span));
                };
                for (key, value) in source.iter() {
                    match key {
                        ArrayKey::Int(_) => array.push(value.clone()),
                        ArrayKey::String(_) => array.insert(key.clone(), value.clone()),
                    }
                }
                continue;
            }
            match &item.key {
                Some(key) => {
                    let key_value = self.evaluate(key)?;
                    let key = array_key(&key_value).at(key.span)?;
                    let value = self.evaluate(&item.value)?;
                    array.insert(key, value);
                }
                None => {
                    let value = self.evaluate(&item.value)?;
                    array.push(value);
                }
            }
        }
        Ok(Value::array(array))
    }

    fn evaluate_args(&mut self, args: &[Argument]) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.evaluate(&arg.value)?;
            if !arg.spread {
                values.push(value);
                continue;
            }
            match value.as_array() {
                Some(array) => values.extend(array.values().cloned()),
                None => return Err(fault("Only arrays can be unpacked", arg.value.span)),
            }
        }
        Ok(values)
    }

    fn binary(&mut self, op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                arithmetic(op, left, right)
            }
            BinaryOp::Concat => {
                let mut text = self.to_string_value(left)?;
                append_text(&mut text, &self.to_string_value(right)?)?;
                Ok(Value::string(text))
            }
            BinaryOp::Equal => Ok(Value::bool(left.loose_equals(right))),
            BinaryOp::NotEqual => Ok(Value::bool(!left.loose_equals(right))),
            BinaryOp::Identical => Ok(Value::bool(left.strict_equals(right))),
            BinaryOp::NotIdentical => Ok(Value::bool(!left.strict_equals(right))),
            BinaryOp::Less => Ok(Value::bool(left.compare(right) == Some(Ordering::Less))),
            BinaryOp::LessEqual => Ok(Value::bool(matches!(
                left.compare(right),
                Some(Ordering::Less | Ordering::Equal)
            ))),
            BinaryOp::Greater => Ok(Value::bool(left.compare(right) == Some(Ordering::Greater))),
            BinaryOp::GreaterEqual => Ok(Value::bool(matches!(
                left.compare(right),
                Some(Ordering::Greater | Ordering::Equal)
            ))),
        }
    }

    fn cast(&mut self, target: CastType, value: Value) -> Result<Value> {
        Ok(match target {
            CastType::Int => Value::int(value.to_int()),
            CastType::Float => Value::float(value.to_float()),
            CastType::String => Value::string(self.to_string_value(&value)?),
            CastType::Bool => Value::bool(value.is_truthy()),
            CastType::Array => match value.kind() {
                ValueKind::Array(_) => value.clone(),
                ValueKind::Null => Value::array(ArrayValue::new()),
                ValueKind::Object(object) => Value::array(
                    object
                        .borrow()
                        .properties
                        .iter()
                        .map(|(name, value)| (ArrayKey::from(name.as_str()), value.clone()))
                        .collect(),
                ),
                _ => Value::list([value.clone()]),
            },
        })
    }

    fn assign(
        &mut self,
        target: &Expr,
        op: Option<BinaryOp>,
        value: &Expr,
        span: SourceSpan,
    ) -> Result<Value> {
        let value = match op {
            None => self.evaluate(value)?,
            Some(op) => {
                let current = self.evaluate_quiet(target)?.unwrap_or_else(Value::null);
                let operand = self.evaluate(value)?;
                self.binary(op, &current, &operand).at(span)?
            }
        };
        self.store(target, value.clone())?;
        Ok(value)
    }

    fn step(&mut self, target: &Expr, increment: bool, prefix: bool, span: SourceSpan) -> Result<Value> {
        let current = self.evaluate_quiet(target)?.unwrap_or_else(Value::null);
        let delta = if increment { 1 } else { -1 };
        let updated = match current.kind() {
            ValueKind::Null if increment => Value::int(1),
            ValueKind::Null | ValueKind::Bool(_) => current.clone(),
            _ => match current.to_number() {
                Some(Number::Int(n)) => n
                    .checked_add(delta)
                    .map(Value::int)
                    .unwrap_or_else(|| Value::float(n as f64 + delta as f64)),
                Some(Number::Float(f)) => Value::float(f + delta as f64),
                None => {
                    let verb = if increment { "increment" } else { "decrement" };
                    return Err(fault(format!("Cannot {verb} {}", current.describe()), span));
                }
            },
        };
        self.store(target, updated.clone())?;
        Ok(if prefix { updated } else { current })
    }

    fn store(&mut self, target: &Expr, value: Value) -> Result<()> {
        let (place, path) = self.resolve_place(target)?;
        self.store_place(place, &path, value).at(target.span)
    }

    fn resolve_place(&mut self, target: &Expr) -> Result<(Place, Vec<Option<ArrayKey>>)> {
        match &target.kind {
            ExprKind::Variable(name) if name == "this" => {
                Err(fault("Cannot re-assign $this", target.span))
            }
            ExprKind::Variable(name) => Ok((Place::Variable(name.clone()), Vec::new())),
            ExprKind::Property { target: owner, name } => {
                let owner = self.evaluate(owner)?;
                match owner.as_object() {
                    Some(object) => Ok((Place::Property(Rc::clone(object), name.clone()), Vec::new())),
                    None => Err(fault(
                        format!(
                            "Attempt to assign property \"{name}\" on {}",
                            owner.type_name()
                        ),
                        target.span,
                    )),
                }
            }
            ExprKind::Index { target: owner, index } => {
                let (place, mut path) = self.resolve_place(owner)?;
                let key = match index {
                    Some(index) => {
                        let key = self.evaluate(index)?;
                        Some(array_key(&key).at(index.span)?)
                    }
                    None => None,
                };
                path.push(key);
                Ok((place, path))
            }
            _ => Err(fault("Cannot assign to this expression", target.span)),
        }
    }

    fn store_place(&mut self, place: Place, path: &[Option<ArrayKey>], value: Value) -> Result<()> {
        match place {
            Place::Variable(name) => {
                if path.is_empty() {
                    self.set_variable(name, value);
                    return Ok(());
                }
                let mut container = self
                    .frame_mut()
                    .scope
                    .take(&name)
                    .unwrap_or_else(Value::null);
                let result = store_in(&mut container, path, value);
                self.set_variable(name, container);
                result
            }
            Place::Property(object, name) => {
                if path.is_empty() {
                    object.borrow_mut().properties.insert(name, value);
                    return Ok(());
                }
                let mut container = object
                    .borrow_mut()
                    .properties
                    .get_mut(&name)
                    .map(|slot| std::mem::replace(slot, Value::null()))
                    .unwrap_or_else(Value::null);
                let result = store_in(&mut container, path, value);
                object.borrow_mut().properties.insert(name, container);
                result
            }
        }
    }

    fn read_place(&self, place: &Place, path: &[Option<ArrayKey>]) -> Option<Value> {
        let mut current = match place {
            Place::Variable(name) => self.variable(name)?,
            Place::Property(object, name) => object.borrow().properties.get(name).cloned()?,
        };
        for key in path {
            let next = current.as_array()?.get(key.as_ref()?)?.clone();
            current = next;
        }
        Some(current)
    }

    fn unset(&mut self, target: &Expr) -> Result<()> {
        match &target.kind {
            ExprKind::Variable(name) => {
                self.frame_mut().scope.remove(name);
                Ok(())
            }
            ExprKind::Property { target: owner, name } => {
                let owner = self.evaluate(owner)?;
                if let Some(object) = owner.as_object() {
                    object.borrow_mut().properties.shift_remove(name);
                }
                Ok(())
            }
            ExprKind::Index { .. } => {
                let (place, mut path) = self.resolve_place(target)?;
                let Some(Some(key)) = path.pop() else {
                    return Err(fault("Cannot use [] for unsetting", target.span));
                };
                let Some(container) = self.read_place(&place, &path) else {
                    return Ok(());
                };
                if let Some(array) = container.as_array() {
                    if array.contains_key(&key) {
                        let mut array = array.clone();
                        array.remove(&key);
                        self.store_place(place, &path, Value::array(array))
                            .at(target.span)?;
                    }
                }
                Ok(())
            }
            _ => Err(fault("Cannot unset this expression", target.span)),
        }
    }

    fn closure(&self, function: &Rc<FunctionDecl>, bound: IndexMap<String, Value>) -> Value {
        let binding = &self.frame().binding;
        Value::new(ValueKind::Closure(Closure {
            function: Rc::clone(function),
            bound,
            this: binding.this.clone(),
            scope: binding.class.clone(),
        }))
    }

    fn call_function(&mut self, function: &Symbol, args: Vec<Value>) -> Result<Value> {
        let callable = function
            .candidates()
            .find_map(|name| self.lookup_function(name))
            .ok_or_else(|| {
                RuntimeError::message(format!(
                    "Call to undefined function {}()",
                    function.qualified
                ))
            })?;
        self.invoke(&callable, args, Binding::default())
    }

    fn invoke(&mut self, callable: &Callable, args: Vec<Value>, binding: Binding) -> Result<Value> {
        match callable {
            Callable::User(decl) => self.call_user(decl, args, Environment::new(), binding),
            Callable::Native(native) => self.call_native(native, args, binding),
        }
    }

    fn call_native(&mut self, native: &NativeFunction, args: Vec<Value>, binding: Binding) -> Result<Value> {
        if binding.this.is_none() && binding.class.is_none() {
            return native.call(self, &args);
        }
        self.enter(Frame::new(Environment::new(), binding))?;
        let result = native.call(self, &args);
        self.leave();
        result
    }

    fn call_closure(&mut self, closure: &Closure, args: Vec<Value>) -> Result<Value> {
        let static_class = match &closure.this {
            Some(this) => this.as_object().map(|object| Rc::clone(&object.borrow().class)),
            None => closure.scope.clone(),
        };
        let binding = Binding {
            this: closure.this.clone(),
            class: closure.scope.clone(),
            static_class,
        };
        let scope = Environment::with_bindings(closure.bound.clone());
        self.call_user(&closure.function, args, scope, binding)
    }

    fn call_user(
        &mut self,
        decl: &FunctionDecl,
        args: Vec<Value>,
        scope: Environment,
        binding: Binding,
    ) -> Result<Value> {
        self.enter(Frame::new(scope, binding))?;
        let result = ensure_sufficient_stack(|| self.run_function(decl, args));
        self.leave();
        result
    }

    fn run_function(&mut self, decl: &FunctionDecl, args: Vec<Value>) -> Result<Value> {
        self.bind_params(decl, args)?;
        match self.execute_block(&decl.body)? {
            FlowControl::Return(value) => Ok(value.unwrap_or_else(Value::null)),
            FlowControl::Break => Err(fault("`break` outside loop", decl.span)),
            FlowControl::Continue => Err(fault("`continue` outside loop", decl.span)),
            FlowControl::Next | FlowControl::NextValue(_) => Ok(Value::null()),
        }
    }

    fn bind_params(&mut self, decl: &FunctionDecl, args: Vec<Value>) -> Result<()> {
        let given = args.len();
        let required = decl
            .params
            .iter()
            .filter(|param| param.default.is_none() && !param.variadic)
            .count();
        let mut args = args.into_iter();
        for param in &decl.params {
            let value = if param.variadic {
                Value::list(args.by_ref())
            } else if let Some(value) = args.next() {
                value
            } else if let Some(default) = &param.default {
                self.evaluate(default)?
            } else {
                let bound = if required == decl.params.len() {
                    "exactly"
                } else {
                    "at least"
                };
                return Err(RuntimeError::message(format!(
                    "Too few arguments to function {}(), {given} passed and {bound} {required} expected",
                    decl.name
                )));
            };
            self.set_variable(param.name.clone(), value);
        }
        Ok(())
    }

    fn call_method(&mut self, target: &Value, method: &str, args: Vec<Value>) -> Result<Value> {
        let Some(object) = target.as_object() else {
            if target.is_callable_value() && method.eq_ignore_ascii_case("__invoke") {
                return self.call_value(target, args);
            }
            return Err(RuntimeError::message(format!(
                "Call to a member function {method}() on {}",
                target.type_name()
            )));
        };
        let class = Rc::clone(&object.borrow().class);
        match class.find_method(method) {
            Some((declaring, found)) => {
                self.invoke_method(Some(target.clone()), Rc::clone(&class), declaring, &found, args)
            }
            None => Err(RuntimeError::message(format!(
                "Call to undefined method {}::{method}()",
                class.name
            ))),
        }
    }

    fn invoke_method(
        &mut self,
        this: Option<Value>,
        static_class: Rc<ClassDef>,
        declaring: Rc<ClassDef>,
        method: &Method,
        args: Vec<Value>,
    ) -> Result<Value> {
        let binding = Binding {
            this: if method.is_static { None } else { this },
            class: Some(declaring),
            static_class: Some(static_class),
        };
        match &method.callable {
            Callable::User(decl) => self.call_user(decl, args, Environment::new(), binding),
            Callable::Native(native) => {
                self.enter(Frame::new(Environment::new(), binding))?;
                let result = native.call(self, &args);
                self.leave();
                result
            }
        }
    }

    fn call_static(&mut self, class: &ClassRef, method: &str, args: Vec<Value>) -> Result<Value> {
        let forwarding = !matches!(class, ClassRef::Named(_));
        let class = self.resolve_class(class)?;
        self.call_static_on(class, method, args, forwarding)
    }

    /// `Class::method()`. Instance methods reached through `parent::` or
    /// `self::` keep the current `$this`.
    fn call_static_on(
        &mut self,
        class: Rc<ClassDef>,
        method: &str,
        args: Vec<Value>,
        forwarding: bool,
    ) -> Result<Value> {
        let Some((declaring, found)) = class.find_method(method) else {
            return Err(RuntimeError::message(format!(
                "Call to undefined method {}::{method}()",
                class.name
            )));
        };
        let this = self.frame().binding.this.clone().filter(|this| {
            this.as_object()
                .is_some_and(|object| object.borrow().class.is_a(&class.name))
        });
        if !found.is_static && this.is_none() {
            return Err(RuntimeError::message(format!(
                "Non-static method {}::{}() cannot be called statically",
                declaring.name, found.name
            )));
        }
        let static_class = match &this {
            Some(this) => this
                .as_object()
                .map(|object| Rc::clone(&object.borrow().class))
                .unwrap_or_else(|| Rc::clone(&class)),
            None if forwarding => self
                .frame()
                .binding
                .static_class
                .clone()
                .unwrap_or_else(|| Rc::clone(&class)),
            None => Rc::clone(&class),
        };
        self.invoke_method(this, static_class, declaring, &found, args)
    }

    fn class_named(&self, name: &str) -> Result<Rc<ClassDef>> {
        let name = name.trim_start_matches('\\');
        self.vm
            .globals()
            .class(name)
            .cloned()
            .ok_or_else(|| RuntimeError::message(format!("Class \"{name}\" not found")))
    }

    fn resolve_class(&self, class: &ClassRef) -> Result<Rc<ClassDef>> {
        let binding = &self.frame().binding;
        match class {
            ClassRef::Named(symbol) => self.vm.globals().find_class(symbol).ok_or_else(|| {
                RuntimeError::message(format!("Class \"{}\" not found", symbol.qualified))
            }),
            ClassRef::SelfClass => binding.class.clone().ok_or_else(|| {
                RuntimeError::message("Cannot use \"self\" when no class scope is active")
            }),
            ClassRef::Parent => {
                let class = binding.class.clone().ok_or_else(|| {
                    RuntimeError::message("Cannot use \"parent\" when no class scope is active")
                })?;
                class.parent.clone().ok_or_else(|| {
                    RuntimeError::message(
                        "Cannot use \"parent\" when current class scope has no parent",
                    )
                })
            }
            ClassRef::Static => binding.static_class.clone().ok_or_else(|| {
                RuntimeError::message("Cannot use \"static\" when no class scope is active")
            }),
        }
    }

    fn class_constant(&mut self, class: &ClassRef, name: &str) -> Result<Value> {
        let class = self.resolve_class(class)?;
        if name.eq_ignore_ascii_case("class") {
            return Ok(Value::string(class.name.clone()));
        }
        let Some((declaring, init)) = class.find_constant(name) else {
            return Err(RuntimeError::message(format!(
                "Undefined constant {}::{name}",
                class.name
            )));
        };
        self.initialize(&declaring, &init)
    }

    /// Evaluates a constant or property initializer in the scope of the
    /// class that declares it.
    fn initialize(&mut self, class: &Rc<ClassDef>, init: &Initializer) -> Result<Value> {
        match init {
            Initializer::Value(value) => Ok(value.clone()),
            Initializer::Expr(expr) => {
                let binding = Binding {
                    this: None,
                    class: Some(Rc::clone(class)),
                    static_class: Some(Rc::clone(class)),
                };
                self.enter(Frame::new(Environment::new(), binding))?;
                let result = self.evaluate(expr);
                self.leave();
                result
            }
        }
    }

    fn instantiate(&mut self, class: &Rc<ClassDef>, args: Vec<Value>) -> Result<Value> {
        let mut object = Object::new(Rc::clone(class));
        for ancestor in class.lineage() {
            for (name, init) in &ancestor.properties {
                let value = self.initialize(&ancestor, init)?;
                object.properties.insert(name.clone(), value);
            }
        }
        let value = Value::object(object);
        if let Some((declaring, constructor)) = class.find_method("__construct") {
            self.invoke_method(
                Some(value.clone()),
                Rc::clone(class),
                declaring,
                &constructor,
                args,
            )?;
        }
        Ok(value)
    }

    fn instance_of(&self, value: &Value, class: &ClassRef) -> Result<bool> {
        let Some(object) = value.as_object() else {
            return Ok(false);
        };
        let class = match class {
            ClassRef::Named(symbol) => match self.vm.globals().find_class(symbol) {
                Some(class) => class,
                None => return Ok(false),
            },
            other => self.resolve_class(other)?,
        };
        Ok(object.borrow().class.is_a(&class.name))
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Int(n) => Value::int(*n),
        Literal::Float(f) => Value::float(*f),
        Literal::Bool(b) => Value::bool(*b),
        Literal::String(s) => Value::string(s.clone()),
        Literal::Null => Value::null(),
    }
}

fn array_key(value: &Value) -> Result<ArrayKey> {
    ArrayKey::from_value(value).ok_or_else(|| {
        RuntimeError::message(format!("Illegal offset type {}", value.type_name()))
    })
}

fn string_offset(text: &str, offset: i64) -> Option<String> {
    let len = text.chars().count() as i64;
    let index = if offset < 0 { len + offset } else { offset };
    if index < 0 || index >= len {
        return None;
    }
    text.chars().nth(index as usize).map(String::from)
}

fn read_index(target: &Value, key: &Value) -> Result<Value> {
    match target.kind() {
        ValueKind::Array(array) => {
            let key = array_key(key)?;
            Ok(array.get(&key).cloned().unwrap_or_else(Value::null))
        }
        ValueKind::String(text) => Ok(Value::string(
            string_offset(text, key.to_int()).unwrap_or_default(),
        )),
        ValueKind::Object(object) => Err(RuntimeError::message(format!(
            "Cannot use object of type {} as array",
            object.borrow().class.name
        ))),
        _ => Ok(Value::null()),
    }
}

fn read_property(target: &Value, name: &str) -> Result<Value> {
    match target.as_object() {
        Some(object) => Ok(object
            .borrow()
            .properties
            .get(name)
            .cloned()
            .unwrap_or_else(Value::null)),
        None => Err(RuntimeError::message(format!(
            "Attempt to read property \"{name}\" on {}",
            target.type_name()
        ))),
    }
}

/// Writes `value` at `path` inside `container`, copying shared arrays on the
/// way down. `null` slots become arrays.
fn store_in(container: &mut Value, path: &[Option<ArrayKey>], value: Value) -> Result<()> {
    let Some((key, rest)) = path.split_first() else {
        *container = value;
        return Ok(());
    };
    if container.is_null() {
        *container = Value::array(ArrayValue::new());
    }
    let described = container.describe();
    match Rc::make_mut(&mut container.0) {
        ValueKind::Array(array) => match key {
            Some(key) => match array.get_mut(key) {
                Some(slot) => store_in(slot, rest, value),
                None => {
                    let mut slot = Value::null();
                    store_in(&mut slot, rest, value)?;
                    array.insert(key.clone(), slot);
                    Ok(())
                }
            },
            None => {
                let mut slot = Value::null();
                store_in(&mut slot, rest, value)?;
                array.push(slot);
                Ok(())
            }
        },
        ValueKind::Object(_) => Err(RuntimeError::message(format!(
            "Cannot use object of type {described} as array"
        ))),
        _ => Err(RuntimeError::message("Cannot use a scalar value as an array")),
    }
}

fn operator_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Concat => ".",
        BinaryOp::Equal => "==",
        BinaryOp::NotEqual => "!=",
        BinaryOp::Identical => "===",
        BinaryOp::NotIdentical => "!==",
        BinaryOp::Less => "<",
        BinaryOp::LessEqual => "<=",
        BinaryOp::Greater => ">",
        BinaryOp::GreaterEqual => ">=",
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    if op == BinaryOp::Add {
        if let (Some(a), Some(b)) = (left.as_array(), right.as_array()) {
            let mut union = a.clone();
            for (key, value) in b.iter() {
                if !union.contains_key(key) {
                    union.insert(key.clone(), value.clone());
                }
            }
            return Ok(Value::array(union));
        }
    }
    let (Some(a), Some(b)) = (left.to_number(), right.to_number()) else {
        return Err(RuntimeError::message(format!(
            "Unsupported operand types: {} {} {}",
            left.describe(),
            operator_symbol(op),
            right.describe()
        )));
    };
    match op {
        BinaryOp::Add => Ok(integral(a, b, i64::checked_add, |x, y| x + y)),
        BinaryOp::Sub => Ok(integral(a, b, i64::checked_sub, |x, y| x - y)),
        BinaryOp::Mul => Ok(integral(a, b, i64::checked_mul, |x, y| x * y)),
        BinaryOp::Div => {
            if b.as_f64() == 0.0 {
                return Err(RuntimeError::message("Division by zero"));
            }
            match (a, b) {
                (Number::Int(x), Number::Int(y)) if x.checked_rem(y) == Some(0) => Ok(x
                    .checked_div(y)
                    .map(Value::int)
                    .unwrap_or_else(|| Value::float(x as f64 / y as f64))),
                _ => Ok(Value::float(a.as_f64() / b.as_f64())),
            }
        }
        _ => {
            let to_int = |number: Number| match number {
                Number::Int(n) => n,
                Number::Float(f) => float_to_int(f),
            };
            let (x, y) = (to_int(a), to_int(b));
            if y == 0 {
                return Err(RuntimeError::message("Modulo by zero"));
            }
            Ok(Value::int(x.wrapping_rem(y)))
        }
    }
}

/// Integer arithmetic that falls back to floats on overflow.
fn integral(
    a: Number,
    b: Number,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => int_op(x, y)
            .map(Value::int)
            .unwrap_or_else(|| Value::float(float_op(x as f64, y as f64))),
        _ => Value::float(float_op(a.as_f64(), b.as_f64())),
    }
}

fn unary(op: UnaryOp, value: &Value) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(Value::bool(!value.is_truthy())),
        UnaryOp::Plus | UnaryOp::Negate => {
            let Some(number) = value.to_number() else {
                return Err(RuntimeError::message(format!(
                    "Unsupported operand types: {} * int",
                    value.describe()
                )));
            };
            if op == UnaryOp::Plus {
                return Ok(number.into_value());
            }
            Ok(match number {
                Number::Int(n) => n
                    .checked_neg()
                    .map(Value::int)
                    .unwrap_or_else(|| Value::float(-(n as f64))),
                Number::Float(f) => Value::float(-f),
            })
        }
    }
}
