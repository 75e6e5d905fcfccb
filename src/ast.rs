use std::rc::Rc;

use crate::{diagnostics::SourceSpan, source::SourceMap};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Equal,
    NotEqual,
    Identical,
    NotIdentical,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Coalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastType {
    Int,
    Float,
    String,
    Bool,
    Array,
}

/// A name resolved against the file's namespace and `use` aliases.
///
/// Lookups try `qualified` first and fall back to the global `fallback`
/// for unqualified names written inside a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub qualified: String,
    pub fallback: Option<String>,
}

impl Symbol {
    pub fn global(name: impl Into<String>) -> Self {
        Self {
            qualified: name.into(),
            fallback: None,
        }
    }

    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.qualified.as_str()).chain(self.fallback.as_deref())
    }
}

/// Class reference in `new`, `instanceof`, `catch` and static calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassRef {
    Named(Symbol),
    SelfClass,
    Parent,
    Static,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
    pub variadic: bool,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct ArrayItem {
    pub key: Option<Expr>,
    pub value: Expr,
    pub spread: bool,
}

#[derive(Debug, Clone)]
pub struct Argument {
    pub value: Expr,
    pub spread: bool,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Literal),
    Interpolated(Vec<Expr>),
    Variable(String),
    Constant(Symbol),
    ArrayLiteral(Vec<ArrayItem>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Cast {
        target: CastType,
        expr: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        op: Option<BinaryOp>,
        value: Box<Expr>,
    },
    CoalesceAssign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Step {
        target: Box<Expr>,
        increment: bool,
        prefix: bool,
    },
    Ternary {
        condition: Box<Expr>,
        then_branch: Option<Box<Expr>>,
        else_branch: Box<Expr>,
    },
    Call {
        function: Symbol,
        args: Vec<Argument>,
    },
    CallValue {
        callee: Box<Expr>,
        args: Vec<Argument>,
    },
    MethodCall {
        target: Box<Expr>,
        method: String,
        args: Vec<Argument>,
    },
    StaticCall {
        class: ClassRef,
        method: String,
        args: Vec<Argument>,
    },
    ClassConstant {
        class: ClassRef,
        name: String,
    },
    Property {
        target: Box<Expr>,
        name: String,
    },
    Index {
        target: Box<Expr>,
        /// `None` for the append form `$a[] = ...`.
        index: Option<Box<Expr>>,
    },
    New {
        class: ClassRef,
        args: Vec<Argument>,
    },
    InstanceOf {
        expr: Box<Expr>,
        class: ClassRef,
    },
    Closure {
        function: Rc<FunctionDecl>,
        captures: Vec<String>,
    },
    ArrowFunction {
        function: Rc<FunctionDecl>,
    },
    Isset(Vec<Expr>),
    Empty(Box<Expr>),
}

#[derive(Debug, Clone)]
pub struct CatchClause {
    pub classes: Vec<ClassRef>,
    pub binding: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    Echo(Vec<Expr>),
    Block(Vec<Stmt>),
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    DoWhile {
        body: Vec<Stmt>,
        condition: Expr,
    },
    For {
        init: Vec<Expr>,
        condition: Vec<Expr>,
        step: Vec<Expr>,
        body: Vec<Stmt>,
    },
    Foreach {
        subject: Expr,
        key: Option<String>,
        value: String,
        body: Vec<Stmt>,
    },
    Return(Option<Expr>),
    Unset(Vec<Expr>),
    Break,
    Continue,
    Throw(Expr),
    Try {
        body: Vec<Stmt>,
        catches: Vec<CatchClause>,
        finally: Option<Vec<Stmt>>,
    },
    /// Function declared inside another body; bound when executed.
    Function {
        qualified: String,
        function: Rc<FunctionDecl>,
    },
    Const {
        qualified: String,
        value: Expr,
    },
}

#[derive(Debug, Clone)]
pub struct PropertyDecl {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub function: Rc<FunctionDecl>,
    pub is_static: bool,
}

#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub qualified: String,
    pub parent: Option<Symbol>,
    pub constants: Vec<(String, Expr)>,
    pub properties: Vec<PropertyDecl>,
    pub methods: Vec<MethodDecl>,
    pub span: SourceSpan,
}

/// Parsed representation of one source unit and everything it imported.
#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    pub statements: Vec<Stmt>,
    /// Constant definitions contributed by imported namespace files.
    pub prelude: Vec<Stmt>,
    pub functions: Vec<(String, Rc<FunctionDecl>)>,
    pub classes: Vec<Rc<ClassDecl>>,
    pub sources: Rc<[SourceMap]>,
}
