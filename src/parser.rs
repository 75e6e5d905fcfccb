use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use crate::{
    ast::{
        Argument, ArrayItem, BinaryOp, CastType, CatchClause, ClassDecl, ClassRef, Expr,
        ExprKind, FunctionDecl, Literal, LogicalOp, MethodDecl, Param, Program, PropertyDecl,
        Stmt, StmtKind, Symbol, UnaryOp,
    },
    classpath::{ClassPathResolver, LoadableDefinition, canonical_namespace},
    diagnostics::{Diagnostic, DiagnosticKind, Failure, SourceSpan},
    lexer::{Keyword, Lexer, TemplatePart, Token, TokenKind},
    source::SourceMap,
    stack::ensure_sufficient_stack,
};

/// Deepest statement and expression nesting the parser accepts.
pub const MAX_NESTING_DEPTH: usize = 10_000;

/// Turns source text into [`Program`]s, resolving `use` imports through its
/// [`ClassPathResolver`].
#[derive(Debug, Default)]
pub struct Parser {
    resolver: ClassPathResolver,
    variables: IndexSet<String>,
}

impl Parser {
    pub fn new(resolver: ClassPathResolver) -> Self {
        Self {
            resolver,
            variables: IndexSet::new(),
        }
    }

    pub fn resolver(&self) -> &ClassPathResolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut ClassPathResolver {
        &mut self.resolver
    }

    /// Top-level variables seen so far, in order of first appearance.
    pub fn variables(&self) -> Vec<String> {
        self.variables.iter().cloned().collect()
    }

    pub fn parse_string(&mut self, code: &str, virtual_name: &str) -> Result<Program, Failure> {
        let mut session = Session {
            resolver: &self.resolver,
            sources: vec![SourceMap::new(virtual_name, code)],
            imported: IndexSet::new(),
            prelude: Vec::new(),
            functions: Vec::new(),
            classes: Vec::new(),
            variables: IndexSet::new(),
        };
        let parsed = parse_file(&mut session, code, 0, false);
        let sources: Rc<[SourceMap]> = std::mem::take(&mut session.sources).into();
        let statements = parsed.map_err(|diag| Failure::from(diag.locate(&sources)))?;

        let Session {
            prelude,
            functions,
            classes,
            variables,
            ..
        } = session;
        self.variables.extend(variables);
        Ok(Program {
            name: virtual_name.to_string(),
            statements,
            prelude,
            functions,
            classes,
            sources,
        })
    }
}

/// State shared by the main file and every file it imports during one parse.
struct Session<'r> {
    resolver: &'r ClassPathResolver,
    sources: Vec<SourceMap>,
    imported: IndexSet<String>,
    prelude: Vec<Stmt>,
    functions: Vec<(String, Rc<FunctionDecl>)>,
    classes: Vec<Rc<ClassDecl>>,
    variables: IndexSet<String>,
}

fn parse_file(
    session: &mut Session<'_>,
    code: &str,
    file: usize,
    imported: bool,
) -> Result<Vec<Stmt>, Diagnostic> {
    let tokens = Lexer::new(code, file).tokenize()?;
    FileParser::new(session, tokens, imported).parse_program()
}

/// Parses a namespace file the first time it is imported. Repeated and cyclic
/// imports are no-ops.
fn import_namespace(
    session: &mut Session<'_>,
    namespace: &str,
    span: SourceSpan,
) -> Result<String, Diagnostic> {
    let resolved = session
        .resolver
        .resolve(namespace)
        .map_err(|err| Diagnostic::new(DiagnosticKind::Namespace, err.to_string()).with_span(span))?;
    let key = canonical_namespace(namespace).unwrap_or_else(|| namespace.to_string());
    match resolved {
        LoadableDefinition::Library { namespace, .. } => Ok(namespace),
        LoadableDefinition::Source(unit) => {
            if session.imported.insert(key.clone()) {
                tracing::trace!(namespace = %key, file = unit.virtual_name(), "importing namespace file");
                let file = session.sources.len();
                session
                    .sources
                    .push(SourceMap::new(unit.virtual_name(), unit.code()));
                parse_file(session, unit.code(), file, true)?;
            }
            Ok(key)
        }
    }
}

/// Name as written in source: `Foo`, `a\b\Foo` or `\a\Foo`.
#[derive(Debug, Clone)]
struct QualifiedName {
    parts: Vec<String>,
    absolute: bool,
    span: SourceSpan,
}

struct FileParser<'s, 'r> {
    session: &'s mut Session<'r>,
    tokens: Vec<Token>,
    current: usize,
    imported: bool,
    namespace: String,
    aliases: IndexMap<String, String>,
    nesting: usize,
    function_depth: usize,
    depth: usize,
}

impl<'s, 'r> FileParser<'s, 'r> {
    fn new(session: &'s mut Session<'r>, tokens: Vec<Token>, imported: bool) -> Self {
        Self {
            session,
            tokens,
            current: 0,
            imported,
            namespace: String::new(),
            aliases: IndexMap::new(),
            nesting: 0,
            function_depth: 0,
            depth: 0,
        }
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        let mut statements = Vec::new();
        while !self.check(&TokenKind::Eof) {
            if self.matches(&TokenKind::Semicolon) {
                continue;
            }
            if let Some(stmt) = self.parse_top_level()? {
                statements.push(stmt);
            }
        }
        Ok(statements)
    }

    /// Declarations are hoisted out of the statement list; everything else is
    /// returned in order.
    fn parse_top_level(&mut self) -> Result<Option<Stmt>, Diagnostic> {
        match self.peek().kind {
            TokenKind::Keyword(Keyword::Namespace) => {
                self.parse_namespace()?;
                Ok(None)
            }
            TokenKind::Keyword(Keyword::Use) => {
                self.parse_use()?;
                Ok(None)
            }
            TokenKind::Keyword(Keyword::Class) => {
                let class = self.parse_class()?;
                self.session.classes.push(Rc::new(class));
                Ok(None)
            }
            TokenKind::Keyword(Keyword::Function)
                if self.peek_kind(1) == Some(&TokenKind::Identifier) =>
            {
                let (qualified, function) = self.parse_function_declaration()?;
                self.session.functions.push((qualified, function));
                Ok(None)
            }
            TokenKind::Keyword(Keyword::Const) if self.imported => {
                let stmt = self.parse_const()?;
                self.session.prelude.push(stmt);
                Ok(None)
            }
            _ if self.imported => Err(self.error(
                self.peek(),
                "only declarations are allowed in imported namespace files",
            )),
            _ => self.parse_statement().map(Some),
        }
    }

    fn parse_namespace(&mut self) -> Result<(), Diagnostic> {
        let keyword = self.advance();
        if self.nesting > 0 {
            return Err(self.error(&keyword, "namespace declarations must be at the top level"));
        }
        let (path, _) = self.parse_namespace_path("expected namespace name")?;
        self.consume(&TokenKind::Semicolon, "expected `;` after namespace declaration")?;
        self.namespace = canonical_namespace(&path).unwrap_or(path);
        Ok(())
    }

    fn parse_use(&mut self) -> Result<(), Diagnostic> {
        let keyword = self.advance();
        if self.nesting > 0 {
            return Err(self.error(&keyword, "`use` must be at the top level"));
        }
        loop {
            let (path, span) = self.parse_namespace_path("expected namespace after `use`")?;
            let alias = if self.matches_keyword(Keyword::As) {
                Some(self.consume_identifier("expected alias after `as`")?.lexeme)
            } else {
                None
            };
            let namespace = import_namespace(self.session, &path, span)?;
            let alias = alias.unwrap_or_else(|| {
                namespace
                    .rsplit('\\')
                    .next()
                    .unwrap_or(namespace.as_str())
                    .to_string()
            });
            self.aliases.insert(alias, namespace);
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.expect_terminator()
    }

    /// Namespace paths accept `\` or `/` separators and keyword segments such
    /// as `std\array`.
    fn parse_namespace_path(&mut self, message: &str) -> Result<(String, SourceSpan), Diagnostic> {
        let start = self.peek().span;
        let mut path = String::new();
        if self.matches(&TokenKind::Backslash) || self.matches(&TokenKind::Slash) {
            path.push('\\');
        }
        let first = self.consume_name_segment(message)?;
        path.push_str(&first.lexeme);
        let mut end = first.span;
        while matches!(self.peek().kind, TokenKind::Backslash | TokenKind::Slash) {
            self.advance();
            let segment = self.consume_name_segment("expected namespace segment")?;
            path.push('\\');
            path.push_str(&segment.lexeme);
            end = segment.span;
        }
        Ok((path, start.to(end)))
    }

    fn parse_statement(&mut self) -> Result<Stmt, Diagnostic> {
        self.nested(Self::parse_statement_inner)
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt, Diagnostic> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Semicolon => {
                self.advance();
                Ok(Stmt {
                    kind: StmtKind::Block(Vec::new()),
                    span: token.span,
                })
            }
            TokenKind::LBrace => {
                self.nesting += 1;
                let block = self.parse_block();
                self.nesting -= 1;
                let (items, span) = block?;
                Ok(Stmt {
                    kind: StmtKind::Block(items),
                    span,
                })
            }
            TokenKind::Keyword(Keyword::Echo) => self.parse_echo(),
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::Do) => self.parse_do_while(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Foreach) => self.parse_foreach(),
            TokenKind::Keyword(Keyword::Return) => self.parse_return(),
            TokenKind::Keyword(Keyword::Break) => self.parse_jump(StmtKind::Break),
            TokenKind::Keyword(Keyword::Continue) => self.parse_jump(StmtKind::Continue),
            TokenKind::Keyword(Keyword::Throw) => self.parse_throw(),
            TokenKind::Keyword(Keyword::Try) => self.parse_try(),
            TokenKind::Keyword(Keyword::Const) => self.parse_const(),
            TokenKind::Keyword(Keyword::Function)
                if self.peek_kind(1) == Some(&TokenKind::Identifier) =>
            {
                let (qualified, function) = self.parse_function_declaration()?;
                let span = function.span;
                Ok(Stmt {
                    kind: StmtKind::Function {
                        qualified,
                        function,
                    },
                    span,
                })
            }
            TokenKind::Keyword(Keyword::Class) => Err(self.error(
                &token,
                "class declarations are only allowed at the top level",
            )),
            TokenKind::Keyword(Keyword::Namespace | Keyword::Use) => Err(self.error(
                &token,
                format!("`{}` must be at the top level", token.lexeme),
            )),
            TokenKind::Identifier
                if token.lexeme.eq_ignore_ascii_case("unset")
                    && self.peek_kind(1) == Some(&TokenKind::LParen) =>
            {
                self.parse_unset()
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_block(&mut self) -> Result<(Vec<Stmt>, SourceSpan), Diagnostic> {
        let lbrace = self.consume(&TokenKind::LBrace, "expected `{` to start block")?;
        let mut items = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.check(&TokenKind::Eof) {
            if self.matches(&TokenKind::Semicolon) {
                continue;
            }
            items.push(self.parse_statement()?);
        }
        let rbrace = self.consume(&TokenKind::RBrace, "expected `}` to close block")?;
        Ok((items, lbrace.span.to(rbrace.span)))
    }

    /// Body of a control structure: a block or a single statement.
    fn parse_body(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        self.nesting += 1;
        let body = if self.check(&TokenKind::LBrace) {
            self.parse_block().map(|(items, _)| items)
        } else {
            self.parse_statement().map(|stmt| vec![stmt])
        };
        self.nesting -= 1;
        body
    }

    fn parse_echo(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.advance().span;
        let mut values = vec![self.parse_expression()?];
        while self.matches(&TokenKind::Comma) {
            values.push(self.parse_expression()?);
        }
        let end = self.previous().span;
        self.expect_terminator()?;
        Ok(Stmt {
            kind: StmtKind::Echo(values),
            span: start.to(end),
        })
    }

    fn parse_condition(&mut self, keyword: &str) -> Result<Expr, Diagnostic> {
        self.consume(&TokenKind::LParen, &format!("expected `(` after `{keyword}`"))?;
        let condition = self.parse_expression()?;
        self.consume(&TokenKind::RParen, "expected `)` after condition")?;
        Ok(condition)
    }

    fn parse_if(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.advance().span;
        let condition = self.parse_condition("if")?;
        let then_branch = self.parse_body()?;
        let else_branch = if self.check_keyword(Keyword::Elseif) {
            Some(vec![self.parse_if()?])
        } else if self.matches_keyword(Keyword::Else) {
            if self.check_keyword(Keyword::If) {
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_body()?)
            }
        } else {
            None
        };
        Ok(Stmt {
            kind: StmtKind::If {
                condition,
                then_branch,
                else_branch,
            },
            span: start.to(self.previous().span),
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.advance().span;
        let condition = self.parse_condition("while")?;
        let body = self.parse_body()?;
        Ok(Stmt {
            kind: StmtKind::While { condition, body },
            span: start.to(self.previous().span),
        })
    }

    fn parse_do_while(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.advance().span;
        let body = self.parse_body()?;
        if !self.matches_keyword(Keyword::While) {
            return Err(self.error(self.peek(), "expected `while` after `do` body"));
        }
        let condition = self.parse_condition("while")?;
        let end = self.previous().span;
        self.expect_terminator()?;
        Ok(Stmt {
            kind: StmtKind::DoWhile { body, condition },
            span: start.to(end),
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.advance().span;
        self.consume(&TokenKind::LParen, "expected `(` after `for`")?;
        let init = self.parse_expression_list(&TokenKind::Semicolon)?;
        self.consume(&TokenKind::Semicolon, "expected `;` after `for` initializer")?;
        let condition = self.parse_expression_list(&TokenKind::Semicolon)?;
        self.consume(&TokenKind::Semicolon, "expected `;` after `for` condition")?;
        let step = self.parse_expression_list(&TokenKind::RParen)?;
        self.consume(&TokenKind::RParen, "expected `)` after `for` clauses")?;
        let body = self.parse_body()?;
        Ok(Stmt {
            kind: StmtKind::For {
                init,
                condition,
                step,
                body,
            },
            span: start.to(self.previous().span),
        })
    }

    fn parse_expression_list(&mut self, terminator: &TokenKind) -> Result<Vec<Expr>, Diagnostic> {
        let mut exprs = Vec::new();
        if self.check(terminator) {
            return Ok(exprs);
        }
        loop {
            exprs.push(self.parse_expression()?);
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        Ok(exprs)
    }

    fn parse_foreach(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.advance().span;
        self.consume(&TokenKind::LParen, "expected `(` after `foreach`")?;
        let subject = self.parse_expression()?;
        if !self.matches_keyword(Keyword::As) {
            return Err(self.error(self.peek(), "expected `as` in `foreach`"));
        }
        let first = self.parse_foreach_binding()?;
        let (key, value) = if self.matches(&TokenKind::FatArrow) {
            (Some(first), self.parse_foreach_binding()?)
        } else {
            (None, first)
        };
        self.consume(&TokenKind::RParen, "expected `)` after `foreach` binding")?;
        let body = self.parse_body()?;
        Ok(Stmt {
            kind: StmtKind::Foreach {
                subject,
                key,
                value,
                body,
            },
            span: start.to(self.previous().span),
        })
    }

    fn parse_foreach_binding(&mut self) -> Result<String, Diagnostic> {
        if self.check(&TokenKind::Ampersand) {
            return Err(self.error(self.peek(), "by-reference iteration is not supported"));
        }
        let variable = self.consume(&TokenKind::Variable, "expected variable in `foreach`")?;
        self.track_variable(&variable.lexeme);
        Ok(variable.lexeme)
    }

    fn parse_return(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.advance().span;
        let value = if self.at_terminator() {
            None
        } else {
            Some(self.parse_expression()?)
        };
        let end = self.previous().span;
        self.expect_terminator()?;
        Ok(Stmt {
            kind: StmtKind::Return(value),
            span: start.to(end),
        })
    }

    fn parse_jump(&mut self, kind: StmtKind) -> Result<Stmt, Diagnostic> {
        let span = self.advance().span;
        self.expect_terminator()?;
        Ok(Stmt { kind, span })
    }

    fn parse_throw(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.advance().span;
        let value = self.parse_expression()?;
        let span = start.to(value.span);
        self.expect_terminator()?;
        Ok(Stmt {
            kind: StmtKind::Throw(value),
            span,
        })
    }

    fn parse_try(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.advance().span;
        self.nesting += 1;
        let result = self.parse_try_clauses();
        self.nesting -= 1;
        let (body, catches, finally) = result?;
        if catches.is_empty() && finally.is_none() {
            return Err(self.error(
                self.peek(),
                "`try` must be followed by `catch` or `finally`",
            ));
        }
        Ok(Stmt {
            kind: StmtKind::Try {
                body,
                catches,
                finally,
            },
            span: start.to(self.previous().span),
        })
    }

    #[allow(clippy::type_complexity)]
    fn parse_try_clauses(
        &mut self,
    ) -> Result<(Vec<Stmt>, Vec<CatchClause>, Option<Vec<Stmt>>), Diagnostic> {
        let (body, _) = self.parse_block()?;
        let mut catches = Vec::new();
        while self.matches_keyword(Keyword::Catch) {
            self.consume(&TokenKind::LParen, "expected `(` after `catch`")?;
            let mut classes = vec![self.parse_class_ref()?];
            while self.matches(&TokenKind::Pipe) {
                classes.push(self.parse_class_ref()?);
            }
            let binding = if self.check(&TokenKind::Variable) {
                let variable = self.advance();
                self.track_variable(&variable.lexeme);
                Some(variable.lexeme)
            } else {
                None
            };
            self.consume(&TokenKind::RParen, "expected `)` after catch clause")?;
            let (body, _) = self.parse_block()?;
            catches.push(CatchClause {
                classes,
                binding,
                body,
            });
        }
        let finally = if self.matches_keyword(Keyword::Finally) {
            Some(self.parse_block()?.0)
        } else {
            None
        };
        Ok((body, catches, finally))
    }

    fn parse_const(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.advance().span;
        let name = self.consume_identifier("expected constant name")?;
        self.consume(&TokenKind::Assign, "expected `=` in constant declaration")?;
        let value = self.parse_expression()?;
        let span = start.to(value.span);
        self.expect_terminator()?;
        Ok(Stmt {
            kind: StmtKind::Const {
                qualified: self.qualify(&name.lexeme),
                value,
            },
            span,
        })
    }

    fn parse_unset(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.advance().span;
        self.consume(&TokenKind::LParen, "expected `(` after `unset`")?;
        let mut targets = Vec::new();
        loop {
            let target = self.parse_expression()?;
            self.ensure_assignable(&target)?;
            targets.push(target);
            if !self.matches(&TokenKind::Comma) || self.check(&TokenKind::RParen) {
                break;
            }
        }
        let end = self.consume(&TokenKind::RParen, "expected `)` after `unset` targets")?;
        self.expect_terminator()?;
        Ok(Stmt {
            kind: StmtKind::Unset(targets),
            span: start.to(end.span),
        })
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let expr = self.parse_expression()?;
        let span = expr.span;
        self.expect_terminator()?;
        Ok(Stmt {
            kind: StmtKind::Expr(expr),
            span,
        })
    }

    fn parse_function_declaration(&mut self) -> Result<(String, Rc<FunctionDecl>), Diagnostic> {
        let start = self.advance().span;
        let name = self.consume_identifier("expected function name")?;
        let (params, body, end) = self.parse_function_rest()?;
        let qualified = self.qualify(&name.lexeme);
        Ok((
            qualified,
            Rc::new(FunctionDecl {
                name: name.lexeme,
                params,
                body,
                span: start.to(end),
            }),
        ))
    }

    /// Parameters, optional return type and body.
    fn parse_function_rest(&mut self) -> Result<(Vec<Param>, Vec<Stmt>, SourceSpan), Diagnostic> {
        let params = self.parse_params()?;
        self.parse_return_type()?;
        let (body, span) = self.parse_function_body()?;
        Ok((params, body, span))
    }

    fn parse_function_body(&mut self) -> Result<(Vec<Stmt>, SourceSpan), Diagnostic> {
        self.nesting += 1;
        self.function_depth += 1;
        let block = self.parse_block();
        self.function_depth -= 1;
        self.nesting -= 1;
        block
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, Diagnostic> {
        self.consume(&TokenKind::LParen, "expected `(` before parameters")?;
        let mut params: Vec<Param> = Vec::new();
        while !self.check(&TokenKind::RParen) {
            if !matches!(
                self.peek().kind,
                TokenKind::Variable | TokenKind::Ellipsis | TokenKind::Ampersand
            ) {
                self.parse_type()?;
            }
            if self.check(&TokenKind::Ampersand) {
                return Err(self.error(self.peek(), "by-reference parameters are not supported"));
            }
            let variadic = self.matches(&TokenKind::Ellipsis);
            let name = self.consume(&TokenKind::Variable, "expected parameter name")?;
            if params.iter().any(|param| param.name == name.lexeme) {
                return Err(self.error(
                    &name,
                    format!("redefinition of parameter ${}", name.lexeme),
                ));
            }
            let default = if self.matches(&TokenKind::Assign) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            params.push(Param {
                name: name.lexeme,
                default,
                variadic,
                span: name.span,
            });
            if variadic && !self.check(&TokenKind::RParen) {
                return Err(self.error(
                    self.peek(),
                    "only the last parameter can be variadic",
                ));
            }
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(&TokenKind::RParen, "expected `)` after parameters")?;
        Ok(params)
    }

    fn parse_return_type(&mut self) -> Result<(), Diagnostic> {
        if self.matches(&TokenKind::Colon) {
            self.parse_type()?;
        }
        Ok(())
    }

    /// Type hints are accepted and discarded.
    fn parse_type(&mut self) -> Result<(), Diagnostic> {
        self.matches(&TokenKind::Question);
        loop {
            match self.peek().kind {
                TokenKind::Keyword(Keyword::Array | Keyword::Static | Keyword::Null)
                | TokenKind::Keyword(Keyword::False | Keyword::True) => {
                    self.advance();
                }
                TokenKind::Identifier | TokenKind::Backslash => {
                    self.parse_qualified_name("expected type name")?;
                }
                _ => return Err(self.error(self.peek(), "expected type name")),
            }
            if !self.matches(&TokenKind::Pipe) {
                return Ok(());
            }
        }
    }

    fn parse_class(&mut self) -> Result<ClassDecl, Diagnostic> {
        let start = self.advance().span;
        let name = self.consume_identifier("expected class name")?;
        let parent = if self.matches_keyword(Keyword::Extends) {
            let parent = self.parse_qualified_name("expected parent class name")?;
            Some(self.resolve_name(&parent, true))
        } else {
            None
        };
        self.consume(&TokenKind::LBrace, "expected `{` after class name")?;
        let mut constants = Vec::new();
        let mut properties = Vec::new();
        let mut methods = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.check(&TokenKind::Eof) {
            let mut is_static = false;
            loop {
                match self.peek().kind {
                    TokenKind::Keyword(Keyword::Public | Keyword::Protected | Keyword::Private) => {
                        self.advance();
                    }
                    TokenKind::Keyword(Keyword::Static) => {
                        self.advance();
                        is_static = true;
                    }
                    _ => break,
                }
            }
            match self.peek().kind {
                TokenKind::Keyword(Keyword::Const) => {
                    self.advance();
                    loop {
                        let constant = self.consume_member_name("expected constant name")?;
                        self.consume(&TokenKind::Assign, "expected `=` after constant name")?;
                        constants.push((constant.lexeme, self.parse_expression()?));
                        if !self.matches(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.consume(&TokenKind::Semicolon, "expected `;` after class constant")?;
                }
                TokenKind::Keyword(Keyword::Function) => {
                    let start = self.advance().span;
                    let method = self.consume_member_name("expected method name")?;
                    let (params, body, end) = self.parse_function_rest()?;
                    methods.push(MethodDecl {
                        function: Rc::new(FunctionDecl {
                            name: method.lexeme,
                            params,
                            body,
                            span: start.to(end),
                        }),
                        is_static,
                    });
                }
                _ => {
                    if !self.check(&TokenKind::Variable) {
                        self.parse_type()?;
                    }
                    let property = self.consume(&TokenKind::Variable, "expected class member")?;
                    if is_static {
                        return Err(self.error(&property, "static properties are not supported"));
                    }
                    let default = if self.matches(&TokenKind::Assign) {
                        Some(self.parse_expression()?)
                    } else {
                        None
                    };
                    properties.push(PropertyDecl {
                        name: property.lexeme,
                        default,
                    });
                    self.consume(&TokenKind::Semicolon, "expected `;` after property")?;
                }
            }
        }
        let end = self.consume(&TokenKind::RBrace, "expected `}` after class body")?;
        Ok(ClassDecl {
            qualified: self.qualify(&name.lexeme),
            parent,
            constants,
            properties,
            methods,
            span: start.to(end.span),
        })
    }

    fn parse_expression(&mut self) -> Result<Expr, Diagnostic> {
        self.nested(Self::parse_assignment)
    }

    fn parse_assignment(&mut self) -> Result<Expr, Diagnostic> {
        let target = self.parse_ternary()?;
        let op = match self.peek().kind {
            TokenKind::Assign => None,
            TokenKind::PlusAssign => Some(BinaryOp::Add),
            TokenKind::MinusAssign => Some(BinaryOp::Sub),
            TokenKind::StarAssign => Some(BinaryOp::Mul),
            TokenKind::SlashAssign => Some(BinaryOp::Div),
            TokenKind::PercentAssign => Some(BinaryOp::Mod),
            TokenKind::DotAssign => Some(BinaryOp::Concat),
            TokenKind::DoubleQuestionAssign => {
                self.ensure_assignable(&target)?;
                self.advance();
                let value = self.parse_expression()?;
                return Ok(Expr {
                    span: target.span.to(value.span),
                    kind: ExprKind::CoalesceAssign {
                        target: Box::new(target),
                        value: Box::new(value),
                    },
                });
            }
            _ => return Ok(target),
        };
        self.ensure_assignable(&target)?;
        self.advance();
        if op.is_none() && self.check(&TokenKind::Ampersand) {
            return Err(self.error(self.peek(), "assignment by reference is not supported"));
        }
        let value = self.parse_expression()?;
        Ok(Expr {
            span: target.span.to(value.span),
            kind: ExprKind::Assign {
                target: Box::new(target),
                op,
                value: Box::new(value),
            },
        })
    }

    fn ensure_assignable(&self, target: &Expr) -> Result<(), Diagnostic> {
        match &target.kind {
            ExprKind::Variable(_) | ExprKind::Index { .. } | ExprKind::Property { .. } => Ok(()),
            _ => Err(
                Diagnostic::new(DiagnosticKind::Parser, "invalid assignment target")
                    .with_span(target.span),
            ),
        }
    }

    fn parse_ternary(&mut self) -> Result<Expr, Diagnostic> {
        let condition = self.parse_coalesce()?;
        if !self.matches(&TokenKind::Question) {
            return Ok(condition);
        }
        let then_branch = if self.matches(&TokenKind::Colon) {
            None
        } else {
            let then_branch = self.parse_expression()?;
            self.consume(&TokenKind::Colon, "expected `:` in ternary expression")?;
            Some(Box::new(then_branch))
        };
        let else_branch = self.parse_expression()?;
        Ok(Expr {
            span: condition.span.to(else_branch.span),
            kind: ExprKind::Ternary {
                condition: Box::new(condition),
                then_branch,
                else_branch: Box::new(else_branch),
            },
        })
    }

    fn parse_coalesce(&mut self) -> Result<Expr, Diagnostic> {
        let left = self.parse_or()?;
        if !self.matches(&TokenKind::DoubleQuestion) {
            return Ok(left);
        }
        let right = self.parse_coalesce()?;
        Ok(logical(LogicalOp::Coalesce, left, right))
    }

    fn parse_or(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_and()?;
        while self.matches(&TokenKind::DoublePipe) {
            let right = self.parse_and()?;
            expr = logical(LogicalOp::Or, expr, right);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_equality()?;
        while self.matches(&TokenKind::DoubleAmpersand) {
            let right = self.parse_equality()?;
            expr = logical(LogicalOp::And, expr, right);
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_comparison()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqualEqual => BinaryOp::Equal,
                TokenKind::BangEqual => BinaryOp::NotEqual,
                TokenKind::TripleEqual => BinaryOp::Identical,
                TokenKind::BangDoubleEqual => BinaryOp::NotIdentical,
                _ => return Ok(expr),
            };
            self.advance();
            let right = self.parse_comparison()?;
            expr = binary(op, expr, right);
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_concat()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Less => BinaryOp::Less,
                TokenKind::LessEqual => BinaryOp::LessEqual,
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
                _ => return Ok(expr),
            };
            self.advance();
            let right = self.parse_concat()?;
            expr = binary(op, expr, right);
        }
    }

    fn parse_concat(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_term()?;
        while self.matches(&TokenKind::Dot) {
            let right = self.parse_term()?;
            expr = binary(BinaryOp::Concat, expr, right);
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_factor()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(expr),
            };
            self.advance();
            let right = self.parse_factor()?;
            expr = binary(op, expr, right);
        }
    }

    fn parse_factor(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_instanceof()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => return Ok(expr),
            };
            self.advance();
            let right = self.parse_instanceof()?;
            expr = binary(op, expr, right);
        }
    }

    fn parse_instanceof(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_unary()?;
        while self.matches_keyword(Keyword::Instanceof) {
            let class = self.parse_class_ref()?;
            expr = Expr {
                span: expr.span.to(self.previous().span),
                kind: ExprKind::InstanceOf {
                    expr: Box::new(expr),
                    class,
                },
            };
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        self.nested(Self::parse_unary_inner)
    }

    fn parse_unary_inner(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.peek().clone();
        let op = match token.kind {
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Negate),
            TokenKind::Plus => Some(UnaryOp::Plus),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr {
                span: token.span.to(operand.span),
                kind: ExprKind::Unary {
                    op,
                    expr: Box::new(operand),
                },
            });
        }
        if matches!(token.kind, TokenKind::PlusPlus | TokenKind::MinusMinus) {
            self.advance();
            let target = self.parse_unary()?;
            self.ensure_assignable(&target)?;
            return Ok(Expr {
                span: token.span.to(target.span),
                kind: ExprKind::Step {
                    target: Box::new(target),
                    increment: token.kind == TokenKind::PlusPlus,
                    prefix: true,
                },
            });
        }
        if let Some(cast) = self.cast_ahead() {
            self.advance();
            self.advance();
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr {
                span: token.span.to(operand.span),
                kind: ExprKind::Cast {
                    target: cast,
                    expr: Box::new(operand),
                },
            });
        }
        self.parse_postfix()
    }

    /// Recognises `(int)`, `(string)` and friends without consuming them.
    fn cast_ahead(&self) -> Option<CastType> {
        if !self.check(&TokenKind::LParen) || self.peek_kind(2) != Some(&TokenKind::RParen) {
            return None;
        }
        let token = self.tokens.get(self.current + 1)?;
        match token.kind {
            TokenKind::Keyword(Keyword::Array) => Some(CastType::Array),
            TokenKind::Identifier => match token.lexeme.to_ascii_lowercase().as_str() {
                "int" | "integer" => Some(CastType::Int),
                "float" | "double" => Some(CastType::Float),
                "string" => Some(CastType::String),
                "bool" | "boolean" => Some(CastType::Bool),
                _ => None,
            },
            _ => None,
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek().kind {
                TokenKind::LParen => {
                    let (args, end) = self.parse_arguments()?;
                    expr = Expr {
                        span: expr.span.to(end),
                        kind: ExprKind::CallValue {
                            callee: Box::new(expr),
                            args,
                        },
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = if self.check(&TokenKind::RBracket) {
                        None
                    } else {
                        Some(Box::new(self.parse_expression()?))
                    };
                    let end = self.consume(&TokenKind::RBracket, "expected `]` after index")?;
                    expr = Expr {
                        span: expr.span.to(end.span),
                        kind: ExprKind::Index {
                            target: Box::new(expr),
                            index,
                        },
                    };
                }
                TokenKind::Arrow => {
                    self.advance();
                    let member = self.consume_member_name("expected property or method name")?;
                    if self.check(&TokenKind::LParen) {
                        let (args, end) = self.parse_arguments()?;
                        expr = Expr {
                            span: expr.span.to(end),
                            kind: ExprKind::MethodCall {
                                target: Box::new(expr),
                                method: member.lexeme,
                                args,
                            },
                        };
                    } else {
                        expr = Expr {
                            span: expr.span.to(member.span),
                            kind: ExprKind::Property {
                                target: Box::new(expr),
                                name: member.lexeme,
                            },
                        };
                    }
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let op = self.advance();
                    self.ensure_assignable(&expr)?;
                    expr = Expr {
                        span: expr.span.to(op.span),
                        kind: ExprKind::Step {
                            target: Box::new(expr),
                            increment: op.kind == TokenKind::PlusPlus,
                            prefix: false,
                        },
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_arguments(&mut self) -> Result<(Vec<Argument>, SourceSpan), Diagnostic> {
        self.consume(&TokenKind::LParen, "expected `(` before arguments")?;
        let mut args = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let spread = self.matches(&TokenKind::Ellipsis);
            let value = self.parse_expression()?;
            args.push(Argument { value, spread });
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        let end = self.consume(&TokenKind::RParen, "expected `)` after arguments")?;
        Ok((args, end.span))
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.peek().clone();
        let literal = |kind: Literal| -> Result<Expr, Diagnostic> {
            Ok(Expr {
                kind: ExprKind::Literal(kind),
                span: token.span,
            })
        };
        match &token.kind {
            TokenKind::Number => {
                self.advance();
                match number_literal(&token.lexeme) {
                    Some(number) => literal(number),
                    None => Err(self.error(
                        &token,
                        format!("invalid numeric literal `{}`", token.lexeme),
                    )),
                }
            }
            TokenKind::String => {
                self.advance();
                literal(Literal::String(token.lexeme.clone()))
            }
            TokenKind::Template(parts) => {
                self.advance();
                let parts = parts
                    .iter()
                    .map(|part| Expr {
                        span: token.span,
                        kind: match part {
                            TemplatePart::Text(text) => {
                                ExprKind::Literal(Literal::String(text.clone()))
                            }
                            TemplatePart::Variable(name) => {
                                self.track_variable(name);
                                ExprKind::Variable(name.clone())
                            }
                        },
                    })
                    .collect();
                Ok(Expr {
                    kind: ExprKind::Interpolated(parts),
                    span: token.span,
                })
            }
            TokenKind::Variable => {
                self.advance();
                self.track_variable(&token.lexeme);
                Ok(Expr {
                    kind: ExprKind::Variable(token.lexeme.clone()),
                    span: token.span,
                })
            }
            // `use std\array;` makes `array::len()` an alias, not a literal.
            TokenKind::Keyword(_)
                if self.peek_kind(1) == Some(&TokenKind::DoubleColon)
                    && self.aliases.contains_key(&token.lexeme) =>
            {
                self.advance();
                self.advance();
                let namespace = self.aliases[&token.lexeme].clone();
                self.parse_namespace_member(namespace, token.span)
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                literal(Literal::Bool(true))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                literal(Literal::Bool(false))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                literal(Literal::Null)
            }
            TokenKind::LBracket => {
                self.advance();
                self.parse_array_items(&TokenKind::RBracket, token.span)
            }
            TokenKind::Keyword(Keyword::Array) if self.peek_kind(1) == Some(&TokenKind::LParen) => {
                self.advance();
                self.advance();
                self.parse_array_items(&TokenKind::RParen, token.span)
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.consume(&TokenKind::RParen, "expected `)` after expression")?;
                Ok(inner)
            }
            TokenKind::Keyword(Keyword::New) => self.parse_new(),
            TokenKind::Keyword(Keyword::Function) => self.parse_closure(),
            TokenKind::Keyword(Keyword::Fn) => self.parse_arrow_function(),
            TokenKind::Keyword(Keyword::Static)
                if self.peek_kind(1) == Some(&TokenKind::DoubleColon) =>
            {
                self.advance();
                self.advance();
                self.parse_static_member(ClassRef::Static, token.span)
            }
            TokenKind::Identifier
                if token.lexeme.eq_ignore_ascii_case("isset")
                    && self.peek_kind(1) == Some(&TokenKind::LParen) =>
            {
                self.advance();
                let (args, end) = self.parse_arguments()?;
                let mut targets = Vec::with_capacity(args.len());
                for arg in args {
                    if arg.spread {
                        return Err(self.error(&token, "cannot use `...` in `isset`"));
                    }
                    targets.push(arg.value);
                }
                if targets.is_empty() {
                    return Err(self.error(&token, "`isset` expects at least one argument"));
                }
                Ok(Expr {
                    kind: ExprKind::Isset(targets),
                    span: token.span.to(end),
                })
            }
            TokenKind::Identifier
                if token.lexeme.eq_ignore_ascii_case("empty")
                    && self.peek_kind(1) == Some(&TokenKind::LParen) =>
            {
                self.advance();
                self.advance();
                let target = self.parse_expression()?;
                let end = self.consume(&TokenKind::RParen, "expected `)` after `empty`")?;
                Ok(Expr {
                    kind: ExprKind::Empty(Box::new(target)),
                    span: token.span.to(end.span),
                })
            }
            TokenKind::Identifier | TokenKind::Backslash => self.parse_name_expression(),
            TokenKind::Eof => Err(self.error(&token, "unexpected end of input")),
            _ => Err(self.error(&token, format!("unexpected `{}`", token.lexeme))),
        }
    }

    fn parse_array_items(
        &mut self,
        terminator: &TokenKind,
        start: SourceSpan,
    ) -> Result<Expr, Diagnostic> {
        let mut items = Vec::new();
        while !self.check(terminator) {
            if self.matches(&TokenKind::Ellipsis) {
                let value = self.parse_expression()?;
                items.push(ArrayItem {
                    key: None,
                    value,
                    spread: true,
                });
            } else {
                let first = self.parse_expression()?;
                let item = if self.matches(&TokenKind::FatArrow) {
                    ArrayItem {
                        key: Some(first),
                        value: self.parse_expression()?,
                        spread: false,
                    }
                } else {
                    ArrayItem {
                        key: None,
                        value: first,
                        spread: false,
                    }
                };
                items.push(item);
            }
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        let end = self.consume(terminator, "expected end of array literal")?;
        Ok(Expr {
            kind: ExprKind::ArrayLiteral(items),
            span: start.to(end.span),
        })
    }

    fn parse_new(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.advance().span;
        let class = self.parse_class_ref()?;
        let (args, end) = if self.check(&TokenKind::LParen) {
            self.parse_arguments()?
        } else {
            (Vec::new(), self.previous().span)
        };
        Ok(Expr {
            kind: ExprKind::New { class, args },
            span: start.to(end),
        })
    }

    fn parse_closure(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.advance().span;
        let params = self.parse_params()?;
        let mut captures = Vec::new();
        if self.matches_keyword(Keyword::Use) {
            self.consume(&TokenKind::LParen, "expected `(` after `use`")?;
            while !self.check(&TokenKind::RParen) {
                if self.check(&TokenKind::Ampersand) {
                    return Err(self.error(self.peek(), "capture by reference is not supported"));
                }
                let variable = self.consume(&TokenKind::Variable, "expected captured variable")?;
                self.track_variable(&variable.lexeme);
                captures.push(variable.lexeme);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
            self.consume(&TokenKind::RParen, "expected `)` after captured variables")?;
        }
        self.parse_return_type()?;
        let (body, end) = self.parse_function_body()?;
        Ok(Expr {
            span: start.to(end),
            kind: ExprKind::Closure {
                function: Rc::new(FunctionDecl {
                    name: "{closure}".to_string(),
                    params,
                    body,
                    span: start.to(end),
                }),
                captures,
            },
        })
    }

    fn parse_arrow_function(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.advance().span;
        let params = self.parse_params()?;
        self.parse_return_type()?;
        self.consume(&TokenKind::FatArrow, "expected `=>` in arrow function")?;
        self.function_depth += 1;
        let body = self.parse_expression();
        self.function_depth -= 1;
        let body = body?;
        let span = start.to(body.span);
        Ok(Expr {
            span,
            kind: ExprKind::ArrowFunction {
                function: Rc::new(FunctionDecl {
                    name: "{closure}".to_string(),
                    params,
                    body: vec![Stmt {
                        span: body.span,
                        kind: StmtKind::Return(Some(body)),
                    }],
                    span,
                }),
            },
        })
    }

    /// Function call, constant, or `Name::member` starting with a name.
    fn parse_name_expression(&mut self) -> Result<Expr, Diagnostic> {
        let name = self.parse_qualified_name("expected name")?;
        if self.matches(&TokenKind::DoubleColon) {
            if !name.absolute && name.parts.len() == 1 {
                if let Some(namespace) = self.aliases.get(&name.parts[0]).cloned() {
                    return self.parse_namespace_member(namespace, name.span);
                }
            }
            let class = self.class_ref(&name);
            return self.parse_static_member(class, name.span);
        }
        if self.check(&TokenKind::LParen) {
            let function = self.resolve_name(&name, false);
            let (args, end) = self.parse_arguments()?;
            return Ok(Expr {
                kind: ExprKind::Call { function, args },
                span: name.span.to(end),
            });
        }
        Ok(Expr {
            kind: ExprKind::Constant(self.resolve_name(&name, false)),
            span: name.span,
        })
    }

    /// `alias::f()` and `alias::CONST` address members of an imported namespace.
    fn parse_namespace_member(
        &mut self,
        namespace: String,
        start: SourceSpan,
    ) -> Result<Expr, Diagnostic> {
        let member = self.consume_member_name("expected member name after `::`")?;
        let symbol = Symbol::global(format!("{namespace}\\{}", member.lexeme));
        if self.check(&TokenKind::LParen) {
            let (args, end) = self.parse_arguments()?;
            return Ok(Expr {
                kind: ExprKind::Call {
                    function: symbol,
                    args,
                },
                span: start.to(end),
            });
        }
        Ok(Expr {
            kind: ExprKind::Constant(symbol),
            span: start.to(member.span),
        })
    }

    fn parse_static_member(&mut self, class: ClassRef, start: SourceSpan) -> Result<Expr, Diagnostic> {
        if self.check(&TokenKind::Variable) {
            return Err(self.error(self.peek(), "static properties are not supported"));
        }
        let member = self.consume_member_name("expected member name after `::`")?;
        if self.check(&TokenKind::LParen) {
            let (args, end) = self.parse_arguments()?;
            return Ok(Expr {
                kind: ExprKind::StaticCall {
                    class,
                    method: member.lexeme,
                    args,
                },
                span: start.to(end),
            });
        }
        Ok(Expr {
            kind: ExprKind::ClassConstant {
                class,
                name: member.lexeme,
            },
            span: start.to(member.span),
        })
    }

    fn parse_class_ref(&mut self) -> Result<ClassRef, Diagnostic> {
        if self.matches_keyword(Keyword::Static) {
            return Ok(ClassRef::Static);
        }
        let name = self.parse_qualified_name("expected class name")?;
        Ok(self.class_ref(&name))
    }

    fn class_ref(&self, name: &QualifiedName) -> ClassRef {
        if !name.absolute && name.parts.len() == 1 {
            match name.parts[0].to_ascii_lowercase().as_str() {
                "self" => return ClassRef::SelfClass,
                "parent" => return ClassRef::Parent,
                _ => {}
            }
        }
        ClassRef::Named(self.resolve_name(name, true))
    }

    fn parse_qualified_name(&mut self, message: &str) -> Result<QualifiedName, Diagnostic> {
        let start = self.peek().span;
        let absolute = self.matches(&TokenKind::Backslash);
        let first = if absolute {
            self.consume_name_segment(message)?
        } else {
            self.consume_identifier(message)?
        };
        let mut end = first.span;
        let mut parts = vec![first.lexeme];
        while self.check(&TokenKind::Backslash)
            && matches!(
                self.peek_kind(1),
                Some(TokenKind::Identifier | TokenKind::Keyword(_))
            )
        {
            self.advance();
            let segment = self.advance();
            end = segment.span;
            parts.push(segment.lexeme);
        }
        Ok(QualifiedName {
            parts,
            absolute,
            span: start.to(end),
        })
    }

    /// Applies `use` aliases and the current namespace. Unqualified names
    /// inside a namespace keep a global fallback.
    fn resolve_name(&self, name: &QualifiedName, class_like: bool) -> Symbol {
        let joined = name.parts.join("\\");
        if name.absolute {
            return Symbol::global(joined);
        }
        if name.parts.len() > 1 || class_like {
            if let Some(namespace) = self.aliases.get(&name.parts[0]) {
                let rest = &name.parts[1..];
                let qualified = if rest.is_empty() {
                    namespace.clone()
                } else {
                    format!("{namespace}\\{}", rest.join("\\"))
                };
                return Symbol::global(qualified);
            }
        }
        if self.namespace.is_empty() {
            Symbol::global(joined)
        } else {
            Symbol {
                qualified: self.qualify(&joined),
                fallback: Some(joined),
            }
        }
    }

    fn qualify(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}\\{name}", self.namespace)
        }
    }

    fn track_variable(&mut self, name: &str) {
        if !self.imported && self.function_depth == 0 && name != "this" {
            self.session.variables.insert(name.to_string());
        }
    }

    fn at_terminator(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Semicolon | TokenKind::Eof | TokenKind::RBrace
        )
    }

    /// Statements end with `;`; the last one in a file may omit it.
    fn expect_terminator(&mut self) -> Result<(), Diagnostic> {
        if self.matches(&TokenKind::Semicolon) || self.check(&TokenKind::Eof) {
            Ok(())
        } else {
            let token = self.peek();
            Err(self.error(token, format!("unexpected `{}`, expected `;`", token.lexeme)))
        }
    }

    fn consume(&mut self, kind: &TokenKind, message: &str) -> Result<Token, Diagnostic> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(self.peek(), message))
        }
    }

    fn consume_identifier(&mut self, message: &str) -> Result<Token, Diagnostic> {
        self.consume(&TokenKind::Identifier, message)
    }

    /// Identifiers and keywords, as accepted after `->`, `::` and `\`.
    fn consume_member_name(&mut self, message: &str) -> Result<Token, Diagnostic> {
        match self.peek().kind {
            TokenKind::Identifier | TokenKind::Keyword(_) => Ok(self.advance()),
            _ => Err(self.error(self.peek(), message)),
        }
    }

    fn consume_name_segment(&mut self, message: &str) -> Result<Token, Diagnostic> {
        self.consume_member_name(message)
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn matches_keyword(&mut self, keyword: Keyword) -> bool {
        self.matches(&TokenKind::Keyword(keyword))
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        self.check(&TokenKind::Keyword(keyword))
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.current += 1;
        }
        token
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.current + offset).map(|token| &token.kind)
    }

    /// Runs one level of recursive descent, failing once statements and
    /// expressions nest deeper than [`MAX_NESTING_DEPTH`].
    fn nested<T>(&mut self, parse: fn(&mut Self) -> Result<T, Diagnostic>) -> Result<T, Diagnostic> {
        if self.depth >= MAX_NESTING_DEPTH {
            let token = self.peek().clone();
            return Err(self.error(
                &token,
                format!("maximum nesting depth of {MAX_NESTING_DEPTH} exceeded"),
            ));
        }
        self.depth += 1;
        let result = ensure_sufficient_stack(|| parse(self));
        self.depth -= 1;
        result
    }

    fn error(&self, token: &Token, message: impl Into<String>) -> Diagnostic {
        let message = message.into();
        let message = if token.kind == TokenKind::Eof && !message.contains("end of input") {
            format!("{message}, found end of input")
        } else {
            message
        };
        Diagnostic::new(DiagnosticKind::Parser, message).with_span(token.span)
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr {
        span: left.span.to(right.span),
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr {
        span: left.span.to(right.span),
        kind: ExprKind::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}

/// Integer literals that overflow `i64` become floats.
fn number_literal(lexeme: &str) -> Option<Literal> {
    let digits = lexeme.replace('_', "");
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        if hex.is_empty() {
            return None;
        }
        return match i64::from_str_radix(hex, 16) {
            Ok(value) => Some(Literal::Int(value)),
            Err(_) => u128::from_str_radix(hex, 16)
                .ok()
                .map(|value| Literal::Float(value as f64)),
        };
    }
    if digits.contains(['.', 'e', 'E']) {
        return digits.parse().ok().map(Literal::Float);
    }
    match digits.parse::<i64>() {
        Ok(value) => Some(Literal::Int(value)),
        Err(_) => digits.parse().ok().map(Literal::Float),
    }
}
