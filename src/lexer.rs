use crate::diagnostics::{Diagnostic, DiagnosticKind, SourceSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Function,
    Fn,
    Return,
    If,
    Elseif,
    Else,
    While,
    Do,
    For,
    Foreach,
    As,
    Break,
    Continue,
    Echo,
    True,
    False,
    Null,
    Use,
    Namespace,
    Const,
    Class,
    Extends,
    New,
    Public,
    Protected,
    Private,
    Static,
    Throw,
    Try,
    Catch,
    Finally,
    Instanceof,
    Array,
}

/// Piece of a double-quoted string containing `$name` interpolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    Text(String),
    Variable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Variable,
    Identifier,
    Number,
    String,
    Template(Vec<TemplatePart>),
    Keyword(Keyword),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    DoubleColon,
    Question,
    DoubleQuestion,
    DoubleQuestionAssign,
    Arrow,
    FatArrow,
    Backslash,
    Ellipsis,
    Dot,
    DotAssign,
    Assign,
    Plus,
    PlusAssign,
    PlusPlus,
    Minus,
    MinusAssign,
    MinusMinus,
    Star,
    StarAssign,
    Slash,
    SlashAssign,
    Percent,
    PercentAssign,
    Ampersand,
    Pipe,
    DoubleAmpersand,
    DoublePipe,
    Bang,
    BangEqual,
    BangDoubleEqual,
    EqualEqual,
    TripleEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Unknown,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// Identifier text, variable name without `$`, number digits or decoded string.
    pub lexeme: String,
    pub span: SourceSpan,
}

pub struct Lexer<'a> {
    source: &'a str,
    file: usize,
    chars: std::str::CharIndices<'a>,
    current: usize,
    peeked: Option<(usize, char)>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, file: usize) -> Self {
        let mut lexer = Self {
            source,
            file,
            chars: source.char_indices(),
            current: 0,
            peeked: None,
        };
        if source.starts_with("<?php") {
            for _ in 0.."<?php".len() {
                lexer.bump();
            }
        }
        lexer
    }

    fn span(&self, start: usize, end: usize) -> SourceSpan {
        SourceSpan::new(self.file, start, end)
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let next = if let Some((idx, ch)) = self.peeked.take() {
            Some((idx, ch))
        } else {
            self.chars.next()
        };
        if let Some((idx, ch)) = next {
            self.current = idx + ch.len_utf8();
            Some((idx, ch))
        } else {
            None
        }
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        if self.peeked.is_none() {
            self.peeked = self.chars.next();
        }
        self.peeked
    }

    /// Character after the peeked one.
    fn peek_second(&mut self) -> Option<char> {
        self.peek();
        self.chars.clone().next().map(|(_, ch)| ch)
    }

    fn match_next(&mut self, expected: char) -> bool {
        if let Some((idx, ch)) = self.peek() {
            if ch == expected {
                self.peeked = None;
                self.current = idx + ch.len_utf8();
                true
            } else {
                false
            }
        } else {
            false
        }
    }

    fn collect_while<F>(&mut self, start: usize, mut predicate: F) -> String
    where
        F: FnMut(char) -> bool,
    {
        let mut end = self.current;
        while let Some((idx, ch)) = self.peek() {
            if predicate(ch) {
                self.bump();
                end = idx + ch.len_utf8();
            } else {
                break;
            }
        }
        self.source[start..end].to_string()
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), Diagnostic> {
        loop {
            match self.peek() {
                Some((_, ch)) if ch.is_whitespace() => {
                    self.bump();
                }
                Some((_, '#')) => self.skip_line(),
                Some((start, '/')) => match self.peek_second() {
                    Some('/') => self.skip_line(),
                    Some('*') => {
                        self.bump();
                        self.bump();
                        self.skip_block_comment(start)?;
                    }
                    _ => return Ok(()),
                },
                _ => return Ok(()),
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some((_, ch)) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn skip_block_comment(&mut self, start: usize) -> Result<(), Diagnostic> {
        while let Some((_, ch)) = self.bump() {
            if ch == '*' && self.match_next('/') {
                return Ok(());
            }
        }
        Err(
            Diagnostic::new(DiagnosticKind::Lexer, "unterminated comment")
                .with_span(self.span(start, self.current)),
        )
    }

    fn identifier_or_keyword(&mut self, start: usize) -> Token {
        let lexeme = self.collect_while(start, is_identifier_char);
        let kind = keyword_for(&lexeme).unwrap_or(TokenKind::Identifier);
        Token {
            kind,
            lexeme,
            span: self.span(start, self.current),
        }
    }

    fn variable(&mut self, start: usize) -> Token {
        match self.peek() {
            Some((name_start, ch)) if is_identifier_start(ch) => {
                self.bump();
                let lexeme = self.collect_while(name_start, is_identifier_char);
                Token {
                    kind: TokenKind::Variable,
                    lexeme,
                    span: self.span(start, self.current),
                }
            }
            _ => self.simple_token(start, TokenKind::Unknown),
        }
    }

    fn number_literal(&mut self, start: usize, first: char) -> Token {
        if first == '0' && matches!(self.peek(), Some((_, 'x' | 'X'))) {
            self.bump();
            self.collect_while(start, |ch| ch.is_ascii_hexdigit() || ch == '_');
            return self.simple_token(start, TokenKind::Number);
        }
        let mut seen_dot = false;
        let mut seen_exp = false;
        while let Some((_, ch)) = self.peek() {
            match ch {
                '0'..='9' | '_' => {
                    self.bump();
                }
                '.' if !seen_dot && !seen_exp => {
                    if !matches!(self.peek_second(), Some('0'..='9')) {
                        break;
                    }
                    seen_dot = true;
                    self.bump();
                }
                'e' | 'E' if !seen_exp => {
                    let after = self.peek_second();
                    let signed = matches!(after, Some('+' | '-'));
                    if !signed && !matches!(after, Some('0'..='9')) {
                        break;
                    }
                    seen_exp = true;
                    self.bump();
                    if signed {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
        self.simple_token(start, TokenKind::Number)
    }

    fn single_quoted(&mut self, start: usize) -> Result<Token, Diagnostic> {
        let mut value = String::new();
        while let Some((_, ch)) = self.bump() {
            match ch {
                '\'' => {
                    return Ok(Token {
                        kind: TokenKind::String,
                        lexeme: value,
                        span: self.span(start, self.current),
                    });
                }
                '\\' => match self.peek() {
                    Some((_, esc @ ('\'' | '\\'))) => {
                        self.bump();
                        value.push(esc);
                    }
                    _ => value.push('\\'),
                },
                _ => value.push(ch),
            }
        }
        Err(self.unterminated_string(start))
    }

    fn double_quoted(&mut self, start: usize) -> Result<Token, Diagnostic> {
        let mut parts = Vec::new();
        let mut text = String::new();
        while let Some((_, ch)) = self.bump() {
            match ch {
                '"' => {
                    let span = self.span(start, self.current);
                    if parts.is_empty() {
                        return Ok(Token {
                            kind: TokenKind::String,
                            lexeme: text,
                            span,
                        });
                    }
                    if !text.is_empty() {
                        parts.push(TemplatePart::Text(text));
                    }
                    return Ok(Token {
                        kind: TokenKind::Template(parts),
                        lexeme: self.source[start..self.current].to_string(),
                        span,
                    });
                }
                '\\' => {
                    let Some((_, esc)) = self.bump() else {
                        break;
                    };
                    match esc {
                        'n' => text.push('\n'),
                        'r' => text.push('\r'),
                        't' => text.push('\t'),
                        '0' => text.push('\0'),
                        '"' | '\\' | '$' => text.push(esc),
                        other => {
                            text.push('\\');
                            text.push(other);
                        }
                    }
                }
                '$' if matches!(self.peek(), Some((_, c)) if is_identifier_start(c)) => {
                    if !text.is_empty() {
                        parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                    }
                    let name_start = self.current;
                    let name = self.collect_while(name_start, is_identifier_char);
                    parts.push(TemplatePart::Variable(name));
                }
                '{' if matches!(self.peek(), Some((_, '$'))) => {
                    self.bump();
                    let name_start = self.current;
                    let name = self.collect_while(name_start, is_identifier_char);
                    if name.is_empty() || !self.match_next('}') {
                        return Err(Diagnostic::new(
                            DiagnosticKind::Lexer,
                            "expected `{$name}` inside string interpolation",
                        )
                        .with_span(self.span(start, self.current)));
                    }
                    if !text.is_empty() {
                        parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                    }
                    parts.push(TemplatePart::Variable(name));
                }
                _ => text.push(ch),
            }
        }
        Err(self.unterminated_string(start))
    }

    fn unterminated_string(&self, start: usize) -> Diagnostic {
        Diagnostic::new(DiagnosticKind::Lexer, "unterminated string literal")
            .with_span(self.span(start, self.current))
    }

    fn simple_token(&mut self, start: usize, kind: TokenKind) -> Token {
        let end = self.current;
        Token {
            kind,
            lexeme: self.source[start..end].to_string(),
            span: self.span(start, end),
        }
    }

    /// Picks `assign` when the next character is `=`, `plain` otherwise.
    fn with_assign(&mut self, start: usize, plain: TokenKind, assign: TokenKind) -> Token {
        if self.match_next('=') {
            self.simple_token(start, assign)
        } else {
            self.simple_token(start, plain)
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            let (start, ch) = match self.bump() {
                Some(pair) => pair,
                None => {
                    tokens.push(Token {
                        kind: TokenKind::Eof,
                        lexeme: String::new(),
                        span: self.span(self.current, self.current),
                    });
                    break;
                }
            };

            let token = match ch {
                c if is_identifier_start(c) => self.identifier_or_keyword(start),
                '$' => self.variable(start),
                '0'..='9' => self.number_literal(start, ch),
                '\'' => self.single_quoted(start)?,
                '"' => self.double_quoted(start)?,
                '(' => self.simple_token(start, TokenKind::LParen),
                ')' => self.simple_token(start, TokenKind::RParen),
                '{' => self.simple_token(start, TokenKind::LBrace),
                '}' => self.simple_token(start, TokenKind::RBrace),
                '[' => self.simple_token(start, TokenKind::LBracket),
                ']' => self.simple_token(start, TokenKind::RBracket),
                ',' => self.simple_token(start, TokenKind::Comma),
                ';' => self.simple_token(start, TokenKind::Semicolon),
                '\\' => self.simple_token(start, TokenKind::Backslash),
                ':' => {
                    if self.match_next(':') {
                        self.simple_token(start, TokenKind::DoubleColon)
                    } else {
                        self.simple_token(start, TokenKind::Colon)
                    }
                }
                '?' => {
                    if self.match_next('?') {
                        self.with_assign(
                            start,
                            TokenKind::DoubleQuestion,
                            TokenKind::DoubleQuestionAssign,
                        )
                    } else {
                        self.simple_token(start, TokenKind::Question)
                    }
                }
                '.' => {
                    if self.peek().map(|(_, c)| c) == Some('.') && self.peek_second() == Some('.')
                    {
                        self.bump();
                        self.bump();
                        self.simple_token(start, TokenKind::Ellipsis)
                    } else {
                        self.with_assign(start, TokenKind::Dot, TokenKind::DotAssign)
                    }
                }
                '+' => {
                    if self.match_next('+') {
                        self.simple_token(start, TokenKind::PlusPlus)
                    } else {
                        self.with_assign(start, TokenKind::Plus, TokenKind::PlusAssign)
                    }
                }
                '-' => {
                    if self.match_next('-') {
                        self.simple_token(start, TokenKind::MinusMinus)
                    } else if self.match_next('>') {
                        self.simple_token(start, TokenKind::Arrow)
                    } else {
                        self.with_assign(start, TokenKind::Minus, TokenKind::MinusAssign)
                    }
                }
                '*' => self.with_assign(start, TokenKind::Star, TokenKind::StarAssign),
                '/' => self.with_assign(start, TokenKind::Slash, TokenKind::SlashAssign),
                '%' => self.with_assign(start, TokenKind::Percent, TokenKind::PercentAssign),
                '=' => {
                    if self.match_next('>') {
                        self.simple_token(start, TokenKind::FatArrow)
                    } else if self.match_next('=') {
                        self.with_assign(start, TokenKind::EqualEqual, TokenKind::TripleEqual)
                    } else {
                        self.simple_token(start, TokenKind::Assign)
                    }
                }
                '!' => {
                    if self.match_next('=') {
                        self.with_assign(start, TokenKind::BangEqual, TokenKind::BangDoubleEqual)
                    } else {
                        self.simple_token(start, TokenKind::Bang)
                    }
                }
                '&' => {
                    if self.match_next('&') {
                        self.simple_token(start, TokenKind::DoubleAmpersand)
                    } else {
                        self.simple_token(start, TokenKind::Ampersand)
                    }
                }
                '|' => {
                    if self.match_next('|') {
                        self.simple_token(start, TokenKind::DoublePipe)
                    } else {
                        self.simple_token(start, TokenKind::Pipe)
                    }
                }
                '<' => {
                    if self.match_next('>') {
                        self.simple_token(start, TokenKind::BangEqual)
                    } else {
                        self.with_assign(start, TokenKind::Less, TokenKind::LessEqual)
                    }
                }
                '>' => self.with_assign(start, TokenKind::Greater, TokenKind::GreaterEqual),
                _ => self.simple_token(start, TokenKind::Unknown),
            };
            tokens.push(token);
        }
        Ok(tokens)
    }
}

fn is_identifier_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_identifier_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

fn keyword_for(ident: &str) -> Option<TokenKind> {
    use self::Keyword as Kw;
    let keyword = match ident.to_ascii_lowercase().as_str() {
        "function" => Kw::Function,
        "fn" => Kw::Fn,
        "return" => Kw::Return,
        "if" => Kw::If,
        "elseif" => Kw::Elseif,
        "else" => Kw::Else,
        "while" => Kw::While,
        "do" => Kw::Do,
        "for" => Kw::For,
        "foreach" => Kw::Foreach,
        "as" => Kw::As,
        "break" => Kw::Break,
        "continue" => Kw::Continue,
        "echo" => Kw::Echo,
        "true" => Kw::True,
        "false" => Kw::False,
        "null" => Kw::Null,
        "use" => Kw::Use,
        "namespace" => Kw::Namespace,
        "const" => Kw::Const,
        "class" => Kw::Class,
        "extends" => Kw::Extends,
        "new" => Kw::New,
        "public" => Kw::Public,
        "protected" => Kw::Protected,
        "private" => Kw::Private,
        "static" => Kw::Static,
        "throw" => Kw::Throw,
        "try" => Kw::Try,
        "catch" => Kw::Catch,
        "finally" => Kw::Finally,
        "instanceof" => Kw::Instanceof,
        "array" => Kw::Array,
        _ => return None,
    };
    Some(TokenKind::Keyword(keyword))
}
