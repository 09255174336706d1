//! Parser for Kestrel
//!
//! Recursive descent over the token stream. Syntax errors are recorded and
//! the parser resynchronizes at the next statement boundary, so a file with
//! several independent mistakes still yields every well-formed statement.

use std::sync::Arc;

use crate::ast::{
    AssignOp, BinaryOp, ClassDecl, Expr, FStringPart, FunctionDecl, LogicalOp, Program, Stmt,
    SwitchCase, UnaryOp,
};
use crate::error::{ErrorKind, KestrelError, Result};
use crate::lexer::Lexer;
use crate::stack::ensure_sufficient_stack;
use crate::token::{Span, Token, TokenKind};

const MAX_ARGS: usize = 255;

/// The parser state
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    errors: Vec<KestrelError>,
    /// Nesting of `{ }` statement blocks, used by recovery
    depth: usize,
}

impl Parser {
    /// Create a new parser from tokens. Comment tokens are dropped here.
    pub fn new(tokens: Vec<Token>) -> Self {
        let mut tokens: Vec<Token> = tokens
            .into_iter()
            .filter(|t| !matches!(t.kind, TokenKind::Comment))
            .collect();
        if !matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Eof)) {
            let span = tokens.last().map(|t| t.span).unwrap_or_default();
            tokens.push(Token::new(TokenKind::Eof, span, String::new()));
        }
        Self {
            tokens,
            current: 0,
            errors: Vec::new(),
            depth: 0,
        }
    }

    /// Parse the tokens into a program, failing on the first syntax error
    pub fn parse(&mut self) -> Result<Program> {
        let (program, errors) = self.parse_with_recovery();
        match errors.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(program),
        }
    }

    /// Parse the whole input, returning the statements that parsed cleanly
    /// together with every syntax error encountered
    pub fn parse_with_recovery(&mut self) -> (Program, Vec<KestrelError>) {
        let mut statements = Vec::new();

        while !self.is_at_end() {
            if self.match_token(&TokenKind::Semicolon) {
                continue;
            }
            if let Some(stmt) = self.declaration() {
                statements.push(stmt);
            }
        }

        (Program::new(statements), std::mem::take(&mut self.errors))
    }

    // ==================== Declarations ====================

    fn declaration(&mut self) -> Option<Stmt> {
        match ensure_sufficient_stack(|| self.declaration_inner()) {
            Ok(stmt) => Some(stmt),
            Err(err) => {
                tracing::warn!(line = err.line(), "syntax error: {}", err.message());
                self.errors.push(err);
                self.synchronize();
                None
            }
        }
    }

    fn declaration_inner(&mut self) -> Result<Stmt> {
        match self.peek().kind {
            TokenKind::Fun if matches!(self.peek_next().map(|t| &t.kind), Some(TokenKind::Ident(_))) => {
                self.function_declaration()
            }
            TokenKind::Class => self.class_declaration(),
            TokenKind::Var | TokenKind::Val => self.var_declaration(),
            TokenKind::Import => self.import_declaration(),
            _ => self.statement(),
        }
    }

    fn var_declaration(&mut self) -> Result<Stmt> {
        let keyword = self.advance().clone();
        let constant = matches!(keyword.kind, TokenKind::Val);

        let name = self.expect_ident("expected variable name")?;
        let initializer = if self.match_token(&TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };
        self.end_statement("expected ';' or newline after variable declaration")?;

        Ok(Stmt::Var {
            name,
            initializer,
            constant,
            span: keyword.span,
        })
    }

    fn function_declaration(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'fun'
        let name = self.expect_ident("expected function name")?;
        let decl = self.function_rest(Some(name), span)?;
        Ok(Stmt::Function { decl })
    }

    /// Parameters and body shared by declarations, methods and lambdas
    fn function_rest(&mut self, name: Option<String>, span: Span) -> Result<Arc<FunctionDecl>> {
        self.expect(&TokenKind::LeftParen, "expected '(' before parameters")?;

        let mut params = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                if params.len() >= MAX_ARGS {
                    return Err(KestrelError::new(
                        ErrorKind::TooMany("parameters"),
                        Some(self.peek().span),
                    ));
                }
                params.push(self.expect_ident("expected parameter name")?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RightParen, "expected ')' after parameters")?;

        let body = if name.is_none() && self.match_token(&TokenKind::Arrow) {
            let value = self.expression()?;
            let span = value.span();
            vec![Stmt::Return { value: Some(value), span }]
        } else {
            self.expect(&TokenKind::LeftBrace, "expected '{' before function body")?;
            self.block_statements()?
        };

        Ok(Arc::new(FunctionDecl { name, params, body, span }))
    }

    fn class_declaration(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'class'
        let name = self.expect_ident("expected class name")?;

        let superclass = if self.match_token(&TokenKind::Less) {
            let super_span = self.peek().span;
            Some((self.expect_ident("expected superclass name")?, super_span))
        } else {
            None
        };

        self.expect(&TokenKind::LeftBrace, "expected '{' before class body")?;

        let mut methods = Vec::new();
        let mut static_block = None;
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            if self.match_token(&TokenKind::Semicolon) {
                continue;
            }
            match self.peek().kind {
                TokenKind::Static if static_block.is_none() => {
                    self.advance();
                    self.expect(&TokenKind::LeftBrace, "expected '{' after 'static'")?;
                    static_block = Some(self.block_statements()?);
                }
                TokenKind::Fun => {
                    let method_span = self.advance().span;
                    let method_name = self.expect_ident("expected method name")?;
                    methods.push(self.function_rest(Some(method_name), method_span)?);
                }
                _ => {
                    return Err(KestrelError::new(
                        ErrorKind::InvalidClassMember,
                        Some(self.peek().span),
                    ))
                }
            }
        }

        self.expect(&TokenKind::RightBrace, "expected '}' after class body")?;

        Ok(Stmt::Class {
            decl: Arc::new(ClassDecl {
                name,
                superclass,
                methods,
                static_block,
                span,
            }),
        })
    }

    /// Parse import declaration: import pkg.sub.Type
    fn import_declaration(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'import'

        let mut path = vec![self.expect_ident("expected package or type name")?];
        while self.match_token(&TokenKind::Dot) {
            path.push(self.expect_ident("expected package or type name after '.'")?);
        }
        self.end_statement("expected ';' or newline after import")?;

        Ok(Stmt::Import { path, span })
    }

    // ==================== Statements ====================

    fn statement(&mut self) -> Result<Stmt> {
        match self.peek().kind {
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Switch => self.switch_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::Break => {
                let span = self.advance().span;
                self.end_statement("expected ';' or newline after 'break'")?;
                Ok(Stmt::Break { span })
            }
            TokenKind::Continue => {
                let span = self.advance().span;
                self.end_statement("expected ';' or newline after 'continue'")?;
                Ok(Stmt::Continue { span })
            }
            TokenKind::Try => self.try_statement(),
            TokenKind::LeftBrace => {
                let span = self.advance().span;
                let stmts = self.block_statements()?;
                Ok(Stmt::Block { stmts, span })
            }
            _ => self.expression_statement(),
        }
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'if'

        self.expect(&TokenKind::LeftParen, "expected '(' after 'if'")?;
        let condition = self.expression()?;
        self.expect(&TokenKind::RightParen, "expected ')' after if condition")?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.match_token(&TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
            span,
        })
    }

    fn while_statement(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'while'

        self.expect(&TokenKind::LeftParen, "expected '(' after 'while'")?;
        let condition = self.expression()?;
        self.expect(&TokenKind::RightParen, "expected ')' after while condition")?;
        let body = Box::new(self.statement()?);

        Ok(Stmt::While { condition, body, span })
    }

    fn for_statement(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'for'

        self.expect(&TokenKind::LeftParen, "expected '(' after 'for'")?;
        let var = self.expect_ident("expected loop variable name")?;
        self.expect(&TokenKind::In, "expected 'in' after loop variable")?;
        let iterable = self.expression()?;
        self.expect(&TokenKind::RightParen, "expected ')' after for-in expression")?;
        let body = Box::new(self.statement()?);

        Ok(Stmt::ForIn {
            var,
            iterable,
            body,
            span,
        })
    }

    fn switch_statement(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'switch'

        self.expect(&TokenKind::LeftParen, "expected '(' after 'switch'")?;
        let subject = self.expression()?;
        self.expect(&TokenKind::RightParen, "expected ')' after switch expression")?;
        self.expect(&TokenKind::LeftBrace, "expected '{' before switch cases")?;

        let mut cases = Vec::new();
        let mut seen_default = false;
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let case_span = self.peek().span;
            let values = if self.match_token(&TokenKind::Case) {
                let mut values = Vec::new();
                loop {
                    values.push(self.expression()?);
                    if !self.match_token(&TokenKind::Comma) || self.check(&TokenKind::Colon) {
                        break;
                    }
                }
                Some(values)
            } else if self.match_token(&TokenKind::Default) {
                if seen_default {
                    return Err(KestrelError::new(ErrorKind::DuplicateDefault, Some(case_span)));
                }
                seen_default = true;
                None
            } else {
                return Err(self.error_at_peek("expected 'case' or 'default'"));
            };
            self.expect(&TokenKind::Colon, "expected ':' after case/default")?;

            self.depth += 1;
            let mut body = Vec::new();
            while !self.check(&TokenKind::Case)
                && !self.check(&TokenKind::Default)
                && !self.check(&TokenKind::RightBrace)
                && !self.is_at_end()
            {
                if self.match_token(&TokenKind::Semicolon) {
                    continue;
                }
                if let Some(stmt) = self.declaration() {
                    body.push(stmt);
                }
            }
            self.depth -= 1;

            cases.push(SwitchCase {
                values,
                body,
                span: case_span,
            });
        }
        self.expect(&TokenKind::RightBrace, "expected '}' after switch body")?;

        Ok(Stmt::Switch { subject, cases, span })
    }

    fn return_statement(&mut self) -> Result<Stmt> {
        let keyword = self.advance().clone();

        let ends_here = self.check(&TokenKind::Semicolon)
            || self.check(&TokenKind::RightBrace)
            || self.is_at_end()
            || self.peek().span.line > keyword.span.line;
        let value = if ends_here { None } else { Some(self.expression()?) };
        self.end_statement("expected ';' or newline after return value")?;

        Ok(Stmt::Return {
            value,
            span: keyword.span,
        })
    }

    fn try_statement(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'try'

        self.expect(&TokenKind::LeftBrace, "expected '{' before 'try' body")?;
        let body = self.block_statements()?;

        let catch = if self.match_token(&TokenKind::Catch) {
            self.expect(&TokenKind::LeftParen, "expected '(' after 'catch'")?;
            let name = self.expect_ident("expected error variable name")?;
            self.expect(&TokenKind::RightParen, "expected ')' after error variable")?;
            self.expect(&TokenKind::LeftBrace, "expected '{' before 'catch' body")?;
            Some((name, self.block_statements()?))
        } else {
            None
        };

        let finally = if self.match_token(&TokenKind::Finally) {
            self.expect(&TokenKind::LeftBrace, "expected '{' before 'finally' body")?;
            Some(self.block_statements()?)
        } else {
            None
        };

        if catch.is_none() && finally.is_none() {
            return Err(KestrelError::new(ErrorKind::TryWithoutHandler, Some(span)));
        }

        Ok(Stmt::Try {
            body,
            catch,
            finally,
            span,
        })
    }

    /// Statements up to and including the closing `}`
    fn block_statements(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();

        self.depth += 1;
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            if self.match_token(&TokenKind::Semicolon) {
                continue;
            }
            if let Some(stmt) = self.declaration() {
                stmts.push(stmt);
            }
        }
        self.depth -= 1;

        self.expect(&TokenKind::RightBrace, "expected '}' after block")?;

        Ok(stmts)
    }

    /// An expression, optionally followed by an assignment operator
    fn expression_statement(&mut self) -> Result<Stmt> {
        let expr = self.expression()?;

        let Some(op) = assign_op(&self.peek().kind) else {
            self.end_statement("expected ';' or newline after expression")?;
            return Ok(Stmt::Expr { expr });
        };
        let op_span = self.advance().span;
        let value = self.expression()?;
        self.end_statement("expected ';' or newline after assignment")?;

        let span = expr.span();
        let stmt = match expr {
            Expr::Variable { name, span } => Stmt::Assign { name, op, value, span },
            Expr::Get { object, name, .. } => Stmt::Expr {
                expr: Expr::Set {
                    object,
                    name,
                    op,
                    value: Box::new(value),
                    span,
                },
            },
            Expr::Index { object, index, .. } => Stmt::Expr {
                expr: Expr::IndexSet {
                    object,
                    index,
                    op,
                    value: Box::new(value),
                    span,
                },
            },
            _ => {
                return Err(KestrelError::new(
                    ErrorKind::InvalidAssignmentTarget,
                    Some(op_span),
                ))
            }
        };
        Ok(stmt)
    }

    /// A statement ends at `;`, a line break, `}` or end of input
    fn end_statement(&mut self, message: &str) -> Result<()> {
        if self.match_token(&TokenKind::Semicolon) {
            return Ok(());
        }
        let ended = self.is_at_end()
            || self.previous().span.line < self.peek().span.line
            || matches!(
                self.peek().kind,
                TokenKind::RightBrace | TokenKind::Else | TokenKind::Case | TokenKind::Default
            );
        if ended {
            Ok(())
        } else {
            Err(self.error_at_peek(message))
        }
    }

    // ==================== Expressions ====================

    /// Parse a single expression
    pub fn expression(&mut self) -> Result<Expr> {
        ensure_sufficient_stack(|| self.or_expr())
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;

        while self.match_token(&TokenKind::OrOr) {
            let right = self.and_expr()?;
            left = logical(left, LogicalOp::Or, right);
        }

        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.equality()?;

        while self.match_token(&TokenKind::AndAnd) {
            let right = self.equality()?;
            left = logical(left, LogicalOp::And, right);
        }

        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut left = self.comparison()?;

        loop {
            let op = match self.peek().kind {
                TokenKind::EqualEqual => BinaryOp::Eq,
                TokenKind::BangEqual => BinaryOp::Ne,
                _ => break,
            };
            self.advance();
            let right = self.comparison()?;
            left = binary(left, op, right);
        }

        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut left = self.term()?;

        loop {
            let op = match self.peek().kind {
                TokenKind::Less => BinaryOp::Lt,
                TokenKind::LessEqual => BinaryOp::Le,
                TokenKind::Greater => BinaryOp::Gt,
                TokenKind::GreaterEqual => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.term()?;
            left = binary(left, op, right);
        }

        Ok(left)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut left = self.factor()?;

        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.factor()?;
            left = binary(left, op, right);
        }

        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;

        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.unary()?;
            left = binary(left, op, right);
        }

        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = match self.peek().kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.call(),
        };
        let span = self.advance().span;
        let operand = ensure_sufficient_stack(|| self.unary())?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
            span,
        })
    }

    fn call(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;

        loop {
            // A call or index must open on the line its callee ends on
            let same_line = self.peek().span.line == self.previous().span.line;
            if same_line && self.match_token(&TokenKind::LeftParen) {
                expr = self.finish_call(expr)?;
            } else if same_line && self.match_token(&TokenKind::LeftBracket) {
                let index = self.expression()?;
                let end = self.expect(&TokenKind::RightBracket, "expected ']' after index")?.span;
                let span = expr.span().to(end);
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    span,
                };
            } else if self.match_token(&TokenKind::Dot) {
                let name = self.expect_ident("expected property name after '.'")?;
                let span = expr.span().to(self.previous().span);
                expr = Expr::Get {
                    object: Box::new(expr),
                    name,
                    span,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> Result<Expr> {
        let mut args = Vec::new();

        if !self.check(&TokenKind::RightParen) {
            loop {
                if args.len() >= MAX_ARGS {
                    return Err(KestrelError::new(
                        ErrorKind::TooMany("arguments"),
                        Some(self.peek().span),
                    ));
                }
                args.push(self.expression()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }

        let end_span = self.expect(&TokenKind::RightParen, "expected ')' after arguments")?.span;
        let span = callee.span().to(end_span);

        Ok(Expr::Call {
            callee: Box::new(callee),
            args,
            span,
        })
    }

    fn primary(&mut self) -> Result<Expr> {
        let token = self.peek().clone();
        let span = token.span;

        let expr = match token.kind {
            TokenKind::Number(value) => Expr::Number { value, span },
            TokenKind::Float(value) => Expr::Float { value, span },
            TokenKind::String(value) => Expr::String { value, span },
            TokenKind::True => Expr::Bool { value: true, span },
            TokenKind::False => Expr::Bool { value: false, span },
            TokenKind::Null => Expr::Null { span },
            TokenKind::This => Expr::This { span },
            TokenKind::Ident(name) => Expr::Variable { name, span },
            TokenKind::FString(content) => {
                self.advance();
                let parts = parse_fstring(&content, span)?;
                return Ok(Expr::Interpolated { parts, span });
            }
            TokenKind::Fun => {
                self.advance();
                let decl = self.function_rest(None, span)?;
                return Ok(Expr::Lambda { decl, span });
            }
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.expression()?;
                self.expect(&TokenKind::RightParen, "expected ')' after expression")?;
                return Ok(expr);
            }
            TokenKind::LeftBracket => {
                self.advance();
                return self.list_literal(span);
            }
            TokenKind::LeftBrace => {
                self.advance();
                return self.map_literal(span);
            }
            other => {
                return Err(KestrelError::new(
                    ErrorKind::ExpectedExpression(other.to_string()),
                    Some(span),
                ))
            }
        };

        self.advance();
        Ok(expr)
    }

    fn list_literal(&mut self, span: Span) -> Result<Expr> {
        let mut elements = Vec::new();
        while !self.check(&TokenKind::RightBracket) {
            elements.push(self.expression()?);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        let end = self.expect(&TokenKind::RightBracket, "expected ']' after list elements")?.span;
        Ok(Expr::List {
            elements,
            span: span.to(end),
        })
    }

    fn map_literal(&mut self, span: Span) -> Result<Expr> {
        let mut entries = Vec::new();
        while !self.check(&TokenKind::RightBrace) {
            let key = match &self.peek().kind {
                TokenKind::Ident(name) | TokenKind::String(name) => name.clone(),
                _ => return Err(self.error_at_peek("expected identifier or string as map key")),
            };
            self.advance();
            self.expect(&TokenKind::Colon, "expected ':' after map key")?;
            entries.push((key, self.expression()?));
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        let end = self.expect(&TokenKind::RightBrace, "expected '}' after map entries")?.span;
        Ok(Expr::Map {
            entries,
            span: span.to(end),
        })
    }

    // ==================== Helpers ====================

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn peek_next(&self) -> Option<&Token> {
        self.tokens.get(self.current + 1)
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, message: &str) -> Result<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_at_peek(message))
        }
    }

    fn expect_ident(&mut self, message: &str) -> Result<String> {
        if let TokenKind::Ident(name) = &self.peek().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error_at_peek(message))
        }
    }

    fn error_at_peek(&self, message: &str) -> KestrelError {
        let token = self.peek();
        KestrelError::new(
            ErrorKind::ExpectedToken(message.to_string(), token.kind.to_string()),
            Some(token.span),
        )
    }

    /// Skip to the next statement boundary after a syntax error
    fn synchronize(&mut self) {
        // A `}` closing an enclosing block belongs to that block
        let closes_block = self.depth > 0 && self.check(&TokenKind::RightBrace);
        if !self.is_at_end() && !closes_block {
            self.advance();
        }

        while !self.is_at_end() {
            if matches!(self.previous().kind, TokenKind::Semicolon) {
                return;
            }
            if self.peek().kind.starts_statement() || self.check(&TokenKind::RightBrace) {
                return;
            }
            self.advance();
        }
    }
}

fn assign_op(kind: &TokenKind) -> Option<AssignOp> {
    match kind {
        TokenKind::Equal => Some(AssignOp::Assign),
        TokenKind::PlusEqual => Some(AssignOp::Add),
        TokenKind::MinusEqual => Some(AssignOp::Sub),
        TokenKind::StarEqual => Some(AssignOp::Mul),
        TokenKind::SlashEqual => Some(AssignOp::Div),
        TokenKind::PercentEqual => Some(AssignOp::Mod),
        _ => None,
    }
}

fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    let span = left.span().to(right.span());
    Expr::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
        span,
    }
}

fn logical(left: Expr, op: LogicalOp, right: Expr) -> Expr {
    let span = left.span().to(right.span());
    Expr::Logical {
        left: Box::new(left),
        op,
        right: Box::new(right),
        span,
    }
}

/// Split an f-string body into literal text and embedded expressions.
/// Each `{ ... }` span is lexed and parsed on its own.
fn parse_fstring(content: &str, span: Span) -> Result<Vec<FStringPart>> {
    let invalid = |message: String| KestrelError::new(ErrorKind::InvalidFString(message), Some(span));

    let chars: Vec<char> = content.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '{' {
            literal.push(chars[i]);
            i += 1;
            continue;
        }

        let end = find_matching_brace(&chars, i)
            .ok_or_else(|| invalid("unmatched '{'".to_string()))?;
        let code: String = chars[i + 1..end].iter().collect();
        if code.trim().is_empty() {
            return Err(invalid("empty expression '{}' is not allowed".to_string()));
        }

        if !literal.is_empty() {
            parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
        }
        let expr = parse_embedded(&code, span.line)
            .map_err(|err| invalid(format!("invalid expression '{{{}}}': {}", code, err.message())))?;
        parts.push(FStringPart::Expr(expr));
        i = end + 1;
    }

    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}

fn find_matching_brace(chars: &[char], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for (i, &c) in chars.iter().enumerate().skip(start) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

fn parse_embedded(code: &str, line: usize) -> Result<Expr> {
    let tokens = Lexer::at_line(code, line).tokenize()?;
    let mut parser = Parser::new(tokens);
    let expr = parser.expression()?;
    if !parser.is_at_end() {
        return Err(parser.error_at_peek("expected end of expression"));
    }
    match parser.errors.into_iter().next() {
        Some(err) => Err(err),
        None => Ok(expr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Program {
        let mut lexer = Lexer::new(source);
        let tokens = lexer.tokenize().unwrap();
        let mut parser = Parser::new(tokens);
        parser.parse().unwrap()
    }

    fn parse_err(source: &str) -> KestrelError {
        let tokens = Lexer::new(source).tokenize().unwrap();
        Parser::new(tokens).parse().unwrap_err()
    }

    fn expr(source: &str) -> Expr {
        match parse(source).statements.into_iter().next() {
            Some(Stmt::Expr { expr }) => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_var_and_val() {
        let program = parse("var x = 42\nval y = 1; var z");
        assert_eq!(program.statements.len(), 3);
        match &program.statements[1] {
            Stmt::Var { name, constant, .. } => {
                assert_eq!(name, "y");
                assert!(*constant);
            }
            _ => panic!("expected var statement"),
        }
        assert!(matches!(&program.statements[2], Stmt::Var { initializer: None, .. }));
    }

    #[test]
    fn test_function() {
        let program = parse("fun add(a, b) { return a + b }");
        match &program.statements[0] {
            Stmt::Function { decl } => {
                assert_eq!(decl.name.as_deref(), Some("add"));
                assert_eq!(decl.params, vec!["a", "b"]);
                assert_eq!(decl.body.len(), 1);
            }
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn test_precedence() {
        assert_eq!(expr("1 + 2 * 3").to_string(), "(1 + (2 * 3))");
        assert_eq!(expr("a || b && !c").to_string(), "(a || (b && !c))");
        assert_eq!(expr("-x.y(1)[0] < 2 == true").to_string(), "((-x.y(1)[0] < 2) == true)");
    }

    #[test]
    fn test_literal_round_trip() {
        for source in ["42", "3.25", "2.5f", "'say \"hi\"'", "\"plain\"", "true", "null"] {
            let first = expr(source);
            let second = expr(&first.to_string());
            assert_eq!(first.to_string(), second.to_string());
            assert!(second.is_literal());
        }
    }

    #[test]
    fn test_assignment_targets() {
        let program = parse("x = 1\nobj.name += \"!\"\nitems[0] *= 2");
        assert!(matches!(&program.statements[0], Stmt::Assign { name, op: AssignOp::Assign, .. } if name == "x"));
        assert!(matches!(&program.statements[1], Stmt::Expr { expr: Expr::Set { op: AssignOp::Add, .. } }));
        assert!(matches!(&program.statements[2], Stmt::Expr { expr: Expr::IndexSet { op: AssignOp::Mul, .. } }));
        assert_eq!(parse_err("a + b = 3").kind, ErrorKind::InvalidAssignmentTarget);
        assert_eq!(parse_err("f() = 3").kind, ErrorKind::InvalidAssignmentTarget);
    }

    #[test]
    fn test_class_declaration() {
        let program = parse("class Dog < Animal {\n static { val SOUND = \"woof\" }\n fun init(name) { this.name = name }\n fun speak() { return SOUND }\n}");
        match &program.statements[0] {
            Stmt::Class { decl } => {
                assert_eq!(decl.name, "Dog");
                assert_eq!(decl.superclass.as_ref().map(|(n, _)| n.as_str()), Some("Animal"));
                assert_eq!(decl.methods.len(), 2);
                assert_eq!(decl.static_block.as_ref().map(Vec::len), Some(1));
            }
            _ => panic!("expected class"),
        }
        assert_eq!(parse_err("class A { var x = 1 }").kind, ErrorKind::InvalidClassMember);
    }

    #[test]
    fn test_switch() {
        let program = parse("switch (x) {\n case 1, 2: a()\n break\n default: b()\n case 3: c()\n}");
        match &program.statements[0] {
            Stmt::Switch { cases, .. } => {
                assert_eq!(cases.len(), 3);
                assert_eq!(cases[0].values.as_ref().map(Vec::len), Some(2));
                assert_eq!(cases[0].body.len(), 2);
                assert!(cases[1].values.is_none());
            }
            _ => panic!("expected switch"),
        }
        assert_eq!(
            parse_err("switch (x) { default: a() default: b() }").kind,
            ErrorKind::DuplicateDefault
        );
    }

    #[test]
    fn test_try_requires_handler() {
        assert_eq!(parse_err("try { a() }").kind, ErrorKind::TryWithoutHandler);
        let program = parse("try { a() } finally { b() }");
        assert!(matches!(&program.statements[0], Stmt::Try { catch: None, finally: Some(_), .. }));
    }

    #[test]
    fn test_map_and_block() {
        let program = parse("{ var a = 1 }\nvar m = {name: \"x\", \"two words\": 2}");
        assert!(matches!(&program.statements[0], Stmt::Block { .. }));
        match &program.statements[1] {
            Stmt::Var { initializer: Some(Expr::Map { entries, .. }), .. } => {
                assert_eq!(entries[0].0, "name");
                assert_eq!(entries[1].0, "two words");
            }
            _ => panic!("expected map literal"),
        }
    }

    #[test]
    fn test_lambdas() {
        let e = expr("apply(fun (a) -> a * 2, fun () { return 1 })");
        match e {
            Expr::Call { args, .. } => {
                assert!(matches!(&args[0], Expr::Lambda { decl, .. } if decl.params == vec!["a"]));
                assert!(matches!(&args[1], Expr::Lambda { decl, .. } if decl.params.is_empty()));
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn test_fstring_parts() {
        match expr(r#"f"sum = {a + b}, nested { {"a":1}["a"] }!""#) {
            Expr::Interpolated { parts, .. } => {
                assert_eq!(parts.len(), 5);
                assert_eq!(parts[0], FStringPart::Literal("sum = ".into()));
                assert!(matches!(&parts[3], FStringPart::Expr(Expr::Index { .. })));
                assert_eq!(parts[4], FStringPart::Literal("!".into()));
            }
            _ => panic!("expected interpolated string"),
        }
        assert!(matches!(parse_err("f\"{}\"").kind, ErrorKind::InvalidFString(_)));
        assert!(matches!(parse_err("f\"{a +}\"").kind, ErrorKind::InvalidFString(_)));
    }

    #[test]
    fn test_comments_are_skipped() {
        let program = parse("// header\nvar a = 1 // trailing\n/* block */ var b = 2");
        assert_eq!(program.statements.len(), 2);
    }

    #[test]
    fn test_same_line_statements_need_separator() {
        assert!(matches!(parse_err("var a = 1 var b = 2").kind, ErrorKind::ExpectedToken(..)));
        assert_eq!(parse("var a = 1; var b = 2").statements.len(), 2);
        assert_eq!(parse("if (a) b() else c()").statements.len(), 1);
    }

    #[test]
    fn test_recovery_collects_every_error() {
        let source = "var = 1;\nvar ok = 2;\nprint(;\n";
        let tokens = Lexer::new(source).tokenize().unwrap();
        let (program, errors) = Parser::new(tokens).parse_with_recovery();

        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].line(), 1);
        assert_eq!(errors[1].line(), 3);
        assert_eq!(program.statements.len(), 1);
        assert!(matches!(&program.statements[0], Stmt::Var { name, .. } if name == "ok"));
    }

    #[test]
    fn test_recovery_inside_block() {
        let source = "fun f() {\n var = 1\n return 2\n}\nvar after = 3";
        let tokens = Lexer::new(source).tokenize().unwrap();
        let (program, errors) = Parser::new(tokens).parse_with_recovery();

        assert_eq!(errors.len(), 1);
        assert_eq!(program.statements.len(), 2);
        match &program.statements[0] {
            Stmt::Function { decl } => assert_eq!(decl.body.len(), 1),
            _ => panic!("expected function"),
        }
    }
}
