//! Error types for Kestrel
//!
//! Provides structured error handling with source locations. Errors are
//! strictly layered: lexical errors abort scanning, syntax errors are
//! recovered per statement, runtime errors unwind the current `execute`.

use crate::token::Span;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The three layers an error can originate from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Lexical,
    Syntax,
    Runtime,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Lexical => write!(f, "lexical"),
            ErrorCategory::Syntax => write!(f, "syntax"),
            ErrorCategory::Runtime => write!(f, "runtime"),
        }
    }
}

/// Error kinds in Kestrel
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    // Lexer errors
    #[error("unexpected character '{0}'")]
    UnexpectedCharacter(char),
    #[error("unterminated string")]
    UnterminatedString,
    #[error("unterminated f-string")]
    UnterminatedFString,
    #[error("unterminated block comment")]
    UnterminatedComment,
    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    // Parser errors
    #[error("{0}, got '{1}'")]
    ExpectedToken(String, String),
    #[error("expected expression, got '{0}'")]
    ExpectedExpression(String),
    #[error("invalid assignment target")]
    InvalidAssignmentTarget,
    #[error("multiple default cases in switch statement")]
    DuplicateDefault,
    #[error("a 'try' statement must have at least a 'catch' or a 'finally' block")]
    TryWithoutHandler,
    #[error("only 'fun' declarations and a single 'static' block are allowed in a class body")]
    InvalidClassMember,
    #[error("invalid f-string: {0}")]
    InvalidFString(String),
    #[error("cannot have more than 255 {0}")]
    TooMany(&'static str),

    // Runtime errors
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),
    #[error("cannot assign to constant '{0}'")]
    ConstantReassignment(String),
    #[error("{0}")]
    TypeMismatch(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("can only call functions, methods or classes, got {0}")]
    NotCallable(String),
    #[error("'{name}' expected {expected} arguments, but got {got}")]
    WrongArity {
        name: String,
        expected: String,
        got: usize,
    },
    #[error("'break' is not inside a loop or switch")]
    BreakOutsideLoop,
    #[error("'continue' is not inside a loop")]
    ContinueOutsideLoop,
    #[error("'return' is not inside a function")]
    ReturnOutsideFunction,
    #[error("stack overflow (call depth exceeded {0})")]
    StackOverflow(usize),
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error("property '{0}' not found or is not writable")]
    UnwritableProperty(String),
    #[error("property '{0}' is read-only")]
    ReadOnlyProperty(String),
    #[error("host type '{0}' is not registered")]
    ImportNotFound(String),
    #[error("{0}")]
    Host(String),
    #[error("{0}")]
    Thrown(String),
    #[error("{0}")]
    RuntimeError(String),

    // Embedding errors
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ErrorKind {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::UnexpectedCharacter(_)
            | ErrorKind::UnterminatedString
            | ErrorKind::UnterminatedFString
            | ErrorKind::UnterminatedComment
            | ErrorKind::InvalidNumber(_) => ErrorCategory::Lexical,
            ErrorKind::ExpectedToken(..)
            | ErrorKind::ExpectedExpression(_)
            | ErrorKind::InvalidAssignmentTarget
            | ErrorKind::DuplicateDefault
            | ErrorKind::TryWithoutHandler
            | ErrorKind::InvalidClassMember
            | ErrorKind::InvalidFString(_)
            | ErrorKind::TooMany(_) => ErrorCategory::Syntax,
            _ => ErrorCategory::Runtime,
        }
    }
}

/// A Kestrel error with location information
#[derive(Debug, Clone)]
pub struct KestrelError {
    pub kind: ErrorKind,
    pub span: Option<Span>,
    pub source_line: Option<String>,
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl KestrelError {
    pub fn new(kind: ErrorKind, span: Option<Span>) -> Self {
        Self {
            kind,
            span,
            source_line: None,
            cause: None,
        }
    }

    /// A runtime error with a free-form message
    pub fn runtime(message: impl Into<String>, span: Option<Span>) -> Self {
        Self::new(ErrorKind::RuntimeError(message.into()), span)
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// The message without location, as exposed to `catch` blocks
    pub fn message(&self) -> String {
        self.kind.to_string()
    }

    /// Line of the error, 0 when unknown
    pub fn line(&self) -> usize {
        self.span.map_or(0, |s| s.line)
    }

    pub fn column(&self) -> Option<usize> {
        self.span.map(|s| s.column)
    }

    /// Attach a span unless a more precise one is already present
    pub fn or_span(mut self, span: Span) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        if let Some(span) = &self.span {
            let lines: Vec<&str> = source.lines().collect();
            if span.line > 0 && span.line <= lines.len() {
                self.source_line = Some(lines[span.line - 1].to_string());
            }
        }
        self
    }
}

impl PartialEq for KestrelError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.span == other.span
    }
}

impl fmt::Display for KestrelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(span) = &self.span {
            write!(
                f,
                "[line {}:{}] {} error: {}",
                span.line,
                span.column,
                self.category(),
                self.kind
            )?;

            if let Some(ref line) = self.source_line {
                write!(f, "\n  | {}", line)?;
                write!(f, "\n  | {}^", " ".repeat(span.column.saturating_sub(1)))?;
            }
        } else {
            write!(f, "{} error: {}", self.category(), self.kind)?;
        }
        if let Some(cause) = &self.cause {
            write!(f, "\n  caused by: {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for KestrelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Result type for Kestrel operations
pub type Result<T> = std::result::Result<T, KestrelError>;
