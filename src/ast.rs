//! Abstract Syntax Tree definitions for Kestrel
//!
//! Represents the structure of programs after parsing. A parsed tree is
//! immutable; function and class declarations are reference counted so
//! closures and classes can share them across interpreter instances.

use crate::token::Span;
use std::fmt;
use std::sync::Arc;

/// Expression nodes
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Number literal: 42, 3.14
    Number { value: f64, span: Span },

    /// Single precision literal: 2.5f
    Float { value: f32, span: Span },

    /// String literal: "hello"
    String { value: String, span: Span },

    /// Boolean literal: true, false
    Bool { value: bool, span: Span },

    /// Null literal
    Null { span: Span },

    /// Variable reference: foo
    Variable { name: String, span: Span },

    /// The current receiver
    This { span: Span },

    /// Binary operation: a + b, x * y
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
        span: Span,
    },

    /// Logical and/or: a && b, x || y
    Logical {
        left: Box<Expr>,
        op: LogicalOp,
        right: Box<Expr>,
        span: Span,
    },

    /// Unary operation: -x, !y
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },

    /// Function call: foo(a, b)
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },

    /// Anonymous function: fun (a, b) { ... } or fun (a) -> a * 2
    Lambda { decl: Arc<FunctionDecl>, span: Span },

    /// Property access: obj.prop
    Get {
        object: Box<Expr>,
        name: String,
        span: Span,
    },

    /// Property assignment: obj.prop = value, obj.prop += value
    Set {
        object: Box<Expr>,
        name: String,
        op: AssignOp,
        value: Box<Expr>,
        span: Span,
    },

    /// Index access: list[i], map["key"]
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },

    /// Index assignment: list[i] = value
    IndexSet {
        object: Box<Expr>,
        index: Box<Expr>,
        op: AssignOp,
        value: Box<Expr>,
        span: Span,
    },

    /// List literal: [1, 2, 3]
    List { elements: Vec<Expr>, span: Span },

    /// Map literal: {name: "x", "key": 1}
    Map {
        entries: Vec<(String, Expr)>,
        span: Span,
    },

    /// Interpolated string: f"sum = {a + b}"
    Interpolated { parts: Vec<FStringPart>, span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Number { span, .. }
            | Expr::Float { span, .. }
            | Expr::String { span, .. }
            | Expr::Bool { span, .. }
            | Expr::Null { span }
            | Expr::Variable { span, .. }
            | Expr::This { span }
            | Expr::Binary { span, .. }
            | Expr::Logical { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Call { span, .. }
            | Expr::Lambda { span, .. }
            | Expr::Get { span, .. }
            | Expr::Set { span, .. }
            | Expr::Index { span, .. }
            | Expr::IndexSet { span, .. }
            | Expr::List { span, .. }
            | Expr::Map { span, .. }
            | Expr::Interpolated { span, .. } => *span,
        }
    }

    /// Whether this node is a literal constant
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Expr::Number { .. }
                | Expr::Float { .. }
                | Expr::String { .. }
                | Expr::Bool { .. }
                | Expr::Null { .. }
        )
    }
}

/// One piece of an interpolated string
#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    Literal(String),
    Expr(Expr),
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add, // +
    Sub, // -
    Mul, // *
    Div, // /
    Mod, // %
    Eq,  // ==
    Ne,  // !=
    Lt,  // <
    Le,  // <=
    Gt,  // >
    Ge,  // >=
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Sub => write!(f, "-"),
            BinaryOp::Mul => write!(f, "*"),
            BinaryOp::Div => write!(f, "/"),
            BinaryOp::Mod => write!(f, "%"),
            BinaryOp::Eq => write!(f, "=="),
            BinaryOp::Ne => write!(f, "!="),
            BinaryOp::Lt => write!(f, "<"),
            BinaryOp::Le => write!(f, "<="),
            BinaryOp::Gt => write!(f, ">"),
            BinaryOp::Ge => write!(f, ">="),
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Neg, // -
    Not, // !
}

/// Logical operators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Plain and compound assignment operators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AssignOp {
    Assign, // =
    Add,    // +=
    Sub,    // -=
    Mul,    // *=
    Div,    // /=
    Mod,    // %=
}

impl AssignOp {
    /// The binary operator a compound assignment applies, if any
    pub fn binary(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
            AssignOp::Mod => Some(BinaryOp::Mod),
        }
    }
}

impl fmt::Display for AssignOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.binary() {
            Some(op) => write!(f, "{}=", op),
            None => write!(f, "="),
        }
    }
}

/// A named or anonymous function
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

impl FunctionDecl {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<lambda>")
    }
}

/// A class declaration. Superclass resolution is deferred to evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub superclass: Option<(String, Span)>,
    pub methods: Vec<Arc<FunctionDecl>>,
    pub static_block: Option<Vec<Stmt>>,
    pub span: Span,
}

/// One `case`/`default` clause. `values` is `None` for `default`.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub values: Option<Vec<Expr>>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// Statement nodes
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Expression statement
    Expr { expr: Expr },

    /// Binding: var x = expr, val y = expr
    Var {
        name: String,
        initializer: Option<Expr>,
        constant: bool,
        span: Span,
    },

    /// Assignment to a variable: x = expr, x += expr
    Assign {
        name: String,
        op: AssignOp,
        value: Expr,
        span: Span,
    },

    /// Block: { stmt* }
    Block { stmts: Vec<Stmt>, span: Span },

    /// If statement: if (cond) stmt else stmt
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
        span: Span,
    },

    /// While loop: while (cond) stmt
    While {
        condition: Expr,
        body: Box<Stmt>,
        span: Span,
    },

    /// For loop: for (x in iterable) stmt
    ForIn {
        var: String,
        iterable: Expr,
        body: Box<Stmt>,
        span: Span,
    },

    /// Switch with fallthrough: switch (x) { case 1, 2: ... default: ... }
    Switch {
        subject: Expr,
        cases: Vec<SwitchCase>,
        span: Span,
    },

    /// Function definition: fun name(params) { }
    Function { decl: Arc<FunctionDecl> },

    /// Return statement
    Return { value: Option<Expr>, span: Span },

    /// Break statement
    Break { span: Span },

    /// Continue statement
    Continue { span: Span },

    /// Class definition
    Class { decl: Arc<ClassDecl> },

    /// Host type import: import gfx.Widget
    Import { path: Vec<String>, span: Span },

    /// try { } catch (e) { } finally { }
    Try {
        body: Vec<Stmt>,
        catch: Option<(String, Vec<Stmt>)>,
        finally: Option<Vec<Stmt>>,
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Expr { expr } => expr.span(),
            Stmt::Function { decl } => decl.span,
            Stmt::Class { decl } => decl.span,
            Stmt::Var { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::Block { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::ForIn { span, .. }
            | Stmt::Switch { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Break { span }
            | Stmt::Continue { span }
            | Stmt::Import { span, .. }
            | Stmt::Try { span, .. } => *span,
        }
    }
}

/// A complete program
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }
}

/// Format a number the way source code writes it: integral values drop `.0`
pub fn format_number(n: f64) -> String {
    if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn quote(s: &str) -> String {
    if s.contains('"') {
        format!("'{}'", s)
    } else {
        format!("\"{}\"", s)
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

/// Source-like rendering. Parsing the output of a literal yields the same literal.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number { value, .. } => write!(f, "{}", format_number(*value)),
            Expr::Float { value, .. } => write!(f, "{}f", value),
            Expr::String { value, .. } => write!(f, "{}", quote(value)),
            Expr::Bool { value, .. } => write!(f, "{}", value),
            Expr::Null { .. } => write!(f, "null"),
            Expr::Variable { name, .. } => write!(f, "{}", name),
            Expr::This { .. } => write!(f, "this"),
            Expr::Binary { left, op, right, .. } => write!(f, "({} {} {})", left, op, right),
            Expr::Logical { left, op, right, .. } => {
                let op = match op {
                    LogicalOp::And => "&&",
                    LogicalOp::Or => "||",
                };
                write!(f, "({} {} {})", left, op, right)
            }
            Expr::Unary { op, operand, .. } => match op {
                UnaryOp::Neg => write!(f, "-{}", operand),
                UnaryOp::Not => write!(f, "!{}", operand),
            },
            Expr::Call { callee, args, .. } => {
                write!(f, "{}(", callee)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Expr::Lambda { decl, .. } => {
                write!(f, "fun (")?;
                write_list(f, &decl.params)?;
                write!(f, ") {{ ... }}")
            }
            Expr::Get { object, name, .. } => write!(f, "{}.{}", object, name),
            Expr::Set { object, name, op, value, .. } => {
                write!(f, "{}.{} {} {}", object, name, op, value)
            }
            Expr::Index { object, index, .. } => write!(f, "{}[{}]", object, index),
            Expr::IndexSet { object, index, op, value, .. } => {
                write!(f, "{}[{}] {} {}", object, index, op, value)
            }
            Expr::List { elements, .. } => {
                write!(f, "[")?;
                write_list(f, elements)?;
                write!(f, "]")
            }
            Expr::Map { entries, .. } => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", quote(key), value)?;
                }
                write!(f, "}}")
            }
            Expr::Interpolated { parts, .. } => {
                write!(f, "f\"")?;
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => write!(f, "{}", text)?,
                        FStringPart::Expr(expr) => write!(f, "{{{}}}", expr)?,
                    }
                }
                write!(f, "\"")
            }
        }
    }
}
