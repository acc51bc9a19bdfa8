use std::{
    borrow::Cow,
    fmt::{self, Display},
};

use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumString, IntoStaticStr};

use crate::ast::ExprId;

/// A resolved `line:column` position within the source expression.
///
/// Both fields are 1-based. Produced from byte offsets via the line-start
/// table in [`crate::ast::SourceInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Errors produced while lexing/parsing an expression or expanding macros.
///
/// Parse errors are unrecoverable at the expression level, but the parser
/// records them and substitutes `Expr::Unspecified` nodes so that several
/// problems can be reported from a single pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseError {
    /// Malformed surface syntax (bad token, unbalanced delimiter, bad escape).
    Syntax {
        msg: Cow<'static, str>,
        /// Byte offset into the source where the problem starts.
        offset: u32,
    },
    /// A macro matched the call site but rejected its arguments.
    Macro {
        msg: Cow<'static, str>,
        offset: u32,
    },
    /// Surface form the engine recognises but does not support
    /// (e.g. `?.` optional field selection).
    Unsupported {
        msg: Cow<'static, str>,
        offset: u32,
    },
}

impl ParseError {
    pub fn offset(&self) -> u32 {
        match self {
            Self::Syntax { offset, .. } | Self::Macro { offset, .. } | Self::Unsupported { offset, .. } => *offset,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Syntax { msg, .. } | Self::Macro { msg, .. } | Self::Unsupported { msg, .. } => msg,
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax { msg, .. } => write!(f, "{msg}"),
            Self::Macro { msg, .. } => write!(f, "{msg}"),
            Self::Unsupported { msg, .. } => write!(f, "unsupported syntax: {msg}"),
        }
    }
}

/// A type-checker diagnostic, anchored to the offending AST node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckError {
    pub message: String,
    pub expr_id: ExprId,
}

impl CheckError {
    pub fn new(message: impl Into<String>, expr_id: ExprId) -> Self {
        Self {
            message: message.into(),
            expr_id,
        }
    }
}

impl Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Classification of runtime failures.
///
/// The kind is part of the error value so hosts can branch on failure class
/// without parsing messages. `Display` yields the canonical lowercase token
/// used in formatted messages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
pub enum RuntimeErrorKind {
    #[strum(serialize = "type mismatch")]
    TypeMismatch,
    #[strum(serialize = "no such key")]
    NoSuchKey,
    #[strum(serialize = "no such field")]
    NoSuchField,
    #[strum(serialize = "invalid argument")]
    InvalidArgument,
    #[strum(serialize = "divide by zero")]
    DivideByZero,
    #[strum(serialize = "integer overflow")]
    IntegerOverflow,
    #[strum(serialize = "range error")]
    RangeError,
    #[strum(serialize = "unsupported key type")]
    UnsupportedKeyType,
    #[strum(serialize = "invalid regex")]
    InvalidRegex,
    #[strum(serialize = "conversion error")]
    ConversionError,
    #[strum(serialize = "no matching overload")]
    NoMatchingOverload,
    #[strum(serialize = "no such attribute")]
    NoSuchAttribute,
}

/// A runtime failure carried as a first-class value.
///
/// Errors propagate bottom-up through strict operators and are absorbed by
/// the short-circuiting logical operators when the surviving branch produces
/// a definite truth value. The originating node id, when known, lets the
/// program formatter prefix the message with `line:column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub message: String,
    pub expr_id: Option<ExprId>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            expr_id: None,
        }
    }

    /// Attaches the originating expression id if none is recorded yet.
    ///
    /// The innermost node wins: once an error carries an id, enclosing
    /// operators must not overwrite it.
    #[must_use]
    pub fn or_at(mut self, expr_id: ExprId) -> Self {
        if self.expr_id.is_none() {
            self.expr_id = Some(expr_id);
        }
        self
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::TypeMismatch, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::InvalidArgument, message)
    }

    pub fn conversion(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::ConversionError, message)
    }

    pub fn overflow() -> Self {
        Self::new(RuntimeErrorKind::IntegerOverflow, "integer overflow")
    }

    pub fn divide_by_zero() -> Self {
        Self::new(RuntimeErrorKind::DivideByZero, "divide by zero")
    }

    pub fn modulus_by_zero() -> Self {
        Self::new(RuntimeErrorKind::DivideByZero, "modulus by zero")
    }

    pub fn no_such_key(key: impl Display) -> Self {
        Self::new(RuntimeErrorKind::NoSuchKey, format!("no such key: {key}"))
    }

    pub fn no_such_field(field: impl Display) -> Self {
        Self::new(RuntimeErrorKind::NoSuchField, format!("no such field: {field}"))
    }

    pub fn no_such_overload(signature: impl Display) -> Self {
        Self::new(
            RuntimeErrorKind::NoMatchingOverload,
            format!("no such overload: {signature}"),
        )
    }
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
