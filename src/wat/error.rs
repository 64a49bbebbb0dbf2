//! Error types for WAT parsing and validation.
//!
//! Every phase fails fast with a single [`WatError`]. The variant says which
//! phase rejected the input; all of them carry a [`Span`].

use super::token::Span;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// An error encountered during lexical analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

impl LexError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.span, self.message)
    }
}

impl std::error::Error for LexError {}

/// Which phase produced a [`WatError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Lex,
    Parse,
    Structure,
    Decl,
    Type,
    Arity,
}

/// Any failure while turning WAT text into a validated module.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatError {
    /// Malformed token: bad literal, unterminated string or comment.
    #[error("{span}: lex error: {message}")]
    Lex { message: String, span: Span },

    /// Unbalanced parentheses or unexpected end of input.
    #[error("{span}: parse error: {message}")]
    Parse { message: String, span: Span },

    /// Malformed instruction: unknown opcode, bad immediate, or a folded
    /// operator whose operand count disagrees with its arity.
    #[error("{span}: structure error: {message}")]
    Structure { message: String, span: Span },

    /// Malformed, misplaced or duplicate declaration, or an unresolved name.
    #[error("{span}: declaration error: {message}")]
    Decl { message: String, span: Span },

    /// Operand missing or of the wrong type.
    #[error("{span}: type error in {func} at instruction {index}: {message}")]
    Type {
        func: String,
        index: usize,
        message: String,
        span: Span,
    },

    /// Values left on the stack at function exit disagree with the results.
    #[error("{span}: arity error in {func} at instruction {index}: {message}")]
    Arity {
        func: String,
        index: usize,
        message: String,
        span: Span,
    },
}

impl WatError {
    pub fn parse(message: impl Into<String>, span: Span) -> Self {
        WatError::Parse {
            message: message.into(),
            span,
        }
    }

    pub fn structure(message: impl Into<String>, span: Span) -> Self {
        WatError::Structure {
            message: message.into(),
            span,
        }
    }

    pub fn decl(message: impl Into<String>, span: Span) -> Self {
        WatError::Decl {
            message: message.into(),
            span,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WatError::Lex { .. } => ErrorKind::Lex,
            WatError::Parse { .. } => ErrorKind::Parse,
            WatError::Structure { .. } => ErrorKind::Structure,
            WatError::Decl { .. } => ErrorKind::Decl,
            WatError::Type { .. } => ErrorKind::Type,
            WatError::Arity { .. } => ErrorKind::Arity,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            WatError::Lex { span, .. }
            | WatError::Parse { span, .. }
            | WatError::Structure { span, .. }
            | WatError::Decl { span, .. }
            | WatError::Type { span, .. }
            | WatError::Arity { span, .. } => *span,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            WatError::Lex { message, .. }
            | WatError::Parse { message, .. }
            | WatError::Structure { message, .. }
            | WatError::Decl { message, .. }
            | WatError::Type { message, .. }
            | WatError::Arity { message, .. } => message,
        }
    }
}

impl From<LexError> for WatError {
    fn from(e: LexError) -> Self {
        WatError::Lex {
            message: e.message,
            span: e.span,
        }
    }
}

/// A [`WatError`] tagged with the logical name of the source it came from.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{origin}:{error}")]
pub struct NamedError {
    pub origin: String,
    #[source]
    pub error: WatError,
}
