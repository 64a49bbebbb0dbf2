//! Token types for the WAT lexer.
//!
//! Tokens are immutable once produced. Each one carries the [`Span`] it was
//! read from so every later phase can report errors against source text.

use fhex::FromHex;
use std::fmt;

/// A location in source text.
///
/// Byte offsets are kept for slicing, line/column for humans. Columns count
/// characters, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    /// Byte offset where this span starts.
    pub start: usize,
    /// Byte offset just past the end of this span.
    pub end: usize,
    /// Line number (1-indexed).
    pub line: u32,
    /// Column number (1-indexed).
    pub column: u32,
}

impl Span {
    /// A zero-length span at the start of source.
    pub const ZERO: Span = Span {
        start: 0,
        end: 0,
        line: 1,
        column: 1,
    };

    pub fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// Extend this span so it ends where `other` ends.
    #[must_use]
    pub fn to(self, other: Span) -> Span {
        Span {
            end: other.end.max(self.end),
            ..self
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A lexical token with its location in source.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// The raw source text this token was read from.
    ///
    /// ```
    /// use watlite::wat::Lexer;
    ///
    /// let source = "(func $mag)";
    /// let tokens = Lexer::tokenise(source).unwrap();
    /// assert_eq!(tokens[2].text(source), "$mag");
    /// ```
    #[must_use]
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.start..self.span.end]
    }
}

/// What a token is, with its decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// `(`
    LeftParen,

    /// `)`
    RightParen,

    /// A bare word such as `func`, `param`, `f64.sqrt` or `local.get`.
    Keyword(String),

    /// An identifier such as `$real`. The leading `$` is not stored.
    Id(String),

    /// A string literal with escapes resolved. WAT strings may hold
    /// arbitrary bytes, so this is not a `String`.
    String(Vec<u8>),

    /// An integer literal.
    Integer(IntLit),

    /// A floating-point literal.
    Float(FloatLit),
}

impl TokenKind {
    /// Short description used in "expected X, found Y" messages.
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::LeftParen => "'('",
            TokenKind::RightParen => "')'",
            TokenKind::Keyword(_) => "keyword",
            TokenKind::Id(_) => "identifier",
            TokenKind::String(_) => "string",
            TokenKind::Integer(_) => "integer",
            TokenKind::Float(_) => "float",
        }
    }
}

/// An integer literal as written: magnitude plus sign.
///
/// Keeping the sign apart lets one literal cover the whole `u64` range as
/// well as `i64::MIN`, which is what `i64.const` accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntLit {
    pub magnitude: u64,
    pub negative: bool,
}

impl IntLit {
    pub fn new(magnitude: u64, negative: bool) -> Self {
        Self { magnitude, negative }
    }

    /// Interpret as a 32-bit pattern. Accepts `i32` and `u32` ranges.
    #[must_use]
    pub fn to_i32_bits(self) -> Option<i32> {
        if self.negative {
            if self.magnitude <= 1 << 31 {
                Some((self.magnitude as i64).wrapping_neg() as i32)
            } else {
                None
            }
        } else {
            u32::try_from(self.magnitude).ok().map(|v| v as i32)
        }
    }

    /// Interpret as a 64-bit pattern. Accepts `i64` and `u64` ranges.
    #[must_use]
    pub fn to_i64_bits(self) -> Option<i64> {
        if self.negative {
            if self.magnitude <= 1 << 63 {
                Some((self.magnitude as i64).wrapping_neg())
            } else {
                None
            }
        } else {
            Some(self.magnitude as i64)
        }
    }

    #[must_use]
    pub fn to_f64(self) -> f64 {
        let v = self.magnitude as f64;
        if self.negative {
            -v
        } else {
            v
        }
    }
}

/// A floating-point literal.
///
/// Decimal and hex forms keep their digits so `f32` and `f64` can each round
/// once from source rather than twice through an intermediate `f64`.
#[derive(Debug, Clone, PartialEq)]
pub enum FloatLit {
    Decimal { negative: bool, digits: String },
    Hex { negative: bool, digits: String },
    Inf { negative: bool },
    Nan { negative: bool, payload: Option<u64> },
}

impl FloatLit {
    /// The `f64` this literal denotes, or `None` if a NaN payload does not
    /// fit the 52-bit mantissa.
    #[must_use]
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            FloatLit::Decimal { negative, digits } => Some(apply_sign(digits.parse().unwrap_or(f64::NAN), *negative)),
            FloatLit::Hex { negative, digits } => Some(apply_sign(f64::from_hex(digits).unwrap_or(f64::NAN), *negative)),
            FloatLit::Inf { negative } => Some(apply_sign(f64::INFINITY, *negative)),
            FloatLit::Nan { negative, payload } => {
                let payload = payload.unwrap_or(0x8_0000_0000_0000);
                if payload > 0xF_FFFF_FFFF_FFFF {
                    return None;
                }
                Some(apply_sign(f64::from_bits(0x7FF0_0000_0000_0000 | payload), *negative))
            }
        }
    }

    /// The `f32` this literal denotes, or `None` if a NaN payload does not
    /// fit the 23-bit mantissa.
    #[must_use]
    pub fn to_f32(&self) -> Option<f32> {
        match self {
            FloatLit::Decimal { negative, digits } => Some(apply_sign(digits.parse().unwrap_or(f32::NAN), *negative)),
            FloatLit::Hex { negative, digits } => Some(apply_sign(f32::from_hex(digits).unwrap_or(f32::NAN), *negative)),
            FloatLit::Inf { negative } => Some(apply_sign(f32::INFINITY, *negative)),
            FloatLit::Nan { negative, payload } => {
                let payload = u32::try_from(payload.unwrap_or(0x40_0000)).ok().filter(|&p| p <= 0x7F_FFFF)?;
                Some(apply_sign(f32::from_bits(0x7F80_0000 | payload), *negative))
            }
        }
    }
}

fn apply_sign<T: std::ops::Neg<Output = T>>(v: T, negative: bool) -> T {
    if negative {
        -v
    } else {
        v
    }
}

impl fmt::Display for FloatLit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (negative, body) = match self {
            FloatLit::Decimal { negative, digits } | FloatLit::Hex { negative, digits } => (*negative, digits.clone()),
            FloatLit::Inf { negative } => (*negative, "inf".to_string()),
            FloatLit::Nan { negative, payload: None } => (*negative, "nan".to_string()),
            FloatLit::Nan {
                negative,
                payload: Some(p),
            } => (*negative, format!("nan:0x{:x}", p)),
        };
        if negative {
            write!(f, "-{}", body)
        } else {
            write!(f, "{}", body)
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::LeftParen => write!(f, "("),
            TokenKind::RightParen => write!(f, ")"),
            TokenKind::Keyword(s) => write!(f, "{}", s),
            TokenKind::Id(s) => write!(f, "${}", s),
            TokenKind::String(bytes) => write_wat_string(f, bytes),
            TokenKind::Integer(lit) => {
                if lit.negative {
                    write!(f, "-{}", lit.magnitude)
                } else {
                    write!(f, "{}", lit.magnitude)
                }
            }
            TokenKind::Float(lit) => write!(f, "{}", lit),
        }
    }
}

/// Write bytes as a quoted WAT string, escaping anything unprintable.
pub(crate) fn write_wat_string(f: &mut impl fmt::Write, bytes: &[u8]) -> fmt::Result {
    f.write_char('"')?;
    for &b in bytes {
        match b {
            b'"' => f.write_str("\\\"")?,
            b'\\' => f.write_str("\\\\")?,
            b if b.is_ascii_graphic() || b == b' ' => f.write_char(b as char)?,
            b => write!(f, "\\{:02x}", b)?,
        }
    }
    f.write_char('"')
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.span)
    }
}
