//! WebAssembly Text Format (WAT) parsing and validation.
//!
//! The pipeline, leaves first:
//!
//! 1. [`lexer`]: text to [`Token`]s.
//! 2. [`sexpr`]: tokens to parenthesised trees.
//! 3. [`builder`]: trees to a [`Module`], with bodies lowered and flattened
//!    by [`normalize`].
//! 4. [`validate`]: type-stack simulation of every body.
//!
//! [`parse`] runs all of them and fails on the first error.
//!
//! # Example
//!
//! ```
//! use watlite::wat::{self, ValueType};
//!
//! let module = wat::parse(r#"
//!     (func $mag (export "mag") (param $real f64) (param $imag f64) (result f64)
//!       (f64.sqrt (f64.add (f64.mul (local.get $real) (local.get $real))
//!                          (f64.mul (local.get $imag) (local.get $imag)))))
//! "#).unwrap();
//!
//! let mag = module.export("mag").unwrap();
//! assert_eq!(mag.signature.params, [ValueType::F64, ValueType::F64]);
//! assert_eq!(mag.signature.results, [ValueType::F64]);
//! ```
//!
//! # Error Handling
//!
//! Every phase reports a [`WatError`] whose [`kind`](WatError::kind) names
//! the phase and whose span points into the source:
//!
//! ```
//! use watlite::wat::{self, ErrorKind};
//!
//! let err = wat::parse("(func $f (param $x i32)").unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::Parse);
//! assert_eq!(err.to_string(), "1:24: parse error: unexpected end of input: unclosed '(' opened at 1:1");
//! ```

pub mod builder;
mod cursor;
mod error;
pub mod lexer;
pub mod module;
pub mod normalize;
pub mod opcode;
mod print;
pub mod sexpr;
mod token;
pub mod validate;

pub use error::{ErrorKind, LexError, NamedError, WatError};
pub use lexer::Lexer;
pub use module::{FunctionDecl, Immediate, Index, Instruction, Local, Module, Signature, Value, ValueType};
pub use opcode::Opcode;
pub use print::Folded;
pub use token::{FloatLit, IntLit, Span, Token, TokenKind};
pub use validate::{ValidationState, Validator};

use tracing::{debug, instrument};

/// Parse and validate a module.
///
/// Accepts a `(module ...)` form or bare `func`/`export` fields.
///
/// # Errors
///
/// The first [`WatError`] any phase reports.
pub fn parse(source: &str) -> Result<Module, WatError> {
    let forms = sexpr::read_all(source)?;
    let module = builder::build(&forms)?;
    drop(forms);
    validate::validate(&module)?;
    Ok(module)
}

/// [`parse`], tagging errors with `origin` (usually a file name).
///
/// ```
/// let err = watlite::wat::parse_named("complex.wat", "(func (result f64) (param f64))").unwrap_err();
/// assert!(err.to_string().starts_with("complex.wat:1:20: declaration error"));
/// ```
///
/// # Errors
///
/// A [`NamedError`] wrapping the first [`WatError`].
#[instrument(level = "debug", skip(source), fields(bytes = source.len()))]
pub fn parse_named(origin: &str, source: &str) -> Result<Module, NamedError> {
    let module = parse(source).map_err(|error| NamedError {
        origin: origin.to_string(),
        error,
    })?;
    debug!(functions = module.functions.len(), "parsed module");
    Ok(module)
}
