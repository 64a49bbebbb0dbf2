//! A WebAssembly Text Format (WAT) parser and validator.
//!
//! watlite reads function definitions written in either the folded
//! S-expression form or the flat stack-machine form, normalizes bodies to a
//! single flat form, and checks every function against its signature by
//! simulating the value stack. The result is a typed [`wat::Module`] ready for
//! a compiler or interpreter to consume.
//!
//! # Modules
//!
//! - [`wat`] -- Lexer, S-expression reader, normalizer, module builder,
//!   validator and printer.
//!
//! # Example
//!
//! ```
//! use watlite::wat;
//!
//! let module = wat::parse(r#"
//!     (module
//!         (func $conj (export "conj") (param $a f64) (param $b f64) (result f64 f64)
//!             local.get $a
//!             (f64.neg (local.get $b))))
//! "#).unwrap();
//!
//! let conj = module.function("conj").unwrap();
//! assert_eq!(conj.signature.results.len(), 2);
//! assert_eq!(conj.body.len(), 3);
//! ```
//!
//! # Scope
//!
//! Numeric instructions over `i32`, `i64`, `f32` and `f64`, locals, calls,
//! `drop` and `select`. Control flow, memory, tables, SIMD and reference
//! types are not supported.

pub mod wat;
