//! Module builder: S-expression trees to a [`Module`].
//!
//! Accepted input is either a single `(module $name? field*)` form or a
//! sequence of bare fields. The supported fields are `func` and `export`.
//!
//! Building runs in two passes over the fields:
//!
//! 1. **Declare**: in source order, read every function header (name,
//!    inline exports, params, results, locals), register function names and
//!    attach exports, rejecting duplicates at their second occurrence. A
//!    standalone export naming a later function is attached once every
//!    header has been read.
//! 2. **Define**: lower and flatten each body. Calls may target functions
//!    defined later.
//!
//! Type checking is left to [`super::validate`].

use super::error::WatError;
use super::module::{FunctionDecl, Local, Module, Signature, ValueType};
use super::normalize::{flatten, lower, Scope};
use super::sexpr::{SExpr, SExprList};
use super::token::{IntLit, Span, TokenKind};
use std::collections::{HashMap, HashSet};
use tracing::debug;

// ============================================================================
// Contexts
// ============================================================================

/// Module-wide name tables.
#[derive(Default)]
struct Builder {
    func_names: HashMap<String, u32>,
    export_names: HashSet<String>,
    /// Export per declared function, indexed like the functions.
    exports: Vec<Option<String>>,
}

/// A declared function whose body has not been lowered yet.
struct Header<'a> {
    decl: FunctionDecl,
    local_names: HashMap<String, u32>,
    body: &'a [SExpr],
}

/// Where in a function header we are. Declarations must appear in this
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Exports,
    Params,
    Results,
    Locals,
    Body,
}

impl Phase {
    fn describe(self) -> &'static str {
        match self {
            Phase::Exports => "export",
            Phase::Params => "param",
            Phase::Results => "result",
            Phase::Locals => "local",
            Phase::Body => "instructions",
        }
    }
}

struct FuncScope<'a> {
    locals: &'a HashMap<String, u32>,
    funcs: &'a HashMap<String, u32>,
}

impl Scope for FuncScope<'_> {
    fn local(&self, name: &str) -> Option<u32> {
        self.locals.get(name).copied()
    }

    fn func(&self, name: &str) -> Option<u32> {
        self.funcs.get(name).copied()
    }
}

// ============================================================================
// Entry Point
// ============================================================================

/// Build a module from top-level forms.
///
/// ```
/// use watlite::wat::{builder::build, sexpr::read_all};
///
/// let forms = read_all(r#"(func $id (export "id") (param $x i32) (result i32) local.get $x)"#).unwrap();
/// let module = build(&forms).unwrap();
/// assert_eq!(module.functions[0].export.as_deref(), Some("id"));
/// assert_eq!(module.functions[0].body.len(), 1);
/// ```
///
/// # Errors
///
/// [`WatError::Decl`] for misplaced, malformed or duplicate declarations
/// and unresolved names; [`WatError::Structure`] for malformed bodies.
pub fn build(forms: &[SExpr]) -> Result<Module, WatError> {
    let (name, fields) = module_fields(forms)?;
    let mut builder = Builder::default();

    let mut headers = Vec::new();
    let mut forward_exports = Vec::new();
    for field in fields {
        let list = field_list(field)?;
        match list.head_keyword() {
            Some("func") => {
                let index = headers.len() as u32;
                headers.push(builder.declare(list, index)?);
            }
            Some("export") => match builder.export_field(list, false)? {
                Some((export, func, span)) => builder.export(func, export, span)?,
                None => forward_exports.push(list),
            },
            Some(keyword) => {
                return Err(WatError::decl(format!("unsupported module field '{}'", keyword), list.span));
            }
            None => return Err(WatError::decl(format!("expected module field, found {}", field.describe()), field.span())),
        }
    }
    for list in forward_exports {
        if let Some((export, func, span)) = builder.export_field(list, true)? {
            builder.export(func, export, span)?;
        }
    }

    let signatures: Vec<Signature> = headers.iter().map(|h| h.decl.signature.clone()).collect();
    let mut functions = Vec::with_capacity(headers.len());
    let exports = std::mem::take(&mut builder.exports);

    for (index, (header, export)) in headers.into_iter().zip(exports).enumerate() {
        let scope = FuncScope {
            locals: &header.local_names,
            funcs: &builder.func_names,
        };
        let trees = lower(header.body, &scope)?;
        let mut decl = header.decl;
        decl.export = export;
        decl.body = flatten(trees, &signatures[..])?;
        debug!(
            func = %decl.describe(index),
            signature = %decl.signature,
            instructions = decl.body.len(),
            "built function"
        );
        functions.push(decl);
    }

    Ok(Module { name, functions })
}

/// Unwrap a `(module $name? ...)` form, or take bare fields as they are.
fn module_fields(forms: &[SExpr]) -> Result<(Option<String>, &[SExpr]), WatError> {
    let Some(position) = forms.iter().position(|f| f.is_list_headed_by("module")) else {
        return Ok((None, forms));
    };
    if forms.len() > 1 {
        let other = if position == 0 { &forms[1] } else { &forms[0] };
        return Err(WatError::decl("a module must be the only top-level form", other.span()));
    }
    let Some(list) = forms[position].as_list() else {
        return Ok((None, forms));
    };
    let mut idx = 1;
    let name = take_optional_name(list, &mut idx).map(str::to_string);
    Ok((name, &list.items[idx..]))
}

fn field_list(field: &SExpr) -> Result<SExprList<'_>, WatError> {
    field
        .as_list()
        .ok_or_else(|| WatError::decl(format!("expected module field, found {}", field.describe()), field.span()))
}

// ============================================================================
// Functions
// ============================================================================

impl Builder {
    /// Read a function header and register its name.
    ///
    /// Grammar: `func ::= '(' 'func' id? export* param* result* local* instr* ')'`
    fn declare<'a>(&mut self, list: SExprList<'a>, index: u32) -> Result<Header<'a>, WatError> {
        self.exports.push(None);
        let mut idx = 1;
        let name = take_optional_name(list, &mut idx);
        if let Some(name) = name {
            if self.func_names.insert(name.to_string(), index).is_some() {
                return Err(WatError::decl(format!("duplicate function ${}", name), list.items[1].span()));
            }
        }

        let mut header = Header {
            decl: FunctionDecl {
                name: name.map(str::to_string),
                export: None,
                signature: Signature::default(),
                param_names: Vec::new(),
                locals: Vec::new(),
                body: Vec::new(),
                span: list.span,
            },
            local_names: HashMap::new(),
            body: &[],
        };
        let mut phase = Phase::Exports;
        let mut body_start = None;

        for (offset, item) in list.iter_from(idx).enumerate() {
            let Some(inner) = item.as_list() else {
                body_start.get_or_insert(idx + offset);
                phase = Phase::Body;
                continue;
            };
            let next = match inner.head_keyword() {
                Some("export") => Phase::Exports,
                Some("param") => Phase::Params,
                Some("result") => Phase::Results,
                Some("local") => Phase::Locals,
                Some(keyword @ ("type" | "import")) => {
                    return Err(WatError::decl(format!("unsupported function field '{}'", keyword), inner.span));
                }
                _ => {
                    body_start.get_or_insert(idx + offset);
                    phase = Phase::Body;
                    continue;
                }
            };
            if next < phase {
                return Err(WatError::decl(
                    format!("{} declared after {}", next.describe(), phase.describe()),
                    inner.span,
                ));
            }
            phase = next;
            match next {
                Phase::Exports => self.export(index as usize, export_name(inner)?, inner.span)?,
                Phase::Params => header.params(inner)?,
                Phase::Results => {
                    for ty in inner.iter_from(1) {
                        header.decl.signature.results.push(value_type(ty)?);
                    }
                }
                Phase::Locals => header.locals(inner)?,
                Phase::Body => {}
            }
        }

        if let Some(start) = body_start {
            header.body = &list.items[start..];
        }
        Ok(header)
    }

    /// Grammar: `export ::= '(' 'export' name '(' 'func' funcidx ')' ')'`
    ///
    /// Returns the export name, function index and span. A target not
    /// declared yet gives `None` unless `complete` is set, when it is an
    /// error.
    fn export_field(&self, list: SExprList<'_>, complete: bool) -> Result<Option<(String, usize, Span)>, WatError> {
        let func_count = self.exports.len();
        let name = export_name_at(list, 1)?;
        let desc = list
            .get(2)
            .and_then(SExpr::as_list)
            .ok_or_else(|| WatError::decl("expected export descriptor '(func ...)'", list.span))?;
        match desc.head_keyword() {
            Some("func") => {}
            Some(kind) => return Err(WatError::decl(format!("unsupported export kind '{}'", kind), desc.span)),
            None => return Err(WatError::decl("expected export kind", desc.span)),
        }
        if let Some(extra) = list.get(3).or_else(|| desc.get(2)) {
            return Err(WatError::decl(format!("unexpected {} in export", extra.describe()), extra.span()));
        }
        let target = desc
            .get(1)
            .ok_or_else(|| WatError::decl("expected function index", desc.span))?;
        let index = match target.as_atom().map(|t| &t.kind) {
            Some(TokenKind::Id(id)) => match self.func_names.get(id) {
                Some(&i) => i as usize,
                None if complete => return Err(WatError::decl(format!("unknown function ${}", id), target.span())),
                None => return Ok(None),
            },
            Some(TokenKind::Integer(IntLit {
                magnitude,
                negative: false,
            })) => {
                let index = usize::try_from(*magnitude).unwrap_or(usize::MAX);
                if index >= func_count {
                    if !complete {
                        return Ok(None);
                    }
                    return Err(WatError::decl(format!("function index {} out of range", magnitude), target.span()));
                }
                index
            }
            _ => {
                return Err(WatError::decl(
                    format!("expected function index, found {}", target.describe()),
                    target.span(),
                ))
            }
        };
        Ok(Some((name, index, list.span)))
    }

    /// Attach an export. Names are unique across the module and each
    /// function has at most one.
    fn export(&mut self, func: usize, name: String, span: Span) -> Result<(), WatError> {
        if self.export_names.contains(&name) {
            return Err(WatError::decl(format!("duplicate export {:?}", name), span));
        }
        let slot = &mut self.exports[func];
        if let Some(existing) = slot {
            return Err(WatError::decl(format!("function already exported as {:?}", existing), span));
        }
        self.export_names.insert(name.clone());
        *slot = Some(name);
        Ok(())
    }
}

impl Header<'_> {
    /// Grammar: `param ::= '(' 'param' id valtype ')' | '(' 'param' valtype* ')'`
    fn params(&mut self, list: SExprList<'_>) -> Result<(), WatError> {
        for (name, ty) in named_or_anonymous(list)? {
            self.bind_local(name, list)?;
            self.decl.signature.params.push(ty);
            self.decl.param_names.push(name.map(str::to_string));
        }
        Ok(())
    }

    /// Grammar: `local ::= '(' 'local' id valtype ')' | '(' 'local' valtype* ')'`
    fn locals(&mut self, list: SExprList<'_>) -> Result<(), WatError> {
        for (name, ty) in named_or_anonymous(list)? {
            self.bind_local(name, list)?;
            self.decl.locals.push(Local {
                name: name.map(str::to_string),
                ty,
            });
        }
        Ok(())
    }

    fn bind_local(&mut self, name: Option<&str>, list: SExprList<'_>) -> Result<(), WatError> {
        let index = self.decl.local_count() as u32;
        if let Some(name) = name {
            if self.local_names.insert(name.to_string(), index).is_some() {
                let span = list.get(1).map_or(list.span, SExpr::span);
                return Err(WatError::decl(format!("duplicate local ${}", name), span));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// The `(name, type)` pairs of a `param` or `local` form.
fn named_or_anonymous<'a>(list: SExprList<'a>) -> Result<Vec<(Option<&'a str>, ValueType)>, WatError> {
    let keyword = list.head_keyword().unwrap_or("param");
    let mut idx = 1;
    match take_optional_name(list, &mut idx) {
        Some(name) => {
            let ty = list
                .get(idx)
                .ok_or_else(|| WatError::decl(format!("expected value type after ${}", name), list.span))?;
            if let Some(extra) = list.get(idx + 1) {
                return Err(WatError::decl(format!("named {} takes exactly one type", keyword), extra.span()));
            }
            Ok(vec![(Some(name), value_type(ty)?)])
        }
        None => list.iter_from(1).map(|ty| Ok((None, value_type(ty)?))).collect(),
    }
}

fn value_type(sexpr: &SExpr) -> Result<ValueType, WatError> {
    match sexpr.as_keyword() {
        Some(keyword) => ValueType::from_keyword(keyword)
            .ok_or_else(|| WatError::decl(format!("unknown value type '{}'", keyword), sexpr.span())),
        None => Err(WatError::decl(format!("expected value type, found {}", sexpr.describe()), sexpr.span())),
    }
}

/// Grammar: `'(' 'export' name ')'`
fn export_name(list: SExprList<'_>) -> Result<String, WatError> {
    let name = export_name_at(list, 1)?;
    if let Some(extra) = list.get(2) {
        return Err(WatError::decl(format!("unexpected {} in export", extra.describe()), extra.span()));
    }
    Ok(name)
}

fn export_name_at(list: SExprList<'_>, idx: usize) -> Result<String, WatError> {
    let item = list
        .get(idx)
        .ok_or_else(|| WatError::decl("expected export name", list.span))?;
    match item.as_atom().map(|t| &t.kind) {
        Some(TokenKind::String(bytes)) => String::from_utf8(bytes.clone())
            .map_err(|_| WatError::decl("export name is not valid UTF-8", item.span())),
        _ => Err(WatError::decl(format!("expected export name, found {}", item.describe()), item.span())),
    }
}

/// Consume an optional `$id` at `list[*idx]`, advancing the index if present.
fn take_optional_name<'a>(list: SExprList<'a>, idx: &mut usize) -> Option<&'a str> {
    let name = list.get(*idx).and_then(SExpr::as_id);
    if name.is_some() {
        *idx += 1;
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wat::error::ErrorKind;
    use crate::wat::module::{Immediate, Index};
    use crate::wat::opcode::Opcode;
    use crate::wat::sexpr::read_all;

    fn build_str(source: &str) -> Result<Module, WatError> {
        build(&read_all(source)?)
    }

    fn decl_error(source: &str) -> WatError {
        let err = build_str(source).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decl, "{}", err);
        err
    }

    // ------------------------------------------------------------------------
    // Headers
    // ------------------------------------------------------------------------

    #[test]
    fn named_params_and_results() {
        let module = build_str(
            r#"(func $mag (export "mag") (param $real f64) (param $imag f64) (result f64)
                 (f64.sqrt (f64.add (f64.mul (local.get $real) (local.get $real))
                                    (f64.mul (local.get $imag) (local.get $imag)))))"#,
        )
        .unwrap();
        let mag = &module.functions[0];
        assert_eq!(mag.name.as_deref(), Some("mag"));
        assert_eq!(mag.export.as_deref(), Some("mag"));
        assert_eq!(mag.signature.params, [ValueType::F64, ValueType::F64]);
        assert_eq!(mag.signature.results, [ValueType::F64]);
        assert_eq!(mag.param_names, [Some("real".to_string()), Some("imag".to_string())]);
        assert_eq!(mag.body.len(), 8);
        assert_eq!(mag.body[7].opcode, Opcode::F64Sqrt);
    }

    #[test]
    fn anonymous_params_and_multi_results() {
        let module = build_str("(func (param f64 f64) (param i32) (result f64) (result f64 i64))").unwrap();
        let sig = &module.functions[0].signature;
        assert_eq!(sig.params, [ValueType::F64, ValueType::F64, ValueType::I32]);
        assert_eq!(sig.results, [ValueType::F64, ValueType::F64, ValueType::I64]);
        assert_eq!(module.functions[0].param_names, [None, None, None]);
    }

    #[test]
    fn locals_follow_params_in_index_space() {
        let module = build_str("(func (param $x i32) (local $t f64) (local i64) local.get $t drop)").unwrap();
        let func = &module.functions[0];
        assert_eq!(func.locals.len(), 2);
        assert_eq!(func.body[0].immediate, Immediate::Local(Index::new(1, Some("t".into()))));
    }

    #[test]
    fn module_wrapper_and_name() {
        let module = build_str("(module $complex (func $a) (func $b))").unwrap();
        assert_eq!(module.name.as_deref(), Some("complex"));
        assert_eq!(module.functions.len(), 2);
        assert!(build_str("(module)").unwrap().functions.is_empty());
    }

    #[test]
    fn calls_resolve_forward() {
        let module = build_str("(func $a (result f64) call $b) (func $b (result f64) f64.const 1)").unwrap();
        assert_eq!(module.functions[0].body[0].immediate, Immediate::Func(Index::new(1, Some("b".into()))));
    }

    // ------------------------------------------------------------------------
    // Exports
    // ------------------------------------------------------------------------

    #[test]
    fn standalone_export_field() {
        let module = build_str(r#"(module (export "first" (func $f)) (func $f) (func) (export "second" (func 1)))"#).unwrap();
        assert_eq!(module.functions[0].export.as_deref(), Some("first"));
        assert_eq!(module.functions[1].export.as_deref(), Some("second"));
        assert_eq!(module.export("second").map(|f| f.name.is_none()), Some(true));
    }

    #[test]
    fn duplicate_export_cites_second() {
        let source = "(func $a (export \"same\"))\n(func $b (export \"same\"))";
        let err = decl_error(source);
        assert!(err.message().contains("duplicate export \"same\""), "{}", err);
        assert_eq!(err.span().line, 2);
    }

    #[test]
    fn second_export_on_one_function() {
        let err = decl_error(r#"(func $a (export "x") (export "y"))"#);
        assert!(err.message().contains("already exported as \"x\""), "{}", err);
    }

    #[test]
    fn errors_follow_source_order() {
        let source = "(func $a (export \"x\"))\n(func $b (export \"x\"))\n(func $c (result f64) (param f64))";
        let err = decl_error(source);
        assert!(err.message().contains("duplicate export \"x\""), "{}", err);
        assert_eq!(err.span().line, 2);

        let err = decl_error("(func $a (export \"x\"))\n(export \"x\" (func $a))\n(func (param $p i32) (local $p i32))");
        assert!(err.message().contains("duplicate export \"x\""), "{}", err);
        assert_eq!(err.span().line, 2);
    }

    #[test]
    fn forward_export_checked_after_headers() {
        let err = decl_error(r#"(export "x" (func $b)) (func $a (export "x")) (func $b)"#);
        assert!(err.message().contains("duplicate export \"x\""), "{}", err);
        assert_eq!(err.span().column, 1);
    }

    #[test]
    fn export_errors() {
        decl_error(r#"(func) (export "m" (memory 0))"#);
        decl_error(r#"(func) (export "f" (func 1))"#);
        decl_error(r#"(func) (export "f" (func $nope))"#);
        decl_error(r#"(func (export 7))"#);
        decl_error("(func (export \"\\ff\"))");
    }

    // ------------------------------------------------------------------------
    // Ordering and Names
    // ------------------------------------------------------------------------

    #[test]
    fn param_after_result() {
        let err = decl_error("(func $f (result f64) (param f64))");
        assert_eq!(err.message(), "param declared after result");
        assert_eq!(err.span().column, 23);
    }

    #[test]
    fn ordering_violations() {
        let cases = [
            ("(func (local i32) (param i32))", "param declared after local"),
            ("(func nop (param i32))", "param declared after instructions"),
            ("(func (local i32) (result i32))", "result declared after local"),
            ("(func (f64.const 1) (result f64))", "result declared after instructions"),
            ("(func nop (local i32))", "local declared after instructions"),
            ("(func (param i32) (export \"late\"))", "export declared after param"),
        ];
        for (source, message) in cases {
            assert_eq!(decl_error(source).message(), message, "{}", source);
        }
    }

    #[test]
    fn duplicate_names() {
        let err = decl_error("(func $f) (func $f)");
        assert!(err.message().contains("duplicate function $f"));
        assert_eq!(err.span().column, 17);

        let err = decl_error("(func (param $x i32) (local $x f64))");
        assert!(err.message().contains("duplicate local $x"));
    }

    #[test]
    fn type_errors_in_declarations() {
        assert!(decl_error("(func (param v128))").message().contains("unknown value type 'v128'"));
        assert!(decl_error("(func (result $x))").message().contains("expected value type"));
        assert!(decl_error("(func (param $x))").message().contains("expected value type after $x"));
        assert!(decl_error("(func (param $x i32 i32))").message().contains("exactly one type"));
    }

    #[test]
    fn unresolved_references() {
        assert!(decl_error("(func local.get $nope)").message().contains("unknown local $nope"));
        assert!(decl_error("(func call $nope)").message().contains("unknown function $nope"));
    }

    #[test]
    fn unsupported_fields() {
        assert!(decl_error("(module (memory 1))").message().contains("unsupported module field 'memory'"));
        assert!(decl_error("(func (type 0))").message().contains("unsupported function field 'type'"));
        decl_error("(module) (func)");
        decl_error("func");
    }

    #[test]
    fn structure_errors_pass_through() {
        let err = build_str("(func (block))").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structure);
    }
}
