//! Instruction normalization.
//!
//! Function bodies may be written flat (stack order) or folded
//! (`(f64.add (local.get 0) (local.get 1))`), freely mixed. Three steps move
//! between the forms:
//!
//! - [`lower`] turns body S-expressions into [`Instruction`] trees, reading
//!   immediates and resolving `$names`.
//! - [`flatten`] turns trees into the canonical flat sequence by post-order
//!   traversal, children left to right and operator last. Already-flat
//!   input comes back unchanged.
//! - [`fold`] goes the other way for display: `flatten(fold(x)) == x`.
//!
//! All three use explicit stacks, so nesting depth is limited by memory.

use super::error::WatError;
use super::module::{Immediate, Index, Instruction, Module, Signature, Value, ValueType};
use super::opcode::{ImmediateKind, Opcode};
use super::sexpr::SExpr;
use super::token::{IntLit, Span, Token, TokenKind};

// ============================================================================
// Stack Effects
// ============================================================================

/// Pop/push counts of instructions, given the callable functions.
pub trait StackEffect {
    /// Signature of function `index`, if it exists.
    fn callee(&self, index: u32) -> Option<&Signature>;

    /// Values popped, or `None` for a call to an unknown function.
    fn pops(&self, instr: &Instruction) -> Option<usize> {
        instr
            .opcode
            .shape()
            .fixed_pops()
            .or_else(|| self.call_target(instr).map(|sig| sig.params.len()))
    }

    /// Values pushed, or `None` for a call to an unknown function.
    fn pushes(&self, instr: &Instruction) -> Option<usize> {
        instr
            .opcode
            .shape()
            .fixed_pushes()
            .or_else(|| self.call_target(instr).map(|sig| sig.results.len()))
    }

    fn call_target(&self, instr: &Instruction) -> Option<&Signature> {
        match &instr.immediate {
            Immediate::Func(func) => self.callee(func.index),
            _ => None,
        }
    }
}

impl StackEffect for [Signature] {
    fn callee(&self, index: u32) -> Option<&Signature> {
        self.get(index as usize)
    }
}

impl StackEffect for Module {
    fn callee(&self, index: u32) -> Option<&Signature> {
        self.functions.get(index as usize).map(|f| &f.signature)
    }
}

// ============================================================================
// Lowering
// ============================================================================

/// Name lookup for the immediates of `local.*` and `call`.
pub trait Scope {
    /// Index of the param or local named `$name`.
    fn local(&self, name: &str) -> Option<u32>;

    /// Index of the function named `$name`.
    fn func(&self, name: &str) -> Option<u32>;
}

/// A folded instruction whose operand lists are still being read.
struct Frame<'a> {
    instr: Instruction,
    rest: std::slice::Iter<'a, SExpr>,
    operands: Vec<Instruction>,
}

/// Lower body items to instruction trees.
///
/// # Errors
///
/// [`WatError::Structure`] for unknown instructions, missing or malformed
/// immediates, and atoms among folded operands. [`WatError::Decl`] for a
/// `$name` that does not resolve.
pub fn lower(items: &[SExpr], scope: &impl Scope) -> Result<Vec<Instruction>, WatError> {
    let mut out = Vec::new();
    let mut items = items.iter();

    while let Some(item) = items.next() {
        let Some(list) = item.as_list() else {
            out.push(start_instruction(item, &mut items, scope)?);
            continue;
        };

        let mut rest = list.items.iter();
        let head = rest.next().ok_or_else(|| WatError::structure("expected instruction, found empty list", list.span))?;
        let mut instr = start_instruction(head, &mut rest, scope)?;
        instr.span = list.span;
        let mut stack = vec![Frame {
            instr,
            rest,
            operands: Vec::new(),
        }];

        while let Some(frame) = stack.last_mut() {
            match frame.rest.next() {
                Some(child) => {
                    let Some(child_list) = child.as_list() else {
                        return Err(WatError::structure(
                            format!("expected folded operand of {}, found {}", frame.instr.opcode, child.describe()),
                            child.span(),
                        ));
                    };
                    let mut rest = child_list.items.iter();
                    let head = rest
                        .next()
                        .ok_or_else(|| WatError::structure("expected instruction, found empty list", child_list.span))?;
                    let mut instr = start_instruction(head, &mut rest, scope)?;
                    instr.span = child_list.span;
                    stack.push(Frame {
                        instr,
                        rest,
                        operands: Vec::new(),
                    });
                }
                None => {
                    let Some(Frame {
                        mut instr, operands, ..
                    }) = stack.pop()
                    else {
                        break;
                    };
                    instr.operands = operands;
                    match stack.last_mut() {
                        Some(parent) => parent.operands.push(instr),
                        None => out.push(instr),
                    }
                }
            }
        }
    }

    Ok(out)
}

/// Read an instruction keyword and its immediates.
fn start_instruction<'a>(
    head: &SExpr,
    rest: &mut std::slice::Iter<'a, SExpr>,
    scope: &impl Scope,
) -> Result<Instruction, WatError> {
    let Some(keyword) = head.as_keyword() else {
        return Err(WatError::structure(format!("expected instruction, found {}", head.describe()), head.span()));
    };
    let opcode = Opcode::from_name(keyword)
        .ok_or_else(|| WatError::structure(format!("unknown instruction '{}'", keyword), head.span()))?;

    let immediate = match opcode.immediate() {
        ImmediateKind::None => Immediate::None,
        ImmediateKind::Value(ty) => {
            let atom = next_atom(rest, opcode, head.span(), "literal")?;
            Immediate::Value(constant(ty, &atom.kind, atom.span)?)
        }
        ImmediateKind::Local => {
            let atom = next_atom(rest, opcode, head.span(), "local index")?;
            Immediate::Local(index(&atom.kind, atom.span, "local", |name| scope.local(name))?)
        }
        ImmediateKind::Func => {
            let atom = next_atom(rest, opcode, head.span(), "function index")?;
            Immediate::Func(index(&atom.kind, atom.span, "function", |name| scope.func(name))?)
        }
    };

    Ok(Instruction::new(opcode, immediate, head.span()))
}

fn next_atom<'a>(
    rest: &mut std::slice::Iter<'a, SExpr>,
    opcode: Opcode,
    span: Span,
    what: &str,
) -> Result<&'a Token, WatError> {
    match rest.as_slice().first().and_then(SExpr::as_atom) {
        Some(token) => {
            rest.next();
            Ok(token)
        }
        None => Err(WatError::structure(format!("expected {} after {}", what, opcode), span)),
    }
}

fn constant(ty: ValueType, kind: &TokenKind, span: Span) -> Result<Value, WatError> {
    let out_of_range = || WatError::structure(format!("{} constant out of range", ty), span);
    let bad_payload = || WatError::structure(format!("{} nan payload out of range", ty), span);
    match (ty, kind) {
        (ValueType::I32, TokenKind::Integer(lit)) => lit.to_i32_bits().map(Value::I32).ok_or_else(out_of_range),
        (ValueType::I64, TokenKind::Integer(lit)) => lit.to_i64_bits().map(Value::I64).ok_or_else(out_of_range),
        (ValueType::F32, TokenKind::Integer(lit)) => Ok(Value::F32(int_to_f32(*lit))),
        (ValueType::F64, TokenKind::Integer(lit)) => Ok(Value::F64(lit.to_f64())),
        (ValueType::F32, TokenKind::Float(lit)) => lit.to_f32().map(Value::F32).ok_or_else(bad_payload),
        (ValueType::F64, TokenKind::Float(lit)) => lit.to_f64().map(Value::F64).ok_or_else(bad_payload),
        _ => Err(WatError::structure(format!("expected {} literal, found {}", ty, kind.describe()), span)),
    }
}

fn int_to_f32(lit: IntLit) -> f32 {
    let v = lit.magnitude as f32;
    if lit.negative {
        -v
    } else {
        v
    }
}

fn index(
    kind: &TokenKind,
    span: Span,
    what: &str,
    resolve: impl Fn(&str) -> Option<u32>,
) -> Result<Index, WatError> {
    match kind {
        TokenKind::Integer(IntLit {
            magnitude,
            negative: false,
        }) => {
            let index = u32::try_from(*magnitude).map_err(|_| WatError::structure(format!("{} index out of range", what), span))?;
            Ok(Index::new(index, None))
        }
        TokenKind::Id(name) => match resolve(name) {
            Some(index) => Ok(Index::new(index, Some(name.clone()))),
            None => Err(WatError::decl(format!("unknown {} ${}", what, name), span)),
        },
        _ => Err(WatError::structure(format!("expected {} index, found {}", what, kind.describe()), span)),
    }
}

// ============================================================================
// Flattening and Folding
// ============================================================================

/// Flatten instruction trees into stack order.
///
/// A folded operator must have either no operand children (all operands
/// come from the stack) or exactly as many as it pops.
///
/// ```
/// use watlite::wat::module::{Instruction, Signature};
/// use watlite::wat::normalize::flatten;
/// use watlite::wat::opcode::Opcode;
///
/// let tree = Instruction::simple(Opcode::F64Neg).with_operands(vec![Instruction::simple(Opcode::F64Sqrt)
///     .with_operands(vec![Instruction::simple(Opcode::F64Const)])]);
/// let flat = flatten(vec![tree], &[] as &[Signature]).unwrap();
/// let ops: Vec<_> = flat.iter().map(|i| i.opcode).collect();
/// assert_eq!(ops, [Opcode::F64Const, Opcode::F64Sqrt, Opcode::F64Neg]);
/// ```
///
/// # Errors
///
/// [`WatError::Structure`] when an operator has some, but not all, of its
/// operands folded.
pub fn flatten<E: StackEffect + ?Sized>(body: Vec<Instruction>, effects: &E) -> Result<Vec<Instruction>, WatError> {
    let mut out = Vec::with_capacity(body.len());
    let mut stack: Vec<Instruction> = body.into_iter().rev().collect();

    while let Some(mut instr) = stack.pop() {
        if instr.operands.is_empty() {
            out.push(instr);
            continue;
        }
        if let Some(expected) = effects.pops(&instr) {
            let found = instr.operands.len();
            if found != expected {
                return Err(WatError::structure(
                    format!(
                        "{} takes {} operand{}, found {} folded",
                        instr.opcode,
                        expected,
                        if expected == 1 { "" } else { "s" },
                        found
                    ),
                    instr.span,
                ));
            }
        }
        let operands = std::mem::take(&mut instr.operands);
        stack.push(instr);
        stack.extend(operands.into_iter().rev());
    }

    Ok(out)
}

/// Rebuild folded trees from a flat sequence.
///
/// Each operator takes the trees just before it as operands when there are
/// exactly enough of them and each yields one value. Anything else stays
/// flat.
pub fn fold<E: StackEffect + ?Sized>(flat: Vec<Instruction>, effects: &E) -> Vec<Instruction> {
    let mut forest: Vec<Instruction> = Vec::with_capacity(flat.len());
    // Trailing trees in `forest` that each yield exactly one value.
    let mut run = 0;

    for mut instr in flat {
        if let Some(pops) = effects.pops(&instr) {
            if pops > 0 && pops <= run && instr.operands.is_empty() {
                instr.operands = forest.split_off(forest.len() - pops);
                run -= pops;
            }
        }
        if effects.pushes(&instr) == Some(1) {
            run += 1;
        } else {
            run = 0;
        }
        forest.push(instr);
    }

    forest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wat::error::ErrorKind;
    use crate::wat::sexpr::read_all;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Names {
        locals: HashMap<&'static str, u32>,
        funcs: HashMap<&'static str, u32>,
    }

    impl Scope for Names {
        fn local(&self, name: &str) -> Option<u32> {
            self.locals.get(name).copied()
        }

        fn func(&self, name: &str) -> Option<u32> {
            self.funcs.get(name).copied()
        }
    }

    fn names() -> Names {
        Names {
            locals: HashMap::from([("a", 0), ("b", 1)]),
            funcs: HashMap::from([("mag", 0)]),
        }
    }

    fn no_funcs() -> &'static [Signature] {
        &[]
    }

    fn lower_str(source: &str) -> Result<Vec<Instruction>, WatError> {
        let items = read_all(source)?;
        lower(&items, &names())
    }

    fn flat_str(source: &str) -> Result<Vec<Instruction>, WatError> {
        flatten(lower_str(source)?, no_funcs())
    }

    fn opcodes(body: &[Instruction]) -> Vec<&'static str> {
        body.iter().map(|i| i.opcode.name()).collect()
    }

    // ------------------------------------------------------------------------
    // Lowering
    // ------------------------------------------------------------------------

    #[test]
    fn lower_flat_reads_immediates() {
        let body = lower_str("local.get $a f64.const 2.5 f64.mul").unwrap();
        assert_eq!(opcodes(&body), ["local.get", "f64.const", "f64.mul"]);
        assert_eq!(body[0].immediate, Immediate::Local(Index::new(0, Some("a".into()))));
        assert_eq!(body[1].immediate, Immediate::Value(Value::F64(2.5)));
        assert!(body.iter().all(Instruction::is_flat));
    }

    #[test]
    fn lower_folded_keeps_tree() {
        let body = lower_str("(f64.add (local.get $a) (f64.neg (local.get 1)))").unwrap();
        assert_eq!(body.len(), 1);
        let add = &body[0];
        assert_eq!(add.opcode, Opcode::F64Add);
        assert_eq!(opcodes(&add.operands), ["local.get", "f64.neg"]);
        assert_eq!(add.operands[1].operands[0].immediate, Immediate::Local(Index::new(1, None)));
    }

    #[test]
    fn lower_call_by_name() {
        let body = lower_str("(call $mag (f64.const 3) (f64.const 4))").unwrap();
        assert_eq!(body[0].immediate, Immediate::Func(Index::new(0, Some("mag".into()))));
        assert_eq!(body[0].operands.len(), 2);
    }

    #[test]
    fn lower_integer_constants() {
        let body = lower_str("i32.const 0xffff_ffff i32.const -2147483648 i64.const 18446744073709551615").unwrap();
        assert_eq!(body[0].immediate, Immediate::Value(Value::I32(-1)));
        assert_eq!(body[1].immediate, Immediate::Value(Value::I32(i32::MIN)));
        assert_eq!(body[2].immediate, Immediate::Value(Value::I64(-1)));
    }

    #[test]
    fn lower_float_constant_from_integer() {
        let body = lower_str("f32.const -3 f64.const 0x10").unwrap();
        assert_eq!(body[0].immediate, Immediate::Value(Value::F32(-3.0)));
        assert_eq!(body[1].immediate, Immediate::Value(Value::F64(16.0)));
    }

    #[test]
    fn lower_nan_payloads() {
        let body = lower_str("f32.const nan:0x7fffff f64.const -nan:0xf_ffff_ffff_ffff f64.const nan").unwrap();
        let values: Vec<_> = body
            .iter()
            .filter_map(|i| match i.immediate {
                Immediate::Value(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(values.iter().map(Value::value_type).collect::<Vec<_>>(), [ValueType::F32, ValueType::F64, ValueType::F64]);
        assert!(values[0].same_bits(&Value::F32(f32::from_bits(0x7FFF_FFFF))));
        assert!(values[1].same_bits(&Value::F64(f64::from_bits(0xFFFF_FFFF_FFFF_FFFF))));

        for source in ["f32.const nan:0x800000", "f64.const nan:0x10000000000000"] {
            let err = lower_str(source).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Structure, "{}", source);
            assert!(err.message().contains("nan payload out of range"), "{}: {}", source, err);
        }
    }

    #[test]
    fn lower_errors() {
        let cases = [
            ("block", ErrorKind::Structure, "unknown instruction 'block'"),
            ("i32.const 4294967296", ErrorKind::Structure, "out of range"),
            ("i32.const 1.5", ErrorKind::Structure, "expected i32 literal"),
            ("f64.const", ErrorKind::Structure, "expected literal after f64.const"),
            ("local.get $missing", ErrorKind::Decl, "unknown local $missing"),
            ("call $nowhere", ErrorKind::Decl, "unknown function $nowhere"),
            ("(f64.add (local.get 0) 7)", ErrorKind::Structure, "expected folded operand"),
            ("()", ErrorKind::Structure, "empty list"),
            ("42", ErrorKind::Structure, "expected instruction"),
        ];
        for (source, kind, message) in cases {
            let err = lower_str(source).unwrap_err();
            assert_eq!(err.kind(), kind, "{}", source);
            assert!(err.message().contains(message), "{}: {}", source, err);
        }
    }

    // ------------------------------------------------------------------------
    // Flattening
    // ------------------------------------------------------------------------

    #[test]
    fn flatten_is_post_order() {
        let body = flat_str("(f64.sqrt (f64.add (f64.mul (local.get $a) (local.get $a)) (f64.mul (local.get $b) (local.get $b))))")
            .unwrap();
        assert_eq!(
            opcodes(&body),
            ["local.get", "local.get", "f64.mul", "local.get", "local.get", "f64.mul", "f64.add", "f64.sqrt"]
        );
        let locals: Vec<_> = body
            .iter()
            .filter_map(|i| match &i.immediate {
                Immediate::Local(idx) => Some(idx.index),
                _ => None,
            })
            .collect();
        assert_eq!(locals, [0, 0, 1, 1]);
    }

    #[test]
    fn flatten_flat_is_identity() {
        let flat = lower_str("local.get 0 local.get 1 f64.add f64.sqrt").unwrap();
        let again = flatten(flat.clone(), no_funcs()).unwrap();
        assert_eq!(again, flat);
    }

    #[test]
    fn flatten_is_idempotent() {
        let once = flat_str("(f64.neg (f64.add (local.get 0) (f64.const 1)))").unwrap();
        let twice = flatten(once.clone(), no_funcs()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn flatten_mixed_forms() {
        let body = flat_str("local.get 0 (f64.neg (local.get 1))").unwrap();
        assert_eq!(opcodes(&body), ["local.get", "local.get", "f64.neg"]);
    }

    #[test]
    fn zero_folded_operands_allowed() {
        let body = flat_str("local.get 0 local.get 1 (f64.add)").unwrap();
        assert_eq!(opcodes(&body), ["local.get", "local.get", "f64.add"]);
    }

    #[test]
    fn partial_folded_operands_rejected() {
        let err = flat_str("local.get 0 (f64.add (local.get 1))").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structure);
        assert!(err.message().contains("takes 2 operands, found 1"), "{}", err);
        assert_eq!(err.span().column, 13);
    }

    #[test]
    fn too_many_folded_operands_rejected() {
        let err = flat_str("(f64.neg (f64.const 1) (f64.const 2))").unwrap_err();
        assert!(err.message().contains("takes 1 operand, found 2"), "{}", err);
    }

    #[test]
    fn call_arity_comes_from_callee() {
        let sigs = [Signature::new(vec![ValueType::F64, ValueType::F64], vec![ValueType::F64])];
        let tree = lower_str("(call $mag (f64.const 3))").unwrap();
        let err = flatten(tree, &sigs[..]).unwrap_err();
        assert!(err.message().contains("call takes 2 operands"), "{}", err);

        let tree = lower_str("(call $mag (f64.const 3) (f64.const 4))").unwrap();
        assert_eq!(opcodes(&flatten(tree, &sigs[..]).unwrap()), ["f64.const", "f64.const", "call"]);
    }

    #[test]
    fn very_deep_folded_body() {
        let depth = 100_000;
        let source = format!("{}(i32.const 1){}", "(i32.eqz ".repeat(depth), ")".repeat(depth));
        let body = flat_str(&source).unwrap();
        assert_eq!(body.len(), depth + 1);
        assert_eq!(body[0].opcode, Opcode::I32Const);
        assert!(body[1..].iter().all(|i| i.opcode == Opcode::I32Eqz));
    }

    // ------------------------------------------------------------------------
    // Folding
    // ------------------------------------------------------------------------

    #[test]
    fn fold_nests_single_value_operands() {
        let flat = flat_str("local.get 0 local.get 0 f64.mul f64.sqrt").unwrap();
        let folded = fold(flat.clone(), no_funcs());
        assert_eq!(folded.len(), 1);
        assert_eq!(folded[0].opcode, Opcode::F64Sqrt);
        assert_eq!(folded[0].operands[0].opcode, Opcode::F64Mul);
        assert_eq!(flatten(folded, no_funcs()).unwrap(), flat);
    }

    #[test]
    fn fold_leaves_stack_operands_flat() {
        // The add has only one preceding tree to take.
        let flat = flat_str("nop local.get 0 f64.add").unwrap();
        let folded = fold(flat.clone(), no_funcs());
        assert_eq!(opcodes(&folded), ["nop", "local.get", "f64.add"]);
        assert!(folded.iter().all(Instruction::is_flat));
    }

    #[test]
    fn fold_multi_value_results() {
        // conj: two results left on the stack, neither consumed.
        let flat = flat_str("local.get 0 local.get 1 f64.neg").unwrap();
        let folded = fold(flat.clone(), no_funcs());
        assert_eq!(opcodes(&folded), ["local.get", "f64.neg"]);
        assert_eq!(flatten(folded, no_funcs()).unwrap(), flat);
    }

    #[test]
    fn fold_unknown_callee_stays_flat() {
        let flat = flat_str("f64.const 1 call 7").unwrap();
        let folded = fold(flat, no_funcs());
        assert_eq!(folded.len(), 2);
    }
}
