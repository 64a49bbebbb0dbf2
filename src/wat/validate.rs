//! Module validation.
//!
//! Each function body is checked by simulating the value stack: every
//! instruction pops its operand types (last operand on top) and pushes its
//! results, using the table in [`super::opcode`]. At the end of the body the
//! stack must hold exactly the declared results, in order.
//!
//! Before any body is checked, module-level names are checked for
//! uniqueness. Bodies that still carry folded operands are flattened first,
//! so the simulation only ever sees the flat form.

use super::error::WatError;
use super::module::{FunctionDecl, Immediate, Instruction, Module, ValueType};
use super::normalize::flatten;
use super::opcode::{ImmediateKind, Shape};
use std::borrow::Cow;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, instrument};

/// Why a single instruction failed, before it is tagged with a location.
#[derive(Error, Debug)]
enum StackError {
    #[error("missing {expected} operand for {op}")]
    Underflow { op: &'static str, expected: String },

    #[error("{op} expected {expected} operand, found {found}")]
    Mismatch {
        op: &'static str,
        expected: ValueType,
        found: ValueType,
    },

    #[error("local index {0} out of range")]
    UnknownLocal(u32),

    #[error("function index {0} out of range")]
    UnknownFunc(u32),

    #[error("{op} is missing its immediate")]
    MissingImmediate { op: &'static str },

    #[error("{op} immediate is {found}, not {expected}")]
    ConstantType {
        op: &'static str,
        expected: ValueType,
        found: ValueType,
    },
}

/// Progress of a [`Validator`]. `Valid` and `Invalid` are final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationState {
    Unvalidated,
    Validating,
    Valid,
    Invalid(WatError),
}

/// Validates a module once and remembers the outcome.
///
/// ```
/// use watlite::wat::{builder::build, sexpr::read_all};
/// use watlite::wat::validate::{ValidationState, Validator};
///
/// let forms = read_all("(func (result i32) i32.const 1 i32.const 2 i32.add)").unwrap();
/// let module = build(&forms).unwrap();
/// let mut validator = Validator::new(&module);
/// assert_eq!(validator.state(), &ValidationState::Unvalidated);
/// assert!(validator.validate().is_ok());
/// assert_eq!(validator.state(), &ValidationState::Valid);
/// ```
#[derive(Debug)]
pub struct Validator<'m> {
    module: &'m Module,
    state: ValidationState,
}

impl<'m> Validator<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            state: ValidationState::Unvalidated,
        }
    }

    pub fn state(&self) -> &ValidationState {
        &self.state
    }

    /// Validate the module, or report the earlier outcome if this validator
    /// has already finished.
    ///
    /// # Errors
    ///
    /// The first failure: [`WatError::Decl`] for duplicate names or
    /// out-of-range indices, [`WatError::Type`] for operand mismatches,
    /// [`WatError::Arity`] for wrong results at function end.
    #[instrument(level = "debug", skip_all, fields(functions = self.module.functions.len()))]
    pub fn validate(&mut self) -> Result<(), WatError> {
        match &self.state {
            ValidationState::Valid => return Ok(()),
            ValidationState::Invalid(e) => return Err(e.clone()),
            ValidationState::Unvalidated | ValidationState::Validating => {}
        }

        self.state = ValidationState::Validating;
        match validate_module(self.module) {
            Ok(()) => {
                debug!("module valid");
                self.state = ValidationState::Valid;
                Ok(())
            }
            Err(e) => {
                debug!(error = %e, "module invalid");
                self.state = ValidationState::Invalid(e.clone());
                Err(e)
            }
        }
    }
}

/// Validate without keeping a [`Validator`] around.
pub fn validate(module: &Module) -> Result<(), WatError> {
    Validator::new(module).validate()
}

fn validate_module(module: &Module) -> Result<(), WatError> {
    check_names(module)?;
    for index in 0..module.functions.len() {
        validate_function(module, index)?;
    }
    Ok(())
}

/// Internal and export names must each be unique.
fn check_names(module: &Module) -> Result<(), WatError> {
    let mut names = HashSet::new();
    let mut exports = HashSet::new();
    for func in &module.functions {
        if let Some(name) = &func.name {
            if !names.insert(name.as_str()) {
                return Err(WatError::decl(format!("duplicate function ${}", name), func.span));
            }
        }
        if let Some(export) = &func.export {
            if !exports.insert(export.as_str()) {
                return Err(WatError::decl(format!("duplicate export {:?}", export), func.span));
            }
        }
    }
    Ok(())
}

/// Check one function: its body must type-check and leave exactly its
/// declared results.
///
/// # Errors
///
/// As for [`Validator::validate`]. An out-of-range `index` is a
/// [`WatError::Decl`].
pub fn validate_function(module: &Module, index: usize) -> Result<(), WatError> {
    let (func, body, stack) = simulate(module, index)?;
    if stack != func.signature.results {
        return Err(WatError::Arity {
            func: func.describe(index),
            index: body.len(),
            message: format!(
                "expected [{}] at function end, found [{}]",
                join(&func.signature.results),
                join(&stack)
            ),
            span: body.last().map_or(func.span, |i| i.span),
        });
    }
    debug!(func = %func.describe(index), "function valid");
    Ok(())
}

/// Simulate a function body and return the value stack it leaves, bottom
/// first. A body with folded operands is flattened first.
///
/// # Errors
///
/// [`WatError::Structure`] if a folded body has the wrong operand counts,
/// otherwise as for [`Validator::validate`] minus the exit check.
pub fn final_stack(module: &Module, index: usize) -> Result<Vec<ValueType>, WatError> {
    simulate(module, index).map(|(_, _, stack)| stack)
}

type Simulated<'m> = (&'m FunctionDecl, Cow<'m, [Instruction]>, Vec<ValueType>);

fn simulate(module: &Module, index: usize) -> Result<Simulated<'_>, WatError> {
    let func = function(module, index)?;
    let body: Cow<'_, [Instruction]> = if func.body.iter().all(Instruction::is_flat) {
        Cow::Borrowed(func.body.as_slice())
    } else {
        Cow::Owned(flatten(func.body.clone(), module)?)
    };
    let mut stack = CodeValidator {
        module,
        func,
        vals: Vec::new(),
    };
    for (position, instr) in body.iter().enumerate() {
        stack.step(instr).map_err(|e| match e {
            StackError::UnknownLocal(_) | StackError::UnknownFunc(_) => {
                WatError::decl(format!("{} in {}", e, func.describe(index)), instr.span)
            }
            _ => WatError::Type {
                func: func.describe(index),
                index: position,
                message: e.to_string(),
                span: instr.span,
            },
        })?;
    }
    let vals = stack.vals;
    Ok((func, body, vals))
}

fn function(module: &Module, index: usize) -> Result<&FunctionDecl, WatError> {
    module
        .functions
        .get(index)
        .ok_or_else(|| WatError::decl(format!("function index {} out of range", index), super::token::Span::ZERO))
}

fn join(types: &[ValueType]) -> String {
    types.iter().copied().map(ValueType::name).collect::<Vec<_>>().join(", ")
}

// ============================================================================
// Stack Simulation
// ============================================================================

struct CodeValidator<'a> {
    module: &'a Module,
    func: &'a FunctionDecl,
    vals: Vec<ValueType>,
}

impl CodeValidator<'_> {
    fn push_val(&mut self, ty: ValueType) {
        self.vals.push(ty);
    }

    fn pop_val(&mut self, op: &'static str) -> Result<ValueType, StackError> {
        self.vals.pop().ok_or(StackError::Underflow {
            op,
            expected: "any".to_string(),
        })
    }

    fn pop_expected(&mut self, op: &'static str, expected: ValueType) -> Result<(), StackError> {
        match self.vals.pop() {
            Some(found) if found == expected => Ok(()),
            Some(found) => Err(StackError::Mismatch { op, expected, found }),
            None => Err(StackError::Underflow {
                op,
                expected: expected.to_string(),
            }),
        }
    }

    /// Pop `params`, last one first.
    fn pop_expecteds(&mut self, op: &'static str, params: &[ValueType]) -> Result<(), StackError> {
        for &ty in params.iter().rev() {
            self.pop_expected(op, ty)?;
        }
        Ok(())
    }

    fn local(&self, instr: &Instruction) -> Result<ValueType, StackError> {
        let Immediate::Local(local) = &instr.immediate else {
            return Err(StackError::MissingImmediate { op: instr.opcode.name() });
        };
        self.func
            .local_type(local.index)
            .ok_or(StackError::UnknownLocal(local.index))
    }

    fn constant(&self, instr: &Instruction, expected: ValueType) -> Result<(), StackError> {
        let op = instr.opcode.name();
        match &instr.immediate {
            Immediate::Value(v) if v.value_type() == expected => Ok(()),
            Immediate::Value(v) => Err(StackError::ConstantType {
                op,
                expected,
                found: v.value_type(),
            }),
            _ => Err(StackError::MissingImmediate { op }),
        }
    }

    fn step(&mut self, instr: &Instruction) -> Result<(), StackError> {
        let op = instr.opcode.name();
        if let ImmediateKind::Value(ty) = instr.opcode.immediate() {
            self.constant(instr, ty)?;
        }
        match instr.opcode.shape() {
            Shape::Fixed { params, results } => {
                self.pop_expecteds(op, params)?;
                for &ty in results {
                    self.push_val(ty);
                }
            }
            Shape::LocalGet => {
                let ty = self.local(instr)?;
                self.push_val(ty);
            }
            Shape::LocalSet => {
                let ty = self.local(instr)?;
                self.pop_expected(op, ty)?;
            }
            Shape::LocalTee => {
                let ty = self.local(instr)?;
                self.pop_expected(op, ty)?;
                self.push_val(ty);
            }
            Shape::Call => {
                let Immediate::Func(callee) = &instr.immediate else {
                    return Err(StackError::MissingImmediate { op });
                };
                let module = self.module;
                let sig = &module
                    .functions
                    .get(callee.index as usize)
                    .ok_or(StackError::UnknownFunc(callee.index))?
                    .signature;
                self.pop_expecteds(op, &sig.params)?;
                for &ty in &sig.results {
                    self.push_val(ty);
                }
            }
            Shape::Drop => {
                self.pop_val(op)?;
            }
            Shape::Select => {
                self.pop_expected(op, ValueType::I32)?;
                let ty = self.pop_val(op)?;
                self.pop_expected(op, ty)?;
                self.push_val(ty);
            }
        }
        Ok(())
    }
}
