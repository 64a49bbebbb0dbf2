//! The instruction table.
//!
//! Every supported instruction is listed once in the `opcodes!` invocation
//! below with its text name, the immediate it takes, and its stack shape.
//! The normalizer reads arities from here and the validator reads types.

use super::module::ValueType::{self, F32, F64, I32, I64};
use serde::{Serialize, Serializer};
use std::fmt;

/// The immediate operand an instruction takes in text form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmediateKind {
    None,
    /// A literal of the given type: `f64.const 1.5`.
    Value(ValueType),
    /// A local index or `$name`: `local.get $x`.
    Local,
    /// A function index or `$name`: `call $f`.
    Func,
}

/// How an instruction changes the value stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Pops `params` (last one on top) and pushes `results`.
    Fixed {
        params: &'static [ValueType],
        results: &'static [ValueType],
    },
    /// Pushes the type of the addressed local.
    LocalGet,
    /// Pops the type of the addressed local.
    LocalSet,
    /// Pops and re-pushes the type of the addressed local.
    LocalTee,
    /// Pops the callee's params and pushes its results.
    Call,
    /// Pops one value of any type.
    Drop,
    /// Pops `t t i32`, pushes `t`.
    Select,
}

impl Shape {
    /// Values popped, when that does not depend on context.
    pub fn fixed_pops(self) -> Option<usize> {
        match self {
            Shape::Fixed { params, .. } => Some(params.len()),
            Shape::LocalGet => Some(0),
            Shape::LocalSet | Shape::LocalTee | Shape::Drop => Some(1),
            Shape::Select => Some(3),
            Shape::Call => None,
        }
    }

    /// Values pushed, when that does not depend on context.
    pub fn fixed_pushes(self) -> Option<usize> {
        match self {
            Shape::Fixed { results, .. } => Some(results.len()),
            Shape::LocalGet | Shape::LocalTee | Shape::Select => Some(1),
            Shape::LocalSet | Shape::Drop => Some(0),
            Shape::Call => None,
        }
    }
}

const fn fixed(params: &'static [ValueType], results: &'static [ValueType]) -> Shape {
    Shape::Fixed { params, results }
}

const NONE: Shape = fixed(&[], &[]);

const I32_CONST: Shape = fixed(&[], &[I32]);
const I32_UN: Shape = fixed(&[I32], &[I32]);
const I32_BIN: Shape = fixed(&[I32, I32], &[I32]);

const I64_CONST: Shape = fixed(&[], &[I64]);
const I64_UN: Shape = fixed(&[I64], &[I64]);
const I64_BIN: Shape = fixed(&[I64, I64], &[I64]);
const I64_TEST: Shape = fixed(&[I64], &[I32]);
const I64_REL: Shape = fixed(&[I64, I64], &[I32]);

const F32_CONST: Shape = fixed(&[], &[F32]);
const F32_UN: Shape = fixed(&[F32], &[F32]);
const F32_BIN: Shape = fixed(&[F32, F32], &[F32]);
const F32_REL: Shape = fixed(&[F32, F32], &[I32]);

const F64_CONST: Shape = fixed(&[], &[F64]);
const F64_UN: Shape = fixed(&[F64], &[F64]);
const F64_BIN: Shape = fixed(&[F64, F64], &[F64]);
const F64_REL: Shape = fixed(&[F64, F64], &[I32]);

const I64_TO_I32: Shape = fixed(&[I64], &[I32]);
const F32_TO_I32: Shape = fixed(&[F32], &[I32]);
const F64_TO_I32: Shape = fixed(&[F64], &[I32]);
const I32_TO_I64: Shape = fixed(&[I32], &[I64]);
const F32_TO_I64: Shape = fixed(&[F32], &[I64]);
const F64_TO_I64: Shape = fixed(&[F64], &[I64]);
const I32_TO_F32: Shape = fixed(&[I32], &[F32]);
const I64_TO_F32: Shape = fixed(&[I64], &[F32]);
const F64_TO_F32: Shape = fixed(&[F64], &[F32]);
const I32_TO_F64: Shape = fixed(&[I32], &[F64]);
const I64_TO_F64: Shape = fixed(&[I64], &[F64]);
const F32_TO_F64: Shape = fixed(&[F32], &[F64]);

macro_rules! opcodes {
    ($($variant:ident => $name:literal, $imm:expr, $shape:expr;)*) => {
        /// A supported instruction, named by its type-prefixed text form.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($variant,)*
        }

        impl Opcode {
            /// Every opcode, in table order.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            pub fn from_name(name: &str) -> Option<Opcode> {
                match name {
                    $($name => Some(Opcode::$variant),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name,)*
                }
            }

            pub fn immediate(self) -> ImmediateKind {
                match self {
                    $(Opcode::$variant => $imm,)*
                }
            }

            pub fn shape(self) -> Shape {
                match self {
                    $(Opcode::$variant => $shape,)*
                }
            }
        }
    };
}

use ImmediateKind as Imm;

opcodes! {
    // Parametric and variable
    Nop => "nop", Imm::None, NONE;
    Drop => "drop", Imm::None, Shape::Drop;
    Select => "select", Imm::None, Shape::Select;
    LocalGet => "local.get", Imm::Local, Shape::LocalGet;
    LocalSet => "local.set", Imm::Local, Shape::LocalSet;
    LocalTee => "local.tee", Imm::Local, Shape::LocalTee;
    Call => "call", Imm::Func, Shape::Call;

    // i32
    I32Const => "i32.const", Imm::Value(I32), I32_CONST;
    I32Clz => "i32.clz", Imm::None, I32_UN;
    I32Ctz => "i32.ctz", Imm::None, I32_UN;
    I32Popcnt => "i32.popcnt", Imm::None, I32_UN;
    I32Eqz => "i32.eqz", Imm::None, I32_UN;
    I32Extend8S => "i32.extend8_s", Imm::None, I32_UN;
    I32Extend16S => "i32.extend16_s", Imm::None, I32_UN;
    I32Add => "i32.add", Imm::None, I32_BIN;
    I32Sub => "i32.sub", Imm::None, I32_BIN;
    I32Mul => "i32.mul", Imm::None, I32_BIN;
    I32DivS => "i32.div_s", Imm::None, I32_BIN;
    I32DivU => "i32.div_u", Imm::None, I32_BIN;
    I32RemS => "i32.rem_s", Imm::None, I32_BIN;
    I32RemU => "i32.rem_u", Imm::None, I32_BIN;
    I32And => "i32.and", Imm::None, I32_BIN;
    I32Or => "i32.or", Imm::None, I32_BIN;
    I32Xor => "i32.xor", Imm::None, I32_BIN;
    I32Shl => "i32.shl", Imm::None, I32_BIN;
    I32ShrS => "i32.shr_s", Imm::None, I32_BIN;
    I32ShrU => "i32.shr_u", Imm::None, I32_BIN;
    I32Rotl => "i32.rotl", Imm::None, I32_BIN;
    I32Rotr => "i32.rotr", Imm::None, I32_BIN;
    I32Eq => "i32.eq", Imm::None, I32_BIN;
    I32Ne => "i32.ne", Imm::None, I32_BIN;
    I32LtS => "i32.lt_s", Imm::None, I32_BIN;
    I32LtU => "i32.lt_u", Imm::None, I32_BIN;
    I32GtS => "i32.gt_s", Imm::None, I32_BIN;
    I32GtU => "i32.gt_u", Imm::None, I32_BIN;
    I32LeS => "i32.le_s", Imm::None, I32_BIN;
    I32LeU => "i32.le_u", Imm::None, I32_BIN;
    I32GeS => "i32.ge_s", Imm::None, I32_BIN;
    I32GeU => "i32.ge_u", Imm::None, I32_BIN;
    I32WrapI64 => "i32.wrap_i64", Imm::None, I64_TO_I32;
    I32TruncF32S => "i32.trunc_f32_s", Imm::None, F32_TO_I32;
    I32TruncF32U => "i32.trunc_f32_u", Imm::None, F32_TO_I32;
    I32TruncF64S => "i32.trunc_f64_s", Imm::None, F64_TO_I32;
    I32TruncF64U => "i32.trunc_f64_u", Imm::None, F64_TO_I32;
    I32ReinterpretF32 => "i32.reinterpret_f32", Imm::None, F32_TO_I32;

    // i64
    I64Const => "i64.const", Imm::Value(I64), I64_CONST;
    I64Clz => "i64.clz", Imm::None, I64_UN;
    I64Ctz => "i64.ctz", Imm::None, I64_UN;
    I64Popcnt => "i64.popcnt", Imm::None, I64_UN;
    I64Eqz => "i64.eqz", Imm::None, I64_TEST;
    I64Extend8S => "i64.extend8_s", Imm::None, I64_UN;
    I64Extend16S => "i64.extend16_s", Imm::None, I64_UN;
    I64Extend32S => "i64.extend32_s", Imm::None, I64_UN;
    I64Add => "i64.add", Imm::None, I64_BIN;
    I64Sub => "i64.sub", Imm::None, I64_BIN;
    I64Mul => "i64.mul", Imm::None, I64_BIN;
    I64DivS => "i64.div_s", Imm::None, I64_BIN;
    I64DivU => "i64.div_u", Imm::None, I64_BIN;
    I64RemS => "i64.rem_s", Imm::None, I64_BIN;
    I64RemU => "i64.rem_u", Imm::None, I64_BIN;
    I64And => "i64.and", Imm::None, I64_BIN;
    I64Or => "i64.or", Imm::None, I64_BIN;
    I64Xor => "i64.xor", Imm::None, I64_BIN;
    I64Shl => "i64.shl", Imm::None, I64_BIN;
    I64ShrS => "i64.shr_s", Imm::None, I64_BIN;
    I64ShrU => "i64.shr_u", Imm::None, I64_BIN;
    I64Rotl => "i64.rotl", Imm::None, I64_BIN;
    I64Rotr => "i64.rotr", Imm::None, I64_BIN;
    I64Eq => "i64.eq", Imm::None, I64_REL;
    I64Ne => "i64.ne", Imm::None, I64_REL;
    I64LtS => "i64.lt_s", Imm::None, I64_REL;
    I64LtU => "i64.lt_u", Imm::None, I64_REL;
    I64GtS => "i64.gt_s", Imm::None, I64_REL;
    I64GtU => "i64.gt_u", Imm::None, I64_REL;
    I64LeS => "i64.le_s", Imm::None, I64_REL;
    I64LeU => "i64.le_u", Imm::None, I64_REL;
    I64GeS => "i64.ge_s", Imm::None, I64_REL;
    I64GeU => "i64.ge_u", Imm::None, I64_REL;
    I64ExtendI32S => "i64.extend_i32_s", Imm::None, I32_TO_I64;
    I64ExtendI32U => "i64.extend_i32_u", Imm::None, I32_TO_I64;
    I64TruncF32S => "i64.trunc_f32_s", Imm::None, F32_TO_I64;
    I64TruncF32U => "i64.trunc_f32_u", Imm::None, F32_TO_I64;
    I64TruncF64S => "i64.trunc_f64_s", Imm::None, F64_TO_I64;
    I64TruncF64U => "i64.trunc_f64_u", Imm::None, F64_TO_I64;
    I64ReinterpretF64 => "i64.reinterpret_f64", Imm::None, F64_TO_I64;

    // f32
    F32Const => "f32.const", Imm::Value(F32), F32_CONST;
    F32Abs => "f32.abs", Imm::None, F32_UN;
    F32Neg => "f32.neg", Imm::None, F32_UN;
    F32Sqrt => "f32.sqrt", Imm::None, F32_UN;
    F32Ceil => "f32.ceil", Imm::None, F32_UN;
    F32Floor => "f32.floor", Imm::None, F32_UN;
    F32Trunc => "f32.trunc", Imm::None, F32_UN;
    F32Nearest => "f32.nearest", Imm::None, F32_UN;
    F32Add => "f32.add", Imm::None, F32_BIN;
    F32Sub => "f32.sub", Imm::None, F32_BIN;
    F32Mul => "f32.mul", Imm::None, F32_BIN;
    F32Div => "f32.div", Imm::None, F32_BIN;
    F32Min => "f32.min", Imm::None, F32_BIN;
    F32Max => "f32.max", Imm::None, F32_BIN;
    F32Copysign => "f32.copysign", Imm::None, F32_BIN;
    F32Eq => "f32.eq", Imm::None, F32_REL;
    F32Ne => "f32.ne", Imm::None, F32_REL;
    F32Lt => "f32.lt", Imm::None, F32_REL;
    F32Gt => "f32.gt", Imm::None, F32_REL;
    F32Le => "f32.le", Imm::None, F32_REL;
    F32Ge => "f32.ge", Imm::None, F32_REL;
    F32ConvertI32S => "f32.convert_i32_s", Imm::None, I32_TO_F32;
    F32ConvertI32U => "f32.convert_i32_u", Imm::None, I32_TO_F32;
    F32ConvertI64S => "f32.convert_i64_s", Imm::None, I64_TO_F32;
    F32ConvertI64U => "f32.convert_i64_u", Imm::None, I64_TO_F32;
    F32DemoteF64 => "f32.demote_f64", Imm::None, F64_TO_F32;
    F32ReinterpretI32 => "f32.reinterpret_i32", Imm::None, I32_TO_F32;

    // f64
    F64Const => "f64.const", Imm::Value(F64), F64_CONST;
    F64Abs => "f64.abs", Imm::None, F64_UN;
    F64Neg => "f64.neg", Imm::None, F64_UN;
    F64Sqrt => "f64.sqrt", Imm::None, F64_UN;
    F64Ceil => "f64.ceil", Imm::None, F64_UN;
    F64Floor => "f64.floor", Imm::None, F64_UN;
    F64Trunc => "f64.trunc", Imm::None, F64_UN;
    F64Nearest => "f64.nearest", Imm::None, F64_UN;
    F64Add => "f64.add", Imm::None, F64_BIN;
    F64Sub => "f64.sub", Imm::None, F64_BIN;
    F64Mul => "f64.mul", Imm::None, F64_BIN;
    F64Div => "f64.div", Imm::None, F64_BIN;
    F64Min => "f64.min", Imm::None, F64_BIN;
    F64Max => "f64.max", Imm::None, F64_BIN;
    F64Copysign => "f64.copysign", Imm::None, F64_BIN;
    F64Eq => "f64.eq", Imm::None, F64_REL;
    F64Ne => "f64.ne", Imm::None, F64_REL;
    F64Lt => "f64.lt", Imm::None, F64_REL;
    F64Gt => "f64.gt", Imm::None, F64_REL;
    F64Le => "f64.le", Imm::None, F64_REL;
    F64Ge => "f64.ge", Imm::None, F64_REL;
    F64ConvertI32S => "f64.convert_i32_s", Imm::None, I32_TO_F64;
    F64ConvertI32U => "f64.convert_i32_u", Imm::None, I32_TO_F64;
    F64ConvertI64S => "f64.convert_i64_s", Imm::None, I64_TO_F64;
    F64ConvertI64U => "f64.convert_i64_u", Imm::None, I64_TO_F64;
    F64PromoteF32 => "f64.promote_f32", Imm::None, F32_TO_F64;
    F64ReinterpretI64 => "f64.reinterpret_i64", Imm::None, I64_TO_F64;
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Opcode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}
