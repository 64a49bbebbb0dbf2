//! The module representation produced by [`super::builder`].
//!
//! Everything here is plain owned data. Bodies are stored flat after
//! building, so an [`Instruction`] only carries operands while a folded
//! tree is being lowered or when [`super::normalize::fold`] rebuilds one
//! for display.

use super::opcode::Opcode;
use super::token::Span;
use serde::Serialize;
use std::fmt;

// ============================================================================
// Types and Values
// ============================================================================

/// One of the four numeric value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl ValueType {
    pub fn from_keyword(keyword: &str) -> Option<ValueType> {
        match keyword {
            "i32" => Some(ValueType::I32),
            "i64" => Some(ValueType::I64),
            "f32" => Some(ValueType::F32),
            "f64" => Some(ValueType::F64),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A constant operand of `T.const`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
        }
    }

    /// Bitwise equality, so NaN payloads and signed zeros compare exactly.
    pub fn same_bits(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a.to_bits() == b.to_bits(),
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

/// Writes a float so the lexer reads back the same bits.
fn write_float(f: &mut fmt::Formatter<'_>, negative: bool, nan_payload: Option<u64>, canonical: u64, finite: impl fmt::Debug) -> fmt::Result {
    let sign = if negative { "-" } else { "" };
    match nan_payload {
        Some(p) if p == canonical => write!(f, "{}nan", sign),
        Some(p) => write!(f, "{}nan:0x{:x}", sign, p),
        None => write!(f, "{:?}", finite),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F32(v) => {
                let payload = v.is_nan().then(|| u64::from(v.to_bits() & 0x7F_FFFF));
                write_float(f, v.is_sign_negative(), payload, 0x40_0000, v)
            }
            Value::F64(v) => {
                let payload = v.is_nan().then(|| v.to_bits() & 0xF_FFFF_FFFF_FFFF);
                write_float(f, v.is_sign_negative(), payload, 0x8_0000_0000_0000, v)
            }
        }
    }
}

// ============================================================================
// Signatures
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Signature {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

impl Signature {
    pub fn new(params: Vec<ValueType>, results: Vec<ValueType>) -> Self {
        Self { params, results }
    }
}

/// `(param f64 f64) (result f64)`, omitting empty groups.
impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        for (keyword, types) in [("param", &self.params), ("result", &self.results)] {
            if types.is_empty() {
                continue;
            }
            write!(f, "{}({}", sep, keyword)?;
            for ty in types {
                write!(f, " {}", ty)?;
            }
            write!(f, ")")?;
            sep = " ";
        }
        Ok(())
    }
}

// ============================================================================
// Instructions
// ============================================================================

/// A resolved local or function index, remembering the `$name` it was
/// written with so it can be printed the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Index {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Index {
    pub fn new(index: u32, name: Option<String>) -> Self {
        Self { index, name }
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "${}", name),
            None => write!(f, "{}", self.index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Immediate {
    None,
    Value(Value),
    Local(Index),
    Func(Index),
}

impl Immediate {
    pub fn is_none(&self) -> bool {
        matches!(self, Immediate::None)
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::None => Ok(()),
            Immediate::Value(v) => write!(f, "{}", v),
            Immediate::Local(i) | Immediate::Func(i) => write!(f, "{}", i),
        }
    }
}

/// One instruction. `operands` is empty in flat form.
///
/// Dropping is iterative; take `operands` with [`std::mem::take`] rather
/// than destructuring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instruction {
    pub opcode: Opcode,
    #[serde(skip_serializing_if = "Immediate::is_none")]
    pub immediate: Immediate,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub operands: Vec<Instruction>,
    #[serde(skip)]
    pub span: Span,
}

impl Instruction {
    pub fn new(opcode: Opcode, immediate: Immediate, span: Span) -> Self {
        Self {
            opcode,
            immediate,
            operands: Vec::new(),
            span,
        }
    }

    /// A plain instruction with no immediate.
    pub fn simple(opcode: Opcode) -> Self {
        Self::new(opcode, Immediate::None, Span::ZERO)
    }

    #[must_use]
    pub fn with_operands(mut self, operands: Vec<Instruction>) -> Self {
        self.operands = operands;
        self
    }

    pub fn is_flat(&self) -> bool {
        self.operands.is_empty()
    }
}

impl Drop for Instruction {
    fn drop(&mut self) {
        if self.operands.is_empty() {
            return;
        }
        let mut pending = std::mem::take(&mut self.operands);
        while let Some(mut child) = pending.pop() {
            pending.append(&mut child.operands);
        }
    }
}

// ============================================================================
// Functions and Modules
// ============================================================================

/// A `(local $n t)` slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Local {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub ty: ValueType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDecl {
    /// Internal `$name`, without the `$`.
    pub name: Option<String>,
    /// External name from `(export "...")`.
    pub export: Option<String>,
    pub signature: Signature,
    pub param_names: Vec<Option<String>>,
    pub locals: Vec<Local>,
    pub body: Vec<Instruction>,
    #[serde(skip)]
    pub span: Span,
}

impl FunctionDecl {
    /// Type of local `index`, counting params first.
    pub fn local_type(&self, index: u32) -> Option<ValueType> {
        let index = index as usize;
        let params = &self.signature.params;
        match params.get(index) {
            Some(ty) => Some(*ty),
            None => self.locals.get(index - params.len()).map(|l| l.ty),
        }
    }

    /// Params plus declared locals.
    pub fn local_count(&self) -> usize {
        self.signature.params.len() + self.locals.len()
    }

    /// How errors refer to this function: `$name`, then `"export"`, then
    /// the position in the module.
    pub fn describe(&self, index: usize) -> String {
        match (&self.name, &self.export) {
            (Some(name), _) => format!("${}", name),
            (None, Some(export)) => format!("{:?}", export),
            (None, None) => format!("func {}", index),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Module {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub functions: Vec<FunctionDecl>,
}

impl Module {
    /// Look up a function by its internal name (without `$`).
    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name.as_deref() == Some(name))
    }

    /// Look up a function by export name.
    pub fn export(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.export.as_deref() == Some(name))
    }

    pub fn exports(&self) -> impl Iterator<Item = (&str, &FunctionDecl)> {
        self.functions.iter().filter_map(|f| f.export.as_deref().map(|e| (e, f)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_keywords() {
        for ty in [ValueType::I32, ValueType::I64, ValueType::F32, ValueType::F64] {
            assert_eq!(ValueType::from_keyword(ty.name()), Some(ty));
        }
        assert_eq!(ValueType::from_keyword("v128"), None);
        assert_eq!(ValueType::from_keyword("funcref"), None);
    }

    #[test]
    fn signature_display() {
        let sig = Signature::new(vec![ValueType::F64, ValueType::F64], vec![ValueType::F64]);
        assert_eq!(sig.to_string(), "(param f64 f64) (result f64)");
        assert_eq!(Signature::new(vec![], vec![ValueType::I32]).to_string(), "(result i32)");
        assert_eq!(Signature::default().to_string(), "");
    }

    #[test]
    fn float_display_reads_back() {
        assert_eq!(Value::F64(1.5).to_string(), "1.5");
        assert_eq!(Value::F64(-0.0).to_string(), "-0.0");
        assert_eq!(Value::F64(f64::NEG_INFINITY).to_string(), "-inf");
        assert_eq!(Value::F64(f64::NAN).to_string(), "nan");
        assert_eq!(Value::F32(f32::from_bits(0x7F80_0001)).to_string(), "nan:0x1");
        assert_eq!(Value::I64(i64::MIN).to_string(), "-9223372036854775808");
    }

    #[test]
    fn same_bits_distinguishes_zero_signs() {
        assert!(!Value::F64(0.0).same_bits(&Value::F64(-0.0)));
        assert!(Value::F64(f64::NAN).same_bits(&Value::F64(f64::NAN)));
        assert!(!Value::I32(1).same_bits(&Value::I64(1)));
    }

    #[test]
    fn local_type_counts_params_first() {
        let func = FunctionDecl {
            name: Some("f".into()),
            export: None,
            signature: Signature::new(vec![ValueType::I32], vec![]),
            param_names: vec![None],
            locals: vec![Local {
                name: Some("t".into()),
                ty: ValueType::F64,
            }],
            body: vec![],
            span: Span::ZERO,
        };
        assert_eq!(func.local_type(0), Some(ValueType::I32));
        assert_eq!(func.local_type(1), Some(ValueType::F64));
        assert_eq!(func.local_type(2), None);
        assert_eq!(func.local_count(), 2);
        assert_eq!(func.describe(3), "$f");
    }

    #[test]
    fn deep_instruction_tree_drops() {
        let mut tree = Instruction::simple(Opcode::I32Const);
        for _ in 0..200_000 {
            tree = Instruction::simple(Opcode::I32Eqz).with_operands(vec![tree]);
        }
        drop(tree);
    }

    #[test]
    fn json_skips_spans_and_empty_fields() {
        let instr = Instruction::new(
            Opcode::LocalGet,
            Immediate::Local(Index::new(0, Some("x".into()))),
            Span::new(4, 15, 1, 5),
        );
        let json = serde_json::to_string(&instr).unwrap();
        assert_eq!(json, r#"{"opcode":"local.get","immediate":{"local":{"index":0,"name":"x"}}}"#);
    }
}
