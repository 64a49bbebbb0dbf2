//! Rendering modules back to WAT text.
//!
//! [`Module`]'s `Display` writes bodies flat, one instruction per line.
//! [`Module::folded`] writes them as folded S-expressions instead. Either
//! output parses back to a module with the same signatures and the same
//! flat bodies.

use super::module::{FunctionDecl, Instruction, Module, ValueType};
use super::normalize::fold;
use super::token::write_wat_string;
use std::fmt;

const INDENT: &str = "  ";

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_module(f, self, |f, func| {
            for instr in &func.body {
                write!(f, "\n{}", INDENT.repeat(2))?;
                write_instruction(f, instr)?;
            }
            Ok(())
        })
    }
}

/// Folded rendering of a module, from [`Module::folded`].
pub struct Folded<'a>(&'a Module);

impl Module {
    /// Display adapter that nests operands under their operators where the
    /// stack allows it.
    ///
    /// ```
    /// use watlite::wat::parse;
    ///
    /// let module = parse("(func (result i32) i32.const 1 i32.eqz)").unwrap();
    /// let text = module.folded().to_string();
    /// assert!(text.contains("(i32.eqz\n      (i32.const 1))"));
    /// ```
    pub fn folded(&self) -> Folded<'_> {
        Folded(self)
    }
}

impl fmt::Display for Folded<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let module = self.0;
        write_module(f, module, |f, func| {
            for tree in fold(func.body.clone(), module) {
                write_tree(f, &tree, 2)?;
            }
            Ok(())
        })
    }
}

fn write_module<F>(f: &mut fmt::Formatter<'_>, module: &Module, mut body: F) -> fmt::Result
where
    F: FnMut(&mut fmt::Formatter<'_>, &FunctionDecl) -> fmt::Result,
{
    write!(f, "(module")?;
    if let Some(name) = &module.name {
        write!(f, " ${}", name)?;
    }
    for func in &module.functions {
        write!(f, "\n{}", INDENT)?;
        write_header(f, func)?;
        body(f, func)?;
        write!(f, ")")?;
    }
    writeln!(f, ")")
}

fn write_header(f: &mut fmt::Formatter<'_>, func: &FunctionDecl) -> fmt::Result {
    write!(f, "(func")?;
    if let Some(name) = &func.name {
        write!(f, " ${}", name)?;
    }
    if let Some(export) = &func.export {
        write!(f, " (export ")?;
        write_wat_string(f, export.as_bytes())?;
        write!(f, ")")?;
    }
    let params = func.signature.params.iter().zip(&func.param_names);
    write_slots(f, "param", params.map(|(ty, name)| (name.as_deref(), *ty)))?;
    if !func.signature.results.is_empty() {
        write!(f, " (result")?;
        for ty in &func.signature.results {
            write!(f, " {}", ty)?;
        }
        write!(f, ")")?;
    }
    write_slots(f, "local", func.locals.iter().map(|l| (l.name.as_deref(), l.ty)))
}

/// Named slots get their own form; runs of anonymous ones share one.
fn write_slots<'a>(
    f: &mut fmt::Formatter<'_>,
    keyword: &str,
    slots: impl Iterator<Item = (Option<&'a str>, ValueType)>,
) -> fmt::Result {
    let mut open = false;
    for (name, ty) in slots {
        match name {
            Some(name) => {
                if open {
                    write!(f, ")")?;
                    open = false;
                }
                write!(f, " ({} ${} {})", keyword, name, ty)?;
            }
            None => {
                if !open {
                    write!(f, " ({}", keyword)?;
                    open = true;
                }
                write!(f, " {}", ty)?;
            }
        }
    }
    if open {
        write!(f, ")")?;
    }
    Ok(())
}

fn write_instruction(f: &mut fmt::Formatter<'_>, instr: &Instruction) -> fmt::Result {
    write!(f, "{}", instr.opcode)?;
    if !instr.immediate.is_none() {
        write!(f, " {}", instr.immediate)?;
    }
    Ok(())
}

/// Write one folded tree, operands indented below their operator.
fn write_tree(f: &mut fmt::Formatter<'_>, root: &Instruction, depth: usize) -> fmt::Result {
    enum Task<'a> {
        Open(&'a Instruction, usize),
        Close,
    }

    let mut tasks = vec![Task::Open(root, depth)];
    while let Some(task) = tasks.pop() {
        match task {
            Task::Open(instr, depth) => {
                write!(f, "\n{}(", INDENT.repeat(depth))?;
                write_instruction(f, instr)?;
                tasks.push(Task::Close);
                tasks.extend(instr.operands.iter().rev().map(|op| Task::Open(op, depth + 1)));
            }
            Task::Close => write!(f, ")")?,
        }
    }
    Ok(())
}
