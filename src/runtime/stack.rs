//! Operand stack shared by every frame of one execution
//!
//! Structured instructions and function activations push a label sentinel
//! below the values they produce. Branches find their target by counting
//! sentinels backwards from the top, so values forwarded between labels never
//! confuse the nesting depth.

use super::{RuntimeError, Value};
use crate::ast::Valtype;

/// A label sentinel: how many values a branch to it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label {
    pub arity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StackEntry {
    Value(Value),
    Label(Label),
}

#[derive(Debug, Default)]
pub struct Stack {
    entries: Vec<StackEntry>,
}

impl Stack {
    pub fn new() -> Self {
        Stack { entries: Vec::new() }
    }

    pub fn push(&mut self, value: Value) {
        self.entries.push(StackEntry::Value(value));
    }

    pub fn push_all(&mut self, values: impl IntoIterator<Item = Value>) {
        self.entries.extend(values.into_iter().map(StackEntry::Value));
    }

    pub fn push_label(&mut self, arity: usize) {
        self.entries.push(StackEntry::Label(Label { arity }));
    }

    /// Pop a value; a label on top counts as underflow.
    pub fn pop(&mut self) -> Result<Value, RuntimeError> {
        match self.entries.last() {
            Some(StackEntry::Value(_)) => match self.entries.pop() {
                Some(StackEntry::Value(value)) => Ok(value),
                _ => Err(RuntimeError::StackUnderflow),
            },
            _ => Err(RuntimeError::StackUnderflow),
        }
    }

    /// Pop a value and check its type
    pub fn pop_typed(&mut self, expected: Valtype) -> Result<Value, RuntimeError> {
        let value = self.pop()?;
        if value.typ() != expected {
            return Err(RuntimeError::TypeMismatch {
                expected: expected.to_string(),
                actual: value.typ().to_string(),
            });
        }
        Ok(value)
    }

    /// Pops `n` values, returned in push order.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, RuntimeError> {
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            values.push(self.pop()?);
        }
        values.reverse();
        Ok(values)
    }

    /// Pops one value per type, checking each, returned in push order.
    pub fn pop_types(&mut self, types: &[Valtype]) -> Result<Vec<Value>, RuntimeError> {
        let mut values = Vec::with_capacity(types.len());
        for t in types.iter().rev() {
            values.push(self.pop_typed(*t)?);
        }
        values.reverse();
        Ok(values)
    }

    pub fn pop_i32(&mut self) -> Result<i32, RuntimeError> {
        match self.pop_typed(Valtype::I32)? {
            Value::I32(v) => Ok(v),
            _ => Err(RuntimeError::StackUnderflow),
        }
    }

    pub fn pop_i64(&mut self) -> Result<i64, RuntimeError> {
        match self.pop_typed(Valtype::I64)? {
            Value::I64(v) => Ok(v),
            _ => Err(RuntimeError::StackUnderflow),
        }
    }

    pub fn pop_f32(&mut self) -> Result<f32, RuntimeError> {
        match self.pop_typed(Valtype::F32)? {
            Value::F32(v) => Ok(v),
            _ => Err(RuntimeError::StackUnderflow),
        }
    }

    pub fn pop_f64(&mut self) -> Result<f64, RuntimeError> {
        match self.pop_typed(Valtype::F64)? {
            Value::F64(v) => Ok(v),
            _ => Err(RuntimeError::StackUnderflow),
        }
    }

    pub fn peek(&self) -> Option<&Value> {
        match self.entries.last() {
            Some(StackEntry::Value(value)) => Some(value),
            _ => None,
        }
    }

    /// Position and sentinel of the `depth`-th label from the top (0 is the
    /// innermost).
    pub fn find_label(&self, depth: u32) -> Option<(usize, Label)> {
        self.entries
            .iter()
            .enumerate()
            .rev()
            .filter_map(|(position, entry)| match entry {
                StackEntry::Label(label) => Some((position, *label)),
                StackEntry::Value(_) => None,
            })
            .nth(depth as usize)
    }

    /// Leaves the `arity` topmost values in place of the innermost label and
    /// everything above it.
    pub fn exit_label(&mut self, arity: usize) -> Result<(), RuntimeError> {
        let results = self.pop_n(arity)?;
        let (position, _) = self.find_label(0).ok_or(RuntimeError::LabelNotFound(0))?;
        self.entries.truncate(position);
        self.push_all(results);
        Ok(())
    }

    /// Unwinds to the `depth`-th label carrying its arity of values. The
    /// label itself is removed unless `keep_label` (a branch back to a loop).
    pub fn branch(&mut self, depth: u32, keep_label: bool) -> Result<Label, RuntimeError> {
        let (position, label) = self.find_label(depth).ok_or(RuntimeError::LabelNotFound(depth))?;
        let results = self.pop_n(label.arity)?;
        self.entries.truncate(position);
        if keep_label {
            self.entries.push(StackEntry::Label(label));
        }
        self.push_all(results);
        Ok(label)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn labels(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry, StackEntry::Label(_)))
            .count()
    }
}
