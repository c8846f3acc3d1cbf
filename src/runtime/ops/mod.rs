//! Numeric instruction implementations
//!
//! Operators are looked up by the instruction's object type and name, the
//! way they appear in the text format (`i32.add`, `f64.convert_s/i64`).
//! Structural instructions are handled by the executor itself.

pub mod conversion;
pub mod float;
pub mod integer;

use crate::ast::Valtype;
use crate::runtime::stack::Stack;
use crate::runtime::{RuntimeError, Value};
use crate::validation::signatures;

/// Executes the numeric instruction `object.name` against `stack`.
pub fn execute(object: Valtype, name: &str, stack: &mut Stack) -> Result<(), RuntimeError> {
    let signature = signatures::numeric(object, name)
        .ok_or_else(|| unsupported(object, name))?;

    let result = if let Some(slash) = name.find('/') {
        let value = stack.pop_typed(signature.args[0])?;
        conversion::convert(object, &name[..slash], value)?
    } else {
        match signature.args.len() {
            1 => unop(name, stack.pop_typed(object)?)?,
            2 => {
                let b = stack.pop_typed(object)?;
                let a = stack.pop_typed(object)?;
                binop(object, name, a, b)?
            }
            _ => return Err(unsupported(object, name)),
        }
    };
    stack.push(result);
    Ok(())
}

fn unop(name: &str, a: Value) -> Result<Value, RuntimeError> {
    match a {
        Value::I32(a) => integer::i32_unop(name, a),
        Value::I64(a) => integer::i64_unop(name, a),
        Value::F32(a) => float::f32_unop(name, a),
        Value::F64(a) => float::f64_unop(name, a),
    }
}

fn binop(object: Valtype, name: &str, a: Value, b: Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::I32(a), Value::I32(b)) => integer::i32_binop(name, a, b),
        (Value::I64(a), Value::I64(b)) => integer::i64_binop(name, a, b),
        (Value::F32(a), Value::F32(b)) => float::f32_binop(name, a, b),
        (Value::F64(a), Value::F64(b)) => float::f64_binop(name, a, b),
        _ => Err(unsupported(object, name)),
    }
}

fn unsupported(object: Valtype, name: &str) -> RuntimeError {
    RuntimeError::UnknownInstruction(format!("{}.{}", object, name))
}
