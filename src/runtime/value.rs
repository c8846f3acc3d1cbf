//! WebAssembly value representation

use super::RuntimeError;
use crate::ast::{FloatLiteral, Node, Valtype};
use fhex::ToHex;
use std::fmt;

/// Runtime representation of WebAssembly values
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    /// Get the WebAssembly type of this value
    pub fn typ(&self) -> Valtype {
        match self {
            Value::I32(_) => Valtype::I32,
            Value::I64(_) => Valtype::I64,
            Value::F32(_) => Valtype::F32,
            Value::F64(_) => Valtype::F64,
        }
    }

    /// The zero value locals and globals start from.
    pub fn default_for(valtype: Valtype) -> Self {
        match valtype {
            Valtype::I32 => Value::I32(0),
            Valtype::I64 => Value::I64(0),
            Valtype::F32 => Value::F32(0.0),
            Valtype::F64 => Value::F64(0.0),
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Builds the operand of `<valtype>.const` from its literal. Float
    /// literals keep their exact bits, NaN payloads included.
    pub fn from_literal(valtype: Valtype, literal: &Node) -> Result<Self, RuntimeError> {
        let value = match (valtype, literal) {
            (Valtype::I32, Node::NumberLiteral(n)) => Value::I32(n.as_i32()),
            (Valtype::I64, Node::NumberLiteral(n)) => Value::I64(n.value),
            (Valtype::I64, Node::LongNumberLiteral(n)) => Value::I64(n.value.to_i64()),
            (Valtype::F32, Node::FloatLiteral(f)) => Value::F32(f32_of(f)),
            (Valtype::F64, Node::FloatLiteral(f)) => Value::F64(f64::from_bits(f.to_f64_bits())),
            (Valtype::F32, Node::NumberLiteral(n)) => Value::F32(n.value as f32),
            (Valtype::F64, Node::NumberLiteral(n)) => Value::F64(n.value as f64),
            (_, other) => {
                return Err(RuntimeError::TypeMismatch {
                    expected: format!("{} literal", valtype),
                    actual: other.kind().name().to_string(),
                })
            }
        };
        Ok(value)
    }

    /// Coerces a host-supplied value to `valtype`, as values crossing the
    /// host boundary are not typed by the caller.
    pub fn cast(self, valtype: Valtype) -> Self {
        match (self, valtype) {
            (v, t) if v.typ() == t => v,
            (Value::I32(v), Valtype::I64) => Value::I64(v as i64),
            (Value::I32(v), Valtype::F32) => Value::F32(v as f32),
            (Value::I32(v), Valtype::F64) => Value::F64(v as f64),
            (Value::I64(v), Valtype::I32) => Value::I32(v as i32),
            (Value::I64(v), Valtype::F32) => Value::F32(v as f32),
            (Value::I64(v), Valtype::F64) => Value::F64(v as f64),
            (Value::F32(v), Valtype::I32) => Value::I32(v as i32),
            (Value::F32(v), Valtype::I64) => Value::I64(v as i64),
            (Value::F32(v), Valtype::F64) => Value::F64(v as f64),
            (Value::F64(v), Valtype::I32) => Value::I32(v as i32),
            (Value::F64(v), Valtype::I64) => Value::I64(v as i64),
            (Value::F64(v), Valtype::F32) => Value::F32(v as f32),
            (v, _) => v,
        }
    }
}

fn f32_of(literal: &FloatLiteral) -> f32 {
    f32::from_bits(literal.to_f32_bits())
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "i32:{}", v),
            Value::I64(v) => write!(f, "i64:{}", v),
            Value::F32(v) => write!(f, "f32:{}", v.to_hex()),
            Value::F64(v) => write!(f, "f64:{}", v.to_hex()),
        }
    }
}
