//! Floating point operators for `f32` and `f64`, keyed by operator name.
//!
//! `abs`, `neg` and `copysign` only touch the sign bit so NaN payloads pass
//! through unchanged. `min` and `max` propagate NaN and order `-0` below `+0`.

use crate::runtime::{RuntimeError, Value};

macro_rules! float_ops {
    ($unop:ident, $binop:ident, $float:ty, $bits:ty, $variant:ident) => {
        pub fn $unop(name: &str, a: $float) -> Result<Value, RuntimeError> {
            let sign: $bits = 1 << (<$bits>::BITS - 1);
            let result = match name {
                "abs" => <$float>::from_bits(a.to_bits() & !sign),
                "neg" => <$float>::from_bits(a.to_bits() ^ sign),
                "sqrt" => a.sqrt(),
                "ceil" => a.ceil(),
                "floor" => a.floor(),
                "trunc" => a.trunc(),
                "nearest" => {
                    if (a - a.trunc()).abs() == 0.5 {
                        2.0 * (a / 2.0).round()
                    } else {
                        a.round()
                    }
                }
                other => return Err(RuntimeError::UnknownInstruction(other.to_string())),
            };
            Ok(Value::$variant(result))
        }

        /// Arithmetic and comparison operators. Comparisons produce an
        /// `i32` 0 or 1.
        pub fn $binop(name: &str, a: $float, b: $float) -> Result<Value, RuntimeError> {
            let sign: $bits = 1 << (<$bits>::BITS - 1);
            let result = match name {
                "add" => a + b,
                "sub" => a - b,
                "mul" => a * b,
                "div" => a / b,
                "min" => {
                    if a.is_nan() || b.is_nan() {
                        <$float>::NAN
                    } else if a == b {
                        <$float>::from_bits(a.to_bits() | b.to_bits())
                    } else {
                        a.min(b)
                    }
                }
                "max" => {
                    if a.is_nan() || b.is_nan() {
                        <$float>::NAN
                    } else if a == b {
                        <$float>::from_bits(a.to_bits() & b.to_bits())
                    } else {
                        a.max(b)
                    }
                }
                "copysign" => <$float>::from_bits((a.to_bits() & !sign) | (b.to_bits() & sign)),
                "eq" => return Ok(Value::I32((a == b) as i32)),
                "ne" => return Ok(Value::I32((a != b) as i32)),
                "lt" => return Ok(Value::I32((a < b) as i32)),
                "gt" => return Ok(Value::I32((a > b) as i32)),
                "le" => return Ok(Value::I32((a <= b) as i32)),
                "ge" => return Ok(Value::I32((a >= b) as i32)),
                other => return Err(RuntimeError::UnknownInstruction(other.to_string())),
            };
            Ok(Value::$variant(result))
        }
    };
}

float_ops!(f32_unop, f32_binop, f32, u32, F32);
float_ops!(f64_unop, f64_binop, f64, u64, F64);
