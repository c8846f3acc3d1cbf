//! Integer operators for `i32` and `i64`, keyed by operator name.
//!
//! Arithmetic wraps modulo 2^N. Division traps on a zero divisor, and signed
//! division also traps on the one quotient that does not fit (`MIN / -1`).
//! Shift and rotate counts are taken modulo the bit width.

use crate::runtime::{RuntimeError, TrapKind, Value};

macro_rules! integer_ops {
    ($unop:ident, $binop:ident, $signed:ty, $unsigned:ty, $variant:ident) => {
        /// `clz`, `ctz`, `popcnt` and `eqz`.
        pub fn $unop(name: &str, a: $signed) -> Result<Value, RuntimeError> {
            let result = match name {
                "clz" => a.leading_zeros() as $signed,
                "ctz" => a.trailing_zeros() as $signed,
                "popcnt" => a.count_ones() as $signed,
                "eqz" => return Ok(Value::I32((a == 0) as i32)),
                other => return Err(RuntimeError::UnknownInstruction(other.to_string())),
            };
            Ok(Value::$variant(result))
        }

        /// Arithmetic, bitwise and comparison operators. Comparisons produce
        /// an `i32` 0 or 1.
        pub fn $binop(name: &str, a: $signed, b: $signed) -> Result<Value, RuntimeError> {
            let (ua, ub) = (a as $unsigned, b as $unsigned);
            let result = match name {
                "add" => a.wrapping_add(b),
                "sub" => a.wrapping_sub(b),
                "mul" => a.wrapping_mul(b),
                "div_s" => {
                    if b == 0 {
                        return Err(TrapKind::DivideByZero.into());
                    }
                    if a == <$signed>::MIN && b == -1 {
                        return Err(TrapKind::IntegerOverflow.into());
                    }
                    a / b
                }
                "div_u" => {
                    if b == 0 {
                        return Err(TrapKind::DivideByZero.into());
                    }
                    (ua / ub) as $signed
                }
                "rem_s" => {
                    if b == 0 {
                        return Err(TrapKind::DivideByZero.into());
                    }
                    a.wrapping_rem(b)
                }
                "rem_u" => {
                    if b == 0 {
                        return Err(TrapKind::DivideByZero.into());
                    }
                    (ua % ub) as $signed
                }
                "and" => a & b,
                "or" => a | b,
                "xor" => a ^ b,
                "shl" => a.wrapping_shl(b as u32),
                "shr_s" => a.wrapping_shr(b as u32),
                "shr_u" => ua.wrapping_shr(b as u32) as $signed,
                "rotl" => a.rotate_left(b as u32),
                "rotr" => a.rotate_right(b as u32),
                _ => return compare(name, a, b, ua, ub),
            };
            Ok(Value::$variant(result))
        }
    };
}

integer_ops!(i32_unop, i32_binop, i32, u32, I32);
integer_ops!(i64_unop, i64_binop, i64, u64, I64);

fn compare<S: PartialOrd, U: PartialOrd>(name: &str, a: S, b: S, ua: U, ub: U) -> Result<Value, RuntimeError> {
    let result = match name {
        "eq" => a == b,
        "ne" => a != b,
        "lt_s" => a < b,
        "lt_u" => ua < ub,
        "gt_s" => a > b,
        "gt_u" => ua > ub,
        "le_s" => a <= b,
        "le_u" => ua <= ub,
        "ge_s" => a >= b,
        "ge_u" => ua >= ub,
        other => return Err(RuntimeError::UnknownInstruction(other.to_string())),
    };
    Ok(Value::I32(result as i32))
}
