//! Type conversion operators, the `to.op/from` instructions.
//!
//! Conversions include:
//! - Integer width conversions (`wrap`, `extend_s`, `extend_u`)
//! - Float width conversions (`promote`, `demote`)
//! - Integer to float conversions (`convert_s`, `convert_u`)
//! - Float to integer truncation (`trunc_s`, `trunc_u`), which traps
//! - Reinterpretation (bit casting)

use crate::ast::Valtype;
use crate::runtime::{RuntimeError, TrapKind, Value};

/// Converts `value` to `to` with operator `op`, e.g. `(I32, "trunc_s", F64(..))`
/// for `i32.trunc_s/f64`.
pub fn convert(to: Valtype, op: &str, value: Value) -> Result<Value, RuntimeError> {
    let result = match (to, op, value) {
        (Valtype::I32, "wrap", Value::I64(v)) => Value::I32(v as i32),
        (Valtype::I64, "extend_s", Value::I32(v)) => Value::I64(v as i64),
        (Valtype::I64, "extend_u", Value::I32(v)) => Value::I64(v as u32 as i64),

        (Valtype::I32, "trunc_s", v) => Value::I32(truncate(v, -2147483649.0, 2147483648.0)? as i32),
        (Valtype::I32, "trunc_u", v) => Value::I32(truncate(v, -1.0, 4294967296.0)? as u32 as i32),
        (Valtype::I64, "trunc_s", v) => {
            let t = truncate(v, -9223372036854777856.0, 9223372036854775808.0)?;
            Value::I64(t as i64)
        }
        (Valtype::I64, "trunc_u", v) => {
            let t = truncate(v, -1.0, 18446744073709551616.0)?;
            Value::I64(t as u64 as i64)
        }

        (Valtype::F32, "convert_s", Value::I32(v)) => Value::F32(v as f32),
        (Valtype::F32, "convert_u", Value::I32(v)) => Value::F32(v as u32 as f32),
        (Valtype::F32, "convert_s", Value::I64(v)) => Value::F32(v as f32),
        (Valtype::F32, "convert_u", Value::I64(v)) => Value::F32(v as u64 as f32),
        (Valtype::F64, "convert_s", Value::I32(v)) => Value::F64(v as f64),
        (Valtype::F64, "convert_u", Value::I32(v)) => Value::F64(v as u32 as f64),
        (Valtype::F64, "convert_s", Value::I64(v)) => Value::F64(v as f64),
        (Valtype::F64, "convert_u", Value::I64(v)) => Value::F64(v as u64 as f64),

        (Valtype::F32, "demote", Value::F64(v)) => Value::F32(v as f32),
        (Valtype::F64, "promote", Value::F32(v)) => Value::F64(v as f64),

        (Valtype::I32, "reinterpret", Value::F32(v)) => Value::I32(v.to_bits() as i32),
        (Valtype::I64, "reinterpret", Value::F64(v)) => Value::I64(v.to_bits() as i64),
        (Valtype::F32, "reinterpret", Value::I32(v)) => Value::F32(f32::from_bits(v as u32)),
        (Valtype::F64, "reinterpret", Value::I64(v)) => Value::F64(f64::from_bits(v as u64)),

        (to, op, value) => {
            return Err(RuntimeError::UnknownInstruction(format!(
                "{}.{}/{}",
                to,
                op,
                value.typ()
            )))
        }
    };
    Ok(result)
}

/// Truncates a float towards zero, trapping unless the result lies strictly
/// between `lower` and `upper`. Both bounds are exact in `f64`.
fn truncate(value: Value, lower: f64, upper: f64) -> Result<f64, RuntimeError> {
    let v = match value {
        Value::F32(v) => v as f64,
        Value::F64(v) => v,
        other => {
            return Err(RuntimeError::TypeMismatch {
                expected: "f32 or f64".to_string(),
                actual: other.typ().to_string(),
            })
        }
    };
    if v.is_nan() {
        return Err(TrapKind::InvalidConversion.into());
    }
    let t = v.trunc();
    if t <= lower || t >= upper {
        return Err(TrapKind::IntegerOverflow.into());
    }
    Ok(t)
}
