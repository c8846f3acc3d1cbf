//! Operand and result types of the numeric and memory instructions.
//!
//! Structural instructions (control flow, calls, locals, globals, `drop`,
//! `select`) depend on context and are typed by the checker itself.

use crate::ast::Valtype;
use crate::parser::opcodes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrSignature {
    pub args: Vec<Valtype>,
    pub result: Vec<Valtype>,
}

impl InstrSignature {
    fn new(args: Vec<Valtype>, result: Vec<Valtype>) -> Self {
        InstrSignature { args, result }
    }
}

/// Type names as they appear in the typing rules. `u32` and `u64` are the
/// unsigned views of `i32` and `i64` and type identically to them.
pub fn canonical(name: &str) -> Option<Valtype> {
    match name {
        "u32" => Some(Valtype::I32),
        "u64" => Some(Valtype::I64),
        other => Valtype::from_name(other),
    }
}

const COMPARISONS: &[&str] = &[
    "eq", "ne", "lt", "gt", "le", "ge", "lt_s", "lt_u", "gt_s", "gt_u", "le_s", "le_u", "ge_s", "ge_u",
];

const UNARY: &[&str] = &[
    "clz", "ctz", "popcnt", "abs", "neg", "ceil", "floor", "trunc", "nearest", "sqrt",
];

const BINARY: &[&str] = &[
    "add", "sub", "mul", "div", "div_s", "div_u", "rem_s", "rem_u", "and", "or", "xor", "shl", "shr_s",
    "shr_u", "rotl", "rotr", "min", "max", "copysign",
];

/// Typing of `object.name`, e.g. `(I32, "add")` or `(F32, "convert_s/i64")`.
/// `None` for names this table does not cover and for operators the
/// instruction set does not define on `object` (`f64.eqz`, `i32.sqrt`).
pub fn numeric(object: Valtype, name: &str) -> Option<InstrSignature> {
    opcodes::by_mnemonic(&format!("{}.{}", object, name))?;
    let address = canonical("u32")?;
    let t = object;

    if let Some(slash) = name.find('/') {
        let from = canonical(&name[slash + 1..])?;
        return Some(InstrSignature::new(vec![from], vec![t]));
    }

    let signature = match name {
        "const" => InstrSignature::new(vec![], vec![t]),
        "eqz" => InstrSignature::new(vec![t], vec![Valtype::I32]),
        _ if COMPARISONS.contains(&name) => InstrSignature::new(vec![t, t], vec![Valtype::I32]),
        _ if UNARY.contains(&name) => InstrSignature::new(vec![t], vec![t]),
        _ if BINARY.contains(&name) => InstrSignature::new(vec![t, t], vec![t]),
        _ if name.starts_with("load") => InstrSignature::new(vec![address], vec![t]),
        _ if name.starts_with("store") => InstrSignature::new(vec![address, t], vec![]),
        _ => return None,
    };
    Some(signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use Valtype::*;

    #[rstest]
    #[case(I32, "add", vec![I32, I32], vec![I32])]
    #[case(I64, "lt_u", vec![I64, I64], vec![I32])]
    #[case(I64, "eqz", vec![I64], vec![I32])]
    #[case(F32, "sqrt", vec![F32], vec![F32])]
    #[case(I64, "load32_s", vec![I32], vec![I64])]
    #[case(I64, "store32", vec![I32, I64], vec![])]
    #[case(F64, "min", vec![F64, F64], vec![F64])]
    #[case(F32, "lt", vec![F32, F32], vec![I32])]
    #[case(F64, "store", vec![I32, F64], vec![])]
    #[case(I32, "wrap/i64", vec![I64], vec![I32])]
    #[case(F32, "convert_u/i64", vec![I64], vec![F32])]
    #[case(I32, "trunc_s/f64", vec![F64], vec![I32])]
    fn typing(#[case] object: Valtype, #[case] name: &str, #[case] args: Vec<Valtype>, #[case] result: Vec<Valtype>) {
        assert_eq!(numeric(object, name), Some(InstrSignature { args, result }));
    }

    #[test]
    fn unsigned_aliases() {
        assert_eq!(canonical("u32"), Some(I32));
        assert_eq!(canonical("u64"), Some(I64));
        assert_eq!(canonical("f32"), Some(F32));
        assert_eq!(canonical("v128"), None);
    }

    #[test]
    fn unknown_names() {
        assert_eq!(numeric(I32, "frobnicate"), None);
    }

    #[rstest]
    #[case(F64, "eqz")]
    #[case(F32, "clz")]
    #[case(F64, "popcnt")]
    #[case(F32, "rem_s")]
    #[case(F64, "shl")]
    #[case(F32, "lt_s")]
    #[case(I32, "sqrt")]
    #[case(I64, "min")]
    #[case(I32, "div")]
    #[case(I32, "lt")]
    #[case(F32, "load8_u")]
    #[case(I32, "load32_s")]
    #[case(F64, "store16")]
    #[case(F32, "wrap/i64")]
    #[case(I32, "convert_s/i64")]
    fn operators_are_typed_per_valtype(#[case] object: Valtype, #[case] name: &str) {
        assert_eq!(numeric(object, name), None);
    }
}
