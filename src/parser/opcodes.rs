//! The MVP opcode table.
//!
//! Mnemonics use the original MVP spelling (`get_local`, `i32.wrap/i64`,
//! `current_memory`); [`normalize_mnemonic`] maps the later spelling onto it.

use crate::ast::Valtype;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// How the bytes following an opcode are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Immediate {
    None,
    /// A block type followed by a nested instruction sequence.
    Block,
    /// One u32 index (local, global, label or function).
    Index,
    BrTable,
    CallIndirect,
    MemArg,
    /// The reserved zero byte of `current_memory` / `grow_memory`.
    MemoryReserved,
    I32,
    I64,
    F32,
    F64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub byte: u8,
    /// Full mnemonic, e.g. `i32.add`.
    pub mnemonic: &'static str,
    /// Mnemonic without its type prefix.
    pub name: &'static str,
    pub object: Option<Valtype>,
    pub immediate: Immediate,
}

const MNEMONICS: &[(u8, &str)] = &[
    (0x00, "unreachable"),
    (0x01, "nop"),
    (0x02, "block"),
    (0x03, "loop"),
    (0x04, "if"),
    (0x05, "else"),
    (0x0b, "end"),
    (0x0c, "br"),
    (0x0d, "br_if"),
    (0x0e, "br_table"),
    (0x0f, "return"),
    (0x10, "call"),
    (0x11, "call_indirect"),
    (0x1a, "drop"),
    (0x1b, "select"),
    (0x20, "get_local"),
    (0x21, "set_local"),
    (0x22, "tee_local"),
    (0x23, "get_global"),
    (0x24, "set_global"),
    (0x28, "i32.load"),
    (0x29, "i64.load"),
    (0x2a, "f32.load"),
    (0x2b, "f64.load"),
    (0x2c, "i32.load8_s"),
    (0x2d, "i32.load8_u"),
    (0x2e, "i32.load16_s"),
    (0x2f, "i32.load16_u"),
    (0x30, "i64.load8_s"),
    (0x31, "i64.load8_u"),
    (0x32, "i64.load16_s"),
    (0x33, "i64.load16_u"),
    (0x34, "i64.load32_s"),
    (0x35, "i64.load32_u"),
    (0x36, "i32.store"),
    (0x37, "i64.store"),
    (0x38, "f32.store"),
    (0x39, "f64.store"),
    (0x3a, "i32.store8"),
    (0x3b, "i32.store16"),
    (0x3c, "i64.store8"),
    (0x3d, "i64.store16"),
    (0x3e, "i64.store32"),
    (0x3f, "current_memory"),
    (0x40, "grow_memory"),
    (0x41, "i32.const"),
    (0x42, "i64.const"),
    (0x43, "f32.const"),
    (0x44, "f64.const"),
    (0x45, "i32.eqz"),
    (0x46, "i32.eq"),
    (0x47, "i32.ne"),
    (0x48, "i32.lt_s"),
    (0x49, "i32.lt_u"),
    (0x4a, "i32.gt_s"),
    (0x4b, "i32.gt_u"),
    (0x4c, "i32.le_s"),
    (0x4d, "i32.le_u"),
    (0x4e, "i32.ge_s"),
    (0x4f, "i32.ge_u"),
    (0x50, "i64.eqz"),
    (0x51, "i64.eq"),
    (0x52, "i64.ne"),
    (0x53, "i64.lt_s"),
    (0x54, "i64.lt_u"),
    (0x55, "i64.gt_s"),
    (0x56, "i64.gt_u"),
    (0x57, "i64.le_s"),
    (0x58, "i64.le_u"),
    (0x59, "i64.ge_s"),
    (0x5a, "i64.ge_u"),
    (0x5b, "f32.eq"),
    (0x5c, "f32.ne"),
    (0x5d, "f32.lt"),
    (0x5e, "f32.gt"),
    (0x5f, "f32.le"),
    (0x60, "f32.ge"),
    (0x61, "f64.eq"),
    (0x62, "f64.ne"),
    (0x63, "f64.lt"),
    (0x64, "f64.gt"),
    (0x65, "f64.le"),
    (0x66, "f64.ge"),
    (0x67, "i32.clz"),
    (0x68, "i32.ctz"),
    (0x69, "i32.popcnt"),
    (0x6a, "i32.add"),
    (0x6b, "i32.sub"),
    (0x6c, "i32.mul"),
    (0x6d, "i32.div_s"),
    (0x6e, "i32.div_u"),
    (0x6f, "i32.rem_s"),
    (0x70, "i32.rem_u"),
    (0x71, "i32.and"),
    (0x72, "i32.or"),
    (0x73, "i32.xor"),
    (0x74, "i32.shl"),
    (0x75, "i32.shr_s"),
    (0x76, "i32.shr_u"),
    (0x77, "i32.rotl"),
    (0x78, "i32.rotr"),
    (0x79, "i64.clz"),
    (0x7a, "i64.ctz"),
    (0x7b, "i64.popcnt"),
    (0x7c, "i64.add"),
    (0x7d, "i64.sub"),
    (0x7e, "i64.mul"),
    (0x7f, "i64.div_s"),
    (0x80, "i64.div_u"),
    (0x81, "i64.rem_s"),
    (0x82, "i64.rem_u"),
    (0x83, "i64.and"),
    (0x84, "i64.or"),
    (0x85, "i64.xor"),
    (0x86, "i64.shl"),
    (0x87, "i64.shr_s"),
    (0x88, "i64.shr_u"),
    (0x89, "i64.rotl"),
    (0x8a, "i64.rotr"),
    (0x8b, "f32.abs"),
    (0x8c, "f32.neg"),
    (0x8d, "f32.ceil"),
    (0x8e, "f32.floor"),
    (0x8f, "f32.trunc"),
    (0x90, "f32.nearest"),
    (0x91, "f32.sqrt"),
    (0x92, "f32.add"),
    (0x93, "f32.sub"),
    (0x94, "f32.mul"),
    (0x95, "f32.div"),
    (0x96, "f32.min"),
    (0x97, "f32.max"),
    (0x98, "f32.copysign"),
    (0x99, "f64.abs"),
    (0x9a, "f64.neg"),
    (0x9b, "f64.ceil"),
    (0x9c, "f64.floor"),
    (0x9d, "f64.trunc"),
    (0x9e, "f64.nearest"),
    (0x9f, "f64.sqrt"),
    (0xa0, "f64.add"),
    (0xa1, "f64.sub"),
    (0xa2, "f64.mul"),
    (0xa3, "f64.div"),
    (0xa4, "f64.min"),
    (0xa5, "f64.max"),
    (0xa6, "f64.copysign"),
    (0xa7, "i32.wrap/i64"),
    (0xa8, "i32.trunc_s/f32"),
    (0xa9, "i32.trunc_u/f32"),
    (0xaa, "i32.trunc_s/f64"),
    (0xab, "i32.trunc_u/f64"),
    (0xac, "i64.extend_s/i32"),
    (0xad, "i64.extend_u/i32"),
    (0xae, "i64.trunc_s/f32"),
    (0xaf, "i64.trunc_u/f32"),
    (0xb0, "i64.trunc_s/f64"),
    (0xb1, "i64.trunc_u/f64"),
    (0xb2, "f32.convert_s/i32"),
    (0xb3, "f32.convert_u/i32"),
    (0xb4, "f32.convert_s/i64"),
    (0xb5, "f32.convert_u/i64"),
    (0xb6, "f32.demote/f64"),
    (0xb7, "f64.convert_s/i32"),
    (0xb8, "f64.convert_u/i32"),
    (0xb9, "f64.convert_s/i64"),
    (0xba, "f64.convert_u/i64"),
    (0xbb, "f64.promote/f32"),
    (0xbc, "i32.reinterpret/f32"),
    (0xbd, "i64.reinterpret/f64"),
    (0xbe, "f32.reinterpret/i32"),
    (0xbf, "f64.reinterpret/i64"),
];

fn immediate_for(byte: u8) -> Immediate {
    match byte {
        0x02..=0x04 => Immediate::Block,
        0x0c | 0x0d | 0x10 | 0x20..=0x24 => Immediate::Index,
        0x0e => Immediate::BrTable,
        0x11 => Immediate::CallIndirect,
        0x28..=0x3e => Immediate::MemArg,
        0x3f | 0x40 => Immediate::MemoryReserved,
        0x41 => Immediate::I32,
        0x42 => Immediate::I64,
        0x43 => Immediate::F32,
        0x44 => Immediate::F64,
        _ => Immediate::None,
    }
}

fn build(byte: u8, mnemonic: &'static str) -> Opcode {
    let (object, name) = match mnemonic.find('.') {
        Some(dot) => match Valtype::from_name(&mnemonic[..dot]) {
            Some(object) => (Some(object), &mnemonic[dot + 1..]),
            None => (None, mnemonic),
        },
        None => (None, mnemonic),
    };
    Opcode {
        byte,
        mnemonic,
        name,
        object,
        immediate: immediate_for(byte),
    }
}

static BY_BYTE: Lazy<HashMap<u8, Opcode>> = Lazy::new(|| {
    MNEMONICS
        .iter()
        .map(|&(byte, mnemonic)| (byte, build(byte, mnemonic)))
        .collect()
});

static BY_MNEMONIC: Lazy<HashMap<&'static str, Opcode>> = Lazy::new(|| {
    MNEMONICS
        .iter()
        .map(|&(byte, mnemonic)| (mnemonic, build(byte, mnemonic)))
        .collect()
});

pub fn by_byte(byte: u8) -> Option<&'static Opcode> {
    BY_BYTE.get(&byte)
}

/// Looks up either spelling of a mnemonic.
pub fn by_mnemonic(mnemonic: &str) -> Option<&'static Opcode> {
    BY_MNEMONIC.get(normalize_mnemonic(mnemonic).as_str())
}

const SIGNED_CONVERSIONS: &[&str] = &["trunc", "extend", "convert"];
const PLAIN_CONVERSIONS: &[&str] = &["wrap", "demote", "promote", "reinterpret"];

/// Rewrites the post-MVP spelling of an instruction (`local.get`,
/// `i32.wrap_i64`, `f32.convert_i32_s`, `memory.grow`) into the MVP spelling.
/// Anything else is returned unchanged.
pub fn normalize_mnemonic(mnemonic: &str) -> String {
    match mnemonic {
        "local.get" => return "get_local".to_string(),
        "local.set" => return "set_local".to_string(),
        "local.tee" => return "tee_local".to_string(),
        "global.get" => return "get_global".to_string(),
        "global.set" => return "set_global".to_string(),
        "memory.size" => return "current_memory".to_string(),
        "memory.grow" => return "grow_memory".to_string(),
        _ => {}
    }

    let (object, op) = match mnemonic.find('.') {
        Some(dot) => (&mnemonic[..dot], &mnemonic[dot + 1..]),
        None => return mnemonic.to_string(),
    };
    let parts: Vec<&str> = op.split('_').collect();
    match parts.as_slice() {
        [base, from, sign]
            if SIGNED_CONVERSIONS.contains(base)
                && Valtype::from_name(from).is_some()
                && (*sign == "s" || *sign == "u") =>
        {
            format!("{object}.{base}_{sign}/{from}")
        }
        [base, from] if PLAIN_CONVERSIONS.contains(base) && Valtype::from_name(from).is_some() => {
            format!("{object}.{base}/{from}")
        }
        _ => mnemonic.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn table_is_consistent() {
        for &(byte, mnemonic) in MNEMONICS {
            let op = by_byte(byte).unwrap();
            assert_eq!(op.mnemonic, mnemonic);
            assert_eq!(by_mnemonic(mnemonic).unwrap().byte, byte);
        }
    }

    #[test]
    fn splits_object() {
        let op = by_byte(0xa7).unwrap();
        assert_eq!(op.object, Some(Valtype::I32));
        assert_eq!(op.name, "wrap/i64");
        let op = by_byte(0x20).unwrap();
        assert_eq!(op.object, None);
        assert_eq!(op.immediate, Immediate::Index);
    }

    #[rstest]
    #[case("local.get", "get_local")]
    #[case("global.set", "set_global")]
    #[case("memory.grow", "grow_memory")]
    #[case("i32.wrap_i64", "i32.wrap/i64")]
    #[case("i32.trunc_f32_s", "i32.trunc_s/f32")]
    #[case("i64.extend_i32_u", "i64.extend_u/i32")]
    #[case("f64.convert_i64_s", "f64.convert_s/i64")]
    #[case("f32.demote_f64", "f32.demote/f64")]
    #[case("i64.reinterpret_f64", "i64.reinterpret/f64")]
    #[case("i32.add", "i32.add")]
    #[case("i32.load8_s", "i32.load8_s")]
    #[case("i32.trunc_s/f32", "i32.trunc_s/f32")]
    fn normalizes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_mnemonic(input), expected);
    }

    #[test]
    fn unknown_bytes() {
        assert!(by_byte(0x06).is_none());
        assert!(by_byte(0xfc).is_none());
    }
}
