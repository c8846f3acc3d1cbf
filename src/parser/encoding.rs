//! Binary format constants and the encoders used to assemble modules.
//!
//! The decoder never needs to write bytes, but the encoders are what the tests
//! (and any tooling built on the crate) use to produce well-formed binaries.

use byteorder::{ByteOrder, LittleEndian};

pub const MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];
pub const VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

pub const SECTION_CUSTOM: u8 = 0;
pub const SECTION_TYPE: u8 = 1;
pub const SECTION_IMPORT: u8 = 2;
pub const SECTION_FUNCTION: u8 = 3;
pub const SECTION_TABLE: u8 = 4;
pub const SECTION_MEMORY: u8 = 5;
pub const SECTION_GLOBAL: u8 = 6;
pub const SECTION_EXPORT: u8 = 7;
pub const SECTION_START: u8 = 8;
pub const SECTION_ELEMENT: u8 = 9;
pub const SECTION_CODE: u8 = 10;
pub const SECTION_DATA: u8 = 11;

pub const TYPE_FUNC: u8 = 0x60;
pub const TYPE_ANYFUNC: u8 = 0x70;

pub const VALTYPE_I32: u8 = 0x7f;
pub const VALTYPE_I64: u8 = 0x7e;
pub const VALTYPE_F32: u8 = 0x7d;
pub const VALTYPE_F64: u8 = 0x7c;

pub const DESC_FUNC: u8 = 0x00;
pub const DESC_TABLE: u8 = 0x01;
pub const DESC_MEMORY: u8 = 0x02;
pub const DESC_GLOBAL: u8 = 0x03;

pub const MUT_CONST: u8 = 0x00;
pub const MUT_VAR: u8 = 0x01;

pub const LIMITS_MIN: u8 = 0x00;
pub const LIMITS_MIN_MAX: u8 = 0x01;

pub const OP_BLOCK: u8 = 0x02;
pub const OP_LOOP: u8 = 0x03;
pub const OP_IF: u8 = 0x04;
pub const OP_ELSE: u8 = 0x05;
pub const OP_END: u8 = 0x0B;
pub const OP_CALL: u8 = 0x10;
pub const OP_CALL_INDIRECT: u8 = 0x11;

pub const BLOCK_TYPE_EMPTY: u8 = 0x40;

pub const NAME_SUBSECTION_MODULE: u8 = 0;
pub const NAME_SUBSECTION_FUNCTIONS: u8 = 1;
pub const NAME_SUBSECTION_LOCALS: u8 = 2;

fn write_vu(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn write_vs(buf: &mut Vec<u8>, mut value: i64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

pub fn write_vu32(buf: &mut Vec<u8>, v: u32) {
    write_vu(buf, v as u64);
}

pub fn write_vu64(buf: &mut Vec<u8>, v: u64) {
    write_vu(buf, v);
}

pub fn write_vs32(buf: &mut Vec<u8>, v: i32) {
    write_vs(buf, v as i64);
}

pub fn write_vs64(buf: &mut Vec<u8>, v: i64) {
    write_vs(buf, v);
}

pub fn write_f32(buf: &mut Vec<u8>, v: f32) {
    write_f32_bits(buf, v.to_bits());
}

pub fn write_f64(buf: &mut Vec<u8>, v: f64) {
    write_f64_bits(buf, v.to_bits());
}

/// Writes a raw bit pattern, keeping NaN payloads intact.
pub fn write_f32_bits(buf: &mut Vec<u8>, bits: u32) {
    let mut bytes = [0u8; 4];
    LittleEndian::write_u32(&mut bytes, bits);
    buf.extend_from_slice(&bytes);
}

pub fn write_f64_bits(buf: &mut Vec<u8>, bits: u64) {
    let mut bytes = [0u8; 8];
    LittleEndian::write_u64(&mut bytes, bits);
    buf.extend_from_slice(&bytes);
}

/// Length-prefixed byte vector.
pub fn write_u8vec(buf: &mut Vec<u8>, v: &[u8]) {
    write_vu32(buf, v.len() as u32);
    buf.extend_from_slice(v);
}

pub fn write_name(buf: &mut Vec<u8>, name: &str) {
    write_u8vec(buf, name.as_bytes());
}

/// Appends `id`, the body size and the body itself.
pub fn write_section(buf: &mut Vec<u8>, id: u8, body: &[u8]) {
    buf.push(id);
    write_u8vec(buf, body);
}

/// Magic header followed by version 1.
pub fn module_preamble() -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&VERSION);
    buf
}
