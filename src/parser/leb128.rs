//! LEB128 variable-length integer decoding.
//!
//! Every decoder takes a byte window and returns a [`Decoded`] carrying the value
//! and `next_index`, the number of *input* bytes consumed. Callers advance their
//! cursor by exactly that amount.
//!
//! 64-bit values are decoded exactly into native `i64`/`u64`; the AST keeps them as
//! a [`LongNumber`] high/low pair so no path ever routes them through a float.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LebError {
    #[error("unexpected end")]
    UnexpectedEnd,
    #[error("integer representation too long")]
    TooLong,
    #[error("integer too large")]
    TooLarge,
}

/// Result of decoding one LEB128 number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded<T> {
    pub value: T,
    pub next_index: usize,
}

/// A 64-bit integer split into two 32-bit halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongNumber {
    pub high: i32,
    pub low: u32,
}

impl LongNumber {
    pub fn to_i64(self) -> i64 {
        ((self.high as i64) << 32) | self.low as i64
    }
}

impl From<i64> for LongNumber {
    fn from(v: i64) -> Self {
        LongNumber {
            high: (v >> 32) as i32,
            low: v as u32,
        }
    }
}

fn max_bytes(bits: u32) -> usize {
    ((bits + 6) / 7) as usize
}

fn decode_unsigned(bytes: &[u8], bits: u32) -> Result<Decoded<u64>, LebError> {
    let limit = max_bytes(bits);
    let mut result: u64 = 0;
    let mut shift = 0u32;

    for (i, &byte) in bytes.iter().enumerate() {
        if i >= limit {
            return Err(LebError::TooLong);
        }
        let payload = (byte & 0x7f) as u64;
        if i == limit - 1 {
            // bits beyond the target width must be zero
            let used = bits - shift;
            if used < 7 && payload >> used != 0 {
                return Err(LebError::TooLarge);
            }
        }
        result |= payload << shift;
        if byte & 0x80 == 0 {
            return Ok(Decoded {
                value: result,
                next_index: i + 1,
            });
        }
        shift += 7;
    }

    Err(LebError::UnexpectedEnd)
}

fn decode_signed(bytes: &[u8], bits: u32) -> Result<Decoded<i64>, LebError> {
    let limit = max_bytes(bits);
    let mut result: i64 = 0;
    let mut shift = 0u32;

    for (i, &byte) in bytes.iter().enumerate() {
        if i >= limit {
            return Err(LebError::TooLong);
        }
        let payload = (byte & 0x7f) as i64;
        if i == limit - 1 {
            // unused high bits must replicate the sign bit
            let used = bits - shift;
            if used < 7 {
                let sign_and_unused = (byte & 0x7f) >> (used - 1);
                let all_ones = 0x7f >> (used - 1);
                if sign_and_unused != 0 && sign_and_unused != all_ones {
                    return Err(LebError::TooLarge);
                }
            }
        }
        result |= payload << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            if shift < 64 && byte & 0x40 != 0 {
                result |= -1i64 << shift;
            }
            return Ok(Decoded {
                value: result,
                next_index: i + 1,
            });
        }
    }

    Err(LebError::UnexpectedEnd)
}

pub fn decode_u32(bytes: &[u8]) -> Result<Decoded<u32>, LebError> {
    decode_unsigned(bytes, 32).map(|d| Decoded {
        value: d.value as u32,
        next_index: d.next_index,
    })
}

pub fn decode_u64(bytes: &[u8]) -> Result<Decoded<u64>, LebError> {
    decode_unsigned(bytes, 64)
}

pub fn decode_i32(bytes: &[u8]) -> Result<Decoded<i32>, LebError> {
    decode_signed(bytes, 32).map(|d| Decoded {
        value: d.value as i32,
        next_index: d.next_index,
    })
}

pub fn decode_i64(bytes: &[u8]) -> Result<Decoded<i64>, LebError> {
    decode_signed(bytes, 64)
}

/// Signed 64-bit decode returning the high/low pair stored in literal nodes.
pub fn decode_i64_long(bytes: &[u8]) -> Result<Decoded<LongNumber>, LebError> {
    decode_i64(bytes).map(|d| Decoded {
        value: LongNumber::from(d.value),
        next_index: d.next_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::encoding::{write_vs32, write_vs64, write_vu32};
    use rand::Rng;
    use rstest::rstest;

    #[rstest]
    #[case(vec![0x00], 0, 1)]
    #[case(vec![0x7f], 127, 1)]
    #[case(vec![0x80, 0x7f], 16256, 2)]
    #[case(vec![0xe5, 0x8e, 0x26], 624485, 3)]
    #[case(vec![0xff, 0xff, 0xff, 0xff, 0x0f], 0xffffffff, 5)]
    #[case(vec![0x80, 0x80, 0x80, 0x80, 0x08], 0x80000000, 5)]
    #[case(vec![0x01, 0xaa, 0xbb], 1, 1)]
    fn decodes_u32(#[case] bytes: Vec<u8>, #[case] value: u32, #[case] next: usize) {
        let decoded = decode_u32(&bytes).unwrap();
        assert_eq!(decoded.value, value);
        assert_eq!(decoded.next_index, next);
    }

    #[rstest]
    #[case(vec![0x7f], -1)]
    #[case(vec![0x80, 0x7f], -128)]
    #[case(vec![0x9b, 0xf1, 0x59], -624485)]
    #[case(vec![0x80, 0x80, 0x80, 0x80, 0x78], i32::MIN)]
    #[case(vec![0xff, 0xff, 0xff, 0xff, 0x07], i32::MAX)]
    fn decodes_i32(#[case] bytes: Vec<u8>, #[case] value: i32) {
        assert_eq!(decode_i32(&bytes).unwrap().value, value);
    }

    #[test]
    fn rejects_overlong_and_truncated() {
        assert_eq!(decode_u32(&[0x80, 0x80]), Err(LebError::UnexpectedEnd));
        assert_eq!(
            decode_u32(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x00]),
            Err(LebError::TooLong)
        );
        assert_eq!(
            decode_u32(&[0xff, 0xff, 0xff, 0xff, 0x1f]),
            Err(LebError::TooLarge)
        );
        assert_eq!(
            decode_i32(&[0xff, 0xff, 0xff, 0xff, 0x4f]),
            Err(LebError::TooLarge)
        );
    }

    #[test]
    fn i64_keeps_full_precision() {
        let mut buf = Vec::new();
        write_vs64(&mut buf, i64::MAX - 1);
        let decoded = decode_i64_long(&buf).unwrap();
        assert_eq!(decoded.value.to_i64(), i64::MAX - 1);
        assert_eq!(decoded.next_index, buf.len());

        let pair = LongNumber::from(-2i64);
        assert_eq!(pair.high, -1);
        assert_eq!(pair.low, 0xffff_fffe);
    }

    #[test]
    fn unsigned_decode_consumes_minimal_encoding() {
        let mut rng = rand::thread_rng();
        let mut values = vec![0u32, 1, 127, 128, u32::MAX];
        for _ in 0..200 {
            values.push(rng.gen::<u32>());
        }
        for n in values {
            let mut buf = Vec::new();
            write_vu32(&mut buf, n);
            let decoded = decode_u32(&buf).unwrap();
            assert_eq!(decoded.value, n);
            assert_eq!(decoded.next_index, buf.len());
        }
    }

    #[test]
    fn signed_decode_sign_extends() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let n = rng.gen::<i32>();
            let mut buf = Vec::new();
            write_vs32(&mut buf, n);
            assert_eq!(decode_i32(&buf).unwrap().value, n);
        }
    }
}
