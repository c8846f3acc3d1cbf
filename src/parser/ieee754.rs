//! IEEE 754 decoding for little-endian 4 and 8 byte buffers.
//!
//! The value is rebuilt from its raw bits, so NaN payloads, signed zero and the
//! sign of infinity all survive decoding.

use byteorder::{ByteOrder, LittleEndian};

pub const NUMBER_OF_BYTE_F32: usize = 4;
pub const NUMBER_OF_BYTE_F64: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedFloat<T> {
    pub value: T,
    pub nan: bool,
    pub inf: bool,
    pub next_index: usize,
}

/// Decodes an f32, or `None` if fewer than four bytes are available.
pub fn decode_f32(bytes: &[u8]) -> Option<DecodedFloat<f32>> {
    if bytes.len() < NUMBER_OF_BYTE_F32 {
        return None;
    }
    let value = f32::from_bits(LittleEndian::read_u32(&bytes[..NUMBER_OF_BYTE_F32]));
    Some(DecodedFloat {
        value,
        nan: value.is_nan(),
        inf: value.is_infinite(),
        next_index: NUMBER_OF_BYTE_F32,
    })
}

/// Decodes an f64, or `None` if fewer than eight bytes are available.
pub fn decode_f64(bytes: &[u8]) -> Option<DecodedFloat<f64>> {
    if bytes.len() < NUMBER_OF_BYTE_F64 {
        return None;
    }
    let value = f64::from_bits(LittleEndian::read_u64(&bytes[..NUMBER_OF_BYTE_F64]));
    Some(DecodedFloat {
        value,
        nan: value.is_nan(),
        inf: value.is_infinite(),
        next_index: NUMBER_OF_BYTE_F64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_nan_payload() {
        let decoded = decode_f32(&[0x01, 0x00, 0xc0, 0x7f]).unwrap();
        assert!(decoded.nan);
        assert!(!decoded.inf);
        assert_eq!(decoded.value.to_bits(), 0x7fc0_0001);
        assert_eq!(decoded.next_index, 4);
    }

    #[test]
    fn keeps_signs() {
        let neg_inf = decode_f64(&[0, 0, 0, 0, 0, 0, 0xf0, 0xff]).unwrap();
        assert!(neg_inf.inf);
        assert!(neg_inf.value.is_sign_negative());

        let neg_zero = decode_f32(&[0, 0, 0, 0x80]).unwrap();
        assert_eq!(neg_zero.value.to_bits(), 0x8000_0000);
    }

    #[test]
    fn short_buffers() {
        assert!(decode_f32(&[0, 0, 0]).is_none());
        assert!(decode_f64(&[0; 7]).is_none());
    }
}
