use super::ieee754::{self, DecodedFloat};
use super::leb128::{self, LebError, LongNumber};
use super::{DecodeError, DecodeErrorKind};

/// Byte cursor over a binary module. Every read either advances past exactly
/// the bytes it consumed or fails with the offset it failed at.
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, pos: 0 }
    }
}

impl<'a> Reader<'a> {
    // Basic operations --------------------------------------------------------
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    pub fn has_at_least(&self, count: usize) -> bool {
        self.remaining() >= count
    }

    pub fn error(&self, kind: DecodeErrorKind) -> DecodeError {
        DecodeError {
            kind,
            offset: self.pos,
        }
    }

    pub fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        if !self.has_at_least(len) {
            return Err(self.error(DecodeErrorKind::UnexpectedEnd));
        }
        self.pos += len;
        Ok(())
    }

    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        match self.bytes.get(self.pos) {
            Some(&byte) => {
                self.pos += 1;
                Ok(byte)
            }
            None => Err(self.error(DecodeErrorKind::UnexpectedEnd)),
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if !self.has_at_least(len) {
            return Err(self.error(DecodeErrorKind::UnexpectedEnd));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn window(&self) -> &'a [u8] {
        &self.bytes[self.pos.min(self.bytes.len())..]
    }

    fn leb<T>(
        &mut self,
        decode: fn(&[u8]) -> Result<leb128::Decoded<T>, LebError>,
    ) -> Result<T, DecodeError> {
        match decode(self.window()) {
            Ok(decoded) => {
                self.pos += decoded.next_index;
                Ok(decoded.value)
            }
            Err(LebError::UnexpectedEnd) => Err(self.error(DecodeErrorKind::UnexpectedEnd)),
            Err(e) => Err(self.error(DecodeErrorKind::Leb(e))),
        }
    }

    // Read and interpret types ------------------------------------------------

    pub fn read_vu32(&mut self) -> Result<u32, DecodeError> {
        self.leb(leb128::decode_u32)
    }

    pub fn read_vu64(&mut self) -> Result<u64, DecodeError> {
        self.leb(leb128::decode_u64)
    }

    pub fn read_vs32(&mut self) -> Result<i32, DecodeError> {
        self.leb(leb128::decode_i32)
    }

    pub fn read_vs64(&mut self) -> Result<i64, DecodeError> {
        self.leb(leb128::decode_i64)
    }

    pub fn read_vs64_long(&mut self) -> Result<LongNumber, DecodeError> {
        self.leb(leb128::decode_i64_long)
    }

    pub fn read_f32(&mut self) -> Result<DecodedFloat<f32>, DecodeError> {
        let decoded =
            ieee754::decode_f32(self.window()).ok_or_else(|| self.error(DecodeErrorKind::UnexpectedEnd))?;
        self.pos += decoded.next_index;
        Ok(decoded)
    }

    pub fn read_f64(&mut self) -> Result<DecodedFloat<f64>, DecodeError> {
        let decoded =
            ieee754::decode_f64(self.window()).ok_or_else(|| self.error(DecodeErrorKind::UnexpectedEnd))?;
        self.pos += decoded.next_index;
        Ok(decoded)
    }

    /// A length-prefixed UTF-8 string.
    pub fn read_name(&mut self) -> Result<String, DecodeError> {
        let len = self.read_vu32()? as usize;
        let start = self.pos;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError {
            kind: DecodeErrorKind::InvalidUtf8,
            offset: start,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::encoding;

    #[test]
    fn reads_advance_by_consumed_bytes() {
        let mut buf = vec![];
        encoding::write_vu32(&mut buf, 624485);
        encoding::write_vs32(&mut buf, -1);
        encoding::write_name(&mut buf, "add");
        encoding::write_f32(&mut buf, 1.5);

        let mut reader = Reader::new(&buf);
        assert_eq!(reader.read_vu32().unwrap(), 624485);
        assert_eq!(reader.pos(), 3);
        assert_eq!(reader.read_vs32().unwrap(), -1);
        assert_eq!(reader.read_name().unwrap(), "add");
        assert_eq!(reader.read_f32().unwrap().value, 1.5);
        assert!(reader.is_eof());
    }

    #[test]
    fn truncated_input_reports_offset() {
        let buf = [0x80, 0x80];
        let mut reader = Reader::new(&buf);
        let err = reader.read_vu32().unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::UnexpectedEnd);
        assert_eq!(err.offset, 0);

        let mut reader = Reader::new(&buf);
        assert!(reader.read_bytes(3).is_err());
        assert_eq!(reader.pos(), 0);
    }

    #[test]
    fn invalid_utf8_name() {
        let buf = [0x02, 0xff, 0xfe];
        let mut reader = Reader::new(&buf);
        assert_eq!(
            reader.read_name().unwrap_err().kind,
            DecodeErrorKind::InvalidUtf8
        );
    }
}
