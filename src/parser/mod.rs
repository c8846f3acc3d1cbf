//! Binary format: number codecs, the opcode table and the module decoder.

pub mod decoder;
pub mod encoding;
pub mod ieee754;
pub mod leb128;
pub mod opcodes;
pub mod reader;

pub use decoder::decode;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Deepest nesting of `block`/`loop`/`if` either decoder accepts.
pub const MAX_NESTING: usize = 256;

/// Knobs for [`decode`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderOptions {
    /// Emit a `trace!` line for every decoded item.
    pub dump: bool,
    pub ignore_code_section: bool,
    pub ignore_data_section: bool,
    pub ignore_custom_name_section: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeErrorKind {
    #[error("unexpected end")]
    UnexpectedEnd,
    #[error("magic header not detected")]
    MagicHeader,
    #[error("unknown binary version")]
    UnknownVersion,
    #[error("{0}")]
    Leb(leb128::LebError),
    #[error("Unexpected section: {0:#x}")]
    UnexpectedSection(u8),
    #[error("Unexpected instruction: {0:#x}")]
    UnexpectedInstruction(u8),
    #[error("function signature not found ({0})")]
    SignatureNotFound(u32),
    #[error("call_indirect signature not found ({0})")]
    CallIndirectSignatureNotFound(u32),
    #[error("func {0:#x} code not found")]
    CodeNotFound(usize),
    #[error("zero flag expected")]
    ZeroFlagExpected,
    #[error("entry not found at index {index} in {section} section")]
    EntryNotFound { index: u32, section: &'static str },
    #[error("Unexpected valtype: {0:#x}")]
    UnexpectedValtype(u8),
    #[error("Unexpected blocktype: {0:#x}")]
    UnexpectedBlocktype(u8),
    #[error("Invalid mutability: {0:#x}")]
    InvalidMutability(u8),
    #[error("Unsupported type: {0:#x}")]
    UnsupportedType(u8),
    #[error("Unknown import description type: {0:#x}")]
    UnknownImportKind(u8),
    #[error("Unknown export description type: {0:#x}")]
    UnknownExportKind(u8),
    #[error("Unknown element type in table: {0:#x}")]
    UnknownElementType(u8),
    #[error("Unknown limit type: {0:#x}")]
    UnknownLimitType(u8),
    #[error("data section offset must be a single instruction")]
    DataOffset,
    #[error("too many locals")]
    TooManyLocals,
    #[error("blocks nested deeper than {0}")]
    NestingTooDeep(usize),
    #[error("invalid UTF-8 encoding")]
    InvalidUtf8,
    #[error("{what} size mismatch: expected to end at {declared:#x}, ended at {consumed:#x}")]
    SizeMismatch {
        what: &'static str,
        declared: usize,
        consumed: usize,
    },
}

/// A decoding failure and the byte offset it was detected at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub offset: usize,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at offset {:#x})", self.kind, self.offset)
    }
}

impl std::error::Error for DecodeError {}
