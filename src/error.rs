//! Top-level error type of the embedding surface.
//!
//! Each stage keeps its own error type; [`Error`] wraps them and
//! [`Error::kind`] tells a host which category a failure belongs to, so a
//! test driver can tell "trapped" apart from "failed to compile".

use crate::parser::DecodeError;
use crate::runtime::{LinkError, RuntimeError};
use crate::validation::CompileError;
use crate::wat::ParseError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed binary or text input.
    Format,
    /// Well-formed but invalid module.
    Compile,
    /// Imports or exports incompatible with the host.
    Link,
    /// Abrupt termination of a running program.
    Trap,
    Runtime,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Format => "format error",
            ErrorKind::Compile => "compile error",
            ErrorKind::Link => "link error",
            ErrorKind::Trap => "trap",
            ErrorKind::Runtime => "runtime error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Decode(_) | Error::Parse(_) => ErrorKind::Format,
            Error::Compile(_) => ErrorKind::Compile,
            Error::Link(_) => ErrorKind::Link,
            Error::Runtime(err) if err.is_trap() => ErrorKind::Trap,
            Error::Runtime(_) => ErrorKind::Runtime,
        }
    }

    pub fn is_trap(&self) -> bool {
        self.kind() == ErrorKind::Trap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::DecodeErrorKind;
    use crate::runtime::TrapKind;
    use rstest::rstest;

    #[rstest]
    #[case(DecodeError { kind: DecodeErrorKind::MagicHeader, offset: 0 }.into(), ErrorKind::Format)]
    #[case(CompileError::MultipleStart.into(), ErrorKind::Compile)]
    #[case(LinkError::I64GlobalExport.into(), ErrorKind::Link)]
    #[case(RuntimeError::Trap(TrapKind::Unreachable).into(), ErrorKind::Trap)]
    #[case(RuntimeError::CallStackOverflow.into(), ErrorKind::Runtime)]
    fn kinds(#[case] error: Error, #[case] kind: ErrorKind) {
        assert_eq!(error.kind(), kind);
    }

    #[test]
    fn messages_pass_through() {
        let error: Error = RuntimeError::Trap(TrapKind::OutOfBounds).into();
        assert_eq!(error.to_string(), "Execution has been trapped: out of bounds memory access");
        assert!(error.is_trap());

        let error: Error = DecodeError {
            kind: DecodeErrorKind::MagicHeader,
            offset: 0,
        }
        .into();
        assert!(error.to_string().contains("magic header"));
    }
}
