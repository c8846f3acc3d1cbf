//! WebAssembly runtime implementation
//!
//! This module provides the execution engine for validated modules: the
//! store that owns every runtime object, the operand stack, linear memory and
//! tables, and the interpreter that runs function bodies straight off the
//! AST.

pub mod eval;
pub mod executor;
pub mod frame;
pub mod imports;
pub mod instance;
pub mod memory;
pub mod ops;
pub mod stack;
pub mod store;
pub mod table;
pub mod value;

pub use imports::{ImportObject, ImportValue};
pub use instance::{Export, Instance};
pub use memory::Memory;
pub use store::{Addr, FuncInstance, GlobalInstance, HostFunc, InstanceAddr, SharedStore, Store};
pub use table::Table;
pub use value::Value;

use std::fmt;

/// Why execution trapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    Unreachable,
    OutOfBounds,
    DivideByZero,
    IntegerOverflow,
    InvalidConversion,
    UndefinedElement,
    IndirectCallTypeMismatch,
}

impl fmt::Display for TrapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            TrapKind::Unreachable => "unreachable",
            TrapKind::OutOfBounds => "out of bounds memory access",
            TrapKind::DivideByZero => "integer divide by zero",
            TrapKind::IntegerOverflow => "integer overflow",
            TrapKind::InvalidConversion => "invalid conversion to integer",
            TrapKind::UndefinedElement => "undefined element",
            TrapKind::IndirectCallTypeMismatch => "indirect call type mismatch",
        };
        f.write_str(message)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("Execution has been trapped: {0}")]
    Trap(TrapKind),
    #[error("Stack underflow")]
    StackUnderflow,
    #[error("Internal failure: expected value of type {expected} on top of the stack, type given: {actual}")]
    TypeMismatch { expected: String, actual: String },
    #[error("Maximum call stack depth reached")]
    CallStackOverflow,
    #[error("unknown memory")]
    UnknownMemory,
    #[error("unknown table")]
    UnknownTable,
    #[error("Label {0} not found on the stack")]
    LabelNotFound(u32),
    #[error("Function {index} called with {given} arguments but {expected} expected")]
    ArityMismatch { index: usize, given: usize, expected: usize },
    #[error("Internal failure: unresolved identifier ${0} reached the interpreter")]
    UnresolvedIdentifier(String),
    #[error("Invalid address: no {kind} at address {addr}")]
    InvalidAddress { kind: &'static str, addr: usize },
    #[error("No function was found in module at address {0}")]
    UnknownFunction(u32),
    #[error("Module does not have global {0}")]
    UnknownGlobal(u32),
    #[error("Function does not have local {0}")]
    UnknownLocal(u32),
    #[error("global is immutable")]
    ImmutableGlobal,
    #[error("expected the system to be little-endian")]
    BigEndianHost,
    #[error("Unknown instruction {0}")]
    UnknownInstruction(String),
    #[error("Unknown export {0}")]
    UnknownExport(String),
    #[error("Export {0} is not a function")]
    NotAFunction(String),
    #[error("data segment offsets can only be specified as constants or globals")]
    InvalidConstExpr,
    #[error("Memory error: {0}")]
    MemoryError(String),
    #[error("Host function failed: {0}")]
    Host(String),
    #[error("Store is in use: a host function cannot re-enter the store it was called from")]
    StoreInUse,
}

impl RuntimeError {
    pub fn is_trap(&self) -> bool {
        matches!(self, RuntimeError::Trap(_))
    }
}

impl From<TrapKind> for RuntimeError {
    fn from(kind: TrapKind) -> Self {
        RuntimeError::Trap(kind)
    }
}

/// Failures resolving a module against its imports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("Import {module}.{name} must be a {expected}")]
    ImportKindMismatch {
        module: String,
        name: String,
        expected: &'static str,
    },
    #[error("Import {module}.{name} does not match the declared type")]
    ImportTypeMismatch { module: String, name: String },
    #[error("Export of globals of type i64 is not allowed")]
    I64GlobalExport,
    #[error("Can not call this function from JavaScript: i64 in signature.")]
    I64InSignature,
}
