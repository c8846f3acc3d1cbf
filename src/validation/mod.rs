//! Static validation of a module before instantiation.
//!
//! Two kinds of failure come out of here. Import ordering and stack typing
//! problems are collected over the whole module and reported together as
//! [`CompileError::Validation`]. The remaining rules (constant initializers,
//! exports, the start function) stop at the first violation.
//!
//! Validation expects a module that has been through
//! [`transform::run`](crate::ast::transform::run), so every signature is inline
//! and every index numeric.

pub mod const_expr;
pub mod context;
pub mod exports;
pub mod import_order;
pub mod signatures;
pub mod type_checker;

pub use context::{FuncFrame, FuncType, GlobalEntry, ModuleContext};

use crate::ast::transform::{Space, TransformError};
use crate::ast::{Module, Program};
use log::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("Validation errors:\n{}", .0.join("\n"))]
    Validation(Vec<String>),
    #[error("constant expression required: initializer expression cannot reference mutable global")]
    ConstantExpressionRequired,
    #[error("type mismatch in constant expression: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("Duplicate export name \"{0}\"")]
    DuplicateExport(String),
    #[error("Multiple start functions is not allowed")]
    MultipleStart,
    #[error("Start function can not have arguments or results")]
    StartSignature,
    #[error("Mutable globals cannot be imported")]
    MutableGlobalImport,
    #[error("Mutable globals cannot be exported")]
    MutableGlobalExport,
    #[error("unknown {space} ${name}")]
    UnresolvedIdentifier { space: Space, name: String },
    #[error("A type instruction reference was not found: {0}")]
    UnknownType(String),
    #[error("Unknown import {module}.{name}")]
    UnknownImport { module: String, name: String },
    #[error("Unknown function {0}")]
    UnknownFunction(String),
    #[error("Unknown table {0}")]
    UnknownTable(u32),
    #[error("Unknown memory {0}")]
    UnknownMemory(u32),
    #[error("Program does not contain a module")]
    NoModule,
}

impl From<TransformError> for CompileError {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::UnresolvedIdentifier { space, name } => CompileError::UnresolvedIdentifier { space, name },
            TransformError::UnknownType(reference) => CompileError::UnknownType(reference),
        }
    }
}

/// Validates every module of `program`.
pub fn validate(program: &Program) -> Result<(), CompileError> {
    for node in program.body.iter() {
        if let crate::ast::Node::Module(module) = node {
            validate_module(module)?;
        }
    }
    Ok(())
}

pub fn validate_module(module: &Module) -> Result<(), CompileError> {
    let ctx = ModuleContext::from_module(module);

    let mut errors = import_order::check(module);
    errors.extend(type_checker::check_module(module, &ctx));
    if !errors.is_empty() {
        debug!("{} validation errors", errors.len());
        return Err(CompileError::Validation(errors));
    }

    const_expr::check(module, &ctx)?;
    exports::check(module, &ctx)?;
    Ok(())
}
