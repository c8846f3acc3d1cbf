//! A WebAssembly decoder, validator and interpreter written in Rust.
//!
//! webasm takes a module through the whole pipeline: binary decoding or text
//! (WAT) parsing into one shared AST, identifier resolution, validation, and
//! execution by an AST-walking interpreter with an explicit frame stack.
//!
//! # Modules
//!
//! - [`parser`] -- Binary format decoder, LEB128 and IEEE 754 codecs.
//! - [`wat`] -- Text format parser producing the same AST.
//! - [`encoder`] -- Binary format encoder for resolved modules.
//! - [`ast`] -- Node model, traversal, and the compile-time transforms.
//! - [`validation`] -- Import ordering, stack type checking, constant
//!   expressions and export rules.
//! - [`runtime`] -- Store, memory, tables, the interpreter and instances.
//! - [`error`] -- The [`Error`] type and its [`ErrorKind`] categories.
//! - [`config`] -- [`EngineConfig`].
//!
//! # Example
//!
//! Parse a WAT module, instantiate it, and call an exported function:
//!
//! ```
//! use webasm::config::EngineConfig;
//! use webasm::runtime::{ImportObject, Value};
//!
//! let source = r#"
//!     (module
//!         (func (export "add") (param i32 i32) (result i32)
//!             get_local 0
//!             get_local 1
//!             i32.add))
//! "#;
//!
//! let result = webasm::instantiate_from_source(source, &ImportObject::new(), &EngineConfig::default()).unwrap();
//! let sum = result.instance.invoke("add", &[Value::I32(2), Value::I32(3)]).unwrap();
//! assert_eq!(sum, vec![Value::I32(5)]);
//! ```

pub mod ast;
pub mod config;
pub mod encoder;
pub mod error;
pub mod parser;
pub mod runtime;
pub mod validation;
pub mod wat;

pub use config::EngineConfig;
pub use error::{Error, ErrorKind};

use ast::{transform, Module, Node, Program};
use log::debug;
use runtime::{ImportObject, Instance};
use validation::CompileError;

/// A compiled module together with its instance.
#[derive(Debug, Clone)]
pub struct Instantiated {
    pub module: Module,
    pub instance: Instance,
}

/// Decodes a binary module without validating it.
pub fn decode(bytes: &[u8], config: &EngineConfig) -> Result<Program, Error> {
    Ok(parser::decode(bytes, &config.decoder)?)
}

/// Parses a text module without validating it.
pub fn parse(source: &str) -> Result<Program, Error> {
    Ok(wat::parse(source)?)
}

/// Validates a decoded or parsed program.
pub fn validate(program: &Program) -> Result<(), Error> {
    let mut program = program.clone();
    transform::run(&mut program).map_err(CompileError::from)?;
    validation::validate(&program)?;
    Ok(())
}

/// Decodes and validates a binary module.
pub fn compile(bytes: &[u8], config: &EngineConfig) -> Result<Module, Error> {
    compile_program(decode(bytes, config)?)
}

/// Parses and validates a text module.
pub fn compile_source(source: &str) -> Result<Module, Error> {
    compile_program(parse(source)?)
}

fn compile_program(mut program: Program) -> Result<Module, Error> {
    transform::run(&mut program).map_err(CompileError::from)?;
    validation::validate(&program)?;
    let module = program
        .body
        .into_iter()
        .find_map(|node| match node {
            Node::Module(module) => Some(module),
            _ => None,
        })
        .ok_or(CompileError::NoModule)?;
    debug!("compiled module with {} fields", module.fields.len());
    Ok(module)
}

/// Compiles a binary module and instantiates it against `imports`.
pub fn instantiate(bytes: &[u8], imports: &ImportObject, config: &EngineConfig) -> Result<Instantiated, Error> {
    let module = compile(bytes, config)?;
    let instance = Instance::new(&module, imports, config)?;
    Ok(Instantiated { module, instance })
}

/// Compiles a text module and instantiates it against `imports`.
pub fn instantiate_from_source(
    source: &str,
    imports: &ImportObject,
    config: &EngineConfig,
) -> Result<Instantiated, Error> {
    let module = compile_source(source)?;
    let instance = Instance::new(&module, imports, config)?;
    Ok(Instantiated { module, instance })
}
