//! Global initializers must be constant expressions.
//!
//! An initializer may only use `*.const`, `end` and `get_global` of an
//! immutable global, and must produce exactly one value of the global's
//! declared type. Failures
//! are fatal since the global could not be given an initial value.

use super::context::ModuleContext;
use super::CompileError;
use crate::ast::*;

pub fn check(module: &Module, ctx: &ModuleContext) -> Result<(), CompileError> {
    for field in module.fields.iter() {
        if let Node::Global(global) = field {
            check_global(global, ctx)?;
        }
    }
    Ok(())
}

fn check_global(global: &Global, ctx: &ModuleContext) -> Result<(), CompileError> {
    let mut produced = Vec::new();
    for instr in global.init.iter() {
        let instr = match instr {
            Node::Instr(instr) => instr,
            _ => return Err(CompileError::ConstantExpressionRequired),
        };
        match (instr.object, instr.id.as_str()) {
            (Some(object), "const") => produced.push(object),
            (None, "end") => {}
            (None, "get_global") => {
                let index = match instr.args.first() {
                    Some(Node::NumberLiteral(n)) => n.as_u32(),
                    _ => return Err(CompileError::ConstantExpressionRequired),
                };
                match ctx.get_global(index) {
                    Some(entry) if entry.mutability == Mutability::Const => produced.push(entry.valtype),
                    _ => return Err(CompileError::ConstantExpressionRequired),
                }
            }
            _ => return Err(CompileError::ConstantExpressionRequired),
        }
    }

    let expected = global.global_type.valtype;
    match produced.as_slice() {
        [found] if *found == expected => Ok(()),
        [] => Err(CompileError::TypeMismatch {
            expected: expected.to_string(),
            found: "none".to_string(),
        }),
        found => Err(CompileError::TypeMismatch {
            expected: expected.to_string(),
            found: found.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", "),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::transform;
    use crate::wat;

    fn check_source(source: &str) -> Result<(), CompileError> {
        let mut program = wat::parse(source).unwrap();
        transform::run(&mut program).unwrap();
        let module = program.module().unwrap();
        check(module, &ModuleContext::from_module(module))
    }

    #[test]
    fn constants_pass() {
        assert!(check_source("(global i32 (i32.const 7)) (global $x f64 (f64.const 1.5))").is_ok());
    }

    #[test]
    fn immutable_global_reference_passes() {
        assert!(check_source("(global $a i32 (i32.const 7)) (global $b (mut i32) (get_global $a))").is_ok());
    }

    #[test]
    fn mutable_global_reference_fails() {
        let err = check_source("(global $a (mut i32) (i32.const 7)) (global $b (mut i32) (get_global $a))").unwrap_err();
        assert_eq!(err, CompileError::ConstantExpressionRequired);
        assert!(err.to_string().starts_with("constant expression required"));
    }

    #[test]
    fn non_constant_instruction_fails() {
        let err = check_source("(global i32 (i32.add (i32.const 1) (i32.const 2)))").unwrap_err();
        assert_eq!(err, CompileError::ConstantExpressionRequired);
    }

    #[test]
    fn initializer_must_produce_one_value() {
        let err = check_source("(global i32 (i32.const 1) (i32.const 2))").unwrap_err();
        assert_eq!(
            err,
            CompileError::TypeMismatch {
                expected: "i32".to_string(),
                found: "i32, i32".to_string()
            }
        );

        let err = check_source("(global $a i64 (i64.const 1)) (global i64 (get_global $a) (i64.const 2))").unwrap_err();
        assert!(err.to_string().ends_with("found i64, i64"), "{}", err);

        let err = check_source("(global f32)").unwrap_err();
        assert!(err.to_string().ends_with("found none"), "{}", err);
    }

    #[test]
    fn wrong_type_fails() {
        let err = check_source("(global i32 (i64.const 1))").unwrap_err();
        assert_eq!(
            err,
            CompileError::TypeMismatch {
                expected: "i32".to_string(),
                found: "i64".to_string()
            }
        );
    }
}
