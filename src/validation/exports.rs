//! Module-level rules on imports, exports and the start function.

use super::context::ModuleContext;
use super::CompileError;
use crate::ast::*;
use std::collections::HashSet;

pub fn check(module: &Module, ctx: &ModuleContext) -> Result<(), CompileError> {
    let mut names = HashSet::new();
    let mut starts = 0;

    for field in module.fields.iter() {
        match field {
            Node::ModuleImport(import) => {
                if let ImportDescr::GlobalType(global_type) = &import.descr {
                    if global_type.mutability == Mutability::Var {
                        return Err(CompileError::MutableGlobalImport);
                    }
                }
            }
            Node::ModuleExport(export) => {
                if !names.insert(export.name.as_str()) {
                    return Err(CompileError::DuplicateExport(export.name.clone()));
                }
                if export.descr.export_type == ExportType::Global {
                    if let Some(index) = export.descr.id.number() {
                        if ctx.is_mutable_global(index) {
                            return Err(CompileError::MutableGlobalExport);
                        }
                    }
                }
            }
            Node::Start(start) => {
                starts += 1;
                if starts > 1 {
                    return Err(CompileError::MultipleStart);
                }
                check_start(start, ctx)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_start(start: &Start, ctx: &ModuleContext) -> Result<(), CompileError> {
    let index = start
        .index
        .number()
        .ok_or_else(|| CompileError::UnknownFunction(start.index.to_string()))?;
    let func = ctx
        .get_function(index)
        .ok_or_else(|| CompileError::UnknownFunction(index.to_string()))?;
    if !func.args.is_empty() || !func.result.is_empty() {
        return Err(CompileError::StartSignature);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::transform;
    use crate::wat;
    use rstest::rstest;

    fn check_source(source: &str) -> Result<(), CompileError> {
        let mut program = wat::parse(source).unwrap();
        transform::run(&mut program).unwrap();
        let module = program.module().unwrap();
        check(module, &ModuleContext::from_module(module))
    }

    #[test]
    fn valid_module() {
        let source = r#"(global $g i32 (i32.const 1))
            (func $f)
            (export "f" (func $f))
            (export "g" (global $g))
            (start $f)"#;
        assert_eq!(check_source(source), Ok(()));
    }

    #[rstest]
    #[case(r#"(func $f) (export "a" (func $f)) (export "a" (func $f))"#, CompileError::DuplicateExport("a".to_string()))]
    #[case(r#"(import "env" "g" (global (mut i32)))"#, CompileError::MutableGlobalImport)]
    #[case(r#"(global $g (mut i32) (i32.const 0)) (export "g" (global $g))"#, CompileError::MutableGlobalExport)]
    #[case("(func $f) (start $f) (start $f)", CompileError::MultipleStart)]
    #[case("(func $f (param i32)) (start $f)", CompileError::StartSignature)]
    #[case("(func $f (result i32) (i32.const 0)) (start $f)", CompileError::StartSignature)]
    #[case("(start 3)", CompileError::UnknownFunction("3".to_string()))]
    fn rejected(#[case] source: &str, #[case] expected: CompileError) {
        assert_eq!(check_source(source), Err(expected));
    }
}
