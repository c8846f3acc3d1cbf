//! Imports must come before every function, global, memory and table
//! definition of the module.

use crate::ast::*;

const MESSAGE: &str = "imports must occur before all non-import definitions";

/// One error per import that follows a definition.
pub fn check(module: &Module) -> Vec<String> {
    let mut defined = false;
    let mut errors = Vec::new();
    for field in module.fields.iter() {
        match field {
            Node::Func(_) | Node::Global(_) | Node::Memory(_) | Node::Table(_) => defined = true,
            Node::ModuleImport(_) if defined => errors.push(MESSAGE.to_string()),
            _ => {}
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wat;
    use rstest::rstest;

    fn count(source: &str) -> usize {
        let program = wat::parse(source).unwrap();
        check(program.module().unwrap()).len()
    }

    #[rstest]
    #[case(r#"(import "a" "b" (func)) (func)"#, 0)]
    #[case(r#"(import "a" "b" (func)) (func) (import "a" "c" (func))"#, 1)]
    #[case(r#"(memory 1) (import "a" "b" (global i32)) (import "a" "c" (func))"#, 2)]
    #[case(r#"(type (func)) (import "a" "b" (func)) (export "x" (func 0))"#, 0)]
    fn ordering(#[case] source: &str, #[case] expected: usize) {
        assert_eq!(count(source), expected);
    }
}
