#[cfg(test)]
mod tests {
    use rstest::rstest;
    use webasm::runtime::{ImportObject, Value};
    use webasm::validation::CompileError;
    use webasm::{EngineConfig, Error, ErrorKind};

    fn compile_errors(source: &str) -> Vec<String> {
        match webasm::compile_source(source) {
            Err(Error::Compile(CompileError::Validation(errors))) => errors,
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => vec![],
        }
    }

    #[rstest]
    #[case(r#"(import "a" "b" (func)) (import "a" "c" (func)) (func)"#, 0)]
    #[case(r#"(import "a" "b" (func)) (func) (import "a" "c" (func))"#, 1)]
    #[case(r#"(global i32 (i32.const 0)) (import "a" "b" (func)) (import "a" "c" (memory 1))"#, 2)]
    fn import_ordering(#[case] source: &str, #[case] expected: usize) {
        let errors = compile_errors(source);
        assert_eq!(errors.len(), expected, "{:?}", errors);
        for error in errors {
            assert_eq!(error, "imports must occur before all non-import definitions");
        }
    }

    #[test]
    fn result_type_mismatch_names_both_types() {
        let errors = compile_errors("(func (result i32) (f32.const 1.5))");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("i32"), "{}", errors[0]);
        assert!(errors[0].contains("f32"), "{}", errors[0]);
    }

    #[test]
    fn empty_stack_for_a_result() {
        let errors = compile_errors("(func (result i64))");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("i64"), "{}", errors[0]);
    }

    #[test]
    fn errors_are_reported_together() {
        let err = webasm::compile_source(
            r#"(func (result i32) (i64.const 1))
               (func (result f32) (f64.const 1))
               (import "env" "f" (func))"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compile);
        match err {
            Error::Compile(CompileError::Validation(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected {}", other),
        }
    }

    #[rstest]
    #[case("(func (block (result i32) (i32.const 1)) drop)")]
    #[case("(func (param i32) (result i32) (if (result i32) (get_local 0) (then (i32.const 1)) (else (i32.const 0))))")]
    #[case("(func (result i32) (loop (result i32) (i32.const 1)))")]
    #[case("(func (result i32) (block (br 0)) (i32.const 0))")]
    #[case("(memory 1) (func (i64.store8 (i32.const 0) (i64.const 255)))")]
    #[case("(func (result i32) (i32.wrap/i64 (i64.const 1)))")]
    fn well_typed_modules_compile(#[case] source: &str) {
        assert!(webasm::compile_source(source).is_ok(), "{}", source);
    }

    #[test]
    fn mutable_global_in_initializer() {
        let err = webasm::compile_source("(global $a (mut i32) (i32.const 0)) (global i32 (get_global $a))")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compile);
        assert!(err.to_string().contains("constant expression required"), "{}", err);
    }

    #[test]
    fn immutable_global_in_initializer() {
        let source = r#"(module
            (global $a i32 (i32.const 7))
            (global $b i32 (get_global $a))
            (export "a" (global $a))
            (export "b" (global $b)))"#;
        let result =
            webasm::instantiate_from_source(source, &ImportObject::new(), &EngineConfig::default()).unwrap();
        assert_eq!(result.instance.global("a").unwrap(), Value::I32(7));
        assert_eq!(result.instance.global("b").unwrap(), Value::I32(7));
    }

    #[rstest]
    #[case(r#"(func) (export "f" (func 0)) (export "f" (func 0))"#, "Duplicate export name \"f\"")]
    #[case(r#"(global $g (mut i32) (i32.const 0)) (export "g" (global $g))"#, "Mutable globals cannot be exported")]
    #[case(r#"(import "env" "g" (global (mut i32)))"#, "Mutable globals cannot be imported")]
    #[case("(func $s (param i32)) (start $s)", "Start function can not have arguments or results")]
    #[case("(func $s) (start $s) (start $s)", "Multiple start functions is not allowed")]
    #[case("(func (call $missing))", "unknown function $missing")]
    fn fatal_module_errors(#[case] source: &str, #[case] message: &str) {
        let err = webasm::compile_source(source).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compile);
        assert_eq!(err.to_string(), message);
    }

    #[test]
    fn validate_leaves_the_program_untouched() {
        let program = webasm::parse("(func $f (call $f))").unwrap();
        webasm::validate(&program).unwrap();
        assert_eq!(webasm::parse("(func $f (call $f))").unwrap(), program);
    }
}
