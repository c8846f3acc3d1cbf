#[cfg(test)]
mod tests {
    use rstest::rstest;
    use webasm::runtime::{ImportObject, RuntimeError, Value};
    use webasm::{EngineConfig, Error, ErrorKind, Instantiated};

    fn instantiate(source: &str) -> Instantiated {
        webasm::instantiate_from_source(source, &ImportObject::new(), &EngineConfig::default()).unwrap()
    }

    fn call(source: &str, name: &str, args: &[Value]) -> Result<Vec<Value>, Error> {
        instantiate(source).instance.invoke(name, args)
    }

    const ARITHMETIC: &str = r#"(module
        (func (export "add") (param i32 i32) (result i32) (i32.add (get_local 0) (get_local 1)))
        (func (export "div_s") (param i32 i32) (result i32) (i32.div_s (get_local 0) (get_local 1)))
        (func (export "rem_s") (param i32 i32) (result i32) (i32.rem_s (get_local 0) (get_local 1)))
        (func (export "trunc") (param f32) (result i32) (i32.trunc_s/f32 (get_local 0)))
        (func (export "min") (param f32 f32) (result f32) (f32.min (get_local 0) (get_local 1)))
        (func (export "nearest") (param f64) (result f64) (f64.nearest (get_local 0)))
        (func (export "rotl") (param i64 i64) (result i64) (i64.rotl (get_local 0) (get_local 1))))"#;

    #[rstest]
    #[case("add", vec![Value::I32(2), Value::I32(3)], Value::I32(5))]
    #[case("add", vec![Value::I32(i32::MAX), Value::I32(1)], Value::I32(i32::MIN))]
    #[case("div_s", vec![Value::I32(-7), Value::I32(2)], Value::I32(-3))]
    #[case("rem_s", vec![Value::I32(i32::MIN), Value::I32(-1)], Value::I32(0))]
    #[case("trunc", vec![Value::F32(-3.9)], Value::I32(-3))]
    #[case("nearest", vec![Value::F64(2.5)], Value::F64(2.0))]
    #[case("nearest", vec![Value::F64(-3.5)], Value::F64(-4.0))]
    #[case("rotl", vec![Value::I64(1), Value::I64(65)], Value::I64(2))]
    fn arithmetic(#[case] name: &str, #[case] args: Vec<Value>, #[case] expected: Value) {
        assert_eq!(call(ARITHMETIC, name, &args).unwrap(), vec![expected]);
    }

    #[test]
    fn min_orders_signed_zeros() {
        let result = call(ARITHMETIC, "min", &[Value::F32(0.0), Value::F32(-0.0)]).unwrap();
        match result.as_slice() {
            [Value::F32(v)] => assert!(*v == 0.0 && v.is_sign_negative()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[rstest]
    #[case("div_s", vec![Value::I32(1), Value::I32(0)], "integer divide by zero")]
    #[case("div_s", vec![Value::I32(i32::MIN), Value::I32(-1)], "integer overflow")]
    #[case("trunc", vec![Value::F32(f32::NAN)], "invalid conversion to integer")]
    #[case("trunc", vec![Value::F32(3.0e9)], "integer overflow")]
    fn numeric_traps(#[case] name: &str, #[case] args: Vec<Value>, #[case] message: &str) {
        let err = call(ARITHMETIC, name, &args).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Trap);
        assert!(err.to_string().ends_with(message), "{}", err);
    }

    #[test]
    fn control_flow() {
        let source = r#"(module
            (func (export "escape") (block (loop (br 1))))
            (func (export "sum") (param $n i32) (result i32) (local $acc i32)
                (block $done
                    (loop $next
                        (br_if $done (i32.eqz (get_local $n)))
                        (set_local $acc (i32.add (get_local $acc) (get_local $n)))
                        (set_local $n (i32.sub (get_local $n) (i32.const 1)))
                        (br $next)))
                (get_local $acc))
            (func $fac (export "fac") (param i64) (result i64)
                (if (result i64) (i64.eqz (get_local 0))
                    (then (i64.const 1))
                    (else (i64.mul (get_local 0) (call $fac (i64.sub (get_local 0) (i64.const 1)))))))
            (func (export "pick") (param i32) (result i32)
                (block (block (block
                    (br_table 0 1 2 (get_local 0)))
                    (return (i32.const 10)))
                    (return (i32.const 11)))
                (i32.const 12)))"#;
        let instance = instantiate(source).instance;

        assert_eq!(instance.invoke("escape", &[]).unwrap(), vec![]);
        assert_eq!(instance.invoke("sum", &[Value::I32(10)]).unwrap(), vec![Value::I32(55)]);
        assert_eq!(
            instance.invoke("fac", &[Value::I64(20)]).unwrap(),
            vec![Value::I64(2_432_902_008_176_640_000)]
        );
        for (arg, expected) in &[(0, 10), (1, 11), (2, 12), (7, 12), (-1, 12)] {
            assert_eq!(
                instance.invoke("pick", &[Value::I32(*arg)]).unwrap(),
                vec![Value::I32(*expected)]
            );
        }
    }

    #[test]
    fn memory_access() {
        let source = r#"(module
            (memory (export "mem") 1 2)
            (func (export "store") (param i32 i32) (i32.store (get_local 0) (get_local 1)))
            (func (export "load16_s") (param i32) (result i32) (i32.load16_s offset=1 (get_local 0)))
            (func (export "grow") (param i32) (result i32) (grow_memory (get_local 0)))
            (func (export "size") (result i32) (current_memory)))"#;
        let instance = instantiate(source).instance;

        instance.invoke("store", &[Value::I32(0), Value::I32(0x00ff_8000)]).unwrap();
        assert_eq!(instance.read_memory("mem", 0, 4).unwrap(), vec![0x00, 0x80, 0xff, 0x00]);
        assert_eq!(instance.invoke("load16_s", &[Value::I32(0)]).unwrap(), vec![Value::I32(-128)]);

        let err = instance.invoke("store", &[Value::I32(65534), Value::I32(-1)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Trap);
        assert_eq!(instance.read_memory("mem", 65532, 4).unwrap(), vec![0, 0, 0, 0]);

        let err = instance.invoke("store", &[Value::I32(-4), Value::I32(1)]).unwrap_err();
        assert!(err.to_string().contains("out of bounds memory access"), "{}", err);

        assert_eq!(instance.invoke("grow", &[Value::I32(1)]).unwrap(), vec![Value::I32(1)]);
        assert_eq!(instance.invoke("size", &[]).unwrap(), vec![Value::I32(2)]);
        assert_eq!(instance.invoke("grow", &[Value::I32(1)]).unwrap(), vec![Value::I32(-1)]);
        instance.invoke("store", &[Value::I32(65534), Value::I32(-1)]).unwrap();
    }

    #[test]
    fn unreachable_traps_and_instance_survives() {
        let source = r#"(module
            (func (export "boom") (unreachable))
            (func (export "ok") (result i32) (i32.const 1)))"#;
        let instance = instantiate(source).instance;
        let err = instance.invoke("boom", &[]).unwrap_err();
        assert!(err.is_trap());
        assert_eq!(err.to_string(), "Execution has been trapped: unreachable");
        assert_eq!(instance.invoke("ok", &[]).unwrap(), vec![Value::I32(1)]);
    }

    #[test]
    fn call_depth_is_bounded() {
        let source = r#"(module
            (func $loop (export "forever") (call $loop))
            (func $down (export "down") (param i32) (result i32)
                (if (result i32) (i32.eqz (get_local 0))
                    (then (i32.const 0))
                    (else (call $down (i32.sub (get_local 0) (i32.const 1)))))))"#;
        let instance = instantiate(source).instance;

        let err = instance.invoke("forever", &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert_eq!(err, Error::Runtime(RuntimeError::CallStackOverflow));
        assert_eq!(instance.invoke("down", &[Value::I32(50)]).unwrap(), vec![Value::I32(0)]);

        let config = EngineConfig::from_json(r#"{"max_call_depth": 20}"#).unwrap();
        let shallow = webasm::instantiate_from_source(source, &ImportObject::new(), &config).unwrap();
        assert_eq!(
            shallow.instance.invoke("down", &[Value::I32(50)]).unwrap_err(),
            Error::Runtime(RuntimeError::CallStackOverflow)
        );
    }

    #[test]
    fn arguments_are_checked() {
        let err = call(ARITHMETIC, "add", &[Value::I32(1)]).unwrap_err();
        assert!(matches!(err, Error::Runtime(RuntimeError::ArityMismatch { given: 1, expected: 2, .. })));
        let err = call(ARITHMETIC, "missing", &[]).unwrap_err();
        assert_eq!(err.to_string(), "Unknown export missing");
    }

    #[test]
    fn host_function_errors_propagate() {
        let mut imports = ImportObject::new();
        imports.add_function("env", "fail", vec![], vec![], |_| Err(RuntimeError::Host("nope".to_string())));
        let result = webasm::instantiate_from_source(
            r#"(module (import "env" "fail" (func $fail)) (func (export "run") (call $fail)))"#,
            &imports,
            &EngineConfig::default(),
        )
        .unwrap();
        let err = result.instance.invoke("run", &[]).unwrap_err();
        assert_eq!(err.to_string(), "Host function failed: nope");
        assert_eq!(err.kind(), ErrorKind::Runtime);
    }

    #[test]
    fn compiled_module_is_returned() {
        let result = instantiate(r#"(module (func $only (export "only")))"#);
        let funcs = result
            .module
            .fields
            .iter()
            .filter(|field| matches!(field, webasm::ast::Node::Func(_)))
            .count();
        assert_eq!(funcs, 1);
        assert_eq!(result.instance.export_names(), vec!["only"]);
    }
}
