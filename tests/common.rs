//! Binary module fixtures shared between integration tests
#![allow(dead_code)]

use webasm::parser::encoding::*;

/// Preamble followed by `(id, body)` sections in the order given.
pub fn module(sections: &[(u8, Vec<u8>)]) -> Vec<u8> {
    let mut buf = module_preamble();
    for (id, body) in sections {
        write_section(&mut buf, *id, body);
    }
    buf
}

fn export(buf: &mut Vec<u8>, name: &str, desc: u8, index: u32) {
    write_name(buf, name);
    buf.push(desc);
    write_vu32(buf, index);
}

/// `(func (export "add") (param i32 i32) (result i32) ...)`
pub fn add_module() -> Vec<u8> {
    let mut exports = vec![1];
    export(&mut exports, "add", DESC_FUNC, 0);
    module(&[
        (SECTION_TYPE, vec![1, TYPE_FUNC, 2, VALTYPE_I32, VALTYPE_I32, 1, VALTYPE_I32]),
        (SECTION_FUNCTION, vec![1, 0]),
        (SECTION_EXPORT, exports),
        (SECTION_CODE, hex::decode("010700200020016a0b").unwrap()),
    ])
}

/// One page of memory holding `value` at address 0, a `load` function
/// reading it back and the memory exported as `mem`.
pub fn memory_module(value: i32) -> Vec<u8> {
    let mut exports = vec![2];
    export(&mut exports, "load", DESC_FUNC, 0);
    export(&mut exports, "mem", DESC_MEMORY, 0);

    let mut data = vec![1, 0, 0x41, 0x00, OP_END];
    write_u8vec(&mut data, &value.to_le_bytes());

    module(&[
        (SECTION_TYPE, vec![1, TYPE_FUNC, 0, 1, VALTYPE_I32]),
        (SECTION_FUNCTION, vec![1, 0]),
        (SECTION_MEMORY, vec![1, LIMITS_MIN, 1]),
        (SECTION_EXPORT, exports),
        // i32.const 0, i32.load align=2 offset=0
        (SECTION_CODE, hex::decode("01070041002802000b").unwrap()),
        (SECTION_DATA, data),
    ])
}

/// A module whose only function imports `env.double` and calls it with 21.
pub fn import_module() -> Vec<u8> {
    let mut imports = vec![1];
    write_name(&mut imports, "env");
    write_name(&mut imports, "double");
    imports.extend_from_slice(&[DESC_FUNC, 0]);

    let mut exports = vec![1];
    export(&mut exports, "run", DESC_FUNC, 1);

    module(&[
        (
            SECTION_TYPE,
            vec![2, TYPE_FUNC, 1, VALTYPE_I32, 1, VALTYPE_I32, TYPE_FUNC, 0, 1, VALTYPE_I32],
        ),
        (SECTION_IMPORT, imports),
        (SECTION_FUNCTION, vec![1, 1]),
        (SECTION_EXPORT, exports),
        // i32.const 21, call 0
        (SECTION_CODE, hex::decode("010600411510000b").unwrap()),
    ])
}

/// One `() -> ()` function whose body is `depth` nested empty blocks.
pub fn nested_blocks_module(depth: usize) -> Vec<u8> {
    let mut body = vec![0];
    for _ in 0..depth {
        body.extend_from_slice(&[OP_BLOCK, BLOCK_TYPE_EMPTY]);
    }
    body.extend(std::iter::repeat(OP_END).take(depth + 1));
    let mut code = vec![1];
    write_u8vec(&mut code, &body);
    module(&[
        (SECTION_TYPE, vec![1, TYPE_FUNC, 0, 0]),
        (SECTION_FUNCTION, vec![1, 0]),
        (SECTION_CODE, code),
    ])
}
