//! Encodes a [`Module`] to the WebAssembly binary format.
//!
//! This is the inverse of [`crate::parser::decode`]. The module must have been
//! through [`transform::run`](crate::ast::transform::run) so that every index
//! is numeric; signatures may be inline or refer to a type instruction.
//!
//! # Layout
//!
//! Sections are written in wire order and only when non-empty:
//!
//! ```text
//! section_id: u8 | byte_length: vu32 | contents: byte*
//! ```
//!
//! Inline signatures are collected into the type section after the module's
//! own type instructions, sharing an entry when two signatures are equal.
//! Elements declared inline on a table become an element segment at offset 0.
//! Function names written in the text format go into a `name` custom section.
//!
//! # Example
//!
//! ```
//! use webasm::{ast::transform, encoder, wat};
//!
//! let mut program = wat::parse("(module (func))").unwrap();
//! transform::run(&mut program).unwrap();
//! let bytes = encoder::encode(program.module().unwrap()).unwrap();
//! assert_eq!(&bytes[0..4], b"\0asm");
//! ```

use crate::ast::*;
use crate::parser::encoding::*;
use crate::parser::opcodes::{self, Immediate};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("unresolved identifier ${0} cannot be encoded")]
    UnresolvedIdentifier(String),
    #[error("Unknown instruction {0}")]
    UnknownInstruction(String),
    #[error("invalid immediate for {0}")]
    InvalidImmediate(String),
    #[error("A type instruction reference was not found: {0}")]
    UnknownType(u32),
    #[error("Unexpected {0} in instruction sequence")]
    UnexpectedNode(&'static str),
}

/// Encodes `module` to a complete binary, preamble included.
pub fn encode(module: &Module) -> Result<Vec<u8>, EncodeError> {
    let fields = Fields::collect(module);
    let mut types = Types::new(&fields);

    // signatures first, so function type indices do not depend on bodies
    let mut import_types = Vec::new();
    for import in fields.imports.iter() {
        if let ImportDescr::FuncImportDescr(descr) = &import.descr {
            import_types.push(types.index_of(&descr.signature)?);
        }
    }
    let mut func_types = Vec::with_capacity(fields.funcs.len());
    for func in fields.funcs.iter() {
        func_types.push(types.index_of(&func.signature)?);
    }

    let mut bodies = Vec::with_capacity(fields.funcs.len());
    for func in fields.funcs.iter() {
        bodies.push(encode_body(func, &mut types)?);
    }

    let mut buf = module_preamble();
    encode_type_section(&mut buf, &types);
    encode_import_section(&mut buf, &fields, &import_types);
    encode_function_section(&mut buf, &func_types);
    encode_table_section(&mut buf, &fields);
    encode_memory_section(&mut buf, &fields);
    encode_global_section(&mut buf, &fields, &mut types)?;
    encode_export_section(&mut buf, &fields)?;
    encode_start_section(&mut buf, &fields)?;
    encode_element_section(&mut buf, &fields, &mut types)?;
    encode_code_section(&mut buf, &bodies);
    encode_data_section(&mut buf, &fields, &mut types)?;
    encode_name_section(&mut buf, &fields);
    Ok(buf)
}

/// Module fields grouped by section.
#[derive(Default)]
struct Fields<'m> {
    types: Vec<&'m TypeInstruction>,
    imports: Vec<&'m ModuleImport>,
    funcs: Vec<&'m Func>,
    tables: Vec<&'m Table>,
    memories: Vec<&'m Memory>,
    globals: Vec<&'m Global>,
    exports: Vec<&'m ModuleExport>,
    start: Option<&'m Start>,
    elems: Vec<&'m Elem>,
    data: Vec<&'m Data>,
}

impl<'m> Fields<'m> {
    fn collect(module: &'m Module) -> Self {
        let mut fields = Fields::default();
        for field in module.fields.iter() {
            match field {
                Node::TypeInstruction(t) => fields.types.push(t),
                Node::ModuleImport(i) => fields.imports.push(i),
                Node::Func(f) => fields.funcs.push(f),
                Node::Table(t) => fields.tables.push(t),
                Node::Memory(m) => fields.memories.push(m),
                Node::Global(g) => fields.globals.push(g),
                Node::ModuleExport(e) => fields.exports.push(e),
                Node::Start(s) => fields.start = Some(s),
                Node::Elem(e) => fields.elems.push(e),
                Node::Data(d) => fields.data.push(d),
                _ => {}
            }
        }
        fields
    }

    fn imported(&self, matches: fn(&ImportDescr) -> bool) -> u32 {
        self.imports.iter().filter(|i| matches(&i.descr)).count() as u32
    }
}

/// The type section under construction.
struct Types {
    entries: Vec<(Vec<Valtype>, Vec<Valtype>)>,
    declared: usize,
}

impl Types {
    fn new(fields: &Fields<'_>) -> Self {
        let entries: Vec<_> = fields
            .types
            .iter()
            .map(|t| (t.functype.param_types(), t.functype.results.clone()))
            .collect();
        Types {
            declared: entries.len(),
            entries,
        }
    }

    fn index_of(&mut self, signature: &SignatureRef) -> Result<u32, EncodeError> {
        match signature {
            SignatureRef::Inline(sig) => {
                let entry = (sig.param_types(), sig.results.clone());
                match self.entries.iter().position(|e| *e == entry) {
                    Some(position) => Ok(position as u32),
                    None => {
                        self.entries.push(entry);
                        Ok(self.entries.len() as u32 - 1)
                    }
                }
            }
            SignatureRef::Ref(reference) => {
                let position = index(reference)?;
                if position as usize >= self.declared {
                    return Err(EncodeError::UnknownType(position));
                }
                Ok(position)
            }
        }
    }
}

fn index(index: &Index) -> Result<u32, EncodeError> {
    match index {
        Index::NumberLiteral(n) => Ok(n.as_u32()),
        Index::Identifier(id) => Err(EncodeError::UnresolvedIdentifier(id.value.clone())),
    }
}

fn valtype_byte(valtype: Valtype) -> u8 {
    match valtype {
        Valtype::I32 => VALTYPE_I32,
        Valtype::I64 => VALTYPE_I64,
        Valtype::F32 => VALTYPE_F32,
        Valtype::F64 => VALTYPE_F64,
    }
}

fn write_valtypes(buf: &mut Vec<u8>, types: &[Valtype]) {
    write_vu32(buf, types.len() as u32);
    buf.extend(types.iter().map(|t| valtype_byte(*t)));
}

fn write_limits(buf: &mut Vec<u8>, limits: &Limit) {
    match limits.max {
        Some(max) => {
            buf.push(LIMITS_MIN_MAX);
            write_vu32(buf, limits.min);
            write_vu32(buf, max);
        }
        None => {
            buf.push(LIMITS_MIN);
            write_vu32(buf, limits.min);
        }
    }
}

fn write_global_type(buf: &mut Vec<u8>, global_type: &GlobalType) {
    buf.push(valtype_byte(global_type.valtype));
    buf.push(match global_type.mutability {
        Mutability::Const => MUT_CONST,
        Mutability::Var => MUT_VAR,
    });
}

/// Writes `contents` as section `id` unless there is nothing in it.
fn write_vector_section(buf: &mut Vec<u8>, id: u8, count: usize, contents: &[u8]) {
    if count == 0 {
        return;
    }
    let mut section = Vec::with_capacity(contents.len() + 5);
    write_vu32(&mut section, count as u32);
    section.extend_from_slice(contents);
    write_section(buf, id, &section);
}

/* SECTIONS *******************************************************/

fn encode_type_section(buf: &mut Vec<u8>, types: &Types) {
    let mut contents = Vec::new();
    for (params, results) in types.entries.iter() {
        contents.push(TYPE_FUNC);
        write_valtypes(&mut contents, params);
        write_valtypes(&mut contents, results);
    }
    write_vector_section(buf, SECTION_TYPE, types.entries.len(), &contents);
}

fn encode_import_section(buf: &mut Vec<u8>, fields: &Fields<'_>, import_types: &[u32]) {
    let mut contents = Vec::new();
    let mut func_types = import_types.iter();
    for import in fields.imports.iter() {
        write_name(&mut contents, &import.module);
        write_name(&mut contents, &import.name);
        match &import.descr {
            ImportDescr::FuncImportDescr(_) => {
                contents.push(DESC_FUNC);
                write_vu32(&mut contents, func_types.next().copied().unwrap_or_default());
            }
            ImportDescr::Table(table) => {
                contents.push(DESC_TABLE);
                contents.push(TYPE_ANYFUNC);
                write_limits(&mut contents, &table.limits);
            }
            ImportDescr::Memory(memory) => {
                contents.push(DESC_MEMORY);
                write_limits(&mut contents, &memory.limits);
            }
            ImportDescr::GlobalType(global_type) => {
                contents.push(DESC_GLOBAL);
                write_global_type(&mut contents, global_type);
            }
        }
    }
    write_vector_section(buf, SECTION_IMPORT, fields.imports.len(), &contents);
}

fn encode_function_section(buf: &mut Vec<u8>, func_types: &[u32]) {
    let mut contents = Vec::new();
    for type_index in func_types {
        write_vu32(&mut contents, *type_index);
    }
    write_vector_section(buf, SECTION_FUNCTION, func_types.len(), &contents);
}

fn encode_table_section(buf: &mut Vec<u8>, fields: &Fields<'_>) {
    let mut contents = Vec::new();
    for table in fields.tables.iter() {
        contents.push(TYPE_ANYFUNC);
        write_limits(&mut contents, &table.limits);
    }
    write_vector_section(buf, SECTION_TABLE, fields.tables.len(), &contents);
}

fn encode_memory_section(buf: &mut Vec<u8>, fields: &Fields<'_>) {
    let mut contents = Vec::new();
    for memory in fields.memories.iter() {
        write_limits(&mut contents, &memory.limits);
    }
    write_vector_section(buf, SECTION_MEMORY, fields.memories.len(), &contents);
}

fn encode_global_section(buf: &mut Vec<u8>, fields: &Fields<'_>, types: &mut Types) -> Result<(), EncodeError> {
    let mut contents = Vec::new();
    for global in fields.globals.iter() {
        write_global_type(&mut contents, &global.global_type);
        write_expression(&mut contents, &global.init, types)?;
    }
    write_vector_section(buf, SECTION_GLOBAL, fields.globals.len(), &contents);
    Ok(())
}

fn encode_export_section(buf: &mut Vec<u8>, fields: &Fields<'_>) -> Result<(), EncodeError> {
    let mut contents = Vec::new();
    for export in fields.exports.iter() {
        write_name(&mut contents, &export.name);
        contents.push(match export.descr.export_type {
            ExportType::Func => DESC_FUNC,
            ExportType::Table => DESC_TABLE,
            ExportType::Memory => DESC_MEMORY,
            ExportType::Global => DESC_GLOBAL,
        });
        write_vu32(&mut contents, index(&export.descr.id)?);
    }
    write_vector_section(buf, SECTION_EXPORT, fields.exports.len(), &contents);
    Ok(())
}

fn encode_start_section(buf: &mut Vec<u8>, fields: &Fields<'_>) -> Result<(), EncodeError> {
    if let Some(start) = fields.start {
        let mut contents = Vec::new();
        write_vu32(&mut contents, index(&start.index)?);
        write_section(buf, SECTION_START, &contents);
    }
    Ok(())
}

fn encode_element_section(buf: &mut Vec<u8>, fields: &Fields<'_>, types: &mut Types) -> Result<(), EncodeError> {
    let mut contents = Vec::new();
    let mut count = 0;

    let imported_tables = fields.imported(|d| matches!(d, ImportDescr::Table(_)));
    for (position, table) in fields.tables.iter().enumerate() {
        if table.elements.is_empty() {
            continue;
        }
        write_vu32(&mut contents, imported_tables + position as u32);
        contents.extend_from_slice(&[0x41, 0x00, OP_END]);
        write_vu32(&mut contents, table.elements.len() as u32);
        for func in table.elements.iter() {
            write_vu32(&mut contents, index(func)?);
        }
        count += 1;
    }

    for elem in fields.elems.iter() {
        write_vu32(&mut contents, index(&elem.table)?);
        write_expression(&mut contents, &elem.offset, types)?;
        write_vu32(&mut contents, elem.funcs.len() as u32);
        for func in elem.funcs.iter() {
            write_vu32(&mut contents, index(func)?);
        }
        count += 1;
    }

    write_vector_section(buf, SECTION_ELEMENT, count, &contents);
    Ok(())
}

fn encode_code_section(buf: &mut Vec<u8>, bodies: &[Vec<u8>]) {
    let mut contents = Vec::new();
    for body in bodies {
        write_u8vec(&mut contents, body);
    }
    write_vector_section(buf, SECTION_CODE, bodies.len(), &contents);
}

fn encode_data_section(buf: &mut Vec<u8>, fields: &Fields<'_>, types: &mut Types) -> Result<(), EncodeError> {
    let mut contents = Vec::new();
    for data in fields.data.iter() {
        write_vu32(&mut contents, index(&data.memory_index)?);
        write_expression(&mut contents, &data.offset, types)?;
        write_u8vec(&mut contents, &data.init.values);
    }
    write_vector_section(buf, SECTION_DATA, fields.data.len(), &contents);
    Ok(())
}

/// Function names that came from the source, as a `name` custom section.
fn encode_name_section(buf: &mut Vec<u8>, fields: &Fields<'_>) {
    let imported_funcs = fields.imported(|d| matches!(d, ImportDescr::FuncImportDescr(_)));
    let named: Vec<(u32, &str)> = fields
        .funcs
        .iter()
        .enumerate()
        .filter(|(_, func)| !func.name.is_synthesized())
        .map(|(position, func)| (imported_funcs + position as u32, func.name.value.as_str()))
        .collect();
    if named.is_empty() {
        return;
    }

    let mut functions = Vec::new();
    write_vu32(&mut functions, named.len() as u32);
    for (position, name) in named {
        write_vu32(&mut functions, position);
        write_name(&mut functions, name);
    }

    let mut contents = Vec::new();
    write_name(&mut contents, "name");
    contents.push(NAME_SUBSECTION_FUNCTIONS);
    write_u8vec(&mut contents, &functions);
    write_section(buf, SECTION_CUSTOM, &contents);
}

/* CODE ***********************************************************/

/// Locals (run-length encoded by type) and the body of `func`.
fn encode_body(func: &Func, types: &mut Types) -> Result<Vec<u8>, EncodeError> {
    let mut runs: Vec<(u32, Valtype)> = Vec::new();
    for local in func.locals.iter() {
        match runs.last_mut() {
            Some((count, valtype)) if *valtype == local.valtype => *count += 1,
            _ => runs.push((1, local.valtype)),
        }
    }

    let mut body = Vec::new();
    write_vu32(&mut body, runs.len() as u32);
    for (count, valtype) in runs {
        write_vu32(&mut body, count);
        body.push(valtype_byte(valtype));
    }
    write_expression(&mut body, &func.body, types)?;
    Ok(body)
}

/// An instruction sequence and its `end`.
fn write_expression(buf: &mut Vec<u8>, instrs: &[Node], types: &mut Types) -> Result<(), EncodeError> {
    write_instructions(buf, instrs, types)?;
    buf.push(OP_END);
    Ok(())
}

fn write_block_type(buf: &mut Vec<u8>, result: Option<Valtype>) {
    buf.push(result.map_or(BLOCK_TYPE_EMPTY, valtype_byte));
}

fn write_instructions(buf: &mut Vec<u8>, instrs: &[Node], types: &mut Types) -> Result<(), EncodeError> {
    for node in instrs {
        match node {
            Node::Instr(instr) => write_instr(buf, instr)?,
            Node::BlockInstruction(block) => {
                buf.push(OP_BLOCK);
                write_block_type(buf, block.result);
                write_expression(buf, &block.instr, types)?;
            }
            Node::LoopInstruction(block) => {
                buf.push(OP_LOOP);
                write_block_type(buf, block.result);
                write_expression(buf, &block.instr, types)?;
            }
            Node::IfInstruction(block) => {
                buf.push(OP_IF);
                write_block_type(buf, block.result);
                write_instructions(buf, &block.consequent, types)?;
                if !block.alternate.is_empty() {
                    buf.push(OP_ELSE);
                    write_instructions(buf, &block.alternate, types)?;
                }
                buf.push(OP_END);
            }
            Node::CallInstruction(call) => {
                buf.push(OP_CALL);
                write_vu32(buf, index(&call.index)?);
            }
            Node::CallIndirectInstruction(call) => {
                buf.push(OP_CALL_INDIRECT);
                write_vu32(buf, types.index_of(&call.signature)?);
                buf.push(0x00);
            }
            other => return Err(EncodeError::UnexpectedNode(other.kind().name())),
        }
    }
    Ok(())
}

fn write_instr(buf: &mut Vec<u8>, instr: &Instr) -> Result<(), EncodeError> {
    // the terminator is implied by the enclosing sequence
    if instr.object.is_none() && instr.id == "end" {
        return Ok(());
    }
    let mnemonic = instr.mnemonic();
    let opcode = opcodes::by_mnemonic(&mnemonic).ok_or_else(|| EncodeError::UnknownInstruction(mnemonic.clone()))?;
    let invalid = || EncodeError::InvalidImmediate(instr.mnemonic());

    buf.push(opcode.byte);
    match opcode.immediate {
        Immediate::None => {}
        Immediate::MemoryReserved => buf.push(0x00),
        Immediate::Index => write_vu32(buf, index_arg(instr.args.first()).ok_or_else(invalid)??),
        Immediate::BrTable => {
            // targets followed by the default
            let count = instr.args.len().checked_sub(1).ok_or_else(invalid)?;
            write_vu32(buf, count as u32);
            for arg in instr.args.iter() {
                write_vu32(buf, index_arg(Some(arg)).ok_or_else(invalid)??);
            }
        }
        Immediate::MemArg => {
            let mem_arg = instr.mem_arg.ok_or_else(invalid)?;
            write_vu32(buf, mem_arg.align);
            write_vu32(buf, mem_arg.offset);
        }
        Immediate::I32 => match instr.args.first() {
            Some(Node::NumberLiteral(n)) => write_vs32(buf, n.as_i32()),
            _ => return Err(invalid()),
        },
        Immediate::I64 => match instr.args.first() {
            Some(Node::LongNumberLiteral(n)) => write_vs64(buf, n.value.to_i64()),
            Some(Node::NumberLiteral(n)) => write_vs64(buf, n.value),
            _ => return Err(invalid()),
        },
        Immediate::F32 => match instr.args.first() {
            Some(Node::FloatLiteral(f)) => write_f32_bits(buf, f.to_f32_bits()),
            _ => return Err(invalid()),
        },
        Immediate::F64 => match instr.args.first() {
            Some(Node::FloatLiteral(f)) => write_f64_bits(buf, f.to_f64_bits()),
            _ => return Err(invalid()),
        },
        Immediate::Block | Immediate::CallIndirect => return Err(invalid()),
    }
    Ok(())
}

/// A numeric index argument; `None` when the argument is not an index at all.
fn index_arg(arg: Option<&Node>) -> Option<Result<u32, EncodeError>> {
    match arg {
        Some(Node::NumberLiteral(n)) => Some(Ok(n.as_u32())),
        Some(Node::Identifier(id)) => Some(Err(EncodeError::UnresolvedIdentifier(id.value.clone()))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::transform;
    use crate::parser::{decode, DecoderOptions};
    use crate::wat;

    fn module(source: &str) -> Module {
        let mut program = wat::parse(source).unwrap();
        transform::run(&mut program).unwrap();
        program.module().unwrap().clone()
    }

    fn decoded(bytes: &[u8]) -> Module {
        let mut program = decode(bytes, &DecoderOptions::default()).unwrap();
        transform::run(&mut program).unwrap();
        program.module().unwrap().clone()
    }

    #[test]
    fn empty_module_is_just_the_preamble() {
        assert_eq!(encode(&module("(module)")).unwrap(), module_preamble());
    }

    #[test]
    fn add_function_bytes() {
        let bytes = encode(&module(
            r#"(module (func (export "add") (param i32 i32) (result i32)
                get_local 0 get_local 1 i32.add))"#,
        ))
        .unwrap();

        let mut expected = module_preamble();
        write_section(&mut expected, SECTION_TYPE, &hex::decode("0160027f7f017f").unwrap());
        write_section(&mut expected, SECTION_FUNCTION, &hex::decode("0100").unwrap());
        write_section(&mut expected, SECTION_EXPORT, &hex::decode("01036164640000").unwrap());
        write_section(&mut expected, SECTION_CODE, &hex::decode("010700200020016a0b").unwrap());
        assert_eq!(hex::encode(bytes), hex::encode(expected));
    }

    #[test]
    fn equal_signatures_share_a_type() {
        let m = module(
            r#"(module
                (type (func (param i32)))
                (func (param i32))
                (func (param i32))
                (func (result f64) (f64.const 0)))"#,
        );
        let bytes = encode(&m).unwrap();
        let types: Vec<Node> = decoded(&bytes)
            .fields
            .into_iter()
            .filter(|f| matches!(f, Node::TypeInstruction(_)))
            .collect();
        assert_eq!(types.len(), 2);
    }

    #[test]
    fn text_round_trip_is_stable() {
        let source = r#"(module
            (import "env" "log" (func $log (param i32)))
            (import "env" "base" (global $base i32))
            (type $unary (func (param i32) (result i32)))
            (memory 1 4)
            (export "mem" (memory 0))
            (table 2 anyfunc)
            (global $counter (mut i64) (i64.const -9007199254740993))
            (data (i32.const 16) "hello")
            (elem (i32.const 0) $double $double)
            (func $double (type $unary) (i32.mul (get_local 0) (i32.const 2)))
            (func $run (export "run") (param $n i32) (result i32) (local f32 f32 i32)
                (block $out (result i32)
                    (loop $again
                        (br_if $again (i32.eqz (get_local $n)))
                        (br_table $out $out (i32.const 1) (get_local $n))))
                (if (result i32) (get_local $n)
                    (then (call $double (get_local $n)))
                    (else (call_indirect (type $unary) (i32.const 3) (i32.const 0))))
                drop
                (call $log (i32.load8_u offset=16 (get_global $base)))
                (set_global $counter (i64.add (get_global $counter) (i64.const 1)))
                (f32.store align=2 (i32.const 0) (f32.const nan:0x200000))
                (grow_memory (i32.const 1)))
            (start $init)
            (func $init))"#;

        let first = encode(&module(source)).unwrap();
        let second = encode(&decoded(&first)).unwrap();
        assert_eq!(hex::encode(&first), hex::encode(&second));
    }

    #[test]
    fn names_survive_the_binary() {
        let bytes = encode(&module("(module (func $double) (func))")).unwrap();
        let names: Vec<String> = decoded(&bytes)
            .fields
            .iter()
            .filter_map(|f| match f {
                Node::Func(func) => Some(func.name.value.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(names[0], "double");
        assert_ne!(names[1], "double");
    }

    #[test]
    fn nan_payloads_are_kept() {
        let bytes = encode(&module("(module (func (result f32) (f32.const nan:0x200000)))")).unwrap();
        let m = decoded(&bytes);
        let func = m.fields.iter().find_map(|f| match f {
            Node::Func(func) => Some(func),
            _ => None,
        });
        match func.map(|f| &f.body[0]) {
            Some(Node::Instr(instr)) => match &instr.args[0] {
                Node::FloatLiteral(literal) => assert_eq!(literal.to_f32_bits(), 0x7fa0_0000),
                other => panic!("unexpected {:?}", other.kind()),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn identifiers_must_be_resolved() {
        let program = wat::parse("(module (func $f (call $f)))").unwrap();
        let err = encode(program.module().unwrap()).unwrap_err();
        assert_eq!(err, EncodeError::UnresolvedIdentifier("f".to_string()));
    }
}
