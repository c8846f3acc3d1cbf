//! Factory functions for AST nodes.
//!
//! Each constructor checks the parts the type system cannot: lists that must hold
//! instructions only hold instructions, instruction arguments are expressions,
//! module fields are module fields.

use super::*;
use crate::parser::leb128::LongNumber;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("{node}: {field} must contain {expected} nodes, found {actual}")]
    WrongCategory {
        node: &'static str,
        field: &'static str,
        expected: &'static str,
        actual: NodeKind,
    },
}

fn check_all(
    nodes: &[Node],
    node: &'static str,
    field: &'static str,
    union: UnionKind,
) -> Result<(), BuildError> {
    match nodes.iter().find(|n| !n.is(union)) {
        Some(bad) => Err(BuildError::WrongCategory {
            node,
            field,
            expected: union.name(),
            actual: bad.kind(),
        }),
        None => Ok(()),
    }
}

fn is_module_field(kind: NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::TypeInstruction
            | NodeKind::Func
            | NodeKind::Global
            | NodeKind::Table
            | NodeKind::Memory
            | NodeKind::ModuleImport
            | NodeKind::ModuleExport
            | NodeKind::Start
            | NodeKind::Elem
            | NodeKind::Data
    )
}

pub fn identifier(value: &str) -> Identifier {
    Identifier {
        value: value.to_string(),
        raw: value.to_string(),
    }
}

/// An identifier with no source spelling, used for generated names.
pub fn synthesized_identifier(value: String) -> Identifier {
    Identifier {
        value,
        raw: String::new(),
    }
}

pub fn number_literal(value: i64) -> NumberLiteral {
    NumberLiteral {
        value,
        raw: value.to_string(),
    }
}

pub fn number_literal_with_raw(value: i64, raw: &str) -> NumberLiteral {
    NumberLiteral {
        value,
        raw: raw.to_string(),
    }
}

pub fn index_literal(value: u32) -> Index {
    Index::NumberLiteral(number_literal(value as i64))
}

pub fn identifier_index(value: &str) -> Index {
    Index::Identifier(identifier(value))
}

pub fn long_number_literal(value: i64, raw: &str) -> LongNumberLiteral {
    LongNumberLiteral {
        value: LongNumber::from(value),
        raw: raw.to_string(),
    }
}

pub fn float_literal_f32(value: f32, raw: &str) -> FloatLiteral {
    FloatLiteral {
        bits: FloatBits::F32(value.to_bits()),
        nan: value.is_nan(),
        inf: value.is_infinite(),
        raw: raw.to_string(),
    }
}

pub fn float_literal_f64(value: f64, raw: &str) -> FloatLiteral {
    FloatLiteral {
        bits: FloatBits::F64(value.to_bits()),
        nan: value.is_nan(),
        inf: value.is_infinite(),
        raw: raw.to_string(),
    }
}

pub fn signature(params: Vec<FuncParam>, results: Vec<Valtype>) -> Signature {
    Signature { params, results }
}

pub fn anonymous_params(types: &[Valtype]) -> Vec<FuncParam> {
    types
        .iter()
        .map(|&valtype| FuncParam { id: None, valtype })
        .collect()
}

pub fn limit(min: u32, max: Option<u32>) -> Limit {
    Limit { min, max }
}

pub fn instruction(id: &str, args: Vec<Node>) -> Result<Node, BuildError> {
    check_all(&args, "Instr", "args", UnionKind::Expression)?;
    Ok(Node::Instr(Instr {
        id: id.to_string(),
        object: None,
        args,
        mem_arg: None,
    }))
}

pub fn object_instruction(id: &str, object: Valtype, args: Vec<Node>) -> Result<Node, BuildError> {
    check_all(&args, "Instr", "args", UnionKind::Expression)?;
    Ok(Node::Instr(Instr {
        id: id.to_string(),
        object: Some(object),
        args,
        mem_arg: None,
    }))
}

pub fn memory_instruction(id: &str, object: Valtype, mem_arg: MemArg) -> Node {
    Node::Instr(Instr {
        id: id.to_string(),
        object: Some(object),
        args: vec![],
        mem_arg: Some(mem_arg),
    })
}

pub fn block_instruction(
    label: Identifier,
    instr: Vec<Node>,
    result: Option<Valtype>,
) -> Result<Node, BuildError> {
    check_all(&instr, "BlockInstruction", "instr", UnionKind::Instruction)?;
    Ok(Node::BlockInstruction(BlockInstruction { label, instr, result }))
}

pub fn loop_instruction(
    label: Identifier,
    result: Option<Valtype>,
    instr: Vec<Node>,
) -> Result<Node, BuildError> {
    check_all(&instr, "LoopInstruction", "instr", UnionKind::Instruction)?;
    Ok(Node::LoopInstruction(LoopInstruction { label, result, instr }))
}

pub fn if_instruction(
    test_label: Identifier,
    result: Option<Valtype>,
    consequent: Vec<Node>,
    alternate: Vec<Node>,
) -> Result<Node, BuildError> {
    check_all(&consequent, "IfInstruction", "consequent", UnionKind::Instruction)?;
    check_all(&alternate, "IfInstruction", "alternate", UnionKind::Instruction)?;
    Ok(Node::IfInstruction(IfInstruction {
        test_label,
        result,
        consequent,
        alternate,
    }))
}

pub fn call_instruction(index: Index) -> Node {
    Node::CallInstruction(CallInstruction { index })
}

pub fn call_indirect_instruction(signature: SignatureRef) -> Node {
    Node::CallIndirectInstruction(CallIndirectInstruction { signature })
}

pub fn func(
    name: Identifier,
    signature: SignatureRef,
    locals: Vec<FuncParam>,
    body: Vec<Node>,
) -> Result<Node, BuildError> {
    check_all(&body, "Func", "body", UnionKind::Instruction)?;
    Ok(Node::Func(Func {
        name,
        signature,
        locals,
        body,
        metadata: None,
    }))
}

pub fn type_instruction(id: Option<Identifier>, functype: Signature) -> Node {
    Node::TypeInstruction(TypeInstruction { id, functype })
}

pub fn global(global_type: GlobalType, init: Vec<Node>, name: Option<Identifier>) -> Result<Node, BuildError> {
    check_all(&init, "Global", "init", UnionKind::Instruction)?;
    Ok(Node::Global(Global {
        global_type,
        init,
        name,
    }))
}

pub fn global_type(valtype: Valtype, mutability: Mutability) -> GlobalType {
    GlobalType { valtype, mutability }
}

pub fn table(limits: Limit, name: Option<Identifier>, elements: Vec<Index>) -> Table {
    Table {
        element_type: "anyfunc".to_string(),
        limits,
        name,
        elements,
    }
}

pub fn memory(limits: Limit, id: Option<Identifier>) -> Memory {
    Memory { limits, id }
}

pub fn module_import(module: &str, name: &str, descr: ImportDescr) -> Node {
    Node::ModuleImport(ModuleImport {
        module: module.to_string(),
        name: name.to_string(),
        descr,
        id: None,
    })
}

pub fn module_export(name: &str, export_type: ExportType, id: Index) -> Node {
    Node::ModuleExport(ModuleExport {
        name: name.to_string(),
        descr: ModuleExportDescr { export_type, id },
    })
}

pub fn start(index: Index) -> Node {
    Node::Start(Start { index })
}

pub fn elem(table: Index, offset: Vec<Node>, funcs: Vec<Index>) -> Result<Node, BuildError> {
    check_all(&offset, "Elem", "offset", UnionKind::Instruction)?;
    Ok(Node::Elem(Elem { table, offset, funcs }))
}

pub fn data(memory_index: Index, offset: Vec<Node>, values: Vec<u8>) -> Result<Node, BuildError> {
    check_all(&offset, "Data", "offset", UnionKind::Instruction)?;
    Ok(Node::Data(Data {
        memory_index,
        offset,
        init: ByteArray { values },
    }))
}

pub fn section_metadata(section: &str, start_offset: usize, size: u32, vector_of_size: u32) -> SectionMetadata {
    SectionMetadata {
        section: section.to_string(),
        start_offset,
        size: number_literal(size as i64),
        vector_of_size: number_literal(vector_of_size as i64),
    }
}

pub fn module(id: Option<String>, fields: Vec<Node>, metadata: Option<ModuleMetadata>) -> Result<Node, BuildError> {
    if let Some(bad) = fields.iter().find(|f| !is_module_field(f.kind())) {
        return Err(BuildError::WrongCategory {
            node: "Module",
            field: "fields",
            expected: "module field",
            actual: bad.kind(),
        });
    }
    Ok(Node::Module(Module { id, fields, metadata }))
}

pub fn program(body: Vec<Node>) -> Program {
    Program { body }
}
