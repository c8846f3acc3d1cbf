//! The abstract syntax tree shared by the binary and text decoders.
//!
//! Every node is a variant of [`Node`]. Heterogeneous lists (module fields,
//! instruction sequences, instruction arguments) hold `Node`s; single-typed
//! children are stored as their concrete struct. The closed set of variants and the
//! union categories each belongs to live in [`kind`].
//!
//! Indices start out either numeric or symbolic ([`Index`]); the
//! [`transform`] passes rewrite every symbolic index to a number and every
//! type-index signature to an inline one before validation and execution.

pub mod builder;
pub mod kind;
pub mod names;
pub mod transform;
pub mod traverse;

pub use kind::{NodeKind, UnionKind, VisitorKey};
pub use names::NameGenerator;

use crate::parser::leb128::LongNumber;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Valtype {
    I32,
    I64,
    F32,
    F64,
}

impl Valtype {
    pub fn as_str(self) -> &'static str {
        match self {
            Valtype::I32 => "i32",
            Valtype::I64 => "i64",
            Valtype::F32 => "f32",
            Valtype::F64 => "f64",
        }
    }

    pub fn from_name(name: &str) -> Option<Valtype> {
        match name {
            "i32" => Some(Valtype::I32),
            "i64" => Some(Valtype::I64),
            "f32" => Some(Valtype::F32),
            "f64" => Some(Valtype::F64),
            _ => None,
        }
    }
}

impl fmt::Display for Valtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mutability {
    Const,
    Var,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExportType {
    Func,
    Table,
    Memory,
    Global,
}

impl fmt::Display for ExportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExportType::Func => "Func",
            ExportType::Table => "Table",
            ExportType::Memory => "Memory",
            ExportType::Global => "Global",
        };
        f.write_str(s)
    }
}

/// `raw` is the spelling in the source; synthesized identifiers have an empty raw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identifier {
    pub value: String,
    pub raw: String,
}

impl Identifier {
    pub fn is_synthesized(&self) -> bool {
        self.raw.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NumberLiteral {
    pub value: i64,
    pub raw: String,
}

impl NumberLiteral {
    pub fn as_u32(&self) -> u32 {
        self.value as u32
    }

    /// Two's complement wrap into 32 bits.
    pub fn as_i32(&self) -> i32 {
        self.value as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LongNumberLiteral {
    pub value: LongNumber,
    pub raw: String,
}

/// Exact bit pattern of a float literal at its instruction's width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FloatBits {
    F32(u32),
    F64(u64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FloatLiteral {
    pub bits: FloatBits,
    pub nan: bool,
    pub inf: bool,
    pub raw: String,
}

impl FloatLiteral {
    pub fn value(&self) -> f64 {
        match self.bits {
            FloatBits::F32(b) => f32::from_bits(b) as f64,
            FloatBits::F64(b) => f64::from_bits(b),
        }
    }

    pub fn to_f32_bits(&self) -> u32 {
        match self.bits {
            FloatBits::F32(b) => b,
            FloatBits::F64(b) => (f64::from_bits(b) as f32).to_bits(),
        }
    }

    pub fn to_f64_bits(&self) -> u64 {
        match self.bits {
            FloatBits::F32(b) => (f32::from_bits(b) as f64).to_bits(),
            FloatBits::F64(b) => b,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValtypeLiteral {
    pub name: Valtype,
}

/// A reference to a function, local, global, type, label, memory or table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Index {
    NumberLiteral(NumberLiteral),
    Identifier(Identifier),
}

impl Index {
    pub fn number(&self) -> Option<u32> {
        match self {
            Index::NumberLiteral(n) => Some(n.as_u32()),
            Index::Identifier(_) => None,
        }
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Index::NumberLiteral(n) => write!(f, "{}", n.value),
            Index::Identifier(id) => write!(f, "${}", id.value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FuncParam {
    pub id: Option<String>,
    pub valtype: Valtype,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Signature {
    pub params: Vec<FuncParam>,
    pub results: Vec<Valtype>,
}

impl Signature {
    pub fn param_types(&self) -> Vec<Valtype> {
        self.params.iter().map(|p| p.valtype).collect()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self.params.iter().map(|p| p.valtype.as_str()).collect();
        let results: Vec<&str> = self.results.iter().map(|r| r.as_str()).collect();
        write!(f, "[{}] -> [{}]", params.join(", "), results.join(", "))
    }
}

/// Either an inline signature or a reference into the type section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SignatureRef {
    Inline(Signature),
    Ref(Index),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Limit {
    pub min: u32,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GlobalType {
    pub valtype: Valtype,
    pub mutability: Mutability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemArg {
    pub align: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Program {
    pub body: Vec<Node>,
}

impl Program {
    /// The first module in the program body.
    pub fn module(&self) -> Option<&Module> {
        self.body.iter().find_map(|n| match n {
            Node::Module(m) => Some(m),
            _ => None,
        })
    }

    pub fn module_mut(&mut self) -> Option<&mut Module> {
        self.body.iter_mut().find_map(|n| match n {
            Node::Module(m) => Some(m),
            _ => None,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Module {
    pub id: Option<String>,
    pub fields: Vec<Node>,
    pub metadata: Option<ModuleMetadata>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ModuleMetadata {
    pub sections: Vec<SectionMetadata>,
    pub function_names: Vec<FunctionNameMetadata>,
    pub local_names: Vec<LocalNameMetadata>,
    pub module_name: Option<ModuleNameMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleNameMetadata {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionNameMetadata {
    pub value: String,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalNameMetadata {
    pub value: String,
    pub local_index: u32,
    pub function_index: u32,
}

/// Position of a section in the binary it was decoded from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionMetadata {
    pub section: String,
    pub start_offset: usize,
    pub size: NumberLiteral,
    pub vector_of_size: NumberLiteral,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeInstruction {
    pub id: Option<Identifier>,
    pub functype: Signature,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuncMetadata {
    pub body_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Func {
    pub name: Identifier,
    pub signature: SignatureRef,
    pub locals: Vec<FuncParam>,
    pub body: Vec<Node>,
    pub metadata: Option<FuncMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Global {
    pub global_type: GlobalType,
    pub init: Vec<Node>,
    pub name: Option<Identifier>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub element_type: String,
    pub limits: Limit,
    pub name: Option<Identifier>,
    pub elements: Vec<Index>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Memory {
    pub limits: Limit,
    pub id: Option<Identifier>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuncImportDescr {
    pub id: Identifier,
    pub signature: SignatureRef,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ImportDescr {
    FuncImportDescr(FuncImportDescr),
    GlobalType(GlobalType),
    Memory(Memory),
    Table(Table),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleImport {
    pub module: String,
    pub name: String,
    pub descr: ImportDescr,
    /// Text-format name bound by a global import, whose descriptor has none.
    pub id: Option<Identifier>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleExportDescr {
    pub export_type: ExportType,
    pub id: Index,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleExport {
    pub name: String,
    pub descr: ModuleExportDescr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Start {
    pub index: Index,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Elem {
    pub table: Index,
    pub offset: Vec<Node>,
    pub funcs: Vec<Index>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ByteArray {
    pub values: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Data {
    pub memory_index: Index,
    pub offset: Vec<Node>,
    pub init: ByteArray,
}

/// A plain instruction: `id` is the mnemonic without its type prefix, `object`
/// the prefix (`i32` in `i32.add`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instr {
    pub id: String,
    pub object: Option<Valtype>,
    pub args: Vec<Node>,
    pub mem_arg: Option<MemArg>,
}

impl Instr {
    /// Full mnemonic, e.g. `i32.add` or `get_local`.
    pub fn mnemonic(&self) -> String {
        match self.object {
            Some(object) => format!("{}.{}", object, self.id),
            None => self.id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockInstruction {
    pub label: Identifier,
    pub instr: Vec<Node>,
    pub result: Option<Valtype>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopInstruction {
    pub label: Identifier,
    pub result: Option<Valtype>,
    pub instr: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IfInstruction {
    pub test_label: Identifier,
    pub result: Option<Valtype>,
    pub consequent: Vec<Node>,
    pub alternate: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallInstruction {
    pub index: Index,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallIndirectInstruction {
    pub signature: SignatureRef,
}

/// Every node of the tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Node {
    Program(Program),
    Module(Module),
    ModuleMetadata(ModuleMetadata),
    ModuleNameMetadata(ModuleNameMetadata),
    FunctionNameMetadata(FunctionNameMetadata),
    LocalNameMetadata(LocalNameMetadata),
    SectionMetadata(SectionMetadata),
    TypeInstruction(TypeInstruction),
    Func(Func),
    Signature(Signature),
    Instr(Instr),
    BlockInstruction(BlockInstruction),
    LoopInstruction(LoopInstruction),
    IfInstruction(IfInstruction),
    CallInstruction(CallInstruction),
    CallIndirectInstruction(CallIndirectInstruction),
    NumberLiteral(NumberLiteral),
    LongNumberLiteral(LongNumberLiteral),
    FloatLiteral(FloatLiteral),
    ValtypeLiteral(ValtypeLiteral),
    Identifier(Identifier),
    GlobalType(GlobalType),
    Global(Global),
    Table(Table),
    Memory(Memory),
    Limit(Limit),
    FuncImportDescr(FuncImportDescr),
    ModuleImport(ModuleImport),
    ModuleExportDescr(ModuleExportDescr),
    ModuleExport(ModuleExport),
    Start(Start),
    Elem(Elem),
    Data(Data),
    ByteArray(ByteArray),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Program(_) => NodeKind::Program,
            Node::Module(_) => NodeKind::Module,
            Node::ModuleMetadata(_) => NodeKind::ModuleMetadata,
            Node::ModuleNameMetadata(_) => NodeKind::ModuleNameMetadata,
            Node::FunctionNameMetadata(_) => NodeKind::FunctionNameMetadata,
            Node::LocalNameMetadata(_) => NodeKind::LocalNameMetadata,
            Node::SectionMetadata(_) => NodeKind::SectionMetadata,
            Node::TypeInstruction(_) => NodeKind::TypeInstruction,
            Node::Func(_) => NodeKind::Func,
            Node::Signature(_) => NodeKind::Signature,
            Node::Instr(_) => NodeKind::Instr,
            Node::BlockInstruction(_) => NodeKind::BlockInstruction,
            Node::LoopInstruction(_) => NodeKind::LoopInstruction,
            Node::IfInstruction(_) => NodeKind::IfInstruction,
            Node::CallInstruction(_) => NodeKind::CallInstruction,
            Node::CallIndirectInstruction(_) => NodeKind::CallIndirectInstruction,
            Node::NumberLiteral(_) => NodeKind::NumberLiteral,
            Node::LongNumberLiteral(_) => NodeKind::LongNumberLiteral,
            Node::FloatLiteral(_) => NodeKind::FloatLiteral,
            Node::ValtypeLiteral(_) => NodeKind::ValtypeLiteral,
            Node::Identifier(_) => NodeKind::Identifier,
            Node::GlobalType(_) => NodeKind::GlobalType,
            Node::Global(_) => NodeKind::Global,
            Node::Table(_) => NodeKind::Table,
            Node::Memory(_) => NodeKind::Memory,
            Node::Limit(_) => NodeKind::Limit,
            Node::FuncImportDescr(_) => NodeKind::FuncImportDescr,
            Node::ModuleImport(_) => NodeKind::ModuleImport,
            Node::ModuleExportDescr(_) => NodeKind::ModuleExportDescr,
            Node::ModuleExport(_) => NodeKind::ModuleExport,
            Node::Start(_) => NodeKind::Start,
            Node::Elem(_) => NodeKind::Elem,
            Node::Data(_) => NodeKind::Data,
            Node::ByteArray(_) => NodeKind::ByteArray,
        }
    }

    pub fn is(&self, union: UnionKind) -> bool {
        self.kind().is(union)
    }

    /// The instruction id used by the validator and interpreter, e.g. `i32.add`,
    /// `block`, `call`. `None` for nodes that are not instructions.
    pub fn instruction_name(&self) -> Option<String> {
        match self {
            Node::Instr(i) => Some(i.mnemonic()),
            Node::BlockInstruction(_) => Some("block".to_string()),
            Node::LoopInstruction(_) => Some("loop".to_string()),
            Node::IfInstruction(_) => Some("if".to_string()),
            Node::CallInstruction(_) => Some("call".to_string()),
            Node::CallIndirectInstruction(_) => Some("call_indirect".to_string()),
            _ => None,
        }
    }
}

impl From<Index> for Node {
    fn from(index: Index) -> Node {
        match index {
            Index::NumberLiteral(n) => Node::NumberLiteral(n),
            Index::Identifier(id) => Node::Identifier(id),
        }
    }
}
