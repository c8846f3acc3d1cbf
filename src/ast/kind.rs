//! The closed set of node variants and their union categories.
//!
//! Category membership is an exhaustive `match` over [`NodeKind`], so adding a
//! variant without deciding its categories does not compile.

use super::traverse::TraverseError;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Program,
    Module,
    ModuleMetadata,
    ModuleNameMetadata,
    FunctionNameMetadata,
    LocalNameMetadata,
    SectionMetadata,
    TypeInstruction,
    Func,
    Signature,
    Instr,
    BlockInstruction,
    LoopInstruction,
    IfInstruction,
    CallInstruction,
    CallIndirectInstruction,
    NumberLiteral,
    LongNumberLiteral,
    FloatLiteral,
    ValtypeLiteral,
    Identifier,
    GlobalType,
    Global,
    Table,
    Memory,
    Limit,
    FuncImportDescr,
    ModuleImport,
    ModuleExportDescr,
    ModuleExport,
    Start,
    Elem,
    Data,
    ByteArray,
}

/// Abstract supertypes a visitor may be keyed on. `Node` matches every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnionKind {
    Node,
    Block,
    Instruction,
    Expression,
    NumericLiteral,
    ImportDescr,
}

use NodeKind::*;

impl NodeKind {
    pub const ALL: [NodeKind; 34] = [
        Program,
        Module,
        ModuleMetadata,
        ModuleNameMetadata,
        FunctionNameMetadata,
        LocalNameMetadata,
        SectionMetadata,
        TypeInstruction,
        Func,
        Signature,
        Instr,
        BlockInstruction,
        LoopInstruction,
        IfInstruction,
        CallInstruction,
        CallIndirectInstruction,
        NumberLiteral,
        LongNumberLiteral,
        FloatLiteral,
        ValtypeLiteral,
        Identifier,
        GlobalType,
        Global,
        Table,
        Memory,
        Limit,
        FuncImportDescr,
        ModuleImport,
        ModuleExportDescr,
        ModuleExport,
        Start,
        Elem,
        Data,
        ByteArray,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Program => "Program",
            Module => "Module",
            ModuleMetadata => "ModuleMetadata",
            ModuleNameMetadata => "ModuleNameMetadata",
            FunctionNameMetadata => "FunctionNameMetadata",
            LocalNameMetadata => "LocalNameMetadata",
            SectionMetadata => "SectionMetadata",
            TypeInstruction => "TypeInstruction",
            Func => "Func",
            Signature => "Signature",
            Instr => "Instr",
            BlockInstruction => "BlockInstruction",
            LoopInstruction => "LoopInstruction",
            IfInstruction => "IfInstruction",
            CallInstruction => "CallInstruction",
            CallIndirectInstruction => "CallIndirectInstruction",
            NumberLiteral => "NumberLiteral",
            LongNumberLiteral => "LongNumberLiteral",
            FloatLiteral => "FloatLiteral",
            ValtypeLiteral => "ValtypeLiteral",
            Identifier => "Identifier",
            GlobalType => "GlobalType",
            Global => "Global",
            Table => "Table",
            Memory => "Memory",
            Limit => "Limit",
            FuncImportDescr => "FuncImportDescr",
            ModuleImport => "ModuleImport",
            ModuleExportDescr => "ModuleExportDescr",
            ModuleExport => "ModuleExport",
            Start => "Start",
            Elem => "Elem",
            Data => "Data",
            ByteArray => "ByteArray",
        }
    }

    /// Union categories of this variant, `Node` excluded.
    pub fn unions(self) -> &'static [UnionKind] {
        use UnionKind as U;
        match self {
            LoopInstruction | BlockInstruction => &[U::Block, U::Instruction],
            Func => &[U::Block],
            Instr => &[U::Expression, U::Instruction],
            IfInstruction | CallInstruction | CallIndirectInstruction | TypeInstruction => {
                &[U::Instruction]
            }
            NumberLiteral | LongNumberLiteral | FloatLiteral => {
                &[U::NumericLiteral, U::Expression]
            }
            ValtypeLiteral | Identifier => &[U::Expression],
            GlobalType | Table | Memory | FuncImportDescr => &[U::ImportDescr],
            Program | Module | ModuleMetadata | ModuleNameMetadata | FunctionNameMetadata
            | LocalNameMetadata | SectionMetadata | Signature | Global | Limit
            | ModuleImport | ModuleExportDescr | ModuleExport | Start | Elem | Data
            | ByteArray => &[],
        }
    }

    pub fn is(self, union: UnionKind) -> bool {
        union == UnionKind::Node || self.unions().contains(&union)
    }

    pub fn from_name(name: &str) -> Option<NodeKind> {
        NodeKind::ALL.iter().copied().find(|k| k.name() == name)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl UnionKind {
    pub fn name(self) -> &'static str {
        match self {
            UnionKind::Node => "Node",
            UnionKind::Block => "Block",
            UnionKind::Instruction => "Instruction",
            UnionKind::Expression => "Expression",
            UnionKind::NumericLiteral => "NumericLiteral",
            UnionKind::ImportDescr => "ImportDescr",
        }
    }

    pub fn from_name(name: &str) -> Option<UnionKind> {
        [
            UnionKind::Node,
            UnionKind::Block,
            UnionKind::Instruction,
            UnionKind::Expression,
            UnionKind::NumericLiteral,
            UnionKind::ImportDescr,
        ]
        .iter()
        .copied()
        .find(|u| u.name() == name)
    }
}

/// What a visitor is registered for: a concrete variant or a union category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisitorKey {
    Kind(NodeKind),
    Union(UnionKind),
}

impl VisitorKey {
    pub fn matches(self, kind: NodeKind) -> bool {
        match self {
            VisitorKey::Kind(k) => k == kind,
            VisitorKey::Union(u) => kind.is(u),
        }
    }
}

impl FromStr for VisitorKey {
    type Err = TraverseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(kind) = NodeKind::from_name(s) {
            return Ok(VisitorKey::Kind(kind));
        }
        UnionKind::from_name(s)
            .map(VisitorKey::Union)
            .ok_or_else(|| TraverseError::UnknownVisitorKey(s.to_string()))
    }
}

impl From<NodeKind> for VisitorKey {
    fn from(kind: NodeKind) -> Self {
        VisitorKey::Kind(kind)
    }
}

impl From<UnionKind> for VisitorKey {
    fn from(union: UnionKind) -> Self {
        VisitorKey::Union(union)
    }
}
