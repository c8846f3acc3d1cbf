//! Depth-first pre-order traversal with path mutation.
//!
//! Visitors are keyed by a concrete [`NodeKind`] or by a [`UnionKind`]; for every
//! node the `Node` visitors fire first, then the ones for its own kind, then the
//! ones for each of its union categories.
//!
//! A visitor receives a [`Path`] bound to the node being visited. Nodes that sit in
//! a list (module fields, instruction sequences, instruction arguments) can be
//! removed, replaced or given siblings. A removed node is dropped from its list
//! before the walk moves on, so neither its remaining visitors nor its subtree are
//! visited again in the same walk. Replacements are walked in place of the
//! original; inserted siblings are not visited by the walk that inserted them.

use super::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraverseError {
    #[error("unexpected visitor key {0:?}: not a node type or union type")]
    UnknownVisitorKey(String),
    #[error("{0} is not held in a list; it cannot be removed, replaced or given siblings")]
    NotInList(NodeKind),
    #[error("shift is only supported on SectionMetadata, got {0}")]
    CannotShift(NodeKind),
}

/// Mutable view of any node, including children stored as concrete structs.
#[derive(Debug)]
pub enum NodeMut<'a> {
    Program(&'a mut Program),
    Module(&'a mut Module),
    ModuleMetadata(&'a mut ModuleMetadata),
    ModuleNameMetadata(&'a mut ModuleNameMetadata),
    FunctionNameMetadata(&'a mut FunctionNameMetadata),
    LocalNameMetadata(&'a mut LocalNameMetadata),
    SectionMetadata(&'a mut SectionMetadata),
    TypeInstruction(&'a mut TypeInstruction),
    Func(&'a mut Func),
    Signature(&'a mut Signature),
    Instr(&'a mut Instr),
    BlockInstruction(&'a mut BlockInstruction),
    LoopInstruction(&'a mut LoopInstruction),
    IfInstruction(&'a mut IfInstruction),
    CallInstruction(&'a mut CallInstruction),
    CallIndirectInstruction(&'a mut CallIndirectInstruction),
    NumberLiteral(&'a mut NumberLiteral),
    LongNumberLiteral(&'a mut LongNumberLiteral),
    FloatLiteral(&'a mut FloatLiteral),
    ValtypeLiteral(&'a mut ValtypeLiteral),
    Identifier(&'a mut Identifier),
    GlobalType(&'a mut GlobalType),
    Global(&'a mut Global),
    Table(&'a mut Table),
    Memory(&'a mut Memory),
    Limit(&'a mut Limit),
    FuncImportDescr(&'a mut FuncImportDescr),
    ModuleImport(&'a mut ModuleImport),
    ModuleExportDescr(&'a mut ModuleExportDescr),
    ModuleExport(&'a mut ModuleExport),
    Start(&'a mut Start),
    Elem(&'a mut Elem),
    Data(&'a mut Data),
    ByteArray(&'a mut ByteArray),
}

impl Node {
    pub fn as_node_mut(&mut self) -> NodeMut<'_> {
        match self {
            Node::Program(n) => NodeMut::Program(n),
            Node::Module(n) => NodeMut::Module(n),
            Node::ModuleMetadata(n) => NodeMut::ModuleMetadata(n),
            Node::ModuleNameMetadata(n) => NodeMut::ModuleNameMetadata(n),
            Node::FunctionNameMetadata(n) => NodeMut::FunctionNameMetadata(n),
            Node::LocalNameMetadata(n) => NodeMut::LocalNameMetadata(n),
            Node::SectionMetadata(n) => NodeMut::SectionMetadata(n),
            Node::TypeInstruction(n) => NodeMut::TypeInstruction(n),
            Node::Func(n) => NodeMut::Func(n),
            Node::Signature(n) => NodeMut::Signature(n),
            Node::Instr(n) => NodeMut::Instr(n),
            Node::BlockInstruction(n) => NodeMut::BlockInstruction(n),
            Node::LoopInstruction(n) => NodeMut::LoopInstruction(n),
            Node::IfInstruction(n) => NodeMut::IfInstruction(n),
            Node::CallInstruction(n) => NodeMut::CallInstruction(n),
            Node::CallIndirectInstruction(n) => NodeMut::CallIndirectInstruction(n),
            Node::NumberLiteral(n) => NodeMut::NumberLiteral(n),
            Node::LongNumberLiteral(n) => NodeMut::LongNumberLiteral(n),
            Node::FloatLiteral(n) => NodeMut::FloatLiteral(n),
            Node::ValtypeLiteral(n) => NodeMut::ValtypeLiteral(n),
            Node::Identifier(n) => NodeMut::Identifier(n),
            Node::GlobalType(n) => NodeMut::GlobalType(n),
            Node::Global(n) => NodeMut::Global(n),
            Node::Table(n) => NodeMut::Table(n),
            Node::Memory(n) => NodeMut::Memory(n),
            Node::Limit(n) => NodeMut::Limit(n),
            Node::FuncImportDescr(n) => NodeMut::FuncImportDescr(n),
            Node::ModuleImport(n) => NodeMut::ModuleImport(n),
            Node::ModuleExportDescr(n) => NodeMut::ModuleExportDescr(n),
            Node::ModuleExport(n) => NodeMut::ModuleExport(n),
            Node::Start(n) => NodeMut::Start(n),
            Node::Elem(n) => NodeMut::Elem(n),
            Node::Data(n) => NodeMut::Data(n),
            Node::ByteArray(n) => NodeMut::ByteArray(n),
        }
    }
}

impl NodeMut<'_> {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeMut::Program(_) => NodeKind::Program,
            NodeMut::Module(_) => NodeKind::Module,
            NodeMut::ModuleMetadata(_) => NodeKind::ModuleMetadata,
            NodeMut::ModuleNameMetadata(_) => NodeKind::ModuleNameMetadata,
            NodeMut::FunctionNameMetadata(_) => NodeKind::FunctionNameMetadata,
            NodeMut::LocalNameMetadata(_) => NodeKind::LocalNameMetadata,
            NodeMut::SectionMetadata(_) => NodeKind::SectionMetadata,
            NodeMut::TypeInstruction(_) => NodeKind::TypeInstruction,
            NodeMut::Func(_) => NodeKind::Func,
            NodeMut::Signature(_) => NodeKind::Signature,
            NodeMut::Instr(_) => NodeKind::Instr,
            NodeMut::BlockInstruction(_) => NodeKind::BlockInstruction,
            NodeMut::LoopInstruction(_) => NodeKind::LoopInstruction,
            NodeMut::IfInstruction(_) => NodeKind::IfInstruction,
            NodeMut::CallInstruction(_) => NodeKind::CallInstruction,
            NodeMut::CallIndirectInstruction(_) => NodeKind::CallIndirectInstruction,
            NodeMut::NumberLiteral(_) => NodeKind::NumberLiteral,
            NodeMut::LongNumberLiteral(_) => NodeKind::LongNumberLiteral,
            NodeMut::FloatLiteral(_) => NodeKind::FloatLiteral,
            NodeMut::ValtypeLiteral(_) => NodeKind::ValtypeLiteral,
            NodeMut::Identifier(_) => NodeKind::Identifier,
            NodeMut::GlobalType(_) => NodeKind::GlobalType,
            NodeMut::Global(_) => NodeKind::Global,
            NodeMut::Table(_) => NodeKind::Table,
            NodeMut::Memory(_) => NodeKind::Memory,
            NodeMut::Limit(_) => NodeKind::Limit,
            NodeMut::FuncImportDescr(_) => NodeKind::FuncImportDescr,
            NodeMut::ModuleImport(_) => NodeKind::ModuleImport,
            NodeMut::ModuleExportDescr(_) => NodeKind::ModuleExportDescr,
            NodeMut::ModuleExport(_) => NodeKind::ModuleExport,
            NodeMut::Start(_) => NodeKind::Start,
            NodeMut::Elem(_) => NodeKind::Elem,
            NodeMut::Data(_) => NodeKind::Data,
            NodeMut::ByteArray(_) => NodeKind::ByteArray,
        }
    }
}

#[derive(Debug, Default)]
struct Actions {
    stop: bool,
    removed: bool,
    replacement: Option<Node>,
    before: Vec<Node>,
    after: Vec<Node>,
}

/// The traversal position handed to visitors.
pub struct Path<'p, 'n> {
    pub node: NodeMut<'n>,
    ancestors: &'p [NodeKind],
    in_list: bool,
    actions: Actions,
}

impl Path<'_, '_> {
    pub fn kind(&self) -> NodeKind {
        self.node.kind()
    }

    pub fn parent_kind(&self) -> Option<NodeKind> {
        self.ancestors.last().copied()
    }

    /// Innermost ancestor matching `key`.
    pub fn find_parent(&self, key: VisitorKey) -> Option<NodeKind> {
        self.ancestors.iter().rev().copied().find(|k| key.matches(*k))
    }

    pub fn depth(&self) -> usize {
        self.ancestors.len()
    }

    /// Ends the whole walk once the current visitor returns.
    pub fn stop(&mut self) {
        self.actions.stop = true;
    }

    pub fn is_removed(&self) -> bool {
        self.actions.removed
    }

    fn require_list(&self) -> Result<(), TraverseError> {
        if self.in_list {
            Ok(())
        } else {
            Err(TraverseError::NotInList(self.kind()))
        }
    }

    pub fn remove(&mut self) -> Result<(), TraverseError> {
        self.require_list()?;
        self.actions.removed = true;
        Ok(())
    }

    pub fn replace_with(&mut self, node: Node) -> Result<(), TraverseError> {
        self.require_list()?;
        self.actions.replacement = Some(node);
        Ok(())
    }

    pub fn insert_before(&mut self, node: Node) -> Result<(), TraverseError> {
        self.require_list()?;
        self.actions.before.push(node);
        Ok(())
    }

    pub fn insert_after(&mut self, node: Node) -> Result<(), TraverseError> {
        self.require_list()?;
        self.actions.after.push(node);
        Ok(())
    }

    /// Moves a section's recorded start offset by `delta` bytes.
    pub fn shift(&mut self, delta: isize) -> Result<(), TraverseError> {
        match &mut self.node {
            NodeMut::SectionMetadata(section) => {
                section.start_offset = (section.start_offset as isize + delta).max(0) as usize;
                Ok(())
            }
            other => Err(TraverseError::CannotShift(other.kind())),
        }
    }
}

type Handler<'v> = Box<dyn FnMut(&mut Path<'_, '_>) + 'v>;

/// A set of visitor callbacks.
#[derive(Default)]
pub struct Visitors<'v> {
    handlers: Vec<(VisitorKey, Handler<'v>)>,
}

impl<'v> Visitors<'v> {
    pub fn new() -> Self {
        Visitors { handlers: Vec::new() }
    }

    /// Registers `f` under a node or union type name; unknown names are rejected.
    pub fn on<F>(self, key: &str, f: F) -> Result<Self, TraverseError>
    where
        F: FnMut(&mut Path<'_, '_>) + 'v,
    {
        let key = key.parse::<VisitorKey>()?;
        Ok(self.on_key(key, f))
    }

    pub fn on_key<F>(mut self, key: impl Into<VisitorKey>, f: F) -> Self
    where
        F: FnMut(&mut Path<'_, '_>) + 'v,
    {
        self.handlers.push((key.into(), Box::new(f)));
        self
    }
}

/// Walks `root` and everything below it.
pub fn traverse(root: NodeMut<'_>, visitors: &mut Visitors<'_>) {
    let mut walker = Walker {
        visitors,
        ancestors: Vec::new(),
    };
    walker.walk_single(root);
}

pub fn traverse_program(program: &mut Program, visitors: &mut Visitors<'_>) {
    traverse(NodeMut::Program(program), visitors)
}

pub fn traverse_module(module: &mut Module, visitors: &mut Visitors<'_>) {
    traverse(NodeMut::Module(module), visitors)
}

struct Walker<'w, 'v> {
    visitors: &'w mut Visitors<'v>,
    ancestors: Vec<NodeKind>,
}

impl Walker<'_, '_> {
    fn visit<'n>(&mut self, node: NodeMut<'n>, in_list: bool) -> (NodeMut<'n>, Actions) {
        let kind = node.kind();
        let mut path = Path {
            node,
            ancestors: &self.ancestors,
            in_list,
            actions: Actions::default(),
        };

        let passes = std::iter::once(VisitorKey::Union(UnionKind::Node))
            .chain(std::iter::once(VisitorKey::Kind(kind)))
            .chain(kind.unions().iter().map(|u| VisitorKey::Union(*u)));

        'passes: for wanted in passes {
            for (key, handler) in self.visitors.handlers.iter_mut() {
                if *key != wanted {
                    continue;
                }
                handler(&mut path);
                if path.actions.removed || path.actions.stop {
                    break 'passes;
                }
            }
        }

        let Path { node, actions, .. } = path;
        (node, actions)
    }

    /// Returns `true` when the walk was stopped.
    fn walk_single(&mut self, node: NodeMut<'_>) -> bool {
        let (node, actions) = self.visit(node, false);
        if actions.stop {
            return true;
        }
        self.walk_children(node)
    }

    fn walk_list(&mut self, list: &mut Vec<Node>) -> bool {
        let mut i = 0;
        while i < list.len() {
            let (_, actions) = self.visit(list[i].as_node_mut(), true);
            let Actions {
                stop,
                removed,
                replacement,
                before,
                after,
            } = actions;

            let after_len = after.len();
            if let Some(replacement) = replacement {
                list[i] = replacement;
            }
            if removed {
                list.remove(i);
            }
            let before_len = before.len();
            for (k, node) in before.into_iter().enumerate() {
                list.insert(i + k, node);
            }
            i += before_len;

            let after_at = if removed { i } else { i + 1 };
            for (k, node) in after.into_iter().enumerate() {
                list.insert(after_at + k, node);
            }

            if stop {
                return true;
            }
            if removed {
                i += after_len;
                continue;
            }
            if self.walk_children(list[i].as_node_mut()) {
                return true;
            }
            i += 1 + after_len;
        }
        false
    }

    fn walk_index(&mut self, index: &mut Index) -> bool {
        match index {
            Index::NumberLiteral(n) => self.walk_single(NodeMut::NumberLiteral(n)),
            Index::Identifier(id) => self.walk_single(NodeMut::Identifier(id)),
        }
    }

    fn walk_indices(&mut self, indices: &mut [Index]) -> bool {
        indices.iter_mut().any(|index| self.walk_index(index))
    }

    fn walk_signature_ref(&mut self, signature: &mut SignatureRef) -> bool {
        match signature {
            SignatureRef::Inline(sig) => self.walk_single(NodeMut::Signature(sig)),
            SignatureRef::Ref(index) => self.walk_index(index),
        }
    }

    fn walk_identifier(&mut self, id: &mut Option<Identifier>) -> bool {
        match id {
            Some(id) => self.walk_single(NodeMut::Identifier(id)),
            None => false,
        }
    }

    fn walk_children(&mut self, node: NodeMut<'_>) -> bool {
        self.ancestors.push(node.kind());
        let stopped = match node {
            NodeMut::Program(n) => self.walk_list(&mut n.body),
            NodeMut::Module(n) => {
                self.walk_list(&mut n.fields)
                    || match &mut n.metadata {
                        Some(metadata) => self.walk_single(NodeMut::ModuleMetadata(metadata)),
                        None => false,
                    }
            }
            NodeMut::ModuleMetadata(n) => {
                n.sections
                    .iter_mut()
                    .any(|s| self.walk_single(NodeMut::SectionMetadata(s)))
                    || n.function_names
                        .iter_mut()
                        .any(|f| self.walk_single(NodeMut::FunctionNameMetadata(f)))
                    || n.local_names
                        .iter_mut()
                        .any(|l| self.walk_single(NodeMut::LocalNameMetadata(l)))
                    || match &mut n.module_name {
                        Some(name) => self.walk_single(NodeMut::ModuleNameMetadata(name)),
                        None => false,
                    }
            }
            NodeMut::SectionMetadata(n) => {
                self.walk_single(NodeMut::NumberLiteral(&mut n.size))
                    || self.walk_single(NodeMut::NumberLiteral(&mut n.vector_of_size))
            }
            NodeMut::TypeInstruction(n) => {
                self.walk_identifier(&mut n.id) || self.walk_single(NodeMut::Signature(&mut n.functype))
            }
            NodeMut::Func(n) => {
                self.walk_single(NodeMut::Identifier(&mut n.name))
                    || self.walk_signature_ref(&mut n.signature)
                    || self.walk_list(&mut n.body)
            }
            NodeMut::Instr(n) => self.walk_list(&mut n.args),
            NodeMut::BlockInstruction(n) => {
                self.walk_single(NodeMut::Identifier(&mut n.label)) || self.walk_list(&mut n.instr)
            }
            NodeMut::LoopInstruction(n) => {
                self.walk_single(NodeMut::Identifier(&mut n.label)) || self.walk_list(&mut n.instr)
            }
            NodeMut::IfInstruction(n) => {
                self.walk_single(NodeMut::Identifier(&mut n.test_label))
                    || self.walk_list(&mut n.consequent)
                    || self.walk_list(&mut n.alternate)
            }
            NodeMut::CallInstruction(n) => self.walk_index(&mut n.index),
            NodeMut::CallIndirectInstruction(n) => self.walk_signature_ref(&mut n.signature),
            NodeMut::Global(n) => {
                self.walk_single(NodeMut::GlobalType(&mut n.global_type))
                    || self.walk_list(&mut n.init)
                    || self.walk_identifier(&mut n.name)
            }
            NodeMut::Table(n) => {
                self.walk_single(NodeMut::Limit(&mut n.limits))
                    || self.walk_identifier(&mut n.name)
                    || self.walk_indices(&mut n.elements)
            }
            NodeMut::Memory(n) => {
                self.walk_single(NodeMut::Limit(&mut n.limits)) || self.walk_identifier(&mut n.id)
            }
            NodeMut::FuncImportDescr(n) => {
                self.walk_single(NodeMut::Identifier(&mut n.id)) || self.walk_signature_ref(&mut n.signature)
            }
            NodeMut::ModuleImport(n) => match &mut n.descr {
                ImportDescr::FuncImportDescr(d) => self.walk_single(NodeMut::FuncImportDescr(d)),
                ImportDescr::GlobalType(d) => self.walk_single(NodeMut::GlobalType(d)),
                ImportDescr::Memory(d) => self.walk_single(NodeMut::Memory(d)),
                ImportDescr::Table(d) => self.walk_single(NodeMut::Table(d)),
            },
            NodeMut::ModuleExportDescr(n) => self.walk_index(&mut n.id),
            NodeMut::ModuleExport(n) => self.walk_single(NodeMut::ModuleExportDescr(&mut n.descr)),
            NodeMut::Start(n) => self.walk_index(&mut n.index),
            NodeMut::Elem(n) => {
                self.walk_index(&mut n.table) || self.walk_list(&mut n.offset) || self.walk_indices(&mut n.funcs)
            }
            NodeMut::Data(n) => {
                self.walk_index(&mut n.memory_index)
                    || self.walk_list(&mut n.offset)
                    || self.walk_single(NodeMut::ByteArray(&mut n.init))
            }
            NodeMut::ModuleNameMetadata(_)
            | NodeMut::FunctionNameMetadata(_)
            | NodeMut::LocalNameMetadata(_)
            | NodeMut::Signature(_)
            | NodeMut::NumberLiteral(_)
            | NodeMut::LongNumberLiteral(_)
            | NodeMut::FloatLiteral(_)
            | NodeMut::ValtypeLiteral(_)
            | NodeMut::Identifier(_)
            | NodeMut::GlobalType(_)
            | NodeMut::Limit(_)
            | NodeMut::ByteArray(_) => false,
        };
        self.ancestors.pop();
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder as t;

    fn sample_module() -> Module {
        let body = vec![
            t::instruction("get_local", vec![Node::NumberLiteral(t::number_literal(0))]).unwrap(),
            t::block_instruction(
                t::synthesized_identifier("block_0".to_string()),
                vec![t::instruction("nop", vec![]).unwrap()],
                None,
            )
            .unwrap(),
            t::instruction("drop", vec![]).unwrap(),
        ];
        let func = t::func(
            t::identifier("f"),
            SignatureRef::Inline(t::signature(t::anonymous_params(&[Valtype::I32]), vec![])),
            vec![],
            body,
        )
        .unwrap();
        Module {
            id: None,
            fields: vec![func, t::start(t::index_literal(0))],
            metadata: None,
        }
    }

    #[test]
    fn union_visitor_sees_every_instruction() {
        let mut module = sample_module();
        let mut seen = Vec::new();
        {
            let mut visitors = Visitors::new()
                .on("Instruction", |path| seen.push(path.kind()))
                .unwrap();
            traverse_module(&mut module, &mut visitors);
        }
        assert_eq!(
            seen,
            vec![
                NodeKind::Instr,
                NodeKind::BlockInstruction,
                NodeKind::Instr,
                NodeKind::Instr
            ]
        );
    }

    #[test]
    fn unknown_key_fails_fast() {
        let result = Visitors::new().on("Instrution", |_| {});
        assert!(matches!(result, Err(TraverseError::UnknownVisitorKey(_))));
    }

    #[test]
    fn stop_ends_the_walk() {
        let mut module = sample_module();
        let mut count = 0;
        {
            let mut visitors = Visitors::new().on_key(UnionKind::Node, |path| {
                count += 1;
                if path.kind() == NodeKind::Func {
                    path.stop();
                }
            });
            traverse_module(&mut module, &mut visitors);
        }
        // Module, Func
        assert_eq!(count, 2);
    }

    #[test]
    fn removed_nodes_are_skipped() {
        let mut module = sample_module();
        let mut nops = 0;
        {
            let mut visitors = Visitors::new()
                .on_key(NodeKind::BlockInstruction, |path| path.remove().unwrap())
                .on_key(UnionKind::Instruction, |path| {
                    if let NodeMut::Instr(instr) = &path.node {
                        if instr.id == "nop" {
                            nops += 1;
                        }
                    }
                });
            traverse_module(&mut module, &mut visitors);
        }
        assert_eq!(nops, 0);
        match &module.fields[0] {
            Node::Func(f) => assert_eq!(f.body.len(), 2),
            other => panic!("unexpected {:?}", other.kind()),
        }
    }

    #[test]
    fn replace_and_insert() {
        let mut module = sample_module();
        {
            let mut visitors = Visitors::new().on_key(NodeKind::Instr, |path| {
                let is_drop = matches!(&path.node, NodeMut::Instr(i) if i.id == "drop");
                if is_drop {
                    path.replace_with(t::instruction("nop", vec![]).unwrap()).unwrap();
                    path.insert_before(t::instruction("unreachable", vec![]).unwrap())
                        .unwrap();
                }
            });
            traverse_module(&mut module, &mut visitors);
        }
        let names: Vec<String> = match &module.fields[0] {
            Node::Func(f) => f.body.iter().filter_map(|n| n.instruction_name()).collect(),
            _ => vec![],
        };
        assert_eq!(names, vec!["get_local", "block", "unreachable", "nop"]);
    }

    #[test]
    fn mutation_outside_lists_is_rejected() {
        let mut module = sample_module();
        let mut errors = Vec::new();
        {
            let mut visitors = Visitors::new().on_key(NodeKind::Signature, |path| {
                errors.push(path.remove().unwrap_err());
                assert_eq!(path.parent_kind(), Some(NodeKind::Func));
                assert_eq!(path.find_parent(VisitorKey::Kind(NodeKind::Module)), Some(NodeKind::Module));
            });
            traverse_module(&mut module, &mut visitors);
        }
        assert_eq!(errors, vec![TraverseError::NotInList(NodeKind::Signature)]);
    }

    #[test]
    fn shift_moves_section_offsets() {
        let mut module = sample_module();
        module.metadata = Some(ModuleMetadata {
            sections: vec![t::section_metadata("type", 10, 4, 1)],
            ..Default::default()
        });
        {
            let mut visitors = Visitors::new().on_key(NodeKind::SectionMetadata, |path| {
                path.shift(-2).unwrap();
            });
            traverse_module(&mut module, &mut visitors);
        }
        let sections = &module.metadata.as_ref().unwrap().sections;
        assert_eq!(sections[0].start_offset, 8);
    }
}
