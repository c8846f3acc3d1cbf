//! Compile-time rewrites run before validation and execution.
//!
//! [`denormalize_type_references`] inlines every signature that points into the
//! type section, [`identifier_to_index`] then turns every symbolic index into a
//! number. After both passes the validator and interpreter only ever see inline
//! signatures and numeric indices.

use super::builder::number_literal;
use super::traverse::{traverse_module, NodeMut, Visitors};
use super::*;
use std::collections::HashMap;

/// The index space an identifier was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    Function,
    Local,
    Global,
    Label,
    Memory,
    Table,
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Space::Function => "function",
            Space::Local => "local",
            Space::Global => "global",
            Space::Label => "label",
            Space::Memory => "memory",
            Space::Table => "table",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("unknown {space} ${name}")]
    UnresolvedIdentifier { space: Space, name: String },
    #[error("A type instruction reference was not found: {0}")]
    UnknownType(String),
}

/// Runs both passes over every module of the program.
pub fn run(program: &mut Program) -> Result<(), TransformError> {
    for node in program.body.iter_mut() {
        if let Node::Module(module) = node {
            denormalize_type_references(module)?;
            identifier_to_index(module)?;
        }
    }
    Ok(())
}

/// Replaces `(type N)` / `(type $t)` signatures on functions, function imports and
/// `call_indirect` with a copy of the referenced type.
pub fn denormalize_type_references(module: &mut Module) -> Result<(), TransformError> {
    let mut types: Vec<(Option<String>, Signature)> = Vec::new();
    {
        let mut collect = Visitors::new().on_key(NodeKind::TypeInstruction, |path| {
            if let NodeMut::TypeInstruction(t) = &path.node {
                types.push((t.id.as_ref().map(|id| id.value.clone()), t.functype.clone()));
            }
        });
        traverse_module(module, &mut collect);
    }

    let mut failure = None;
    {
        let mut rewrite = Visitors::new().on_key(UnionKind::Node, |path| {
            let signature = match &mut path.node {
                NodeMut::Func(f) => &mut f.signature,
                NodeMut::CallIndirectInstruction(c) => &mut c.signature,
                NodeMut::FuncImportDescr(d) => &mut d.signature,
                _ => return,
            };
            if let Err(e) = inline_signature(signature, &types) {
                failure = Some(e);
                path.stop();
            }
        });
        traverse_module(module, &mut rewrite);
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn inline_signature(
    signature: &mut SignatureRef,
    types: &[(Option<String>, Signature)],
) -> Result<(), TransformError> {
    let found = match &*signature {
        SignatureRef::Inline(_) => return Ok(()),
        SignatureRef::Ref(Index::NumberLiteral(n)) => types.get(n.as_u32() as usize),
        SignatureRef::Ref(Index::Identifier(id)) => types
            .iter()
            .find(|(name, _)| name.as_deref() == Some(id.value.as_str())),
    };
    match found {
        Some((_, functype)) => {
            *signature = SignatureRef::Inline(functype.clone());
            Ok(())
        }
        None => {
            let reference = match &*signature {
                SignatureRef::Ref(index) => index.to_string(),
                SignatureRef::Inline(sig) => sig.to_string(),
            };
            Err(TransformError::UnknownType(reference))
        }
    }
}

/// Identifier to position maps for the module-level index spaces. Imports take
/// the lowest positions in declaration order.
#[derive(Debug, Default)]
struct Namespaces {
    functions: HashMap<String, u32>,
    globals: HashMap<String, u32>,
    memories: HashMap<String, u32>,
    tables: HashMap<String, u32>,
}

fn declare(map: &mut HashMap<String, u32>, counter: &mut u32, name: Option<&Identifier>) {
    if let Some(name) = name {
        map.entry(name.value.clone()).or_insert(*counter);
    }
    *counter += 1;
}

impl Namespaces {
    fn of(module: &Module) -> Namespaces {
        let mut spaces = Namespaces::default();
        let (mut funcs, mut globals, mut memories, mut tables) = (0, 0, 0, 0);
        for field in module.fields.iter() {
            match field {
                Node::ModuleImport(import) => match &import.descr {
                    ImportDescr::FuncImportDescr(d) => {
                        declare(&mut spaces.functions, &mut funcs, Some(&d.id))
                    }
                    ImportDescr::GlobalType(_) => {
                        declare(&mut spaces.globals, &mut globals, import.id.as_ref())
                    }
                    ImportDescr::Memory(m) => {
                        declare(&mut spaces.memories, &mut memories, m.id.as_ref())
                    }
                    ImportDescr::Table(t) => declare(&mut spaces.tables, &mut tables, t.name.as_ref()),
                },
                Node::Func(f) => declare(&mut spaces.functions, &mut funcs, Some(&f.name)),
                Node::Global(g) => declare(&mut spaces.globals, &mut globals, g.name.as_ref()),
                Node::Memory(m) => declare(&mut spaces.memories, &mut memories, m.id.as_ref()),
                Node::Table(t) => declare(&mut spaces.tables, &mut tables, t.name.as_ref()),
                _ => {}
            }
        }
        spaces
    }

    fn lookup(&self, space: Space, name: &str) -> Option<u32> {
        let map = match space {
            Space::Function => &self.functions,
            Space::Global => &self.globals,
            Space::Memory => &self.memories,
            Space::Table => &self.tables,
            Space::Local | Space::Label => return None,
        };
        map.get(name).copied()
    }

    fn resolve(&self, space: Space, index: &mut Index) -> Result<(), TransformError> {
        if let Index::Identifier(id) = index {
            let position = self
                .lookup(space, &id.value)
                .ok_or_else(|| TransformError::UnresolvedIdentifier {
                    space,
                    name: id.value.clone(),
                })?;
            *index = Index::NumberLiteral(number_literal(position as i64));
        }
        Ok(())
    }
}

/// Per-function lookup state: named params and locals, and the enclosing labels
/// (innermost last).
struct Scope<'a> {
    spaces: &'a Namespaces,
    locals: HashMap<String, u32>,
    labels: Vec<String>,
}

impl Scope<'_> {
    fn resolve_arg(&self, space: Space, arg: &mut Node) -> Result<(), TransformError> {
        let name = match arg {
            Node::Identifier(id) => id.value.clone(),
            _ => return Ok(()),
        };
        let position = match space {
            Space::Local => self.locals.get(&name).copied(),
            Space::Label => self
                .labels
                .iter()
                .rev()
                .position(|label| *label == name)
                .map(|depth| depth as u32),
            _ => self.spaces.lookup(space, &name),
        };
        match position {
            Some(position) => {
                *arg = Node::NumberLiteral(number_literal(position as i64));
                Ok(())
            }
            None => Err(TransformError::UnresolvedIdentifier { space, name }),
        }
    }

    fn resolve_instr(&self, instr: &mut Instr) -> Result<(), TransformError> {
        match instr.id.as_str() {
            "get_local" | "set_local" | "tee_local" => {
                if let Some(arg) = instr.args.first_mut() {
                    self.resolve_arg(Space::Local, arg)?;
                }
            }
            "get_global" | "set_global" => {
                if let Some(arg) = instr.args.first_mut() {
                    self.resolve_arg(Space::Global, arg)?;
                }
            }
            "br" | "br_if" | "br_table" => {
                for arg in instr.args.iter_mut() {
                    self.resolve_arg(Space::Label, arg)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn resolve_body(&mut self, body: &mut [Node]) -> Result<(), TransformError> {
        for node in body.iter_mut() {
            match node {
                Node::Instr(instr) => self.resolve_instr(instr)?,
                Node::CallInstruction(call) => self.spaces.resolve(Space::Function, &mut call.index)?,
                Node::BlockInstruction(block) => {
                    self.labels.push(block.label.value.clone());
                    self.resolve_body(&mut block.instr)?;
                    self.labels.pop();
                }
                Node::LoopInstruction(block) => {
                    self.labels.push(block.label.value.clone());
                    self.resolve_body(&mut block.instr)?;
                    self.labels.pop();
                }
                Node::IfInstruction(block) => {
                    self.labels.push(block.test_label.value.clone());
                    self.resolve_body(&mut block.consequent)?;
                    self.resolve_body(&mut block.alternate)?;
                    self.labels.pop();
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn resolve_func(func: &mut Func, spaces: &Namespaces) -> Result<(), TransformError> {
    let mut locals = HashMap::new();
    let params: &[FuncParam] = match &func.signature {
        SignatureRef::Inline(sig) => sig.params.as_slice(),
        SignatureRef::Ref(_) => &[],
    };
    for (position, param) in params.iter().chain(func.locals.iter()).enumerate() {
        if let Some(id) = &param.id {
            locals.entry(id.clone()).or_insert(position as u32);
        }
    }
    let mut scope = Scope {
        spaces,
        locals,
        labels: Vec::new(),
    };
    scope.resolve_body(&mut func.body)
}

fn resolve_const_expr(expr: &mut [Node], spaces: &Namespaces) -> Result<(), TransformError> {
    let mut scope = Scope {
        spaces,
        locals: HashMap::new(),
        labels: Vec::new(),
    };
    scope.resolve_body(expr)
}

/// Rewrites every symbolic function, local, global, label, memory and table
/// reference into its numeric index.
pub fn identifier_to_index(module: &mut Module) -> Result<(), TransformError> {
    let spaces = Namespaces::of(module);
    for field in module.fields.iter_mut() {
        match field {
            Node::Func(func) => resolve_func(func, &spaces)?,
            Node::Start(start) => spaces.resolve(Space::Function, &mut start.index)?,
            Node::ModuleExport(export) => {
                let space = match export.descr.export_type {
                    ExportType::Func => Space::Function,
                    ExportType::Global => Space::Global,
                    ExportType::Memory => Space::Memory,
                    ExportType::Table => Space::Table,
                };
                spaces.resolve(space, &mut export.descr.id)?;
            }
            Node::Global(global) => resolve_const_expr(&mut global.init, &spaces)?,
            Node::Table(table) => {
                for element in table.elements.iter_mut() {
                    spaces.resolve(Space::Function, element)?;
                }
            }
            Node::Elem(elem) => {
                spaces.resolve(Space::Table, &mut elem.table)?;
                resolve_const_expr(&mut elem.offset, &spaces)?;
                for func in elem.funcs.iter_mut() {
                    spaces.resolve(Space::Function, func)?;
                }
            }
            Node::Data(data) => {
                spaces.resolve(Space::Memory, &mut data.memory_index)?;
                resolve_const_expr(&mut data.offset, &spaces)?;
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder as t;

    fn named_param(name: &str, valtype: Valtype) -> FuncParam {
        FuncParam {
            id: Some(name.to_string()),
            valtype,
        }
    }

    fn ident(name: &str) -> Node {
        Node::Identifier(t::identifier(name))
    }

    fn first_func(module: &Module) -> &Func {
        module
            .fields
            .iter()
            .find_map(|f| match f {
                Node::Func(func) => Some(func),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn identifiers_become_indices() {
        let body = vec![
            t::instruction("get_local", vec![ident("b")]).unwrap(),
            t::call_instruction(t::identifier_index("callee")),
            t::block_instruction(
                t::identifier("outer"),
                vec![t::loop_instruction(
                    t::identifier("inner"),
                    None,
                    vec![t::instruction("br", vec![ident("outer")]).unwrap()],
                )
                .unwrap()],
                None,
            )
            .unwrap(),
            t::instruction("set_global", vec![ident("g")]).unwrap(),
        ];
        let sig = t::signature(
            vec![named_param("a", Valtype::I32), named_param("b", Valtype::I32)],
            vec![],
        );
        let mut module = Module {
            id: None,
            fields: vec![
                t::module_import(
                    "env",
                    "callee",
                    ImportDescr::FuncImportDescr(FuncImportDescr {
                        id: t::identifier("callee"),
                        signature: SignatureRef::Inline(Signature::default()),
                    }),
                ),
                t::global(
                    t::global_type(Valtype::I32, Mutability::Var),
                    vec![t::object_instruction("const", Valtype::I32, vec![Node::NumberLiteral(t::number_literal(0))]).unwrap()],
                    Some(t::identifier("g")),
                )
                .unwrap(),
                t::func(t::identifier("main"), SignatureRef::Inline(sig), vec![], body).unwrap(),
                t::module_export("main", ExportType::Func, t::identifier_index("main")),
                t::start(t::identifier_index("main")),
            ],
            metadata: None,
        };

        identifier_to_index(&mut module).unwrap();

        let func = first_func(&module);
        match &func.body[0] {
            Node::Instr(i) => assert_eq!(i.args, vec![Node::NumberLiteral(t::number_literal(1))]),
            other => panic!("unexpected {:?}", other),
        }
        match &func.body[1] {
            Node::CallInstruction(c) => assert_eq!(c.index.number(), Some(0)),
            other => panic!("unexpected {:?}", other),
        }
        match &func.body[2] {
            Node::BlockInstruction(b) => match &b.instr[0] {
                Node::LoopInstruction(l) => match &l.instr[0] {
                    Node::Instr(br) => {
                        assert_eq!(br.args, vec![Node::NumberLiteral(t::number_literal(1))])
                    }
                    other => panic!("unexpected {:?}", other),
                },
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
        match &func.body[3] {
            Node::Instr(i) => assert_eq!(i.args, vec![Node::NumberLiteral(t::number_literal(0))]),
            other => panic!("unexpected {:?}", other),
        }
        match &module.fields[3] {
            Node::ModuleExport(e) => assert_eq!(e.descr.id.number(), Some(1)),
            other => panic!("unexpected {:?}", other),
        }
        match &module.fields[4] {
            Node::Start(s) => assert_eq!(s.index.number(), Some(1)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_identifier_is_reported() {
        let body = vec![t::instruction("get_local", vec![ident("nope")]).unwrap()];
        let mut module = Module {
            id: None,
            fields: vec![t::func(
                t::identifier("f"),
                SignatureRef::Inline(Signature::default()),
                vec![],
                body,
            )
            .unwrap()],
            metadata: None,
        };
        assert_eq!(
            identifier_to_index(&mut module),
            Err(TransformError::UnresolvedIdentifier {
                space: Space::Local,
                name: "nope".to_string()
            })
        );
    }

    #[test]
    fn type_references_are_inlined() {
        let functype = t::signature(t::anonymous_params(&[Valtype::I64]), vec![Valtype::I64]);
        let mut module = Module {
            id: None,
            fields: vec![
                t::type_instruction(Some(t::identifier("t")), functype.clone()),
                t::func(
                    t::identifier("f"),
                    SignatureRef::Ref(t::identifier_index("t")),
                    vec![],
                    vec![t::call_indirect_instruction(SignatureRef::Ref(t::index_literal(0)))],
                )
                .unwrap(),
            ],
            metadata: None,
        };

        denormalize_type_references(&mut module).unwrap();

        let func = first_func(&module);
        assert_eq!(func.signature, SignatureRef::Inline(functype.clone()));
        match &func.body[0] {
            Node::CallIndirectInstruction(c) => {
                assert_eq!(c.signature, SignatureRef::Inline(functype))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_type_reference_fails() {
        let mut module = Module {
            id: None,
            fields: vec![t::func(
                t::identifier("f"),
                SignatureRef::Ref(t::index_literal(3)),
                vec![],
                vec![],
            )
            .unwrap()],
            metadata: None,
        };
        assert_eq!(
            denormalize_type_references(&mut module),
            Err(TransformError::UnknownType("3".to_string()))
        );
    }
}
