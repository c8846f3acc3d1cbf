//! Flat, typed view of a module used by validation and instantiation.
//!
//! [`ModuleContext`] is built once per module and then read-only. The
//! per-function scratch state (locals, labels, return type) lives in a
//! separate [`FuncFrame`], constructed fresh for every function body.

use crate::ast::*;
use log::debug;
use std::collections::HashMap;

/// Parameter and result types of a function or type entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FuncType {
    pub args: Vec<Valtype>,
    pub result: Vec<Valtype>,
}

impl FuncType {
    pub fn new(args: Vec<Valtype>, result: Vec<Valtype>) -> Self {
        FuncType { args, result }
    }

    fn of(signature: &Signature) -> Self {
        FuncType::new(signature.param_types(), signature.results.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalEntry {
    pub valtype: Valtype,
    pub mutability: Mutability,
}

#[derive(Debug, Default)]
pub struct ModuleContext {
    funcs: Vec<FuncType>,
    func_ids: HashMap<String, usize>,
    types: Vec<FuncType>,
    globals: Vec<GlobalEntry>,
    global_ids: HashMap<String, usize>,
    mems: Vec<Limit>,
    tables: Vec<Limit>,
    start: Option<Index>,
}

impl ModuleContext {
    /// One forward pass over the fields in declaration order. Imports take
    /// the index they appear at, which is the lowest ones in a module whose
    /// imports come first.
    pub fn from_module(module: &Module) -> Self {
        let mut ctx = ModuleContext::default();

        for field in module.fields.iter() {
            match field {
                Node::Start(start) => ctx.start = Some(start.index.clone()),
                Node::TypeInstruction(t) => ctx.types.push(FuncType::of(&t.functype)),
                Node::Func(func) => {
                    let signature = ctx.resolve_signature(&func.signature);
                    ctx.add_function(Some(&func.name), signature);
                }
                Node::Global(global) => {
                    ctx.define_global(global.name.as_ref(), global.global_type);
                }
                Node::ModuleImport(import) => match &import.descr {
                    ImportDescr::GlobalType(global_type) => {
                        ctx.define_global(import.id.as_ref(), *global_type);
                    }
                    ImportDescr::Memory(memory) => ctx.mems.push(memory.limits.clone()),
                    ImportDescr::FuncImportDescr(descr) => {
                        let signature = ctx.resolve_signature(&descr.signature);
                        ctx.add_function(Some(&descr.id), signature);
                    }
                    ImportDescr::Table(table) => ctx.tables.push(table.limits.clone()),
                },
                Node::Memory(memory) => ctx.mems.push(memory.limits.clone()),
                Node::Table(table) => ctx.tables.push(table.limits.clone()),
                _ => {}
            }
        }

        debug!(
            "module context: {} funcs, {} globals, {} memories, {} tables",
            ctx.funcs.len(),
            ctx.globals.len(),
            ctx.mems.len(),
            ctx.tables.len()
        );
        ctx
    }

    /// Inline signatures as-is; type references through the type entries
    /// declared so far (an unknown one yields an empty type).
    pub fn resolve_signature(&self, signature: &SignatureRef) -> FuncType {
        match signature {
            SignatureRef::Inline(signature) => FuncType::of(signature),
            SignatureRef::Ref(index) => index
                .number()
                .and_then(|i| self.types.get(i as usize))
                .cloned()
                .unwrap_or_default(),
        }
    }

    fn add_function(&mut self, id: Option<&Identifier>, signature: FuncType) {
        debug!("add function {:?} -> {:?}", signature.args, signature.result);
        if let Some(id) = id {
            self.func_ids.insert(id.value.clone(), self.funcs.len());
        }
        self.funcs.push(signature);
    }

    fn define_global(&mut self, id: Option<&Identifier>, global_type: GlobalType) {
        if let Some(id) = id {
            self.global_ids.insert(id.value.clone(), self.globals.len());
        }
        self.globals.push(GlobalEntry {
            valtype: global_type.valtype,
            mutability: global_type.mutability,
        });
    }

    /* functions */

    pub fn has_function(&self, index: u32) -> bool {
        self.get_function(index).is_some()
    }

    pub fn get_function(&self, index: u32) -> Option<&FuncType> {
        self.funcs.get(index as usize)
    }

    pub fn function_offset(&self, id: &str) -> Option<usize> {
        self.func_ids.get(id).copied()
    }

    pub fn function_count(&self) -> usize {
        self.funcs.len()
    }

    /* types */

    pub fn has_type(&self, index: u32) -> bool {
        self.get_type(index).is_some()
    }

    pub fn get_type(&self, index: u32) -> Option<&FuncType> {
        self.types.get(index as usize)
    }

    /* globals */

    pub fn has_global(&self, index: u32) -> bool {
        self.get_global(index).is_some()
    }

    pub fn get_global(&self, index: u32) -> Option<&GlobalEntry> {
        self.globals.get(index as usize)
    }

    pub fn global_offset(&self, id: &str) -> Option<usize> {
        self.global_ids.get(id).copied()
    }

    pub fn is_mutable_global(&self, index: u32) -> bool {
        matches!(self.get_global(index), Some(g) if g.mutability == Mutability::Var)
    }

    /* memories and tables */

    pub fn has_memory(&self, index: u32) -> bool {
        self.get_memory(index).is_some()
    }

    pub fn get_memory(&self, index: u32) -> Option<&Limit> {
        self.mems.get(index as usize)
    }

    pub fn has_table(&self, index: u32) -> bool {
        (index as usize) < self.tables.len()
    }

    pub fn start(&self) -> Option<&Index> {
        self.start.as_ref()
    }
}

/// Scratch state for checking one function body.
#[derive(Debug, Clone)]
pub struct FuncFrame {
    pub name: String,
    locals: Vec<Valtype>,
    /// Branch types per enclosing label, outermost (the function) first.
    labels: Vec<Vec<Valtype>>,
    return_types: Vec<Valtype>,
}

impl FuncFrame {
    pub fn new(name: &str, return_types: Vec<Valtype>) -> Self {
        debug!("new context {}", name);
        FuncFrame {
            name: name.to_string(),
            locals: Vec::new(),
            labels: vec![return_types.clone()],
            return_types,
        }
    }

    pub fn add_local(&mut self, valtype: Valtype) {
        self.locals.push(valtype);
    }

    pub fn has_local(&self, index: u32) -> bool {
        self.get_local(index).is_some()
    }

    pub fn get_local(&self, index: u32) -> Option<Valtype> {
        self.locals.get(index as usize).copied()
    }

    pub fn add_label(&mut self, types: Vec<Valtype>) {
        self.labels.push(types);
    }

    pub fn pop_label(&mut self) {
        self.labels.pop();
    }

    /// The innermost label is 0.
    pub fn has_label(&self, depth: u32) -> bool {
        (depth as usize) < self.labels.len()
    }

    pub fn get_label(&self, depth: u32) -> Option<&[Valtype]> {
        let len = self.labels.len();
        let depth = depth as usize;
        if depth < len {
            Some(&self.labels[len - 1 - depth])
        } else {
            None
        }
    }

    pub fn return_types(&self) -> &[Valtype] {
        &self.return_types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wat;

    fn context(source: &str) -> ModuleContext {
        let program = wat::parse(source).unwrap();
        ModuleContext::from_module(program.module().unwrap())
    }

    #[test]
    fn imports_take_the_lowest_indices() {
        let ctx = context(
            r#"(module
                 (import "env" "f" (func $f (param i32)))
                 (import "env" "g" (global $g i64))
                 (func $h (result f32) (f32.const 1))
                 (global $k (mut i32) (i32.const 0))
                 (memory 1 2))"#,
        );
        assert_eq!(ctx.get_function(0), Some(&FuncType::new(vec![Valtype::I32], vec![])));
        assert_eq!(ctx.get_function(1), Some(&FuncType::new(vec![], vec![Valtype::F32])));
        assert_eq!(ctx.function_offset("h"), Some(1));
        assert_eq!(ctx.global_offset("g"), Some(0));
        assert!(!ctx.is_mutable_global(0));
        assert!(ctx.is_mutable_global(1));
        assert_eq!(ctx.get_memory(0), Some(&Limit { min: 1, max: Some(2) }));
        assert!(!ctx.has_table(0));
    }

    #[test]
    fn type_references_resolve() {
        let ctx = context("(module (type (func (param i64) (result i64))) (func (type 0) (get_local 0)))");
        assert!(ctx.has_type(0));
        assert_eq!(ctx.get_function(0), Some(&FuncType::new(vec![Valtype::I64], vec![Valtype::I64])));
    }

    #[test]
    fn frame_labels_innermost_first() {
        let mut frame = FuncFrame::new("f", vec![Valtype::I32]);
        frame.add_label(vec![]);
        frame.add_label(vec![Valtype::F64]);
        assert_eq!(frame.get_label(0), Some(&[Valtype::F64][..]));
        assert_eq!(frame.get_label(2), Some(&[Valtype::I32][..]));
        assert!(!frame.has_label(3));
        frame.pop_label();
        assert_eq!(frame.get_label(0), Some(&[][..]));
    }
}
