//! WebAssembly module instance
//!
//! Instantiation allocates everything a validated module defines into a
//! [`Store`](super::Store), resolves its imports against an
//! [`ImportObject`], initializes tables and memory from the element and data
//! segments, and finally runs the start function. Steps run in that order and
//! stop at the first failure.

use super::executor;
use super::imports::{ImportObject, ImportValue};
use super::store::{
    Addr, ExportInstance, ExternVal, FuncCode, FuncInstance, GlobalInstance, InstanceAddr, ModuleInstance, SharedStore,
    Store, StoreEntry,
};
use super::{eval, LinkError, Memory, RuntimeError, Table, Value};
use crate::ast::{ExportType, ImportDescr, Index, Module, ModuleImport, Mutability, Node, Valtype};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::validation::{CompileError, FuncType, ModuleContext};
use log::debug;
use std::cell::{Ref, RefMut};
use std::rc::Rc;

/// What an export name refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum Export {
    Function { addr: Addr, func_type: FuncType },
    Global(Value),
    Memory(Addr),
    Table(Addr),
}

/// An instantiated module and the store it lives in.
#[derive(Debug, Clone)]
pub struct Instance {
    store: SharedStore,
    addr: InstanceAddr,
    config: EngineConfig,
}

impl Instance {
    /// Instantiates `module` into a fresh store.
    pub fn new(module: &Module, imports: &ImportObject, config: &EngineConfig) -> Result<Instance, Error> {
        Instance::with_store(module, imports, Store::shared(), config)
    }

    /// Instantiates `module` into `store`, which other instances may share.
    pub fn with_store(
        module: &Module,
        imports: &ImportObject,
        store: SharedStore,
        config: &EngineConfig,
    ) -> Result<Instance, Error> {
        if cfg!(target_endian = "big") {
            return Err(RuntimeError::BigEndianHost.into());
        }

        let addr = {
            let mut store = store.try_borrow_mut().map_err(|_| RuntimeError::StoreInUse)?;
            let addr = allocate(&mut store, module, imports, config)?;
            initialize(&mut store, addr, module)?;
            addr
        };
        let instance = Instance {
            store,
            addr,
            config: config.clone(),
        };

        if let Some(start) = module.fields.iter().find_map(|field| match field {
            Node::Start(start) => Some(&start.index),
            _ => None,
        }) {
            let func = instance.read_store()?.instance(addr)?.funcaddr(index(start)?)?;
            debug!("run start function at {}", func);
            executor::invoke(&mut *instance.write_store()?, config, func, &[])?;
        }
        Ok(instance)
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Host functions run while the calling instance holds the store, so a
    /// host function that calls back into it gets `StoreInUse`.
    fn read_store(&self) -> Result<Ref<'_, Store>, RuntimeError> {
        self.store.try_borrow().map_err(|_| RuntimeError::StoreInUse)
    }

    fn write_store(&self) -> Result<RefMut<'_, Store>, RuntimeError> {
        self.store.try_borrow_mut().map_err(|_| RuntimeError::StoreInUse)
    }

    pub fn addr(&self) -> InstanceAddr {
        self.addr
    }

    /// Export names in declaration order.
    pub fn export_names(&self) -> Vec<String> {
        let store = match self.read_store() {
            Ok(store) => store,
            Err(_) => return Vec::new(),
        };
        let names = store
            .instance(self.addr)
            .map(|instance| instance.exports.iter().map(|e| e.name.clone()).collect())
            .unwrap_or_default();
        names
    }

    fn lookup(&self, name: &str) -> Result<Option<ExternVal>, RuntimeError> {
        let store = self.read_store()?;
        let instance = store.instance(self.addr)?;
        let found = instance.exports.iter().find(|e| e.name == name).map(|e| e.value);
        Ok(found)
    }

    pub fn extern_val(&self, name: &str) -> Option<ExternVal> {
        self.lookup(name).ok().flatten()
    }

    pub fn export(&self, name: &str) -> Option<Export> {
        let value = self.extern_val(name)?;
        let store = self.read_store().ok()?;
        let export = match value {
            ExternVal::Func(addr) => Export::Function {
                addr,
                func_type: store.func(addr).ok()?.func_type.clone(),
            },
            ExternVal::Global(addr) => Export::Global(store.global(addr).ok()?.value),
            ExternVal::Memory(addr) => Export::Memory(addr),
            ExternVal::Table(addr) => Export::Table(addr),
        };
        Some(export)
    }

    /// Calls an exported function.
    pub fn invoke(&self, name: &str, args: &[Value]) -> Result<Vec<Value>, Error> {
        let addr = match self.lookup(name)? {
            Some(ExternVal::Func(addr)) => addr,
            Some(_) => return Err(RuntimeError::NotAFunction(name.to_string()).into()),
            None => return Err(RuntimeError::UnknownExport(name.to_string()).into()),
        };
        if self.config.check_for_i64_in_signature {
            let store = self.read_store()?;
            let func_type = &store.func(addr)?.func_type;
            if func_type.args.iter().chain(func_type.result.iter()).any(|t| *t == Valtype::I64) {
                return Err(LinkError::I64InSignature.into());
            }
        }
        debug!("invoke export {}", name);
        let results = executor::invoke(&mut *self.write_store()?, &self.config, addr, args)?;
        Ok(results)
    }

    /// Value of an exported global.
    pub fn global(&self, name: &str) -> Result<Value, Error> {
        match self.lookup(name)? {
            Some(ExternVal::Global(addr)) => Ok(self.read_store()?.global(addr)?.value),
            _ => Err(RuntimeError::UnknownExport(name.to_string()).into()),
        }
    }

    fn memory_addr(&self, name: &str) -> Result<Addr, Error> {
        match self.lookup(name)? {
            Some(ExternVal::Memory(addr)) => Ok(addr),
            _ => Err(RuntimeError::UnknownExport(name.to_string()).into()),
        }
    }

    /// Size in pages of an exported memory.
    pub fn memory_size(&self, name: &str) -> Result<u32, Error> {
        let addr = self.memory_addr(name)?;
        Ok(self.read_store()?.memory(addr)?.size())
    }

    pub fn read_memory(&self, name: &str, offset: u32, len: usize) -> Result<Vec<u8>, Error> {
        let addr = self.memory_addr(name)?;
        Ok(self.read_store()?.memory(addr)?.read_bytes(offset as u64, len)?)
    }

    pub fn write_memory(&self, name: &str, offset: u32, bytes: &[u8]) -> Result<(), Error> {
        let addr = self.memory_addr(name)?;
        self.write_store()?.memory_mut(addr)?.write_bytes(offset as u64, bytes)?;
        Ok(())
    }
}

fn index(index: &Index) -> Result<u32, RuntimeError> {
    match index {
        Index::NumberLiteral(n) => Ok(n.as_u32()),
        Index::Identifier(id) => Err(RuntimeError::UnresolvedIdentifier(id.value.clone())),
    }
}

/// Allocates imports, functions, tables, memories and globals, in index
/// order, and records the exports.
fn allocate(
    store: &mut Store,
    module: &Module,
    imports: &ImportObject,
    config: &EngineConfig,
) -> Result<InstanceAddr, Error> {
    let ctx = ModuleContext::from_module(module);
    let addr = store.add_instance(ModuleInstance::default());
    let mut instance = ModuleInstance::default();

    for field in module.fields.iter() {
        match field {
            Node::TypeInstruction(t) => {
                instance
                    .types
                    .push(FuncType::new(t.functype.param_types(), t.functype.results.clone()));
            }
            Node::ModuleImport(import) => resolve_import(store, &ctx, &mut instance, import, imports)?,
            Node::Func(func) => {
                let func_type = ctx.resolve_signature(&func.signature);
                let code = FuncCode::Wasm {
                    func: Rc::new(func.clone()),
                    instance: addr,
                };
                let func_addr = store.malloc(StoreEntry::Func(FuncInstance { func_type, code }));
                instance.funcaddrs.push(func_addr);
            }
            Node::Table(table) => {
                let table_addr = store.malloc(StoreEntry::Table(Table::new(table.limits.clone())));
                instance.tableaddrs.push(table_addr);
            }
            Node::Memory(memory) => {
                let memory_addr = store.malloc(StoreEntry::Memory(Memory::from_limit(&memory.limits)?));
                instance.memaddrs.push(memory_addr);
            }
            Node::Global(global) => {
                let value = eval::evaluate(store, &instance, &global.init)?
                    .map(|v| v.cast(global.global_type.valtype))
                    .unwrap_or_else(|| Value::default_for(global.global_type.valtype));
                let global_addr = store.malloc(StoreEntry::Global(GlobalInstance {
                    valtype: global.global_type.valtype,
                    mutability: global.global_type.mutability,
                    value,
                }));
                instance.globaladdrs.push(global_addr);
            }
            _ => {}
        }
    }

    for field in module.fields.iter() {
        if let Node::ModuleExport(export) = field {
            let i = index(&export.descr.id)?;
            let value = match export.descr.export_type {
                ExportType::Func => ExternVal::Func(instance.funcaddr(i)?),
                ExportType::Global => {
                    let global_addr = instance.globaladdr(i)?;
                    if config.check_for_i64_in_signature && store.global(global_addr)?.valtype == Valtype::I64 {
                        return Err(LinkError::I64GlobalExport.into());
                    }
                    ExternVal::Global(global_addr)
                }
                ExportType::Memory => ExternVal::Memory(
                    *instance
                        .memaddrs
                        .get(i as usize)
                        .ok_or(CompileError::UnknownMemory(i))?,
                ),
                ExportType::Table => ExternVal::Table(
                    *instance
                        .tableaddrs
                        .get(i as usize)
                        .ok_or(CompileError::UnknownTable(i))?,
                ),
            };
            instance.exports.push(ExportInstance {
                name: export.name.clone(),
                value,
            });
        }
    }

    debug!(
        "instance {}: {} funcs, {} tables, {} memories, {} globals, {} exports",
        addr.0,
        instance.funcaddrs.len(),
        instance.tableaddrs.len(),
        instance.memaddrs.len(),
        instance.globaladdrs.len(),
        instance.exports.len()
    );
    *store.instance_mut(addr)? = instance;
    Ok(addr)
}

fn resolve_import(
    store: &mut Store,
    ctx: &ModuleContext,
    instance: &mut ModuleInstance,
    import: &ModuleImport,
    imports: &ImportObject,
) -> Result<(), Error> {
    let value = imports
        .get(&import.module, &import.name)
        .ok_or_else(|| CompileError::UnknownImport {
            module: import.module.clone(),
            name: import.name.clone(),
        })?;
    let kind_mismatch = |expected: &'static str| LinkError::ImportKindMismatch {
        module: import.module.clone(),
        name: import.name.clone(),
        expected,
    };
    let type_mismatch = || LinkError::ImportTypeMismatch {
        module: import.module.clone(),
        name: import.name.clone(),
    };
    debug!("import {}.{} ({})", import.module, import.name, value.kind());

    match (&import.descr, value) {
        (ImportDescr::FuncImportDescr(descr), ImportValue::Func { func_type, host }) => {
            if *func_type != ctx.resolve_signature(&descr.signature) {
                return Err(type_mismatch().into());
            }
            let addr = store.malloc(StoreEntry::Func(FuncInstance {
                func_type: func_type.clone(),
                code: FuncCode::Host(Rc::clone(host)),
            }));
            instance.funcaddrs.push(addr);
        }
        (ImportDescr::FuncImportDescr(descr), ImportValue::Extern(ExternVal::Func(addr))) => {
            if store.func(*addr)?.func_type != ctx.resolve_signature(&descr.signature) {
                return Err(type_mismatch().into());
            }
            instance.funcaddrs.push(*addr);
        }
        (ImportDescr::FuncImportDescr(_), _) => return Err(kind_mismatch("function").into()),

        (ImportDescr::GlobalType(global_type), ImportValue::Global(value)) => {
            if global_type.mutability == Mutability::Var {
                return Err(CompileError::MutableGlobalImport.into());
            }
            let addr = store.malloc(StoreEntry::Global(GlobalInstance {
                valtype: global_type.valtype,
                mutability: Mutability::Const,
                value: value.cast(global_type.valtype),
            }));
            instance.globaladdrs.push(addr);
        }
        (ImportDescr::GlobalType(global_type), ImportValue::Extern(ExternVal::Global(addr))) => {
            if store.global(*addr)?.valtype != global_type.valtype {
                return Err(type_mismatch().into());
            }
            instance.globaladdrs.push(*addr);
        }
        (ImportDescr::GlobalType(_), _) => return Err(kind_mismatch("global").into()),

        (ImportDescr::Memory(_), ImportValue::Memory(memory)) => {
            instance.memaddrs.push(store.malloc(StoreEntry::Memory(memory.clone())));
        }
        (ImportDescr::Memory(_), ImportValue::Extern(ExternVal::Memory(addr))) => {
            store.memory(*addr)?;
            instance.memaddrs.push(*addr);
        }
        (ImportDescr::Memory(_), _) => return Err(kind_mismatch("memory").into()),

        (ImportDescr::Table(_), ImportValue::Table(table)) => {
            instance.tableaddrs.push(store.malloc(StoreEntry::Table(table.clone())));
        }
        (ImportDescr::Table(_), ImportValue::Extern(ExternVal::Table(addr))) => {
            store.table(*addr)?;
            instance.tableaddrs.push(*addr);
        }
        (ImportDescr::Table(_), _) => return Err(kind_mismatch("table").into()),
    }
    Ok(())
}

/// Writes element segments (and inline table elements) into tables and data
/// segments into memory.
fn initialize(store: &mut Store, addr: InstanceAddr, module: &Module) -> Result<(), Error> {
    let instance = store.instance(addr)?.clone();
    let imported_tables = module
        .fields
        .iter()
        .filter(|field| matches!(field, Node::ModuleImport(ModuleImport { descr: ImportDescr::Table(_), .. })))
        .count();

    let mut table_index = imported_tables;
    for field in module.fields.iter() {
        match field {
            Node::Table(table) => {
                if !table.elements.is_empty() {
                    let funcs = func_addrs(&instance, &table.elements)?;
                    let table_addr = *instance
                        .tableaddrs
                        .get(table_index)
                        .ok_or(CompileError::UnknownTable(table_index as u32))?;
                    store.table_mut(table_addr)?.init(0, &funcs)?;
                }
                table_index += 1;
            }
            Node::Elem(elem) => {
                let i = index(&elem.table)?;
                let table_addr = *instance
                    .tableaddrs
                    .get(i as usize)
                    .ok_or(CompileError::UnknownTable(i))?;
                let offset = eval::evaluate_offset(store, &instance, &elem.offset)?;
                let funcs = func_addrs(&instance, &elem.funcs)?;
                debug!("elem: {} functions at table {} offset {}", funcs.len(), i, offset);
                store.table_mut(table_addr)?.init(offset, &funcs)?;
            }
            _ => {}
        }
    }

    for field in module.fields.iter() {
        if let Node::Data(data) = field {
            let i = index(&data.memory_index)?;
            let memory_addr = *instance
                .memaddrs
                .get(i as usize)
                .ok_or(CompileError::UnknownMemory(i))?;
            let offset = eval::evaluate_offset(store, &instance, &data.offset)?;
            debug!("data: {} bytes at memory {} offset {}", data.init.values.len(), i, offset);
            store
                .memory_mut(memory_addr)?
                .write_bytes(offset as u64, &data.init.values)?;
        }
    }
    Ok(())
}

fn func_addrs(instance: &ModuleInstance, indices: &[Index]) -> Result<Vec<Addr>, RuntimeError> {
    indices
        .iter()
        .map(|i| index(i).and_then(|i| instance.funcaddr(i)))
        .collect()
}
