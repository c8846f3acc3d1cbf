//! WebAssembly Store - owns every runtime object of a session
//!
//! The store is one growable table of entries (functions, globals, memories,
//! tables) addressed by [`Addr`], plus the registry of module instances.
//! Every module instantiated against the same store shares its address
//! space, which is how exports of one instance are imported by another.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                    Store                     │
//! │  entries                                     │
//! │   [0]: Func   { host: env.log }              │
//! │   [1]: Func   { wasm: instance 0, $main }    │
//! │   [2]: Memory { 1 page }                     │
//! │   [3]: Global { i32 const 7 }                │
//! │  instances                                   │
//! │   [0]: funcaddrs [0, 1], memaddrs [2], ...   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Addresses are handed out in increasing order and never reused: freeing an
//! entry only empties its slot.

use super::{Memory, RuntimeError, Table, Value};
use crate::ast::{Func, Index, Mutability, SignatureRef, Valtype};
use crate::validation::FuncType;
use log::debug;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Host function implementation: receives the arguments in order and returns
/// the results.
pub type HostFunc = Rc<dyn Fn(&[Value]) -> Result<Vec<Value>, RuntimeError>>;

/// A store shared by the instances of one session.
pub type SharedStore = Rc<RefCell<Store>>;

/// Address of an entry in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Addr(pub usize);

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a module instance in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceAddr(pub usize);

#[derive(Clone)]
pub enum FuncCode {
    /// A function body, resolving its indices through `instance`.
    Wasm { func: Rc<Func>, instance: InstanceAddr },
    Host(HostFunc),
}

impl fmt::Debug for FuncCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuncCode::Wasm { func, instance } => f
                .debug_struct("Wasm")
                .field("name", &func.name.value)
                .field("instance", instance)
                .finish(),
            FuncCode::Host(_) => f.write_str("Host"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FuncInstance {
    pub func_type: FuncType,
    pub code: FuncCode,
}

impl FuncInstance {
    pub fn is_external(&self) -> bool {
        matches!(self.code, FuncCode::Host(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalInstance {
    pub valtype: Valtype,
    pub mutability: Mutability,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub enum StoreEntry {
    Func(FuncInstance),
    Global(GlobalInstance),
    Memory(Memory),
    Table(Table),
}

impl StoreEntry {
    fn kind(&self) -> &'static str {
        match self {
            StoreEntry::Func(_) => "function",
            StoreEntry::Global(_) => "global",
            StoreEntry::Memory(_) => "memory",
            StoreEntry::Table(_) => "table",
        }
    }
}

/// A runtime value an export refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternVal {
    Func(Addr),
    Global(Addr),
    Memory(Addr),
    Table(Addr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportInstance {
    pub name: String,
    pub value: ExternVal,
}

/// Index spaces of one instantiated module, mapped to store addresses.
#[derive(Debug, Clone, Default)]
pub struct ModuleInstance {
    pub types: Vec<FuncType>,
    pub funcaddrs: Vec<Addr>,
    pub tableaddrs: Vec<Addr>,
    pub memaddrs: Vec<Addr>,
    pub globaladdrs: Vec<Addr>,
    pub exports: Vec<ExportInstance>,
}

impl ModuleInstance {
    /// The function type a `call_indirect` expects.
    pub fn resolve_signature(&self, signature: &SignatureRef) -> Result<FuncType, RuntimeError> {
        match signature {
            SignatureRef::Inline(signature) => Ok(FuncType::new(signature.param_types(), signature.results.clone())),
            SignatureRef::Ref(Index::NumberLiteral(n)) => self
                .types
                .get(n.as_u32() as usize)
                .cloned()
                .ok_or_else(|| RuntimeError::UnresolvedIdentifier(n.raw.clone())),
            SignatureRef::Ref(Index::Identifier(id)) => Err(RuntimeError::UnresolvedIdentifier(id.value.clone())),
        }
    }

    pub fn funcaddr(&self, index: u32) -> Result<Addr, RuntimeError> {
        self.funcaddrs
            .get(index as usize)
            .copied()
            .ok_or(RuntimeError::UnknownFunction(index))
    }

    pub fn globaladdr(&self, index: u32) -> Result<Addr, RuntimeError> {
        self.globaladdrs
            .get(index as usize)
            .copied()
            .ok_or(RuntimeError::UnknownGlobal(index))
    }

    /// Memory 0, the only one a module may have.
    pub fn memaddr(&self) -> Result<Addr, RuntimeError> {
        self.memaddrs.first().copied().ok_or(RuntimeError::UnknownMemory)
    }

    pub fn tableaddr(&self) -> Result<Addr, RuntimeError> {
        self.tableaddrs.first().copied().ok_or(RuntimeError::UnknownTable)
    }
}

#[derive(Debug, Default)]
pub struct Store {
    entries: Vec<Option<StoreEntry>>,
    instances: Vec<ModuleInstance>,
}

macro_rules! accessors {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty, $kind:expr) => {
        pub fn $get(&self, addr: Addr) -> Result<&$ty, RuntimeError> {
            match self.get(addr) {
                Some(StoreEntry::$variant(entry)) => Ok(entry),
                _ => Err(RuntimeError::InvalidAddress {
                    kind: $kind,
                    addr: addr.0,
                }),
            }
        }

        pub fn $get_mut(&mut self, addr: Addr) -> Result<&mut $ty, RuntimeError> {
            match self.entries.get_mut(addr.0) {
                Some(Some(StoreEntry::$variant(entry))) => Ok(entry),
                _ => Err(RuntimeError::InvalidAddress {
                    kind: $kind,
                    addr: addr.0,
                }),
            }
        }
    };
}

impl Store {
    pub fn new() -> Self {
        Store::default()
    }

    pub fn shared() -> SharedStore {
        Rc::new(RefCell::new(Store::new()))
    }

    /// Stores `entry` at a fresh address.
    pub fn malloc(&mut self, entry: StoreEntry) -> Addr {
        let addr = Addr(self.entries.len());
        debug!("alloc {} at {}", entry.kind(), addr);
        self.entries.push(Some(entry));
        addr
    }

    pub fn get(&self, addr: Addr) -> Option<&StoreEntry> {
        self.entries.get(addr.0).and_then(Option::as_ref)
    }

    /// Replaces the entry at an allocated address.
    pub fn set(&mut self, addr: Addr, entry: StoreEntry) -> Result<(), RuntimeError> {
        match self.entries.get_mut(addr.0) {
            Some(slot) => {
                *slot = Some(entry);
                Ok(())
            }
            None => Err(RuntimeError::InvalidAddress {
                kind: entry.kind(),
                addr: addr.0,
            }),
        }
    }

    /// Empties the slot; the address is never handed out again.
    pub fn free(&mut self, addr: Addr) {
        if let Some(slot) = self.entries.get_mut(addr.0) {
            *slot = None;
        }
    }

    /// Number of addresses handed out so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    accessors!(func, func_mut, Func, FuncInstance, "function");
    accessors!(global, global_mut, Global, GlobalInstance, "global");
    accessors!(memory, memory_mut, Memory, Memory, "memory");
    accessors!(table, table_mut, Table, Table, "table");

    pub fn add_instance(&mut self, instance: ModuleInstance) -> InstanceAddr {
        self.instances.push(instance);
        InstanceAddr(self.instances.len() - 1)
    }

    pub fn instance(&self, addr: InstanceAddr) -> Result<&ModuleInstance, RuntimeError> {
        self.instances.get(addr.0).ok_or(RuntimeError::InvalidAddress {
            kind: "module instance",
            addr: addr.0,
        })
    }

    pub fn instance_mut(&mut self, addr: InstanceAddr) -> Result<&mut ModuleInstance, RuntimeError> {
        self.instances.get_mut(addr.0).ok_or(RuntimeError::InvalidAddress {
            kind: "module instance",
            addr: addr.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Limit;

    fn global(value: i32) -> StoreEntry {
        StoreEntry::Global(GlobalInstance {
            valtype: Valtype::I32,
            mutability: Mutability::Var,
            value: Value::I32(value),
        })
    }

    #[test]
    fn addresses_are_sequential() {
        let mut store = Store::new();
        assert_eq!(store.malloc(global(1)), Addr(0));
        assert_eq!(store.malloc(StoreEntry::Table(Table::new(Limit { min: 1, max: None }))), Addr(1));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn freed_addresses_are_not_reused() {
        let mut store = Store::new();
        let first = store.malloc(global(1));
        store.free(first);
        assert!(store.get(first).is_none());
        assert_eq!(store.malloc(global(2)), Addr(1));
        assert!(store.global(first).is_err());
    }

    #[test]
    fn typed_access_checks_kind() {
        let mut store = Store::new();
        let addr = store.malloc(global(1));
        assert!(store.memory(addr).is_err());

        store.global_mut(addr).unwrap().value = Value::I32(5);
        assert_eq!(store.global(addr).unwrap().value, Value::I32(5));

        let memory = Memory::new(1, None).unwrap();
        store.set(addr, StoreEntry::Memory(memory)).unwrap();
        assert_eq!(store.memory(addr).unwrap().size(), 1);
        assert!(store.set(Addr(9), global(0)).is_err());
    }

    #[test]
    fn instance_index_spaces() {
        let instance = ModuleInstance {
            types: vec![FuncType::new(vec![Valtype::I32], vec![])],
            funcaddrs: vec![Addr(4)],
            ..ModuleInstance::default()
        };
        assert_eq!(instance.funcaddr(0).unwrap(), Addr(4));
        assert_eq!(instance.funcaddr(1), Err(RuntimeError::UnknownFunction(1)));
        assert_eq!(instance.memaddr(), Err(RuntimeError::UnknownMemory));

        let by_index = SignatureRef::Ref(Index::NumberLiteral(crate::ast::builder::number_literal(0)));
        assert_eq!(instance.resolve_signature(&by_index).unwrap().args, vec![Valtype::I32]);
    }

    #[test]
    fn host_functions_are_external() {
        let mut store = Store::new();
        let host: HostFunc = Rc::new(|args: &[Value]| Ok(args.to_vec()));
        let addr = store.malloc(StoreEntry::Func(FuncInstance {
            func_type: FuncType::new(vec![Valtype::I32], vec![Valtype::I32]),
            code: FuncCode::Host(host),
        }));
        assert!(store.func(addr).unwrap().is_external());
    }
}
