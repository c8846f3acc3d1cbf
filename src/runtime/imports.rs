//! Import resolution for WebAssembly modules
//!
//! An [`ImportObject`] is the two-level `module -> field -> value` map a
//! module's imports are looked up in. Values are either supplied by the host
//! (functions, global values, fresh memories and tables) or already live in
//! the store, typically the exports of another instance.

use super::store::{ExternVal, HostFunc};
use super::{Memory, RuntimeError, Table, Value};
use crate::ast::Valtype;
use crate::validation::FuncType;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Clone)]
pub enum ImportValue {
    Func { func_type: FuncType, host: HostFunc },
    /// An immutable global with this value.
    Global(Value),
    Memory(Memory),
    Table(Table),
    Extern(ExternVal),
}

impl ImportValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ImportValue::Func { .. } | ImportValue::Extern(ExternVal::Func(_)) => "function",
            ImportValue::Global(_) | ImportValue::Extern(ExternVal::Global(_)) => "global",
            ImportValue::Memory(_) | ImportValue::Extern(ExternVal::Memory(_)) => "memory",
            ImportValue::Table(_) | ImportValue::Extern(ExternVal::Table(_)) => "table",
        }
    }
}

impl fmt::Debug for ImportValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportValue::Func { func_type, .. } => f.debug_struct("Func").field("func_type", func_type).finish(),
            ImportValue::Global(value) => f.debug_tuple("Global").field(value).finish(),
            ImportValue::Memory(memory) => f.debug_tuple("Memory").field(&memory.size()).finish(),
            ImportValue::Table(table) => f.debug_tuple("Table").field(&table.size()).finish(),
            ImportValue::Extern(value) => f.debug_tuple("Extern").field(value).finish(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportObject {
    modules: HashMap<String, HashMap<String, ImportValue>>,
}

impl ImportObject {
    pub fn new() -> Self {
        ImportObject::default()
    }

    pub fn add(&mut self, module: impl Into<String>, name: impl Into<String>, value: ImportValue) {
        self.modules
            .entry(module.into())
            .or_insert_with(HashMap::new)
            .insert(name.into(), value);
    }

    /// Add a host function import
    pub fn add_function<F>(
        &mut self,
        module: impl Into<String>,
        name: impl Into<String>,
        params: Vec<Valtype>,
        results: Vec<Valtype>,
        host: F,
    ) where
        F: Fn(&[Value]) -> Result<Vec<Value>, RuntimeError> + 'static,
    {
        let func_type = FuncType::new(params, results);
        self.add(module, name, ImportValue::Func { func_type, host: Rc::new(host) });
    }

    pub fn add_global(&mut self, module: impl Into<String>, name: impl Into<String>, value: Value) {
        self.add(module, name, ImportValue::Global(value));
    }

    pub fn add_memory(&mut self, module: impl Into<String>, name: impl Into<String>, memory: Memory) {
        self.add(module, name, ImportValue::Memory(memory));
    }

    pub fn add_table(&mut self, module: impl Into<String>, name: impl Into<String>, table: Table) {
        self.add(module, name, ImportValue::Table(table));
    }

    /// Import something already in the store, such as another instance's
    /// export.
    pub fn add_extern(&mut self, module: impl Into<String>, name: impl Into<String>, value: ExternVal) {
        self.add(module, name, ImportValue::Extern(value));
    }

    /// `import_object[module][name]`
    pub fn get(&self, module: &str, name: &str) -> Option<&ImportValue> {
        self.modules.get(module).and_then(|fields| fields.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Addr;

    #[test]
    fn two_level_lookup() {
        let mut imports = ImportObject::new();
        imports.add_global("env", "base", Value::I32(8));
        imports.add_function("env", "log", vec![Valtype::I32], vec![], |_| Ok(vec![]));
        imports.add_extern("other", "mem", ExternVal::Memory(Addr(3)));

        assert!(matches!(imports.get("env", "base"), Some(ImportValue::Global(Value::I32(8)))));
        assert_eq!(imports.get("env", "log").map(ImportValue::kind), Some("function"));
        assert_eq!(imports.get("other", "mem").map(ImportValue::kind), Some("memory"));
        assert!(imports.get("env", "missing").is_none());
        assert!(imports.get("missing", "base").is_none());
    }

    #[test]
    fn later_definitions_replace_earlier_ones() {
        let mut imports = ImportObject::new();
        imports.add_global("env", "g", Value::I32(1));
        imports.add_global("env", "g", Value::F64(2.0));
        assert!(matches!(imports.get("env", "g"), Some(ImportValue::Global(Value::F64(_)))));
    }

    #[test]
    fn host_functions_are_callable() {
        let mut imports = ImportObject::new();
        imports.add_function("env", "double", vec![Valtype::I32], vec![Valtype::I32], |args| {
            Ok(vec![Value::I32(args[0].as_i32().unwrap_or(0) * 2)])
        });
        match imports.get("env", "double") {
            Some(ImportValue::Func { host, func_type }) => {
                assert_eq!(func_type.result, vec![Valtype::I32]);
                assert_eq!(host(&[Value::I32(4)]).unwrap(), vec![Value::I32(8)]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
