//! Evaluation of constant expressions: global initializers and segment
//! offsets.

use super::store::{ModuleInstance, Store};
use super::{RuntimeError, Value};
use crate::ast::Node;

/// Runs a constant expression. Only `const`, `get_global` and `end` may
/// appear; the last value produced is the result.
pub fn evaluate(store: &Store, instance: &ModuleInstance, expr: &[Node]) -> Result<Option<Value>, RuntimeError> {
    let mut result = None;
    for node in expr {
        let instr = match node {
            Node::Instr(instr) => instr,
            _ => return Err(RuntimeError::InvalidConstExpr),
        };
        match (instr.id.as_str(), instr.object, instr.args.first()) {
            ("const", Some(object), Some(literal)) => result = Some(Value::from_literal(object, literal)?),
            ("get_global", None, Some(Node::NumberLiteral(index))) => {
                let addr = instance.globaladdr(index.as_u32())?;
                result = Some(store.global(addr)?.value);
            }
            ("get_global", None, Some(Node::Identifier(id))) => {
                return Err(RuntimeError::UnresolvedIdentifier(id.value.clone()))
            }
            ("end", None, _) => {}
            _ => return Err(RuntimeError::InvalidConstExpr),
        }
    }
    Ok(result)
}

/// A segment offset, which must evaluate to an `i32`.
pub fn evaluate_offset(store: &Store, instance: &ModuleInstance, expr: &[Node]) -> Result<u32, RuntimeError> {
    match evaluate(store, instance, expr)? {
        Some(Value::I32(offset)) => Ok(offset as u32),
        _ => Err(RuntimeError::InvalidConstExpr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder as t;
    use crate::ast::{Instr, Mutability, Valtype};
    use crate::runtime::store::{GlobalInstance, StoreEntry};

    fn instr(id: &str, object: Option<Valtype>, args: Vec<Node>) -> Node {
        Node::Instr(Instr {
            id: id.to_string(),
            object,
            args,
            mem_arg: None,
        })
    }

    fn fixture() -> (Store, ModuleInstance) {
        let mut store = Store::new();
        let addr = store.malloc(StoreEntry::Global(GlobalInstance {
            valtype: Valtype::I32,
            mutability: Mutability::Const,
            value: Value::I32(1024),
        }));
        let instance = ModuleInstance {
            globaladdrs: vec![addr],
            ..ModuleInstance::default()
        };
        (store, instance)
    }

    #[test]
    fn constants_and_globals() {
        let (store, instance) = fixture();
        let expr = vec![instr("const", Some(Valtype::I64), vec![Node::NumberLiteral(t::number_literal(-3))])];
        assert_eq!(evaluate(&store, &instance, &expr).unwrap(), Some(Value::I64(-3)));

        let expr = vec![
            instr("get_global", None, vec![Node::NumberLiteral(t::number_literal(0))]),
            instr("end", None, vec![]),
        ];
        assert_eq!(evaluate_offset(&store, &instance, &expr).unwrap(), 1024);
        assert_eq!(evaluate(&store, &instance, &[]).unwrap(), None);
    }

    #[test]
    fn rejects_other_instructions() {
        let (store, instance) = fixture();
        let expr = vec![instr("add", Some(Valtype::I32), vec![])];
        assert_eq!(evaluate(&store, &instance, &expr), Err(RuntimeError::InvalidConstExpr));

        let expr = vec![instr("const", Some(Valtype::F32), vec![Node::NumberLiteral(t::number_literal(1))])];
        assert_eq!(evaluate_offset(&store, &instance, &expr), Err(RuntimeError::InvalidConstExpr));

        let expr = vec![instr("get_global", None, vec![Node::NumberLiteral(t::number_literal(5))])];
        assert_eq!(evaluate(&store, &instance, &expr), Err(RuntimeError::UnknownGlobal(5)));
    }
}
