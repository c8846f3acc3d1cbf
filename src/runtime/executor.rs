//! WebAssembly instruction executor
//!
//! Function bodies run straight off the AST on an explicit frame stack, so
//! deep recursion in the guest is bounded by [`EngineConfig::max_call_depth`]
//! instead of the host stack. Each frame owns exactly one label sentinel on
//! the shared operand stack: the depth of a branch is therefore both a label
//! depth on the stack and a frame depth on the frame stack.

use super::frame::{self, Frame, FrameKind, Step};
use super::ops;
use super::stack::Stack;
use super::store::{Addr, FuncCode, InstanceAddr, ModuleInstance, Store};
use super::{RuntimeError, TrapKind, Value};
use crate::ast::{Func, Index, Instr, Mutability, Node, Valtype};
use crate::config::EngineConfig;
use crate::validation::FuncType;
use log::{debug, trace};
use std::rc::Rc;

/// Calls the function at `addr` with `args` and runs it to completion.
///
/// Arguments are coerced to the parameter types; a wrong number of them is a
/// runtime error, not a trap.
pub fn invoke(store: &mut Store, config: &EngineConfig, addr: Addr, args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let callee = store.func(addr)?.clone();
    let func_type = callee.func_type;
    if args.len() != func_type.args.len() {
        return Err(RuntimeError::ArityMismatch {
            index: addr.0,
            given: args.len(),
            expected: func_type.args.len(),
        });
    }
    let args: Vec<Value> = args.iter().zip(func_type.args.iter()).map(|(v, t)| v.cast(*t)).collect();

    match callee.code {
        FuncCode::Host(host) => {
            debug!("invoke host function at {}", addr);
            let results = host(&args)?;
            Ok(cast_results(results, &func_type))
        }
        FuncCode::Wasm { func, instance } => {
            debug!("invoke {} at {}", func.name.value, addr);
            let mut executor = Executor::new(store, config);
            executor.enter_function(func, instance, &func_type, args)?;
            executor.run()?;
            let results = executor.stack.pop_types(&func_type.result)?;
            if !executor.stack.is_empty() {
                return Err(RuntimeError::TypeMismatch {
                    expected: "an empty stack after return".to_string(),
                    actual: format!("{} entries", executor.stack.len()),
                });
            }
            Ok(results)
        }
    }
}

fn cast_results(results: Vec<Value>, func_type: &FuncType) -> Vec<Value> {
    results
        .into_iter()
        .zip(func_type.result.iter())
        .map(|(v, t)| v.cast(*t))
        .collect()
}

struct Executor<'a> {
    store: &'a mut Store,
    config: &'a EngineConfig,
    stack: Stack,
    frames: Vec<Frame>,
}

impl<'a> Executor<'a> {
    fn new(store: &'a mut Store, config: &'a EngineConfig) -> Self {
        Executor {
            store,
            config,
            stack: Stack::new(),
            frames: Vec::new(),
        }
    }

    /// The dispatch loop: runs until the frame stack is empty.
    fn run(&mut self) -> Result<(), RuntimeError> {
        while let Some(top) = self.frames.last() {
            let func = Rc::clone(&top.func);
            let path = Rc::clone(&top.path);
            let pc = top.pc;
            let code = frame::code(&func, &path)?;

            match code.get(pc) {
                None => {
                    if let Some(done) = self.frames.pop() {
                        self.stack.exit_label(done.arity)?;
                    }
                }
                Some(node) => {
                    if let Some(top) = self.frames.last_mut() {
                        top.pc += 1;
                    }
                    self.execute(node, pc)?;
                }
            }
        }
        Ok(())
    }

    fn push_frame(&mut self, frame: Frame) -> Result<(), RuntimeError> {
        if self.frames.len() >= self.config.max_call_depth {
            return Err(RuntimeError::CallStackOverflow);
        }
        self.frames.push(frame);
        Ok(())
    }

    fn top(&self) -> Result<&Frame, RuntimeError> {
        self.frames.last().ok_or(RuntimeError::StackUnderflow)
    }

    fn enter_function(
        &mut self,
        func: Rc<Func>,
        instance: InstanceAddr,
        func_type: &FuncType,
        args: Vec<Value>,
    ) -> Result<(), RuntimeError> {
        let mut locals = args;
        locals.extend(func.locals.iter().map(|local| Value::default_for(local.valtype)));
        let arity = func_type.result.len();
        let position = self.frames.len();
        self.stack.push_label(arity);
        self.push_frame(Frame::function(func, instance, locals, arity, position))
    }

    /// Enters the structured instruction at `pc` of the current frame.
    fn enter_block(&mut self, step: Step, result: Option<Valtype>) -> Result<(), RuntimeError> {
        let arity = result.map_or(0, |_| 1);
        let child = self.top()?.child(step, arity);
        // a branch to a loop carries no values
        self.stack.push_label(if child.is_loop() { 0 } else { arity });
        self.push_frame(child)
    }

    /// Unwinds `depth` frames; a loop target restarts, any other resumes
    /// after its instruction.
    fn branch(&mut self, depth: u32) -> Result<(), RuntimeError> {
        let top = self.frames.len().checked_sub(1).ok_or(RuntimeError::LabelNotFound(depth))?;
        let function = self.top()?.function;
        let target = top
            .checked_sub(depth as usize)
            .filter(|target| *target >= function)
            .ok_or(RuntimeError::LabelNotFound(depth))?;

        if self.frames[target].is_loop() {
            self.stack.branch(depth, true)?;
            self.frames.truncate(target + 1);
            self.frames[target].pc = 0;
        } else {
            self.stack.branch(depth, false)?;
            self.frames.truncate(target);
        }
        Ok(())
    }

    fn function_frame(&mut self) -> Result<&mut Frame, RuntimeError> {
        let function = self.top()?.function;
        self.frames.get_mut(function).ok_or(RuntimeError::StackUnderflow)
    }

    fn locals(&mut self) -> Result<&mut Vec<Value>, RuntimeError> {
        match &mut self.function_frame()?.kind {
            FrameKind::Function { locals, .. } => Ok(locals),
            _ => Err(RuntimeError::StackUnderflow),
        }
    }

    fn instance(&self) -> Result<&ModuleInstance, RuntimeError> {
        let function = self.top()?.function;
        match self.frames.get(function).map(|f| &f.kind) {
            Some(FrameKind::Function { instance, .. }) => self.store.instance(*instance),
            _ => Err(RuntimeError::StackUnderflow),
        }
    }

    fn execute(&mut self, node: &Node, pc: usize) -> Result<(), RuntimeError> {
        trace!("{:>3} {}", self.frames.len(), node.instruction_name().unwrap_or_default());

        match node {
            Node::Instr(instr) => self.execute_plain(instr),
            Node::BlockInstruction(block) => self.enter_block(Step::Block(pc), block.result),
            Node::LoopInstruction(block) => self.enter_block(Step::Loop(pc), block.result),
            Node::IfInstruction(block) => {
                let step = if self.stack.pop_i32()? != 0 {
                    Step::Then(pc)
                } else {
                    Step::Else(pc)
                };
                self.enter_block(step, block.result)
            }
            Node::CallInstruction(call) => {
                let addr = self.instance()?.funcaddr(resolved(&call.index)?)?;
                self.call(addr)
            }
            Node::CallIndirectInstruction(call) => {
                let instance = self.instance()?;
                let expected = instance.resolve_signature(&call.signature)?;
                let table = instance.tableaddr()?;
                let element = self.stack.pop_i32()? as u32;
                let addr = self.store.table(table)?.get(element)?;
                if self.store.func(addr)?.func_type != expected {
                    return Err(TrapKind::IndirectCallTypeMismatch.into());
                }
                self.call(addr)
            }
            other => Err(RuntimeError::UnknownInstruction(other.kind().name().to_string())),
        }
    }

    fn call(&mut self, addr: Addr) -> Result<(), RuntimeError> {
        let callee = self.store.func(addr)?.clone();
        let args = self.stack.pop_types(&callee.func_type.args)?;
        match callee.code {
            FuncCode::Host(host) => {
                debug!("call host function at {}", addr);
                let results = host(&args)?;
                self.stack.push_all(cast_results(results, &callee.func_type));
                Ok(())
            }
            FuncCode::Wasm { func, instance } => self.enter_function(func, instance, &callee.func_type, args),
        }
    }

    fn execute_plain(&mut self, instr: &Instr) -> Result<(), RuntimeError> {
        if let Some(object) = instr.object {
            return match instr.id.as_str() {
                "const" => {
                    let literal = instr
                        .args
                        .first()
                        .ok_or_else(|| RuntimeError::UnknownInstruction(instr.mnemonic()))?;
                    self.stack.push(Value::from_literal(object, literal)?);
                    Ok(())
                }
                id if id.starts_with("load") => self.load(object, instr),
                id if id.starts_with("store") => self.store_value(object, instr),
                id => ops::execute(object, id, &mut self.stack),
            };
        }

        match instr.id.as_str() {
            "nop" | "end" => Ok(()),
            "unreachable" => Err(TrapKind::Unreachable.into()),
            "drop" => self.stack.pop().map(|_| ()),
            "select" => {
                let condition = self.stack.pop_i32()?;
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack.push(if condition != 0 { a } else { b });
                Ok(())
            }
            "get_local" => {
                let index = index_arg(instr, 0)?;
                let value = *self
                    .locals()?
                    .get(index as usize)
                    .ok_or(RuntimeError::UnknownLocal(index))?;
                self.stack.push(value);
                Ok(())
            }
            "set_local" | "tee_local" => {
                let index = index_arg(instr, 0)?;
                let value = self.stack.pop()?;
                if instr.id == "tee_local" {
                    self.stack.push(value);
                }
                let slot = self
                    .locals()?
                    .get_mut(index as usize)
                    .ok_or(RuntimeError::UnknownLocal(index))?;
                *slot = value;
                Ok(())
            }
            "get_global" => {
                let addr = self.instance()?.globaladdr(index_arg(instr, 0)?)?;
                let value = self.store.global(addr)?.value;
                self.stack.push(value);
                Ok(())
            }
            "set_global" => {
                let addr = self.instance()?.globaladdr(index_arg(instr, 0)?)?;
                let value = self.stack.pop()?;
                let global = self.store.global_mut(addr)?;
                if global.mutability == Mutability::Const {
                    return Err(RuntimeError::ImmutableGlobal);
                }
                global.value = value.cast(global.valtype);
                Ok(())
            }
            "br" => self.branch(index_arg(instr, 0)?),
            "br_if" => {
                if self.stack.pop_i32()? != 0 {
                    self.branch(index_arg(instr, 0)?)?;
                }
                Ok(())
            }
            "br_table" => {
                let selector = self.stack.pop_i32()? as u32 as usize;
                let count = instr.args.len();
                if count == 0 {
                    return Err(RuntimeError::UnknownInstruction(instr.mnemonic()));
                }
                // the last label is the default
                let position = if selector < count - 1 { selector } else { count - 1 };
                self.branch(index_arg(instr, position)?)
            }
            "return" => {
                let top = self.frames.len().saturating_sub(1);
                let function = self.top()?.function;
                self.branch((top - function) as u32)
            }
            "current_memory" => {
                let addr = self.instance()?.memaddr()?;
                let pages = self.store.memory(addr)?.size();
                self.stack.push(Value::I32(pages as i32));
                Ok(())
            }
            "grow_memory" => {
                let addr = self.instance()?.memaddr()?;
                let delta = self.stack.pop_i32()? as u32;
                let previous = self.store.memory_mut(addr)?.grow(delta);
                debug!("grow_memory by {} pages: {}", delta, previous);
                self.stack.push(Value::I32(previous));
                Ok(())
            }
            _ => Err(RuntimeError::UnknownInstruction(instr.mnemonic())),
        }
    }

    /// Effective address of a memory access: the popped base plus the
    /// static offset, computed without wrapping.
    fn effective_address(&mut self, instr: &Instr) -> Result<u64, RuntimeError> {
        let base = self.stack.pop_i32()? as u32 as u64;
        let offset = instr.mem_arg.as_ref().map_or(0, |m| m.offset) as u64;
        Ok(base + offset)
    }

    fn load(&mut self, object: Valtype, instr: &Instr) -> Result<(), RuntimeError> {
        let ea = self.effective_address(instr)?;
        let memory = self.store.memory(self.instance()?.memaddr()?)?;
        let value = match (object, instr.id.as_str()) {
            (Valtype::I32, "load") => Value::I32(memory.read_u32(ea)? as i32),
            (Valtype::I64, "load") => Value::I64(memory.read_u64(ea)? as i64),
            (Valtype::F32, "load") => Value::F32(f32::from_bits(memory.read_u32(ea)?)),
            (Valtype::F64, "load") => Value::F64(f64::from_bits(memory.read_u64(ea)?)),
            (Valtype::I32, "load8_s") => Value::I32(memory.read_u8(ea)? as i8 as i32),
            (Valtype::I32, "load8_u") => Value::I32(memory.read_u8(ea)? as i32),
            (Valtype::I32, "load16_s") => Value::I32(memory.read_u16(ea)? as i16 as i32),
            (Valtype::I32, "load16_u") => Value::I32(memory.read_u16(ea)? as i32),
            (Valtype::I64, "load8_s") => Value::I64(memory.read_u8(ea)? as i8 as i64),
            (Valtype::I64, "load8_u") => Value::I64(memory.read_u8(ea)? as i64),
            (Valtype::I64, "load16_s") => Value::I64(memory.read_u16(ea)? as i16 as i64),
            (Valtype::I64, "load16_u") => Value::I64(memory.read_u16(ea)? as i64),
            (Valtype::I64, "load32_s") => Value::I64(memory.read_u32(ea)? as i32 as i64),
            (Valtype::I64, "load32_u") => Value::I64(memory.read_u32(ea)? as i64),
            _ => return Err(RuntimeError::UnknownInstruction(instr.mnemonic())),
        };
        self.stack.push(value);
        Ok(())
    }

    fn store_value(&mut self, object: Valtype, instr: &Instr) -> Result<(), RuntimeError> {
        let value = self.stack.pop_typed(object)?;
        let ea = self.effective_address(instr)?;
        let addr = self.instance()?.memaddr()?;
        let memory = self.store.memory_mut(addr)?;
        match (instr.id.as_str(), value) {
            ("store", Value::I32(v)) => memory.write_u32(ea, v as u32),
            ("store", Value::I64(v)) => memory.write_u64(ea, v as u64),
            ("store", Value::F32(v)) => memory.write_u32(ea, v.to_bits()),
            ("store", Value::F64(v)) => memory.write_u64(ea, v.to_bits()),
            ("store8", Value::I32(v)) => memory.write_u8(ea, v as u8),
            ("store16", Value::I32(v)) => memory.write_u16(ea, v as u16),
            ("store8", Value::I64(v)) => memory.write_u8(ea, v as u8),
            ("store16", Value::I64(v)) => memory.write_u16(ea, v as u16),
            ("store32", Value::I64(v)) => memory.write_u32(ea, v as u32),
            _ => Err(RuntimeError::UnknownInstruction(instr.mnemonic())),
        }
    }
}

fn resolved(index: &Index) -> Result<u32, RuntimeError> {
    match index {
        Index::NumberLiteral(n) => Ok(n.as_u32()),
        Index::Identifier(id) => Err(RuntimeError::UnresolvedIdentifier(id.value.clone())),
    }
}

/// The index immediate at `position`.
fn index_arg(instr: &Instr, position: usize) -> Result<u32, RuntimeError> {
    match instr.args.get(position) {
        Some(Node::NumberLiteral(n)) => Ok(n.as_u32()),
        Some(Node::Identifier(id)) => Err(RuntimeError::UnresolvedIdentifier(id.value.clone())),
        _ => Err(RuntimeError::UnknownInstruction(instr.mnemonic())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{transform, Module};
    use crate::runtime::store::{FuncInstance, GlobalInstance, StoreEntry};
    use crate::runtime::Memory;
    use crate::validation::ModuleContext;
    use crate::wat;
    use rstest::rstest;

    /// Loads every function of `source` into a fresh store with one page of
    /// memory and a mutable i32 global, and returns the address of the last
    /// function.
    fn load(source: &str) -> (Store, Addr) {
        let mut program = wat::parse(source).unwrap();
        transform::run(&mut program).unwrap();
        let module: &Module = program.module().unwrap();
        let ctx = ModuleContext::from_module(module);

        let mut store = Store::new();
        let mut instance = ModuleInstance::default();
        instance
            .memaddrs
            .push(store.malloc(StoreEntry::Memory(Memory::new(1, None).unwrap())));
        instance.globaladdrs.push(store.malloc(StoreEntry::Global(GlobalInstance {
            valtype: Valtype::I32,
            mutability: Mutability::Var,
            value: Value::I32(0),
        })));
        let instance_addr = InstanceAddr(0);

        let mut index = 0;
        for field in module.fields.iter() {
            if let Node::Func(func) = field {
                let func_type = ctx.get_function(index).unwrap().clone();
                instance.funcaddrs.push(store.malloc(StoreEntry::Func(FuncInstance {
                    func_type,
                    code: FuncCode::Wasm {
                        func: Rc::new(func.clone()),
                        instance: instance_addr,
                    },
                })));
                index += 1;
            }
        }
        let last = *instance.funcaddrs.last().unwrap();
        assert_eq!(store.add_instance(instance), instance_addr);
        (store, last)
    }

    fn run(source: &str, args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
        let (mut store, addr) = load(source);
        invoke(&mut store, &EngineConfig::default(), addr, args)
    }

    #[rstest]
    #[case("(func (param i32 i32) (result i32) get_local 0 get_local 1 i32.add)", vec![Value::I32(2), Value::I32(3)], vec![Value::I32(5)])]
    #[case("(func (result i32) (block (result i32) (i32.const 7)))", vec![], vec![Value::I32(7)])]
    #[case("(func (result i32) (block (loop (br 1))) (i32.const 1))", vec![], vec![Value::I32(1)])]
    #[case("(func (result i32) (block (result i32) (i32.const 3) (br 0) (i32.const 4)))", vec![], vec![Value::I32(3)])]
    #[case("(func (param i32) (result i32) (if (result i32) (get_local 0) (then (i32.const 1)) (else (i32.const 2))))", vec![Value::I32(0)], vec![Value::I32(2)])]
    #[case("(func (result i32) (i32.const 9) (return) (i32.const 1))", vec![], vec![Value::I32(9)])]
    #[case("(func (result i32) (block (block (return (i32.const 5)))) (i32.const 6))", vec![], vec![Value::I32(5)])]
    #[case("(func (result i32) (select (i32.const 1) (i32.const 2) (i32.const 0)))", vec![], vec![Value::I32(2)])]
    #[case("(func (param i32) (result i32) (local i32) (tee_local 1 (get_local 0)) drop (get_local 1))", vec![Value::I32(8)], vec![Value::I32(8)])]
    #[case("(func (result i64) (i64.extend_u/i32 (i32.const -1)))", vec![], vec![Value::I64(0xffff_ffff)])]
    fn executes(#[case] func: &str, #[case] args: Vec<Value>, #[case] expected: Vec<Value>) {
        assert_eq!(run(&format!("(module {})", func), &args).unwrap(), expected);
    }

    #[test]
    fn counting_loop() {
        let source = "(module (func (param i32) (result i32) (local i32)
            (block (loop
                (br_if 1 (i32.eqz (get_local 0)))
                (set_local 1 (i32.add (get_local 1) (get_local 0)))
                (set_local 0 (i32.sub (get_local 0) (i32.const 1)))
                (br 0)))
            (get_local 1)))";
        assert_eq!(run(source, &[Value::I32(10)]).unwrap(), vec![Value::I32(55)]);
    }

    #[rstest]
    #[case(0, 10)]
    #[case(1, 20)]
    #[case(2, 30)]
    #[case(7, 30)]
    fn br_table_selects(#[case] selector: i32, #[case] expected: i32) {
        let source = "(module (func (param i32) (result i32)
            (block (block (block
                (br_table 0 1 2 (get_local 0)))
                (return (i32.const 10)))
                (return (i32.const 20)))
            (i32.const 30)))";
        assert_eq!(run(source, &[Value::I32(selector)]).unwrap(), vec![Value::I32(expected)]);
    }

    #[test]
    fn calls_and_recursion() {
        let source = "(module
            (func $fac (param i64) (result i64)
                (if (result i64) (i64.eqz (get_local 0))
                    (then (i64.const 1))
                    (else (i64.mul (get_local 0) (call $fac (i64.sub (get_local 0) (i64.const 1)))))))
            (func (result i64) (call $fac (i64.const 10))))";
        assert_eq!(run(source, &[]).unwrap(), vec![Value::I64(3_628_800)]);
    }

    #[test]
    fn unbounded_recursion_is_a_runtime_error() {
        let err = run("(module (func $f (call $f)))", &[]).unwrap_err();
        assert_eq!(err, RuntimeError::CallStackOverflow);
        assert!(!err.is_trap());
    }

    #[test]
    fn memory_access() {
        let source = "(module (memory 1) (func (result i32)
            (i32.store offset=4 (i32.const 0) (i32.const -2))
            (i32.load8_u (i32.const 4))))";
        assert_eq!(run(source, &[]).unwrap(), vec![Value::I32(0xfe)]);

        let grow = "(module (memory 1) (func (result i32) (drop (grow_memory (i32.const 2))) (current_memory)))";
        assert_eq!(run(grow, &[]).unwrap(), vec![Value::I32(3)]);
    }

    #[test]
    fn out_of_bounds_store_traps() {
        let source = "(module (memory 1) (func (i64.store (i32.const 65532) (i64.const -1))))";
        let err = run(source, &[]).unwrap_err();
        assert_eq!(err, RuntimeError::Trap(TrapKind::OutOfBounds));
    }

    #[test]
    fn globals() {
        let source = "(module (global $g (mut i32) (i32.const 0))
            (func (result i32) (set_global $g (i32.const 4)) (get_global $g)))";
        assert_eq!(run(source, &[]).unwrap(), vec![Value::I32(4)]);
    }

    #[rstest]
    #[case("(func unreachable)", TrapKind::Unreachable)]
    #[case("(func (result i32) (i32.div_s (i32.const 1) (i32.const 0)))", TrapKind::DivideByZero)]
    #[case("(func (result i32) (i32.trunc_s/f32 (f32.const nan)))", TrapKind::InvalidConversion)]
    fn traps(#[case] func: &str, #[case] kind: TrapKind) {
        let err = run(&format!("(module {})", func), &[]).unwrap_err();
        assert_eq!(err, RuntimeError::Trap(kind));
    }

    #[test]
    fn argument_count_is_checked() {
        let err = run("(module (func (param i32)))", &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::ArityMismatch { given: 0, expected: 1, .. }));
    }

    #[test]
    fn host_functions() {
        let mut store = Store::new();
        let addr = store.malloc(StoreEntry::Func(FuncInstance {
            func_type: FuncType::new(vec![Valtype::I32], vec![Valtype::I64]),
            code: FuncCode::Host(Rc::new(|args: &[Value]| Ok(vec![args[0]]))),
        }));
        let results = invoke(&mut store, &EngineConfig::default(), addr, &[Value::I32(6)]).unwrap();
        assert_eq!(results, vec![Value::I64(6)]);
    }
}
