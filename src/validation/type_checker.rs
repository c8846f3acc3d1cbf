//! Stack type checker.
//!
//! Every function body is simulated against an abstract stack of operand
//! types. Structured instructions are checked on a fresh sub-stack which must
//! end holding exactly the construct's result. After an unconditional branch
//! (`br`, `br_table`, `return`, `unreachable`) the stack is replaced by a
//! single [`StackType::Polymorphic`] marker: pops from it succeed with
//! [`StackType::Any`] and it is never counted as a leftover value.
//!
//! The first mismatch in a function abandons the rest of that function;
//! checking carries on with the next one.

use super::context::{FuncFrame, ModuleContext};
use super::signatures;
use crate::ast::*;
use log::debug;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackType {
    Val(Valtype),
    /// Matches any type.
    Any,
    /// The rest of the stack is unreachable.
    Polymorphic,
}

impl StackType {
    fn matches(self, other: StackType) -> bool {
        self == StackType::Any || other == StackType::Any || self == other
    }
}

impl fmt::Display for StackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackType::Val(t) => write!(f, "{}", t),
            StackType::Any => write!(f, "ANY"),
            StackType::Polymorphic => write!(f, "POLYMORPHIC"),
        }
    }
}

/// A failed check; the message is the collected validation error.
type Check<T> = Result<T, String>;

#[derive(Debug, Default, Clone)]
struct TypeStack {
    items: Vec<StackType>,
}

impl TypeStack {
    fn push(&mut self, t: StackType) {
        self.items.push(t);
    }

    fn push_all(&mut self, types: &[Valtype]) {
        self.items.extend(types.iter().map(|t| StackType::Val(*t)));
    }

    fn pop(&mut self, expected: StackType) -> Check<StackType> {
        match self.items.last() {
            Some(StackType::Polymorphic) => Ok(StackType::Any),
            Some(&actual) => {
                if !expected.matches(actual) {
                    return Err(format!("Expected type {} but got {}.", expected, actual));
                }
                self.items.pop();
                Ok(actual)
            }
            None => Err(format!("Expected type {} but got none.", expected)),
        }
    }

    fn pop_val(&mut self, expected: Valtype) -> Check<StackType> {
        self.pop(StackType::Val(expected))
    }

    /// Pops `types` in reverse, the last one first.
    fn pop_all(&mut self, types: &[Valtype]) -> Check<()> {
        for t in types.iter().rev() {
            self.pop_val(*t)?;
        }
        Ok(())
    }

    fn set_unreachable(&mut self) {
        self.items.clear();
        self.items.push(StackType::Polymorphic);
    }

    /// Checks the stack holds exactly `expected` (or is polymorphic below it).
    fn expect_exactly(mut self, expected: &[Valtype]) -> Check<()> {
        self.pop_all(expected)?;
        let leftover: Vec<String> = self
            .items
            .iter()
            .filter(|t| **t != StackType::Polymorphic)
            .map(|t| t.to_string())
            .collect();
        if !leftover.is_empty() {
            return Err(format!("Stack contains additional values: [{}].", leftover.join(", ")));
        }
        Ok(())
    }
}

/// Checks every function of `module`, one error per failing function.
pub fn check_module(module: &Module, ctx: &ModuleContext) -> Vec<String> {
    module
        .fields
        .iter()
        .filter_map(|field| match field {
            Node::Func(func) => check_function(func, ctx).err(),
            _ => None,
        })
        .collect()
}

pub fn check_function(func: &Func, ctx: &ModuleContext) -> Check<()> {
    let signature = ctx.resolve_signature(&func.signature);
    let mut frame = FuncFrame::new(&func.name.value, signature.result.clone());
    for t in signature.args.iter() {
        frame.add_local(*t);
    }
    for local in func.locals.iter() {
        frame.add_local(local.valtype);
    }

    let stack = check_sequence(&func.body, ctx, &mut frame)?;
    stack.expect_exactly(&signature.result)?;
    debug!("func {} type checks", frame.name);
    Ok(())
}

fn check_sequence(instrs: &[Node], ctx: &ModuleContext, frame: &mut FuncFrame) -> Check<TypeStack> {
    let mut stack = TypeStack::default();
    for instr in instrs {
        check_instruction(instr, &mut stack, ctx, frame)?;
    }
    Ok(stack)
}

/// Checks a nested sequence under a label whose branch type is `label`.
fn check_block(
    instrs: &[Node],
    label: Vec<Valtype>,
    result: &[Valtype],
    ctx: &ModuleContext,
    frame: &mut FuncFrame,
) -> Check<()> {
    frame.add_label(label);
    let inner = check_sequence(instrs, ctx, frame)?;
    frame.pop_label();
    inner.expect_exactly(result)
}

fn check_instruction(instr: &Node, stack: &mut TypeStack, ctx: &ModuleContext, frame: &mut FuncFrame) -> Check<()> {
    match instr {
        Node::Instr(instr) => check_plain(instr, stack, ctx, frame),
        Node::BlockInstruction(block) => {
            let result: Vec<Valtype> = block.result.into_iter().collect();
            check_block(&block.instr, result.clone(), &result, ctx, frame)?;
            stack.push_all(&result);
            Ok(())
        }
        Node::LoopInstruction(block) => {
            // branches to a loop restart it and carry no values
            let result: Vec<Valtype> = block.result.into_iter().collect();
            check_block(&block.instr, vec![], &result, ctx, frame)?;
            stack.push_all(&result);
            Ok(())
        }
        Node::IfInstruction(block) => {
            stack.pop_val(Valtype::I32)?;
            let result: Vec<Valtype> = block.result.into_iter().collect();
            check_block(&block.consequent, result.clone(), &result, ctx, frame)
                .map_err(|e| format!("Type mismatch in if consequent: {}", e))?;
            check_block(&block.alternate, result.clone(), &result, ctx, frame)
                .map_err(|e| format!("Type mismatch in if alternate: {}", e))?;
            stack.push_all(&result);
            Ok(())
        }
        Node::CallInstruction(call) => {
            let index = resolved(&call.index)?;
            let callee = ctx
                .get_function(index)
                .ok_or_else(|| format!("Call to undefined function index {}.", index))?;
            stack.pop_all(&callee.args)?;
            stack.push_all(&callee.result);
            Ok(())
        }
        Node::CallIndirectInstruction(call) => {
            if !ctx.has_table(0) {
                return Err("Module does not have table 0".to_string());
            }
            let callee = ctx.resolve_signature(&call.signature);
            stack.pop_val(Valtype::I32)?;
            stack.pop_all(&callee.args)?;
            stack.push_all(&callee.result);
            Ok(())
        }
        other => Err(format!("Unexpected {} in instruction sequence.", other.kind().name())),
    }
}

fn resolved(index: &Index) -> Check<u32> {
    index
        .number()
        .ok_or_else(|| format!("Unresolved identifier {} reached the type checker.", index))
}

/// The numeric immediate at `position`.
fn index_arg(instr: &Instr, position: usize) -> Check<u32> {
    match instr.args.get(position) {
        Some(Node::NumberLiteral(n)) => Ok(n.as_u32()),
        Some(Node::Identifier(id)) => Err(format!(
            "Unresolved identifier ${} reached the type checker.",
            id.value
        )),
        _ => Err(format!("Missing index argument for {}.", instr.mnemonic())),
    }
}

fn label_types(frame: &FuncFrame, depth: u32) -> Check<Vec<Valtype>> {
    frame
        .get_label(depth)
        .map(<[Valtype]>::to_vec)
        .ok_or_else(|| format!("Function does not have label {}", depth))
}

fn require_memory(ctx: &ModuleContext) -> Check<()> {
    if ctx.has_memory(0) {
        Ok(())
    } else {
        Err("Module does not have memory 0".to_string())
    }
}

fn check_plain(instr: &Instr, stack: &mut TypeStack, ctx: &ModuleContext, frame: &mut FuncFrame) -> Check<()> {
    if let Some(object) = instr.object {
        if instr.id.starts_with("load") || instr.id.starts_with("store") {
            require_memory(ctx)?;
        }
        let signature = signatures::numeric(object, &instr.id)
            .ok_or_else(|| format!("Unknown instruction {}.", instr.mnemonic()))?;
        stack.pop_all(&signature.args)?;
        stack.push_all(&signature.result);
        return Ok(());
    }

    match instr.id.as_str() {
        "nop" => {}
        "unreachable" => stack.set_unreachable(),
        "drop" => {
            stack.pop(StackType::Any)?;
        }
        "select" => {
            stack.pop_val(Valtype::I32)?;
            let first = stack.pop(StackType::Any)?;
            let second = stack.pop(first)?;
            stack.push(if first == StackType::Any { second } else { first });
        }
        "get_local" | "set_local" | "tee_local" => {
            let index = index_arg(instr, 0)?;
            let local = frame
                .get_local(index)
                .ok_or_else(|| format!("Function does not have local {}", index))?;
            if instr.id != "get_local" {
                stack.pop_val(local)?;
            }
            if instr.id != "set_local" {
                stack.push(StackType::Val(local));
            }
        }
        "get_global" => {
            let index = index_arg(instr, 0)?;
            let global = ctx
                .get_global(index)
                .ok_or_else(|| format!("Module does not have global {}", index))?;
            stack.push(StackType::Val(global.valtype));
        }
        "set_global" => {
            let index = index_arg(instr, 0)?;
            let global = ctx
                .get_global(index)
                .ok_or_else(|| format!("Module does not have global {}", index))?;
            if global.mutability != Mutability::Var {
                return Err("global is immutable".to_string());
            }
            stack.pop_val(global.valtype)?;
        }
        "br" => {
            let types = label_types(frame, index_arg(instr, 0)?)?;
            stack.pop_all(&types)?;
            stack.set_unreachable();
        }
        "br_if" => {
            let types = label_types(frame, index_arg(instr, 0)?)?;
            stack.pop_val(Valtype::I32)?;
            stack.pop_all(&types)?;
            stack.push_all(&types);
        }
        "br_table" => {
            if instr.args.is_empty() {
                return Err("br_table requires a default label".to_string());
            }
            let default = index_arg(instr, instr.args.len() - 1)?;
            let types = label_types(frame, default)?;
            for position in 0..instr.args.len() - 1 {
                let depth = index_arg(instr, position)?;
                if label_types(frame, depth)? != types {
                    return Err(format!(
                        "br_table index {} at position {} has mismatching result type.",
                        depth, position
                    ));
                }
            }
            stack.pop_val(Valtype::I32)?;
            stack.pop_all(&types)?;
            stack.set_unreachable();
        }
        "return" => {
            let types = frame.return_types().to_vec();
            stack.pop_all(&types)?;
            stack.set_unreachable();
        }
        "current_memory" => {
            require_memory(ctx)?;
            stack.push(StackType::Val(Valtype::I32));
        }
        "grow_memory" => {
            require_memory(ctx)?;
            stack.pop_val(Valtype::I32)?;
            stack.push(StackType::Val(Valtype::I32));
        }
        "end" => {}
        other => return Err(format!("Unknown instruction {}.", other)),
    }
    Ok(())
}
