//! Interpreter frames
//!
//! Every function activation and every entered `block`, `loop` or `if` arm
//! is one [`Frame`] on the executor's frame stack. A frame does not own its
//! instructions: it keeps the function body and the path of structured
//! instructions leading from the body to the sequence it runs.

use super::store::InstanceAddr;
use super::{RuntimeError, Value};
use crate::ast::{Func, Node};
use std::rc::Rc;

/// One step into a nested instruction sequence, by the position of the
/// structured instruction in its parent sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Block(usize),
    Loop(usize),
    Then(usize),
    Else(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    Function { locals: Vec<Value>, instance: InstanceAddr },
    Block,
    /// Branches to a loop frame restart it.
    Loop,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub func: Rc<Func>,
    pub path: Rc<[Step]>,
    /// Position of the next instruction to run.
    pub pc: usize,
    pub kind: FrameKind,
    /// Number of values left on the stack when the frame runs to its end.
    pub arity: usize,
    /// Position of the owning function frame on the frame stack.
    pub function: usize,
}

impl Frame {
    /// Activation of `func` with its locals (parameters first).
    pub fn function(func: Rc<Func>, instance: InstanceAddr, locals: Vec<Value>, arity: usize, position: usize) -> Self {
        Frame {
            func,
            path: Rc::from(Vec::new()),
            pc: 0,
            kind: FrameKind::Function { locals, instance },
            arity,
            function: position,
        }
    }

    /// A frame running the sequence one `step` below this one.
    pub fn child(&self, step: Step, arity: usize) -> Self {
        let mut path = self.path.to_vec();
        path.push(step);
        Frame {
            func: Rc::clone(&self.func),
            path: Rc::from(path),
            pc: 0,
            kind: match step {
                Step::Loop(_) => FrameKind::Loop,
                _ => FrameKind::Block,
            },
            arity,
            function: self.function,
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(self.kind, FrameKind::Loop)
    }
}

/// The instruction sequence reached by following `path` from the body of
/// `func`.
pub fn code<'f>(func: &'f Func, path: &[Step]) -> Result<&'f [Node], RuntimeError> {
    let mut code: &[Node] = &func.body;
    for step in path {
        code = match (*step, code.get(position(*step))) {
            (Step::Block(_), Some(Node::BlockInstruction(block))) => &block.instr,
            (Step::Loop(_), Some(Node::LoopInstruction(block))) => &block.instr,
            (Step::Then(_), Some(Node::IfInstruction(block))) => &block.consequent,
            (Step::Else(_), Some(Node::IfInstruction(block))) => &block.alternate,
            _ => {
                return Err(RuntimeError::UnknownInstruction(format!(
                    "no structured instruction at {:?} in {}",
                    step, func.name.value
                )))
            }
        };
    }
    Ok(code)
}

fn position(step: Step) -> usize {
    match step {
        Step::Block(i) | Step::Loop(i) | Step::Then(i) | Step::Else(i) => i,
    }
}
