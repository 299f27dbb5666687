//! Execution frames.

use smallvec::SmallVec;

use crate::{heap::HeapId, module::CodeRef, value::Value};

/// One entry of a frame's handler stack.
///
/// Pushed by `PushHandler`, which records the operand stack depth at that
/// moment; a caught exception truncates the stack back to exactly that depth
/// before control moves to `target`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HandlerRecord {
    /// Absolute instruction offset of the handler entry point.
    pub target: usize,
    /// Operand stack depth recorded when the handler was pushed.
    pub stack_depth: usize,
}

/// A runtime activation record.
///
/// Frames are heap objects (`HeapData::Frame`) so the collector marks
/// everything a suspended call still holds: its operand stack, its scope, the
/// function being executed, and a propagating exception parked in the
/// exception slot. The interpreter threads live frames through its own
/// newest-last frame list, which doubles as the GC root set; `parent` links
/// the same chain from the frame side.
#[derive(Debug)]
pub(crate) struct Frame {
    /// Operand stack. Bounded by the code block's declared `max_stack`.
    pub stack: Vec<Value>,
    /// The frame's scope object: locals, with the lexical chain behind it.
    pub scope: HeapId,
    /// Instruction pointer into the code block.
    pub ip: usize,
    /// The function being executed; `Nothing` for a module body.
    pub function: Value,
    /// The code being executed; `None` for native frames, which never run
    /// the interpreter loop.
    pub block: Option<CodeRef>,
    /// Declared operand stack ceiling, copied out of the code block.
    pub max_stack: u16,
    /// Active exception handlers, innermost last.
    pub handlers: SmallVec<[HandlerRecord; 2]>,
    /// The currently propagating exception; `Nothing` when there is none.
    pub exception: Value,
    /// The caller's frame.
    pub parent: Option<HeapId>,
}

impl Frame {
    pub fn new(scope: HeapId, function: Value, block: Option<CodeRef>, max_stack: u16, parent: Option<HeapId>) -> Self {
        Self {
            stack: Vec::new(),
            scope,
            ip: 0,
            function,
            block,
            max_stack,
            handlers: SmallVec::new(),
            exception: Value::Nothing,
            parent,
        }
    }

    /// GC trace: operand stack, scope, function, exception slot, caller.
    pub fn collect_refs(&self, work_list: &mut Vec<HeapId>) {
        for value in &self.stack {
            if let Value::Ref(id) = value {
                work_list.push(*id);
            }
        }
        work_list.push(self.scope);
        if let Value::Ref(id) = self.function {
            work_list.push(id);
        }
        if let Value::Ref(id) = self.exception {
            work_list.push(id);
        }
        if let Some(parent) = self.parent {
            work_list.push(parent);
        }
    }

    pub fn estimate_size(&self) -> usize {
        self.stack.capacity() * std::mem::size_of::<Value>()
            + self.handlers.len() * std::mem::size_of::<HandlerRecord>()
    }
}
