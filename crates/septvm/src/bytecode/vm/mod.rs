//! The interpreter loop.
//!
//! A single-threaded cooperative loop: one instruction at a time, no
//! pre-emption. Safe points — where the collector may run — are exactly the
//! top of each instruction fetch, so no instruction is ever interrupted
//! mid-execution and values held in Rust locals across one opcode are never
//! at risk.
//!
//! Frames are heap objects; the VM threads the live ones through `frames`
//! (newest last), which is both the call stack and the GC root list. Each
//! iteration re-reads the current frame's instruction pointer, decodes one
//! instruction with a local cursor, writes the advanced pointer back, and
//! executes. Exception delivery and the call protocol live in sibling
//! modules.

mod call;
mod exceptions;

pub(crate) use call::CallOutcome;

use crate::{
    args::{ArgList, ArgRecord},
    bytecode::op::{ARG_LAZY, ARG_NAMED, Opcode, SLOT_METHOD},
    exceptions::{ExcType, SepError, SepResult},
    frame::{Frame, HandlerRecord},
    function::SepFunction,
    heap::{Heap, HeapData, HeapId},
    intern::{Interns, StringId},
    module::{CodeRef, ModuleRegistry},
    object::{Slot, resolve_slot},
    resource::ResourceTracker,
    runtime::CorePrototypes,
    tracer::VmTracer,
    types::SepStr,
    value::Value,
};

/// Outcome of one interpreter step.
enum Step {
    Continue,
    /// A `Return` unwound the base frame of this run; execution of the
    /// nested (or outermost) invocation is complete.
    Finished(Value),
}

/// The virtual machine.
///
/// Borrows the machine's heap, string pool, module registry, and prototype
/// table for the duration of one execution. Generic over the resource
/// tracker and the tracer so both monomorphize away in production.
pub(crate) struct Vm<'a, T: ResourceTracker, Tr: VmTracer> {
    pub heap: &'a mut Heap<T>,
    pub interns: &'a mut Interns,
    pub modules: &'a ModuleRegistry,
    pub protos: &'a CorePrototypes,
    /// The globals registry object: outermost prototype of every scope chain.
    pub globals: HeapId,
    pub tracer: &'a mut Tr,
    /// Live frames, newest last.
    frames: Vec<HeapId>,
}

impl<'a, T: ResourceTracker, Tr: VmTracer> Vm<'a, T, Tr> {
    pub fn new(
        heap: &'a mut Heap<T>,
        interns: &'a mut Interns,
        modules: &'a ModuleRegistry,
        protos: &'a CorePrototypes,
        globals: HeapId,
        tracer: &'a mut Tr,
    ) -> Self {
        Self {
            heap,
            interns,
            modules,
            protos,
            globals,
            tracer,
            frames: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Frame plumbing
    // ------------------------------------------------------------------

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    fn current_frame_id(&self) -> SepResult<HeapId> {
        self.frames
            .last()
            .copied()
            .ok_or_else(|| SepError::fatal("no executing frame"))
    }

    /// # Panics
    /// Panics when the id does not reference a frame; frame ids never leak
    /// to September code, so that is a VM bug.
    pub(super) fn frame(&self, id: HeapId) -> &Frame {
        match self.heap.get(id) {
            HeapData::Frame(frame) => frame,
            other => panic!("frame id references a {}", other.kind_name()),
        }
    }

    pub(super) fn frame_mut(&mut self, id: HeapId) -> &mut Frame {
        match self.heap.get_mut(id) {
            HeapData::Frame(frame) => frame,
            other => panic!("frame id references a {}", other.kind_name()),
        }
    }

    pub(crate) fn push_frame(&mut self, frame: Frame) -> SepResult<HeapId> {
        let id = self.alloc(HeapData::Frame(frame))?;
        self.frames.push(id);
        self.tracer.on_frame_push(self.frames.len());
        Ok(id)
    }

    pub(super) fn pop_frame(&mut self) -> SepResult<HeapId> {
        let id = self
            .frames
            .pop()
            .ok_or_else(|| SepError::fatal("frame list underflow"))?;
        self.tracer.on_frame_pop(self.frames.len());
        Ok(id)
    }

    /// Pushes onto the current frame's operand stack.
    ///
    /// Exceeding the block's declared maximum is a fatal fault: verified
    /// bytecode cannot do it, so it means the interpreter itself is broken.
    fn push(&mut self, value: Value) -> SepResult<()> {
        let id = self.current_frame_id()?;
        let frame = self.frame_mut(id);
        if frame.block.is_some() && frame.stack.len() >= usize::from(frame.max_stack) {
            return Err(SepError::fatal("operand stack exceeded its declared maximum"));
        }
        frame.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> SepResult<Value> {
        let id = self.current_frame_id()?;
        self.frame_mut(id)
            .stack
            .pop()
            .ok_or_else(|| SepError::fatal("operand stack underflow"))
    }

    // ------------------------------------------------------------------
    // Allocation and value helpers
    // ------------------------------------------------------------------

    /// Allocates, mapping tracker refusal onto `EOutOfMemory`.
    pub fn alloc(&mut self, data: HeapData) -> SepResult<HeapId> {
        self.heap.allocate(data).map_err(|_| ExcType::out_of_memory())
    }

    /// Allocates a runtime string.
    pub fn make_string(&mut self, text: impl Into<Box<str>>) -> SepResult<Value> {
        let id = self.alloc(HeapData::Str(SepStr::new(text)))?;
        Ok(Value::Ref(id))
    }

    /// Allocates a function value.
    pub fn make_function(&mut self, function: SepFunction) -> SepResult<Value> {
        let id = self.alloc(HeapData::Function(function))?;
        Ok(Value::Ref(id))
    }

    /// The text behind a string value (interned or heap).
    pub fn text_of(&self, value: Value) -> Option<&str> {
        match value {
            Value::InternString(id) => Some(self.interns.get(id)),
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(s) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn describe(&self, value: Value) -> &'static str {
        self.heap.describe(value)
    }

    // ------------------------------------------------------------------
    // Garbage collection
    // ------------------------------------------------------------------

    fn gc_roots(&self) -> Vec<HeapId> {
        let mut roots = self.frames.clone();
        roots.extend(self.modules.scopes());
        roots.push(self.globals);
        self.protos.collect_roots(&mut roots);
        roots
    }

    /// Safe-point check: collects when the allocation counters crossed the
    /// tracker's soft threshold.
    fn maybe_collect(&mut self) {
        if self.heap.should_collect() {
            self.collect_now();
        }
    }

    /// Unconditional collection, also used by the embedder API.
    pub fn collect_now(&mut self) {
        let roots = self.gc_roots();
        let freed = self.heap.collect_garbage(&roots);
        self.tracer.on_gc(freed, self.heap.live_objects());
    }

    // ------------------------------------------------------------------
    // The loop
    // ------------------------------------------------------------------

    /// Runs until the frame depth drops back to `base_depth`.
    ///
    /// This is the re-entry point for nested invocations: native code calls
    /// back into the interpreter with the current depth as base, and an
    /// exception that unwinds past that depth surfaces as `Err` rather than
    /// continuing to propagate — the native caller decides what happens next.
    pub fn run_until(&mut self, base_depth: usize) -> SepResult<Value> {
        loop {
            self.maybe_collect();
            match self.step(base_depth) {
                Ok(Step::Continue) => {}
                Ok(Step::Finished(value)) => return Ok(value),
                Err(SepError::Fatal(msg)) => return Err(SepError::Fatal(msg)),
                Err(SepError::Exc(pending)) => self.deliver_exception(*pending, base_depth)?,
            }
        }
    }

    /// Fetches, decodes, and executes one instruction of the current frame.
    fn step(&mut self, base_depth: usize) -> SepResult<Step> {
        let frame_id = self.current_frame_id()?;
        let modules = self.modules;
        let (code_ref, mut ip) = {
            let frame = self.frame(frame_id);
            let code_ref = frame
                .block
                .ok_or_else(|| SepError::fatal("native frame reached the interpreter loop"))?;
            (code_ref, frame.ip)
        };
        let code: &[u8] = &modules.block(code_ref).code;

        let opcode = Opcode::from_repr(*code.get(ip).ok_or_else(|| SepError::fatal("instruction pointer out of range"))?)
            .ok_or_else(|| SepError::fatal("undecodable opcode in verified block"))?;
        let stack_depth = self.frame(frame_id).stack.len();
        self.tracer.on_instruction(ip, opcode, stack_depth);
        ip += 1;

        match opcode {
            Opcode::Nop => {
                self.frame_mut(frame_id).ip = ip;
            }
            Opcode::Pop => {
                self.frame_mut(frame_id).ip = ip;
                self.pop()?;
            }
            Opcode::PushConst => {
                let index = fetch_u16(code, &mut ip)?;
                self.frame_mut(frame_id).ip = ip;
                let value = modules.constant(code_ref.module, index);
                self.push(value)?;
            }
            Opcode::PushLocal => {
                let name = self.fetch_name(code, &mut ip, code_ref)?;
                self.frame_mut(frame_id).ip = ip;
                let scope = self.frame(frame_id).scope;
                let value = self.read_scope(scope, name)?;
                self.push(value)?;
            }
            Opcode::StoreLocal => {
                let name = self.fetch_name(code, &mut ip, code_ref)?;
                self.frame_mut(frame_id).ip = ip;
                let value = self.pop()?;
                let scope = self.frame(frame_id).scope;
                self.store_scope(scope, name, value)?;
            }
            Opcode::CreateSlot => {
                let name = self.fetch_name(code, &mut ip, code_ref)?;
                let flags = fetch_u8(code, &mut ip)?;
                self.frame_mut(frame_id).ip = ip;
                let value = self.pop()?;
                let scope = self.frame(frame_id).scope;
                let slot = if flags & SLOT_METHOD != 0 {
                    self.check_function_value(value)?;
                    Slot::Method(value)
                } else {
                    Slot::Field(value)
                };
                match self.heap.get_mut(scope) {
                    HeapData::Object(obj) => obj.set_slot(name, slot),
                    _ => return Err(SepError::fatal("scope is not an object")),
                }
            }
            Opcode::FetchProp => {
                let name = self.fetch_name(code, &mut ip, code_ref)?;
                self.frame_mut(frame_id).ip = ip;
                let receiver = self.pop()?;
                let value = self.fetch_property(receiver, name)?;
                self.push(value)?;
            }
            Opcode::StoreProp => {
                let name = self.fetch_name(code, &mut ip, code_ref)?;
                self.frame_mut(frame_id).ip = ip;
                let value = self.pop()?;
                let receiver = self.pop()?;
                self.store_property(receiver, name, value)?;
            }
            Opcode::Call => {
                let argc = usize::from(fetch_u8(code, &mut ip)?);
                let mut records: ArgList = ArgList::with_capacity(argc);
                for _ in 0..argc {
                    let flags = fetch_u8(code, &mut ip)?;
                    let name = if flags & ARG_NAMED != 0 {
                        Some(self.fetch_name(code, &mut ip, code_ref)?)
                    } else {
                        None
                    };
                    records.push(ArgRecord {
                        value: Value::Nothing,
                        name,
                        lazy: flags & ARG_LAZY != 0,
                    });
                }
                self.frame_mut(frame_id).ip = ip;

                let callable = self.pop()?;
                for record in records.iter_mut().rev() {
                    record.value = self.pop()?;
                }
                match self.invoke_callable(callable, records)? {
                    CallOutcome::Returned(value) => self.push(value)?,
                    CallOutcome::PushedFrame => {}
                }
            }
            Opcode::Return => {
                let result = self.pop()?;
                self.pop_frame()?;
                if self.frames.len() == base_depth {
                    return Ok(Step::Finished(result));
                }
                self.push(result)?;
            }
            Opcode::CreateFunc | Opcode::Lazy => {
                let block = fetch_u16(code, &mut ip)?;
                self.frame_mut(frame_id).ip = ip;
                let scope = self.frame(frame_id).scope;
                let function = SepFunction::from_block(
                    CodeRef {
                        module: code_ref.module,
                        block,
                    },
                    scope,
                );
                let value = self.make_function(function)?;
                self.push(value)?;
            }
            Opcode::Branch => {
                let offset = fetch_i16(code, &mut ip)?;
                self.frame_mut(frame_id).ip = jump_target(ip, offset);
            }
            Opcode::BranchIf | Opcode::BranchIfNot => {
                let offset = fetch_i16(code, &mut ip)?;
                self.frame_mut(frame_id).ip = ip;
                let condition = self.pop()?.is_truthy();
                if condition == (opcode == Opcode::BranchIf) {
                    self.frame_mut(frame_id).ip = jump_target(ip, offset);
                }
            }
            Opcode::PushHandler => {
                let target = fetch_u16(code, &mut ip)?;
                let frame = self.frame_mut(frame_id);
                frame.ip = ip;
                let stack_depth = frame.stack.len();
                frame.handlers.push(HandlerRecord {
                    target: usize::from(target),
                    stack_depth,
                });
            }
            Opcode::PopHandler => {
                let frame = self.frame_mut(frame_id);
                frame.ip = ip;
                if frame.handlers.pop().is_none() {
                    return Err(SepError::fatal("PopHandler with an empty handler stack"));
                }
            }
            Opcode::Raise => {
                self.frame_mut(frame_id).ip = ip;
                let value = self.pop()?;
                return Err(self.raise_value(value)?);
            }
        }
        Ok(Step::Continue)
    }

    /// Decodes a u16 name operand and resolves it through the constant pool.
    fn fetch_name(&mut self, code: &[u8], ip: &mut usize, code_ref: CodeRef) -> SepResult<StringId> {
        let index = fetch_u16(code, ip)?;
        match self.modules.constant(code_ref.module, index) {
            Value::InternString(id) => Ok(id),
            _ => Err(SepError::fatal("name operand is not an interned string")),
        }
    }

    // ------------------------------------------------------------------
    // Scope-chain reads and writes
    // ------------------------------------------------------------------

    /// `PushLocal`: a raw read through the scope chain. Functions come back
    /// unbound; getters run with the scope as receiver.
    fn read_scope(&mut self, scope: HeapId, name: StringId) -> SepResult<Value> {
        match resolve_slot(self.heap, scope, name)? {
            None => Err(ExcType::missing_property(self.interns.get(name))),
            Some((_, Slot::Field(value) | Slot::Method(value))) => Ok(value),
            Some((_, Slot::Builtin(builtin))) => self.make_function(SepFunction::from_builtin(builtin)),
            Some((_, Slot::Property { getter, .. })) => self.invoke_bound(getter, Value::Ref(scope), ArgList::new()),
        }
    }

    /// `StoreLocal`: assigns into the nearest scope that already defines the
    /// name, else creates the binding in the current scope. This is what
    /// lets closures write variables of enclosing scopes — unlike property
    /// writes, there is no copy-down.
    fn store_scope(&mut self, scope: HeapId, name: StringId, value: Value) -> SepResult<()> {
        match resolve_slot(self.heap, scope, name)? {
            Some((_, Slot::Property { setter, .. })) => {
                let Some(setter) = setter else {
                    let name = self.interns.get(name).to_owned();
                    return Err(ExcType::wrong_type("a writable property", &format!("read-only '{name}'")));
                };
                self.invoke_bound(setter, Value::Ref(scope), ArgList::from_slice(&[ArgRecord::positional(value)]))?;
                Ok(())
            }
            Some((owner, _)) => {
                match self.heap.get_mut(owner) {
                    HeapData::Object(obj) => obj.set_slot(name, Slot::Field(value)),
                    _ => return Err(SepError::fatal("scope chain entry is not an object")),
                }
                Ok(())
            }
            None => {
                match self.heap.get_mut(scope) {
                    HeapData::Object(obj) => obj.set_slot(name, Slot::Field(value)),
                    _ => return Err(SepError::fatal("scope is not an object")),
                }
                Ok(())
            }
        }
    }

    fn check_function_value(&self, value: Value) -> SepResult<()> {
        match value {
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::Function(_)) => Ok(()),
            other => Err(ExcType::wrong_type("a Function", self.describe(other))),
        }
    }
}

// ----------------------------------------------------------------------
// Operand fetching
// ----------------------------------------------------------------------

fn fetch_u8(code: &[u8], ip: &mut usize) -> SepResult<u8> {
    let byte = *code
        .get(*ip)
        .ok_or_else(|| SepError::fatal("operand fetch out of range"))?;
    *ip += 1;
    Ok(byte)
}

fn fetch_u16(code: &[u8], ip: &mut usize) -> SepResult<u16> {
    match code.get(*ip..*ip + 2) {
        Some(&[lo, hi]) => {
            *ip += 2;
            Ok(u16::from_le_bytes([lo, hi]))
        }
        _ => Err(SepError::fatal("operand fetch out of range")),
    }
}

fn fetch_i16(code: &[u8], ip: &mut usize) -> SepResult<i16> {
    fetch_u16(code, ip).map(|raw| raw as i16)
}

fn jump_target(ip: usize, offset: i16) -> usize {
    usize::try_from(ip as i64 + i64::from(offset)).expect("verifier admitted an out-of-range jump")
}
