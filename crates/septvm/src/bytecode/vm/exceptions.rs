//! Exception materialization and propagation.
//!
//! Propagation is an explicit unwinding of the frame list, not a use of Rust
//! panics: `Raise` (or a failed operation inside the interpreter) parks the
//! exception in the current frame's exception slot and walks the handler
//! stacks newest-first. Frames without a matching handler are popped with
//! the exception copied into the caller's slot; an exception that unwinds
//! past the base of the current (possibly nested) invocation surfaces as
//! `Err` to whoever started it — native code for a nested `invoke`, the
//! machine for the outermost frame.

use super::Vm;
use crate::{
    exceptions::{ExcType, PendingExc, SepError, SepResult},
    heap::{HeapData, HeapId},
    intern::StaticStrings,
    object::{SepObject, Slot, linearize},
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

impl<T: ResourceTracker, Tr: VmTracer> Vm<'_, T, Tr> {
    /// Builds the September object for a pending exception.
    ///
    /// This is the raise path, so it must not fail: if allocating the message
    /// string or the object itself is refused, the pre-allocated
    /// `EOutOfMemory` singleton is raised instead.
    fn make_exception_object(&mut self, exc_type: ExcType, message: &str) -> Value {
        let proto = self.protos.exc_proto(exc_type);
        let Ok(message_id) = self
            .heap
            .allocate(HeapData::Str(crate::types::SepStr::new(message)))
        else {
            return Value::Ref(self.protos.oom_singleton);
        };

        let mut object = SepObject::with_prototypes([Value::Ref(proto)]);
        object.set_slot(StaticStrings::Message.into(), Slot::Field(Value::Ref(message_id)));
        object.set_slot(StaticStrings::Class.into(), Slot::Field(Value::Ref(proto)));
        match self.heap.allocate(HeapData::Object(object)) {
            Ok(id) => Value::Ref(id),
            Err(_) => Value::Ref(self.protos.oom_singleton),
        }
    }

    /// Classifies an exception object: its taxonomy type and message.
    ///
    /// Returns `None` when the value is not an object delegating to the root
    /// `Exception` prototype.
    fn exception_info(&mut self, value: Value) -> SepResult<Option<(ExcType, String)>> {
        let Value::Ref(id) = value else {
            return Ok(None);
        };
        if !matches!(self.heap.get(id), HeapData::Object(_)) {
            return Ok(None);
        }
        let order = linearize(self.heap, id)?;
        if !order.contains(&self.protos.exception) {
            return Ok(None);
        }

        // Classify by the explicit `class` slot when present, else by the
        // nearest taxonomy prototype in the linearization (covers exception
        // objects spawned straight from a taxonomy prototype).
        let exc_type = self
            .read_exception_slot(id, StaticStrings::Class.into())
            .and_then(Value::heap_id)
            .and_then(|class_id| self.protos.exc_type_of(class_id))
            .or_else(|| order.iter().find_map(|&ancestor| self.protos.exc_type_of(ancestor)))
            .unwrap_or(ExcType::Exception);
        let message = self
            .read_exception_slot(id, StaticStrings::Message.into())
            .and_then(|v| self.text_of(v).map(str::to_owned))
            .unwrap_or_default();
        Ok(Some((exc_type, message)))
    }

    /// A plain field read used while classifying exceptions; never runs
    /// getters, never raises.
    fn read_exception_slot(&mut self, object: HeapId, name: crate::intern::StringId) -> Option<Value> {
        let order = linearize(self.heap, object).ok()?;
        for owner in order {
            if let HeapData::Object(obj) = self.heap.get(owner)
                && let Some(Slot::Field(value)) = obj.get_slot(name)
            {
                return Some(*value);
            }
        }
        None
    }

    /// The `Raise` opcode: validates the popped value and converts it into
    /// the error that drives propagation.
    ///
    /// Raising a value that is not an exception object raises `EWrongType`
    /// in its place.
    pub(super) fn raise_value(&mut self, value: Value) -> SepResult<SepError> {
        match self.exception_info(value)? {
            Some((exc_type, message)) => Ok(SepError::raised(exc_type, message, value)),
            None => Ok(ExcType::wrong_type("an Exception object", self.describe(value))),
        }
    }

    /// Propagates a pending exception through the frame list.
    ///
    /// On catch: the handler frame's operand stack is truncated to the depth
    /// the handler recorded, the exception slot is cleared, the exception is
    /// pushed, and the instruction pointer jumps to the handler target.
    /// Returns `Err` when the exception unwinds past `base_depth`.
    pub(super) fn deliver_exception(&mut self, pending: PendingExc, base_depth: usize) -> SepResult<()> {
        let PendingExc {
            exc_type,
            message,
            value,
        } = pending;
        let value = match value {
            Some(value) => value,
            None => self.make_exception_object(exc_type, &message),
        };
        self.tracer.on_raise(exc_type.into());

        loop {
            if self.frame_depth() == base_depth {
                return Err(SepError::raised(exc_type, message.clone(), value));
            }
            let frame_id = self
                .current_frame_id_for_unwind()
                .ok_or_else(|| SepError::fatal("exception propagation with an empty frame list"))?;

            let frame = self.frame_mut(frame_id);
            frame.exception = value;
            if let Some(handler) = frame.handlers.pop() {
                frame.stack.truncate(handler.stack_depth);
                frame.exception = Value::Nothing;
                frame.stack.push(value);
                frame.ip = handler.target;
                self.tracer.on_catch(handler.target);
                return Ok(());
            }

            self.pop_frame()?;
        }
    }

    fn current_frame_id_for_unwind(&self) -> Option<HeapId> {
        self.frames.last().copied()
    }
}
