//! The call protocol: callable resolution, scope creation, argument binding,
//! frame dispatch, and property access (which can call getters and setters).

use smallvec::smallvec;

use super::Vm;
use crate::{
    args::{ArgList, ArgRecord},
    exceptions::{ExcType, SepError, SepResult},
    frame::Frame,
    function::{Callable, SepFunction},
    heap::{HeapData, HeapId},
    intern::{StaticStrings, StringId},
    object::{SepObject, Slot, resolve_slot},
    resource::ResourceTracker,
    signature::bind_arguments,
    tracer::VmTracer,
    value::Value,
};

/// What a call did.
pub(crate) enum CallOutcome {
    /// A native call ran to completion; the caller pushes the value.
    Returned(Value),
    /// A bytecode frame was pushed; the loop continues in the callee.
    PushedFrame,
}

impl<T: ResourceTracker, Tr: VmTracer> Vm<'_, T, Tr> {
    /// Invokes a callable synchronously and runs it to completion.
    ///
    /// This is the re-entrancy point the native layer uses (`force`, property
    /// getters, default thunks): it pushes a nested frame and drives the
    /// interpreter until that frame returns. An exception escaping the nested
    /// call comes back as `Err`; callers must check after every nested
    /// invocation — usually by propagating with `?`, which parks the
    /// exception in the current frame's exception slot on the way out.
    pub fn invoke(&mut self, callable: Value, args: ArgList) -> SepResult<Value> {
        let base_depth = self.frame_depth();
        match self.invoke_callable(callable, args)? {
            CallOutcome::Returned(value) => Ok(value),
            CallOutcome::PushedFrame => self.run_until(base_depth),
        }
    }

    /// Binds `receiver` into a copy of the function value and invokes it.
    pub fn invoke_bound(&mut self, function: Value, receiver: Value, args: ArgList) -> SepResult<Value> {
        let bound = self.bind_function(function, receiver)?;
        self.invoke(bound, args)
    }

    /// Steps 1-5 of the call protocol: resolve, scope, bind, dispatch.
    pub(super) fn invoke_callable(&mut self, callable: Value, args: ArgList) -> SepResult<CallOutcome> {
        // 1. Resolve the callable to a function.
        let function = match callable {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Function(f) => f.clone(),
                other => return Err(ExcType::not_callable(other.kind_name())),
            },
            other => return Err(ExcType::not_callable(self.describe(other))),
        };

        // 2. New scope: first prototype is the captured scope (the globals
        //    object for builtins, which close over nothing), with `self`
        //    bound for method calls.
        let enclosing = function.captured_scope.unwrap_or(self.globals);
        let mut scope = SepObject::with_prototypes([Value::Ref(enclosing)]);
        if let Some(this) = function.this {
            scope.set_slot(StaticStrings::SelfBinding.into(), Slot::Field(this));
        }
        let scope_id = self.alloc(HeapData::Object(scope))?;

        // 3-4. Bind parameters. Default thunks may re-enter the interpreter,
        //    and the new scope is not reachable from any frame yet, so pin
        //    it (and the incoming values) across binding.
        let params = match &function.callable {
            Callable::Block(code) => self.modules.block(*code).params.clone(),
            Callable::Native(builtin) => builtin.params.clone(),
        };
        let default_ctx = match &function.callable {
            Callable::Block(code) => Some(*code),
            Callable::Native(_) => None,
        };
        let pin = self.heap.push_pin_scope();
        self.heap.pin(&pin, callable);
        self.heap.pin(&pin, Value::Ref(scope_id));
        for arg in &args {
            self.heap.pin(&pin, arg.value);
        }
        let bound = bind_arguments(self, scope_id, &params, &args, default_ctx);
        self.heap.pop_pin_scope(pin);
        bound?;

        // 5. Dispatch.
        let parent = self.frames.last().copied();
        match function.callable {
            Callable::Block(code) => {
                let max_stack = self.modules.block(code).max_stack;
                let frame = Frame::new(scope_id, callable, Some(code), max_stack, parent);
                self.push_frame(frame)?;
                Ok(CallOutcome::PushedFrame)
            }
            Callable::Native(builtin) => {
                // Native calls skip code-block execution: push a frame so the
                // scope stays rooted and the call shows up in the frame list,
                // run the native function, pop the frame either way.
                let frame = Frame::new(scope_id, callable, None, 0, parent);
                self.push_frame(frame)?;
                let this = function.this.unwrap_or(Value::Nothing);
                let result = crate::runtime::dispatch_builtin(self, builtin.kind, scope_id, this);
                self.pop_frame()?;
                Ok(CallOutcome::Returned(result?))
            }
        }
    }

    // ------------------------------------------------------------------
    // Property access
    // ------------------------------------------------------------------

    /// The prototype object that resolves properties for a value.
    fn prototype_of(&self, value: Value) -> SepResult<HeapId> {
        let protos = self.protos;
        Ok(match value {
            Value::Int(_) => protos.integer,
            Value::Bool(_) => protos.boolean,
            Value::Nothing => protos.nothing,
            Value::InternString(_) => protos.string,
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Object(_) => id,
                HeapData::Str(_) => protos.string,
                HeapData::Array(_) => protos.array,
                HeapData::Function(_) => protos.function,
                HeapData::Frame(_) => {
                    return Err(ExcType::wrong_type("a value with properties", "Frame"));
                }
            },
        })
    }

    /// `FetchProp`: resolve through the receiver's linearization, evaluating
    /// getters and binding methods to the receiver.
    pub(super) fn fetch_property(&mut self, receiver: Value, name: StringId) -> SepResult<Value> {
        let start = self.prototype_of(receiver)?;
        match resolve_slot(self.heap, start, name)? {
            None => Err(ExcType::missing_property(self.interns.get(name))),
            Some((_, Slot::Field(value))) => Ok(value),
            Some((_, Slot::Method(function))) => self.bind_function(function, receiver),
            Some((_, Slot::Builtin(builtin))) => {
                let mut function = SepFunction::from_builtin(builtin);
                function.this = Some(receiver);
                self.make_function(function)
            }
            Some((_, Slot::Property { getter, .. })) => self.invoke_bound(getter, receiver, ArgList::new()),
        }
    }

    /// `StoreProp`: copy-down semantics. A field found anywhere in the
    /// linearization is written as a fresh field slot on the receiver itself;
    /// prototypes are never mutated through a child. Property slots instead
    /// run their setter with the receiver bound.
    pub(super) fn store_property(&mut self, receiver: Value, name: StringId, value: Value) -> SepResult<()> {
        let Value::Ref(receiver_id) = receiver else {
            return Err(ExcType::wrong_type("an Object", self.describe(receiver)));
        };
        if !matches!(self.heap.get(receiver_id), HeapData::Object(_)) {
            return Err(ExcType::wrong_type("an Object", self.describe(receiver)));
        }

        match resolve_slot(self.heap, receiver_id, name)? {
            Some((_, Slot::Property { setter, .. })) => {
                let Some(setter) = setter else {
                    let name = self.interns.get(name).to_owned();
                    return Err(ExcType::wrong_type("a writable property", &format!("read-only '{name}'")));
                };
                self.invoke_bound(setter, receiver, smallvec![ArgRecord::positional(value)])?;
                Ok(())
            }
            _ => {
                match self.heap.get_mut(receiver_id) {
                    HeapData::Object(obj) => obj.set_slot(name, Slot::Field(value)),
                    _ => return Err(SepError::fatal("receiver changed kind mid-write")),
                }
                Ok(())
            }
        }
    }

    /// A copy of the function value with the receiver bound as `this`.
    fn bind_function(&mut self, function: Value, receiver: Value) -> SepResult<Value> {
        match function {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Function(f) => {
                    let bound = f.bind(receiver);
                    self.make_function(bound)
                }
                other => Err(ExcType::not_callable(other.kind_name())),
            },
            other => Err(ExcType::not_callable(self.describe(other))),
        }
    }
}
