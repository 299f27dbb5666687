//! Callable values: bytecode functions and native builtins.

use crate::{
    heap::HeapId,
    module::{CodeRef, ParameterDescriptor},
    runtime::BuiltinKind,
    value::Value,
};

/// A native callable plus its explicit parameter descriptor list.
///
/// Builtins go through exactly the same argument binding as bytecode
/// functions; the descriptor list is what makes `rest`, named-only, and lazy
/// parameters work uniformly across the boundary. Dispatch is by
/// [`BuiltinKind`] so native code runs fully monomorphized against the
/// interpreter's tracker and tracer parameters.
#[derive(Debug, Clone)]
pub(crate) struct BuiltinFunction {
    /// Diagnostic name, e.g. `"Integer.+"`.
    pub name: &'static str,
    pub params: Vec<ParameterDescriptor>,
    pub kind: BuiltinKind,
}

/// What a function executes when called.
#[derive(Debug, Clone)]
pub(crate) enum Callable {
    /// A code block; parameters come from the block's descriptor list.
    Block(CodeRef),
    /// A native function with its own descriptor list.
    Native(BuiltinFunction),
}

/// A first-class function value.
///
/// A code block (or native callable) paired with the lexical scope captured
/// where the function literal was evaluated. Method reads produce a copy
/// with `this` bound, so a bound method is just a function value like any
/// other.
#[derive(Debug, Clone)]
pub(crate) struct SepFunction {
    pub callable: Callable,
    /// The scope in effect where the literal was evaluated. `None` only for
    /// builtins installed at bootstrap, which close over nothing.
    pub captured_scope: Option<HeapId>,
    /// Receiver bound by a method read, if any.
    pub this: Option<Value>,
}

impl SepFunction {
    pub fn from_block(code: CodeRef, captured_scope: HeapId) -> Self {
        Self {
            callable: Callable::Block(code),
            captured_scope: Some(captured_scope),
            this: None,
        }
    }

    pub fn from_builtin(builtin: BuiltinFunction) -> Self {
        Self {
            callable: Callable::Native(builtin),
            captured_scope: None,
            this: None,
        }
    }

    /// A copy of this function with the receiver bound.
    pub fn bind(&self, this: Value) -> Self {
        Self {
            callable: self.callable.clone(),
            captured_scope: self.captured_scope,
            this: Some(this),
        }
    }

    /// GC trace: the captured scope and the bound receiver.
    pub fn collect_refs(&self, work_list: &mut Vec<HeapId>) {
        if let Some(scope) = self.captured_scope {
            work_list.push(scope);
        }
        if let Some(Value::Ref(id)) = self.this {
            work_list.push(id);
        }
    }
}
