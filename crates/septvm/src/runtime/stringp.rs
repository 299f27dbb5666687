//! The String prototype.

use super::{BuiltinKind, support};
use crate::{
    bytecode::vm::Vm,
    exceptions::SepResult,
    heap::HeapId,
    intern::Interns,
    object::SepObject,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

pub(super) fn install(proto: &mut SepObject, interns: &mut Interns) {
    support::method(proto, interns, "+", "String.+", BuiltinKind::StringConcat, &["other"]);
    support::method(proto, interns, "length", "String.length", BuiltinKind::StringLength, &[]);
    support::method(proto, interns, "==", "String.==", BuiltinKind::StringEq, &["other"]);
    support::method(
        proto,
        interns,
        "toString",
        "String.toString",
        BuiltinKind::StringToString,
        &[],
    );
}

pub(super) fn concat<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let mut text = support::text_this(vm, this)?;
    text.push_str(&support::text_arg(vm, scope, "other")?);
    vm.make_string(text)
}

/// Byte length; September strings are byte strings.
pub(super) fn length<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    _scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let text = support::text_this(vm, this)?;
    Value::int(i64::try_from(text.len()).unwrap_or(i64::MAX))
}

/// Content equality; a non-string operand compares unequal.
pub(super) fn eq<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let text = support::text_this(vm, this)?;
    let other = support::arg(vm, scope, "other")?;
    Ok(Value::Bool(vm.text_of(other) == Some(text.as_str())))
}

pub(super) fn to_string<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    _scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    support::text_this(vm, this)?;
    Ok(this)
}
