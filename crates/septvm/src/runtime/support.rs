//! Helpers for writing builtin prototype methods.
//!
//! Builtins read their arguments back out of the scope the binder populated,
//! so the same code path serves eager, named, defaulted, and rest arguments.

use super::BuiltinKind;
use crate::{
    bytecode::vm::Vm,
    exceptions::{ExcType, SepError, SepResult},
    function::BuiltinFunction,
    heap::{HeapData, HeapId},
    intern::Interns,
    module::ParameterDescriptor,
    object::{SepObject, Slot},
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

/// Builds a builtin slot with eager positional parameters.
pub(super) fn builtin_slot(name: &'static str, kind: BuiltinKind, interns: &mut Interns, params: &[&str]) -> Slot {
    let params = params
        .iter()
        .map(|&param| ParameterDescriptor::new(interns.intern(param)))
        .collect();
    Slot::Builtin(BuiltinFunction { name, params, kind })
}

/// Installs a builtin method on a prototype under construction.
pub(super) fn method(
    proto: &mut SepObject,
    interns: &mut Interns,
    slot_name: &str,
    diag_name: &'static str,
    kind: BuiltinKind,
    params: &[&str],
) {
    let name_id = interns.intern(slot_name);
    proto.set_slot(name_id, builtin_slot(diag_name, kind, interns, params));
}

/// Reads a bound parameter from the call scope.
///
/// Parameters are plain field slots on the scope object itself, so a miss
/// here means the binder and the descriptor list disagree - a VM bug.
pub(super) fn arg<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    name: &str,
) -> SepResult<Value> {
    let name_id = vm.interns.intern(name);
    match vm.heap.get(scope) {
        HeapData::Object(obj) => match obj.get_slot(name_id) {
            Some(Slot::Field(value)) => Ok(*value),
            _ => Err(SepError::fatal("builtin parameter missing from its call scope")),
        },
        _ => Err(SepError::fatal("builtin call scope is not an object")),
    }
}

pub(super) fn int_arg<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    name: &str,
) -> SepResult<i64> {
    let value = arg(vm, scope, name)?;
    match value {
        Value::Int(n) => Ok(n),
        other => Err(ExcType::wrong_type("an Integer", vm.describe(other))),
    }
}

pub(super) fn text_arg<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    name: &str,
) -> SepResult<String> {
    let value = arg(vm, scope, name)?;
    match vm.text_of(value) {
        Some(text) => Ok(text.to_owned()),
        None => Err(ExcType::wrong_type("a String", vm.describe(value))),
    }
}

/// The receiver as an integer.
pub(super) fn int_this<T: ResourceTracker, Tr: VmTracer>(vm: &Vm<'_, T, Tr>, this: Value) -> SepResult<i64> {
    match this {
        Value::Int(n) => Ok(n),
        other => Err(ExcType::wrong_type("an Integer", vm.describe(other))),
    }
}

/// The receiver's text, for string methods.
pub(super) fn text_this<T: ResourceTracker, Tr: VmTracer>(vm: &Vm<'_, T, Tr>, this: Value) -> SepResult<String> {
    match vm.text_of(this) {
        Some(text) => Ok(text.to_owned()),
        None => Err(ExcType::wrong_type("a String", vm.describe(this))),
    }
}

/// The receiver as an array id.
pub(super) fn array_this<T: ResourceTracker, Tr: VmTracer>(vm: &Vm<'_, T, Tr>, this: Value) -> SepResult<HeapId> {
    match this {
        Value::Ref(id) if matches!(vm.heap.get(id), HeapData::Array(_)) => Ok(id),
        other => Err(ExcType::wrong_type("an Array", vm.describe(other))),
    }
}
