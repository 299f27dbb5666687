//! Prototypes for the special values: `Bool`, `Nothing`, and `Function`.

use super::{BuiltinKind, support};
use crate::{
    bytecode::vm::Vm,
    exceptions::{ExcType, SepResult},
    heap::HeapId,
    intern::Interns,
    object::SepObject,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

pub(super) fn install_bool(proto: &mut SepObject, interns: &mut Interns) {
    support::method(proto, interns, "not", "Bool.not", BuiltinKind::BoolNot, &[]);
    support::method(proto, interns, "toString", "Bool.toString", BuiltinKind::BoolToString, &[]);
}

pub(super) fn install_nothing(proto: &mut SepObject, interns: &mut Interns) {
    support::method(
        proto,
        interns,
        "toString",
        "Nothing.toString",
        BuiltinKind::NothingToString,
        &[],
    );
}

pub(super) fn install_function(proto: &mut SepObject, interns: &mut Interns) {
    support::method(
        proto,
        interns,
        "toString",
        "Function.toString",
        BuiltinKind::FunctionToString,
        &[],
    );
}

pub(super) fn not<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    _scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    match this {
        Value::Bool(b) => Ok(Value::Bool(!b)),
        other => Err(ExcType::wrong_type("a Bool", vm.describe(other))),
    }
}

pub(super) fn bool_to_string<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    _scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    match this {
        Value::Bool(b) => vm.make_string(if b { "True" } else { "False" }),
        other => Err(ExcType::wrong_type("a Bool", vm.describe(other))),
    }
}

pub(super) fn nothing_to_string<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    _scope: HeapId,
    _this: Value,
) -> SepResult<Value> {
    vm.make_string("Nothing")
}

pub(super) fn function_to_string<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    _scope: HeapId,
    _this: Value,
) -> SepResult<Value> {
    vm.make_string("<Function>")
}
