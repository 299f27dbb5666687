//! The root Object prototype: methods every September value can reach.

use super::{BuiltinKind, support};
use crate::{
    bytecode::vm::Vm,
    exceptions::{ExcType, SepResult},
    heap::{HeapData, HeapId},
    intern::Interns,
    object::{SepObject, Slot},
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

pub(super) fn install(proto: &mut SepObject, interns: &mut Interns) {
    support::method(proto, interns, "is", "Object.is", BuiltinKind::ObjectIs, &["other"]);
    support::method(proto, interns, "set", "Object.set", BuiltinKind::ObjectSet, &["name", "value"]);
    support::method(
        proto,
        interns,
        "setMethod",
        "Object.setMethod",
        BuiltinKind::ObjectSetMethod,
        &["name", "function"],
    );
    support::method(proto, interns, "spawn", "Object.spawn", BuiltinKind::ObjectSpawn, &[]);
    support::method(
        proto,
        interns,
        "toString",
        "Object.toString",
        BuiltinKind::ObjectToString,
        &[],
    );
}

/// Identity: references compare by heap id, immediates by value. Two string
/// values with equal content but separate allocations are not `is`-equal.
pub(super) fn is<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let other = support::arg(vm, scope, "other")?;
    Ok(Value::Bool(this == other))
}

/// Creates or replaces a field slot directly on the receiver, bypassing the
/// prototype chain entirely. The property name is interned on the way in.
pub(super) fn set<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let Value::Ref(receiver) = this else {
        return Err(ExcType::wrong_type("an Object", vm.describe(this)));
    };
    let name = support::text_arg(vm, scope, "name")?;
    let value = support::arg(vm, scope, "value")?;
    let name_id = vm.interns.intern(&name);
    match vm.heap.get_mut(receiver) {
        HeapData::Object(obj) => {
            obj.set_slot(name_id, Slot::Field(value));
            Ok(value)
        }
        other => Err(ExcType::wrong_type("an Object", other.kind_name())),
    }
}

/// Creates a method slot on the receiver, so reads through `FetchProp` come
/// back bound to whatever object the lookup started from.
pub(super) fn set_method<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let Value::Ref(receiver) = this else {
        return Err(ExcType::wrong_type("an Object", vm.describe(this)));
    };
    let name = support::text_arg(vm, scope, "name")?;
    let function = support::arg(vm, scope, "function")?;
    match function {
        Value::Ref(id) if matches!(vm.heap.get(id), HeapData::Function(_)) => {}
        other => return Err(ExcType::wrong_type("a Function", vm.describe(other))),
    }
    let name_id = vm.interns.intern(&name);
    match vm.heap.get_mut(receiver) {
        HeapData::Object(obj) => {
            obj.set_slot(name_id, Slot::Method(function));
            Ok(function)
        }
        other => Err(ExcType::wrong_type("an Object", other.kind_name())),
    }
}

/// Prototype-language object creation: a fresh object whose sole prototype
/// is the receiver.
pub(super) fn spawn<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    _scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let Value::Ref(proto) = this else {
        return Err(ExcType::wrong_type("an Object", vm.describe(this)));
    };
    if !matches!(vm.heap.get(proto), HeapData::Object(_)) {
        return Err(ExcType::wrong_type("an Object", vm.describe(this)));
    }
    let child = SepObject::with_prototypes([Value::Ref(proto)]);
    let id = vm.alloc(HeapData::Object(child))?;
    Ok(Value::Ref(id))
}

pub(super) fn to_string<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    _scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    vm.make_string(format!("<{}>", vm.describe(this)))
}
