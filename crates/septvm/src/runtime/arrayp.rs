//! The Array prototype.

use super::{BuiltinKind, support};
use crate::{
    bytecode::vm::Vm,
    exceptions::{ExcType, SepError, SepResult},
    heap::{HeapData, HeapId},
    intern::Interns,
    object::SepObject,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

pub(super) fn install(proto: &mut SepObject, interns: &mut Interns) {
    support::method(proto, interns, "push", "Array.push", BuiltinKind::ArrayPush, &["item"]);
    support::method(proto, interns, "pop", "Array.pop", BuiltinKind::ArrayPop, &[]);
    support::method(proto, interns, "length", "Array.length", BuiltinKind::ArrayLength, &[]);
    support::method(proto, interns, "at", "Array.at", BuiltinKind::ArrayAt, &["index"]);
    support::method(
        proto,
        interns,
        "setAt",
        "Array.setAt",
        BuiltinKind::ArraySetAt,
        &["index", "item"],
    );
}

fn index_in<T: ResourceTracker, Tr: VmTracer>(vm: &Vm<'_, T, Tr>, array: HeapId, index: i64) -> SepResult<usize> {
    let len = match vm.heap.get(array) {
        HeapData::Array(a) => a.len(),
        _ => unreachable!("receiver checked by array_this"),
    };
    usize::try_from(index).ok().filter(|&i| i < len).ok_or_else(|| {
        SepError::exc(
            ExcType::EWrongArguments,
            format!("Array index {index} is out of bounds (length {len})."),
        )
    })
}

pub(super) fn push<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let array = support::array_this(vm, this)?;
    let item = support::arg(vm, scope, "item")?;
    match vm.heap.get_mut(array) {
        HeapData::Array(a) => a.push(item),
        _ => unreachable!("receiver checked by array_this"),
    }
    Ok(this)
}

/// Popping an empty array yields `Nothing`.
pub(super) fn pop<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    _scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let array = support::array_this(vm, this)?;
    match vm.heap.get_mut(array) {
        HeapData::Array(a) => Ok(a.pop().unwrap_or(Value::Nothing)),
        _ => unreachable!("receiver checked by array_this"),
    }
}

pub(super) fn length<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    _scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let array = support::array_this(vm, this)?;
    let len = match vm.heap.get(array) {
        HeapData::Array(a) => a.len(),
        _ => unreachable!("receiver checked by array_this"),
    };
    Value::int(i64::try_from(len).unwrap_or(i64::MAX))
}

pub(super) fn at<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let array = support::array_this(vm, this)?;
    let index = support::int_arg(vm, scope, "index")?;
    let index = index_in(vm, array, index)?;
    match vm.heap.get(array) {
        HeapData::Array(a) => Ok(a.get(index).expect("index validated against length")),
        _ => unreachable!("receiver checked by array_this"),
    }
}

pub(super) fn set_at<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let array = support::array_this(vm, this)?;
    let index = support::int_arg(vm, scope, "index")?;
    let item = support::arg(vm, scope, "item")?;
    let index = index_in(vm, array, index)?;
    match vm.heap.get_mut(array) {
        HeapData::Array(a) => {
            a.set(index, item);
        }
        _ => unreachable!("receiver checked by array_this"),
    }
    Ok(item)
}
