//! The Integer prototype.
//!
//! Arithmetic stays inside the September 61-bit range; overflow, division by
//! zero, and out-of-range results raise `ENumeric`.

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

pub(super) fn install(proto: &mut SepObject, interns: &mut Interns) {
    support::method(proto, interns, "+", "Integer.+", BuiltinKind::IntegerAdd, &["other"]);
    support::method(proto, interns, "-", "Integer.-", BuiltinKind::IntegerSub, &["other"]);
    support::method(proto, interns, "*", "Integer.*", BuiltinKind::IntegerMul, &["other"]);
    support::method(proto, interns, "/", "Integer./", BuiltinKind::IntegerDiv, &["other"]);
    support::method(proto, interns, "%", "Integer.%", BuiltinKind::IntegerMod, &["other"]);
    support::method(proto, interns, "negate", "Integer.negate", BuiltinKind::IntegerNegate, &[]);
    support::method(proto, interns, "<", "Integer.<", BuiltinKind::IntegerLt, &["other"]);
    support::method(proto, interns, "<=", "Integer.<=", BuiltinKind::IntegerLe, &["other"]);
    support::method(proto, interns, ">", "Integer.>", BuiltinKind::IntegerGt, &["other"]);
    support::method(proto, interns, ">=", "Integer.>=", BuiltinKind::IntegerGe, &["other"]);
    support::method(proto, interns, "==", "Integer.==", BuiltinKind::IntegerEq, &["other"]);
    support::method(proto, interns, "!=", "Integer.!=", BuiltinKind::IntegerNe, &["other"]);
    support::method(
        proto,
        interns,
        "toString",
        "Integer.toString",
        BuiltinKind::IntegerToString,
        &[],
    );
}

fn binary_operands<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<(i64, i64)> {
    let a = support::int_this(vm, this)?;
    let b = support::int_arg(vm, scope, "other")?;
    Ok((a, b))
}

pub(super) fn add<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let (a, b) = binary_operands(vm, scope, this)?;
    let sum = a.checked_add(b).ok_or_else(|| ExcType::numeric("Integer overflow in '+'."))?;
    Value::int(sum)
}

pub(super) fn sub<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let (a, b) = binary_operands(vm, scope, this)?;
    let diff = a.checked_sub(b).ok_or_else(|| ExcType::numeric("Integer overflow in '-'."))?;
    Value::int(diff)
}

pub(super) fn mul<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let (a, b) = binary_operands(vm, scope, this)?;
    let product = a.checked_mul(b).ok_or_else(|| ExcType::numeric("Integer overflow in '*'."))?;
    Value::int(product)
}

pub(super) fn div<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let (a, b) = binary_operands(vm, scope, this)?;
    if b == 0 {
        return Err(ExcType::numeric("Division by zero."));
    }
    let quotient = a.checked_div(b).ok_or_else(|| ExcType::numeric("Integer overflow in '/'."))?;
    Value::int(quotient)
}

pub(super) fn rem<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let (a, b) = binary_operands(vm, scope, this)?;
    if b == 0 {
        return Err(ExcType::numeric("Division by zero."));
    }
    let remainder = a.checked_rem(b).ok_or_else(|| ExcType::numeric("Integer overflow in '%'."))?;
    Value::int(remainder)
}

pub(super) fn negate<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    _scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let a = support::int_this(vm, this)?;
    Value::int(-a)
}

pub(super) fn lt<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let (a, b) = binary_operands(vm, scope, this)?;
    Ok(Value::Bool(a < b))
}

pub(super) fn le<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let (a, b) = binary_operands(vm, scope, this)?;
    Ok(Value::Bool(a <= b))
}

pub(super) fn gt<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let (a, b) = binary_operands(vm, scope, this)?;
    Ok(Value::Bool(a > b))
}

pub(super) fn ge<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let (a, b) = binary_operands(vm, scope, this)?;
    Ok(Value::Bool(a >= b))
}

/// `==` is tolerant: a non-integer operand compares unequal instead of
/// raising, matching the dynamic feel of the comparison operators on the
/// other prototypes.
pub(super) fn eq<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let a = support::int_this(vm, this)?;
    let other = support::arg(vm, scope, "other")?;
    Ok(Value::Bool(matches!(other, Value::Int(b) if a == b)))
}

pub(super) fn ne<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    match eq(vm, scope, this)? {
        Value::Bool(equal) => Ok(Value::Bool(!equal)),
        _ => unreachable!("eq returns Bool"),
    }
}

pub(super) fn to_string<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    _scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    let a = support::int_this(vm, this)?;
    vm.make_string(a.to_string())
}
