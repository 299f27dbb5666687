//! Argument binding.
//!
//! Matching happens in two pure passes over the call-site records (named
//! arguments first, then positionals in declaration order), producing a plan
//! that [`bind_arguments`] materializes into the callee scope: the `rest`
//! array is allocated, default thunks for still-missing parameters are
//! evaluated (or stored unevaluated for lazy parameters), and every binding
//! lands as a field slot.

use crate::{
    args::{ArgList, ArgRecord},
    bytecode::vm::Vm,
    exceptions::{ExcType, SepError, SepResult},
    function::SepFunction,
    heap::{HeapData, HeapId},
    intern::Interns,
    module::{CodeRef, ParameterDescriptor},
    object::Slot,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::SepArray,
    value::Value,
};

/// Result of the pure matching passes.
#[derive(Debug)]
struct MatchPlan {
    /// One entry per parameter, in declaration order.
    matched: Vec<Option<Value>>,
    /// Leftover positionals destined for the `rest` parameter.
    rest: Vec<Value>,
}

/// Matches call-site records against the descriptor list.
///
/// Rules, in order: explicit named arguments consume matching parameter
/// names; remaining positional arguments fill remaining parameters in
/// declaration order; `rest` captures leftover positionals; `named-only`
/// parameters never match positionally.
fn match_arguments(interns: &Interns, params: &[ParameterDescriptor], args: &[ArgRecord]) -> SepResult<MatchPlan> {
    let mut matched: Vec<Option<Value>> = vec![None; params.len()];
    let mut rest = Vec::new();

    for arg in args.iter().filter(|a| a.name.is_some()) {
        let name = arg.name.expect("filtered on name presence");
        let Some(index) = params.iter().position(|p| p.name == name && !p.is_rest()) else {
            return Err(ExcType::unknown_argument(interns.get(name)));
        };
        if matched[index].is_some() {
            return Err(ExcType::duplicate_argument(interns.get(name)));
        }
        matched[index] = Some(arg.value);
    }

    let has_rest = params.iter().any(ParameterDescriptor::is_rest);
    let mut cursor = 0usize;
    for arg in args.iter().filter(|a| a.name.is_none()) {
        while cursor < params.len()
            && (params[cursor].is_rest() || params[cursor].is_named_only() || matched[cursor].is_some())
        {
            cursor += 1;
        }
        if cursor < params.len() {
            matched[cursor] = Some(arg.value);
            cursor += 1;
        } else if has_rest {
            rest.push(arg.value);
        } else {
            let capacity = params.iter().filter(|p| !p.is_rest() && !p.is_named_only()).count();
            let provided = args.iter().filter(|a| a.name.is_none()).count();
            return Err(ExcType::too_many_arguments(capacity, provided));
        }
    }

    Ok(MatchPlan { matched, rest })
}

/// Binds arguments into the callee scope (call protocol step 3 and 4).
///
/// `default_ctx` names the module whose blocks default thunks refer to; it is
/// `None` for builtins, which declare no defaults. Each resolved binding is
/// stored into the scope immediately, so a default thunk that re-enters the
/// interpreter sees every earlier parameter and the collector sees every
/// value through the (caller-pinned) scope.
pub(crate) fn bind_arguments<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    scope: HeapId,
    params: &[ParameterDescriptor],
    args: &[ArgRecord],
    default_ctx: Option<CodeRef>,
) -> SepResult<()> {
    let MatchPlan { matched, mut rest } = match_arguments(vm.interns, params, args)?;

    for (index, param) in params.iter().enumerate() {
        let value = if param.is_rest() {
            let items = std::mem::take(&mut rest);
            let id = vm.alloc(HeapData::Array(SepArray::from_values(items)))?;
            Value::Ref(id)
        } else if let Some(value) = matched[index] {
            // A lazy parameter's argument is already a zero-arg thunk and is
            // stored as-is; reading it in the callee does not auto-evaluate.
            value
        } else if let Some(block) = param.default_block {
            let Some(ctx) = default_ctx else {
                return Err(SepError::fatal("builtin parameter declares a default thunk"));
            };
            let thunk = vm.make_function(SepFunction::from_block(
                CodeRef {
                    module: ctx.module,
                    block,
                },
                scope,
            ))?;
            if param.is_lazy() {
                thunk
            } else {
                vm.invoke(thunk, ArgList::new())?
            }
        } else {
            return Err(ExcType::missing_argument(vm.interns.get(param.name)));
        };

        match vm.heap.get_mut(scope) {
            HeapData::Object(obj) => obj.set_slot(param.name, Slot::Field(value)),
            _ => return Err(SepError::fatal("callee scope is not an object")),
        }
    }
    Ok(())
}
