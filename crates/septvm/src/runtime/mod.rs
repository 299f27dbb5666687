//! The runtime prototype library and bootstrap.
//!
//! Installs the core prototypes September code delegates to — `Object`,
//! `Integer`, `String`, `Array`, `Bool`, `Nothing`, `Function` — plus the
//! exception taxonomy and the globals registry that roots them all. Builtins
//! are dispatched by [`BuiltinKind`] through one match, so native code runs
//! fully monomorphized against the interpreter's type parameters.

pub(crate) mod support;

mod arrayp;
mod integerp;
mod objectp;
mod specialp;
mod stringp;

use ahash::AHashMap;

use crate::{
    args::ArgList,
    bytecode::vm::Vm,
    exceptions::{ExcType, SepResult},
    function::Callable,
    heap::{Heap, HeapData, HeapId},
    intern::{Interns, StaticStrings},
    object::{SepObject, Slot},
    resource::ResourceTracker,
    tracer::VmTracer,
    types::SepStr,
    value::Value,
};

/// Dispatch tags for every native function in the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum BuiltinKind {
    // Object prototype
    ObjectIs,
    ObjectSet,
    ObjectSetMethod,
    ObjectSpawn,
    ObjectToString,
    // Integer prototype
    IntegerAdd,
    IntegerSub,
    IntegerMul,
    IntegerDiv,
    IntegerMod,
    IntegerNegate,
    IntegerLt,
    IntegerLe,
    IntegerGt,
    IntegerGe,
    IntegerEq,
    IntegerNe,
    IntegerToString,
    // String prototype
    StringConcat,
    StringLength,
    StringEq,
    StringToString,
    // Array prototype
    ArrayPush,
    ArrayPop,
    ArrayLength,
    ArrayAt,
    ArraySetAt,
    // Bool / Nothing prototypes
    BoolNot,
    BoolToString,
    NothingToString,
    FunctionToString,
    // Globals
    Force,
}

/// Runs one builtin. Called by the VM with the bound receiver and the scope
/// the arguments were bound into.
pub(crate) fn dispatch_builtin<T: ResourceTracker, Tr: VmTracer>(
    vm: &mut Vm<'_, T, Tr>,
    kind: BuiltinKind,
    scope: HeapId,
    this: Value,
) -> SepResult<Value> {
    match kind {
        BuiltinKind::ObjectIs => objectp::is(vm, scope, this),
        BuiltinKind::ObjectSet => objectp::set(vm, scope, this),
        BuiltinKind::ObjectSetMethod => objectp::set_method(vm, scope, this),
        BuiltinKind::ObjectSpawn => objectp::spawn(vm, scope, this),
        BuiltinKind::ObjectToString => objectp::to_string(vm, scope, this),
        BuiltinKind::IntegerAdd => integerp::add(vm, scope, this),
        BuiltinKind::IntegerSub => integerp::sub(vm, scope, this),
        BuiltinKind::IntegerMul => integerp::mul(vm, scope, this),
        BuiltinKind::IntegerDiv => integerp::div(vm, scope, this),
        BuiltinKind::IntegerMod => integerp::rem(vm, scope, this),
        BuiltinKind::IntegerNegate => integerp::negate(vm, scope, this),
        BuiltinKind::IntegerLt => integerp::lt(vm, scope, this),
        BuiltinKind::IntegerLe => integerp::le(vm, scope, this),
        BuiltinKind::IntegerGt => integerp::gt(vm, scope, this),
        BuiltinKind::IntegerGe => integerp::ge(vm, scope, this),
        BuiltinKind::IntegerEq => integerp::eq(vm, scope, this),
        BuiltinKind::IntegerNe => integerp::ne(vm, scope, this),
        BuiltinKind::IntegerToString => integerp::to_string(vm, scope, this),
        BuiltinKind::StringConcat => stringp::concat(vm, scope, this),
        BuiltinKind::StringLength => stringp::length(vm, scope, this),
        BuiltinKind::StringEq => stringp::eq(vm, scope, this),
        BuiltinKind::StringToString => stringp::to_string(vm, scope, this),
        BuiltinKind::ArrayPush => arrayp::push(vm, scope, this),
        BuiltinKind::ArrayPop => arrayp::pop(vm, scope, this),
        BuiltinKind::ArrayLength => arrayp::length(vm, scope, this),
        BuiltinKind::ArrayAt => arrayp::at(vm, scope, this),
        BuiltinKind::ArraySetAt => arrayp::set_at(vm, scope, this),
        BuiltinKind::BoolNot => specialp::not(vm, scope, this),
        BuiltinKind::BoolToString => specialp::bool_to_string(vm, scope, this),
        BuiltinKind::NothingToString => specialp::nothing_to_string(vm, scope, this),
        BuiltinKind::FunctionToString => specialp::function_to_string(vm, scope, this),
        BuiltinKind::Force => force(vm, scope, this),
    }
}

/// Drives evaluation of a lazy parameter.
///
/// `force(thunk)` invokes a zero-parameter function and returns its result;
/// any other value passes through unchanged. Forcing the same thunk twice
/// evaluates it twice — there is no memoization.
fn force<T: ResourceTracker, Tr: VmTracer>(vm: &mut Vm<'_, T, Tr>, scope: HeapId, _this: Value) -> SepResult<Value> {
    let value = support::arg(vm, scope, "thunk")?;
    let is_nullary_function = match value {
        Value::Ref(id) => match vm.heap.get(id) {
            HeapData::Function(f) => match &f.callable {
                Callable::Block(code) => vm.modules.block(*code).params.is_empty(),
                Callable::Native(builtin) => builtin.params.is_empty(),
            },
            _ => false,
        },
        _ => false,
    };
    if is_nullary_function {
        vm.invoke(value, ArgList::new())
    } else {
        Ok(value)
    }
}

/// Heap ids of the core prototypes and singletons.
///
/// These are GC roots in their own right (they are also reachable through
/// the globals registry, but the collector does not rely on that).
#[derive(Debug)]
pub(crate) struct CorePrototypes {
    pub object: HeapId,
    pub integer: HeapId,
    pub string: HeapId,
    pub array: HeapId,
    pub boolean: HeapId,
    pub nothing: HeapId,
    pub function: HeapId,
    /// Root of the exception taxonomy.
    pub exception: HeapId,
    /// Prototype object per taxonomy member (includes the root).
    exc: AHashMap<ExcType, HeapId>,
    /// Pre-allocated `EOutOfMemory` exception raised when the raise path
    /// itself cannot allocate.
    pub oom_singleton: HeapId,
}

impl CorePrototypes {
    pub fn exc_proto(&self, exc_type: ExcType) -> HeapId {
        self.exc[&exc_type]
    }

    /// Reverse lookup for exception classification.
    pub fn exc_type_of(&self, proto: HeapId) -> Option<ExcType> {
        self.exc
            .iter()
            .find_map(|(&exc_type, &id)| (id == proto).then_some(exc_type))
    }

    pub fn collect_roots(&self, out: &mut Vec<HeapId>) {
        out.extend([
            self.object,
            self.integer,
            self.string,
            self.array,
            self.boolean,
            self.nothing,
            self.function,
            self.exception,
            self.oom_singleton,
        ]);
        out.extend(self.exc.values().copied());
    }
}

/// Builds the core prototypes, the exception taxonomy, and the globals
/// registry. Runs once per machine, before any module is loaded.
pub(crate) fn bootstrap<T: ResourceTracker>(
    heap: &mut Heap<T>,
    interns: &mut Interns,
) -> SepResult<(CorePrototypes, HeapId)> {
    let alloc_object = |heap: &mut Heap<T>, obj: SepObject| {
        heap.allocate(HeapData::Object(obj))
            .map_err(|_| ExcType::out_of_memory())
    };

    // Root Object prototype: the terminus of every prototype chain.
    let mut object_proto = SepObject::new();
    objectp::install(&mut object_proto, interns);
    let object = alloc_object(heap, object_proto)?;

    let mut core_proto = |heap: &mut Heap<T>, install: fn(&mut SepObject, &mut Interns)| {
        let mut proto = SepObject::with_prototypes([Value::Ref(object)]);
        install(&mut proto, interns);
        alloc_object(heap, proto)
    };
    let integer = core_proto(heap, integerp::install)?;
    let string = core_proto(heap, stringp::install)?;
    let array = core_proto(heap, arrayp::install)?;
    let boolean = core_proto(heap, specialp::install_bool)?;
    let nothing = core_proto(heap, specialp::install_nothing)?;
    let function = core_proto(heap, specialp::install_function)?;

    // Exception taxonomy: one prototype per member, everything below the
    // root delegating to it.
    let mut exc = AHashMap::new();
    let exception = {
        let mut proto = SepObject::with_prototypes([Value::Ref(object)]);
        proto.set_slot(
            StaticStrings::Name.into(),
            Slot::Field(Value::InternString(interns.intern("Exception"))),
        );
        alloc_object(heap, proto)?
    };
    exc.insert(ExcType::Exception, exception);
    for exc_type in ExcType::ALL {
        if exc_type == ExcType::Exception {
            continue;
        }
        let name: &'static str = exc_type.into();
        let mut proto = SepObject::with_prototypes([Value::Ref(exception)]);
        proto.set_slot(
            StaticStrings::Name.into(),
            Slot::Field(Value::InternString(interns.intern(name))),
        );
        exc.insert(exc_type, alloc_object(heap, proto)?);
    }

    // The EOutOfMemory singleton, ready before any allocation can fail.
    let oom_singleton = {
        let oom_proto = exc[&ExcType::EOutOfMemory];
        let message = heap
            .allocate(HeapData::Str(SepStr::new("Out of memory.")))
            .map_err(|_| ExcType::out_of_memory())?;
        let mut obj = SepObject::with_prototypes([Value::Ref(oom_proto)]);
        obj.set_slot(StaticStrings::Message.into(), Slot::Field(Value::Ref(message)));
        obj.set_slot(StaticStrings::Class.into(), Slot::Field(Value::Ref(oom_proto)));
        alloc_object(heap, obj)?
    };

    // The globals registry: the outermost prototype of every scope chain.
    // Prototypes are reachable by name; `True`, `False`, and `Nothing` are
    // the value singletons themselves (the Nothing prototype stays internal,
    // reachable only through its value).
    let mut globals_obj = SepObject::new();
    for (name, id) in [
        (StaticStrings::Object, object),
        (StaticStrings::Integer, integer),
        (StaticStrings::String, string),
        (StaticStrings::Array, array),
        (StaticStrings::Bool, boolean),
        (StaticStrings::Function, function),
    ] {
        globals_obj.set_slot(name.into(), Slot::Field(Value::Ref(id)));
    }
    globals_obj.set_slot(interns.intern("True"), Slot::Field(Value::Bool(true)));
    globals_obj.set_slot(interns.intern("False"), Slot::Field(Value::Bool(false)));
    globals_obj.set_slot(StaticStrings::Nothing.into(), Slot::Field(Value::Nothing));
    for (&exc_type, &id) in &exc {
        let name: &'static str = exc_type.into();
        globals_obj.set_slot(interns.intern(name), Slot::Field(Value::Ref(id)));
    }
    globals_obj.set_slot(
        StaticStrings::Force.into(),
        support::builtin_slot("force", BuiltinKind::Force, interns, &["thunk"]),
    );
    let globals = alloc_object(heap, globals_obj)?;

    let protos = CorePrototypes {
        object,
        integer,
        string,
        array,
        boolean,
        nothing,
        function,
        exception,
        exc,
        oom_singleton,
    };
    Ok((protos, globals))
}
