//! The embedder-facing machine: one heap, one string pool, one module
//! registry, and the bootstrapped runtime, behind a handful of entry points.
//!
//! All global VM state lives here and is passed explicitly into the
//! interpreter for the duration of one execution; nothing in the crate is a
//! process-wide mutable.

use std::path::Path;

use crate::{
    args::{ArgList, ArgRecord},
    bytecode::{Vm, verify_block},
    exceptions::{ExcType, Exception, SepError, SepResult},
    frame::Frame,
    heap::{Heap, HeapData, HeapId, HeapStats},
    intern::Interns,
    loader,
    module::{CodeBlock, CodeRef, Module, ModuleId, ModuleImage, ModuleRegistry, ParameterDescriptor},
    object::{SepObject, Slot},
    resource::{NoLimitTracker, ResourceTracker},
    runtime::{self, CorePrototypes},
    tracer::{NoopTracer, VmTracer},
    value::{SEP_INT_MAX, SEP_INT_MIN, Value},
};

/// A native extension module.
///
/// The platform side of native modules (locating and opening dynamic
/// libraries, resolving the entry-point symbol) belongs to the embedding
/// application; the VM consumes anything that can populate a module scope
/// through this trait.
pub trait NativeModule<T: ResourceTracker> {
    /// The name the module's scope is registered under in the globals.
    fn name(&self) -> &str;

    /// Populates `module_scope` with the module's exported slots.
    fn initialize(&self, machine: &mut Machine<T>, module_scope: HeapId) -> Result<(), Exception>;
}

/// A September virtual machine instance.
pub struct Machine<T: ResourceTracker = NoLimitTracker> {
    heap: Heap<T>,
    interns: Interns,
    modules: ModuleRegistry,
    protos: CorePrototypes,
    globals: HeapId,
}

impl Machine<NoLimitTracker> {
    /// A machine without resource limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_tracker(NoLimitTracker).expect("bootstrap cannot exhaust an unlimited heap")
    }
}

impl Default for Machine<NoLimitTracker> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ResourceTracker> Machine<T> {
    /// Builds a machine over the given resource tracker and bootstraps the
    /// runtime prototypes. Fails only when the tracker's limits are too small
    /// to hold the core prototypes.
    pub fn with_tracker(tracker: T) -> Result<Self, Exception> {
        let mut heap = Heap::new(tracker);
        let mut interns = Interns::new();
        let (protos, globals) = runtime::bootstrap(&mut heap, &mut interns).map_err(unwrap_run_error)?;
        Ok(Self {
            heap,
            interns,
            modules: ModuleRegistry::default(),
            protos,
            globals,
        })
    }

    // ------------------------------------------------------------------
    // Module loading
    // ------------------------------------------------------------------

    /// Installs a decoded module image: verifies every block, resolves names
    /// through the string pool, and allocates the module-level scope.
    pub fn install_module(&mut self, image: ModuleImage) -> Result<ModuleId, Exception> {
        self.install_module_inner(image).map_err(unwrap_run_error)
    }

    /// Decodes and installs a module file's bytes.
    pub fn load_module(&mut self, bytes: &[u8], name: &str) -> Result<ModuleId, Exception> {
        let image = loader::decode_module(bytes, name).map_err(unwrap_run_error)?;
        self.install_module(image)
    }

    /// Reads, decodes, and installs a module file.
    pub fn load_module_file(&mut self, path: &Path) -> Result<ModuleId, Exception> {
        let name = path
            .file_stem()
            .map_or_else(|| "module".to_owned(), |stem| stem.to_string_lossy().into_owned());
        let bytes = loader::load_file(path).map_err(unwrap_run_error)?;
        self.load_module(&bytes, &name)
    }

    fn install_module_inner(&mut self, image: ModuleImage) -> SepResult<ModuleId> {
        if image.blocks.is_empty() {
            return Err(ExcType::malformed_module("module has no body block"));
        }

        let mut constants = Vec::with_capacity(image.constants.len());
        for constant in &image.constants {
            constants.push(match constant {
                crate::module::ConstantValue::Int(n) => {
                    if !(SEP_INT_MIN..=SEP_INT_MAX).contains(n) {
                        return Err(ExcType::malformed_module("integer constant out of range"));
                    }
                    Value::Int(*n)
                }
                crate::module::ConstantValue::Str(s) => Value::InternString(self.interns.intern(s)),
            });
        }

        let block_count = image.blocks.len();
        let mut blocks = Vec::with_capacity(block_count);
        for block in &image.blocks {
            let max_stack = verify_block(block, &image.constants, block_count)?;
            let params = block
                .params
                .iter()
                .map(|param| {
                    let name = match constants[usize::from(param.name)] {
                        Value::InternString(id) => id,
                        _ => unreachable!("verifier checked name constants"),
                    };
                    ParameterDescriptor {
                        name,
                        flags: param.flags,
                        default_block: param.default_block,
                    }
                })
                .collect();
            blocks.push(CodeBlock {
                code: block.code.clone(),
                params,
                max_stack,
            });
        }

        let scope_obj = SepObject::with_prototypes([Value::Ref(self.globals)]);
        let scope = self
            .heap
            .allocate(HeapData::Object(scope_obj))
            .map_err(|_| ExcType::out_of_memory())?;

        Ok(self.modules.add(Module {
            name: image.name,
            constants,
            blocks,
            scope,
        }))
    }

    /// Creates a scope for a native module, registers it in the globals under
    /// the module's name, and lets the module populate it.
    pub fn install_native_module(&mut self, module: &dyn NativeModule<T>) -> Result<(), Exception> {
        let scope_obj = SepObject::with_prototypes([Value::Ref(self.globals)]);
        let scope = self
            .heap
            .allocate(HeapData::Object(scope_obj))
            .map_err(|_| unwrap_run_error(ExcType::out_of_memory()))?;
        // Registering first keeps the scope rooted while the module runs
        // arbitrary initialization code.
        self.define_global(module.name(), Value::Ref(scope));
        module.initialize(self, scope)
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Executes a module's body and returns the value its `Return` produced.
    ///
    /// An exception that reaches the outermost frame comes back as `Err`;
    /// the caller decides how to report it (the CLI writes the message to
    /// stderr and exits non-zero).
    pub fn run_module(&mut self, id: ModuleId) -> Result<Value, Exception> {
        self.run_module_traced(id, &mut NoopTracer)
    }

    /// [`Machine::run_module`] with an explicit tracer.
    pub fn run_module_traced(&mut self, id: ModuleId, tracer: &mut impl VmTracer) -> Result<Value, Exception> {
        let scope = self.modules.get(id).scope;
        let code = CodeRef { module: id, block: 0 };
        let max_stack = self.modules.block(code).max_stack;
        let mut vm = Vm::new(
            &mut self.heap,
            &mut self.interns,
            &self.modules,
            &self.protos,
            self.globals,
            tracer,
        );
        let frame = Frame::new(scope, Value::Nothing, Some(code), max_stack, None);
        vm.push_frame(frame)
            .and_then(|_| vm.run_until(0))
            .map_err(unwrap_run_error)
    }

    /// Invokes a callable value with eager positional arguments.
    ///
    /// The synchronous embedder entry point: allocates a nested frame and
    /// runs the interpreter to completion for that call.
    pub fn invoke(&mut self, callable: Value, args: &[Value]) -> Result<Value, Exception> {
        let mut tracer = NoopTracer;
        let mut vm = Vm::new(
            &mut self.heap,
            &mut self.interns,
            &self.modules,
            &self.protos,
            self.globals,
            &mut tracer,
        );
        let records: ArgList = args.iter().map(|&value| ArgRecord::positional(value)).collect();
        vm.invoke(callable, records).map_err(unwrap_run_error)
    }

    // ------------------------------------------------------------------
    // Heap and globals access
    // ------------------------------------------------------------------

    /// Forces a full collection cycle and returns the number of objects
    /// freed. No frames are live between runs, so the roots are the module
    /// scopes, the globals registry, and the core prototypes.
    pub fn collect_garbage(&mut self) -> usize {
        let mut roots: Vec<HeapId> = self.modules.scopes().collect();
        roots.push(self.globals);
        self.protos.collect_roots(&mut roots);
        self.heap.collect_garbage(&roots)
    }

    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Reads a binding from the globals registry.
    #[must_use]
    pub fn global(&self, name: &str) -> Option<Value> {
        let id = self.interns.lookup(name)?;
        match self.heap.get(self.globals) {
            HeapData::Object(obj) => match obj.get_slot(id) {
                Some(Slot::Field(value)) => Some(*value),
                _ => None,
            },
            _ => None,
        }
    }

    /// Creates or replaces a binding in the globals registry.
    pub fn define_global(&mut self, name: &str, value: Value) {
        let id = self.interns.intern(name);
        if let HeapData::Object(obj) = self.heap.get_mut(self.globals) {
            obj.set_slot(id, Slot::Field(value));
        }
    }

    /// Creates a field slot on an object (native-module exports).
    pub fn define(&mut self, object: HeapId, name: &str, value: Value) -> Result<(), Exception> {
        let id = self.interns.intern(name);
        match self.heap.get_mut(object) {
            HeapData::Object(obj) => {
                obj.set_slot(id, Slot::Field(value));
                Ok(())
            }
            other => Err(Exception::new(
                ExcType::EWrongType,
                format!("Expected an Object, but got {}.", other.kind_name()),
            )),
        }
    }

    /// Allocates a fresh object with the given prototype list.
    pub fn make_object(&mut self, prototypes: &[Value]) -> Result<Value, Exception> {
        for proto in prototypes {
            let is_object = matches!(proto, Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Object(_)));
            if !is_object {
                return Err(Exception::new(
                    ExcType::EWrongType,
                    format!("Expected an Object prototype, but got {}.", self.heap.describe(*proto)),
                ));
            }
        }
        self.heap
            .allocate(HeapData::Object(SepObject::with_prototypes(prototypes.iter().copied())))
            .map(Value::Ref)
            .map_err(|_| unwrap_run_error(ExcType::out_of_memory()))
    }

    /// Allocates an array value.
    pub fn make_array(&mut self, items: Vec<Value>) -> Result<Value, Exception> {
        self.heap
            .allocate(HeapData::Array(crate::types::SepArray::from_values(items)))
            .map(Value::Ref)
            .map_err(|_| unwrap_run_error(ExcType::out_of_memory()))
    }

    /// Creates a method slot on an object; property reads bind the receiver.
    pub fn define_method(&mut self, object: HeapId, name: &str, function: Value) -> Result<(), Exception> {
        let is_function = matches!(function, Value::Ref(id) if matches!(self.heap.get(id), HeapData::Function(_)));
        if !is_function {
            return Err(Exception::new(
                ExcType::EWrongType,
                format!("Expected a Function, but got {}.", self.heap.describe(function)),
            ));
        }
        let id = self.interns.intern(name);
        match self.heap.get_mut(object) {
            HeapData::Object(obj) => {
                obj.set_slot(id, Slot::Method(function));
                Ok(())
            }
            other => Err(Exception::new(
                ExcType::EWrongType,
                format!("Expected an Object, but got {}.", other.kind_name()),
            )),
        }
    }

    /// Creates a property slot: reads call `getter` with the receiver bound,
    /// writes call `setter` or raise `EWrongType` when there is none.
    pub fn define_property(
        &mut self,
        object: HeapId,
        name: &str,
        getter: Value,
        setter: Option<Value>,
    ) -> Result<(), Exception> {
        let id = self.interns.intern(name);
        match self.heap.get_mut(object) {
            HeapData::Object(obj) => {
                obj.set_slot(id, Slot::Property { getter, setter });
                Ok(())
            }
            other => Err(Exception::new(
                ExcType::EWrongType,
                format!("Expected an Object, but got {}.", other.kind_name()),
            )),
        }
    }

    /// Allocates a runtime string value.
    pub fn make_string(&mut self, text: &str) -> Result<Value, Exception> {
        self.heap
            .allocate(HeapData::Str(crate::types::SepStr::new(text)))
            .map(Value::Ref)
            .map_err(|_| unwrap_run_error(ExcType::out_of_memory()))
    }

    /// Human-readable rendering of a value, for diagnostics and embedders.
    #[must_use]
    pub fn display(&self, value: Value) -> String {
        match value {
            Value::Int(n) => n.to_string(),
            Value::Bool(true) => "True".to_owned(),
            Value::Bool(false) => "False".to_owned(),
            Value::Nothing => "Nothing".to_owned(),
            Value::InternString(id) => self.interns.get(id).to_owned(),
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(s) => s.as_str().to_owned(),
                other => format!("<{}>", other.kind_name()),
            },
        }
    }
}

/// Converts the crate-internal error channel into the public exception type.
///
/// Fatal faults are VM-integrity violations; they terminate with a
/// diagnostic rather than becoming catchable values.
fn unwrap_run_error(err: SepError) -> Exception {
    match err {
        SepError::Fatal(msg) => panic!("VM integrity violation: {msg}"),
        SepError::Exc(pending) => Exception::new(pending.exc_type, pending.message),
    }
}
