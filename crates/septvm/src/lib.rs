#![doc = include_str!("../../../README.md")]

// first so the heap's types are available everywhere
mod heap;

mod args;
mod bytecode;
mod exceptions;
mod frame;
mod function;
mod intern;
mod loader;
mod machine;
mod module;
mod object;
mod resource;
mod runtime;
mod signature;
mod tracer;
mod types;
mod value;

pub use crate::{
    bytecode::{CallArg, CodeBuilder, JumpPatch, ModuleBuilder, Opcode},
    exceptions::{ExcType, Exception},
    heap::{HeapId, HeapStats},
    intern::StringId,
    loader::{MODULE_MAGIC, MODULE_VERSION},
    machine::{Machine, NativeModule},
    module::{BlockImage, ConstantValue, ModuleId, ModuleImage, ParamFlags, ParamImage, ParameterDescriptor},
    resource::{
        DEFAULT_GC_TRIGGER_BYTES, LimitedTracker, MemoryLimits, NoLimitTracker, ResourceError, ResourceTracker,
    },
    tracer::{NoopTracer, ProfilingTracer, StderrTracer, VmTracer},
    value::{SEP_INT_MAX, SEP_INT_MIN, Value},
};
