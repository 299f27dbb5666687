//! Bytecode representation, builders, verification, and the virtual machine.
//!
//! - `op` - opcode definitions and instruction-stream constants
//! - `builder` - in-memory bytecode assembly (tests, native modules)
//! - `verify` - installation-time validation and `max_stack` computation
//! - `vm` - the interpreter

pub use builder::{CallArg, CodeBuilder, JumpPatch, ModuleBuilder};
pub use op::Opcode;
pub(crate) use verify::verify_block;
pub(crate) use vm::Vm;

mod builder;
mod op;
mod verify;
pub(crate) mod vm;
