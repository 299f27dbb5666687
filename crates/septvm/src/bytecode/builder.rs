//! Builders for emitting bytecode in memory.
//!
//! The compiler that produces module files is a separate project; inside this
//! crate, bytecode is synthesized by tests and by native modules. `CodeBuilder`
//! handles encoding opcodes and operands into raw bytes and patching forward
//! jumps; `ModuleBuilder` assembles blocks and a deduplicated constant pool
//! into a [`ModuleImage`] ready for installation.

use super::op::{ARG_LAZY, ARG_NAMED, Opcode};
use crate::module::{BlockImage, ConstantValue, ModuleImage, ParamImage};

/// One argument record for [`CodeBuilder::call`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CallArg {
    /// Constant index of the parameter name, for named arguments.
    pub name: Option<u16>,
    /// The value on the stack is a pre-built thunk.
    pub lazy: bool,
}

impl CallArg {
    /// An eager positional argument.
    #[must_use]
    pub fn positional() -> Self {
        Self::default()
    }

    /// A lazy positional argument (the pushed value is a thunk).
    #[must_use]
    pub fn lazy() -> Self {
        Self {
            name: None,
            lazy: true,
        }
    }

    /// An eager named argument.
    #[must_use]
    pub fn named(name: u16) -> Self {
        Self {
            name: Some(name),
            lazy: false,
        }
    }
}

/// Patch handle for a forward jump; see [`CodeBuilder::branch`].
#[derive(Debug)]
#[must_use = "an unpatched jump leaves a zero offset in the bytecode"]
pub struct JumpPatch {
    /// Offset of the operand bytes to patch.
    operand_at: usize,
    /// Offset the relative jump is computed from (end of the instruction).
    from: usize,
    /// True when the operand is an absolute target (`PushHandler`).
    absolute: bool,
}

/// Builder for one code block.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    code: Vec<u8>,
    params: Vec<ParamImage>,
}

impl CodeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a parameter. Call before emitting code; order is declaration
    /// order.
    pub fn param(&mut self, param: ParamImage) -> &mut Self {
        self.params.push(param);
        self
    }

    /// Current bytecode offset; use as a backward jump target.
    #[must_use]
    pub fn here(&self) -> usize {
        self.code.len()
    }

    /// Emits an operand-less instruction.
    pub fn emit(&mut self, op: Opcode) -> &mut Self {
        self.code.push(op as u8);
        self
    }

    /// Emits an instruction with one u16 operand.
    pub fn emit_u16(&mut self, op: Opcode, operand: u16) -> &mut Self {
        self.code.push(op as u8);
        self.code.extend_from_slice(&operand.to_le_bytes());
        self
    }

    /// Emits `CreateSlot` with its flags byte.
    pub fn create_slot(&mut self, name: u16, flags: u8) -> &mut Self {
        self.code.push(Opcode::CreateSlot as u8);
        self.code.extend_from_slice(&name.to_le_bytes());
        self.code.push(flags);
        self
    }

    /// Emits a `Call` with its argument records.
    pub fn call(&mut self, args: &[CallArg]) -> &mut Self {
        self.code.push(Opcode::Call as u8);
        self.code
            .push(u8::try_from(args.len()).expect("more than 255 arguments"));
        for arg in args {
            let mut flags = 0u8;
            if arg.lazy {
                flags |= ARG_LAZY;
            }
            if arg.name.is_some() {
                flags |= ARG_NAMED;
            }
            self.code.push(flags);
            if let Some(name) = arg.name {
                self.code.extend_from_slice(&name.to_le_bytes());
            }
        }
        self
    }

    /// Emits a branch with a forward target to be patched later.
    pub fn branch(&mut self, op: Opcode) -> JumpPatch {
        debug_assert!(matches!(
            op,
            Opcode::Branch | Opcode::BranchIf | Opcode::BranchIfNot
        ));
        self.code.push(op as u8);
        let operand_at = self.code.len();
        self.code.extend_from_slice(&0i16.to_le_bytes());
        JumpPatch {
            operand_at,
            from: self.code.len(),
            absolute: false,
        }
    }

    /// Emits a branch to an already-emitted offset (backward jump).
    pub fn branch_to(&mut self, op: Opcode, target: usize) -> &mut Self {
        self.code.push(op as u8);
        let from = self.code.len() + 2;
        let offset = i16::try_from(target as i64 - from as i64).expect("jump distance exceeds i16");
        self.code.extend_from_slice(&offset.to_le_bytes());
        self
    }

    /// Emits `PushHandler` with a forward target to be patched later.
    pub fn push_handler(&mut self) -> JumpPatch {
        self.code.push(Opcode::PushHandler as u8);
        let operand_at = self.code.len();
        self.code.extend_from_slice(&0u16.to_le_bytes());
        JumpPatch {
            operand_at,
            from: self.code.len(),
            absolute: true,
        }
    }

    /// Points a forward jump at the current offset.
    pub fn patch(&mut self, patch: JumpPatch) {
        let target = self.code.len();
        let bytes = if patch.absolute {
            u16::try_from(target).expect("handler target exceeds u16").to_le_bytes()
        } else {
            i16::try_from(target as i64 - patch.from as i64)
                .expect("jump distance exceeds i16")
                .to_le_bytes()
        };
        self.code[patch.operand_at..patch.operand_at + 2].copy_from_slice(&bytes);
    }

    pub(crate) fn finish(self) -> BlockImage {
        BlockImage {
            params: self.params,
            code: self.code,
        }
    }
}

/// Assembles code blocks and constants into a [`ModuleImage`].
#[derive(Debug)]
pub struct ModuleBuilder {
    name: String,
    constants: Vec<ConstantValue>,
    blocks: Vec<BlockImage>,
}

impl ModuleBuilder {
    /// Starts a module. Block 0 (the module body) must be added first.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constants: Vec::new(),
            blocks: Vec::new(),
        }
    }

    /// Adds an integer constant, reusing an existing equal entry.
    pub fn constant_int(&mut self, value: i64) -> u16 {
        self.add_constant(ConstantValue::Int(value))
    }

    /// Adds a string constant, reusing an existing equal entry.
    pub fn constant_str(&mut self, value: &str) -> u16 {
        self.add_constant(ConstantValue::Str(value.to_owned()))
    }

    fn add_constant(&mut self, value: ConstantValue) -> u16 {
        if let Some(index) = self.constants.iter().position(|c| *c == value) {
            return u16::try_from(index).expect("constant pool overflow");
        }
        self.constants.push(value);
        u16::try_from(self.constants.len() - 1).expect("constant pool overflow")
    }

    /// Adds a finished block and returns its index.
    pub fn block(&mut self, builder: CodeBuilder) -> u16 {
        self.blocks.push(builder.finish());
        u16::try_from(self.blocks.len() - 1).expect("function table overflow")
    }

    /// Finishes the image.
    ///
    /// # Panics
    /// Panics when no block was added; every module has a body.
    #[must_use]
    pub fn build(self) -> ModuleImage {
        assert!(!self.blocks.is_empty(), "a module needs a body block");
        ModuleImage {
            name: self.name,
            constants: self.constants,
            blocks: self.blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_deduplicated() {
        let mut module = ModuleBuilder::new("test");
        let a = module.constant_int(42);
        let b = module.constant_int(42);
        let c = module.constant_str("x");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn forward_jumps_are_patched_relative_to_the_instruction_end() {
        let mut code = CodeBuilder::new();
        let jump = code.branch(Opcode::Branch);
        code.emit(Opcode::Nop);
        code.patch(jump);
        // Branch is 3 bytes; the jump lands one Nop past its end.
        let block = code.finish();
        assert_eq!(block.code[1..3], 1i16.to_le_bytes());
    }

    #[test]
    fn call_records_encode_flags_and_names() {
        let mut code = CodeBuilder::new();
        code.call(&[CallArg::positional(), CallArg::lazy(), CallArg::named(7)]);
        let block = code.finish();
        assert_eq!(
            block.code,
            vec![
                Opcode::Call as u8,
                3,
                0,
                ARG_LAZY,
                ARG_NAMED,
                7,
                0,
            ]
        );
    }
}
