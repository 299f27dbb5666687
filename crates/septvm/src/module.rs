//! Modules, code blocks, and parameter metadata.
//!
//! A module is the unit of loading: a constant pool, a table of immutable
//! code blocks (block 0 is the module body), and a module-level scope object
//! that is the lexical root for all code in the module. Code blocks never
//! live on the heap — frames and functions refer to them through
//! [`CodeRef`] handles into the registry, which keeps bytecode immutable and
//! lets the collector treat module scopes as the only module-side roots.

use crate::{heap::HeapId, intern::StringId, value::Value};

/// Identifier of a loaded module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(u32);

impl ModuleId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle to one code block of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CodeRef {
    pub module: ModuleId,
    pub block: u16,
}

/// Parameter behavior bits as they appear in module files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParamFlags(u8);

impl ParamFlags {
    /// The argument arrives as a zero-arg thunk and is stored unevaluated.
    pub const LAZY: Self = Self(1);
    /// Absorbs remaining positional arguments into an Array.
    pub const REST: Self = Self(1 << 1);
    /// Never matched by a positional argument.
    pub const NAMED_ONLY: Self = Self(1 << 2);
    /// A default-value thunk block index follows in the wire format.
    pub const HAS_DEFAULT: Self = Self(1 << 3);

    const ALL_KNOWN: u8 = 0b1111;

    #[must_use]
    pub fn from_bits(bits: u8) -> Option<Self> {
        (bits & !Self::ALL_KNOWN == 0).then_some(Self(bits))
    }

    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Declaration-site description of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterDescriptor {
    pub name: StringId,
    pub flags: ParamFlags,
    /// Child block evaluated in the callee scope when no argument matches.
    pub default_block: Option<u16>,
}

impl ParameterDescriptor {
    #[must_use]
    pub fn new(name: StringId) -> Self {
        Self {
            name,
            flags: ParamFlags::default(),
            default_block: None,
        }
    }

    #[must_use]
    pub fn with_flags(name: StringId, flags: ParamFlags) -> Self {
        Self {
            name,
            flags,
            default_block: None,
        }
    }

    #[must_use]
    pub fn is_lazy(&self) -> bool {
        self.flags.contains(ParamFlags::LAZY)
    }

    #[must_use]
    pub fn is_rest(&self) -> bool {
        self.flags.contains(ParamFlags::REST)
    }

    #[must_use]
    pub fn is_named_only(&self) -> bool {
        self.flags.contains(ParamFlags::NAMED_ONLY)
    }
}

/// A constant pool entry before installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstantValue {
    Int(i64),
    Str(String),
}

/// One parameter as it appears in the wire format: the name is a constant
/// pool index, resolved to an interned id at installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamImage {
    pub name: u16,
    pub flags: ParamFlags,
    pub default_block: Option<u16>,
}

/// One code block before installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockImage {
    pub params: Vec<ParamImage>,
    pub code: Vec<u8>,
}

/// A decoded-but-not-yet-installed module.
///
/// Both the module-file loader and [`crate::bytecode::ModuleBuilder`] produce
/// this form; installation verifies the bytecode, resolves names through the
/// string pool, allocates the module scope, and registers the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleImage {
    pub name: String,
    pub constants: Vec<ConstantValue>,
    pub blocks: Vec<BlockImage>,
}

/// An immutable bundle of bytecode plus parameter metadata.
#[derive(Debug)]
pub(crate) struct CodeBlock {
    /// Encoded instructions.
    pub code: Vec<u8>,
    /// Parameters, in declaration order. Empty for the module body.
    pub params: Vec<ParameterDescriptor>,
    /// Declared operand stack ceiling, computed by the verifier.
    pub max_stack: u16,
}

/// A loaded module.
#[derive(Debug)]
pub(crate) struct Module {
    pub name: String,
    /// The constant pool: integers and interned strings.
    pub constants: Vec<Value>,
    /// Code blocks; index 0 is the module body.
    pub blocks: Vec<CodeBlock>,
    /// The module-level scope object; lexical root for all code in the
    /// module and a GC root.
    pub scope: HeapId,
}

/// All modules known to one machine.
#[derive(Debug, Default)]
pub(crate) struct ModuleRegistry {
    modules: Vec<Module>,
}

impl ModuleRegistry {
    pub fn add(&mut self, module: Module) -> ModuleId {
        let id = ModuleId(u32::try_from(self.modules.len()).expect("module registry overflow"));
        self.modules.push(module);
        id
    }

    pub fn get(&self, id: ModuleId) -> &Module {
        &self.modules[id.index()]
    }

    pub fn block(&self, code: CodeRef) -> &CodeBlock {
        &self.modules[code.module.index()].blocks[usize::from(code.block)]
    }

    pub fn constant(&self, module: ModuleId, index: u16) -> Value {
        self.modules[module.index()].constants[usize::from(index)]
    }

    /// Module-level scopes, for the GC root set.
    pub fn scopes(&self) -> impl Iterator<Item = HeapId> + '_ {
        self.modules.iter().map(|m| m.scope)
    }
}
