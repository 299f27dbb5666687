//! Call-site argument records.

use smallvec::SmallVec;

use crate::{intern::StringId, value::Value};

/// One argument as resolved at the call site.
///
/// `Call` instructions carry a record per argument: positional or named, and
/// eager or lazy. A lazy record's value is already a zero-arg thunk - the
/// compiler emits `Lazy` instead of evaluating the expression - so binding
/// never needs to build thunks itself.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ArgRecord {
    pub value: Value,
    /// Present for named arguments.
    pub name: Option<StringId>,
    pub lazy: bool,
}

impl ArgRecord {
    pub fn positional(value: Value) -> Self {
        Self {
            value,
            name: None,
            lazy: false,
        }
    }

    pub fn named(name: StringId, value: Value) -> Self {
        Self {
            value,
            name: Some(name),
            lazy: false,
        }
    }
}

/// Argument list for one call. Most September calls pass at most a couple of
/// arguments, so the inline capacity avoids a heap allocation for them.
pub(crate) type ArgList = SmallVec<[ArgRecord; 4]>;
