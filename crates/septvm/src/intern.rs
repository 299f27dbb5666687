//! String interning for property names and string literals.
//!
//! The pool stores unique strings in a vector and hands out `StringId` indices
//! for storage and comparison. Every string used as a property key passes
//! through here, which makes key equality a plain integer compare — the Rust
//! realization of September's "pointer-equal iff byte-equal" pool invariant.
//!
//! StringIds are laid out as follows:
//! * 0 to 128 - single character strings for all 128 ASCII characters
//! * 1000 to 1000+count(StaticStrings) - well-known names in `StaticStrings`
//! * 10_000+ - strings interned per machine

use std::{str::FromStr, sync::LazyLock};

use ahash::AHashMap;
use strum::{EnumString, FromRepr, IntoStaticStr};

/// Index into the string pool's storage.
///
/// Uses `u32` to save space (4 bytes vs 8 bytes for `usize`). This limits us to
/// ~4 billion unique interns, which is more than sufficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StringId(u32);

impl StringId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the StringId for an ASCII byte.
    ///
    /// Single-character names (the arithmetic operators among them) never
    /// need a pool entry.
    #[must_use]
    pub fn from_ascii(byte: u8) -> Self {
        debug_assert!(byte < 128);
        Self(u32::from(byte))
    }
}

/// StringId offsets
const STATIC_STRING_ID_OFFSET: u32 = 1000;
const INTERN_STRING_ID_OFFSET: u32 = 10_000;

/// Static strings for all 128 ASCII characters, built once on first access.
///
/// Uses `LazyLock` to build the array at runtime (once), leaking the strings to
/// get `'static` lifetime. The leak is intentional and bounded (128 single-byte
/// strings).
static ASCII_STRS: LazyLock<[&'static str; 128]> = LazyLock::new(|| {
    std::array::from_fn(|i| {
        let s = char::from(u8::try_from(i).expect("index out of u8 range")).to_string();
        &*Box::leak(s.into_boxed_str())
    })
});

/// Well-known names that are known at compile time and don't need a pool slot.
///
/// These cover the binding names the VM itself reads and writes (`self`,
/// `message`, `class`), the multi-character operator names, and the names of
/// the core prototypes installed by the runtime bootstrap.
#[repr(u16)]
#[derive(Debug, Clone, Copy, FromRepr, EnumString, IntoStaticStr, PartialEq, Eq, Hash)]
#[strum(serialize_all = "camelCase")]
pub enum StaticStrings {
    #[strum(serialize = "")]
    EmptyString,
    /// Receiver binding created in every method call scope.
    #[strum(serialize = "self")]
    SelfBinding,
    Message,
    Class,
    Name,
    ToString,
    Force,

    // ==========================
    // Comparison operators with multi-character names. Single-character
    // operators (`+`, `-`, `<`, ...) live in the ASCII range.
    #[strum(serialize = "<=")]
    LessEqual,
    #[strum(serialize = ">=")]
    GreaterEqual,
    #[strum(serialize = "==")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,

    // ==========================
    // Object methods
    Is,
    Set,

    // ==========================
    // Bool / Nothing methods
    Not,

    // ==========================
    // Array methods
    Push,
    Pop,
    Length,
    At,
    SetAt,

    // ==========================
    // Core prototype names as registered in the globals object.
    #[strum(serialize = "Object")]
    Object,
    #[strum(serialize = "Integer")]
    Integer,
    #[strum(serialize = "String")]
    String,
    #[strum(serialize = "Array")]
    Array,
    #[strum(serialize = "Bool")]
    Bool,
    #[strum(serialize = "Nothing")]
    Nothing,
    #[strum(serialize = "Function")]
    Function,
    #[strum(serialize = "Exception")]
    Exception,
}

/// Number of `StaticStrings` variants, used to size the id range.
const STATIC_STRING_COUNT: u32 = StaticStrings::Exception as u32 + 1;

impl From<StaticStrings> for StringId {
    fn from(s: StaticStrings) -> Self {
        Self(STATIC_STRING_ID_OFFSET + s as u32)
    }
}

/// The string pool.
///
/// Populated by the module loader (string constants, parameter names) and by
/// the runtime when a heap string is first used as a property key. Interned
/// strings are never freed; the pool is a GC strong-root set by construction.
#[derive(Debug, Default)]
pub struct Interns {
    /// Dynamically interned strings, indexed by `StringId - INTERN_STRING_ID_OFFSET`.
    strings: Vec<Box<str>>,
    /// Reverse index over `strings`.
    index: AHashMap<Box<str>, StringId>,
}

impl Interns {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string, returning the id of the canonical copy.
    ///
    /// ASCII single characters and `StaticStrings` entries resolve without
    /// touching the dynamic table.
    pub fn intern(&mut self, s: &str) -> StringId {
        if s.len() == 1 && s.as_bytes()[0] < 128 {
            return StringId::from_ascii(s.as_bytes()[0]);
        }
        if let Ok(st) = StaticStrings::from_str(s) {
            return st.into();
        }
        if let Some(&id) = self.index.get(s) {
            return id;
        }
        let id = StringId(INTERN_STRING_ID_OFFSET + u32::try_from(self.strings.len()).expect("string pool overflow"));
        self.strings.push(s.into());
        self.index.insert(s.into(), id);
        id
    }

    /// Looks up the text for an id.
    ///
    /// # Panics
    /// Panics if the id was not produced by this pool. Ids only come from
    /// interning, so this indicates a VM bug, not user error.
    #[must_use]
    pub fn get(&self, id: StringId) -> &str {
        match id.0 {
            b if b < 128 => ASCII_STRS[b as usize],
            s if (STATIC_STRING_ID_OFFSET..STATIC_STRING_ID_OFFSET + STATIC_STRING_COUNT).contains(&s) => {
                let st = StaticStrings::from_repr(
                    u16::try_from(s - STATIC_STRING_ID_OFFSET).expect("static string id out of range"),
                )
                .expect("static string id out of range");
                st.into()
            }
            d if d >= INTERN_STRING_ID_OFFSET => &self.strings[(d - INTERN_STRING_ID_OFFSET) as usize],
            other => panic!("invalid string id: {other}"),
        }
    }

    /// Returns the id for a string that may already be interned, without
    /// interning it.
    #[must_use]
    pub fn lookup(&self, s: &str) -> Option<StringId> {
        if s.len() == 1 && s.as_bytes()[0] < 128 {
            return Some(StringId::from_ascii(s.as_bytes()[0]));
        }
        if let Ok(st) = StaticStrings::from_str(s) {
            return Some(st.into());
        }
        self.index.get(s).copied()
    }

    /// Number of dynamically interned strings (excludes ASCII and static ranges).
    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_and_static_ranges_bypass_the_table() {
        let mut interns = Interns::new();
        assert_eq!(interns.intern("+"), StringId::from_ascii(b'+'));
        assert_eq!(interns.intern("self"), StaticStrings::SelfBinding.into());
        assert_eq!(interns.intern("=="), StaticStrings::Equal.into());
        assert_eq!(interns.len(), 0);
    }

    #[test]
    fn interning_is_idempotent_and_round_trips() {
        let mut interns = Interns::new();
        let a = interns.intern("greet");
        let b = interns.intern("greet");
        assert_eq!(a, b);
        assert_eq!(interns.get(a), "greet");
        assert_eq!(interns.len(), 1);
    }

    #[test]
    fn distinct_strings_get_distinct_ids() {
        let mut interns = Interns::new();
        let a = interns.intern("alpha");
        let b = interns.intern("beta");
        assert_ne!(a, b);
        assert_eq!(interns.get(b), "beta");
    }
}
