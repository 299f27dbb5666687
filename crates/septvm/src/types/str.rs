//! Immutable heap strings.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

/// An immutable byte string on the heap.
///
/// Literals and property names are interned and never reach the heap; this
/// type carries runtime-built strings (concatenations, `toString` output).
/// The hash is computed once at construction, as string values never mutate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SepStr {
    text: Box<str>,
    hash: u64,
}

impl SepStr {
    pub fn new(text: impl Into<Box<str>>) -> Self {
        let text = text.into();
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let hash = hasher.finish();
        Self { text, hash }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Cached content hash. Equal strings hash equal; the reverse holds up to
    /// hasher collisions, so equality checks still compare bytes.
    pub fn hash(&self) -> u64 {
        self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_strings_share_a_hash() {
        let a = SepStr::new("hello");
        let b = SepStr::new("hello");
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a, b);
    }
}
