// SPDX-License-Identifier: Apache-2.0

//! Attribute values. Strings are owned by the attribute that holds them
//! (`dynstr` in `attr.c`); bitmaps and blobs are reference-counted by
//! value identity, per spec §5 and §9 ("Reference counting").

use std::sync::Arc;

/// A reference-counted, immutable run of bytes (e.g. `NT_TASKSTRUCT`,
/// `VMCOREINFO`).
pub type Blob = Arc<Vec<u8>>;

/// A reference-counted, immutable bitmap (fixed-size bit vector).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap(pub Arc<Vec<u64>>);

impl Bitmap {
    pub fn new(words: Vec<u64>) -> Self {
        Bitmap(Arc::new(words))
    }

    pub fn get(&self, bit: usize) -> bool {
        let word = bit / 64;
        let off = bit % 64;
        self.0.get(word).map(|w| (w >> off) & 1 != 0).unwrap_or(false)
    }
}

/// The value held by a set, non-directory attribute.
#[derive(Clone, Debug)]
pub enum AttrValue {
    Number(u64),
    Address(u64),
    String(String),
    Bitmap(Bitmap),
    Blob(Blob),
}

impl AttrValue {
    pub fn as_number(&self) -> Option<u64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<u64> {
        match self {
            AttrValue::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            AttrValue::Blob(b) => Some(b),
            _ => None,
        }
    }
}

impl PartialEq for AttrValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AttrValue::Number(a), AttrValue::Number(b)) => a == b,
            (AttrValue::Address(a), AttrValue::Address(b)) => a == b,
            (AttrValue::String(a), AttrValue::String(b)) => a == b,
            (AttrValue::Bitmap(a), AttrValue::Bitmap(b)) => Arc::ptr_eq(&a.0, &b.0),
            (AttrValue::Blob(a), AttrValue::Blob(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_get_reads_correct_bit() {
        let bm = Bitmap::new(vec![0b1010]);
        assert!(!bm.get(0));
        assert!(bm.get(1));
        assert!(!bm.get(2));
        assert!(bm.get(3));
        assert!(!bm.get(100));
    }

    #[test]
    fn blob_identity_equality() {
        let b1: Blob = Arc::new(vec![1, 2, 3]);
        let b2 = b1.clone();
        let b3: Blob = Arc::new(vec![1, 2, 3]);
        assert_eq!(AttrValue::Blob(b1.clone()), AttrValue::Blob(b2));
        assert_ne!(AttrValue::Blob(b1), AttrValue::Blob(b3));
    }
}
