//! Canonical binary encoding used for every hash the account signs over.
//!
//! Integers are big-endian, variable-length data is prefixed with a `u32`
//! length, and enums are prefixed with a one-byte tag. The encoding must stay
//! stable across versions: action hashes, pending-action ids and recovery ids
//! are all derived from it.

/// Trait for objects that have a canonical binary representation for hashing.
pub trait CanonicalEncode {
    fn encode_into(&self, out: &mut Vec<u8>);

    fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }
}

// --- Primitives ---

impl CanonicalEncode for u8 {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }
}

impl CanonicalEncode for u16 {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }
}

impl CanonicalEncode for u32 {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }
}

impl CanonicalEncode for u64 {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }
}

impl CanonicalEncode for u128 {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }
}

impl CanonicalEncode for bool {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }
}

impl<const N: usize> CanonicalEncode for [u8; N] {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl CanonicalEncode for String {
    fn encode_into(&self, out: &mut Vec<u8>) {
        encode_len(self.len(), out);
        out.extend_from_slice(self.as_bytes());
    }
}

impl<T: CanonicalEncode> CanonicalEncode for Vec<T> {
    fn encode_into(&self, out: &mut Vec<u8>) {
        encode_len(self.len(), out);
        for item in self {
            item.encode_into(out);
        }
    }
}

impl<T: CanonicalEncode> CanonicalEncode for Option<T> {
    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            None => out.push(0),
            Some(value) => {
                out.push(1);
                value.encode_into(out);
            }
        }
    }
}

/// Lengths beyond `u32::MAX` cannot occur in a request; they saturate rather
/// than wrap so two different inputs can never share a prefix.
fn encode_len(len: usize, out: &mut Vec<u8>) {
    let len = u32::try_from(len).unwrap_or(u32::MAX);
    out.extend_from_slice(&len.to_be_bytes());
}
