use crate::blockchain::sized_bytes::Bytes32;
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub type NodePtr = Arc<SExp>;

#[derive(PartialEq, Eq, Debug)]
pub enum SExp {
    Atom(Vec<u8>),
    Pair(NodePtr, NodePtr),
}

impl SExp {
    #[must_use]
    pub fn nil() -> NodePtr {
        Arc::new(SExp::Atom(vec![]))
    }
    #[must_use]
    pub fn atom(bytes: impl Into<Vec<u8>>) -> NodePtr {
        Arc::new(SExp::Atom(bytes.into()))
    }
    #[must_use]
    pub fn pair(first: NodePtr, rest: NodePtr) -> NodePtr {
        Arc::new(SExp::Pair(first, rest))
    }
    #[must_use]
    pub fn from_u64(value: u64) -> NodePtr {
        Self::atom(u64_to_atom(value))
    }
    #[must_use]
    pub fn from_bigint(value: &BigInt) -> NodePtr {
        Self::atom(bigint_to_atom(value))
    }
    /// Builds a proper list terminated by nil.
    #[must_use]
    pub fn list(items: Vec<NodePtr>) -> NodePtr {
        items
            .into_iter()
            .rev()
            .fold(Self::nil(), |rest, first| Self::pair(first, rest))
    }
    #[must_use]
    pub fn as_atom(&self) -> Option<&[u8]> {
        match self {
            SExp::Atom(a) => Some(a),
            SExp::Pair(..) => None,
        }
    }
    #[must_use]
    pub fn as_pair(&self) -> Option<(&NodePtr, &NodePtr)> {
        match self {
            SExp::Atom(_) => None,
            SExp::Pair(f, r) => Some((f, r)),
        }
    }
    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(self, SExp::Atom(a) if a.is_empty())
    }
    /// Elements of a proper list, `None` when the chain does not end in nil.
    #[must_use]
    pub fn as_list(node: &NodePtr) -> Option<Vec<NodePtr>> {
        let mut items = vec![];
        let mut cur = node;
        loop {
            match cur.as_ref() {
                SExp::Pair(first, rest) => {
                    items.push(first.clone());
                    cur = rest;
                }
                SExp::Atom(a) if a.is_empty() => return Some(items),
                SExp::Atom(_) => return None,
            }
        }
    }

    #[must_use]
    pub fn tree_hash(&self) -> Bytes32 {
        enum Op<'a> {
            Visit(&'a SExp),
            Combine,
        }
        let mut ops = vec![Op::Visit(self)];
        let mut hashes: Vec<[u8; 32]> = vec![];
        while let Some(op) = ops.pop() {
            match op {
                Op::Visit(SExp::Atom(a)) => {
                    let mut hasher = Sha256::new();
                    hasher.update([1u8]);
                    hasher.update(a);
                    hashes.push(hasher.finalize().into());
                }
                Op::Visit(SExp::Pair(first, rest)) => {
                    ops.push(Op::Combine);
                    ops.push(Op::Visit(rest));
                    ops.push(Op::Visit(first));
                }
                Op::Combine => {
                    let rest = hashes.pop().unwrap_or_default();
                    let first = hashes.pop().unwrap_or_default();
                    let mut hasher = Sha256::new();
                    hasher.update([2u8]);
                    hasher.update(first);
                    hasher.update(rest);
                    hashes.push(hasher.finalize().into());
                }
            }
        }
        Bytes32::new(hashes.pop().unwrap_or_default())
    }
}

/// Minimal two's complement encoding used for CLVM integers.
#[must_use]
pub fn u64_to_atom(v: u64) -> Vec<u8> {
    if v == 0 {
        return vec![];
    }
    let bytes = v.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(8);
    let mut rtn = Vec::with_capacity(9);
    if bytes[start] & 0x80 != 0 {
        rtn.push(0);
    }
    rtn.extend_from_slice(&bytes[start..]);
    rtn
}

#[must_use]
pub fn bigint_to_atom(v: &BigInt) -> Vec<u8> {
    if v.is_zero() {
        vec![]
    } else {
        v.to_signed_bytes_be()
    }
}

#[must_use]
pub fn atom_to_bigint(atom: &[u8]) -> BigInt {
    if atom.is_empty() {
        BigInt::zero()
    } else {
        BigInt::from_signed_bytes_be(atom)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AtomIntError {
    Negative,
    TooLarge,
    NotCanonical,
}

/// Parses a canonical non-negative integer that fits in a u64.
pub fn atom_to_u64(atom: &[u8]) -> Result<u64, AtomIntError> {
    if atom.is_empty() {
        return Ok(0);
    }
    if atom[0] & 0x80 != 0 {
        return Err(AtomIntError::Negative);
    }
    if atom.len() > 1 && atom[0] == 0 && atom[1] & 0x80 == 0 {
        return Err(AtomIntError::NotCanonical);
    }
    let trimmed = if atom[0] == 0 { &atom[1..] } else { atom };
    if trimmed.len() > 8 {
        return Err(AtomIntError::TooLarge);
    }
    let mut buf = [0u8; 8];
    buf[8 - trimmed.len()..].copy_from_slice(trimmed);
    Ok(u64::from_be_bytes(buf))
}

#[must_use]
pub fn is_negative(atom: &[u8]) -> bool {
    atom_to_bigint(atom).is_negative()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_encoding() {
        assert_eq!(u64_to_atom(0), Vec::<u8>::new());
        assert_eq!(u64_to_atom(1), vec![1]);
        assert_eq!(u64_to_atom(0x80), vec![0, 0x80]);
        assert_eq!(u64_to_atom(u64::MAX), vec![0, 255, 255, 255, 255, 255, 255, 255, 255]);
        for v in [0u64, 1, 127, 128, 255, 256, 1_750_000_000_000, u64::MAX] {
            assert_eq!(atom_to_u64(&u64_to_atom(v)), Ok(v));
        }
        assert_eq!(atom_to_u64(&[0xff]), Err(AtomIntError::Negative));
        assert_eq!(atom_to_u64(&[0, 1]), Err(AtomIntError::NotCanonical));
    }

    #[test]
    fn test_tree_hash_of_one() {
        let one = SExp::from_u64(1);
        let mut hasher = Sha256::new();
        hasher.update([1u8, 1u8]);
        let expected: [u8; 32] = hasher.finalize().into();
        assert_eq!(one.tree_hash(), Bytes32::new(expected));
        let list = SExp::list(vec![SExp::from_u64(1), SExp::nil()]);
        assert_eq!(SExp::as_list(&list).map(|l| l.len()), Some(2));
    }
}
