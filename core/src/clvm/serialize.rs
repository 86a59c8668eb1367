use crate::clvm::sexp::{NodePtr, SExp};
use std::io::{Error, ErrorKind};

const MAX_SINGLE_BYTE: u8 = 0x7f;
const CONS_BOX_MARKER: u8 = 0xff;
/// Deepest pair nesting accepted from the wire.
pub const MAX_SERIALIZED_DEPTH: usize = 4096;

fn encode_size(size: usize, out: &mut Vec<u8>) -> Result<(), Error> {
    if size < 0x40 {
        out.push(0x80 | size as u8);
    } else if size < 0x2000 {
        out.push(0xc0 | (size >> 8) as u8);
        out.push(size as u8);
    } else if size < 0x10_0000 {
        out.push(0xe0 | (size >> 16) as u8);
        out.push((size >> 8) as u8);
        out.push(size as u8);
    } else if size < 0x800_0000 {
        out.push(0xf0 | (size >> 24) as u8);
        out.push((size >> 16) as u8);
        out.push((size >> 8) as u8);
        out.push(size as u8);
    } else if size < 0x4_0000_0000 {
        out.push(0xf8 | (size >> 32) as u8);
        out.push((size >> 24) as u8);
        out.push((size >> 16) as u8);
        out.push((size >> 8) as u8);
        out.push(size as u8);
    } else {
        return Err(Error::new(ErrorKind::InvalidInput, "atom too large"));
    }
    Ok(())
}

pub fn node_to_bytes(node: &SExp) -> Result<Vec<u8>, Error> {
    let mut out = vec![];
    let mut stack: Vec<&SExp> = vec![node];
    while let Some(cur) = stack.pop() {
        match cur {
            SExp::Pair(first, rest) => {
                out.push(CONS_BOX_MARKER);
                stack.push(rest);
                stack.push(first);
            }
            SExp::Atom(a) => {
                if a.is_empty() {
                    out.push(0x80);
                } else if a.len() == 1 && a[0] <= MAX_SINGLE_BYTE {
                    out.push(a[0]);
                } else {
                    encode_size(a.len(), &mut out)?;
                    out.extend_from_slice(a);
                }
            }
        }
    }
    Ok(out)
}

/// Returns `(atom_start, atom_end)` offsets for the atom whose prefix starts at `pos`.
fn atom_bounds(buf: &[u8], pos: usize) -> Result<(usize, usize), Error> {
    let eof = || Error::new(ErrorKind::UnexpectedEof, "unexpected end of clvm stream");
    let b = *buf.get(pos).ok_or_else(eof)?;
    if b <= MAX_SINGLE_BYTE {
        return Ok((pos, pos + 1));
    }
    if b == 0x80 {
        return Ok((pos + 1, pos + 1));
    }
    let mut bit_count = 0;
    let mut bit_mask: u8 = 0x80;
    let mut first = b;
    while first & bit_mask != 0 {
        bit_count += 1;
        first &= 0xff ^ bit_mask;
        bit_mask >>= 1;
    }
    if bit_count > 5 {
        return Err(Error::new(ErrorKind::InvalidData, "bad clvm size prefix"));
    }
    let mut size = u64::from(first);
    for i in 1..bit_count {
        size = (size << 8) | u64::from(*buf.get(pos + i).ok_or_else(eof)?);
    }
    let start = pos + bit_count;
    let end = start
        .checked_add(usize::try_from(size).map_err(|_| eof())?)
        .ok_or_else(eof)?;
    if end > buf.len() {
        return Err(eof());
    }
    Ok((start, end))
}

/// Length in bytes of the serialized node at the start of `buf`.
pub fn serialized_length(buf: &[u8]) -> Result<usize, Error> {
    let mut pos = 0;
    let mut pending = 1usize;
    while pending > 0 {
        pending -= 1;
        let b = *buf
            .get(pos)
            .ok_or_else(|| Error::new(ErrorKind::UnexpectedEof, "unexpected end of clvm stream"))?;
        if b == CONS_BOX_MARKER {
            pos += 1;
            pending += 2;
        } else {
            let (_, end) = atom_bounds(buf, pos)?;
            pos = end;
        }
    }
    Ok(pos)
}

pub fn node_from_bytes(buf: &[u8]) -> Result<NodePtr, Error> {
    enum Op {
        Parse(usize),
        Cons,
    }
    let mut pos = 0;
    let mut ops = vec![Op::Parse(0)];
    let mut values: Vec<NodePtr> = vec![];
    while let Some(op) = ops.pop() {
        match op {
            Op::Parse(depth) => {
                if depth > MAX_SERIALIZED_DEPTH {
                    return Err(Error::new(ErrorKind::InvalidData, "clvm nesting too deep"));
                }
                let b = *buf.get(pos).ok_or_else(|| {
                    Error::new(ErrorKind::UnexpectedEof, "unexpected end of clvm stream")
                })?;
                if b == CONS_BOX_MARKER {
                    pos += 1;
                    ops.push(Op::Cons);
                    ops.push(Op::Parse(depth + 1));
                    ops.push(Op::Parse(depth + 1));
                } else {
                    let (start, end) = atom_bounds(buf, pos)?;
                    values.push(SExp::atom(&buf[start..end]));
                    pos = end;
                }
            }
            Op::Cons => {
                let rest = values.pop();
                let first = values.pop();
                match (first, rest) {
                    (Some(first), Some(rest)) => values.push(SExp::pair(first, rest)),
                    _ => return Err(Error::new(ErrorKind::InvalidData, "malformed clvm pair")),
                }
            }
        }
    }
    if pos != buf.len() {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("{} trailing bytes after clvm program", buf.len() - pos),
        ));
    }
    values
        .pop()
        .ok_or_else(|| Error::new(ErrorKind::InvalidData, "empty clvm stream"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_encodings() {
        assert_eq!(node_to_bytes(&SExp::nil()).unwrap(), vec![0x80]);
        assert_eq!(node_to_bytes(&SExp::from_u64(1)).unwrap(), vec![0x01]);
        assert_eq!(node_to_bytes(&SExp::from_u64(0x80)).unwrap(), vec![0x82, 0x00, 0x80]);
        let quoted = SExp::pair(SExp::from_u64(1), SExp::list(vec![SExp::from_u64(5)]));
        let bytes = node_to_bytes(&quoted).unwrap();
        assert_eq!(bytes, vec![0xff, 0x01, 0xff, 0x05, 0x80]);
        assert_eq!(serialized_length(&bytes).unwrap(), 5);
        assert_eq!(node_from_bytes(&bytes).unwrap(), quoted);
    }

    #[test]
    fn test_rejects_truncated_and_deep_streams() {
        assert!(node_from_bytes(&[0xff, 0x01]).is_err());
        assert!(node_from_bytes(&[0x83, 0x01]).is_err());
        let mut deep = vec![0xff; MAX_SERIALIZED_DEPTH + 2];
        deep.extend(vec![0x80; MAX_SERIALIZED_DEPTH + 3]);
        assert!(node_from_bytes(&deep).is_err());
    }
}
