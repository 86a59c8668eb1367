use bytes::Buf;
use log::warn;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Error, ErrorKind, Read};

const LARGE_LIST_WARNING: u32 = 1 << 20;

pub fn hash_256(input: impl AsRef<[u8]>) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hasher.finalize().to_vec()
}

/// Big endian wire format used for hashing and persisting consensus objects.
///
/// Integers are fixed width, `bool` is a single 0/1 byte, `Option<T>` is a
/// 0/1 presence byte followed by the value, and lists are prefixed with a
/// u32 element count.
pub trait Streamable {
    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes<T: AsRef<[u8]>>(bytes: &mut Cursor<T>) -> Result<Self, Error>
    where
        Self: Sized;

    fn stream_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.to_bytes());
        hasher.finalize().into()
    }

    /// Parses a value that must consume the whole buffer.
    fn from_slice(bytes: &[u8]) -> Result<Self, Error>
    where
        Self: Sized,
    {
        let mut cursor = Cursor::new(bytes);
        let value = Self::from_bytes(&mut cursor)?;
        if cursor.has_remaining() {
            Err(Error::new(
                ErrorKind::InvalidData,
                format!("{} trailing bytes after value", cursor.remaining()),
            ))
        } else {
            Ok(value)
        }
    }
}

fn read_len<T: AsRef<[u8]>>(bytes: &mut Cursor<T>) -> Result<u32, Error> {
    let mut u32_buf: [u8; 4] = [0; 4];
    bytes.read_exact(&mut u32_buf)?;
    let len = u32::from_be_bytes(u32_buf);
    if len > LARGE_LIST_WARNING {
        warn!("Deserializing Large List: {len}");
    }
    Ok(len)
}

impl Streamable for String {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = Vec::with_capacity(4 + self.len());
        bytes.extend((self.len() as u32).to_be_bytes());
        bytes.extend(self.as_bytes());
        bytes
    }
    fn from_bytes<T: AsRef<[u8]>>(bytes: &mut Cursor<T>) -> Result<Self, Error> {
        let len = read_len(bytes)? as usize;
        if bytes.remaining() < len {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                format!("String of {len} bytes, found {}", bytes.remaining()),
            ));
        }
        let mut buf = vec![0u8; len];
        bytes.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|e| {
            Error::new(
                ErrorKind::InvalidData,
                format!("Failed to parse Utf-8 String from Bytes: {e:?}"),
            )
        })
    }
}

impl Streamable for bool {
    fn to_bytes(&self) -> Vec<u8> {
        vec![u8::from(*self)]
    }
    fn from_bytes<T: AsRef<[u8]>>(bytes: &mut Cursor<T>) -> Result<Self, Error> {
        let mut bool_buf: [u8; 1] = [0; 1];
        bytes.read_exact(&mut bool_buf)?;
        match bool_buf[0] {
            0 => Ok(false),
            1 => Ok(true),
            v => Err(Error::new(
                ErrorKind::InvalidData,
                format!("Failed to parse bool, invalid value: {v}"),
            )),
        }
    }
}

impl<T> Streamable for Option<T>
where
    T: Streamable,
{
    fn to_bytes(&self) -> Vec<u8> {
        match self {
            Some(t) => {
                let mut bytes = vec![1u8];
                bytes.extend(t.to_bytes());
                bytes
            }
            None => vec![0u8],
        }
    }
    fn from_bytes<B: AsRef<[u8]>>(bytes: &mut Cursor<B>) -> Result<Self, Error> {
        match bool::from_bytes(bytes) {
            Ok(true) => Ok(Some(T::from_bytes(bytes)?)),
            Ok(false) => Ok(None),
            Err(e) => Err(Error::new(
                ErrorKind::InvalidData,
                format!("Invalid Option prefix: {e}"),
            )),
        }
    }
}

impl<T, U> Streamable for (T, U)
where
    T: Streamable,
    U: Streamable,
{
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.0.to_bytes();
        bytes.extend(self.1.to_bytes());
        bytes
    }
    fn from_bytes<B: AsRef<[u8]>>(bytes: &mut Cursor<B>) -> Result<Self, Error> {
        let t = T::from_bytes(bytes)?;
        let u = U::from_bytes(bytes)?;
        Ok((t, u))
    }
}

impl<T> Streamable for Vec<T>
where
    T: Streamable,
{
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = Vec::new();
        bytes.extend((self.len() as u32).to_be_bytes());
        for e in self {
            bytes.extend(e.to_bytes());
        }
        bytes
    }
    fn from_bytes<B: AsRef<[u8]>>(bytes: &mut Cursor<B>) -> Result<Self, Error> {
        let len = read_len(bytes)?;
        // Every element takes at least one byte, so a larger count is garbage.
        if len as usize > bytes.remaining() {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                format!("List of {len} elements, only {} bytes left", bytes.remaining()),
            ));
        }
        (0..len).try_fold(Vec::with_capacity(len as usize), |mut vec, _| {
            vec.push(T::from_bytes(bytes)?);
            Ok(vec)
        })
    }
}

macro_rules! impl_primitives {
    ($($name: ident, $size:expr);*) => {
        $(
            impl Streamable for $name {
                fn to_bytes(&self) -> Vec<u8> {
                    self.to_be_bytes().to_vec()
                }
                fn from_bytes<T: AsRef<[u8]>>(bytes: &mut Cursor<T>) -> Result<Self, Error> {
                    if bytes.remaining() < $size {
                        Err(Error::new(
                            ErrorKind::UnexpectedEof,
                            format!(
                                "Failed to Parse {}, expected length {}, found {}",
                                stringify!($name),
                                $size,
                                bytes.remaining()
                            ),
                        ))
                    } else {
                        let mut buffer: [u8; $size] = [0; $size];
                        bytes.read_exact(&mut buffer)?;
                        Ok($name::from_be_bytes(buffer))
                    }
                }
            }
        )*
    };
}
impl_primitives!(
    u8, 1;
    u16, 2;
    u32, 4;
    u64, 8;
    u128, 16;
    i64, 8
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_and_list_layout() {
        let value: Vec<Option<u16>> = vec![Some(7), None];
        let bytes = value.to_bytes();
        assert_eq!(bytes, vec![0, 0, 0, 2, 1, 0, 7, 0]);
        assert_eq!(Vec::<Option<u16>>::from_slice(&bytes).unwrap(), value);
    }

    #[test]
    fn test_rejects_trailing_and_truncated_input() {
        assert!(u32::from_slice(&[0, 0, 0, 1, 9]).is_err());
        assert!(u64::from_slice(&[0, 1]).is_err());
        assert!(Vec::<u8>::from_slice(&[0xff, 0xff, 0xff, 0xff]).is_err());
        assert!(bool::from_slice(&[2]).is_err());
    }
}
