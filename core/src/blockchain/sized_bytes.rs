use blst::min_pk::{PublicKey, SecretKey, Signature};
use bytes::Buf;
use dg_node_serialize::Streamable;
use hex::{decode, encode, FromHexError};
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::io::{Cursor, Error, ErrorKind, Read};
use std::str::FromStr;

pub fn prep_hex_str(to_fix: &str) -> String {
    let lc = to_fix.to_lowercase();
    if let Some(s) = lc.strip_prefix("0x") {
        s.to_string()
    } else {
        lc
    }
}

pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, FromHexError> {
    decode(prep_hex_str(hex))
}

pub trait SizedBytes: Sized {
    const SIZE: usize;
    fn as_slice(&self) -> &[u8];
    fn is_null(&self) -> bool {
        self.as_slice().iter().all(|v| *v == 0)
    }
    fn try_from_slice(bytes: &[u8]) -> Result<Self, Error>;
}

macro_rules! impl_sized_bytes {
    ($($name: ident, $size:expr, $visitor:ident);*) => {
        $(
            #[derive(Copy, Clone, PartialEq, Eq, Hash)]
            pub struct $name {
                pub bytes: [u8; $size]
            }
            impl SizedBytes for $name {
                const SIZE: usize = $size;
                fn as_slice(&self) -> &[u8] {
                    &self.bytes
                }
                fn try_from_slice(bytes: &[u8]) -> Result<Self, Error> {
                    let bytes: [u8; $size] = bytes.try_into().map_err(|_| {
                        Error::new(
                            ErrorKind::InvalidData,
                            format!("Expected {} bytes for {}, got {}", $size, stringify!($name), bytes.len()),
                        )
                    })?;
                    Ok(Self { bytes })
                }
            }
            impl $name {
                #[must_use]
                pub const fn new(bytes: [u8; $size]) -> Self {
                    $name { bytes }
                }
                #[must_use]
                pub fn to_sized_bytes(&self) -> &[u8; $size] {
                    &self.bytes
                }
            }

            impl Ord for $name {
                fn cmp(&self, other: &Self) -> Ordering {
                    self.bytes.cmp(&other.bytes)
                }
            }
            impl PartialOrd for $name {
                fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                    Some(self.cmp(other))
                }
            }

            impl AsRef<[u8]> for $name {
                fn as_ref(&self) -> &[u8] {
                    &self.bytes
                }
            }

            impl std::ops::Index<std::ops::Range<usize>> for $name {
                type Output = [u8];
                fn index(&self, index: std::ops::Range<usize>) -> &[u8] {
                    &self.bytes[index]
                }
            }

            impl From<[u8; $size]> for $name {
                fn from(bytes: [u8; $size]) -> Self {
                    $name::new(bytes)
                }
            }

            impl From<&[u8; $size]> for $name {
                fn from(bytes: &[u8; $size]) -> Self {
                    $name::new(*bytes)
                }
            }

            impl FromStr for $name {
                type Err = Error;
                fn from_str(hex: &str) -> Result<Self, Self::Err> {
                    let bytes = hex_to_bytes(hex)
                        .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("{e:?}")))?;
                    Self::try_from_slice(&bytes)
                }
            }

            impl Serialize for $name {
                fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
                where
                    S: Serializer,
                {
                    serializer.serialize_str(self.to_string().as_str())
                }
            }

            struct $visitor;

            impl<'de> Visitor<'de> for $visitor {
                type Value = $name;

                fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                    formatter.write_str(format!("Expecting a hex String of {} bytes", $size).as_str())
                }

                fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
                where
                    E: serde::de::Error,
                {
                    $name::from_str(value).map_err(E::custom)
                }
            }

            impl<'a> Deserialize<'a> for $name {
                fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
                where
                    D: Deserializer<'a>,
                {
                    deserializer.deserialize_str($visitor)
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", encode(self.bytes))
                }
            }

            impl fmt::Debug for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", encode(self.bytes))
                }
            }

            impl Default for $name {
                fn default() -> $name {
                    $name::new([0; $size])
                }
            }

            impl Streamable for $name {
                fn to_bytes(&self) -> Vec<u8> {
                    self.bytes.to_vec()
                }
                fn from_bytes<T: AsRef<[u8]>>(bytes: &mut Cursor<T>) -> Result<Self, Error> {
                    if bytes.remaining() < $size {
                        Err(Error::new(
                            ErrorKind::UnexpectedEof,
                            format!("Failed to Parse {}, expected length {}, found {}", stringify!($name), $size, bytes.remaining()),
                        ))
                    } else {
                        let mut buf = [0u8; $size];
                        bytes.read_exact(&mut buf)?;
                        Ok(buf.into())
                    }
                }
            }
        )*
    };
}

impl_sized_bytes!(
    Bytes32, 32, Bytes32Visitor;
    Bytes48, 48, Bytes48Visitor;
    Bytes96, 96, Bytes96Visitor;
    Bytes100, 100, Bytes100Visitor
);

impl TryFrom<&Bytes48> for PublicKey {
    type Error = Error;

    fn try_from(val: &Bytes48) -> Result<PublicKey, Error> {
        PublicKey::key_validate(val.to_sized_bytes())
            .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("Invalid PublicKey: {e:?}")))
    }
}

impl From<&PublicKey> for Bytes48 {
    fn from(val: &PublicKey) -> Bytes48 {
        Bytes48::new(val.to_bytes())
    }
}

impl TryFrom<&Bytes96> for Signature {
    type Error = Error;

    fn try_from(val: &Bytes96) -> Result<Signature, Error> {
        Signature::from_bytes(val.to_sized_bytes())
            .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("Invalid Signature: {e:?}")))
    }
}

impl From<Signature> for Bytes96 {
    fn from(val: Signature) -> Bytes96 {
        Bytes96::new(val.to_bytes())
    }
}

impl From<&Signature> for Bytes96 {
    fn from(val: &Signature) -> Bytes96 {
        Bytes96::new(val.to_bytes())
    }
}

impl TryFrom<&Bytes32> for SecretKey {
    type Error = Error;

    fn try_from(val: &Bytes32) -> Result<SecretKey, Error> {
        SecretKey::from_bytes(val.to_sized_bytes())
            .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("Invalid SecretKey: {e:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip_and_ordering() {
        let a = Bytes32::from_str("0x00000000000000000000000000000000000000000000000000000000000000ff")
            .unwrap();
        let b = Bytes32::new([1; 32]);
        assert!(a < b);
        assert_eq!(Bytes32::from_str(&b.to_string()).unwrap(), b);
        assert!(Bytes32::from_str("abcd").is_err());
        assert!(Bytes32::default().is_null());
    }
}
