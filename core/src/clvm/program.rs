use crate::blockchain::sized_bytes::{hex_to_bytes, Bytes32};
use crate::clvm::serialize::{node_from_bytes, node_to_bytes, serialized_length};
use crate::clvm::sexp::{NodePtr, SExp};
use bytes::Buf;
use dg_node_serialize::Streamable;
use hex::encode;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::io::{Cursor, Error, ErrorKind, Read};

/// A CLVM program kept in its serialized form.
///
/// The streamable encoding is the raw CLVM serialization, which is self
/// delimiting, so no length prefix is written.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct SerializedProgram {
    buffer: Vec<u8>,
}
impl Display for SerializedProgram {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", encode(&self.buffer))
    }
}
impl Debug for SerializedProgram {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", encode(&self.buffer))
    }
}
impl SerializedProgram {
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> SerializedProgram {
        SerializedProgram {
            buffer: bytes.to_owned(),
        }
    }
    pub fn from_hex(hex_str: &str) -> Result<SerializedProgram, Error> {
        Ok(SerializedProgram {
            buffer: hex_to_bytes(hex_str).map_err(|_| {
                Error::new(
                    ErrorKind::InvalidData,
                    "Failed to convert str to SerializedProgram",
                )
            })?,
        })
    }
    pub fn from_node(node: &SExp) -> Result<SerializedProgram, Error> {
        Ok(SerializedProgram {
            buffer: node_to_bytes(node)?,
        })
    }
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
    pub fn to_node(&self) -> Result<NodePtr, Error> {
        node_from_bytes(&self.buffer)
    }
    pub fn tree_hash(&self) -> Result<Bytes32, Error> {
        Ok(self.to_node()?.tree_hash())
    }
}

impl Streamable for SerializedProgram {
    fn to_bytes(&self) -> Vec<u8> {
        self.buffer.clone()
    }
    fn from_bytes<T: AsRef<[u8]>>(bytes: &mut Cursor<T>) -> Result<Self, Error> {
        let start = bytes.position() as usize;
        let len = serialized_length(bytes.get_ref().as_ref().get(start..).unwrap_or_default())?;
        if bytes.remaining() < len {
            return Err(Error::new(ErrorKind::UnexpectedEof, "truncated program"));
        }
        let mut buffer = vec![0u8; len];
        bytes.read_exact(&mut buffer)?;
        Ok(SerializedProgram { buffer })
    }
}

impl TryFrom<&str> for SerializedProgram {
    type Error = Error;

    fn try_from(hex: &str) -> Result<SerializedProgram, Error> {
        SerializedProgram::from_hex(hex)
    }
}

struct SerializedProgramVisitor;

impl<'de> Visitor<'de> for SerializedProgramVisitor {
    type Value = SerializedProgram;

    fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
        formatter.write_str("Expecting a hex String")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        value.try_into().map_err(serde::de::Error::custom)
    }
}

impl Serialize for SerializedProgram {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

impl<'a> Deserialize<'a> for SerializedProgram {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'a>,
    {
        deserializer.deserialize_str(SerializedProgramVisitor)
    }
}
