use crate::blockchain::sized_bytes::Bytes32;
use dg_node_serialize::Streamable;
use sha2::{Digest, Sha256};

#[must_use]
pub fn std_hash(input: impl AsRef<[u8]>) -> Bytes32 {
    Bytes32::new(Sha256::digest(input).into())
}

/// Consensus objects are identified by the sha256 of their streamable bytes.
pub trait Hashable {
    fn get_hash(&self) -> Bytes32;
}
impl<T: Streamable> Hashable for T {
    fn get_hash(&self) -> Bytes32 {
        Bytes32::new(self.stream_hash())
    }
}

pub fn now_unix_secs() -> u64 {
    time::OffsetDateTime::now_utc().unix_timestamp().max(0) as u64
}
