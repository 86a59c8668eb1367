use crate::blockchain::sized_bytes::Bytes32;
use dg_node_macros::Streamable;
use serde::{Deserialize, Serialize};

/// `max_height` of 0 means the target never expires.
#[derive(Streamable, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct PoolTarget {
    pub puzzle_hash: Bytes32,
    pub max_height: u32,
}
