use crate::blockchain::coin::Coin;
use crate::blockchain::sized_bytes::Bytes32;
use dg_node_macros::Streamable;
use serde::{Deserialize, Serialize};

#[derive(Streamable, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct CoinRecord {
    pub coin: Coin,
    pub confirmed_block_index: u32,
    pub spent_block_index: Option<u32>,
    pub coinbase: bool,
    pub timestamp: u64,
}
impl CoinRecord {
    #[must_use]
    pub fn spent(&self) -> bool {
        self.spent_block_index.is_some()
    }
    #[must_use]
    pub fn name(&self) -> Bytes32 {
        self.coin.name()
    }
}
