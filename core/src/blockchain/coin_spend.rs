use crate::blockchain::coin::Coin;
use crate::clvm::program::SerializedProgram;
use dg_node_macros::Streamable;
use serde::{Deserialize, Serialize};

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct CoinSpend {
    pub coin: Coin,
    pub puzzle_reveal: SerializedProgram,
    pub solution: SerializedProgram,
}
