use crate::blockchain::coin::Coin;
use crate::blockchain::sized_bytes::{Bytes32, Bytes48};
use dg_node_macros::Streamable;
use serde::{Deserialize, Serialize};

#[derive(Streamable, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct NewCoin {
    pub puzzle_hash: Bytes32,
    pub amount: u64,
}

/// Conditions produced by one coin spend.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct SpendConditions {
    pub coin_id: Bytes32,
    pub parent_id: Bytes32,
    pub puzzle_hash: Bytes32,
    pub coin_amount: u64,
    pub height_relative: Option<u32>,
    pub seconds_relative: Option<u64>,
    pub before_height_relative: Option<u32>,
    pub before_seconds_relative: Option<u64>,
    pub create_coin: Vec<NewCoin>,
    pub agg_sig_me: Vec<(Bytes48, Vec<u8>)>,
}
impl SpendConditions {
    #[must_use]
    pub fn coin(&self) -> Coin {
        Coin::new(self.parent_id, self.puzzle_hash, self.coin_amount)
    }
    #[must_use]
    pub fn additions(&self) -> Vec<Coin> {
        self.create_coin
            .iter()
            .map(|c| Coin::new(self.coin_id, c.puzzle_hash, c.amount))
            .collect()
    }
}

/// Aggregated conditions of a generator or spend bundle.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug, Default)]
pub struct SpendBundleConditions {
    pub spends: Vec<SpendConditions>,
    pub reserve_fee: u64,
    pub height_absolute: u32,
    pub seconds_absolute: u64,
    pub before_height_absolute: Option<u32>,
    pub before_seconds_absolute: Option<u64>,
    pub agg_sig_unsafe: Vec<(Bytes48, Vec<u8>)>,
    pub cost: u64,
    pub removal_amount: u128,
    pub addition_amount: u128,
}
impl SpendBundleConditions {
    #[must_use]
    pub fn removals(&self) -> Vec<Coin> {
        self.spends.iter().map(SpendConditions::coin).collect()
    }
    #[must_use]
    pub fn removal_names(&self) -> Vec<Bytes32> {
        self.spends.iter().map(|s| s.coin_id).collect()
    }
    #[must_use]
    pub fn additions(&self) -> Vec<Coin> {
        self.spends.iter().flat_map(SpendConditions::additions).collect()
    }
    /// Fee left for the farmer, `None` when outputs exceed inputs.
    #[must_use]
    pub fn fees(&self) -> Option<u64> {
        self.removal_amount
            .checked_sub(self.addition_amount)
            .and_then(|f| u64::try_from(f).ok())
    }
}
