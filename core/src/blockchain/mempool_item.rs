use crate::blockchain::coin::Coin;
use crate::blockchain::npc_result::NpcResult;
use crate::blockchain::sized_bytes::Bytes32;
use crate::blockchain::spend_bundle::SpendBundle;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct MempoolItem {
    pub spend_bundle: SpendBundle,
    pub spend_bundle_name: Bytes32,
    pub fee: u64,
    pub cost: u64,
    pub npc_result: NpcResult,
    pub additions: Vec<Coin>,
    pub removals: Vec<Bytes32>,
    pub height_added_to_mempool: u32,
    pub assert_height: Option<u32>,
    pub assert_before_height: Option<u32>,
    pub assert_before_seconds: Option<u64>,
}
impl MempoolItem {
    #[must_use]
    pub fn fee_per_cost(&self) -> f64 {
        if self.cost == 0 {
            0.0
        } else {
            self.fee as f64 / self.cost as f64
        }
    }
    /// Fee per cost comparison done in integers, `a/b < c/d` as `a*d < c*b`.
    #[must_use]
    pub fn cmp_fee_per_cost(&self, other: &MempoolItem) -> Ordering {
        let lhs = u128::from(self.fee) * u128::from(other.cost);
        let rhs = u128::from(other.fee) * u128::from(self.cost);
        lhs.cmp(&rhs)
    }
}
