use crate::blockchain::class_group_element::ClassgroupElement;
use crate::blockchain::coin::Coin;
use crate::blockchain::sized_bytes::Bytes32;
use crate::blockchain::sub_epoch_summary::SubEpochSummary;
use crate::consensus::constants::ConsensusConstants;
use crate::consensus::pot_iterations::{calculate_ip_iters, calculate_sp_iters};
use dg_node_macros::Streamable;
use serde::{Deserialize, Serialize};
use std::io::Error;

/// Summary of a validated block kept in memory for every known header hash.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct BlockRecord {
    pub header_hash: Bytes32,
    pub prev_hash: Bytes32,
    pub height: u32,
    pub weight: u128,
    pub total_iters: u128,
    pub signage_point_index: u8,
    pub challenge_vdf_output: ClassgroupElement,
    pub infused_challenge_vdf_output: Option<ClassgroupElement>,
    pub reward_infusion_new_challenge: Bytes32,
    pub challenge_block_info_hash: Bytes32,
    pub sub_slot_iters: u64,
    pub pool_puzzle_hash: Bytes32,
    pub farmer_puzzle_hash: Bytes32,
    pub required_iters: u64,
    pub deficit: u8,
    pub overflow: bool,
    pub prev_transaction_block_height: u32,
    pub timestamp: Option<u64>,
    pub prev_transaction_block_hash: Option<Bytes32>,
    pub fees: Option<u64>,
    pub reward_claims_incorporated: Option<Vec<Coin>>,
    pub finished_challenge_slot_hashes: Option<Vec<Bytes32>>,
    pub finished_infused_challenge_slot_hashes: Option<Vec<Bytes32>>,
    pub finished_reward_slot_hashes: Option<Vec<Bytes32>>,
    pub sub_epoch_summary_included: Option<SubEpochSummary>,
}
impl BlockRecord {
    #[must_use]
    pub fn is_transaction_block(&self) -> bool {
        self.timestamp.is_some()
    }
    #[must_use]
    pub fn first_in_sub_slot(&self) -> bool {
        self.finished_challenge_slot_hashes.is_some()
    }
    #[must_use]
    pub fn is_challenge_block(&self, constants: &ConsensusConstants) -> bool {
        self.deficit == constants.min_blocks_per_challenge_block.saturating_sub(1)
    }
    pub fn sp_iters(&self, constants: &ConsensusConstants) -> Result<u64, Error> {
        calculate_sp_iters(constants, self.sub_slot_iters, self.signage_point_index)
    }
    pub fn ip_iters(&self, constants: &ConsensusConstants) -> Result<u64, Error> {
        calculate_ip_iters(
            constants,
            self.sub_slot_iters,
            self.signage_point_index,
            self.required_iters,
        )
    }
    /// Total iterations at the start of the sub-slot the signage point is in.
    pub fn sp_sub_slot_total_iters(&self, constants: &ConsensusConstants) -> Result<u128, Error> {
        let ret = self.ip_sub_slot_total_iters(constants)?;
        if self.overflow {
            Ok(ret.saturating_sub(u128::from(self.sub_slot_iters)))
        } else {
            Ok(ret)
        }
    }
    /// Total iterations at the start of the sub-slot the block is infused in.
    pub fn ip_sub_slot_total_iters(&self, constants: &ConsensusConstants) -> Result<u128, Error> {
        Ok(self
            .total_iters
            .saturating_sub(u128::from(self.ip_iters(constants)?)))
    }
    pub fn sp_total_iters(&self, constants: &ConsensusConstants) -> Result<u128, Error> {
        Ok(self.sp_sub_slot_total_iters(constants)? + u128::from(self.sp_iters(constants)?))
    }
}
