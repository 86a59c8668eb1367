use crate::blockchain::coin::Coin;
use crate::blockchain::foliage::Foliage;
use crate::blockchain::foliage_transaction_block::FoliageTransactionBlock;
use crate::blockchain::reward_chain_block::RewardChainBlock;
use crate::blockchain::sized_bytes::Bytes32;
use crate::blockchain::subslot_bundle::SubSlotBundle;
use crate::blockchain::transactions_info::TransactionsInfo;
use crate::blockchain::vdf_proof::VdfProof;
use crate::clvm::program::SerializedProgram;
use crate::utils::Hashable;
use dg_node_macros::Streamable;
use serde::{Deserialize, Serialize};

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct FullBlock {
    pub finished_sub_slots: Vec<SubSlotBundle>,
    pub reward_chain_block: RewardChainBlock,
    pub challenge_chain_sp_proof: Option<VdfProof>,
    pub challenge_chain_ip_proof: VdfProof,
    pub reward_chain_sp_proof: Option<VdfProof>,
    pub reward_chain_ip_proof: VdfProof,
    pub infused_challenge_chain_ip_proof: Option<VdfProof>,
    pub foliage: Foliage,
    pub foliage_transaction_block: Option<FoliageTransactionBlock>,
    pub transactions_info: Option<TransactionsInfo>,
    pub transactions_generator: Option<SerializedProgram>,
    pub transactions_generator_ref_list: Vec<u32>,
}
impl FullBlock {
    #[must_use]
    pub fn header_hash(&self) -> Bytes32 {
        self.foliage.get_hash()
    }
    #[must_use]
    pub fn prev_header_hash(&self) -> Bytes32 {
        self.foliage.prev_block_hash
    }
    #[must_use]
    pub fn height(&self) -> u32 {
        self.reward_chain_block.height
    }
    #[must_use]
    pub fn weight(&self) -> u128 {
        self.reward_chain_block.weight
    }
    #[must_use]
    pub fn total_iters(&self) -> u128 {
        self.reward_chain_block.total_iters
    }
    #[must_use]
    pub fn is_transaction_block(&self) -> bool {
        self.foliage_transaction_block.is_some()
    }
    #[must_use]
    pub fn first_in_sub_slot(&self) -> bool {
        !self.finished_sub_slots.is_empty()
    }
    /// Reward coins this block pays out for earlier blocks, empty for non transaction blocks.
    #[must_use]
    pub fn get_included_reward_coins(&self) -> Vec<Coin> {
        self.transactions_info
            .as_ref()
            .map(|ti| ti.reward_claims_incorporated.clone())
            .unwrap_or_default()
    }
}
