use crate::blockchain::block_record::BlockRecord;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Debug, Default)]
pub struct SyncState {
    pub sync_mode: bool,
    pub synced: bool,
    pub sync_tip_height: u32,
    pub sync_progress_height: u32,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct BlockchainState {
    pub peak: Option<BlockRecord>,
    pub genesis_challenge_initialized: bool,
    pub sync: SyncState,
    pub difficulty: u64,
    pub sub_slot_iters: u64,
    pub mempool_size: usize,
    pub mempool_cost: u64,
    pub mempool_max_total_cost: u64,
    pub block_max_cost: u64,
}
