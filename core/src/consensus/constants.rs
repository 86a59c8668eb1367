use crate::blockchain::sized_bytes::Bytes32;
use crate::clvm::sexp::SExp;
use crate::utils::std_hash;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ConsensusConstants {
    pub slot_blocks_target: u32, //How many blocks to target per sub-slot
    pub min_blocks_per_challenge_block: u8, //How many blocks must be created per slot (to make challenge sb)
    //Max number of blocks that can be infused into a sub-slot.
    //Note: this must be less than sub_epoch_blocks/2, and > slot_blocks_target
    pub max_sub_slot_blocks: u32,
    pub num_sps_sub_slot: u32, //The number of signage points per sub-slot (including the 0th sp at the sub-slot start)

    pub sub_slot_iters_starting: u64, //The sub_slot_iters for the first epoch
    pub difficulty_constant_factor: u128, //Multiplied by the difficulty to get iterations
    pub difficulty_starting: u64,     //The difficulty for the first epoch
    //The maximum factor by which difficulty and sub_slot_iters can change per epoch
    pub difficulty_change_max_factor: u32,
    pub sub_epoch_blocks: u32, //The number of blocks per sub-epoch
    pub epoch_blocks: u32, //The number of blocks per epoch, must be a multiple of sub_epoch_blocks

    pub significant_bits: u8, //The number of bits to look at in difficulty and min iters. The rest are zeroed
    pub discriminant_size_bits: u16, //Max is 1024 (based on ClassGroupElement int size)
    pub number_zero_bits_plot_filter: u8, //H(plot id + challenge hash + signage point) must start with these many zeroes
    pub min_plot_size: u8,
    pub max_plot_size: u8,
    pub sub_slot_time_target: u64, //The target number of seconds per sub-slot
    pub num_sp_intervals_extra: u64, //The difference between signage point and infusion point (plus required_iters)
    pub max_future_time: u64, //The next block can have a timestamp of at most these many seconds in the future
    pub number_of_timestamps: u32,
    //Used as the initial cc rc challenges, as well as first block back pointers, and first SES back pointer
    pub genesis_challenge: Bytes32,
    //Appended to AGG_SIG_ME messages for replay protection between networks
    pub agg_sig_me_additional_data: Vec<u8>,
    pub genesis_pre_farm_pool_puzzle_hash: Bytes32, //The block at height must pay out to this pool puzzle hash
    pub genesis_pre_farm_farmer_puzzle_hash: Bytes32, //The block at height must pay out to this farmer puzzle hash
    pub max_vdf_witness_size: u8, //The maximum number of class group elements within an n-wesolowski proof
    //Size of mempool = mempool_block_buffer x the size of block
    pub mempool_block_buffer: u64,
    pub max_coin_amount: u64,
    //Max block cost in clvm cost units
    pub max_block_cost_clvm: u64,
    //Cost per byte of generator program
    pub cost_per_byte: u64,
    //Blocks below this height may not carry a transactions generator
    pub initial_freeze_period: u32,

    pub blocks_cache_size: u32,
    pub max_block_count_per_requests: u32,
    pub max_generator_size: u32,
    pub max_generator_ref_list_size: u32,
}
impl Default for ConsensusConstants {
    fn default() -> Self {
        MAINNET.clone()
    }
}
impl ConsensusConstants {
    #[must_use]
    pub fn max_mempool_cost(&self) -> u64 {
        self.max_block_cost_clvm.saturating_mul(self.mempool_block_buffer)
    }
}

fn known_hash(hex: &str) -> Bytes32 {
    Bytes32::from_str(hex).unwrap_or_default()
}

lazy_static! {
    pub static ref MAINNET: ConsensusConstants = ConsensusConstants {
        slot_blocks_target: 32,
        min_blocks_per_challenge_block: 16,
        max_sub_slot_blocks: 128,
        num_sps_sub_slot: 64,
        sub_slot_iters_starting: 2u64.pow(27),
        difficulty_constant_factor: 2u128.pow(67),
        difficulty_starting: 7,
        difficulty_change_max_factor: 3,
        sub_epoch_blocks: 384,
        epoch_blocks: 4608,
        significant_bits: 8,
        discriminant_size_bits: 1024,
        number_zero_bits_plot_filter: 9,
        min_plot_size: 32,
        max_plot_size: 50,
        sub_slot_time_target: 600,
        num_sp_intervals_extra: 3,
        max_future_time: 5 * 60,
        number_of_timestamps: 11,
        genesis_challenge: known_hash(
            "ccd5bb71183532bff220ba46c268991a3ff07eb358e8255a65c30a2dce0e5fbb"
        ),
        agg_sig_me_additional_data: known_hash(
            "ccd5bb71183532bff220ba46c268991a3ff07eb358e8255a65c30a2dce0e5fbb"
        )
        .as_ref()
        .to_vec(),
        genesis_pre_farm_pool_puzzle_hash: known_hash(
            "d23da14695a188ae5708dd152263c4db883eb27edeb936178d4d988b8f3ce5fc"
        ),
        genesis_pre_farm_farmer_puzzle_hash: known_hash(
            "3d8765d3a597ec1d99663f6c9816d915b9f68613ac94009884c4addaefcce6af"
        ),
        max_vdf_witness_size: 64,
        mempool_block_buffer: 10,
        max_coin_amount: u64::MAX,
        max_block_cost_clvm: 11_000_000_000,
        cost_per_byte: 12_000,
        initial_freeze_period: 0,
        blocks_cache_size: 4608 + (128 * 4),
        max_block_count_per_requests: 32,
        max_generator_size: 1_000_000,
        max_generator_ref_list_size: 512,
    };
    /// Small, fast parameters for simulated chains.
    pub static ref TEST_CONSTANTS: ConsensusConstants = {
        let genesis_challenge = std_hash(b"dg full node simulator genesis");
        let anyone_can_spend = SExp::from_u64(1).tree_hash();
        ConsensusConstants {
            min_blocks_per_challenge_block: 12,
            max_sub_slot_blocks: 50,
            num_sps_sub_slot: 16,
            sub_slot_iters_starting: 2u64.pow(10),
            difficulty_constant_factor: 2u128.pow(20),
            difficulty_starting: 2u64.pow(10),
            sub_epoch_blocks: 170,
            epoch_blocks: 340,
            discriminant_size_bits: 16,
            number_zero_bits_plot_filter: 1,
            min_plot_size: 18,
            max_future_time: 3600 * 24 * 365,
            genesis_challenge,
            agg_sig_me_additional_data: genesis_challenge.as_ref().to_vec(),
            genesis_pre_farm_pool_puzzle_hash: anyone_can_spend,
            genesis_pre_farm_farmer_puzzle_hash: anyone_can_spend,
            mempool_block_buffer: 6,
            cost_per_byte: 1337,
            max_block_cost_clvm: 11_000_000_000,
            blocks_cache_size: 340 + 50 * 4,
            ..MAINNET.clone()
        }
    };
    pub static ref CONSENSUS_CONSTANTS_MAP: HashMap<String, ConsensusConstants> = HashMap::from([
        ("mainnet".to_string(), MAINNET.clone()),
        ("simulator".to_string(), TEST_CONSTANTS.clone()),
    ]);
}
