use dg_node_core::blockchain::block_record::BlockRecord;
use dg_node_core::consensus::constants::ConsensusConstants;
use dg_node_core::errors::{ErrorCode, ValidationError};

/// Blocks still missing before the reward chain can make a challenge block.
///
/// Counts down by one per block from `min_blocks_per_challenge_block - 1`,
/// sits at zero until the sub-slot ends and then restarts.
pub fn calculate_deficit(
    constants: &ConsensusConstants,
    height: u32,
    prev_b: Option<&BlockRecord>,
    overflow: bool,
    num_finished_sub_slots: usize,
) -> Result<u8, ValidationError> {
    let min_blocks = constants.min_blocks_per_challenge_block;
    if height == 0 {
        return Ok(min_blocks.saturating_sub(1));
    }
    let prev_b = prev_b.ok_or_else(|| {
        ValidationError::with_message(ErrorCode::InvalidDeficit, "no previous block")
    })?;
    let prev_deficit = prev_b.deficit;
    Ok(if prev_deficit == min_blocks {
        if overflow && num_finished_sub_slots == 0 {
            prev_deficit
        } else {
            prev_deficit - 1
        }
    } else if prev_deficit == 0 {
        match num_finished_sub_slots {
            0 => 0,
            1 if overflow => min_blocks,
            _ => min_blocks.saturating_sub(1),
        }
    } else {
        prev_deficit - 1
    })
}
