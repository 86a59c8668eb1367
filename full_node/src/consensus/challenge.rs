use crate::consensus::BlockRecords;
use dg_node_core::blockchain::full_block::FullBlock;
use dg_node_core::blockchain::sized_bytes::Bytes32;
use dg_node_core::consensus::constants::ConsensusConstants;
use dg_node_core::errors::{ErrorCode, ValidationError};
use dg_node_core::utils::Hashable;

/// Challenge the block's proof of space has to answer.
///
/// Overflow blocks answer the challenge of the sub-slot before the one they are infused in.
pub fn get_block_challenge<R: BlockRecords + ?Sized>(
    constants: &ConsensusConstants,
    block: &FullBlock,
    records: &R,
    genesis_block: bool,
    overflow: bool,
) -> Result<Bytes32, ValidationError> {
    if let Some(last) = block.finished_sub_slots.last() {
        return Ok(if overflow {
            last.challenge_chain.challenge_chain_end_of_slot_vdf.challenge
        } else {
            last.challenge_chain.get_hash()
        });
    }
    if genesis_block {
        return Ok(constants.genesis_challenge);
    }
    let challenges_to_look_for = if overflow { 2 } else { 1 };
    let mut reversed_challenge_hashes: Vec<Bytes32> = vec![];
    let mut curr = records.block_record(&block.prev_header_hash())?;
    loop {
        if let Some(hashes) = &curr.finished_challenge_slot_hashes {
            reversed_challenge_hashes.extend(hashes.iter().rev());
            if reversed_challenge_hashes.len() >= challenges_to_look_for {
                break;
            }
        }
        if curr.height == 0 {
            break;
        }
        curr = records.block_record(&curr.prev_hash)?;
    }
    reversed_challenge_hashes
        .get(challenges_to_look_for - 1)
        .copied()
        .ok_or_else(|| {
            ValidationError::with_message(
                ErrorCode::InvalidCcChallenge,
                "not enough finished sub-slots before block",
            )
        })
}
