use crate::consensus::deficit::calculate_deficit;
use crate::consensus::difficulty::{get_next_sub_slot_iters_and_difficulty, make_sub_epoch_summary};
use crate::consensus::BlockRecords;
use dg_node_core::blockchain::block_record::BlockRecord;
use dg_node_core::blockchain::challenge_block_info::ChallengeBlockInfo;
use dg_node_core::blockchain::full_block::FullBlock;
use dg_node_core::blockchain::sized_bytes::Bytes32;
use dg_node_core::consensus::constants::ConsensusConstants;
use dg_node_core::consensus::pot_iterations::is_overflow_block;
use dg_node_core::errors::{ErrorCode, ValidationError};
use dg_node_core::utils::Hashable;

/// Derives the in-memory record of a block whose header already validated.
///
/// `sub_slot_iters` may be passed when the caller already computed it for the block.
pub fn block_to_block_record<R: BlockRecords + ?Sized>(
    constants: &ConsensusConstants,
    records: &R,
    required_iters: u64,
    block: &FullBlock,
    sub_slot_iters: Option<u64>,
) -> Result<BlockRecord, ValidationError> {
    let prev_b = records.try_block_record(&block.prev_header_hash());
    if block.height() > 0 && prev_b.is_none() {
        return Err(ValidationError::with_message(
            ErrorCode::ExtendsUnknownBlock,
            format!("missing previous block {}", block.prev_header_hash()),
        ));
    }
    let sub_slot_iters = match sub_slot_iters {
        Some(ssi) => ssi,
        None => {
            get_next_sub_slot_iters_and_difficulty(
                constants,
                block.first_in_sub_slot(),
                prev_b,
                records,
            )?
            .0
        }
    };
    let rcb = &block.reward_chain_block;
    let overflow = is_overflow_block(constants, rcb.signage_point_index)
        .map_err(|e| ValidationError::with_message(ErrorCode::InvalidSpIndex, e.to_string()))?;
    let deficit = calculate_deficit(
        constants,
        block.height(),
        prev_b,
        overflow,
        block.finished_sub_slots.len(),
    )?;

    let found_ses_hash = block
        .finished_sub_slots
        .iter()
        .filter_map(|ss| ss.challenge_chain.subepoch_summary_hash)
        .last();
    let sub_epoch_summary_included = match (found_ses_hash, prev_b) {
        (Some(found), Some(prev_b)) => {
            let prev_prev = records.block_record(&prev_b.prev_hash)?;
            let first_cc = &block.finished_sub_slots[0].challenge_chain;
            let ses = make_sub_epoch_summary(
                constants,
                records,
                block.height(),
                prev_prev,
                first_cc.new_difficulty,
                first_cc.new_sub_slot_iters,
            )?;
            if ses.get_hash() != found {
                return Err(ValidationError::with_message(
                    ErrorCode::InvalidSubEpochSummary,
                    format!("summary hash {found} does not match the chain"),
                ));
            }
            Some(ses)
        }
        (Some(_), None) => {
            return Err(ValidationError::with_message(
                ErrorCode::InvalidSubEpochSummary,
                "genesis block cannot include a sub-epoch summary",
            ))
        }
        _ => None,
    };

    let mut prev_transaction_block_height = 0;
    let mut curr = prev_b;
    while let Some(record) = curr {
        if record.is_transaction_block() {
            prev_transaction_block_height = record.height;
            break;
        }
        curr = records.try_block_record(&record.prev_hash);
    }

    let (finished_challenge_slot_hashes, finished_infused_challenge_slot_hashes, finished_reward_slot_hashes) =
        if block.first_in_sub_slot() {
            let icc: Vec<Bytes32> = block
                .finished_sub_slots
                .iter()
                .filter_map(|ss| ss.infused_challenge_chain.as_ref().map(Hashable::get_hash))
                .collect();
            (
                Some(
                    block
                        .finished_sub_slots
                        .iter()
                        .map(|ss| ss.challenge_chain.get_hash())
                        .collect(),
                ),
                (!icc.is_empty()).then_some(icc),
                Some(
                    block
                        .finished_sub_slots
                        .iter()
                        .map(|ss| ss.reward_chain.get_hash())
                        .collect(),
                ),
            )
        } else if block.height() == 0 {
            (
                Some(vec![constants.genesis_challenge]),
                None,
                Some(vec![constants.genesis_challenge]),
            )
        } else {
            (None, None, None)
        };

    let foliage_block_data = &block.foliage.foliage_block_data;
    Ok(BlockRecord {
        header_hash: block.header_hash(),
        prev_hash: block.prev_header_hash(),
        height: block.height(),
        weight: block.weight(),
        total_iters: block.total_iters(),
        signage_point_index: rcb.signage_point_index,
        challenge_vdf_output: rcb.challenge_chain_ip_vdf.output,
        infused_challenge_vdf_output: rcb
            .infused_challenge_chain_ip_vdf
            .as_ref()
            .map(|vdf| vdf.output),
        reward_infusion_new_challenge: rcb.get_hash(),
        challenge_block_info_hash: ChallengeBlockInfo::from(rcb).get_hash(),
        sub_slot_iters,
        pool_puzzle_hash: foliage_block_data.pool_target.puzzle_hash,
        farmer_puzzle_hash: foliage_block_data.farmer_reward_puzzle_hash,
        required_iters,
        deficit,
        overflow,
        prev_transaction_block_height,
        timestamp: block.foliage_transaction_block.as_ref().map(|ftb| ftb.timestamp),
        prev_transaction_block_hash: block
            .foliage_transaction_block
            .as_ref()
            .map(|ftb| ftb.prev_transaction_block_hash),
        fees: block.transactions_info.as_ref().map(|ti| ti.fees),
        reward_claims_incorporated: block
            .transactions_info
            .as_ref()
            .map(|ti| ti.reward_claims_incorporated.clone()),
        finished_challenge_slot_hashes,
        finished_infused_challenge_slot_hashes,
        finished_reward_slot_hashes,
        sub_epoch_summary_included,
    })
}
