use crate::consensus::deficit::calculate_deficit;
use crate::consensus::BlockRecords;
use dg_node_core::blockchain::block_record::BlockRecord;
use dg_node_core::blockchain::full_block::FullBlock;
use dg_node_core::blockchain::sized_bytes::Bytes32;
use dg_node_core::blockchain::sub_epoch_summary::SubEpochSummary;
use dg_node_core::consensus::constants::ConsensusConstants;
use dg_node_core::consensus::pot_iterations::{
    calculate_ip_iters, calculate_sp_iters, is_overflow_block,
};
use dg_node_core::errors::{ErrorCode, ValidationError};
use dg_node_core::utils::Hashable;

#[must_use]
pub fn count_significant_bits(x: u64) -> u32 {
    if x == 0 {
        0
    } else {
        64 - x.leading_zeros() - x.trailing_zeros()
    }
}

/// Zeroes everything below the top `num_significant_bits` bits.
#[must_use]
pub fn truncate_to_significant_bits(x: u64, num_significant_bits: u8) -> u64 {
    let bit_length = 64 - x.leading_zeros();
    let num_significant_bits = u32::from(num_significant_bits);
    if num_significant_bits >= bit_length {
        return x;
    }
    let lower = bit_length - num_significant_bits;
    x & !((1u64 << lower) - 1)
}

#[must_use]
pub fn height_can_be_first_in_epoch(constants: &ConsensusConstants, height: u32) -> bool {
    let sub_epoch_blocks = constants.sub_epoch_blocks.max(1);
    let epoch_blocks = constants.epoch_blocks.max(1);
    (height - (height % sub_epoch_blocks)) % epoch_blocks == 0
}

/// Whether a block at `height` allows the sub-epoch, and the epoch, to end right after it.
pub fn can_finish_sub_and_full_epoch<R: BlockRecords + ?Sized>(
    constants: &ConsensusConstants,
    records: &R,
    height: u32,
    prev_header_hash: &Bytes32,
    deficit: u8,
    block_at_height_included_ses: bool,
) -> Result<(bool, bool), ValidationError> {
    if height < constants.sub_epoch_blocks.saturating_sub(1) {
        return Ok((false, false));
    }
    if deficit > 0 || block_at_height_included_ses {
        return Ok((false, false));
    }
    if (height + 1) % constants.sub_epoch_blocks > 1 {
        let mut curr = records.block_record(prev_header_hash)?;
        while curr.height % constants.sub_epoch_blocks > 0 {
            if curr.sub_epoch_summary_included.is_some() {
                return Ok((false, false));
            }
            curr = records.block_record(&curr.prev_hash)?;
        }
        if curr.sub_epoch_summary_included.is_some() {
            return Ok((false, false));
        }
    }
    Ok((true, height_can_be_first_in_epoch(constants, height + 1)))
}

fn difficulty_error(message: String) -> ValidationError {
    ValidationError::with_message(ErrorCode::InvalidNewDifficulty, message)
}

/// Ancestors of `last` (inclusive) with heights in `[from_height, from_height + count)`, ascending.
fn blocks_in_range<'a, R: BlockRecords + ?Sized>(
    records: &'a R,
    last: &'a BlockRecord,
    from_height: u32,
    count: u32,
) -> Result<Vec<&'a BlockRecord>, ValidationError> {
    let mut found = vec![];
    let mut curr = last;
    while curr.height >= from_height {
        if curr.height < from_height.saturating_add(count) {
            found.push(curr);
        }
        if curr.height == 0 {
            break;
        }
        curr = records.block_record(&curr.prev_hash)?;
    }
    found.reverse();
    Ok(found)
}

/// The block the previous epoch's measurement window ends on.
fn second_to_last_transaction_block_in_previous_epoch<'a, R: BlockRecords + ?Sized>(
    constants: &ConsensusConstants,
    records: &'a R,
    last_b: &'a BlockRecord,
) -> Result<&'a BlockRecord, ValidationError> {
    let height_in_next_epoch = last_b.height
        + 2 * constants.max_sub_slot_blocks
        + u32::from(constants.min_blocks_per_challenge_block)
        + 5;
    let height_epoch_surpass = height_in_next_epoch - (height_in_next_epoch % constants.epoch_blocks);
    let height_prev_epoch_surpass = height_epoch_surpass
        .checked_sub(constants.epoch_blocks)
        .ok_or_else(|| difficulty_error(format!("no epoch before height {}", last_b.height)))?;
    if height_prev_epoch_surpass == 0 {
        return blocks_in_range(records, last_b, 0, 1)?
            .first()
            .copied()
            .ok_or_else(|| difficulty_error("missing genesis record".to_string()));
    }
    let from_height = height_prev_epoch_surpass
        .checked_sub(constants.max_sub_slot_blocks + 1)
        .ok_or_else(|| difficulty_error("epoch window below genesis".to_string()))?;
    let fetched = blocks_in_range(
        records,
        last_b,
        from_height,
        3 * constants.max_sub_slot_blocks + u32::from(constants.min_blocks_per_challenge_block) + 3,
    )?;
    let mut index = constants.max_sub_slot_blocks as usize;
    let fetch = |i: usize| {
        fetched
            .get(i)
            .copied()
            .ok_or_else(|| difficulty_error(format!("epoch window too short at {i}")))
    };
    let mut curr = fetch(index)?;
    index += 1;
    let mut next = fetch(index)?;
    index += 1;
    while next.sub_epoch_summary_included.is_none() {
        curr = next;
        next = fetch(index)?;
        index += 1;
    }
    let mut found_tx_blocks = u8::from(curr.is_transaction_block());
    while found_tx_blocks < 2 {
        curr = records.block_record(&curr.prev_hash)?;
        if curr.is_transaction_block() {
            found_tx_blocks += 1;
        }
    }
    Ok(curr)
}

/// Window the next epoch's difficulty and sub-slot iterations are measured over.
fn epoch_window<'a, R: BlockRecords + ?Sized>(
    constants: &ConsensusConstants,
    records: &'a R,
    prev_b: &'a BlockRecord,
    signage_point_total_iters: u128,
) -> Result<(&'a BlockRecord, &'a BlockRecord), ValidationError> {
    let last_block_prev = second_to_last_transaction_block_in_previous_epoch(constants, records, prev_b)?;
    let mut last_block_curr = prev_b;
    while last_block_curr.total_iters > signage_point_total_iters
        || !last_block_curr.is_transaction_block()
    {
        last_block_curr = records.block_record(&last_block_curr.prev_hash)?;
    }
    Ok((last_block_prev, last_block_curr))
}

fn elapsed_seconds(from: &BlockRecord, to: &BlockRecord) -> u128 {
    let from = from.timestamp.unwrap_or_default();
    let to = to.timestamp.unwrap_or_default();
    u128::from(to.saturating_sub(from).max(1))
}

#[allow(clippy::too_many_arguments)]
fn next_sub_slot_iters<R: BlockRecords + ?Sized>(
    constants: &ConsensusConstants,
    records: &R,
    prev_header_hash: &Bytes32,
    height: u32,
    curr_sub_slot_iters: u64,
    deficit: u8,
    block_at_height_included_ses: bool,
    new_slot: bool,
    signage_point_total_iters: u128,
    skip_epoch_check: bool,
) -> Result<u64, ValidationError> {
    if height + 1 < constants.epoch_blocks {
        return Ok(constants.sub_slot_iters_starting);
    }
    let prev_b = records.block_record(prev_header_hash)?;
    if !skip_epoch_check {
        let (_, can_finish_epoch) = can_finish_sub_and_full_epoch(
            constants,
            records,
            height,
            prev_header_hash,
            deficit,
            block_at_height_included_ses,
        )?;
        if !new_slot || !can_finish_epoch {
            return Ok(curr_sub_slot_iters);
        }
    }
    let (last_block_prev, last_block_curr) =
        epoch_window(constants, records, prev_b, signage_point_total_iters)?;
    let iters = last_block_curr
        .total_iters
        .saturating_sub(last_block_prev.total_iters);
    let precise = u128::from(constants.sub_slot_time_target) * iters
        / elapsed_seconds(last_block_prev, last_block_curr);
    let precise = u64::try_from(precise).unwrap_or(u64::MAX);
    let factor = u64::from(constants.difficulty_change_max_factor.max(1));
    let curr_ssi = last_block_curr.sub_slot_iters;
    let bounded = if precise >= curr_ssi {
        precise.min(curr_ssi.saturating_mul(factor))
    } else {
        precise
            .max(u64::from(constants.num_sps_sub_slot))
            .max(curr_ssi / factor)
    };
    let new_ssi = truncate_to_significant_bits(bounded, constants.significant_bits);
    Ok(new_ssi - new_ssi % u64::from(constants.num_sps_sub_slot))
}

#[allow(clippy::too_many_arguments)]
fn next_difficulty<R: BlockRecords + ?Sized>(
    constants: &ConsensusConstants,
    records: &R,
    prev_header_hash: &Bytes32,
    height: u32,
    current_difficulty: u64,
    deficit: u8,
    block_at_height_included_ses: bool,
    new_slot: bool,
    signage_point_total_iters: u128,
    skip_epoch_check: bool,
) -> Result<u64, ValidationError> {
    let first_epoch_end = constants
        .epoch_blocks
        .saturating_sub(3 * constants.max_sub_slot_blocks);
    if height + 1 < first_epoch_end {
        return Ok(constants.difficulty_starting);
    }
    let prev_b = records.block_record(prev_header_hash)?;
    if !skip_epoch_check {
        let (_, can_finish_epoch) = can_finish_sub_and_full_epoch(
            constants,
            records,
            height,
            prev_header_hash,
            deficit,
            block_at_height_included_ses,
        )?;
        if !new_slot || !can_finish_epoch {
            return Ok(current_difficulty);
        }
    }
    let (last_block_prev, last_block_curr) =
        epoch_window(constants, records, prev_b, signage_point_total_iters)?;
    let old_difficulty = if prev_b.height == 0 {
        u64::try_from(prev_b.weight).unwrap_or(u64::MAX)
    } else {
        let prev_prev = records.block_record(&prev_b.prev_hash)?;
        u64::try_from(prev_b.weight.saturating_sub(prev_prev.weight)).unwrap_or(u64::MAX)
    };
    let weight = last_block_curr.weight.saturating_sub(last_block_prev.weight);
    let precise = weight * u128::from(constants.sub_slot_time_target)
        / (u128::from(constants.slot_blocks_target.max(1))
            * elapsed_seconds(last_block_prev, last_block_curr));
    let precise = u64::try_from(precise).unwrap_or(u64::MAX);
    let factor = u64::from(constants.difficulty_change_max_factor.max(1));
    let bounded = if precise >= old_difficulty {
        precise.min(old_difficulty.saturating_mul(factor))
    } else {
        precise.max(1).max(old_difficulty / factor)
    };
    Ok(truncate_to_significant_bits(bounded, constants.significant_bits))
}

/// Sub-slot iterations and difficulty for the block after `prev_b`.
pub fn get_next_sub_slot_iters_and_difficulty<R: BlockRecords + ?Sized>(
    constants: &ConsensusConstants,
    is_first_in_sub_slot: bool,
    prev_b: Option<&BlockRecord>,
    records: &R,
) -> Result<(u64, u64), ValidationError> {
    let Some(prev_b) = prev_b else {
        return Ok((
            constants.sub_slot_iters_starting,
            constants.difficulty_starting,
        ));
    };
    let prev_difficulty = if prev_b.height == 0 {
        prev_b.weight
    } else {
        prev_b
            .weight
            .saturating_sub(records.block_record(&prev_b.prev_hash)?.weight)
    };
    let prev_difficulty = u64::try_from(prev_difficulty).unwrap_or(u64::MAX);
    if prev_b.sub_epoch_summary_included.is_some() {
        return Ok((prev_b.sub_slot_iters, prev_difficulty));
    }
    let sp_total_iters = prev_b
        .sp_total_iters(constants)
        .map_err(|e| difficulty_error(e.to_string()))?;
    let difficulty = next_difficulty(
        constants,
        records,
        &prev_b.prev_hash,
        prev_b.height,
        prev_difficulty,
        prev_b.deficit,
        false,
        is_first_in_sub_slot,
        sp_total_iters,
        false,
    )?;
    let sub_slot_iters = next_sub_slot_iters(
        constants,
        records,
        &prev_b.prev_hash,
        prev_b.height,
        prev_b.sub_slot_iters,
        prev_b.deficit,
        false,
        is_first_in_sub_slot,
        sp_total_iters,
        false,
    )?;
    Ok((sub_slot_iters, difficulty))
}

/// Summary of the sub-epoch before the one that just ended, included at `blocks_included_height`.
pub fn make_sub_epoch_summary<R: BlockRecords + ?Sized>(
    constants: &ConsensusConstants,
    records: &R,
    blocks_included_height: u32,
    prev_prev_block: &BlockRecord,
    new_difficulty: Option<u64>,
    new_sub_slot_iters: Option<u64>,
) -> Result<SubEpochSummary, ValidationError> {
    if (blocks_included_height + constants.max_sub_slot_blocks) / constants.sub_epoch_blocks <= 1 {
        return Ok(SubEpochSummary {
            prev_subepoch_summary_hash: constants.genesis_challenge,
            reward_chain_hash: constants.genesis_challenge,
            num_blocks_overflow: 0,
            new_difficulty: None,
            new_sub_slot_iters: None,
        });
    }
    let mut curr = prev_prev_block;
    let ses = loop {
        if let Some(ses) = &curr.sub_epoch_summary_included {
            break ses;
        }
        curr = records.block_record(&curr.prev_hash)?;
    };
    let reward_chain_hash = curr
        .finished_reward_slot_hashes
        .as_ref()
        .and_then(|hashes| hashes.last())
        .copied()
        .ok_or_else(|| {
            ValidationError::with_message(
                ErrorCode::InvalidSubEpochSummary,
                "summary block has no finished reward slot",
            )
        })?;
    Ok(SubEpochSummary {
        prev_subepoch_summary_hash: ses.get_hash(),
        reward_chain_hash,
        num_blocks_overflow: (curr.height % constants.sub_epoch_blocks) as u8,
        new_difficulty,
        new_sub_slot_iters,
    })
}

/// The summary the block after `block` has to include, if any.
pub fn next_sub_epoch_summary<R: BlockRecords + ?Sized>(
    constants: &ConsensusConstants,
    records: &R,
    required_iters: u64,
    block: &FullBlock,
) -> Result<Option<SubEpochSummary>, ValidationError> {
    if block.height() == 0 {
        return Ok(None);
    }
    let prev_b = records.block_record(&block.prev_header_hash())?;
    let is_first_in_sub_slot = block.first_in_sub_slot();
    let (sub_slot_iters, _) =
        get_next_sub_slot_iters_and_difficulty(constants, is_first_in_sub_slot, Some(prev_b), records)?;
    let signage_point_index = block.reward_chain_block.signage_point_index;
    let overflow = is_overflow_block(constants, signage_point_index)
        .map_err(|e| ValidationError::with_message(ErrorCode::InvalidSpIndex, e.to_string()))?;
    if block
        .finished_sub_slots
        .first()
        .is_some_and(|ss| ss.challenge_chain.subepoch_summary_hash.is_some())
    {
        return Ok(None);
    }
    let deficit = calculate_deficit(
        constants,
        prev_b.height + 1,
        Some(prev_b),
        overflow,
        block.finished_sub_slots.len(),
    )?;
    let (can_finish_se, can_finish_epoch) = can_finish_sub_and_full_epoch(
        constants,
        records,
        prev_b.height + 1,
        &prev_b.header_hash,
        deficit,
        false,
    )?;
    if !can_finish_se {
        return Ok(None);
    }
    let mut next_difficulty_value = None;
    let mut next_sub_slot_iters_value = None;
    if can_finish_epoch {
        let iters_error = |e: std::io::Error| {
            ValidationError::with_message(ErrorCode::InvalidRequiredIters, e.to_string())
        };
        let sp_iters = calculate_sp_iters(constants, sub_slot_iters, signage_point_index)
            .map_err(iters_error)?;
        let ip_iters =
            calculate_ip_iters(constants, sub_slot_iters, signage_point_index, required_iters)
                .map_err(iters_error)?;
        let sp_total_iters = (block.total_iters() + u128::from(sp_iters))
            .saturating_sub(u128::from(ip_iters))
            .saturating_sub(if overflow { u128::from(sub_slot_iters) } else { 0 });
        let block_difficulty =
            u64::try_from(block.weight().saturating_sub(prev_b.weight)).unwrap_or(u64::MAX);
        next_difficulty_value = Some(next_difficulty(
            constants,
            records,
            &block.prev_header_hash(),
            block.height(),
            block_difficulty,
            deficit,
            false,
            true,
            sp_total_iters,
            true,
        )?);
        next_sub_slot_iters_value = Some(next_sub_slot_iters(
            constants,
            records,
            &block.prev_header_hash(),
            block.height(),
            sub_slot_iters,
            deficit,
            false,
            true,
            sp_total_iters,
            true,
        )?);
    }
    make_sub_epoch_summary(
        constants,
        records,
        block.height() + 2,
        prev_b,
        next_difficulty_value,
        next_sub_slot_iters_value,
    )
    .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dg_node_core::consensus::constants::TEST_CONSTANTS;

    #[test]
    fn test_truncate_to_significant_bits() {
        assert_eq!(truncate_to_significant_bits(0b1011_0111, 3), 0b1010_0000);
        assert_eq!(truncate_to_significant_bits(0b101, 8), 0b101);
        assert_eq!(truncate_to_significant_bits(0, 8), 0);
        assert_eq!(count_significant_bits(0b1011_0000), 4);
        assert_eq!(count_significant_bits(truncate_to_significant_bits(u64::MAX, 8)), 8);
    }

    #[test]
    fn test_epoch_boundaries() {
        let constants = &*TEST_CONSTANTS;
        assert!(height_can_be_first_in_epoch(constants, 0));
        assert!(height_can_be_first_in_epoch(constants, constants.epoch_blocks));
        assert!(height_can_be_first_in_epoch(constants, constants.epoch_blocks + 3));
        assert!(!height_can_be_first_in_epoch(constants, constants.sub_epoch_blocks));
    }
}
