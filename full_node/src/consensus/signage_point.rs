use crate::consensus::BlockRecords;
use dg_node_core::blockchain::block_record::BlockRecord;
use dg_node_core::blockchain::class_group_element::ClassgroupElement;
use dg_node_core::blockchain::sized_bytes::Bytes32;
use dg_node_core::blockchain::subslot_bundle::SubSlotBundle;
use dg_node_core::consensus::constants::ConsensusConstants;
use dg_node_core::errors::{ErrorCode, ValidationError};
use dg_node_core::utils::Hashable;

/// Where the challenge and reward chain VDFs up to a signage point start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpVdfInfo {
    pub cc_challenge: Bytes32,
    pub rc_challenge: Bytes32,
    pub cc_input: ClassgroupElement,
    pub rc_input: ClassgroupElement,
    pub cc_iters: u64,
    pub rc_iters: u64,
}

fn missing_slot() -> ValidationError {
    ValidationError::with_message(
        ErrorCode::InvalidCcSpVdf,
        "no finished sub-slot before signage point",
    )
}

fn last_finished_challenge<R: BlockRecords + ?Sized>(
    records: &R,
    from: &BlockRecord,
) -> Result<Bytes32, ValidationError> {
    let mut curr = from;
    while !curr.first_in_sub_slot() {
        curr = records.block_record(&curr.prev_hash)?;
    }
    curr.finished_challenge_slot_hashes
        .as_ref()
        .and_then(|hashes| hashes.last())
        .copied()
        .ok_or_else(missing_slot)
}

pub fn get_signage_point_vdf_info<R: BlockRecords + ?Sized>(
    constants: &ConsensusConstants,
    finished_sub_slots: &[SubSlotBundle],
    overflow: bool,
    prev_b: Option<&BlockRecord>,
    records: &R,
    sp_total_iters: u128,
    sp_iters: u64,
) -> Result<SpVdfInfo, ValidationError> {
    let from_slot_start = |cc_challenge: Bytes32, rc_challenge: Bytes32| SpVdfInfo {
        cc_challenge,
        rc_challenge,
        cc_input: ClassgroupElement::get_default_element(),
        rc_input: ClassgroupElement::get_default_element(),
        cc_iters: sp_iters,
        rc_iters: sp_iters,
    };
    let num_slots = finished_sub_slots.len();
    if num_slots > 0 && !overflow {
        let last = &finished_sub_slots[num_slots - 1];
        return Ok(from_slot_start(
            last.challenge_chain.get_hash(),
            last.reward_chain.get_hash(),
        ));
    }
    if num_slots >= 2 && overflow {
        let second_last = &finished_sub_slots[num_slots - 2];
        return Ok(from_slot_start(
            second_last.challenge_chain.get_hash(),
            second_last.reward_chain.get_hash(),
        ));
    }
    let Some(prev_b) = prev_b else {
        return Ok(from_slot_start(
            constants.genesis_challenge,
            constants.genesis_challenge,
        ));
    };
    if num_slots == 1 {
        // Overflow block right after a new slot, the signage point sits in the slot before.
        let mut curr = prev_b;
        while !curr.first_in_sub_slot() && curr.total_iters > sp_total_iters {
            curr = records.block_record(&curr.prev_hash)?;
        }
        let (cc_input, rc_challenge, iters) = if curr.total_iters < sp_total_iters {
            (
                curr.challenge_vdf_output,
                curr.reward_infusion_new_challenge,
                u64::try_from(sp_total_iters - curr.total_iters).map_err(|_| missing_slot())?,
            )
        } else {
            (
                ClassgroupElement::get_default_element(),
                curr.finished_reward_slot_hashes
                    .as_ref()
                    .and_then(|hashes| hashes.last())
                    .copied()
                    .ok_or_else(missing_slot)?,
                sp_iters,
            )
        };
        return Ok(SpVdfInfo {
            cc_challenge: last_finished_challenge(records, curr)?,
            rc_challenge,
            cc_input,
            rc_input: ClassgroupElement::get_default_element(),
            cc_iters: iters,
            rc_iters: iters,
        });
    }

    // No new slot in this block: walk back to the slot the signage point is in,
    // remembering the last block infused before the signage point.
    let slots_needed = if overflow { 2 } else { 1 };
    let mut found: Vec<(Bytes32, Bytes32)> = vec![];
    let mut sp_pre_block: Option<&BlockRecord> = None;
    let mut curr = prev_b;
    loop {
        if sp_pre_block.is_none() && curr.total_iters < sp_total_iters {
            sp_pre_block = Some(curr);
        }
        if let (Some(cc), Some(rc)) = (
            &curr.finished_challenge_slot_hashes,
            &curr.finished_reward_slot_hashes,
        ) {
            found.extend(cc.iter().copied().zip(rc.iter().copied()).rev());
        }
        if found.len() >= slots_needed || curr.height == 0 {
            break;
        }
        curr = records.block_record(&curr.prev_hash)?;
    }
    let (cc_challenge, slot_rc_challenge) = found
        .get(slots_needed - 1)
        .copied()
        .ok_or_else(missing_slot)?;
    Ok(match sp_pre_block {
        Some(block) => {
            let iters =
                u64::try_from(sp_total_iters - block.total_iters).map_err(|_| missing_slot())?;
            SpVdfInfo {
                cc_challenge,
                rc_challenge: block.reward_infusion_new_challenge,
                cc_input: block.challenge_vdf_output,
                rc_input: ClassgroupElement::get_default_element(),
                cc_iters: iters,
                rc_iters: iters,
            }
        }
        None => from_slot_start(cc_challenge, slot_rc_challenge),
    })
}
