use crate::consensus::challenge::get_block_challenge;
use crate::consensus::deficit::calculate_deficit;
use crate::consensus::difficulty::{can_finish_sub_and_full_epoch, make_sub_epoch_summary};
use crate::consensus::signage_point::get_signage_point_vdf_info;
use crate::consensus::BlockRecords;
use dg_node_core::blockchain::block_record::BlockRecord;
use dg_node_core::blockchain::class_group_element::ClassgroupElement;
use dg_node_core::blockchain::full_block::FullBlock;
use dg_node_core::blockchain::sized_bytes::{Bytes32, Bytes48, Bytes96};
use dg_node_core::blockchain::vdf_info::VdfInfo;
use dg_node_core::blockchain::vdf_proof::VdfProof;
use dg_node_core::bls::verify_bytes;
use dg_node_core::consensus::constants::ConsensusConstants;
use dg_node_core::consensus::pot_iterations::{
    calculate_ip_iters, calculate_iterations_quality, calculate_sp_interval_iters,
    calculate_sp_iters, is_overflow_block,
};
use dg_node_core::consensus::verifier::ProofVerifier;
use dg_node_core::errors::{ErrorCode, ValidationError};
use dg_node_core::utils::{now_unix_secs, Hashable};
use dg_node_serialize::Streamable;
use log::{debug, error};
use std::io::Error;

/// Proof and signature checks, all of which are skipped when the block was already
/// checked in pre-validation.
struct Checks<'a> {
    constants: &'a ConsensusConstants,
    verifier: &'a dyn ProofVerifier,
    skip_expensive: bool,
}
impl Checks<'_> {
    fn vdf(
        &self,
        proof: &VdfProof,
        input: &ClassgroupElement,
        info: &VdfInfo,
        target: Option<&VdfInfo>,
    ) -> bool {
        if target.is_some_and(|target| target != info) {
            return false;
        }
        self.skip_expensive || proof.is_valid(self.constants, self.verifier, input, info, None)
    }

    /// A proof that may have been recomputed from the identity element, in which case it
    /// covers the whole of `full` instead of `partial`.
    fn partial_vdf(
        &self,
        proof: &VdfProof,
        input: &ClassgroupElement,
        partial: &VdfInfo,
        full: &VdfInfo,
    ) -> bool {
        if proof.normalized_to_identity {
            self.vdf(proof, &ClassgroupElement::get_default_element(), full, None)
        } else {
            self.vdf(proof, input, partial, None)
        }
    }

    fn signature(&self, public_key: &Bytes48, message: &[u8], signature: &Bytes96) -> bool {
        self.skip_expensive || verify_bytes(public_key, message, signature)
    }
}

fn iters_error(code: ErrorCode) -> impl Fn(Error) -> ValidationError {
    move |e| ValidationError::with_message(code, e.to_string())
}

fn first_in_slot<'a, R: BlockRecords + ?Sized>(
    records: &'a R,
    from: &'a BlockRecord,
) -> Result<&'a BlockRecord, ValidationError> {
    let mut curr = from;
    while !curr.first_in_sub_slot() {
        curr = records.block_record(&curr.prev_hash)?;
    }
    Ok(curr)
}

fn last_of(hashes: Option<&Vec<Bytes32>>, code: ErrorCode) -> Result<Bytes32, ValidationError> {
    hashes
        .and_then(|hashes| hashes.last())
        .copied()
        .ok_or_else(|| ValidationError::new(code))
}

/// Everything checked about a block before its infusion point is known.
struct Unfinished {
    required_iters: u64,
    overflow: bool,
}

#[allow(clippy::too_many_lines)]
fn validate_unfinished_header<R: BlockRecords + ?Sized>(
    checks: &Checks<'_>,
    records: &R,
    block: &FullBlock,
    expected_difficulty: u64,
    expected_sub_slot_iters: u64,
) -> Result<Unfinished, ValidationError> {
    let constants = checks.constants;
    let rcb = &block.reward_chain_block;
    let prev_b = records.try_block_record(&block.prev_header_hash());
    let genesis_block = prev_b.is_none();
    if genesis_block && block.prev_header_hash() != constants.genesis_challenge {
        return Err(ValidationError::with_message(
            ErrorCode::InvalidPrevBlockHash,
            "unknown previous block",
        ));
    }
    if u32::from(rcb.signage_point_index) >= constants.num_sps_sub_slot {
        return Err(ErrorCode::InvalidSpIndex.into());
    }
    let overflow = is_overflow_block(constants, rcb.signage_point_index)
        .map_err(iters_error(ErrorCode::InvalidSpIndex))?;
    let finished_sub_slots = &block.finished_sub_slots;
    let new_sub_slot = !finished_sub_slots.is_empty();
    let min_blocks = constants.min_blocks_per_challenge_block;

    let (height, can_finish_se, can_finish_epoch) = match prev_b {
        None => (0, false, false),
        Some(prev_b) if new_sub_slot => {
            let (se, epoch) = can_finish_sub_and_full_epoch(
                constants,
                records,
                prev_b.height,
                &prev_b.prev_hash,
                prev_b.deficit,
                prev_b.sub_epoch_summary_included.is_some(),
            )?;
            (prev_b.height + 1, se, epoch)
        }
        Some(prev_b) => (prev_b.height + 1, false, false),
    };

    // Sub-slots finished since the previous block.
    let mut ses_hash: Option<Bytes32> = None;
    for (n, sub_slot) in finished_sub_slots.iter().enumerate() {
        let challenge_hash = sub_slot.challenge_chain.challenge_chain_end_of_slot_vdf.challenge;
        let expected_challenge = match (n, prev_b) {
            (0, None) => constants.genesis_challenge,
            (0, Some(prev_b)) => last_of(
                first_in_slot(records, prev_b)?
                    .finished_challenge_slot_hashes
                    .as_ref(),
                ErrorCode::InvalidPrevChallengeSlotHash,
            )?,
            _ => finished_sub_slots[n - 1].challenge_chain.get_hash(),
        };
        if challenge_hash != expected_challenge {
            return Err(ErrorCode::InvalidPrevChallengeSlotHash.into());
        }

        match prev_b {
            None => {
                if sub_slot.infused_challenge_chain.is_some() {
                    return Err(ErrorCode::ShouldNotHaveIcc.into());
                }
            }
            Some(prev_b) => {
                // (challenge, committed iters, proof iters, input)
                let mut icc: Option<(Bytes32, u64, u64, ClassgroupElement)> = None;
                if prev_b.deficit < min_blocks {
                    if n == 0 {
                        let mut curr = prev_b;
                        while !curr.is_challenge_block(constants) && !curr.first_in_sub_slot() {
                            curr = records.block_record(&curr.prev_hash)?;
                        }
                        let prev_ip_iters = prev_b
                            .ip_iters(constants)
                            .map_err(iters_error(ErrorCode::InvalidIccEosVdf))?;
                        let (challenge, committed) = if curr.is_challenge_block(constants) {
                            let curr_ip_iters = curr
                                .ip_iters(constants)
                                .map_err(iters_error(ErrorCode::InvalidIccEosVdf))?;
                            (
                                curr.challenge_block_info_hash,
                                prev_b.sub_slot_iters - curr_ip_iters,
                            )
                        } else {
                            (
                                last_of(
                                    curr.finished_infused_challenge_slot_hashes.as_ref(),
                                    ErrorCode::ShouldNotHaveIcc,
                                )?,
                                prev_b.sub_slot_iters,
                            )
                        };
                        let input = if prev_b.is_challenge_block(constants) {
                            ClassgroupElement::get_default_element()
                        } else {
                            prev_b
                                .infused_challenge_vdf_output
                                .ok_or_else(|| ValidationError::new(ErrorCode::InvalidIccEosVdf))?
                        };
                        icc = Some((
                            challenge,
                            committed,
                            prev_b.sub_slot_iters - prev_ip_iters,
                            input,
                        ));
                    } else {
                        let prev_ss = &finished_sub_slots[n - 1];
                        if prev_ss.reward_chain.deficit < min_blocks {
                            let prev_icc = prev_ss
                                .infused_challenge_chain
                                .as_ref()
                                .ok_or_else(|| ValidationError::new(ErrorCode::ShouldHaveIcc))?;
                            icc = Some((
                                prev_icc.get_hash(),
                                prev_b.sub_slot_iters,
                                prev_b.sub_slot_iters,
                                ClassgroupElement::get_default_element(),
                            ));
                        }
                    }
                }
                match (&sub_slot.infused_challenge_chain, icc) {
                    (Some(_), None) => return Err(ErrorCode::ShouldNotHaveIcc.into()),
                    (None, Some(_)) => return Err(ErrorCode::ShouldHaveIcc.into()),
                    (Some(icc_sub_slot), Some((challenge, committed, proof_iters, input))) => {
                        let eos = &icc_sub_slot.infused_challenge_chain_end_of_slot_vdf;
                        let partial = VdfInfo {
                            challenge,
                            number_of_iterations: proof_iters,
                            output: eos.output,
                        };
                        let committed_info = VdfInfo {
                            number_of_iterations: committed,
                            ..partial.clone()
                        };
                        if *eos != committed_info {
                            return Err(ErrorCode::InvalidIccEosVdf.into());
                        }
                        let proof = sub_slot
                            .proofs
                            .infused_challenge_chain_slot_proof
                            .as_ref()
                            .ok_or_else(|| ValidationError::new(ErrorCode::InvalidIccEosVdf))?;
                        if !checks.partial_vdf(proof, &input, &partial, eos) {
                            return Err(ErrorCode::InvalidIccEosVdf.into());
                        }
                        let icc_hash = icc_sub_slot.get_hash();
                        if sub_slot.reward_chain.deficit == min_blocks {
                            if sub_slot.challenge_chain.infused_challenge_chain_sub_slot_hash
                                != Some(icc_hash)
                            {
                                return Err(ErrorCode::InvalidIccHashCc.into());
                            }
                        } else if sub_slot
                            .challenge_chain
                            .infused_challenge_chain_sub_slot_hash
                            .is_some()
                        {
                            return Err(ErrorCode::InvalidIccHashCc.into());
                        }
                        if sub_slot.reward_chain.infused_challenge_chain_sub_slot_hash
                            != Some(icc_hash)
                        {
                            return Err(ErrorCode::InvalidIccHashRc.into());
                        }
                    }
                    (None, None) => {
                        if sub_slot
                            .challenge_chain
                            .infused_challenge_chain_sub_slot_hash
                            .is_some()
                        {
                            return Err(ErrorCode::InvalidIccHashCc.into());
                        }
                        if sub_slot
                            .reward_chain
                            .infused_challenge_chain_sub_slot_hash
                            .is_some()
                        {
                            return Err(ErrorCode::InvalidIccHashRc.into());
                        }
                    }
                }
            }
        }

        if let Some(hash) = sub_slot.challenge_chain.subepoch_summary_hash {
            if n != 0 || ses_hash.is_some() {
                return Err(ErrorCode::InvalidSubEpochSummaryHash.into());
            }
            ses_hash = Some(hash);
        }
        if can_finish_epoch && sub_slot.challenge_chain.subepoch_summary_hash.is_some() {
            if sub_slot.challenge_chain.new_sub_slot_iters != Some(expected_sub_slot_iters) {
                return Err(ErrorCode::InvalidNewSubSlotIters.into());
            }
            if sub_slot.challenge_chain.new_difficulty != Some(expected_difficulty) {
                return Err(ErrorCode::InvalidNewDifficulty.into());
            }
        } else {
            if sub_slot.challenge_chain.new_sub_slot_iters.is_some() {
                return Err(ErrorCode::InvalidNewSubSlotIters.into());
            }
            if sub_slot.challenge_chain.new_difficulty.is_some() {
                return Err(ErrorCode::InvalidNewDifficulty.into());
            }
        }
        if sub_slot.challenge_chain.get_hash() != sub_slot.reward_chain.challenge_chain_sub_slot_hash {
            return Err(ValidationError::with_message(
                ErrorCode::InvalidChallengeSlotHashRc,
                "sub-slot hash in reward sub-slot mismatch",
            ));
        }

        let mut eos_vdf_iters = expected_sub_slot_iters;
        let mut cc_start_element = ClassgroupElement::get_default_element();
        let (rc_eos_challenge, cc_eos_info_iters) = match (n, prev_b) {
            (0, None) => (constants.genesis_challenge, constants.sub_slot_iters_starting),
            (_, None) => (
                finished_sub_slots[n - 1].reward_chain.get_hash(),
                constants.sub_slot_iters_starting,
            ),
            (0, Some(prev_b)) => {
                eos_vdf_iters = prev_b.sub_slot_iters
                    - prev_b
                        .ip_iters(constants)
                        .map_err(iters_error(ErrorCode::InvalidRcEosVdf))?;
                cc_start_element = prev_b.challenge_vdf_output;
                (prev_b.reward_infusion_new_challenge, prev_b.sub_slot_iters)
            }
            (_, Some(_)) => (
                finished_sub_slots[n - 1].reward_chain.get_hash(),
                expected_sub_slot_iters,
            ),
        };
        let rc_target = VdfInfo {
            challenge: rc_eos_challenge,
            number_of_iterations: eos_vdf_iters,
            output: sub_slot.reward_chain.end_of_slot_vdf.output,
        };
        if !checks.vdf(
            &sub_slot.proofs.reward_chain_slot_proof,
            &ClassgroupElement::get_default_element(),
            &sub_slot.reward_chain.end_of_slot_vdf,
            Some(&rc_target),
        ) {
            return Err(ErrorCode::InvalidRcEosVdf.into());
        }
        let cc_eos = &sub_slot.challenge_chain.challenge_chain_end_of_slot_vdf;
        let partial_cc = VdfInfo {
            challenge: challenge_hash,
            number_of_iterations: eos_vdf_iters,
            output: cc_eos.output,
        };
        if *cc_eos
            != (VdfInfo {
                number_of_iterations: cc_eos_info_iters,
                ..partial_cc.clone()
            })
        {
            return Err(ValidationError::with_message(
                ErrorCode::InvalidCcEosVdf,
                "wrong challenge chain end of slot vdf",
            ));
        }
        if !checks.partial_vdf(
            &sub_slot.proofs.challenge_chain_slot_proof,
            &cc_start_element,
            &partial_cc,
            cc_eos,
        ) {
            return Err(ErrorCode::InvalidCcEosVdf.into());
        }

        let expected_deficit = match prev_b {
            None => min_blocks,
            Some(prev_b) if prev_b.deficit == 0 => min_blocks,
            Some(prev_b) => prev_b.deficit,
        };
        if sub_slot.reward_chain.deficit != expected_deficit {
            return Err(ValidationError::with_message(
                ErrorCode::InvalidDeficit,
                format!(
                    "expected deficit {expected_deficit} at slot end, got {}",
                    sub_slot.reward_chain.deficit
                ),
            ));
        }
    }

    // Sub-epoch summary, which summarizes the sub-epoch before the one that just ended.
    match (ses_hash, prev_b) {
        (Some(_), None) => {
            return Err(ValidationError::with_message(
                ErrorCode::InvalidSubEpochSummaryHash,
                "genesis with sub-epoch summary hash",
            ))
        }
        (Some(ses_hash), Some(prev_b)) => {
            if !can_finish_se {
                return Err(ValidationError::with_message(
                    ErrorCode::InvalidSubEpochSummaryHash,
                    "block does not finish a sub-epoch",
                ));
            }
            let expected = make_sub_epoch_summary(
                constants,
                records,
                height,
                records.block_record(&prev_b.prev_hash)?,
                can_finish_epoch.then_some(expected_difficulty),
                can_finish_epoch.then_some(expected_sub_slot_iters),
            )?;
            if expected.get_hash() != ses_hash {
                error!("Expected sub-epoch summary {expected:?}");
                return Err(ValidationError::with_message(
                    ErrorCode::InvalidSubEpochSummary,
                    format!("expected ses hash {} got {ses_hash}", expected.get_hash()),
                ));
            }
        }
        (None, Some(_)) if new_sub_slot && (can_finish_se || can_finish_epoch) => {
            return Err(ValidationError::with_message(
                ErrorCode::InvalidSubEpochSummary,
                "block finishes sub-epoch but has no summary",
            ));
        }
        _ => {}
    }

    if let (false, Some(prev_b)) = (new_sub_slot, prev_b) {
        let mut num_blocks = 2u32;
        let mut curr = prev_b;
        while !curr.first_in_sub_slot() {
            num_blocks += 1;
            curr = records.block_record(&curr.prev_hash)?;
        }
        if num_blocks > constants.max_sub_slot_blocks {
            return Err(ErrorCode::TooManyBlocks.into());
        }
    }

    let challenge = get_block_challenge(constants, block, records, genesis_block, overflow)?;
    if challenge != rcb.pos_ss_cc_challenge_hash {
        debug!(
            "Block {} answers {} instead of {challenge}",
            block.header_hash(),
            rcb.pos_ss_cc_challenge_hash
        );
        return Err(ErrorCode::InvalidCcChallenge.into());
    }
    let cc_sp_hash = match &rcb.challenge_chain_sp_vdf {
        None => challenge,
        Some(vdf) => vdf.output.get_hash(),
    };
    let quality_string = rcb
        .proof_of_space
        .verify_and_get_quality_string(constants, checks.verifier, &challenge, &cc_sp_hash)
        .ok_or_else(|| ValidationError::new(ErrorCode::InvalidPospace))?;

    let required_iters = calculate_iterations_quality(
        constants.difficulty_constant_factor,
        &quality_string,
        rcb.proof_of_space.size,
        expected_difficulty,
        &cc_sp_hash,
    );
    let sp_interval_iters = calculate_sp_interval_iters(constants, expected_sub_slot_iters)
        .map_err(iters_error(ErrorCode::InvalidRequiredIters))?;
    if required_iters >= sp_interval_iters {
        return Err(ErrorCode::InvalidRequiredIters.into());
    }
    if (rcb.signage_point_index == 0) != rcb.challenge_chain_sp_vdf.is_none()
        || (rcb.signage_point_index == 0) != rcb.reward_chain_sp_vdf.is_none()
    {
        return Err(ErrorCode::InvalidSpIndex.into());
    }
    let sp_iters = calculate_sp_iters(constants, expected_sub_slot_iters, rcb.signage_point_index)
        .map_err(iters_error(ErrorCode::InvalidSpIndex))?;
    let ip_iters = calculate_ip_iters(
        constants,
        expected_sub_slot_iters,
        rcb.signage_point_index,
        required_iters,
    )
    .map_err(iters_error(ErrorCode::InvalidRequiredIters))?;

    if overflow && can_finish_epoch && finished_sub_slots.len() < 2 {
        return Err(ErrorCode::NoOverflowsInFirstSubSlotNewEpoch.into());
    }

    let slot_start_iters = match prev_b {
        None => u128::from(expected_sub_slot_iters) * finished_sub_slots.len() as u128,
        Some(prev_b) => {
            let prev_ip_iters = u128::from(
                prev_b
                    .ip_iters(constants)
                    .map_err(iters_error(ErrorCode::InvalidTotalIters))?,
            );
            if new_sub_slot {
                prev_b.total_iters + u128::from(prev_b.sub_slot_iters) - prev_ip_iters
                    + u128::from(expected_sub_slot_iters) * (finished_sub_slots.len() as u128 - 1)
            } else {
                prev_b.total_iters - prev_ip_iters
            }
        }
    };
    let total_iters = slot_start_iters + u128::from(ip_iters);
    if total_iters != rcb.total_iters {
        return Err(ValidationError::with_message(
            ErrorCode::InvalidTotalIters,
            format!("expected {total_iters} got {}", rcb.total_iters),
        ));
    }
    let sp_total_iters = (slot_start_iters + u128::from(sp_iters))
        .checked_sub(if overflow {
            u128::from(expected_sub_slot_iters)
        } else {
            0
        })
        .ok_or_else(|| ValidationError::new(ErrorCode::InvalidTotalIters))?;

    let sp_info = get_signage_point_vdf_info(
        constants,
        finished_sub_slots,
        overflow,
        prev_b,
        records,
        sp_total_iters,
        sp_iters,
    )?;
    let plot_key = &rcb.proof_of_space.plot_public_key;

    let rc_sp_hash = if sp_iters != 0 {
        let (Some(rc_sp_vdf), Some(rc_sp_proof)) = (&rcb.reward_chain_sp_vdf, &block.reward_chain_sp_proof)
        else {
            return Err(ErrorCode::InvalidRcSpVdf.into());
        };
        let target = VdfInfo {
            challenge: sp_info.rc_challenge,
            number_of_iterations: sp_info.rc_iters,
            output: rc_sp_vdf.output,
        };
        if !checks.vdf(rc_sp_proof, &sp_info.rc_input, rc_sp_vdf, Some(&target)) {
            return Err(ErrorCode::InvalidRcSpVdf.into());
        }
        rc_sp_vdf.output.get_hash()
    } else {
        if rcb.reward_chain_sp_vdf.is_some() {
            return Err(ErrorCode::InvalidRcSpVdf.into());
        }
        match (finished_sub_slots.last(), prev_b) {
            (Some(last), _) => last.reward_chain.get_hash(),
            (None, None) => constants.genesis_challenge,
            (None, Some(prev_b)) => last_of(
                first_in_slot(records, prev_b)?
                    .finished_reward_slot_hashes
                    .as_ref(),
                ErrorCode::InvalidRcSpVdf,
            )?,
        }
    };
    if !checks.signature(plot_key, rc_sp_hash.as_ref(), &rcb.reward_chain_sp_signature) {
        return Err(ErrorCode::InvalidRcSignature.into());
    }

    if sp_iters != 0 {
        let (Some(cc_sp_vdf), Some(cc_sp_proof)) =
            (&rcb.challenge_chain_sp_vdf, &block.challenge_chain_sp_proof)
        else {
            return Err(ErrorCode::InvalidCcSpVdf.into());
        };
        let partial = VdfInfo {
            challenge: sp_info.cc_challenge,
            number_of_iterations: sp_info.cc_iters,
            output: cc_sp_vdf.output,
        };
        let committed = VdfInfo {
            number_of_iterations: sp_iters,
            ..partial.clone()
        };
        if *cc_sp_vdf != committed {
            return Err(ErrorCode::InvalidCcSpVdf.into());
        }
        if !checks.partial_vdf(cc_sp_proof, &sp_info.cc_input, &partial, cc_sp_vdf) {
            return Err(ErrorCode::InvalidCcSpVdf.into());
        }
    } else if rcb.challenge_chain_sp_vdf.is_some() {
        return Err(ErrorCode::InvalidCcSpVdf.into());
    }
    if !checks.signature(plot_key, cc_sp_hash.as_ref(), &rcb.challenge_chain_sp_signature) {
        return Err(ValidationError::with_message(
            ErrorCode::InvalidCcSignature,
            "invalid cc sp sig",
        ));
    }

    let foliage = &block.foliage;
    match prev_b {
        None => {
            if foliage.foliage_transaction_block_hash.is_none() {
                return Err(ValidationError::with_message(
                    ErrorCode::InvalidIsTransactionBlock,
                    "genesis must be a transaction block",
                ));
            }
        }
        Some(prev_b) => {
            let mut curr = prev_b;
            while !curr.is_transaction_block() {
                curr = records.block_record(&curr.prev_hash)?;
            }
            let should_be_tx_block = sp_total_iters > curr.total_iters;
            if should_be_tx_block != foliage.foliage_transaction_block_hash.is_some()
                || should_be_tx_block != foliage.foliage_transaction_block_signature.is_some()
            {
                return Err(ErrorCode::InvalidIsTransactionBlock.into());
            }
        }
    }

    let foliage_block_data = &foliage.foliage_block_data;
    if !checks.signature(
        plot_key,
        foliage_block_data.get_hash().as_ref(),
        &foliage.foliage_block_data_signature,
    ) {
        return Err(ErrorCode::InvalidPlotSignature.into());
    }
    if let Some(ftb_hash) = &foliage.foliage_transaction_block_hash {
        let signature = foliage
            .foliage_transaction_block_signature
            .as_ref()
            .ok_or_else(|| ValidationError::new(ErrorCode::InvalidPlotSignature))?;
        if !checks.signature(plot_key, ftb_hash.as_ref(), signature) {
            return Err(ErrorCode::InvalidPlotSignature.into());
        }
    }
    if rcb.get_unfinished().get_hash() != foliage_block_data.unfinished_reward_block_hash {
        return Err(ErrorCode::InvalidUrsbHash.into());
    }
    let pool_target = &foliage_block_data.pool_target;
    if pool_target.max_height != 0 && pool_target.max_height < height {
        return Err(ErrorCode::OldPoolTarget.into());
    }

    if genesis_block {
        if pool_target.puzzle_hash != constants.genesis_pre_farm_pool_puzzle_hash
            || foliage_block_data.farmer_reward_puzzle_hash
                != constants.genesis_pre_farm_farmer_puzzle_hash
        {
            error!(
                "Genesis pays {} and {}",
                pool_target.puzzle_hash, foliage_block_data.farmer_reward_puzzle_hash
            );
            return Err(ErrorCode::InvalidPrefarm.into());
        }
    } else {
        let pos = &rcb.proof_of_space;
        match (&pos.pool_public_key, &pos.pool_contract_puzzle_hash) {
            (Some(pool_key), None) => {
                let signature = foliage_block_data
                    .pool_signature
                    .as_ref()
                    .ok_or_else(|| ValidationError::new(ErrorCode::InvalidPoolSignature))?;
                if !checks.signature(pool_key, &pool_target.to_bytes(), signature) {
                    return Err(ErrorCode::InvalidPoolSignature.into());
                }
            }
            (None, Some(contract)) => {
                if pool_target.puzzle_hash != *contract {
                    return Err(ErrorCode::InvalidPoolTarget.into());
                }
            }
            _ => return Err(ErrorCode::InvalidPospace.into()),
        }
    }

    if foliage.foliage_transaction_block_hash.is_some() != block.foliage_transaction_block.is_some()
        || foliage.foliage_transaction_block_signature.is_some()
            != block.foliage_transaction_block.is_some()
    {
        return Err(ErrorCode::InvalidFoliageBlockPresence.into());
    }
    if let Some(ftb) = &block.foliage_transaction_block {
        if Some(ftb.get_hash()) != foliage.foliage_transaction_block_hash {
            return Err(ErrorCode::InvalidFoliageBlockHash.into());
        }
        match prev_b {
            None => {
                if ftb.prev_transaction_block_hash != constants.genesis_challenge {
                    return Err(ErrorCode::InvalidPrevBlockHash.into());
                }
            }
            Some(prev_b) => {
                let mut curr = prev_b;
                while !curr.is_transaction_block() {
                    curr = records.block_record(&curr.prev_hash)?;
                }
                if ftb.prev_transaction_block_hash != curr.header_hash {
                    return Err(ErrorCode::InvalidPrevBlockHash.into());
                }
            }
        }
        if ftb.timestamp > now_unix_secs() + constants.max_future_time {
            return Err(ErrorCode::TimestampTooFarInFuture.into());
        }
        if prev_b.is_some() {
            let prev_tx = records.block_record(&ftb.prev_transaction_block_hash)?;
            if ftb.timestamp < prev_tx.timestamp.unwrap_or_default() {
                return Err(ErrorCode::TimestampTooFarInPast.into());
            }
        }
    }

    Ok(Unfinished {
        required_iters,
        overflow,
    })
}

/// Full consensus check of a block header against its ancestors.
///
/// Returns the required iterations of the block's proof of space. With `skip_expensive`
/// the VDF proofs and BLS signatures are taken as valid, everything committed to in the
/// block is still checked.
#[allow(clippy::too_many_lines)]
pub fn validate_finished_header_block<R: BlockRecords + ?Sized>(
    constants: &ConsensusConstants,
    records: &R,
    verifier: &dyn ProofVerifier,
    block: &FullBlock,
    expected_difficulty: u64,
    expected_sub_slot_iters: u64,
    skip_expensive: bool,
) -> Result<u64, ValidationError> {
    let checks = Checks {
        constants,
        verifier,
        skip_expensive,
    };
    let Unfinished {
        required_iters,
        overflow,
    } = validate_unfinished_header(
        &checks,
        records,
        block,
        expected_difficulty,
        expected_sub_slot_iters,
    )?;
    let rcb = &block.reward_chain_block;
    let prev_b = if block.height() == 0 {
        None
    } else {
        Some(records.block_record(&block.prev_header_hash())?)
    };
    let new_sub_slot = block.first_in_sub_slot();
    let ip_iters = calculate_ip_iters(
        constants,
        expected_sub_slot_iters,
        rcb.signage_point_index,
        required_iters,
    )
    .map_err(iters_error(ErrorCode::InvalidRequiredIters))?;

    match prev_b {
        Some(prev_b) => {
            if block.height() != prev_b.height + 1 {
                return Err(ErrorCode::InvalidHeight.into());
            }
            if block.weight() != prev_b.weight + u128::from(expected_difficulty) {
                error!(
                    "Block {} weight {} expected {}",
                    block.header_hash(),
                    block.weight(),
                    prev_b.weight + u128::from(expected_difficulty)
                );
                return Err(ErrorCode::InvalidWeight.into());
            }
        }
        None => {
            if block.weight() != u128::from(constants.difficulty_starting) {
                return Err(ErrorCode::InvalidWeight.into());
            }
            if block.prev_header_hash() != constants.genesis_challenge {
                return Err(ErrorCode::InvalidPrevBlockHash.into());
            }
        }
    }

    // The reward chain restarts at whichever is more recent, the slot start or the previous block.
    let (rc_vdf_challenge, ip_vdf_iters, cc_vdf_input) = match (block.finished_sub_slots.last(), prev_b) {
        (Some(last), _) => (
            last.reward_chain.get_hash(),
            ip_iters,
            ClassgroupElement::get_default_element(),
        ),
        (None, None) => (
            constants.genesis_challenge,
            ip_iters,
            ClassgroupElement::get_default_element(),
        ),
        (None, Some(prev_b)) => (
            prev_b.reward_infusion_new_challenge,
            u64::try_from(rcb.total_iters.saturating_sub(prev_b.total_iters))
                .map_err(|_| ValidationError::new(ErrorCode::InvalidTotalIters))?,
            prev_b.challenge_vdf_output,
        ),
    };
    let cc_vdf_challenge = match (block.finished_sub_slots.last(), prev_b) {
        (Some(last), _) => last.challenge_chain.get_hash(),
        (None, None) => constants.genesis_challenge,
        (None, Some(prev_b)) => last_of(
            first_in_slot(records, prev_b)?
                .finished_challenge_slot_hashes
                .as_ref(),
            ErrorCode::InvalidCcIpVdf,
        )?,
    };

    let cc_ip_vdf = &rcb.challenge_chain_ip_vdf;
    let cc_partial = VdfInfo {
        challenge: cc_vdf_challenge,
        number_of_iterations: ip_vdf_iters,
        output: cc_ip_vdf.output,
    };
    if *cc_ip_vdf
        != (VdfInfo {
            number_of_iterations: ip_iters,
            ..cc_partial.clone()
        })
    {
        error!(
            "Block {} has cc ip vdf {cc_ip_vdf:?}, expected challenge {cc_vdf_challenge} and {ip_iters} iters",
            block.header_hash()
        );
        return Err(ErrorCode::InvalidCcIpVdf.into());
    }
    if !checks.partial_vdf(&block.challenge_chain_ip_proof, &cc_vdf_input, &cc_partial, cc_ip_vdf) {
        return Err(ErrorCode::InvalidCcIpVdf.into());
    }

    let rc_target = VdfInfo {
        challenge: rc_vdf_challenge,
        number_of_iterations: ip_vdf_iters,
        output: rcb.reward_chain_ip_vdf.output,
    };
    if !checks.vdf(
        &block.reward_chain_ip_proof,
        &ClassgroupElement::get_default_element(),
        &rcb.reward_chain_ip_vdf,
        Some(&rc_target),
    ) {
        return Err(ErrorCode::InvalidRcIpVdf.into());
    }

    match prev_b {
        Some(prev_b) => {
            let deficit = calculate_deficit(
                constants,
                block.height(),
                Some(prev_b),
                overflow,
                block.finished_sub_slots.len(),
            )?;
            let challenge_deficit = constants.min_blocks_per_challenge_block.saturating_sub(1);
            match (&rcb.infused_challenge_chain_ip_vdf, &block.infused_challenge_chain_ip_proof) {
                (None, _) => {
                    if deficit < challenge_deficit {
                        return Err(ErrorCode::InvalidIccVdf.into());
                    }
                }
                (Some(icc_ip_vdf), Some(icc_ip_proof)) => {
                    if deficit >= challenge_deficit {
                        return Err(ValidationError::with_message(
                            ErrorCode::InvalidIccVdf,
                            format!("icc vdf with deficit {deficit}"),
                        ));
                    }
                    let (icc_challenge, icc_input) = match block.finished_sub_slots.last() {
                        Some(last) => (
                            last.infused_challenge_chain
                                .as_ref()
                                .ok_or_else(|| ValidationError::new(ErrorCode::InvalidIccVdf))?
                                .get_hash(),
                            Some(ClassgroupElement::get_default_element()),
                        ),
                        None => {
                            let input = if prev_b.is_challenge_block(constants) {
                                Some(ClassgroupElement::get_default_element())
                            } else {
                                prev_b.infused_challenge_vdf_output
                            };
                            let mut curr = prev_b;
                            while curr.finished_infused_challenge_slot_hashes.is_none()
                                && !curr.is_challenge_block(constants)
                            {
                                curr = records.block_record(&curr.prev_hash)?;
                            }
                            let challenge = if curr.is_challenge_block(constants) {
                                curr.challenge_block_info_hash
                            } else {
                                last_of(
                                    curr.finished_infused_challenge_slot_hashes.as_ref(),
                                    ErrorCode::InvalidIccVdf,
                                )?
                            };
                            (challenge, input)
                        }
                    };
                    let target = VdfInfo {
                        challenge: icc_challenge,
                        number_of_iterations: ip_vdf_iters,
                        output: icc_ip_vdf.output,
                    };
                    let valid = icc_input.is_some_and(|input| {
                        checks.vdf(icc_ip_proof, &input, icc_ip_vdf, Some(&target))
                    });
                    if !valid {
                        return Err(ValidationError::with_message(
                            ErrorCode::InvalidIccVdf,
                            "invalid icc proof",
                        ));
                    }
                }
                (Some(_), None) => return Err(ErrorCode::InvalidIccVdf.into()),
            }
        }
        None => {
            if block.infused_challenge_chain_ip_proof.is_some()
                || rcb.infused_challenge_chain_ip_vdf.is_some()
            {
                return Err(ErrorCode::InvalidIccVdf.into());
            }
        }
    }

    if block.foliage.reward_block_hash != rcb.get_hash() {
        return Err(ErrorCode::InvalidRewardBlockHash.into());
    }
    if block.foliage.foliage_transaction_block_hash.is_some() != rcb.is_transaction_block {
        return Err(ErrorCode::InvalidFoliageBlockPresence.into());
    }
    Ok(required_iters)
}
