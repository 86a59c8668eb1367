use crate::consensus::block_to_record::block_to_block_record;
use crate::consensus::body_validation::{run_block_generator, validate_aggregate_signature};
use crate::consensus::difficulty::get_next_sub_slot_iters_and_difficulty;
use crate::consensus::header_validation::validate_finished_header_block;
use crate::consensus::{AugmentedRecords, BlockRecords};
use dg_node_core::blockchain::block_record::BlockRecord;
use dg_node_core::blockchain::full_block::FullBlock;
use dg_node_core::blockchain::npc_result::NpcResult;
use dg_node_core::clvm::program::SerializedProgram;
use dg_node_core::consensus::constants::ConsensusConstants;
use dg_node_core::consensus::verifier::ProofVerifier;
use dg_node_core::errors::{ErrorCode, ValidationError};
use log::{debug, warn};
use rayon::prelude::*;

/// Outcome of the order independent checks of one block, reused by `receive_block`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreValidationResult {
    pub error: Option<ErrorCode>,
    pub required_iters: Option<u64>,
    pub npc_result: Option<NpcResult>,
    pub validated_signature: bool,
}
impl PreValidationResult {
    #[must_use]
    pub fn from_error(error: ErrorCode) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Validates a batch of consecutive blocks on top of `records`.
///
/// Records for the batch are derived one block at a time, since every block's
/// difficulty depends on the ones before it. Proofs, signatures and generators
/// are then checked for all blocks in parallel. A block that fails the first
/// pass fails every block after it as well.
///
/// `generator_refs` holds, per block, the generators its reference list points
/// at, or the error hit while resolving them.
pub fn pre_validate_blocks<R: BlockRecords + ?Sized>(
    constants: &ConsensusConstants,
    records: &R,
    verifier: &dyn ProofVerifier,
    blocks: &[FullBlock],
    generator_refs: &[Result<Vec<SerializedProgram>, ErrorCode>],
    validate_signatures: bool,
) -> Vec<PreValidationResult> {
    let mut augmented = AugmentedRecords::new(records);
    let mut expected: Vec<(u64, u64)> = Vec::with_capacity(blocks.len());
    let mut first_error: Option<ErrorCode> = None;
    for (index, block) in blocks.iter().enumerate() {
        let derived = generator_refs
            .get(index)
            .map_or(
                Err(ValidationError::new(ErrorCode::GeneratorRefHasNoGenerator)),
                |refs| refs.as_ref().map(|_| ()).map_err(|e| ValidationError::new(*e)),
            )
            .and_then(|()| derive_record(constants, &augmented, verifier, block));
        match derived {
            Ok((record, difficulty, sub_slot_iters)) => {
                augmented.add_block_record(record);
                expected.push((difficulty, sub_slot_iters));
            }
            Err(e) => {
                warn!("Pre-validation of block {} failed: {e}", block.height());
                first_error = Some(e.code);
                break;
            }
        }
    }

    let checked = expected.len();
    let augmented = &augmented;
    let mut results: Vec<PreValidationResult> = blocks[..checked]
        .par_iter()
        .zip(expected.par_iter())
        .zip(generator_refs[..checked].par_iter())
        .map(|((block, (difficulty, sub_slot_iters)), refs)| {
            let required_iters = match validate_finished_header_block(
                constants,
                augmented,
                verifier,
                block,
                *difficulty,
                *sub_slot_iters,
                false,
            ) {
                Ok(required_iters) => required_iters,
                Err(e) => {
                    debug!("Block {} failed header validation: {e}", block.height());
                    return PreValidationResult::from_error(e.code);
                }
            };
            let refs = refs.as_deref().unwrap_or_default();
            let npc_result = run_block_generator(constants, block, refs);
            if let Some(error) = npc_result.as_ref().and_then(|npc| npc.error) {
                return PreValidationResult {
                    error: Some(error),
                    required_iters: Some(required_iters),
                    npc_result,
                    validated_signature: false,
                };
            }
            let mut error = None;
            if validate_signatures {
                let conds = npc_result.as_ref().and_then(|npc| npc.conds.as_ref());
                if let Err(e) = validate_aggregate_signature(constants, block, conds) {
                    error = Some(e.code);
                }
            }
            PreValidationResult {
                error,
                required_iters: Some(required_iters),
                npc_result,
                validated_signature: validate_signatures && error.is_none(),
            }
        })
        .collect();
    if let Some(error) = first_error {
        results.resize(blocks.len(), PreValidationResult::from_error(error));
    }
    results
}

fn derive_record<R: BlockRecords + ?Sized>(
    constants: &ConsensusConstants,
    records: &R,
    verifier: &dyn ProofVerifier,
    block: &FullBlock,
) -> Result<(BlockRecord, u64, u64), ValidationError> {
    let prev_b = records.try_block_record(&block.prev_header_hash());
    if block.height() > 0 && prev_b.is_none() {
        return Err(ValidationError::with_message(
            ErrorCode::InvalidPrevBlockHash,
            format!("unknown previous block {}", block.prev_header_hash()),
        ));
    }
    let (sub_slot_iters, difficulty) =
        get_next_sub_slot_iters_and_difficulty(constants, block.first_in_sub_slot(), prev_b, records)?;
    let required_iters = validate_finished_header_block(
        constants,
        records,
        verifier,
        block,
        difficulty,
        sub_slot_iters,
        true,
    )?;
    let record = block_to_block_record(constants, records, required_iters, block, Some(sub_slot_iters))?;
    Ok((record, difficulty, sub_slot_iters))
}
