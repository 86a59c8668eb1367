use crate::keys::{create_plots, SimulatedPlot};
use crate::verifier::{prove_vdf, simulated_pos_proof, SimulatedVerifier};
use crate::wallet::anyone_can_spend_puzzle_hash;
use dg_full_node::consensus::block_to_record::block_to_block_record;
use dg_full_node::consensus::body_validation::{
    expected_reward_coins, generator_root, EMPTY_GENERATOR_REFS_ROOT,
};
use dg_full_node::consensus::deficit::calculate_deficit;
use dg_full_node::consensus::difficulty::{
    can_finish_sub_and_full_epoch, get_next_sub_slot_iters_and_difficulty, make_sub_epoch_summary,
};
use dg_full_node::consensus::header_validation::validate_finished_header_block;
use dg_full_node::consensus::signage_point::get_signage_point_vdf_info;
use dg_full_node::consensus::{last_transaction_block, BlockCache, BlockRecords};
use dg_node_core::blockchain::block_record::BlockRecord;
use dg_node_core::blockchain::challenge_chain_subslot::ChallengeChainSubSlot;
use dg_node_core::blockchain::class_group_element::ClassgroupElement;
use dg_node_core::blockchain::coin::Coin;
use dg_node_core::blockchain::foliage::Foliage;
use dg_node_core::blockchain::foliage_block_data::FoliageBlockData;
use dg_node_core::blockchain::foliage_transaction_block::FoliageTransactionBlock;
use dg_node_core::blockchain::full_block::FullBlock;
use dg_node_core::blockchain::infused_challenge_chain_subslot::InfusedChallengeChainSubSlot;
use dg_node_core::blockchain::pool_target::PoolTarget;
use dg_node_core::blockchain::proof_of_space::{
    calculate_pos_challenge, passes_plot_filter, ProofBytes, ProofOfSpace,
};
use dg_node_core::blockchain::reward_chain_block::RewardChainBlock;
use dg_node_core::blockchain::reward_chain_subslot::RewardChainSubSlot;
use dg_node_core::blockchain::sized_bytes::{Bytes32, Bytes96};
use dg_node_core::blockchain::spend_bundle::SpendBundle;
use dg_node_core::blockchain::subslot_bundle::SubSlotBundle;
use dg_node_core::blockchain::subslot_proofs::SubSlotProofs;
use dg_node_core::blockchain::transactions_info::TransactionsInfo;
use dg_node_core::blockchain::vdf_info::VdfInfo;
use dg_node_core::blockchain::vdf_proof::VdfProof;
use dg_node_core::bls::{sign, INFINITY_SIGNATURE};
use dg_node_core::clvm::conditions::{get_name_puzzle_conditions, simple_solution_generator};
use dg_node_core::clvm::program::SerializedProgram;
use dg_node_core::consensus::constants::ConsensusConstants;
use dg_node_core::consensus::merkle::{additions_root, removals_root, transactions_filter_hash};
use dg_node_core::consensus::pot_iterations::{
    calculate_ip_iters, calculate_iterations_quality, calculate_sp_interval_iters,
    calculate_sp_iters,
};
use dg_node_core::consensus::verifier::ProofVerifier;
use dg_node_core::errors::ValidationError;
use dg_node_core::utils::Hashable;
use log::{debug, warn};
use std::io::Error;
use std::sync::Arc;

pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
pub const DEFAULT_TIME_PER_BLOCK: u64 = 20;
const PLOT_SEED: &[u8] = b"dg simulator plots";
const NUM_PLOTS: u32 = 16;
const MAX_EMPTY_SLOTS: usize = 64;

fn consensus_err(e: ValidationError) -> Error {
    Error::other(e.to_string())
}

fn vdf(
    challenge: &Bytes32,
    input: &ClassgroupElement,
    iterations: u64,
) -> Result<(VdfInfo, VdfProof), Error> {
    prove_vdf(challenge, input, iterations).ok_or_else(|| {
        Error::other(format!("VDF input is not an output of challenge {challenge}"))
    })
}

fn missing(what: &str) -> Error {
    Error::other(format!("chain has no {what}"))
}

fn slot_start_record<'a>(cache: &'a BlockCache, from: &'a BlockRecord) -> Result<&'a BlockRecord, Error> {
    let mut curr = from;
    while !curr.first_in_sub_slot() {
        curr = cache.block_record(&curr.prev_hash).map_err(consensus_err)?;
    }
    Ok(curr)
}

fn last_hash(hashes: Option<&Vec<Bytes32>>, what: &str) -> Result<Bytes32, Error> {
    hashes
        .and_then(|hashes| hashes.last())
        .copied()
        .ok_or_else(|| missing(what))
}

#[derive(Clone, Debug)]
pub struct BlockOptions {
    /// Included in the first transaction block built.
    pub transaction_data: Option<SpendBundle>,
    pub farmer_reward_puzzle_hash: Option<Bytes32>,
    /// Empty sub-slots finished before the first new block.
    pub skip_slots: u32,
    /// Goes into the foliage of every new block, different seeds give different chains.
    pub seed: Bytes32,
    pub guarantee_transaction_block: bool,
    /// Commit to transaction data the generator rejects, so invalid blocks can be built.
    pub skip_transaction_checks: bool,
    pub time_per_block: u64,
    pub genesis_timestamp: u64,
}
impl Default for BlockOptions {
    fn default() -> Self {
        Self {
            transaction_data: None,
            farmer_reward_puzzle_hash: None,
            skip_slots: 0,
            seed: Bytes32::default(),
            guarantee_transaction_block: false,
            skip_transaction_checks: false,
            time_per_block: DEFAULT_TIME_PER_BLOCK,
            genesis_timestamp: GENESIS_TIMESTAMP,
        }
    }
}
impl BlockOptions {
    #[must_use]
    pub fn with_transaction_data(mut self, bundle: SpendBundle) -> Self {
        self.transaction_data = Some(bundle);
        self
    }
    #[must_use]
    pub fn with_seed(mut self, seed: Bytes32) -> Self {
        self.seed = seed;
        self
    }
    #[must_use]
    pub fn with_skip_slots(mut self, skip_slots: u32) -> Self {
        self.skip_slots = skip_slots;
        self
    }
    #[must_use]
    pub fn with_farmer_reward_puzzle_hash(mut self, puzzle_hash: Bytes32) -> Self {
        self.farmer_reward_puzzle_hash = Some(puzzle_hash);
        self
    }
    #[must_use]
    pub fn guarantee_transaction_block(mut self) -> Self {
        self.guarantee_transaction_block = true;
        self
    }
    #[must_use]
    pub fn without_transaction_checks(mut self) -> Self {
        self.skip_transaction_checks = true;
        self
    }
}

/// Where in the chain the next block is being placed.
struct SlotContext {
    challenge: Bytes32,
    slot_start_iters: u128,
    sub_slot_iters: u64,
    difficulty: u64,
    prev_ip_iters: Option<u64>,
    last_tx_total_iters: Option<u128>,
}

struct SignagePoint {
    index: u8,
    sp_iters: u64,
    cc_sp_hash: Bytes32,
    rc_sp_hash: Bytes32,
    vdfs: Option<(VdfInfo, VdfProof, VdfInfo, VdfProof)>,
}

struct Candidate<'a> {
    plot: &'a SimulatedPlot,
    signage_point: SignagePoint,
    required_iters: u64,
    ip_iters: u64,
    proof_of_space: ProofOfSpace,
}

/// Farms valid chains with simulated plots and VDFs.
pub struct BlockTools {
    constants: Arc<ConsensusConstants>,
    plots: Vec<SimulatedPlot>,
    verifier: SimulatedVerifier,
    pub farmer_puzzle_hash: Bytes32,
    pub pool_puzzle_hash: Bytes32,
}
impl BlockTools {
    pub fn new(constants: Arc<ConsensusConstants>) -> Result<Self, Error> {
        let pool_puzzle_hash = anyone_can_spend_puzzle_hash();
        Ok(Self {
            plots: create_plots(PLOT_SEED, NUM_PLOTS, pool_puzzle_hash)?,
            constants,
            verifier: SimulatedVerifier,
            farmer_puzzle_hash: anyone_can_spend_puzzle_hash(),
            pool_puzzle_hash,
        })
    }

    pub fn constants(&self) -> &Arc<ConsensusConstants> {
        &self.constants
    }

    pub fn verifier(&self) -> Arc<dyn ProofVerifier> {
        Arc::new(self.verifier)
    }

    /// Returns `prior_blocks` extended by `num_blocks` new blocks on top of the last one.
    pub fn get_consecutive_blocks(
        &self,
        num_blocks: u32,
        prior_blocks: &[FullBlock],
        options: &BlockOptions,
    ) -> Result<Vec<FullBlock>, Error> {
        let mut cache = self.load_records(prior_blocks)?;
        let mut blocks = prior_blocks.to_vec();
        let mut pending = options.transaction_data.clone();
        for i in 0..num_blocks {
            let prev = blocks
                .last()
                .map(|b| cache.block_record(&b.header_hash()))
                .transpose()
                .map_err(consensus_err)?
                .cloned();
            let skip_slots = if i == 0 { options.skip_slots } else { 0 };
            let block = self.next_block(&cache, prev.as_ref(), options, &mut pending, skip_slots)?;
            self.add_record(&mut cache, &block)?;
            debug!(
                "Farmed block {} at height {} with {} finished sub-slots",
                block.header_hash(),
                block.height(),
                block.finished_sub_slots.len()
            );
            blocks.push(block);
        }
        if pending.is_some() {
            warn!("No transaction block farmed, transaction data dropped");
        }
        Ok(blocks)
    }

    fn load_records(&self, blocks: &[FullBlock]) -> Result<BlockCache, Error> {
        let mut cache = BlockCache::default();
        for block in blocks {
            self.add_record(&mut cache, block)?;
        }
        Ok(cache)
    }

    fn add_record(&self, cache: &mut BlockCache, block: &FullBlock) -> Result<(), Error> {
        let constants = self.constants.as_ref();
        let prev = cache.try_block_record(&block.prev_header_hash());
        let (sub_slot_iters, difficulty) =
            get_next_sub_slot_iters_and_difficulty(constants, block.first_in_sub_slot(), prev, cache)
                .map_err(consensus_err)?;
        let required_iters = validate_finished_header_block(
            constants,
            cache,
            &self.verifier,
            block,
            difficulty,
            sub_slot_iters,
            true,
        )
        .map_err(consensus_err)?;
        let record = block_to_block_record(constants, cache, required_iters, block, Some(sub_slot_iters))
            .map_err(consensus_err)?;
        if let Some(ses) = &record.sub_epoch_summary_included {
            cache.sub_epoch_summaries.insert(record.height, ses.clone());
        }
        cache.height_to_hash.insert(record.height, record.header_hash);
        cache.records.insert(record.header_hash, record);
        Ok(())
    }

    fn next_block(
        &self,
        cache: &BlockCache,
        prev: Option<&BlockRecord>,
        options: &BlockOptions,
        pending: &mut Option<SpendBundle>,
        skip_slots: u32,
    ) -> Result<FullBlock, Error> {
        let constants = self.constants.as_ref();
        let require_tx = options.guarantee_transaction_block || pending.is_some();
        let (new_slot_iters, new_slot_difficulty) =
            get_next_sub_slot_iters_and_difficulty(constants, true, prev, cache).map_err(consensus_err)?;
        let mut finished: Vec<SubSlotBundle> = vec![];
        for _ in 0..skip_slots {
            let sub_slot = self.finish_sub_slot(cache, prev, &finished, new_slot_iters, new_slot_difficulty)?;
            finished.push(sub_slot);
        }
        while finished.len() <= MAX_EMPTY_SLOTS {
            let context = self.slot_context(cache, prev, &finished)?;
            if let Some(candidate) = self.find_candidate(cache, prev, &finished, &context, require_tx)? {
                return self.build_block(cache, prev, finished, &context, candidate, options, pending);
            }
            let sub_slot = self.finish_sub_slot(cache, prev, &finished, new_slot_iters, new_slot_difficulty)?;
            finished.push(sub_slot);
        }
        Err(Error::other(format!(
            "No proof found in {MAX_EMPTY_SLOTS} sub-slots"
        )))
    }

    fn slot_context(
        &self,
        cache: &BlockCache,
        prev: Option<&BlockRecord>,
        finished: &[SubSlotBundle],
    ) -> Result<SlotContext, Error> {
        let constants = self.constants.as_ref();
        let (sub_slot_iters, difficulty) =
            get_next_sub_slot_iters_and_difficulty(constants, !finished.is_empty(), prev, cache)
                .map_err(consensus_err)?;
        let last_tx_total_iters = prev
            .map(|prev| last_transaction_block(cache, &prev.header_hash))
            .transpose()
            .map_err(consensus_err)?
            .map(|tx| tx.total_iters);
        let Some(prev) = prev else {
            return Ok(SlotContext {
                challenge: finished
                    .last()
                    .map_or(constants.genesis_challenge, |ss| ss.challenge_chain.get_hash()),
                slot_start_iters: u128::from(sub_slot_iters) * finished.len() as u128,
                sub_slot_iters,
                difficulty,
                prev_ip_iters: None,
                last_tx_total_iters,
            });
        };
        let prev_ip_iters = u128::from(prev.ip_iters(constants)?);
        match finished.last() {
            Some(last) => Ok(SlotContext {
                challenge: last.challenge_chain.get_hash(),
                slot_start_iters: prev.total_iters + u128::from(prev.sub_slot_iters) - prev_ip_iters
                    + u128::from(sub_slot_iters) * (finished.len() as u128 - 1),
                sub_slot_iters,
                difficulty,
                prev_ip_iters: None,
                last_tx_total_iters,
            }),
            None => Ok(SlotContext {
                challenge: last_hash(
                    slot_start_record(cache, prev)?.finished_challenge_slot_hashes.as_ref(),
                    "finished challenge slot",
                )?,
                slot_start_iters: prev.total_iters - prev_ip_iters,
                sub_slot_iters,
                difficulty,
                prev_ip_iters: Some(prev.ip_iters(constants)?),
                last_tx_total_iters,
            }),
        }
    }

    fn signage_point(
        &self,
        cache: &BlockCache,
        prev: Option<&BlockRecord>,
        finished: &[SubSlotBundle],
        context: &SlotContext,
        index: u8,
    ) -> Result<SignagePoint, Error> {
        let constants = self.constants.as_ref();
        let sp_iters = calculate_sp_iters(constants, context.sub_slot_iters, index)?;
        if sp_iters == 0 {
            let rc_sp_hash = match (finished.last(), prev) {
                (Some(last), _) => last.reward_chain.get_hash(),
                (None, None) => constants.genesis_challenge,
                (None, Some(prev)) => last_hash(
                    slot_start_record(cache, prev)?.finished_reward_slot_hashes.as_ref(),
                    "finished reward slot",
                )?,
            };
            return Ok(SignagePoint {
                index,
                sp_iters,
                cc_sp_hash: context.challenge,
                rc_sp_hash,
                vdfs: None,
            });
        }
        let sp_info = get_signage_point_vdf_info(
            constants,
            finished,
            false,
            prev,
            cache,
            context.slot_start_iters + u128::from(sp_iters),
            sp_iters,
        )
        .map_err(consensus_err)?;
        let (cc_partial, cc_proof) = vdf(&sp_info.cc_challenge, &sp_info.cc_input, sp_info.cc_iters)?;
        let cc_sp_vdf = VdfInfo {
            number_of_iterations: sp_iters,
            ..cc_partial
        };
        let (rc_sp_vdf, rc_proof) = vdf(&sp_info.rc_challenge, &sp_info.rc_input, sp_info.rc_iters)?;
        Ok(SignagePoint {
            index,
            sp_iters,
            cc_sp_hash: cc_sp_vdf.output.get_hash(),
            rc_sp_hash: rc_sp_vdf.output.get_hash(),
            vdfs: Some((cc_sp_vdf, cc_proof, rc_sp_vdf, rc_proof)),
        })
    }

    /// Earliest infusing proof in the slot, `None` when the slot has no room or no proof.
    fn find_candidate(
        &self,
        cache: &BlockCache,
        prev: Option<&BlockRecord>,
        finished: &[SubSlotBundle],
        context: &SlotContext,
        require_tx: bool,
    ) -> Result<Option<Candidate<'_>>, Error> {
        let constants = self.constants.as_ref();
        if let (true, Some(prev)) = (finished.is_empty(), prev) {
            let mut num_blocks = 2u32;
            let mut curr = prev;
            while !curr.first_in_sub_slot() {
                num_blocks += 1;
                curr = cache.block_record(&curr.prev_hash).map_err(consensus_err)?;
            }
            if num_blocks > constants.max_sub_slot_blocks {
                return Ok(None);
            }
        }
        let sp_interval_iters = calculate_sp_interval_iters(constants, context.sub_slot_iters)?;
        let last_non_overflow = constants.num_sps_sub_slot as u64 - constants.num_sp_intervals_extra;
        let mut best: Option<Candidate<'_>> = None;
        for index in 0..last_non_overflow as u8 {
            let sp_iters = calculate_sp_iters(constants, context.sub_slot_iters, index)?;
            let sp_total_iters = context.slot_start_iters + u128::from(sp_iters);
            if require_tx && context.last_tx_total_iters.is_some_and(|tx| sp_total_iters <= tx) {
                continue;
            }
            let mut signage_point = None;
            for plot in &self.plots {
                let Some(candidate) = self.try_plot(
                    cache,
                    prev,
                    finished,
                    context,
                    plot,
                    index,
                    sp_interval_iters,
                    &mut signage_point,
                )?
                else {
                    continue;
                };
                if best.as_ref().map_or(true, |b| candidate.ip_iters < b.ip_iters) {
                    best = Some(candidate);
                }
            }
        }
        Ok(best)
    }

    #[allow(clippy::too_many_arguments)]
    fn try_plot<'a>(
        &'a self,
        cache: &BlockCache,
        prev: Option<&BlockRecord>,
        finished: &[SubSlotBundle],
        context: &SlotContext,
        plot: &'a SimulatedPlot,
        index: u8,
        sp_interval_iters: u64,
        signage_point: &mut Option<SignagePoint>,
    ) -> Result<Option<Candidate<'a>>, Error> {
        let constants = self.constants.as_ref();
        let cc_sp_hash = match signage_point {
            Some(sp) => sp.cc_sp_hash,
            None => {
                let sp = self.signage_point(cache, prev, finished, context, index)?;
                let hash = sp.cc_sp_hash;
                *signage_point = Some(sp);
                hash
            }
        };
        if !passes_plot_filter(
            constants.number_zero_bits_plot_filter,
            &plot.plot_id,
            &context.challenge,
            &cc_sp_hash,
        ) {
            return Ok(None);
        }
        let pos_challenge = calculate_pos_challenge(&plot.plot_id, &context.challenge, &cc_sp_hash);
        let proof = simulated_pos_proof(&plot.plot_id, plot.size, &pos_challenge);
        let Some(quality) = self
            .verifier
            .pos_quality_string(&plot.plot_id, plot.size, &pos_challenge, &proof)
        else {
            return Ok(None);
        };
        let required_iters = calculate_iterations_quality(
            constants.difficulty_constant_factor,
            &quality,
            plot.size,
            context.difficulty,
            &cc_sp_hash,
        );
        if required_iters == 0 || required_iters >= sp_interval_iters {
            return Ok(None);
        }
        let ip_iters = calculate_ip_iters(constants, context.sub_slot_iters, index, required_iters)?;
        if context.prev_ip_iters.is_some_and(|prev_ip| ip_iters <= prev_ip) {
            return Ok(None);
        }
        let Some(sp) = signage_point.as_ref() else {
            return Ok(None);
        };
        Ok(Some(Candidate {
            plot,
            signage_point: SignagePoint {
                index: sp.index,
                sp_iters: sp.sp_iters,
                cc_sp_hash: sp.cc_sp_hash,
                rc_sp_hash: sp.rc_sp_hash,
                vdfs: sp.vdfs.clone(),
            },
            required_iters,
            ip_iters,
            proof_of_space: ProofOfSpace {
                challenge: pos_challenge,
                pool_public_key: None,
                pool_contract_puzzle_hash: Some(plot.pool_contract_puzzle_hash),
                plot_public_key: plot.public_key,
                size: plot.size,
                proof: ProofBytes(proof),
            },
        }))
    }

    /// End of slot bundle for the slot after `finished`, following the previous block.
    fn finish_sub_slot(
        &self,
        cache: &BlockCache,
        prev: Option<&BlockRecord>,
        finished: &[SubSlotBundle],
        new_sub_slot_iters: u64,
        new_difficulty: u64,
    ) -> Result<SubSlotBundle, Error> {
        let constants = self.constants.as_ref();
        let min_blocks = constants.min_blocks_per_challenge_block;
        let default = ClassgroupElement::get_default_element();
        let n = finished.len();

        // (challenge, committed iters, proof iters, input) of each chain
        type ChainEnd = (Bytes32, u64, u64, ClassgroupElement);
        let (cc, rc, icc): (ChainEnd, ChainEnd, Option<ChainEnd>) = match (finished.last(), prev) {
            (None, None) => {
                let iters = constants.sub_slot_iters_starting;
                (
                    (constants.genesis_challenge, iters, iters, default),
                    (constants.genesis_challenge, iters, iters, default),
                    None,
                )
            }
            (Some(last), None) => {
                let iters = constants.sub_slot_iters_starting;
                (
                    (last.challenge_chain.get_hash(), iters, iters, default),
                    (last.reward_chain.get_hash(), iters, iters, default),
                    None,
                )
            }
            (None, Some(prev)) => {
                let prev_ip_iters = prev.ip_iters(constants)?;
                let remaining = prev.sub_slot_iters - prev_ip_iters;
                let slot_challenge = last_hash(
                    slot_start_record(cache, prev)?.finished_challenge_slot_hashes.as_ref(),
                    "finished challenge slot",
                )?;
                let icc = if prev.deficit < min_blocks {
                    let mut curr = prev;
                    while !curr.is_challenge_block(constants) && !curr.first_in_sub_slot() {
                        curr = cache.block_record(&curr.prev_hash).map_err(consensus_err)?;
                    }
                    let (challenge, committed) = if curr.is_challenge_block(constants) {
                        (
                            curr.challenge_block_info_hash,
                            prev.sub_slot_iters - curr.ip_iters(constants)?,
                        )
                    } else {
                        (
                            last_hash(
                                curr.finished_infused_challenge_slot_hashes.as_ref(),
                                "finished infused challenge slot",
                            )?,
                            prev.sub_slot_iters,
                        )
                    };
                    let input = if prev.is_challenge_block(constants) {
                        default
                    } else {
                        prev.infused_challenge_vdf_output
                            .ok_or_else(|| missing("infused challenge output"))?
                    };
                    Some((challenge, committed, remaining, input))
                } else {
                    None
                };
                (
                    (slot_challenge, prev.sub_slot_iters, remaining, prev.challenge_vdf_output),
                    (prev.reward_infusion_new_challenge, remaining, remaining, default),
                    icc,
                )
            }
            (Some(last), Some(prev)) => {
                let icc = match &last.infused_challenge_chain {
                    Some(prev_icc) if last.reward_chain.deficit < min_blocks => Some((
                        prev_icc.get_hash(),
                        prev.sub_slot_iters,
                        prev.sub_slot_iters,
                        default,
                    )),
                    _ => None,
                };
                (
                    (last.challenge_chain.get_hash(), new_sub_slot_iters, new_sub_slot_iters, default),
                    (last.reward_chain.get_hash(), new_sub_slot_iters, new_sub_slot_iters, default),
                    icc,
                )
            }
        };

        let deficit = match prev {
            Some(prev) if prev.deficit != 0 => prev.deficit,
            _ => min_blocks,
        };

        let mut infused_challenge_chain = None;
        let mut icc_proof = None;
        if let Some((challenge, committed, proof_iters, input)) = icc {
            let (partial, proof) = vdf(&challenge, &input, proof_iters)?;
            infused_challenge_chain = Some(InfusedChallengeChainSubSlot {
                infused_challenge_chain_end_of_slot_vdf: VdfInfo {
                    number_of_iterations: committed,
                    ..partial
                },
            });
            icc_proof = Some(proof);
        }
        let icc_hash = infused_challenge_chain.as_ref().map(Hashable::get_hash);

        let (mut subepoch_summary_hash, mut new_ssi, mut new_diff) = (None, None, None);
        if let (0, Some(prev)) = (n, prev) {
            let (can_finish_se, can_finish_epoch) = can_finish_sub_and_full_epoch(
                constants,
                cache,
                prev.height,
                &prev.prev_hash,
                prev.deficit,
                prev.sub_epoch_summary_included.is_some(),
            )
            .map_err(consensus_err)?;
            if can_finish_se {
                let prev_prev = cache.block_record(&prev.prev_hash).map_err(consensus_err)?;
                let ses = make_sub_epoch_summary(
                    constants,
                    cache,
                    prev.height + 1,
                    prev_prev,
                    can_finish_epoch.then_some(new_difficulty),
                    can_finish_epoch.then_some(new_sub_slot_iters),
                )
                .map_err(consensus_err)?;
                subepoch_summary_hash = Some(ses.get_hash());
                if can_finish_epoch {
                    new_ssi = Some(new_sub_slot_iters);
                    new_diff = Some(new_difficulty);
                }
            }
        }

        let (cc_challenge, cc_committed, cc_proof_iters, cc_input) = cc;
        let (cc_partial, cc_proof) = vdf(&cc_challenge, &cc_input, cc_proof_iters)?;
        let challenge_chain = ChallengeChainSubSlot {
            challenge_chain_end_of_slot_vdf: VdfInfo {
                number_of_iterations: cc_committed,
                ..cc_partial
            },
            infused_challenge_chain_sub_slot_hash: if deficit == min_blocks { icc_hash } else { None },
            subepoch_summary_hash,
            new_sub_slot_iters: new_ssi,
            new_difficulty: new_diff,
        };
        let (rc_challenge, _, rc_iters, rc_input) = rc;
        let (end_of_slot_vdf, rc_proof) = vdf(&rc_challenge, &rc_input, rc_iters)?;
        let reward_chain = RewardChainSubSlot {
            end_of_slot_vdf,
            challenge_chain_sub_slot_hash: challenge_chain.get_hash(),
            infused_challenge_chain_sub_slot_hash: icc_hash,
            deficit,
        };
        Ok(SubSlotBundle {
            challenge_chain,
            infused_challenge_chain,
            reward_chain,
            proofs: SubSlotProofs {
                challenge_chain_slot_proof: cc_proof,
                infused_challenge_chain_slot_proof: icc_proof,
                reward_chain_slot_proof: rc_proof,
            },
        })
    }

    #[allow(clippy::too_many_arguments, clippy::too_many_lines)]
    fn build_block(
        &self,
        cache: &BlockCache,
        prev: Option<&BlockRecord>,
        finished: Vec<SubSlotBundle>,
        context: &SlotContext,
        candidate: Candidate<'_>,
        options: &BlockOptions,
        pending: &mut Option<SpendBundle>,
    ) -> Result<FullBlock, Error> {
        let constants = self.constants.as_ref();
        let default = ClassgroupElement::get_default_element();
        let height = prev.map_or(0, |p| p.height + 1);
        let sp = &candidate.signage_point;
        let ip_iters = candidate.ip_iters;
        let total_iters = context.slot_start_iters + u128::from(ip_iters);
        let sp_total_iters = context.slot_start_iters + u128::from(sp.sp_iters);

        let (rc_vdf_challenge, ip_vdf_iters, cc_vdf_input) = match (finished.last(), prev) {
            (Some(last), _) => (last.reward_chain.get_hash(), ip_iters, default),
            (None, None) => (constants.genesis_challenge, ip_iters, default),
            (None, Some(prev)) => (
                prev.reward_infusion_new_challenge,
                u64::try_from(total_iters - prev.total_iters)
                    .map_err(|_| Error::other("infusion iterations overflow"))?,
                prev.challenge_vdf_output,
            ),
        };
        let (cc_partial, challenge_chain_ip_proof) = vdf(&context.challenge, &cc_vdf_input, ip_vdf_iters)?;
        let challenge_chain_ip_vdf = VdfInfo {
            number_of_iterations: ip_iters,
            ..cc_partial
        };
        let (reward_chain_ip_vdf, reward_chain_ip_proof) = vdf(&rc_vdf_challenge, &default, ip_vdf_iters)?;

        let deficit = calculate_deficit(constants, height, prev, false, finished.len()).map_err(consensus_err)?;
        let mut icc_ip = None;
        if let Some(prev) = prev {
            if deficit < constants.min_blocks_per_challenge_block.saturating_sub(1) {
                let (challenge, input) = match finished.last() {
                    Some(last) => (
                        last.infused_challenge_chain
                            .as_ref()
                            .ok_or_else(|| missing("infused challenge sub-slot"))?
                            .get_hash(),
                        default,
                    ),
                    None => {
                        let input = if prev.is_challenge_block(constants) {
                            default
                        } else {
                            prev.infused_challenge_vdf_output
                                .ok_or_else(|| missing("infused challenge output"))?
                        };
                        let mut curr = prev;
                        while curr.finished_infused_challenge_slot_hashes.is_none()
                            && !curr.is_challenge_block(constants)
                        {
                            curr = cache.block_record(&curr.prev_hash).map_err(consensus_err)?;
                        }
                        let challenge = if curr.is_challenge_block(constants) {
                            curr.challenge_block_info_hash
                        } else {
                            last_hash(
                                curr.finished_infused_challenge_slot_hashes.as_ref(),
                                "finished infused challenge slot",
                            )?
                        };
                        (challenge, input)
                    }
                };
                icc_ip = Some(vdf(&challenge, &input, ip_vdf_iters)?);
            }
        }

        let is_transaction_block = context
            .last_tx_total_iters
            .map_or(true, |tx_total_iters| sp_total_iters > tx_total_iters);
        let plot_key = &candidate.plot.secret_key;
        let (cc_sp_vdf, cc_sp_proof, rc_sp_vdf, rc_sp_proof) = match &sp.vdfs {
            Some((cc_vdf, cc_proof, rc_vdf, rc_proof)) => (
                Some(cc_vdf.clone()),
                Some(cc_proof.clone()),
                Some(rc_vdf.clone()),
                Some(rc_proof.clone()),
            ),
            None => (None, None, None, None),
        };
        let (infused_challenge_chain_ip_vdf, infused_challenge_chain_ip_proof) = match icc_ip {
            Some((info, proof)) => (Some(info), Some(proof)),
            None => (None, None),
        };
        let reward_chain_block = RewardChainBlock {
            weight: prev.map_or(0, |p| p.weight) + u128::from(context.difficulty),
            height,
            total_iters,
            signage_point_index: sp.index,
            pos_ss_cc_challenge_hash: context.challenge,
            proof_of_space: candidate.proof_of_space,
            challenge_chain_sp_vdf: cc_sp_vdf,
            challenge_chain_sp_signature: Bytes96::from(sign(plot_key, sp.cc_sp_hash.as_ref())),
            challenge_chain_ip_vdf,
            reward_chain_sp_vdf: rc_sp_vdf,
            reward_chain_sp_signature: Bytes96::from(sign(plot_key, sp.rc_sp_hash.as_ref())),
            reward_chain_ip_vdf,
            infused_challenge_chain_ip_vdf,
            is_transaction_block,
        };

        let genesis = prev.is_none();
        let foliage_block_data = FoliageBlockData {
            unfinished_reward_block_hash: reward_chain_block.get_unfinished().get_hash(),
            pool_target: PoolTarget {
                puzzle_hash: if genesis {
                    constants.genesis_pre_farm_pool_puzzle_hash
                } else {
                    candidate.plot.pool_contract_puzzle_hash
                },
                max_height: 0,
            },
            pool_signature: None,
            farmer_reward_puzzle_hash: if genesis {
                constants.genesis_pre_farm_farmer_puzzle_hash
            } else {
                options
                    .farmer_reward_puzzle_hash
                    .unwrap_or(self.farmer_puzzle_hash)
            },
            extension_data: options.seed,
        };

        let mut block = FullBlock {
            finished_sub_slots: finished,
            challenge_chain_sp_proof: cc_sp_proof,
            challenge_chain_ip_proof,
            reward_chain_sp_proof: rc_sp_proof,
            reward_chain_ip_proof,
            infused_challenge_chain_ip_proof,
            foliage: Foliage {
                prev_block_hash: prev.map_or(constants.genesis_challenge, |p| p.header_hash),
                reward_block_hash: reward_chain_block.get_hash(),
                foliage_block_data_signature: Bytes96::from(sign(
                    plot_key,
                    foliage_block_data.get_hash().as_ref(),
                )),
                foliage_block_data,
                foliage_transaction_block_hash: None,
                foliage_transaction_block_signature: None,
            },
            reward_chain_block,
            foliage_transaction_block: None,
            transactions_info: None,
            transactions_generator: None,
            transactions_generator_ref_list: vec![],
        };
        if is_transaction_block {
            self.add_transactions(cache, prev, &mut block, options, pending.take())?;
        }
        Ok(block)
    }

    fn add_transactions(
        &self,
        cache: &BlockCache,
        prev: Option<&BlockRecord>,
        block: &mut FullBlock,
        options: &BlockOptions,
        bundle: Option<SpendBundle>,
    ) -> Result<(), Error> {
        let constants = self.constants.as_ref();
        let (prev_transaction_block_hash, timestamp, reward_claims_incorporated) = match prev {
            None => (constants.genesis_challenge, options.genesis_timestamp, vec![]),
            Some(prev) => {
                let prev_tx = last_transaction_block(cache, &prev.header_hash).map_err(consensus_err)?;
                (
                    prev_tx.header_hash,
                    prev_tx.timestamp.unwrap_or(options.genesis_timestamp) + options.time_per_block,
                    expected_reward_coins(constants, cache, &prev_tx.header_hash)
                        .map_err(consensus_err)?,
                )
            }
        };

        let mut generator: Option<SerializedProgram> = None;
        let mut additions: Vec<Coin> = vec![];
        let mut removals: Vec<Bytes32> = vec![];
        let mut cost = 0;
        let mut fees = 0;
        let mut aggregated_signature = INFINITY_SIGNATURE;
        if let Some(bundle) = bundle {
            let program = simple_solution_generator(&bundle)?;
            let npc = get_name_puzzle_conditions(
                &program,
                &[],
                constants.max_block_cost_clvm,
                constants.cost_per_byte,
                false,
            );
            match (npc.error, npc.conds) {
                (None, Some(conds)) => {
                    additions = conds.additions();
                    removals = conds.removal_names();
                    cost = conds.cost;
                    fees = conds.fees().unwrap_or_default();
                }
                (error, _) if options.skip_transaction_checks => {
                    debug!("Committing to transaction data that does not run: {error:?}");
                    removals = bundle.coin_spends.iter().map(|cs| cs.coin.name()).collect();
                    cost = constants.max_block_cost_clvm;
                }
                (error, _) => {
                    return Err(Error::other(format!(
                        "Transaction data does not run: {error:?}"
                    )))
                }
            }
            aggregated_signature = bundle.aggregated_signature;
            generator = Some(program);
        }
        let all_additions: Vec<Coin> = additions
            .iter()
            .chain(reward_claims_incorporated.iter())
            .copied()
            .collect();
        let transactions_info = TransactionsInfo {
            generator_root: generator_root(generator.as_ref()),
            generator_refs_root: EMPTY_GENERATOR_REFS_ROOT,
            aggregated_signature,
            fees,
            cost,
            reward_claims_incorporated,
        };
        block.foliage_transaction_block = Some(FoliageTransactionBlock {
            prev_transaction_block_hash,
            timestamp,
            filter_hash: transactions_filter_hash(&all_additions, &removals),
            additions_root: additions_root(&all_additions),
            removals_root: removals_root(&removals),
            transactions_info_hash: transactions_info.get_hash(),
        });
        block.transactions_info = Some(transactions_info);
        block.transactions_generator = generator;
        self.sign_foliage(block)
    }

    /// Recommits the foliage to the block's transactions info and signs it again.
    ///
    /// Lets tests tamper with the transaction part of a block while keeping the
    /// header valid.
    pub fn sign_foliage(&self, block: &mut FullBlock) -> Result<(), Error> {
        let plot_key = &self
            .plots
            .iter()
            .find(|p| p.public_key == block.reward_chain_block.proof_of_space.plot_public_key)
            .ok_or_else(|| Error::other("block was not farmed by these plots"))?
            .secret_key;
        if let (Some(ftb), Some(ti)) = (&mut block.foliage_transaction_block, &block.transactions_info) {
            ftb.transactions_info_hash = ti.get_hash();
        }
        match &block.foliage_transaction_block {
            Some(ftb) => {
                let ftb_hash = ftb.get_hash();
                block.foliage.foliage_transaction_block_hash = Some(ftb_hash);
                block.foliage.foliage_transaction_block_signature =
                    Some(Bytes96::from(sign(plot_key, ftb_hash.as_ref())));
            }
            None => {
                block.foliage.foliage_transaction_block_hash = None;
                block.foliage.foliage_transaction_block_signature = None;
            }
        }
        block.foliage.foliage_block_data_signature = Bytes96::from(sign(
            plot_key,
            block.foliage.foliage_block_data.get_hash().as_ref(),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dg_node_core::consensus::constants::TEST_CONSTANTS;

    fn tools() -> BlockTools {
        BlockTools::new(Arc::new(TEST_CONSTANTS.clone())).unwrap()
    }

    #[test]
    fn test_chain_validates_with_proofs() {
        let bt = tools();
        let blocks = bt
            .get_consecutive_blocks(20, &[], &BlockOptions::default())
            .unwrap();
        assert_eq!(blocks.len(), 20);
        let mut cache = BlockCache::default();
        for (height, block) in blocks.iter().enumerate() {
            assert_eq!(block.height() as usize, height);
            let prev = cache.try_block_record(&block.prev_header_hash());
            let (ssi, difficulty) =
                get_next_sub_slot_iters_and_difficulty(&TEST_CONSTANTS, block.first_in_sub_slot(), prev, &cache)
                    .unwrap();
            let required = validate_finished_header_block(
                &TEST_CONSTANTS,
                &cache,
                &bt.verifier,
                block,
                difficulty,
                ssi,
                false,
            )
            .unwrap();
            let record = block_to_block_record(&TEST_CONSTANTS, &cache, required, block, Some(ssi)).unwrap();
            cache.records.insert(record.header_hash, record);
        }
        assert!(blocks[0].is_transaction_block());
    }

    #[test]
    fn test_generation_is_deterministic_and_seeded() {
        let bt = tools();
        let first = bt.get_consecutive_blocks(5, &[], &BlockOptions::default()).unwrap();
        let second = bt.get_consecutive_blocks(5, &[], &BlockOptions::default()).unwrap();
        assert_eq!(first, second);
        let fork = bt
            .get_consecutive_blocks(2, &first[..3], &BlockOptions::default().with_seed(Bytes32::new([1u8; 32])))
            .unwrap();
        assert_eq!(fork[2], first[2]);
        assert_ne!(fork[3].header_hash(), first[3].header_hash());
        assert_eq!(fork[3].weight(), first[3].weight());
    }

    #[test]
    fn test_skip_slots() {
        let bt = tools();
        let blocks = bt
            .get_consecutive_blocks(2, &[], &BlockOptions::default())
            .unwrap();
        let blocks = bt
            .get_consecutive_blocks(1, &blocks, &BlockOptions::default().with_skip_slots(2))
            .unwrap();
        assert!(blocks[2].finished_sub_slots.len() >= 2);
    }
}
