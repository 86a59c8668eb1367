use crate::block_store::BlockStore;
use crate::coin_store::CoinStore;
use crate::consensus::block_to_record::block_to_block_record;
use crate::consensus::body_validation::{
    run_block_generator, validate_block_body_coins, validate_block_body_structure, BlockBody,
    ForkCoins,
};
use crate::consensus::difficulty::get_next_sub_slot_iters_and_difficulty;
use crate::consensus::header_validation::validate_finished_header_block;
use crate::consensus::pre_validation::{pre_validate_blocks, PreValidationResult};
use crate::consensus::{
    ancestor_at_height, find_fork_point_in_chain, last_transaction_block, BlockCache, BlockRecords,
};
use crate::db::db_err;
use dg_node_core::blockchain::block_record::BlockRecord;
use dg_node_core::blockchain::coin::Coin;
use dg_node_core::blockchain::full_block::FullBlock;
use dg_node_core::blockchain::npc_result::NpcResult;
use dg_node_core::blockchain::sized_bytes::Bytes32;
use dg_node_core::clvm::program::SerializedProgram;
use dg_node_core::consensus::constants::ConsensusConstants;
use dg_node_core::consensus::verifier::ProofVerifier;
use dg_node_core::errors::{ConsensusError, ErrorCode, ValidationError};
use log::{debug, info, warn};
use parking_lot::RwLock;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::io::{Error, ErrorKind};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReceiveBlockResult {
    NewPeak,
    AddedAsOrphan,
    InvalidBlock,
    AlreadyHaveBlock,
    DisconnectedBlock,
}

/// In-memory view of the chain, replaced only after the database commits.
///
/// Held behind an `Arc` so pre-validation can work on a snapshot without the lock.
#[derive(Default, Clone)]
pub struct ChainState {
    pub cache: BlockCache,
    pub peak: Option<Bytes32>,
}
impl ChainState {
    pub fn peak_record(&self) -> Option<&BlockRecord> {
        self.peak
            .as_ref()
            .and_then(|hash| self.cache.try_block_record(hash))
    }
}
impl BlockRecords for ChainState {
    fn try_block_record(&self, header_hash: &Bytes32) -> Option<&BlockRecord> {
        self.cache.try_block_record(header_hash)
    }
}

/// Coin set changes of one transaction block.
#[derive(Clone, Debug)]
struct CoinChanges {
    timestamp: u64,
    additions: Vec<Coin>,
    removals: Vec<Bytes32>,
    reward_coins: Vec<Coin>,
}

/// A block joining the main chain in a commit.
struct ChainBlock {
    header_hash: Bytes32,
    height: u32,
    changes: Option<CoinChanges>,
}

pub struct Blockchain {
    constants: Arc<ConsensusConstants>,
    verifier: Arc<dyn ProofVerifier>,
    pool: SqlitePool,
    block_store: BlockStore,
    coin_store: CoinStore,
    state: RwLock<Arc<ChainState>>,
    writer: Mutex<()>,
}
impl Blockchain {
    /// Opens the stores on `pool` and loads every known block record, rebuilding the
    /// canonical height index from the stored peak.
    pub async fn create(
        constants: Arc<ConsensusConstants>,
        verifier: Arc<dyn ProofVerifier>,
        pool: SqlitePool,
    ) -> Result<Self, Error> {
        let block_store = BlockStore::create(pool.clone()).await?;
        let coin_store = CoinStore::create(pool.clone()).await?;
        let (records, peak) = block_store.get_block_records_from_peak().await?;
        let mut state = ChainState {
            cache: BlockCache {
                records,
                ..Default::default()
            },
            peak: None,
        };
        if let Some(peak) = peak {
            let mut chain = vec![];
            let mut curr = state.cache.try_block_record(&peak);
            while let Some(record) = curr {
                chain.push((record.height, record.header_hash, record.sub_epoch_summary_included.clone()));
                if record.height == 0 {
                    break;
                }
                curr = state.cache.try_block_record(&record.prev_hash);
            }
            for (height, hash, ses) in chain {
                state.cache.height_to_hash.insert(height, hash);
                if let Some(ses) = ses {
                    state.cache.sub_epoch_summaries.insert(height, ses);
                }
            }
            state.peak = Some(peak);
            info!(
                "Loaded {} blocks, peak {peak} at height {:?}",
                state.cache.records.len(),
                state.peak_record().map(|r| r.height)
            );
        } else {
            info!("Loaded empty blockchain");
        }
        Ok(Self {
            constants,
            verifier,
            pool,
            block_store,
            coin_store,
            state: RwLock::new(Arc::new(state)),
            writer: Mutex::new(()),
        })
    }

    pub fn constants(&self) -> &Arc<ConsensusConstants> {
        &self.constants
    }
    pub fn block_store(&self) -> &BlockStore {
        &self.block_store
    }
    pub fn coin_store(&self) -> &CoinStore {
        &self.coin_store
    }

    pub fn get_peak(&self) -> Option<BlockRecord> {
        self.state.read().peak_record().cloned()
    }
    pub fn get_peak_height(&self) -> Option<u32> {
        self.state.read().peak_record().map(|r| r.height)
    }
    /// Latest transaction block at or below the peak.
    pub fn get_last_transaction_block(&self) -> Option<BlockRecord> {
        let state = self.state.read();
        let peak = state.peak?;
        last_transaction_block(&**state, &peak).ok().cloned()
    }
    pub fn try_block_record(&self, header_hash: &Bytes32) -> Option<BlockRecord> {
        self.state.read().try_block_record(header_hash).cloned()
    }
    pub fn block_record(&self, header_hash: &Bytes32) -> Result<BlockRecord, Error> {
        self.try_block_record(header_hash).ok_or_else(|| {
            Error::new(ErrorKind::NotFound, format!("Block record not found: {header_hash}"))
        })
    }
    pub fn contains_block(&self, header_hash: &Bytes32) -> bool {
        self.state.read().contains_block(header_hash)
    }
    pub fn height_to_hash(&self, height: u32) -> Option<Bytes32> {
        self.state.read().cache.height_to_hash.get(&height).copied()
    }
    /// Main chain records at the given heights, skipping heights above the peak.
    pub fn get_block_records_at(&self, heights: &[u32]) -> Vec<BlockRecord> {
        let state = self.state.read();
        heights
            .iter()
            .filter_map(|h| state.cache.height_to_hash.get(h))
            .filter_map(|hash| state.try_block_record(hash).cloned())
            .collect()
    }
    pub async fn get_full_block(&self, header_hash: &Bytes32) -> Result<Option<FullBlock>, Error> {
        self.block_store.get_block(header_hash).await
    }

    /// Difficulty of the block after `header_hash`.
    pub fn get_next_difficulty(&self, header_hash: &Bytes32, new_slot: bool) -> Result<u64, ValidationError> {
        let state = self.state.read();
        let prev_b = state.block_record(header_hash)?;
        Ok(get_next_sub_slot_iters_and_difficulty(&self.constants, new_slot, Some(prev_b), &**state)?.1)
    }

    /// Sub-slot iterations of the block after `header_hash`.
    pub fn get_next_slot_iters(&self, header_hash: &Bytes32, new_slot: bool) -> Result<u64, ValidationError> {
        let state = self.state.read();
        let prev_b = state.block_record(header_hash)?;
        Ok(get_next_sub_slot_iters_and_difficulty(&self.constants, new_slot, Some(prev_b), &**state)?.0)
    }

    /// Validates `block` and adds it, switching the peak when it is on a heavier chain.
    ///
    /// `pre_validation` is the result of `pre_validate_blocks` for this block, its proofs and
    /// signatures are then not verified again. Storage failures are the only errors, an
    /// invalid block is reported through the returned result and error code.
    pub async fn receive_block(
        &self,
        block: &FullBlock,
        pre_validation: Option<&PreValidationResult>,
    ) -> Result<(ReceiveBlockResult, Option<ErrorCode>, Option<u32>), Error> {
        let _writer = self.writer.lock().await;
        let header_hash = block.header_hash();
        {
            let state = self.state.read();
            if state.contains_block(&header_hash) {
                return Ok((ReceiveBlockResult::AlreadyHaveBlock, None, None));
            }
            if block.height() > 0 {
                match state.try_block_record(&block.prev_header_hash()) {
                    None => return Ok((ReceiveBlockResult::DisconnectedBlock, None, None)),
                    Some(prev) if prev.height + 1 != block.height() => {
                        return Ok(invalid(ErrorCode::InvalidHeight.into()));
                    }
                    Some(_) => {}
                }
            }
        }
        if let Some(error) = pre_validation.and_then(|pre| pre.error) {
            return Ok(invalid(error.into()));
        }

        let npc_result = match pre_validation.and_then(|pre| pre.npc_result.clone()) {
            Some(npc) => Some(npc),
            None => match self.resolve_generator_refs(block, &[]).await? {
                Ok(refs) => run_block_generator(&self.constants, block, &refs),
                Err(code) => return Ok(invalid(code.into())),
            },
        };

        let validated = {
            let state = self.state.read();
            self.validate_against(&state, block, pre_validation, npc_result.as_ref())
        };
        let (record, body, fork_height, fork_chain) = match validated {
            Ok(validated) => validated,
            Err(e) => return Ok(invalid(e)),
        };

        let mut fork = ForkCoins::new(fork_height);
        let mut chain = Vec::with_capacity(fork_chain.len() + 1);
        for hash in fork_chain {
            let fork_block = self.block_store.get_block(&hash).await?.ok_or_else(|| {
                Error::new(ErrorKind::NotFound, format!("Fork block missing from store: {hash}"))
            })?;
            let changes = self.coin_changes(&fork_block).await?;
            if let Some(changes) = &changes {
                fork.include_block(
                    fork_block.height(),
                    changes.timestamp,
                    &changes.additions,
                    &changes.removals,
                    &changes.reward_coins,
                );
            }
            chain.push(ChainBlock {
                header_hash: hash,
                height: fork_block.height(),
                changes,
            });
        }
        let changes = match &body {
            Some(body) => {
                let validate_signature = !pre_validation.is_some_and(|pre| pre.validated_signature);
                match validate_block_body_coins(
                    &self.constants,
                    &self.coin_store,
                    block,
                    body,
                    &fork,
                    validate_signature,
                )
                .await
                {
                    Ok(_) => Some(CoinChanges {
                        timestamp: body.timestamp,
                        additions: body.additions.clone(),
                        removals: body.removals.clone(),
                        reward_coins: body.reward_coins.clone(),
                    }),
                    Err(ConsensusError::Invalid(e)) => return Ok(invalid(e)),
                    Err(ConsensusError::Storage(e)) => return Err(e),
                }
            }
            None => None,
        };
        chain.push(ChainBlock {
            header_hash,
            height: block.height(),
            changes,
        });

        let peak_weight = self.state.read().peak_record().map(|p| p.weight);
        let new_peak = peak_weight.map_or(true, |w| record.weight > w);
        match self.commit(block, &record, new_peak, fork_height, &chain).await {
            Ok(()) => {}
            Err(ConsensusError::Invalid(e)) => return Ok(invalid(e)),
            Err(ConsensusError::Storage(e)) => return Err(e),
        }

        let mut guard = self.state.write();
        let state = Arc::make_mut(&mut guard);
        let old_peak_height = state.peak_record().map(|p| p.height);
        state.cache.records.insert(header_hash, record.clone());
        if !new_peak {
            debug!("Block {header_hash} at height {} added as orphan", record.height);
            return Ok((ReceiveBlockResult::AddedAsOrphan, None, None));
        }
        let first_replaced = fork_height.map_or(0, |h| h + 1);
        if let Some(old_height) = old_peak_height {
            for height in first_replaced..=old_height {
                state.cache.height_to_hash.remove(&height);
                state.cache.sub_epoch_summaries.remove(&height);
            }
        }
        for chain_block in &chain {
            state
                .cache
                .height_to_hash
                .insert(chain_block.height, chain_block.header_hash);
            let ses = state
                .cache
                .try_block_record(&chain_block.header_hash)
                .and_then(|r| r.sub_epoch_summary_included.clone());
            if let Some(ses) = ses {
                state.cache.sub_epoch_summaries.insert(chain_block.height, ses);
            }
        }
        state.peak = Some(header_hash);
        if chain.len() > 1 {
            info!(
                "Reorg to {header_hash} at height {}, fork at {fork_height:?}, {} blocks replaced",
                record.height,
                old_peak_height.map_or(0, |h| h + 1 - first_replaced)
            );
        } else {
            info!(
                "New peak {header_hash} at height {} weight {}",
                record.height, record.weight
            );
        }
        Ok((ReceiveBlockResult::NewPeak, None, fork_height))
    }

    /// Header and structural body checks, run under the read lock.
    fn validate_against(
        &self,
        state: &ChainState,
        block: &FullBlock,
        pre_validation: Option<&PreValidationResult>,
        npc_result: Option<&NpcResult>,
    ) -> Result<(BlockRecord, Option<BlockBody>, Option<u32>, Vec<Bytes32>), ValidationError> {
        let prev_b = state.try_block_record(&block.prev_header_hash());
        let (sub_slot_iters, difficulty) = get_next_sub_slot_iters_and_difficulty(
            &self.constants,
            block.first_in_sub_slot(),
            prev_b,
            state,
        )?;
        let required_iters = validate_finished_header_block(
            &self.constants,
            state,
            self.verifier.as_ref(),
            block,
            difficulty,
            sub_slot_iters,
            pre_validation.is_some(),
        )?;
        if pre_validation
            .and_then(|pre| pre.required_iters)
            .is_some_and(|r| r != required_iters)
        {
            return Err(ErrorCode::InvalidRequiredIters.into());
        }
        let record =
            block_to_block_record(&self.constants, state, required_iters, block, Some(sub_slot_iters))?;
        let body = validate_block_body_structure(&self.constants, state, block, npc_result)?;

        let (fork_height, fork_chain) = match (state.peak_record(), prev_b) {
            (_, None) | (None, _) => (None, vec![]),
            (Some(peak), Some(prev_b)) => {
                let fork_height = find_fork_point_in_chain(state, peak, prev_b)?;
                let mut fork_chain = vec![];
                let mut curr = prev_b;
                while fork_height.map_or(true, |f| curr.height > f) {
                    fork_chain.push(curr.header_hash);
                    if curr.height == 0 {
                        break;
                    }
                    curr = state.block_record(&curr.prev_hash)?;
                }
                fork_chain.reverse();
                (fork_height, fork_chain)
            }
        };
        Ok((record, body, fork_height, fork_chain))
    }

    async fn commit(
        &self,
        block: &FullBlock,
        record: &BlockRecord,
        new_peak: bool,
        fork_height: Option<u32>,
        chain: &[ChainBlock],
    ) -> Result<(), ConsensusError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        BlockStore::insert_block(&mut tx, block, record).await?;
        if new_peak {
            BlockStore::rollback(&mut tx, fork_height).await?;
            CoinStore::rollback(&mut tx, fork_height).await?;
            for chain_block in chain {
                if let Some(changes) = &chain_block.changes {
                    CoinStore::apply_block(
                        &mut tx,
                        chain_block.height,
                        changes.timestamp,
                        &changes.additions,
                        &changes.removals,
                        &changes.reward_coins,
                    )
                    .await?;
                }
            }
            let hashes: Vec<Bytes32> = chain.iter().map(|b| b.header_hash).collect();
            BlockStore::set_in_chain(&mut tx, &hashes).await?;
            BlockStore::set_peak(&mut tx, &record.header_hash).await?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    /// Coin changes of an already validated block, `None` for non transaction blocks.
    async fn coin_changes(&self, block: &FullBlock) -> Result<Option<CoinChanges>, Error> {
        let Some(ftb) = &block.foliage_transaction_block else {
            return Ok(None);
        };
        let mut additions = vec![];
        let mut removals = vec![];
        let refs = self
            .resolve_generator_refs(block, &[])
            .await?
            .map_err(|code| Error::new(ErrorKind::InvalidData, format!("Stored block {code}")))?;
        if let Some(npc) = run_block_generator(&self.constants, block, &refs) {
            let conds = npc.conds.ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidData,
                    format!("Stored block {} generator failed: {:?}", block.header_hash(), npc.error),
                )
            })?;
            removals = conds.removal_names();
            additions = conds.additions();
        }
        Ok(Some(CoinChanges {
            timestamp: ftb.timestamp,
            additions,
            removals,
            reward_coins: block.get_included_reward_coins(),
        }))
    }

    /// Generators a block references, looked up on the block's own chain.
    ///
    /// `batch` holds blocks not stored yet which may be referenced by height. The outer
    /// error is a storage failure, the inner one a block pointing at no generator.
    async fn resolve_generator_refs(
        &self,
        block: &FullBlock,
        batch: &[FullBlock],
    ) -> Result<Result<Vec<SerializedProgram>, ErrorCode>, Error> {
        if block.transactions_generator.is_none() || block.transactions_generator_ref_list.is_empty() {
            return Ok(Ok(vec![]));
        }
        let mut refs = Vec::with_capacity(block.transactions_generator_ref_list.len());
        let batch_start = batch.first().map(|b| (b.height(), b.prev_header_hash()));
        for height in &block.transactions_generator_ref_list {
            if *height >= block.height() {
                return Ok(Err(ErrorCode::FutureGeneratorRefs));
            }
            let in_batch = batch
                .iter()
                .find(|b| b.height() == *height && b.height() < block.height());
            let generator = match in_batch {
                Some(b) => b.transactions_generator.clone(),
                None => {
                    let tip = match batch_start {
                        Some((start, prev)) if block.height() >= start => prev,
                        _ => block.prev_header_hash(),
                    };
                    let hash = {
                        let state = self.state.read();
                        match ancestor_at_height(&**state, &tip, *height) {
                            Ok(ancestor) => ancestor.header_hash,
                            Err(_) => return Ok(Err(ErrorCode::GeneratorRefHasNoGenerator)),
                        }
                    };
                    self.block_store
                        .get_block(&hash)
                        .await?
                        .and_then(|b| b.transactions_generator)
                }
            };
            match generator {
                Some(generator) => refs.push(generator),
                None => return Ok(Err(ErrorCode::GeneratorRefHasNoGenerator)),
            }
        }
        Ok(Ok(refs))
    }

    /// Runs the expensive, order independent checks of a batch of consecutive blocks
    /// on the blocking pool. Results line up with `blocks`.
    pub async fn pre_validate_blocks(
        &self,
        blocks: &[FullBlock],
        validate_signatures: bool,
    ) -> Result<Vec<PreValidationResult>, Error> {
        let mut generator_refs = Vec::with_capacity(blocks.len());
        for block in blocks {
            generator_refs.push(self.resolve_generator_refs(block, blocks).await?);
        }
        let constants = self.constants.clone();
        let verifier = self.verifier.clone();
        let snapshot = self.state.read().clone();
        let blocks = blocks.to_vec();
        let results = tokio::task::spawn_blocking(move || {
            pre_validate_blocks(
                &constants,
                &*snapshot,
                verifier.as_ref(),
                &blocks,
                &generator_refs,
                validate_signatures,
            )
        })
        .await
        .map_err(|e| Error::new(ErrorKind::Other, format!("Pre-validation task failed: {e}")))?;
        let failed = results.iter().filter(|r| r.error.is_some()).count();
        if failed > 0 {
            warn!("{failed} of {} blocks failed pre-validation", results.len());
        }
        Ok(results)
    }

    /// Heights and header hashes of the main chain from `from_height` to the peak.
    pub fn main_chain_since(&self, from_height: u32) -> HashMap<u32, Bytes32> {
        let state = self.state.read();
        state
            .cache
            .height_to_hash
            .iter()
            .filter(|(h, _)| **h >= from_height)
            .map(|(h, hash)| (*h, *hash))
            .collect()
    }
}

fn invalid(e: ValidationError) -> (ReceiveBlockResult, Option<ErrorCode>, Option<u32>) {
    warn!("Invalid block: {e}");
    (ReceiveBlockResult::InvalidBlock, Some(e.code), None)
}
