use crate::coin_store::CoinStore;
use crate::consensus::BlockRecords;
use dg_node_core::blockchain::coin::Coin;
use dg_node_core::blockchain::coin_record::CoinRecord;
use dg_node_core::blockchain::full_block::FullBlock;
use dg_node_core::blockchain::npc_result::NpcResult;
use dg_node_core::blockchain::sized_bytes::Bytes32;
use dg_node_core::blockchain::spend_bundle_conditions::SpendBundleConditions;
use dg_node_core::bls::aggregate_verify_signature;
use dg_node_core::clvm::conditions::{
    get_name_puzzle_conditions, mempool_check_time_locks, pkm_pairs,
};
use dg_node_core::clvm::program::SerializedProgram;
use dg_node_core::consensus::block_rewards::{calculate_base_farmer_reward, calculate_pool_reward};
use dg_node_core::consensus::coinbase::{create_farmer_coin, create_pool_coin};
use dg_node_core::consensus::constants::ConsensusConstants;
use dg_node_core::consensus::merkle::{additions_root, removals_root, transactions_filter_hash};
use dg_node_core::errors::{ConsensusError, ErrorCode, ValidationError};
use dg_node_core::utils::{std_hash, Hashable};
use log::{debug, error};
use std::collections::{HashMap, HashSet};

/// A coin created on the fork being validated, above the fork point.
#[derive(Clone, Copy, Debug)]
pub struct ForkAdd {
    pub coin: Coin,
    pub confirmed_height: u32,
    pub timestamp: u64,
    pub coinbase: bool,
}

/// Coin changes made by the blocks between the fork point and the block being validated.
#[derive(Clone, Debug, Default)]
pub struct ForkCoins {
    pub fork_height: Option<u32>,
    pub additions_since_fork: HashMap<Bytes32, ForkAdd>,
    pub removals_since_fork: HashSet<Bytes32>,
}
impl ForkCoins {
    #[must_use]
    pub fn new(fork_height: Option<u32>) -> Self {
        Self {
            fork_height,
            ..Default::default()
        }
    }

    pub fn include_block(
        &mut self,
        height: u32,
        timestamp: u64,
        additions: &[Coin],
        removals: &[Bytes32],
        reward_coins: &[Coin],
    ) {
        for (coin, coinbase) in additions
            .iter()
            .map(|c| (c, false))
            .chain(reward_coins.iter().map(|c| (c, true)))
        {
            self.additions_since_fork.insert(
                coin.name(),
                ForkAdd {
                    coin: *coin,
                    confirmed_height: height,
                    timestamp,
                    coinbase,
                },
            );
        }
        self.removals_since_fork.extend(removals.iter().copied());
    }
}

/// Coin changes of a transaction block whose structure checked out.
#[derive(Clone, Debug)]
pub struct BlockBody {
    pub height: u32,
    pub timestamp: u64,
    pub prev_transaction_block_height: u32,
    pub prev_transaction_block_timestamp: u64,
    pub additions: Vec<Coin>,
    pub removals: Vec<Bytes32>,
    pub reward_coins: Vec<Coin>,
    pub removal_puzzle_hashes: HashMap<Bytes32, Bytes32>,
    pub conds: Option<SpendBundleConditions>,
}

/// Root committed to for a block without generator references.
pub const EMPTY_GENERATOR_REFS_ROOT: Bytes32 = Bytes32::new([1u8; 32]);

#[must_use]
pub fn generator_refs_root(ref_list: &[u32]) -> Bytes32 {
    if ref_list.is_empty() {
        return EMPTY_GENERATOR_REFS_ROOT;
    }
    let mut buf = Vec::with_capacity(ref_list.len() * 4);
    for height in ref_list {
        buf.extend_from_slice(&height.to_be_bytes());
    }
    std_hash(buf)
}

#[must_use]
pub fn generator_root(generator: Option<&SerializedProgram>) -> Bytes32 {
    generator.map_or_else(Bytes32::default, |g| std_hash(g.as_slice()))
}

/// Runs the block's generator within the cost the block declares. `None` without a generator.
#[must_use]
pub fn run_block_generator(
    constants: &ConsensusConstants,
    block: &FullBlock,
    generator_refs: &[SerializedProgram],
) -> Option<NpcResult> {
    let generator = block.transactions_generator.as_ref()?;
    let declared = block.transactions_info.as_ref().map_or(0, |ti| ti.cost);
    Some(get_name_puzzle_conditions(
        generator,
        generator_refs,
        declared.min(constants.max_block_cost_clvm),
        constants.cost_per_byte,
        false,
    ))
}

/// Reward coins a transaction block has to pay out: the previous transaction block's
/// pool and farmer rewards plus fees, and the rewards of every block since the one before it.
pub fn expected_reward_coins<R: BlockRecords + ?Sized>(
    constants: &ConsensusConstants,
    records: &R,
    prev_transaction_block_hash: &Bytes32,
) -> Result<Vec<Coin>, ValidationError> {
    let prev_tx = records.block_record(prev_transaction_block_hash)?;
    let mut coins = vec![
        create_pool_coin(
            prev_tx.height,
            &prev_tx.pool_puzzle_hash,
            calculate_pool_reward(prev_tx.height),
            &constants.genesis_challenge,
        ),
        create_farmer_coin(
            prev_tx.height,
            &prev_tx.farmer_puzzle_hash,
            calculate_base_farmer_reward(prev_tx.height) + prev_tx.fees.unwrap_or_default(),
            &constants.genesis_challenge,
        ),
    ];
    if prev_tx.height > 0 {
        let mut curr = records.block_record(&prev_tx.prev_hash)?;
        while !curr.is_transaction_block() {
            coins.push(create_pool_coin(
                curr.height,
                &curr.pool_puzzle_hash,
                calculate_pool_reward(curr.height),
                &constants.genesis_challenge,
            ));
            coins.push(create_farmer_coin(
                curr.height,
                &curr.farmer_puzzle_hash,
                calculate_base_farmer_reward(curr.height),
                &constants.genesis_challenge,
            ));
            curr = records.block_record(&curr.prev_hash)?;
        }
    }
    Ok(coins)
}

pub fn validate_aggregate_signature(
    constants: &ConsensusConstants,
    block: &FullBlock,
    conds: Option<&SpendBundleConditions>,
) -> Result<(), ValidationError> {
    let Some(transactions_info) = &block.transactions_info else {
        return Ok(());
    };
    let pairs = conds
        .map(|conds| pkm_pairs(conds, &constants.agg_sig_me_additional_data))
        .unwrap_or_default();
    if aggregate_verify_signature(&pairs, &transactions_info.aggregated_signature) {
        Ok(())
    } else {
        Err(ErrorCode::BadAggregateSignature.into())
    }
}

/// Checks of a block body that need only block records, never the coin set.
///
/// Returns `None` for a valid non transaction block.
#[allow(clippy::too_many_lines)]
pub fn validate_block_body_structure<R: BlockRecords + ?Sized>(
    constants: &ConsensusConstants,
    records: &R,
    block: &FullBlock,
    npc_result: Option<&NpcResult>,
) -> Result<Option<BlockBody>, ValidationError> {
    let height = block.height();
    let (Some(ftb), Some(transactions_info)) =
        (&block.foliage_transaction_block, &block.transactions_info)
    else {
        if block.foliage_transaction_block.is_some()
            || block.transactions_info.is_some()
            || block.transactions_generator.is_some()
            || !block.transactions_generator_ref_list.is_empty()
        {
            return Err(if block.is_transaction_block() {
                ErrorCode::IsTransactionBlockButNoData.into()
            } else {
                ErrorCode::NotBlockButHasData.into()
            });
        }
        return Ok(None);
    };

    if ftb.transactions_info_hash != transactions_info.get_hash() {
        return Err(ErrorCode::InvalidTransactionsInfoHash.into());
    }
    if block.foliage.foliage_transaction_block_hash != Some(ftb.get_hash()) {
        return Err(ErrorCode::InvalidFoliageBlockHash.into());
    }

    let (prev_transaction_block_height, prev_transaction_block_timestamp) = if height > 0 {
        let expected = expected_reward_coins(constants, records, &ftb.prev_transaction_block_hash)?;
        let claimed: HashSet<Coin> = transactions_info
            .reward_claims_incorporated
            .iter()
            .copied()
            .collect();
        let expected_set: HashSet<Coin> = expected.iter().copied().collect();
        if claimed != expected_set
            || transactions_info.reward_claims_incorporated.len() != expected.len()
        {
            return Err(ErrorCode::InvalidRewardCoins.into());
        }
        let prev_tx = records.block_record(&ftb.prev_transaction_block_hash)?;
        (prev_tx.height, prev_tx.timestamp.unwrap_or_default())
    } else {
        if !transactions_info.reward_claims_incorporated.is_empty() {
            return Err(ErrorCode::InvalidRewardCoins.into());
        }
        (0, ftb.timestamp)
    };

    if block.transactions_generator.is_some() && height < constants.initial_freeze_period {
        return Err(ErrorCode::InitialTransactionFreeze.into());
    }
    if generator_root(block.transactions_generator.as_ref()) != transactions_info.generator_root {
        return Err(ErrorCode::InvalidTransactionsGeneratorHash.into());
    }
    let ref_list = &block.transactions_generator_ref_list;
    if !ref_list.is_empty() && block.transactions_generator.is_none() {
        return Err(ErrorCode::InvalidTransactionsGeneratorRefsRoot.into());
    }
    if generator_refs_root(ref_list) != transactions_info.generator_refs_root {
        return Err(ErrorCode::InvalidTransactionsGeneratorRefsRoot.into());
    }
    if ref_list.len() > constants.max_generator_ref_list_size as usize {
        return Err(ErrorCode::TooManyGeneratorRefs.into());
    }
    if ref_list.iter().any(|h| *h >= height) {
        return Err(ErrorCode::FutureGeneratorRefs.into());
    }

    let mut removals: Vec<Bytes32> = vec![];
    let mut additions: Vec<Coin> = vec![];
    let mut removal_puzzle_hashes = HashMap::new();
    let conds = if block.transactions_generator.is_some() {
        if transactions_info.cost > constants.max_block_cost_clvm {
            return Err(ErrorCode::BlockCostExceedsMax.into());
        }
        if transactions_info.cost == 0 {
            return Err(ValidationError::with_message(
                ErrorCode::InvalidBlockCost,
                "generator with zero cost",
            ));
        }
        let npc_result = npc_result.ok_or_else(|| {
            ValidationError::with_message(ErrorCode::GeneratorRuntimeError, "generator was not run")
        })?;
        if let Some(code) = npc_result.error {
            return Err(code.into());
        }
        let conds = npc_result
            .conds
            .clone()
            .ok_or_else(|| ValidationError::new(ErrorCode::GeneratorRuntimeError))?;
        debug!(
            "Block {height} cost {} declared {}",
            conds.cost, transactions_info.cost
        );
        if conds.cost != transactions_info.cost {
            return Err(ValidationError::with_message(
                ErrorCode::InvalidBlockCost,
                format!("declared {} actual {}", transactions_info.cost, conds.cost),
            ));
        }
        for spend in &conds.spends {
            removals.push(spend.coin_id);
            removal_puzzle_hashes.insert(spend.coin_id, spend.puzzle_hash);
            additions.extend(spend.additions());
        }
        Some(conds)
    } else {
        if transactions_info.cost != 0 {
            return Err(ErrorCode::InvalidBlockCost.into());
        }
        None
    };

    if additions.iter().any(|c| c.amount > constants.max_coin_amount) {
        return Err(ErrorCode::CoinAmountExceedsMaximum.into());
    }

    let reward_coins = block.get_included_reward_coins();
    let all_additions: Vec<Coin> = additions.iter().chain(reward_coins.iter()).copied().collect();
    if ftb.additions_root != additions_root(&all_additions) {
        return Err(ErrorCode::BadAdditionRoot.into());
    }
    if ftb.removals_root != removals_root(&removals) {
        return Err(ErrorCode::BadRemovalRoot.into());
    }
    if ftb.filter_hash != transactions_filter_hash(&all_additions, &removals) {
        return Err(ErrorCode::InvalidTransactionsFilterHash.into());
    }

    let mut seen = HashSet::new();
    if all_additions.iter().any(|c| !seen.insert(c.name())) {
        return Err(ErrorCode::DuplicateOutput.into());
    }
    let mut seen = HashSet::new();
    if removals.iter().any(|r| !seen.insert(*r)) {
        return Err(ErrorCode::DoubleSpend.into());
    }

    Ok(Some(BlockBody {
        height,
        timestamp: ftb.timestamp,
        prev_transaction_block_height,
        prev_transaction_block_timestamp,
        additions,
        removals,
        reward_coins,
        removal_puzzle_hashes,
        conds,
    }))
}

/// Checks of a block body against the coin set as it stands on the block's own chain:
/// the committed set up to the fork point plus the changes in `fork`.
///
/// Returns the fees the block collects.
pub async fn validate_block_body_coins(
    constants: &ConsensusConstants,
    coin_store: &CoinStore,
    block: &FullBlock,
    body: &BlockBody,
    fork: &ForkCoins,
    validate_signature: bool,
) -> Result<u64, ConsensusError> {
    let additions_by_name: HashMap<Bytes32, Coin> =
        body.additions.iter().map(|c| (c.name(), *c)).collect();
    let mut removal_coin_records: HashMap<Bytes32, CoinRecord> = HashMap::new();
    let mut lookup_coins = vec![];
    for removal in &body.removals {
        if let Some(coin) = additions_by_name.get(removal) {
            removal_coin_records.insert(
                *removal,
                CoinRecord {
                    coin: *coin,
                    confirmed_block_index: body.height,
                    spent_block_index: Some(body.height),
                    coinbase: false,
                    timestamp: body.timestamp,
                },
            );
        } else {
            if fork.removals_since_fork.contains(removal) {
                return Err(ErrorCode::DoubleSpendInFork.into());
            }
            lookup_coins.push(*removal);
        }
    }

    let records = coin_store
        .get_coin_records_by_names(true, &lookup_coins)
        .await?;
    let mut found = HashSet::new();
    let mut look_in_fork = vec![];
    for record in records {
        found.insert(record.name());
        let before_fork = |h: u32| fork.fork_height.is_some_and(|f| h <= f);
        if before_fork(record.confirmed_block_index) {
            if record.spent_block_index.is_some_and(before_fork) {
                return Err(ValidationError::with_message(
                    ErrorCode::DoubleSpend,
                    format!("coin {} already spent", record.name()),
                )
                .into());
            }
            removal_coin_records.insert(record.name(), record);
        } else {
            look_in_fork.push(record.name());
        }
    }
    look_in_fork.extend(lookup_coins.iter().filter(|name| !found.contains(*name)));
    for name in look_in_fork {
        let Some(added) = fork.additions_since_fork.get(&name) else {
            error!("Unknown unspent coin {name} in block {}", body.height);
            return Err(ValidationError::with_message(
                ErrorCode::UnknownUnspent,
                format!("coin {name}"),
            )
            .into());
        };
        removal_coin_records.insert(
            name,
            CoinRecord {
                coin: added.coin,
                confirmed_block_index: added.confirmed_height,
                spent_block_index: None,
                coinbase: added.coinbase,
                timestamp: added.timestamp,
            },
        );
    }

    let removed: u128 = removal_coin_records
        .values()
        .map(|r| u128::from(r.coin.amount))
        .sum();
    let added: u128 = body.additions.iter().map(|c| u128::from(c.amount)).sum();
    if removed < added {
        return Err(ErrorCode::MintingCoin.into());
    }
    let fees = u64::try_from(removed - added)
        .map_err(|_| ValidationError::new(ErrorCode::CoinAmountExceedsMaximum))?;
    let reserve_fee = body.conds.as_ref().map_or(0, |c| c.reserve_fee);
    if fees < reserve_fee {
        return Err(ErrorCode::ReserveFeeConditionFailed.into());
    }
    if u128::from(fees) + u128::from(calculate_base_farmer_reward(body.height))
        > u128::from(constants.max_coin_amount)
    {
        return Err(ErrorCode::CoinAmountExceedsMaximum.into());
    }
    let declared_fees = block.transactions_info.as_ref().map_or(0, |ti| ti.fees);
    if declared_fees != fees {
        return Err(ValidationError::with_message(
            ErrorCode::InvalidBlockFeeAmount,
            format!("declared {declared_fees} actual {fees}"),
        )
        .into());
    }
    for (name, record) in &removal_coin_records {
        if body.removal_puzzle_hashes.get(name) != Some(&record.coin.puzzle_hash) {
            return Err(ErrorCode::WrongPuzzleHash.into());
        }
    }
    if let Some(conds) = &body.conds {
        if let Some(code) = mempool_check_time_locks(
            &removal_coin_records,
            conds,
            body.prev_transaction_block_height,
            body.prev_transaction_block_timestamp,
        ) {
            return Err(code.into());
        }
    }
    if validate_signature {
        validate_aggregate_signature(constants, block, body.conds.as_ref())?;
    }
    Ok(fees)
}
