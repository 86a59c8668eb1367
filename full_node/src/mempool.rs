use crate::coin_store::CoinStore;
use dg_node_core::blockchain::block_record::BlockRecord;
use dg_node_core::blockchain::coin::Coin;
use dg_node_core::blockchain::coin_record::CoinRecord;
use dg_node_core::blockchain::mempool_item::MempoolItem;
use dg_node_core::blockchain::sized_bytes::Bytes32;
use dg_node_core::blockchain::spend_bundle::SpendBundle;
use dg_node_core::blockchain::spend_bundle_conditions::SpendBundleConditions;
use dg_node_core::bls::aggregate_verify_signature;
use dg_node_core::clvm::conditions::{
    get_name_puzzle_conditions, mempool_check_time_locks, pkm_pairs, simple_solution_generator,
};
use dg_node_core::config::MempoolConfig;
use dg_node_core::consensus::constants::ConsensusConstants;
use dg_node_core::errors::{ErrorCode, ValidationError};
use log::{debug, info, warn};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Extra fee a replacement has to pay on top of the bundles it replaces.
pub const MEMPOOL_MIN_FEE_INCREASE: u64 = 10_000_000;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MempoolInclusionStatus {
    Success,
    /// Waiting on coins the chain does not know yet.
    Pending,
    Failed,
}

#[derive(Debug, Clone)]
struct PendingBundle {
    bundle: SpendBundle,
    missing: HashSet<Bytes32>,
}

/// Checked bundle not yet inserted.
struct Candidate {
    item: MempoolItem,
    conflicts: Vec<Bytes32>,
}

pub struct MempoolManager {
    constants: Arc<ConsensusConstants>,
    coin_store: CoinStore,
    config: MempoolConfig,
    items: HashMap<Bytes32, MempoolItem>,
    spends: HashMap<Bytes32, HashSet<Bytes32>>,
    pending: HashMap<Bytes32, PendingBundle>,
    total_cost: u64,
    peak: Option<BlockRecord>,
}
impl MempoolManager {
    pub fn new(constants: Arc<ConsensusConstants>, coin_store: CoinStore, config: MempoolConfig) -> Self {
        Self {
            constants,
            coin_store,
            config,
            items: HashMap::new(),
            spends: HashMap::new(),
            pending: HashMap::new(),
            total_cost: 0,
            peak: None,
        }
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }
    pub fn total_cost(&self) -> u64 {
        self.total_cost
    }
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
    pub fn peak(&self) -> Option<&BlockRecord> {
        self.peak.as_ref()
    }
    pub fn max_mempool_cost(&self) -> u64 {
        self.constants.max_mempool_cost()
    }
    /// Cost limit of a block built from the mempool.
    pub fn max_block_clvm_cost(&self) -> u64 {
        let ratio = self.config.max_block_clvm_cost_ratio.min(100);
        u64::try_from(u128::from(self.constants.max_block_cost_clvm) * u128::from(ratio) / 100)
            .unwrap_or(self.constants.max_block_cost_clvm)
    }
    pub fn get_mempool_item(&self, name: &Bytes32) -> Option<&MempoolItem> {
        self.items.get(name)
    }
    pub fn get_spendbundle(&self, name: &Bytes32) -> Option<&SpendBundle> {
        self.items.get(name).map(|item| &item.spend_bundle)
    }
    pub fn contains(&self, name: &Bytes32) -> bool {
        self.items.contains_key(name) || self.pending.contains_key(name)
    }
    /// Names of the bundles spending `coin_id`.
    pub fn items_spending(&self, coin_id: &Bytes32) -> Vec<Bytes32> {
        self.spends
            .get(coin_id)
            .map(|names| names.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Checks `bundle` against the coin set at the peak and admits it.
    ///
    /// Bundles spending coins the chain does not know yet are kept aside and retried on
    /// the next peak. Rejections carry the failed check's error code.
    pub async fn add_spend_bundle(
        &mut self,
        bundle: SpendBundle,
    ) -> Result<MempoolInclusionStatus, ValidationError> {
        let Some(peak) = self.peak.clone() else {
            return Err(ErrorCode::MempoolNotInitialized.into());
        };
        let name = bundle.name();
        if self.items.contains_key(&name) {
            return Ok(MempoolInclusionStatus::Success);
        }
        let candidate = match self.validate(bundle, name, &peak).await {
            Ok(Ok(candidate)) => candidate,
            Ok(Err(pending)) => {
                if self.pending.len() >= self.config.max_pending_bundles && !self.pending.contains_key(&name) {
                    return Err(ErrorCode::MempoolFull.into());
                }
                debug!("Bundle {name} waiting on {} unknown coins", pending.missing.len());
                self.pending.insert(name, pending);
                return Ok(MempoolInclusionStatus::Pending);
            }
            Err(e) => {
                debug!("Rejected bundle {name}: {e}");
                return Err(e);
            }
        };
        let evicted = self.make_room(&candidate)?;
        for conflict in candidate.conflicts.iter().chain(evicted.iter()) {
            self.remove_item(conflict);
        }
        if !evicted.is_empty() {
            info!("Evicted {} bundles to admit {name}", evicted.len());
        }
        self.pending.remove(&name);
        self.insert_item(candidate.item);
        Ok(MempoolInclusionStatus::Success)
    }

    /// Runs every admission check. `Ok(Err(_))` means the bundle spends unknown coins.
    async fn validate(
        &self,
        bundle: SpendBundle,
        name: Bytes32,
        peak: &BlockRecord,
    ) -> Result<Result<Candidate, PendingBundle>, ValidationError> {
        if bundle.coin_spends.is_empty() {
            return Err(ValidationError::with_message(
                ErrorCode::InvalidSpendBundle,
                "bundle has no spends",
            ));
        }
        let generator = simple_solution_generator(&bundle)
            .map_err(|e| ValidationError::with_message(ErrorCode::InvalidSpendBundle, e.to_string()))?;
        let max_cost = self.max_block_clvm_cost();
        let npc_result = get_name_puzzle_conditions(
            &generator,
            &[],
            max_cost,
            self.constants.cost_per_byte,
            true,
        );
        if let Some(error) = npc_result.error {
            return Err(error.into());
        }
        let Some(conds) = npc_result.conds.clone() else {
            return Err(ErrorCode::InvalidSpendBundle.into());
        };
        if conds.cost > max_cost {
            return Err(ErrorCode::BlockCostExceedsMax.into());
        }

        let removals = conds.removal_names();
        let additions = conds.additions();
        let mut unique = HashSet::with_capacity(removals.len());
        if removals.iter().any(|name| !unique.insert(*name)) {
            return Err(ErrorCode::DoubleSpend.into());
        }
        let mut created = HashMap::with_capacity(additions.len());
        for coin in &additions {
            if coin.amount > self.constants.max_coin_amount {
                return Err(ErrorCode::CoinAmountExceedsMaximum.into());
            }
            if created.insert(coin.name(), *coin).is_some() {
                return Err(ErrorCode::DuplicateOutput.into());
            }
        }
        let fees = conds.fees().ok_or(ErrorCode::MintingCoin)?;
        if fees < conds.reserve_fee {
            return Err(ErrorCode::ReserveFeeConditionFailed.into());
        }

        let lookup: Vec<Bytes32> = removals
            .iter()
            .filter(|name| !created.contains_key(*name))
            .copied()
            .collect();
        let mut removal_records: HashMap<Bytes32, CoinRecord> = self
            .coin_store
            .get_coin_records_by_names(true, &lookup)
            .await
            .map_err(|e| ValidationError::with_message(ErrorCode::InternalProtocolError, e.to_string()))?
            .into_iter()
            .map(|r| (r.name(), r))
            .collect();
        let missing: HashSet<Bytes32> = lookup
            .iter()
            .filter(|name| !removal_records.contains_key(*name))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Ok(Err(PendingBundle { bundle, missing }));
        }
        let peak_timestamp = peak.timestamp.unwrap_or_default();
        for name in &removals {
            match removal_records.get(name) {
                Some(record) if record.spent() => {
                    return Err(ValidationError::with_message(
                        ErrorCode::DoubleSpend,
                        format!("coin {name} spent at {:?}", record.spent_block_index),
                    ))
                }
                Some(_) => {}
                None => {
                    if let Some(coin) = created.get(name) {
                        removal_records.insert(
                            *name,
                            CoinRecord {
                                coin: *coin,
                                confirmed_block_index: peak.height + 1,
                                spent_block_index: None,
                                coinbase: false,
                                timestamp: peak_timestamp,
                            },
                        );
                    }
                }
            }
        }
        for spend in &conds.spends {
            let matches = removal_records
                .get(&spend.coin_id)
                .is_some_and(|r| r.coin.puzzle_hash == spend.puzzle_hash);
            if !matches {
                return Err(ErrorCode::WrongPuzzleHash.into());
            }
        }
        if let Some(error) = mempool_check_time_locks(&removal_records, &conds, peak.height, peak_timestamp) {
            return Err(error.into());
        }
        let pairs = pkm_pairs(&conds, &self.constants.agg_sig_me_additional_data);
        if !aggregate_verify_signature(&pairs, &bundle.aggregated_signature) {
            return Err(ErrorCode::BadAggregateSignature.into());
        }

        let (assert_height, assert_before_height, assert_before_seconds) =
            absolute_time_locks(&conds, &removal_records);
        let item = MempoolItem {
            spend_bundle: bundle,
            spend_bundle_name: name,
            fee: fees,
            cost: conds.cost,
            npc_result,
            additions,
            removals,
            height_added_to_mempool: peak.height,
            assert_height,
            assert_before_height,
            assert_before_seconds,
        };
        let conflicts = self.check_conflicts(&item)?;
        Ok(Ok(Candidate { item, conflicts }))
    }

    /// Bundles `item` would replace. Replacement needs every conflicting bundle's spends, a
    /// higher fee per cost and a fee raised by at least `MEMPOOL_MIN_FEE_INCREASE`.
    fn check_conflicts(&self, item: &MempoolItem) -> Result<Vec<Bytes32>, ValidationError> {
        let conflicts: HashSet<Bytes32> = item
            .removals
            .iter()
            .filter_map(|coin| self.spends.get(coin))
            .flatten()
            .copied()
            .collect();
        if conflicts.is_empty() {
            return Ok(vec![]);
        }
        let removals: HashSet<&Bytes32> = item.removals.iter().collect();
        let mut conflicting_fees: u128 = 0;
        let mut conflicting_cost: u128 = 0;
        for name in &conflicts {
            let Some(existing) = self.items.get(name) else {
                continue;
            };
            if !existing.removals.iter().all(|r| removals.contains(r)) {
                return Err(ValidationError::with_message(
                    ErrorCode::MempoolConflict,
                    format!("does not spend every coin of {name}"),
                ));
            }
            conflicting_fees += u128::from(existing.fee);
            conflicting_cost += u128::from(existing.cost);
        }
        let fee = u128::from(item.fee);
        if fee * conflicting_cost <= conflicting_fees * u128::from(item.cost) {
            return Err(ValidationError::with_message(
                ErrorCode::MempoolConflict,
                "fee per cost not higher than the replaced bundles",
            ));
        }
        if fee < conflicting_fees + u128::from(MEMPOOL_MIN_FEE_INCREASE) {
            return Err(ValidationError::with_message(
                ErrorCode::MempoolConflict,
                "fee increase too small",
            ));
        }
        let mut conflicts: Vec<Bytes32> = conflicts.into_iter().collect();
        conflicts.sort();
        Ok(conflicts)
    }

    /// Lowest fee per cost bundles to drop so `candidate` fits, without touching the pool.
    fn make_room(&self, candidate: &Candidate) -> Result<Vec<Bytes32>, ValidationError> {
        let freed: u64 = candidate
            .conflicts
            .iter()
            .filter_map(|name| self.items.get(name))
            .map(|item| item.cost)
            .sum();
        let max_cost = self.max_mempool_cost();
        let mut total = self.total_cost.saturating_sub(freed);
        if total.saturating_add(candidate.item.cost) <= max_cost {
            return Ok(vec![]);
        }
        let mut by_fee: Vec<&MempoolItem> = self
            .items
            .values()
            .filter(|item| !candidate.conflicts.contains(&item.spend_bundle_name))
            .collect();
        by_fee.sort_by(|a, b| by_fee_per_cost(b, a));
        let mut evicted = vec![];
        for item in by_fee {
            if total.saturating_add(candidate.item.cost) <= max_cost {
                break;
            }
            if item.cmp_fee_per_cost(&candidate.item) != Ordering::Less {
                return Err(ValidationError::with_message(
                    ErrorCode::InvalidFeeLowFee,
                    "mempool full of higher fee bundles",
                ));
            }
            total = total.saturating_sub(item.cost);
            evicted.push(item.spend_bundle_name);
        }
        if total.saturating_add(candidate.item.cost) > max_cost {
            return Err(ErrorCode::InvalidFeeLowFee.into());
        }
        Ok(evicted)
    }

    fn insert_item(&mut self, item: MempoolItem) {
        for coin in &item.removals {
            self.spends
                .entry(*coin)
                .or_default()
                .insert(item.spend_bundle_name);
        }
        self.total_cost = self.total_cost.saturating_add(item.cost);
        debug!(
            "Added bundle {} cost {} fee {}, mempool size {}",
            item.spend_bundle_name,
            item.cost,
            item.fee,
            self.items.len() + 1
        );
        self.items.insert(item.spend_bundle_name, item);
    }

    fn remove_item(&mut self, name: &Bytes32) -> Option<MempoolItem> {
        let item = self.items.remove(name)?;
        for coin in &item.removals {
            if let Some(names) = self.spends.get_mut(coin) {
                names.remove(name);
                if names.is_empty() {
                    self.spends.remove(coin);
                }
            }
        }
        self.total_cost = self.total_cost.saturating_sub(item.cost);
        Some(item)
    }

    /// Updates the pool for a new transaction block peak.
    ///
    /// `spent_coins` and `added_coins` are the coin set changes since the previous peak.
    /// After a reorg every bundle is checked again against the rolled back coin set.
    /// Returns the bundles that left the pending set.
    pub async fn new_peak(
        &mut self,
        peak: &BlockRecord,
        spent_coins: &[Bytes32],
        added_coins: &[Coin],
        fork_height: Option<u32>,
    ) -> Vec<(Bytes32, MempoolInclusionStatus)> {
        if !peak.is_transaction_block() {
            warn!("Ignoring non transaction block peak {}", peak.header_hash);
            return vec![];
        }
        let reorg = match (&self.peak, fork_height) {
            (Some(old), Some(fork)) => fork < old.height,
            (Some(_), None) => true,
            (None, _) => false,
        };
        self.peak = Some(peak.clone());
        if reorg {
            let mut items: Vec<MempoolItem> = self.items.drain().map(|(_, item)| item).collect();
            self.spends.clear();
            self.total_cost = 0;
            items.sort_by(|a, b| by_fee_per_cost(b, a));
            let count = items.len();
            for item in items {
                let name = item.spend_bundle_name;
                match self.add_spend_bundle(item.spend_bundle).await {
                    Ok(MempoolInclusionStatus::Pending) => {
                        // Its coins only existed on the abandoned chain.
                        self.pending.remove(&name);
                        debug!("Dropped bundle {name} after reorg: coins no longer exist");
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Dropped bundle {name} after reorg: {e}"),
                }
            }
            info!(
                "Mempool re-checked {count} bundles after reorg at {fork_height:?}, {} remain",
                self.items.len()
            );
        } else {
            let mut dropped = 0;
            for coin in spent_coins {
                for name in self.items_spending(coin) {
                    if self.remove_item(&name).is_some() {
                        dropped += 1;
                    }
                }
            }
            let timestamp = peak.timestamp.unwrap_or_default();
            let expired: Vec<Bytes32> = self
                .items
                .values()
                .filter(|item| {
                    item.assert_before_height.is_some_and(|h| peak.height >= h)
                        || item.assert_before_seconds.is_some_and(|s| timestamp >= s)
                })
                .map(|item| item.spend_bundle_name)
                .collect();
            for name in &expired {
                self.remove_item(name);
            }
            debug!(
                "New mempool peak {}: {dropped} bundles confirmed, {} expired",
                peak.height,
                expired.len()
            );
        }

        let added: HashSet<Bytes32> = added_coins.iter().map(Coin::name).collect();
        let retry: Vec<Bytes32> = self
            .pending
            .iter()
            .filter(|(_, p)| reorg || p.missing.iter().any(|c| added.contains(c)))
            .map(|(name, _)| *name)
            .collect();
        let mut included = vec![];
        for name in retry {
            let Some(pending) = self.pending.remove(&name) else {
                continue;
            };
            match self.add_spend_bundle(pending.bundle).await {
                Ok(MempoolInclusionStatus::Success) => {
                    included.push((name, MempoolInclusionStatus::Success));
                }
                Ok(status) => debug!("Bundle {name} still {status:?}"),
                Err(e) => {
                    debug!("Pending bundle {name} failed: {e}");
                    included.push((name, MempoolInclusionStatus::Failed));
                }
            }
        }
        included
    }

    /// Aggregates the best paying bundles that fit in one block, highest fee per cost first.
    ///
    /// `None` when the pool is empty or `peak_hash` is not the peak the pool was built on.
    pub fn create_bundle_from_mempool(&self, peak_hash: &Bytes32) -> Option<(SpendBundle, u64)> {
        let peak = self.peak.as_ref()?;
        if peak.header_hash != *peak_hash {
            debug!("Mempool peak {} does not match {peak_hash}", peak.header_hash);
            return None;
        }
        let mut by_fee: Vec<&MempoolItem> = self.items.values().collect();
        by_fee.sort_by(|a, b| by_fee_per_cost(b, a));
        let max_cost = self.max_block_clvm_cost();
        let mut cost: u64 = 0;
        let mut fees: u64 = 0;
        let mut spent = HashSet::new();
        let mut selected = vec![];
        for item in by_fee {
            if cost.saturating_add(item.cost) > max_cost {
                continue;
            }
            if item.removals.iter().any(|r| spent.contains(r)) {
                continue;
            }
            spent.extend(item.removals.iter().copied());
            cost += item.cost;
            fees = fees.saturating_add(item.fee);
            selected.push(item.spend_bundle.clone());
        }
        if selected.is_empty() {
            return None;
        }
        match SpendBundle::aggregate(&selected) {
            Ok(bundle) => {
                info!(
                    "Block bundle of {} spend bundles, cost {cost}, fees {fees}",
                    selected.len()
                );
                Some((bundle, fees))
            }
            Err(e) => {
                warn!("Failed to aggregate mempool bundles: {e}");
                None
            }
        }
    }

    /// Drops every item and pending bundle, keeping the peak.
    pub fn clear(&mut self) {
        self.items.clear();
        self.spends.clear();
        self.pending.clear();
        self.total_cost = 0;
    }
}

/// Highest height and timestamp locks a bundle must stay below, and the height it needs.
fn absolute_time_locks(
    conds: &SpendBundleConditions,
    records: &HashMap<Bytes32, CoinRecord>,
) -> (Option<u32>, Option<u32>, Option<u64>) {
    let mut assert_height = (conds.height_absolute > 0).then_some(conds.height_absolute);
    let mut before_height = conds.before_height_absolute;
    let mut before_seconds = conds.before_seconds_absolute;
    for spend in &conds.spends {
        let Some(record) = records.get(&spend.coin_id) else {
            continue;
        };
        if let Some(rel) = spend.height_relative {
            let h = record.confirmed_block_index.saturating_add(rel);
            assert_height = Some(assert_height.map_or(h, |a| a.max(h)));
        }
        if let Some(rel) = spend.before_height_relative {
            let h = record.confirmed_block_index.saturating_add(rel);
            before_height = Some(before_height.map_or(h, |b| b.min(h)));
        }
        if let Some(rel) = spend.before_seconds_relative {
            let s = record.timestamp.saturating_add(rel);
            before_seconds = Some(before_seconds.map_or(s, |b| b.min(s)));
        }
    }
    (assert_height, before_height, before_seconds)
}

fn by_fee_per_cost(a: &MempoolItem, b: &MempoolItem) -> Ordering {
    a.cmp_fee_per_cost(b)
        .then_with(|| b.spend_bundle_name.cmp(&a.spend_bundle_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use dg_node_core::consensus::constants::TEST_CONSTANTS;

    #[tokio::test]
    async fn test_uninitialized_mempool_rejects() {
        let pool = memory_pool().await.unwrap();
        let coin_store = CoinStore::create(pool).await.unwrap();
        let mut mempool = MempoolManager::new(
            Arc::new(TEST_CONSTANTS.clone()),
            coin_store,
            MempoolConfig::default(),
        );
        let result = mempool.add_spend_bundle(SpendBundle::default()).await;
        assert_eq!(result.unwrap_err().code, ErrorCode::MempoolNotInitialized);
        assert!(mempool
            .create_bundle_from_mempool(&Bytes32::default())
            .is_none());
        assert_eq!(mempool.size(), 0);
    }

    #[tokio::test]
    async fn test_block_cost_ratio() {
        let constants = Arc::new(TEST_CONSTANTS.clone());
        let max = constants.max_block_cost_clvm;
        let coin_store = CoinStore::create(memory_pool().await.unwrap()).await.unwrap();
        let config = MempoolConfig {
            max_block_clvm_cost_ratio: 50,
            max_pending_bundles: 10,
        };
        let mempool = MempoolManager::new(constants, coin_store, config);
        assert_eq!(mempool.max_block_clvm_cost(), max / 2);
        assert_eq!(mempool.total_cost(), 0);
    }
}
