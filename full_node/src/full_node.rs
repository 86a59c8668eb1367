use crate::blockchain::{Blockchain, ReceiveBlockResult};
use crate::db::open_pool;
use crate::mempool::{MempoolInclusionStatus, MempoolManager};
use crate::sync_store::SyncStore;
use dg_node_core::blockchain::block_record::BlockRecord;
use dg_node_core::blockchain::blockchain_state::{BlockchainState, SyncState};
use dg_node_core::blockchain::coin::Coin;
use dg_node_core::blockchain::coin_record::CoinRecord;
use dg_node_core::blockchain::full_block::FullBlock;
use dg_node_core::blockchain::mempool_item::MempoolItem;
use dg_node_core::blockchain::sized_bytes::Bytes32;
use dg_node_core::blockchain::spend_bundle::SpendBundle;
use dg_node_core::config::NodeConfig;
use dg_node_core::consensus::constants::ConsensusConstants;
use dg_node_core::consensus::verifier::ProofVerifier;
use dg_node_core::errors::{ErrorCode, ValidationError};
use dg_node_logger::{LogEvent, NodeLogger};
use log::{debug, error, info, warn};
use sqlx::SqlitePool;
use std::io::Error;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

const PEAK_CHANNEL_SIZE: usize = 64;

/// Sent to subscribers whenever the peak moves.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PeakChanged {
    pub header_hash: Bytes32,
    pub height: u32,
    pub weight: u128,
    pub fork_height: Option<u32>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Added { new_peak: bool },
    Invalid { height: u32, error: ErrorCode },
}

pub struct FullNode {
    config: NodeConfig,
    blockchain: Arc<Blockchain>,
    mempool: Mutex<MempoolManager>,
    sync_store: SyncStore,
    peak_sender: broadcast::Sender<PeakChanged>,
    logger: Option<Arc<NodeLogger>>,
}
impl FullNode {
    /// Installs the node logger from `config.logging`, then opens the node like `create`.
    ///
    /// A process that already has a logger keeps it.
    pub async fn start(config: NodeConfig, verifier: Arc<dyn ProofVerifier>) -> Result<Self, Error> {
        let logger = match NodeLogger::from_config(&config.logging) {
            Ok(logger) => Some(logger),
            Err(e) => {
                debug!("Keeping the installed logger: {e:?}");
                None
            }
        };
        let mut node = Self::create(config, verifier).await?;
        node.logger = logger;
        Ok(node)
    }

    /// Opens the database at the configured path and loads the chain.
    pub async fn create(config: NodeConfig, verifier: Arc<dyn ProofVerifier>) -> Result<Self, Error> {
        let constants = config.network.consensus_constants();
        let pool = open_pool(&config.database_path).await?;
        Self::create_with_pool(config, constants, verifier, pool).await
    }

    pub async fn create_with_pool(
        config: NodeConfig,
        constants: Arc<ConsensusConstants>,
        verifier: Arc<dyn ProofVerifier>,
        pool: SqlitePool,
    ) -> Result<Self, Error> {
        let blockchain = Arc::new(Blockchain::create(constants.clone(), verifier, pool).await?);
        let mut mempool = MempoolManager::new(
            constants,
            blockchain.coin_store().clone(),
            config.mempool.clone(),
        );
        if let Some(tx_peak) = blockchain.get_last_transaction_block() {
            mempool
                .new_peak(&tx_peak, &[], &[], Some(tx_peak.height))
                .await;
        }
        let (peak_sender, _) = broadcast::channel(PEAK_CHANNEL_SIZE);
        info!(
            "Full node started on {:?}, peak height {:?}",
            config.network,
            blockchain.get_peak_height()
        );
        Ok(Self {
            config,
            blockchain,
            mempool: Mutex::new(mempool),
            sync_store: SyncStore::new(),
            peak_sender,
            logger: None,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
    pub fn blockchain(&self) -> &Arc<Blockchain> {
        &self.blockchain
    }
    pub fn mempool(&self) -> &Mutex<MempoolManager> {
        &self.mempool
    }
    pub fn sync_store(&self) -> &SyncStore {
        &self.sync_store
    }
    pub fn subscribe(&self) -> broadcast::Receiver<PeakChanged> {
        self.peak_sender.subscribe()
    }
    /// Log records of the logger this node installed, if it installed one.
    pub fn log_events(&self) -> Option<broadcast::Receiver<LogEvent>> {
        self.logger.as_ref().map(|logger| logger.subscribe())
    }

    /// Receives one block and, on a new peak, updates the mempool and notifies subscribers.
    pub async fn respond_block(
        &self,
        block: &FullBlock,
    ) -> Result<(ReceiveBlockResult, Option<ErrorCode>), Error> {
        let (result, error, fork_height) = self.blockchain.receive_block(block, None).await?;
        match result {
            ReceiveBlockResult::NewPeak => self.peak_post_processing(fork_height).await?,
            ReceiveBlockResult::InvalidBlock => {
                warn!("Block {} at height {} invalid: {error:?}", block.header_hash(), block.height());
            }
            ReceiveBlockResult::DisconnectedBlock => {
                info!("Disconnected block {} at height {}", block.header_hash(), block.height());
            }
            ReceiveBlockResult::AddedAsOrphan | ReceiveBlockResult::AlreadyHaveBlock => {}
        }
        Ok((result, error))
    }

    /// Pre-validates a batch of consecutive blocks then adds them in order.
    pub async fn sync_batch(&self, blocks: &[FullBlock]) -> Result<BatchOutcome, Error> {
        let pre_validation = self
            .blockchain
            .pre_validate_blocks(blocks, true)
            .await?;
        let mut lowest_fork: Option<Option<u32>> = None;
        let mut outcome = BatchOutcome::Added { new_peak: false };
        for (block, pre) in blocks.iter().zip(pre_validation.iter()) {
            let (result, error, fork_height) = self.blockchain.receive_block(block, Some(pre)).await?;
            match result {
                ReceiveBlockResult::NewPeak => {
                    lowest_fork = Some(match lowest_fork {
                        None => fork_height,
                        Some(prev) => prev.zip(fork_height).map(|(a, b)| a.min(b)),
                    });
                }
                ReceiveBlockResult::InvalidBlock | ReceiveBlockResult::DisconnectedBlock => {
                    let error = error.unwrap_or(ErrorCode::InvalidPrevBlockHash);
                    error!("Sync batch stopped at height {}: {error}", block.height());
                    outcome = BatchOutcome::Invalid {
                        height: block.height(),
                        error,
                    };
                    break;
                }
                ReceiveBlockResult::AddedAsOrphan | ReceiveBlockResult::AlreadyHaveBlock => {}
            }
        }
        if let Some(fork_height) = lowest_fork {
            self.peak_post_processing(fork_height).await?;
            if let BatchOutcome::Added { new_peak } = &mut outcome {
                *new_peak = true;
            }
        }
        Ok(outcome)
    }

    /// Hands the coin set changes since `fork_height` to the mempool and announces the peak.
    async fn peak_post_processing(&self, fork_height: Option<u32>) -> Result<(), Error> {
        let Some(peak) = self.blockchain.get_peak() else {
            return Ok(());
        };
        let coin_store = self.blockchain.coin_store();
        let mut spent: Vec<Bytes32> = vec![];
        let mut added: Vec<Coin> = vec![];
        for height in fork_height.map_or(0, |h| h + 1)..=peak.height {
            spent.extend(
                coin_store
                    .get_coins_removed_at_height(height)
                    .await?
                    .iter()
                    .map(CoinRecord::name),
            );
            added.extend(
                coin_store
                    .get_coins_added_at_height(height)
                    .await?
                    .iter()
                    .map(|r| r.coin),
            );
        }
        if let Some(tx_peak) = self.blockchain.get_last_transaction_block() {
            let included = self
                .mempool
                .lock()
                .await
                .new_peak(&tx_peak, &spent, &added, fork_height)
                .await;
            if !included.is_empty() {
                info!("{} pending bundles resolved at new peak", included.len());
            }
        }
        let _ = self.peak_sender.send(PeakChanged {
            header_hash: peak.header_hash,
            height: peak.height,
            weight: peak.weight,
            fork_height,
        });
        Ok(())
    }

    pub async fn add_spend_bundle(
        &self,
        bundle: SpendBundle,
    ) -> Result<MempoolInclusionStatus, ValidationError> {
        if self.sync_store.get_sync_mode() {
            return Err(ErrorCode::NoTransactionsWhileSyncing.into());
        }
        self.mempool.lock().await.add_spend_bundle(bundle).await
    }

    /// Best bundle for a block on top of the current transaction peak.
    pub async fn get_block_bundle(&self) -> Option<(SpendBundle, u64)> {
        let tx_peak = self.blockchain.get_last_transaction_block()?;
        self.mempool
            .lock()
            .await
            .create_bundle_from_mempool(&tx_peak.header_hash)
    }

    pub fn get_peak(&self) -> Option<BlockRecord> {
        self.blockchain.get_peak()
    }
    pub async fn get_block(&self, header_hash: &Bytes32) -> Result<Option<FullBlock>, Error> {
        self.blockchain.get_full_block(header_hash).await
    }
    pub fn get_block_record_by_height(&self, height: u32) -> Option<BlockRecord> {
        self.blockchain
            .height_to_hash(height)
            .and_then(|hash| self.blockchain.try_block_record(&hash))
    }
    pub async fn get_coin_records_by_puzzle_hash(
        &self,
        puzzle_hash: &Bytes32,
        include_spent: bool,
        start_height: Option<u32>,
    ) -> Result<Vec<CoinRecord>, Error> {
        self.blockchain
            .coin_store()
            .get_coin_records_by_puzzle_hash(puzzle_hash, include_spent, start_height)
            .await
    }
    pub async fn get_mempool_item(&self, name: &Bytes32) -> Option<MempoolItem> {
        self.mempool.lock().await.get_mempool_item(name).cloned()
    }

    pub async fn get_blockchain_state(&self) -> BlockchainState {
        let constants = self.blockchain.constants();
        let peak = self.blockchain.get_peak();
        let (difficulty, sub_slot_iters) = match &peak {
            Some(peak) => (
                self.blockchain
                    .get_next_difficulty(&peak.header_hash, false)
                    .unwrap_or(constants.difficulty_starting),
                self.blockchain
                    .get_next_slot_iters(&peak.header_hash, false)
                    .unwrap_or(constants.sub_slot_iters_starting),
            ),
            None => (constants.difficulty_starting, constants.sub_slot_iters_starting),
        };
        let sync_mode = self.sync_store.get_sync_mode();
        let peak_height = peak.as_ref().map_or(0, |p| p.height);
        let sync_tip_height = self
            .sync_store
            .get_heaviest_peak()
            .map_or(peak_height, |p| p.height);
        let mempool = self.mempool.lock().await;
        BlockchainState {
            genesis_challenge_initialized: true,
            sync: SyncState {
                sync_mode,
                synced: !sync_mode && peak.is_some(),
                sync_tip_height,
                sync_progress_height: peak_height,
            },
            difficulty,
            sub_slot_iters,
            mempool_size: mempool.size(),
            mempool_cost: mempool.total_cost(),
            mempool_max_total_cost: mempool.max_mempool_cost(),
            block_max_cost: constants.max_block_cost_clvm,
            peak,
        }
    }
}
