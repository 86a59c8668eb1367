use dg_full_node::blockchain::{Blockchain, ReceiveBlockResult};
use dg_full_node::db::memory_pool;
use dg_full_node::full_node::FullNode;
use dg_node_core::blockchain::coin::Coin;
use dg_node_core::blockchain::full_block::FullBlock;
use dg_node_core::config::NodeConfig;
use dg_node_core::errors::ErrorCode;
use dg_node_core::consensus::constants::{ConsensusConstants, TEST_CONSTANTS};
use dg_node_logger::{LoggingConfig, NodeLogger};
use dg_node_simulator::block_tools::BlockTools;
use dg_node_simulator::wallet::anyone_can_spend_puzzle_hash;
use lazy_static::lazy_static;
use std::path::PathBuf;
use std::sync::Arc;

lazy_static! {
    pub static ref CONSTANTS: Arc<ConsensusConstants> = Arc::new(TEST_CONSTANTS.clone());
    pub static ref BT: BlockTools = BlockTools::new(CONSTANTS.clone()).unwrap();
    pub static ref LOGGER: Arc<NodeLogger> = NodeLogger::from_config(&LoggingConfig {
        use_colors: false,
        ..Default::default()
    })
    .unwrap();
}

pub fn init_logger() {
    lazy_static::initialize(&LOGGER);
}

pub async fn empty_blockchain() -> Blockchain {
    init_logger();
    Blockchain::create(CONSTANTS.clone(), BT.verifier(), memory_pool().await.unwrap())
        .await
        .unwrap()
}

pub async fn memory_node() -> FullNode {
    init_logger();
    FullNode::create_with_pool(
        NodeConfig::default(),
        CONSTANTS.clone(),
        BT.verifier(),
        memory_pool().await.unwrap(),
    )
    .await
    .unwrap()
}

pub async fn respond_all(node: &FullNode, blocks: &[FullBlock]) {
    for block in blocks {
        let (result, error) = node.respond_block(block).await.unwrap();
        assert!(
            matches!(
                result,
                ReceiveBlockResult::NewPeak | ReceiveBlockResult::AlreadyHaveBlock
            ),
            "block at height {} not added: {result:?} {error:?}",
            block.height()
        );
    }
}

pub fn temp_db_path() -> PathBuf {
    std::env::temp_dir()
        .join("dg_node_tests")
        .join(format!("{}.sqlite", uuid::Uuid::new_v4()))
}

pub async fn add_blocks(blockchain: &Blockchain, blocks: &[FullBlock]) {
    for block in blocks {
        let (result, error, _) = blockchain.receive_block(block, None).await.unwrap();
        assert!(
            matches!(
                result,
                ReceiveBlockResult::NewPeak | ReceiveBlockResult::AlreadyHaveBlock
            ),
            "block at height {} not added: {result:?} {error:?}",
            block.height()
        );
    }
}

/// Unspent anyone-can-spend coins at the peak, largest first.
pub async fn spendable_coins(blockchain: &Blockchain) -> Vec<Coin> {
    let mut coins: Vec<Coin> = blockchain
        .coin_store()
        .get_coin_records_by_puzzle_hash(&anyone_can_spend_puzzle_hash(), false, None)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.coin)
        .collect();
    coins.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.name().cmp(&b.name())));
    coins
}

pub async fn assert_invalid(blockchain: &Blockchain, block: &FullBlock, expected: ErrorCode) {
    let (result, error, _) = blockchain.receive_block(block, None).await.unwrap();
    assert_eq!(result, ReceiveBlockResult::InvalidBlock, "expected {expected}");
    assert_eq!(error, Some(expected));
    assert!(!blockchain.contains_block(&block.header_hash()));
}
