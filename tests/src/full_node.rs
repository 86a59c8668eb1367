use crate::common::{
    init_logger, memory_node, respond_all, spendable_coins, temp_db_path, BT, LOGGER,
};
use dg_full_node::blockchain::ReceiveBlockResult;
use dg_full_node::full_node::{BatchOutcome, FullNode};
use dg_node_core::blockchain::sized_bytes::Bytes32;
use dg_node_core::config::NodeConfig;
use dg_node_core::errors::ErrorCode;
use dg_node_simulator::block_tools::BlockOptions;
use dg_node_simulator::wallet::{unsigned_bundle, Condition};
use log::info;
use tokio::sync::broadcast::error::RecvError;

#[tokio::test]
async fn test_restart_keeps_chain_and_coins() {
    init_logger();
    let path = temp_db_path();
    let config = NodeConfig {
        database_path: path.clone(),
        ..Default::default()
    };
    let blocks = BT
        .get_consecutive_blocks(6, &[], &BlockOptions::default().guarantee_transaction_block())
        .unwrap();
    let (peak, coins) = {
        let node = FullNode::create(config.clone(), BT.verifier()).await.unwrap();
        respond_all(&node, &blocks).await;
        let coin = spendable_coins(node.blockchain()).await[0];
        let bundle =
            unsigned_bundle(&[(coin, vec![Condition::CreateCoin(Bytes32::new([1u8; 32]), coin.amount)])]).unwrap();
        let blocks = BT
            .get_consecutive_blocks(
                1,
                &blocks,
                &BlockOptions::default().with_transaction_data(bundle),
            )
            .unwrap();
        respond_all(&node, &blocks[6..]).await;
        (node.get_peak().unwrap(), spendable_coins(node.blockchain()).await)
    };

    let node = FullNode::create(config, BT.verifier()).await.unwrap();
    assert_eq!(node.get_peak(), Some(peak.clone()));
    assert_eq!(spendable_coins(node.blockchain()).await, coins);
    for block in &blocks {
        assert_eq!(
            node.get_block_record_by_height(block.height()).map(|r| r.header_hash),
            Some(block.header_hash())
        );
    }
    assert_eq!(
        node.get_block(&blocks[2].header_hash()).await.unwrap().as_ref(),
        Some(&blocks[2])
    );
    assert!(node.mempool().lock().await.peak().is_some());
    info!("Reopened node at height {}", peak.height);
    drop(node);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_sync_batch() {
    let node = memory_node().await;
    let blocks = BT.get_consecutive_blocks(16, &[], &BlockOptions::default()).unwrap();
    let mut peaks = node.subscribe();
    assert_eq!(
        node.sync_batch(&blocks[..8]).await.unwrap(),
        BatchOutcome::Added { new_peak: true }
    );
    let changed = peaks.recv().await.unwrap();
    assert_eq!(changed.height, 7);
    assert_eq!(changed.fork_height, None);
    assert_eq!(
        node.sync_batch(&blocks[..8]).await.unwrap(),
        BatchOutcome::Added { new_peak: false }
    );

    let mut batch = blocks[8..].to_vec();
    batch[3].reward_chain_block.weight += 1;
    match node.sync_batch(&batch).await.unwrap() {
        BatchOutcome::Invalid { height, .. } => assert_eq!(height, 11),
        other => panic!("expected invalid batch, got {other:?}"),
    }
    assert_eq!(node.get_peak().unwrap().height, 10);
    assert_eq!(
        node.sync_batch(&blocks[11..]).await.unwrap(),
        BatchOutcome::Added { new_peak: true }
    );
    assert_eq!(node.get_peak().unwrap().header_hash, blocks[15].header_hash());
}

#[tokio::test]
async fn test_blockchain_state() {
    let node = memory_node().await;
    let state = node.get_blockchain_state().await;
    assert!(state.peak.is_none());
    assert!(!state.sync.synced);
    let blocks = BT.get_consecutive_blocks(4, &[], &BlockOptions::default()).unwrap();
    respond_all(&node, &blocks).await;

    let state = node.get_blockchain_state().await;
    let constants = BT.constants();
    assert_eq!(state.peak.unwrap().header_hash, blocks[3].header_hash());
    assert_eq!(state.difficulty, constants.difficulty_starting);
    assert_eq!(state.sub_slot_iters, constants.sub_slot_iters_starting);
    assert_eq!(state.mempool_size, 0);
    assert_eq!(state.mempool_max_total_cost, constants.max_mempool_cost());
    assert!(state.sync.synced);

    node.sync_store().set_sync_mode(true);
    node.sync_store()
        .peer_has_block(Bytes32::new([1u8; 32]), Bytes32::new([2u8; 32]), 1 << 40, 900, true);
    let state = node.get_blockchain_state().await;
    assert!(state.sync.sync_mode);
    assert!(!state.sync.synced);
    assert_eq!(state.sync.sync_tip_height, 900);
    assert_eq!(state.sync.sync_progress_height, 3);
}

#[tokio::test]
async fn test_invalid_block_is_reported() {
    let node = memory_node().await;
    let blocks = BT.get_consecutive_blocks(3, &[], &BlockOptions::default()).unwrap();
    respond_all(&node, &blocks[..2]).await;
    let mut bad = blocks[2].clone();
    bad.reward_chain_block.height += 1;
    let (result, error) = node.respond_block(&bad).await.unwrap();
    assert_eq!(result, ReceiveBlockResult::InvalidBlock);
    assert_eq!(error, Some(ErrorCode::InvalidHeight));
    respond_all(&node, &blocks[2..]).await;
}

#[tokio::test]
async fn test_start_logs_through_node_logger() {
    init_logger();
    let mut events = LOGGER.subscribe();
    let path = temp_db_path();
    let config = NodeConfig {
        database_path: path.clone(),
        ..Default::default()
    };
    let node = FullNode::start(config, BT.verifier()).await.unwrap();
    // The test process installed its logger first, so the node keeps that one.
    assert!(node.log_events().is_none());
    let opened = format!("Opening blockchain database at {}", path.display());
    loop {
        match events.recv().await {
            Ok(event) if event.message == opened => {
                assert_eq!(event.target, "dg_full_node::db");
                assert_eq!(event.level, log::Level::Info);
                break;
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => panic!("logger channel closed"),
        }
    }
    drop(node);
    let _ = std::fs::remove_file(&path);
}
