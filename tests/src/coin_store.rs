use crate::common::init_logger;
use dg_full_node::coin_store::CoinStore;
use dg_full_node::db::memory_pool;
use dg_node_core::blockchain::coin::Coin;
use dg_node_core::blockchain::sized_bytes::Bytes32;
use dg_node_core::errors::{ConsensusError, ErrorCode};

fn coin(seed: u8, amount: u64) -> Coin {
    Coin::new(Bytes32::new([seed; 32]), Bytes32::new([seed.wrapping_add(100); 32]), amount)
}

fn expect_invalid(result: Result<(), ConsensusError>, code: ErrorCode) {
    match result {
        Err(ConsensusError::Invalid(e)) => assert_eq!(e.code, code),
        other => panic!("expected {code}, got {other:?}"),
    }
}

async fn store() -> CoinStore {
    init_logger();
    CoinStore::create(memory_pool().await.unwrap()).await.unwrap()
}

#[tokio::test]
async fn test_apply_and_query() {
    let store = store().await;
    let reward = coin(1, 1_750_000_000_000);
    let farmer = coin(2, 250_000_000_000);
    store.new_block(0, 1000, &[], &[], &[reward, farmer]).await.unwrap();
    let child = Coin::new(reward.name(), Bytes32::new([7u8; 32]), 1_000);
    store
        .new_block(1, 1010, &[child], &[reward.name()], &[])
        .await
        .unwrap();

    let record = store.get_coin_record(&reward.name()).await.unwrap().unwrap();
    assert!(record.coinbase);
    assert_eq!(record.confirmed_block_index, 0);
    assert_eq!(record.spent_block_index, Some(1));
    let record = store.get_coin_record(&child.name()).await.unwrap().unwrap();
    assert!(!record.coinbase);
    assert_eq!(record.timestamp, 1010);

    assert_eq!(store.get_coins_added_at_height(1).await.unwrap().len(), 1);
    assert_eq!(store.get_coins_removed_at_height(1).await.unwrap()[0].coin, reward);
    let unspent = store.get_unspent_coin_records().await.unwrap();
    assert_eq!(unspent.len(), 2);
    let by_name = store
        .get_coin_records_by_names(false, &[reward.name(), farmer.name()])
        .await
        .unwrap();
    assert_eq!(by_name.len(), 1);
    assert_eq!(by_name[0].coin, farmer);
    let by_puzzle = store
        .get_coin_records_by_puzzle_hash(&Bytes32::new([7u8; 32]), false, Some(1))
        .await
        .unwrap();
    assert_eq!(by_puzzle.len(), 1);
}

#[tokio::test]
async fn test_rejected_block_leaves_store_untouched() {
    let store = store().await;
    let existing = coin(1, 100);
    store.new_block(0, 1000, &[], &[], &[existing]).await.unwrap();

    let fresh = coin(3, 5);
    expect_invalid(
        store.new_block(1, 1010, &[fresh], &[coin(4, 1).name()], &[]).await,
        ErrorCode::UnknownUnspent,
    );
    expect_invalid(
        store.new_block(1, 1010, &[existing], &[], &[]).await,
        ErrorCode::DuplicateOutput,
    );
    expect_invalid(
        store
            .new_block(1, 1010, &[], &[existing.name(), existing.name()], &[])
            .await,
        ErrorCode::DoubleSpend,
    );
    assert!(store.get_coin_record(&fresh.name()).await.unwrap().is_none());
    assert!(!store.get_coin_record(&existing.name()).await.unwrap().unwrap().spent());

    store.new_block(1, 1010, &[], &[existing.name()], &[]).await.unwrap();
    expect_invalid(
        store.new_block(2, 1020, &[], &[existing.name()], &[]).await,
        ErrorCode::DoubleSpend,
    );
}

#[tokio::test]
async fn test_spend_coin_created_in_same_block() {
    let store = store().await;
    let parent = coin(1, 100);
    store.new_block(0, 1000, &[], &[], &[parent]).await.unwrap();
    let child = Coin::new(parent.name(), Bytes32::new([5u8; 32]), 60);
    let grandchild = Coin::new(child.name(), Bytes32::new([6u8; 32]), 60);
    store
        .new_block(1, 1010, &[child, grandchild], &[parent.name(), child.name()], &[])
        .await
        .unwrap();
    let record = store.get_coin_record(&child.name()).await.unwrap().unwrap();
    assert_eq!(record.confirmed_block_index, 1);
    assert_eq!(record.spent_block_index, Some(1));
}

#[tokio::test]
async fn test_rollback() {
    let store = store().await;
    let first = coin(1, 100);
    store.new_block(0, 1000, &[], &[], &[first]).await.unwrap();
    let second = Coin::new(first.name(), Bytes32::new([2u8; 32]), 100);
    store.new_block(1, 1010, &[second], &[first.name()], &[]).await.unwrap();
    let third = Coin::new(second.name(), Bytes32::new([3u8; 32]), 100);
    store.new_block(2, 1020, &[third], &[second.name()], &[]).await.unwrap();

    let changed = store.rollback_to_height(0).await.unwrap();
    assert_eq!(changed.len(), 3);
    assert!(store.get_coin_record(&second.name()).await.unwrap().is_none());
    assert!(store.get_coin_record(&third.name()).await.unwrap().is_none());
    let record = store.get_coin_record(&first.name()).await.unwrap().unwrap();
    assert_eq!(record.spent_block_index, None);
    assert!(store.rollback_to_height(0).await.unwrap().is_empty());
    assert!(store.rollback_to_height(5).await.unwrap().is_empty());

    // The same height can be applied again after the rollback.
    store.new_block(1, 1011, &[second], &[first.name()], &[]).await.unwrap();
    assert_eq!(
        store.get_coin_record(&second.name()).await.unwrap().unwrap().timestamp,
        1011
    );
}
