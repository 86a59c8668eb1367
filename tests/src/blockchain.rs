use crate::common::{add_blocks, assert_invalid, empty_blockchain, init_logger, spendable_coins, BT, CONSTANTS};
use dg_full_node::blockchain::{Blockchain, ReceiveBlockResult};
use dg_full_node::db::memory_pool;
use dg_node_core::blockchain::coin::Coin;
use dg_node_core::blockchain::full_block::FullBlock;
use dg_node_core::blockchain::sized_bytes::Bytes32;
use dg_node_core::blockchain::spend_bundle::SpendBundle;
use dg_node_core::consensus::constants::ConsensusConstants;
use dg_node_core::errors::ErrorCode;
use dg_node_simulator::block_tools::BlockOptions;
use dg_node_simulator::wallet::{anyone_can_spend_puzzle_hash, unsigned_bundle, Condition};
use std::sync::Arc;

fn tx_options() -> BlockOptions {
    BlockOptions::default().guarantee_transaction_block()
}

fn send(coin: &Coin, to: Bytes32, fee: u64) -> BlockOptions {
    let bundle = unsigned_bundle(&[(*coin, vec![Condition::CreateCoin(to, coin.amount - fee)])]).unwrap();
    tx_options().with_transaction_data(bundle)
}

async fn receive(blockchain: &Blockchain, block: &FullBlock) -> (ReceiveBlockResult, Option<ErrorCode>) {
    let (result, error, _) = blockchain.receive_block(block, None).await.unwrap();
    (result, error)
}

#[tokio::test]
async fn test_genesis_and_chain() {
    let blockchain = empty_blockchain().await;
    assert!(blockchain.get_peak().is_none());
    let blocks = BT.get_consecutive_blocks(12, &[], &BlockOptions::default()).unwrap();
    let mut last_weight = 0;
    for block in &blocks {
        let (result, error, fork_height) = blockchain.receive_block(block, None).await.unwrap();
        assert_eq!(result, ReceiveBlockResult::NewPeak, "{error:?}");
        assert_eq!(fork_height, block.height().checked_sub(1));
        let peak = blockchain.get_peak().unwrap();
        assert_eq!(peak.header_hash, block.header_hash());
        assert!(peak.weight > last_weight);
        last_weight = peak.weight;
    }
    assert_eq!(blockchain.get_peak_height(), Some(11));
    for block in &blocks {
        assert_eq!(blockchain.height_to_hash(block.height()), Some(block.header_hash()));
    }
    let stored = blockchain.get_full_block(&blocks[3].header_hash()).await.unwrap();
    assert_eq!(stored.as_ref(), Some(&blocks[3]));
}

#[tokio::test]
async fn test_already_have_and_disconnected() {
    let blockchain = empty_blockchain().await;
    let blocks = BT.get_consecutive_blocks(6, &[], &BlockOptions::default()).unwrap();
    assert_eq!(
        receive(&blockchain, &blocks[1]).await,
        (ReceiveBlockResult::DisconnectedBlock, None)
    );
    add_blocks(&blockchain, &blocks[..3]).await;
    assert_eq!(
        receive(&blockchain, &blocks[2]).await,
        (ReceiveBlockResult::AlreadyHaveBlock, None)
    );
    assert_eq!(
        receive(&blockchain, &blocks[4]).await,
        (ReceiveBlockResult::DisconnectedBlock, None)
    );
    assert_eq!(blockchain.get_peak_height(), Some(2));
}

#[tokio::test]
async fn test_genesis_must_be_first() {
    let blockchain = empty_blockchain().await;
    let blocks = BT.get_consecutive_blocks(2, &[], &BlockOptions::default()).unwrap();
    let mut bad = blocks[0].clone();
    bad.reward_chain_block.weight += 1;
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidWeight).await;
    add_blocks(&blockchain, &blocks).await;
}

#[tokio::test]
async fn test_reorg_and_back() {
    let blockchain = empty_blockchain().await;
    let chain_a = BT.get_consecutive_blocks(10, &[], &tx_options()).unwrap();
    add_blocks(&blockchain, &chain_a).await;
    let other_farmer = Bytes32::new([9u8; 32]);
    let chain_b = BT
        .get_consecutive_blocks(
            6,
            &chain_a[..5],
            &tx_options()
                .with_seed(Bytes32::new([1u8; 32]))
                .with_farmer_reward_puzzle_hash(other_farmer),
        )
        .unwrap();
    for block in &chain_b[5..10] {
        assert_eq!(receive(&blockchain, block).await.0, ReceiveBlockResult::AddedAsOrphan);
        assert_eq!(blockchain.get_peak().unwrap().header_hash, chain_a[9].header_hash());
    }
    let (result, _, fork_height) = blockchain.receive_block(&chain_b[10], None).await.unwrap();
    assert_eq!(result, ReceiveBlockResult::NewPeak);
    assert_eq!(fork_height, Some(4));
    for block in &chain_b {
        assert_eq!(blockchain.height_to_hash(block.height()), Some(block.header_hash()));
    }
    let rewarded = blockchain
        .coin_store()
        .get_coin_records_by_puzzle_hash(&other_farmer, false, None)
        .await
        .unwrap();
    assert!(!rewarded.is_empty());

    // The reorged coin set is the one a node following chain B from the start would have.
    let direct = empty_blockchain().await;
    add_blocks(&direct, &chain_b).await;
    assert_eq!(spendable_coins(&blockchain).await, spendable_coins(&direct).await);

    let chain_a = BT.get_consecutive_blocks(3, &chain_a, &tx_options()).unwrap();
    assert_eq!(receive(&blockchain, &chain_a[10]).await.0, ReceiveBlockResult::AddedAsOrphan);
    let (result, _, fork_height) = blockchain.receive_block(&chain_a[11], None).await.unwrap();
    assert_eq!(result, ReceiveBlockResult::NewPeak);
    assert_eq!(fork_height, Some(4));
    add_blocks(&blockchain, &chain_a[12..]).await;
    assert_eq!(blockchain.get_peak().unwrap().header_hash, chain_a[12].header_hash());
    assert_eq!(blockchain.height_to_hash(5), Some(chain_a[5].header_hash()));
    let rewarded = blockchain
        .coin_store()
        .get_coin_records_by_puzzle_hash(&other_farmer, true, None)
        .await
        .unwrap();
    assert!(rewarded.is_empty());
}

#[tokio::test]
async fn test_receive_order_does_not_change_peak() {
    let chain_a = BT.get_consecutive_blocks(8, &[], &BlockOptions::default()).unwrap();
    let chain_b = BT
        .get_consecutive_blocks(5, &chain_a[..4], &BlockOptions::default().with_seed(Bytes32::new([2u8; 32])))
        .unwrap();
    let first = empty_blockchain().await;
    add_blocks(&first, &chain_a).await;
    for block in &chain_b[4..] {
        receive(&first, block).await;
    }
    let second = empty_blockchain().await;
    add_blocks(&second, &chain_b).await;
    for block in &chain_a[4..] {
        receive(&second, block).await;
    }
    assert_eq!(first.get_peak(), second.get_peak());
    assert_eq!(first.get_peak().unwrap().header_hash, chain_b[8].header_hash());
    assert_eq!(spendable_coins(&first).await, spendable_coins(&second).await);
}

#[tokio::test]
async fn test_spend_and_double_spend() {
    let blockchain = empty_blockchain().await;
    let blocks = BT.get_consecutive_blocks(3, &[], &tx_options()).unwrap();
    add_blocks(&blockchain, &blocks).await;
    let coin = spendable_coins(&blockchain).await[0];
    let receiver = Bytes32::new([7u8; 32]);
    let blocks = BT.get_consecutive_blocks(1, &blocks, &send(&coin, receiver, 1000)).unwrap();
    add_blocks(&blockchain, &blocks[3..]).await;
    assert_eq!(blockchain.get_peak().unwrap().fees, Some(1000));
    let spent = blockchain.coin_store().get_coin_record(&coin.name()).await.unwrap().unwrap();
    assert_eq!(spent.spent_block_index, Some(3));
    let received = blockchain
        .coin_store()
        .get_coin_records_by_puzzle_hash(&receiver, false, None)
        .await
        .unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].coin.amount, coin.amount - 1000);
    assert_eq!(received[0].confirmed_block_index, 3);

    let again = BT
        .get_consecutive_blocks(1, &blocks, &send(&coin, Bytes32::new([8u8; 32]), 0))
        .unwrap();
    assert_invalid(&blockchain, &again[4], ErrorCode::DoubleSpend).await;
}

#[tokio::test]
async fn test_double_spend_in_fork() {
    let blockchain = empty_blockchain().await;
    let chain_a = BT.get_consecutive_blocks(5, &[], &tx_options()).unwrap();
    add_blocks(&blockchain, &chain_a).await;
    let coin = spendable_coins(&blockchain).await[0];
    let chain_a = BT.get_consecutive_blocks(5, &chain_a, &BlockOptions::default()).unwrap();
    add_blocks(&blockchain, &chain_a[5..]).await;

    let fork_options = |to: Bytes32| send(&coin, to, 0).with_seed(Bytes32::new([3u8; 32]));
    let chain_b = BT
        .get_consecutive_blocks(1, &chain_a[..5], &fork_options(Bytes32::new([4u8; 32])))
        .unwrap();
    assert_eq!(receive(&blockchain, &chain_b[5]).await.0, ReceiveBlockResult::AddedAsOrphan);
    let chain_b = BT
        .get_consecutive_blocks(1, &chain_b, &fork_options(Bytes32::new([5u8; 32])))
        .unwrap();
    assert_invalid(&blockchain, &chain_b[6], ErrorCode::DoubleSpendInFork).await;
}

#[tokio::test]
async fn test_unknown_and_minted_coins() {
    let blockchain = empty_blockchain().await;
    let blocks = BT.get_consecutive_blocks(3, &[], &tx_options()).unwrap();
    add_blocks(&blockchain, &blocks).await;

    let unknown = Coin::new(Bytes32::new([6u8; 32]), anyone_can_spend_puzzle_hash(), 500);
    let bad = BT.get_consecutive_blocks(1, &blocks, &send(&unknown, Bytes32::new([1u8; 32]), 0)).unwrap();
    assert_invalid(&blockchain, &bad[3], ErrorCode::UnknownUnspent).await;

    let coin = spendable_coins(&blockchain).await[0];
    let mint = unsigned_bundle(&[(coin, vec![Condition::CreateCoin(Bytes32::new([1u8; 32]), coin.amount + 1)])])
        .unwrap();
    let bad = BT
        .get_consecutive_blocks(1, &blocks, &tx_options().with_transaction_data(mint))
        .unwrap();
    assert_invalid(&blockchain, &bad[3], ErrorCode::MintingCoin).await;
    assert_eq!(blockchain.get_peak_height(), Some(2));
}

#[tokio::test]
async fn test_tampered_transactions_info() {
    let blockchain = empty_blockchain().await;
    let blocks = BT.get_consecutive_blocks(3, &[], &tx_options()).unwrap();
    add_blocks(&blockchain, &blocks).await;
    let coin = spendable_coins(&blockchain).await[0];
    let blocks = BT
        .get_consecutive_blocks(1, &blocks, &send(&coin, Bytes32::new([2u8; 32]), 5000))
        .unwrap();
    let good = blocks[3].clone();

    let mut fees = good.clone();
    if let Some(ti) = fees.transactions_info.as_mut() {
        ti.fees += 1;
    }
    BT.sign_foliage(&mut fees).unwrap();
    assert_invalid(&blockchain, &fees, ErrorCode::InvalidBlockFeeAmount).await;

    let mut cost = good.clone();
    if let Some(ti) = cost.transactions_info.as_mut() {
        ti.cost += 1;
    }
    BT.sign_foliage(&mut cost).unwrap();
    assert_invalid(&blockchain, &cost, ErrorCode::InvalidBlockCost).await;

    let mut generator = good.clone();
    generator.transactions_generator = None;
    assert_invalid(&blockchain, &generator, ErrorCode::InvalidTransactionsGeneratorHash).await;

    let mut wrong_hash = good.clone();
    wrong_hash.foliage.foliage_transaction_block_hash = Some(Bytes32::new([0u8; 32]));
    assert_invalid(&blockchain, &wrong_hash, ErrorCode::InvalidPlotSignature).await;

    add_blocks(&blockchain, &[good]).await;
}

#[tokio::test]
async fn test_pre_validate_blocks() {
    let blockchain = empty_blockchain().await;
    let blocks = BT.get_consecutive_blocks(10, &[], &BlockOptions::default()).unwrap();
    let results = blockchain.pre_validate_blocks(&blocks, true).await.unwrap();
    assert_eq!(results.len(), blocks.len());
    assert!(results.iter().all(|r| r.error.is_none() && r.required_iters.is_some()));
    for (block, pre) in blocks.iter().zip(results.iter()) {
        let (result, error, _) = blockchain.receive_block(block, Some(pre)).await.unwrap();
        assert_eq!(result, ReceiveBlockResult::NewPeak, "{error:?}");
    }

    let more = BT.get_consecutive_blocks(4, &blocks, &BlockOptions::default()).unwrap();
    let mut batch = more[10..].to_vec();
    batch[1].reward_chain_block.total_iters += 1;
    let results = blockchain.pre_validate_blocks(&batch, true).await.unwrap();
    assert!(results[0].error.is_none());
    assert!(results[1..].iter().all(|r| r.error.is_some()));
}

#[tokio::test]
async fn test_genesis_then_reorg_from_height_ten() {
    let blockchain = empty_blockchain().await;
    let chain_a = BT.get_consecutive_blocks(15, &[], &BlockOptions::default()).unwrap();
    for block in &chain_a {
        assert_eq!(receive(&blockchain, block).await.0, ReceiveBlockResult::NewPeak);
    }
    assert_eq!(blockchain.get_peak_height(), Some(14));

    let chain_b = BT
        .get_consecutive_blocks(7, &chain_a[..10], &BlockOptions::default().with_seed(Bytes32::new([4u8; 32])))
        .unwrap();
    assert_eq!(chain_b.len(), 17);
    for block in &chain_b {
        let expected = match block.height() {
            0..=9 => ReceiveBlockResult::AlreadyHaveBlock,
            // Height 14 only ties the weight of chain A's peak.
            10..=14 => ReceiveBlockResult::AddedAsOrphan,
            _ => ReceiveBlockResult::NewPeak,
        };
        assert_eq!(receive(&blockchain, block).await.0, expected, "height {}", block.height());
    }
    assert_eq!(blockchain.get_peak_height(), Some(16));
    assert_eq!(blockchain.get_peak().unwrap().header_hash, chain_b[16].header_hash());
}

#[tokio::test]
async fn test_declared_block_cost() {
    let blockchain = empty_blockchain().await;
    let blocks = BT.get_consecutive_blocks(3, &[], &tx_options()).unwrap();
    add_blocks(&blockchain, &blocks).await;
    let coin = spendable_coins(&blockchain).await[0];
    let blocks = BT
        .get_consecutive_blocks(1, &blocks, &send(&coin, Bytes32::new([2u8; 32]), 0))
        .unwrap();
    let good = blocks[3].clone();
    let actual = good.transactions_info.as_ref().unwrap().cost;
    assert!(actual > 0);

    let with_cost = |cost: u64| {
        let mut block = good.clone();
        if let Some(ti) = block.transactions_info.as_mut() {
            ti.cost = cost;
        }
        BT.sign_foliage(&mut block).unwrap();
        block
    };
    assert_invalid(&blockchain, &with_cost(0), ErrorCode::InvalidBlockCost).await;
    assert_invalid(&blockchain, &with_cost(actual - 1), ErrorCode::GeneratorRuntimeError).await;
    assert_invalid(&blockchain, &with_cost(actual * 1000), ErrorCode::InvalidBlockCost).await;
    assert_invalid(
        &blockchain,
        &with_cost(CONSTANTS.max_block_cost_clvm + 1),
        ErrorCode::BlockCostExceedsMax,
    )
    .await;
    add_blocks(&blockchain, &[good]).await;
}

#[tokio::test]
async fn test_conflicting_spends_in_one_block() {
    let blockchain = empty_blockchain().await;
    let blocks = BT.get_consecutive_blocks(3, &[], &tx_options()).unwrap();
    add_blocks(&blockchain, &blocks).await;
    let coin = spendable_coins(&blockchain).await[0];

    let first = unsigned_bundle(&[(coin, vec![Condition::CreateCoin(Bytes32::new([1u8; 32]), coin.amount)])]).unwrap();
    let second = unsigned_bundle(&[(coin, vec![Condition::CreateCoin(Bytes32::new([2u8; 32]), coin.amount)])]).unwrap();
    let double = SpendBundle::aggregate(&[first, second]).unwrap();
    assert!(BT
        .get_consecutive_blocks(1, &blocks, &tx_options().with_transaction_data(double.clone()))
        .is_err());
    let bad = BT
        .get_consecutive_blocks(
            1,
            &blocks,
            &tx_options().with_transaction_data(double).without_transaction_checks(),
        )
        .unwrap();
    assert_invalid(&blockchain, &bad[3], ErrorCode::DoubleSpend).await;

    let to = Bytes32::new([3u8; 32]);
    let duplicate =
        unsigned_bundle(&[(coin, vec![Condition::CreateCoin(to, 1), Condition::CreateCoin(to, 1)])]).unwrap();
    let bad = BT
        .get_consecutive_blocks(
            1,
            &blocks,
            &tx_options().with_transaction_data(duplicate).without_transaction_checks(),
        )
        .unwrap();
    assert_invalid(&blockchain, &bad[3], ErrorCode::DuplicateOutput).await;
    assert_eq!(blockchain.get_peak_height(), Some(2));
    assert!(!blockchain.coin_store().get_coin_record(&coin.name()).await.unwrap().unwrap().spent());
}

#[tokio::test]
async fn test_transaction_data_presence() {
    let blockchain = empty_blockchain().await;
    let blocks = BT.get_consecutive_blocks(12, &[], &BlockOptions::default()).unwrap();
    let index = blocks
        .iter()
        .position(|b| !b.is_transaction_block())
        .expect("chain has a non-transaction block");
    add_blocks(&blockchain, &blocks[..index]).await;
    let mut bad = blocks[index].clone();
    bad.transactions_info = blocks[0].transactions_info.clone();
    assert_invalid(&blockchain, &bad, ErrorCode::NotBlockButHasData).await;
    add_blocks(&blockchain, &blocks[index..=index]).await;

    let blockchain = empty_blockchain().await;
    let blocks = BT.get_consecutive_blocks(3, &[], &tx_options()).unwrap();
    add_blocks(&blockchain, &blocks[..2]).await;
    let mut bad = blocks[2].clone();
    bad.transactions_info = None;
    assert_invalid(&blockchain, &bad, ErrorCode::IsTransactionBlockButNoData).await;
    add_blocks(&blockchain, &blocks[2..]).await;
}

#[tokio::test]
async fn test_generator_before_freeze_ends() {
    init_logger();
    let constants = ConsensusConstants {
        initial_freeze_period: 100,
        ..(**CONSTANTS).clone()
    };
    let blockchain = Blockchain::create(Arc::new(constants), BT.verifier(), memory_pool().await.unwrap())
        .await
        .unwrap();
    let blocks = BT.get_consecutive_blocks(3, &[], &tx_options()).unwrap();
    add_blocks(&blockchain, &blocks).await;
    let coin = spendable_coins(&blockchain).await[0];
    let blocks = BT
        .get_consecutive_blocks(1, &blocks, &send(&coin, Bytes32::new([2u8; 32]), 0))
        .unwrap();
    assert_invalid(&blockchain, &blocks[3], ErrorCode::InitialTransactionFreeze).await;
    let blocks = BT.get_consecutive_blocks(1, &blocks[..3], &tx_options()).unwrap();
    add_blocks(&blockchain, &blocks[3..]).await;
}

#[tokio::test]
async fn test_generator_ref_without_generator() {
    let blockchain = empty_blockchain().await;
    let blocks = BT.get_consecutive_blocks(3, &[], &tx_options()).unwrap();
    add_blocks(&blockchain, &blocks).await;
    let coin = spendable_coins(&blockchain).await[0];
    let blocks = BT
        .get_consecutive_blocks(1, &blocks, &send(&coin, Bytes32::new([2u8; 32]), 0))
        .unwrap();
    assert!(blocks[1].transactions_generator.is_none());
    let mut bad = blocks[3].clone();
    bad.transactions_generator_ref_list = vec![1];
    assert_invalid(&blockchain, &bad, ErrorCode::GeneratorRefHasNoGenerator).await;
    add_blocks(&blockchain, &blocks[3..]).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pre_validation_beside_block_intake() {
    let blockchain = empty_blockchain().await;
    let blocks = BT.get_consecutive_blocks(20, &[], &BlockOptions::default()).unwrap();
    add_blocks(&blockchain, &blocks[..10]).await;
    let fork = BT
        .get_consecutive_blocks(4, &blocks[..10], &BlockOptions::default().with_seed(Bytes32::new([6u8; 32])))
        .unwrap();

    let (results, ()) = tokio::join!(blockchain.pre_validate_blocks(&blocks[10..], true), async {
        for block in &fork[10..] {
            assert_eq!(receive(&blockchain, block).await.0, ReceiveBlockResult::NewPeak);
        }
    });
    let results = results.unwrap();
    assert_eq!(results.len(), 10);
    assert!(results.iter().all(|r| r.error.is_none()));
    assert_eq!(blockchain.get_peak().unwrap().header_hash, fork[13].header_hash());

    for (block, pre) in blocks[10..].iter().zip(results.iter()) {
        let (result, error, _) = blockchain.receive_block(block, Some(pre)).await.unwrap();
        assert_ne!(result, ReceiveBlockResult::InvalidBlock, "{error:?}");
    }
    assert_eq!(blockchain.get_peak().unwrap().header_hash, blocks[19].header_hash());
}
