use crate::common::{memory_node, respond_all, spendable_coins, BT, CONSTANTS};
use dg_full_node::full_node::FullNode;
use dg_full_node::mempool::{MempoolInclusionStatus, MEMPOOL_MIN_FEE_INCREASE};
use dg_node_core::blockchain::coin::Coin;
use dg_node_core::blockchain::full_block::FullBlock;
use dg_node_core::blockchain::sized_bytes::Bytes32;
use dg_node_core::blockchain::spend_bundle::SpendBundle;
use dg_node_core::bls::INFINITY_SIGNATURE;
use dg_node_core::errors::ErrorCode;
use dg_node_simulator::block_tools::BlockOptions;
use dg_node_simulator::keys::derive_secret_key;
use dg_node_simulator::wallet::{
    anyone_can_spend_puzzle_hash, unsigned_bundle, Condition, SimulatedWallet,
};

fn pay(coin: &Coin, to: Bytes32, fee: u64) -> SpendBundle {
    unsigned_bundle(&[(*coin, vec![Condition::CreateCoin(to, coin.amount - fee)])]).unwrap()
}

fn tx_options() -> BlockOptions {
    BlockOptions::default().guarantee_transaction_block()
}

/// Node with a few transaction blocks, so the prefarm is spendable.
async fn funded_node() -> (FullNode, Vec<FullBlock>, Vec<Coin>) {
    let node = memory_node().await;
    let blocks = BT.get_consecutive_blocks(3, &[], &tx_options()).unwrap();
    respond_all(&node, &blocks).await;
    let coins = spendable_coins(node.blockchain()).await;
    assert!(coins.len() >= 2);
    (node, blocks, coins)
}

async fn farm(node: &FullNode, blocks: &[FullBlock], options: &BlockOptions) -> Vec<FullBlock> {
    let blocks = BT.get_consecutive_blocks(1, blocks, options).unwrap();
    respond_all(node, &blocks[blocks.len() - 1..]).await;
    blocks
}

async fn rejected(node: &FullNode, bundle: SpendBundle) -> ErrorCode {
    node.add_spend_bundle(bundle).await.unwrap_err().code
}

#[tokio::test]
async fn test_admit_and_confirm() {
    let (node, blocks, coins) = funded_node().await;
    let bundle = pay(&coins[0], Bytes32::new([1u8; 32]), 1000);
    let name = bundle.name();
    assert_eq!(
        node.add_spend_bundle(bundle.clone()).await.unwrap(),
        MempoolInclusionStatus::Success
    );
    assert_eq!(
        node.add_spend_bundle(bundle.clone()).await.unwrap(),
        MempoolInclusionStatus::Success
    );
    let item = node.get_mempool_item(&name).await.unwrap();
    assert_eq!(item.fee, 1000);
    assert_eq!(item.removals, vec![coins[0].name()]);
    assert_eq!(node.mempool().lock().await.size(), 1);

    let (block_bundle, fees) = node.get_block_bundle().await.unwrap();
    assert_eq!(fees, 1000);
    assert_eq!(block_bundle.coin_spends, bundle.coin_spends);

    farm(&node, &blocks, &tx_options().with_transaction_data(block_bundle)).await;
    assert!(node.get_mempool_item(&name).await.is_none());
    assert_eq!(node.mempool().lock().await.total_cost(), 0);
    assert_eq!(
        rejected(&node, pay(&coins[0], Bytes32::new([2u8; 32]), 0)).await,
        ErrorCode::DoubleSpend
    );
}

#[tokio::test]
async fn test_rejections() {
    let (node, _, coins) = funded_node().await;
    let coin = coins[0];
    let mint = unsigned_bundle(&[(coin, vec![Condition::CreateCoin(Bytes32::new([1u8; 32]), coin.amount + 1)])])
        .unwrap();
    assert_eq!(rejected(&node, mint).await, ErrorCode::MintingCoin);

    let twice = unsigned_bundle(&[
        (coin, vec![Condition::CreateCoin(Bytes32::new([1u8; 32]), 1)]),
        (coin, vec![Condition::CreateCoin(Bytes32::new([2u8; 32]), 1)]),
    ])
    .unwrap();
    assert_eq!(rejected(&node, twice).await, ErrorCode::DoubleSpend);

    let locked = unsigned_bundle(&[(coin, vec![Condition::AssertHeightAbsolute(1_000)])]).unwrap();
    assert_eq!(rejected(&node, locked).await, ErrorCode::AssertHeightAbsoluteFailed);

    let fee = unsigned_bundle(&[(
        coin,
        vec![
            Condition::CreateCoin(Bytes32::new([1u8; 32]), coin.amount - 5),
            Condition::ReserveFee(10),
        ],
    )])
    .unwrap();
    assert_eq!(rejected(&node, fee).await, ErrorCode::ReserveFeeConditionFailed);

    assert_eq!(
        rejected(&node, SpendBundle::default()).await,
        ErrorCode::InvalidSpendBundle
    );

    node.sync_store().set_sync_mode(true);
    assert_eq!(
        rejected(&node, pay(&coin, Bytes32::new([1u8; 32]), 0)).await,
        ErrorCode::NoTransactionsWhileSyncing
    );
    node.sync_store().set_sync_mode(false);
    assert_eq!(node.mempool().lock().await.size(), 0);
}

#[tokio::test]
async fn test_signed_spends() {
    let (node, blocks, coins) = funded_node().await;
    let wallet = SimulatedWallet::new(
        derive_secret_key(b"mempool wallet", 0).unwrap(),
        &CONSTANTS.agg_sig_me_additional_data,
    );
    farm(
        &node,
        &blocks,
        &tx_options().with_transaction_data(pay(&coins[0], wallet.puzzle_hash(), 0)),
    )
    .await;
    let locked = node
        .get_coin_records_by_puzzle_hash(&wallet.puzzle_hash(), false, None)
        .await
        .unwrap()[0]
        .coin;

    let mut forged = wallet
        .bundle(&[(locked, vec![Condition::CreateCoin(Bytes32::new([3u8; 32]), locked.amount)])])
        .unwrap();
    forged.aggregated_signature = INFINITY_SIGNATURE;
    assert_eq!(rejected(&node, forged).await, ErrorCode::BadAggregateSignature);

    let signed = wallet
        .bundle(&[(locked, vec![Condition::CreateCoin(Bytes32::new([3u8; 32]), locked.amount)])])
        .unwrap();
    assert_eq!(
        node.add_spend_bundle(signed).await.unwrap(),
        MempoolInclusionStatus::Success
    );

    // Another puzzle names another coin, which the chain does not have.
    let stranger = unsigned_bundle(&[(locked, vec![])]).unwrap();
    assert_eq!(
        node.add_spend_bundle(stranger).await.unwrap(),
        MempoolInclusionStatus::Pending
    );
}

#[tokio::test]
async fn test_conflicts_and_replacement() {
    let (node, _, coins) = funded_node().await;
    let (a, b) = (coins[0], coins[1]);
    let first = pay(&a, Bytes32::new([1u8; 32]), 10);
    node.add_spend_bundle(first.clone()).await.unwrap();

    let cheap = pay(&a, Bytes32::new([2u8; 32]), 20);
    assert_eq!(rejected(&node, cheap).await, ErrorCode::MempoolConflict);

    let replacement = pay(&a, Bytes32::new([3u8; 32]), 10 + MEMPOOL_MIN_FEE_INCREASE);
    assert_eq!(
        node.add_spend_bundle(replacement.clone()).await.unwrap(),
        MempoolInclusionStatus::Success
    );
    assert!(node.get_mempool_item(&first.name()).await.is_none());
    assert!(node.get_mempool_item(&replacement.name()).await.is_some());

    let both = unsigned_bundle(&[
        (a, vec![Condition::CreateCoin(Bytes32::new([4u8; 32]), a.amount - 10 * MEMPOOL_MIN_FEE_INCREASE)]),
        (b, vec![Condition::CreateCoin(Bytes32::new([4u8; 32]), b.amount)]),
    ])
    .unwrap();
    assert_eq!(
        node.add_spend_bundle(both.clone()).await.unwrap(),
        MempoolInclusionStatus::Success
    );
    assert!(node.get_mempool_item(&replacement.name()).await.is_none());

    let partial = pay(&b, Bytes32::new([5u8; 32]), 100 * MEMPOOL_MIN_FEE_INCREASE);
    assert_eq!(rejected(&node, partial).await, ErrorCode::MempoolConflict);
    let mempool = node.mempool().lock().await;
    assert_eq!(mempool.size(), 1);
    assert_eq!(mempool.items_spending(&b.name()), vec![both.name()]);
}

#[tokio::test]
async fn test_pending_until_coin_exists() {
    let (node, blocks, coins) = funded_node().await;
    let parent = pay(&coins[0], anyone_can_spend_puzzle_hash(), 0);
    let child = Coin::new(coins[0].name(), anyone_can_spend_puzzle_hash(), coins[0].amount);
    let spend_child = pay(&child, Bytes32::new([6u8; 32]), 100);

    assert_eq!(
        node.add_spend_bundle(spend_child.clone()).await.unwrap(),
        MempoolInclusionStatus::Pending
    );
    assert_eq!(node.mempool().lock().await.pending_count(), 1);
    assert!(node.get_mempool_item(&spend_child.name()).await.is_none());

    farm(&node, &blocks, &tx_options().with_transaction_data(parent)).await;
    assert_eq!(node.mempool().lock().await.pending_count(), 0);
    let item = node.get_mempool_item(&spend_child.name()).await.unwrap();
    assert_eq!(item.fee, 100);
}

#[tokio::test]
async fn test_reorg_rechecks_items() {
    let (node, blocks, coins) = funded_node().await;
    let blocks = BT.get_consecutive_blocks(2, &blocks, &tx_options()).unwrap();
    respond_all(&node, &blocks[3..]).await;
    let kept = pay(&coins[0], Bytes32::new([1u8; 32]), 50);
    let dropped = pay(&coins[1], Bytes32::new([2u8; 32]), 50);
    node.add_spend_bundle(kept.clone()).await.unwrap();
    node.add_spend_bundle(dropped.clone()).await.unwrap();

    // The heavier fork spends one of the coins differently.
    let fork = BT
        .get_consecutive_blocks(
            3,
            &blocks[..3],
            &tx_options()
                .with_seed(Bytes32::new([4u8; 32]))
                .with_transaction_data(pay(&coins[1], Bytes32::new([3u8; 32]), 0)),
        )
        .unwrap();
    let mut peaks = node.subscribe();
    for block in &fork[3..] {
        node.respond_block(block).await.unwrap();
    }
    assert_eq!(node.get_peak().unwrap().header_hash, fork[5].header_hash());
    let changed = peaks.recv().await.unwrap();
    assert_eq!(changed.fork_height, Some(2));
    assert!(node.get_mempool_item(&kept.name()).await.is_some());
    assert!(node.get_mempool_item(&dropped.name()).await.is_none());
}

#[tokio::test]
async fn test_reorg_drops_bundles_on_abandoned_coins() {
    let (node, blocks, coins) = funded_node().await;
    let child = Coin::new(coins[0].name(), anyone_can_spend_puzzle_hash(), coins[0].amount);
    farm(
        &node,
        &blocks,
        &tx_options().with_transaction_data(pay(&coins[0], anyone_can_spend_puzzle_hash(), 0)),
    )
    .await;
    let spend_child = pay(&child, Bytes32::new([6u8; 32]), 100);
    assert_eq!(
        node.add_spend_bundle(spend_child.clone()).await.unwrap(),
        MempoolInclusionStatus::Success
    );

    let fork = BT
        .get_consecutive_blocks(3, &blocks, &tx_options().with_seed(Bytes32::new([5u8; 32])))
        .unwrap();
    for block in &fork[3..] {
        node.respond_block(block).await.unwrap();
    }
    assert_eq!(node.get_peak().unwrap().header_hash, fork[5].header_hash());
    assert!(node.get_mempool_item(&spend_child.name()).await.is_none());
    assert_eq!(node.mempool().lock().await.pending_count(), 0);
}
