use crate::common::{add_blocks, assert_invalid, empty_blockchain, BT, CONSTANTS};
use dg_node_core::blockchain::full_block::FullBlock;
use dg_node_core::blockchain::infused_challenge_chain_subslot::InfusedChallengeChainSubSlot;
use dg_node_core::blockchain::sized_bytes::Bytes32;
use dg_node_core::blockchain::subslot_bundle::SubSlotBundle;
use dg_node_core::errors::ErrorCode;
use dg_node_core::utils::{now_unix_secs, Hashable};
use dg_node_simulator::block_tools::BlockOptions;

fn with_last_slot(block: &FullBlock, tamper: impl FnOnce(&mut SubSlotBundle)) -> FullBlock {
    let mut block = block.clone();
    if let Some(slot) = block.finished_sub_slots.last_mut() {
        tamper(slot);
    }
    block
}

/// Keeps the reward sub-slot committed to a changed challenge sub-slot.
fn recommit_challenge_slot(slot: &mut SubSlotBundle) {
    slot.reward_chain.challenge_chain_sub_slot_hash = slot.challenge_chain.get_hash();
}

#[tokio::test]
async fn test_signage_point_and_proof_of_space() {
    let blockchain = empty_blockchain().await;
    let blocks = BT.get_consecutive_blocks(4, &[], &BlockOptions::default()).unwrap();
    add_blocks(&blockchain, &blocks[..3]).await;
    let good = &blocks[3];

    let mut bad = good.clone();
    bad.reward_chain_block.signage_point_index = u8::try_from(CONSTANTS.num_sps_sub_slot).unwrap();
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidSpIndex).await;

    let mut bad = good.clone();
    bad.reward_chain_block.total_iters += 1;
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidTotalIters).await;

    let mut bad = good.clone();
    bad.reward_chain_block.proof_of_space.challenge = Bytes32::new([0u8; 32]);
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidPospace).await;

    add_blocks(&blockchain, &blocks[3..]).await;
}

#[tokio::test]
async fn test_genesis_sub_slot_fields() {
    let blockchain = empty_blockchain().await;
    let genesis = BT
        .get_consecutive_blocks(1, &[], &BlockOptions::default().with_skip_slots(1))
        .unwrap()
        .remove(0);
    assert!(!genesis.finished_sub_slots.is_empty());

    let bad = with_last_slot(&genesis, |slot| {
        slot.infused_challenge_chain = Some(InfusedChallengeChainSubSlot {
            infused_challenge_chain_end_of_slot_vdf: slot.reward_chain.end_of_slot_vdf.clone(),
        });
    });
    assert_invalid(&blockchain, &bad, ErrorCode::ShouldNotHaveIcc).await;

    let bad = with_last_slot(&genesis, |slot| slot.reward_chain.deficit = 0);
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidDeficit).await;

    let bad = with_last_slot(&genesis, |slot| {
        slot.challenge_chain.new_sub_slot_iters = Some(CONSTANTS.sub_slot_iters_starting * 2);
    });
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidNewSubSlotIters).await;

    let bad = with_last_slot(&genesis, |slot| {
        slot.challenge_chain.new_difficulty = Some(CONSTANTS.difficulty_starting * 2);
    });
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidNewDifficulty).await;

    let bad = with_last_slot(&genesis, |slot| {
        slot.challenge_chain.subepoch_summary_hash = Some(Bytes32::new([1u8; 32]));
        recommit_challenge_slot(slot);
    });
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidSubEpochSummaryHash).await;

    let bad = with_last_slot(&genesis, |slot| {
        slot.reward_chain.end_of_slot_vdf.number_of_iterations += 1;
    });
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidRcEosVdf).await;

    let bad = with_last_slot(&genesis, |slot| {
        slot.challenge_chain.challenge_chain_end_of_slot_vdf.number_of_iterations += 1;
        recommit_challenge_slot(slot);
    });
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidCcEosVdf).await;

    add_blocks(&blockchain, &[genesis]).await;
}

#[tokio::test]
async fn test_infused_challenge_sub_slot() {
    let blockchain = empty_blockchain().await;
    let blocks = BT.get_consecutive_blocks(4, &[], &BlockOptions::default()).unwrap();
    add_blocks(&blockchain, &blocks).await;
    let blocks = BT
        .get_consecutive_blocks(1, &blocks, &BlockOptions::default().with_skip_slots(1))
        .unwrap();
    let good = &blocks[4];
    assert!(good.finished_sub_slots[0].infused_challenge_chain.is_some());

    let mut bad = good.clone();
    bad.finished_sub_slots[0].infused_challenge_chain = None;
    assert_invalid(&blockchain, &bad, ErrorCode::ShouldHaveIcc).await;

    let mut bad = good.clone();
    if let Some(icc) = bad.finished_sub_slots[0].infused_challenge_chain.as_mut() {
        icc.infused_challenge_chain_end_of_slot_vdf.number_of_iterations += 1;
    }
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidIccEosVdf).await;

    add_blocks(&blockchain, &blocks[4..]).await;
}

#[tokio::test]
async fn test_signage_and_infusion_vdfs() {
    let blockchain = empty_blockchain().await;
    let blocks = BT.get_consecutive_blocks(12, &[], &BlockOptions::default()).unwrap();
    let index = (1..blocks.len())
        .find(|i| {
            let rcb = &blocks[*i].reward_chain_block;
            rcb.challenge_chain_sp_vdf.is_some() && rcb.infused_challenge_chain_ip_vdf.is_some()
        })
        .expect("chain has a block with signage point and icc vdfs");
    add_blocks(&blockchain, &blocks[..index]).await;
    let good = &blocks[index];

    let mut bad = good.clone();
    bad.reward_chain_block.challenge_chain_ip_vdf.number_of_iterations += 1;
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidCcIpVdf).await;

    let mut bad = good.clone();
    bad.reward_chain_block.reward_chain_ip_vdf.number_of_iterations += 1;
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidRcIpVdf).await;

    let mut bad = good.clone();
    if let Some(vdf) = bad.reward_chain_block.infused_challenge_chain_ip_vdf.as_mut() {
        vdf.number_of_iterations += 1;
    }
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidIccVdf).await;

    let mut bad = good.clone();
    if let Some(vdf) = bad.reward_chain_block.challenge_chain_sp_vdf.as_mut() {
        vdf.number_of_iterations += 1;
    }
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidCcSpVdf).await;

    let mut bad = good.clone();
    if let Some(vdf) = bad.reward_chain_block.reward_chain_sp_vdf.as_mut() {
        vdf.number_of_iterations += 1;
    }
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidRcSpVdf).await;

    add_blocks(&blockchain, &blocks[index..]).await;
}

#[tokio::test]
async fn test_foliage_commitments() {
    let blockchain = empty_blockchain().await;
    let options = BlockOptions::default().guarantee_transaction_block();
    let blocks = BT.get_consecutive_blocks(4, &[], &options).unwrap();

    let mut bad = blocks[0].clone();
    bad.foliage.foliage_block_data.farmer_reward_puzzle_hash = Bytes32::new([3u8; 32]);
    BT.sign_foliage(&mut bad).unwrap();
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidPrefarm).await;

    add_blocks(&blockchain, &blocks[..3]).await;
    let good = &blocks[3];

    let mut bad = good.clone();
    bad.foliage.foliage_block_data.unfinished_reward_block_hash = Bytes32::new([0u8; 32]);
    BT.sign_foliage(&mut bad).unwrap();
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidUrsbHash).await;

    let mut bad = good.clone();
    bad.foliage.foliage_block_data.pool_target.max_height = 1;
    BT.sign_foliage(&mut bad).unwrap();
    assert_invalid(&blockchain, &bad, ErrorCode::OldPoolTarget).await;

    let mut bad = good.clone();
    if let Some(ftb) = bad.foliage_transaction_block.as_mut() {
        ftb.timestamp = now_unix_secs() + CONSTANTS.max_future_time + 3600;
    }
    BT.sign_foliage(&mut bad).unwrap();
    assert_invalid(&blockchain, &bad, ErrorCode::TimestampTooFarInFuture).await;

    let prev_timestamp = blocks[2].foliage_transaction_block.as_ref().unwrap().timestamp;
    let mut bad = good.clone();
    if let Some(ftb) = bad.foliage_transaction_block.as_mut() {
        ftb.timestamp = prev_timestamp - 1;
    }
    BT.sign_foliage(&mut bad).unwrap();
    assert_invalid(&blockchain, &bad, ErrorCode::TimestampTooFarInPast).await;

    add_blocks(&blockchain, &blocks[3..]).await;
}

#[tokio::test]
async fn test_sub_epoch_summary() {
    let blockchain = empty_blockchain().await;
    let options = BlockOptions::default();
    let mut blocks = BT.get_consecutive_blocks(CONSTANTS.sub_epoch_blocks, &[], &options).unwrap();
    let index = loop {
        let found = blocks.iter().position(|b| {
            b.finished_sub_slots
                .first()
                .is_some_and(|slot| slot.challenge_chain.subepoch_summary_hash.is_some())
        });
        if let Some(index) = found {
            break index;
        }
        assert!(blocks.len() < 3 * CONSTANTS.sub_epoch_blocks as usize, "no sub-epoch summary");
        blocks = BT.get_consecutive_blocks(10, &blocks, &options).unwrap();
    };
    add_blocks(&blockchain, &blocks[..index]).await;
    let good = &blocks[index];

    let mut bad = good.clone();
    let slot = &mut bad.finished_sub_slots[0];
    slot.challenge_chain.subepoch_summary_hash = None;
    recommit_challenge_slot(slot);
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidSubEpochSummary).await;

    let mut bad = good.clone();
    let slot = &mut bad.finished_sub_slots[0];
    slot.challenge_chain.subepoch_summary_hash = Some(Bytes32::new([1u8; 32]));
    recommit_challenge_slot(slot);
    assert_invalid(&blockchain, &bad, ErrorCode::InvalidSubEpochSummary).await;

    add_blocks(&blockchain, &blocks[index..=index]).await;
    assert!(blockchain
        .get_peak()
        .unwrap()
        .sub_epoch_summary_included
        .is_some());
}
