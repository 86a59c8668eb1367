use dg_node_core::consensus::constants::ConsensusConstants;
use dg_node_core::consensus::pot_iterations::{
    calculate_ip_iters, calculate_iterations_quality, calculate_sp_iters, expected_plot_size,
    is_overflow_block,
};
use dg_node_core::utils::std_hash;
use lazy_static::lazy_static;
use num_traits::abs;
use std::collections::HashMap;

lazy_static! {
    static ref TEST_CONSTANTS: ConsensusConstants = ConsensusConstants {
        num_sps_sub_slot: 32,
        sub_slot_time_target: 300,
        ..Default::default()
    };
}

#[tokio::test]
async fn test_pot_iterations() {
    assert!(!is_overflow_block(&TEST_CONSTANTS, 27).unwrap());
    assert!(!is_overflow_block(&TEST_CONSTANTS, 28).unwrap());
    assert!(is_overflow_block(&TEST_CONSTANTS, 29).unwrap());
    assert!(is_overflow_block(&TEST_CONSTANTS, 30).unwrap());
    assert!(is_overflow_block(&TEST_CONSTANTS, 31).unwrap());
    assert!(is_overflow_block(&TEST_CONSTANTS, 32).is_err());
}

#[tokio::test]
async fn test_calculate_sp_iters() {
    let ssi: u64 = 100001 * 64 * 4;
    assert!(calculate_sp_iters(&TEST_CONSTANTS, ssi, 32).is_err());
    assert!(calculate_sp_iters(&TEST_CONSTANTS, ssi, 31).is_ok());
}

#[tokio::test]
async fn test_calculate_ip_iters() {
    let ssi: u64 = 100001 * 64 * 4;
    let sp_interval_iters = ssi / u64::from(TEST_CONSTANTS.num_sps_sub_slot);
    let extra = TEST_CONSTANTS.num_sp_intervals_extra;
    //Invalid signage point index
    assert!(calculate_ip_iters(&TEST_CONSTANTS, ssi, 123, 100000).is_err());
    let mut sp_iters = sp_interval_iters * 13;
    //required_iters too high
    assert!(calculate_ip_iters(&TEST_CONSTANTS, ssi, 8, sp_interval_iters).is_err());
    assert!(calculate_ip_iters(&TEST_CONSTANTS, ssi, 8, sp_interval_iters * 12).is_err());
    //required_iters too low (0)
    assert!(calculate_ip_iters(&TEST_CONSTANTS, ssi, 8, 0).is_err());

    for required_iters in [sp_interval_iters - 1, 1, ssi * 4 / 300] {
        let ip_iters = calculate_ip_iters(&TEST_CONSTANTS, ssi, 13, required_iters).unwrap();
        assert_eq!(ip_iters, sp_iters + extra * sp_interval_iters + required_iters);
        assert!(sp_iters < ip_iters);
    }

    //Overflow
    let required_iters = ssi * 4 / 300;
    let last_sp = (TEST_CONSTANTS.num_sps_sub_slot - 1) as u8;
    sp_iters = sp_interval_iters * u64::from(last_sp);
    let ip_iters = calculate_ip_iters(&TEST_CONSTANTS, ssi, last_sp, required_iters).unwrap();
    assert_eq!(
        ip_iters,
        (sp_iters + extra * sp_interval_iters + required_iters) % ssi
    );
    assert!(sp_iters > ip_iters);
}

#[tokio::test]
async fn test_win_percentage() {
    // Blocks won should track each farmer's share of space, given equal VDF speed.
    let farmer_ks = HashMap::from([(32u8, 100), (33, 100), (34, 100), (35, 100), (36, 100)]);
    let farmer_space: HashMap<u8, u64> = farmer_ks
        .keys()
        .map(|k| (*k, expected_plot_size(*k)))
        .collect();
    let total_space = farmer_space.values().sum::<u64>();
    let mut wins: HashMap<u8, i32> = farmer_ks.keys().map(|k| (*k, 0)).collect();
    let total_slots = 50u32;
    let num_sps = 16u32;
    let sp_interval_iters = 100000000u64 / 32;
    let difficulty = 500000000000u64;
    for slot_index in 0..total_slots {
        for sp_index in 0..num_sps {
            let sp_hash = std_hash(
                slot_index
                    .to_be_bytes()
                    .into_iter()
                    .chain(sp_index.to_be_bytes())
                    .collect::<Vec<u8>>(),
            );
            for (k, count) in &farmer_ks {
                for farmer_index in 0i32..*count {
                    let quality = std_hash(
                        slot_index
                            .to_be_bytes()
                            .into_iter()
                            .chain(k.to_be_bytes())
                            .chain(farmer_index.to_be_bytes())
                            .collect::<Vec<u8>>(),
                    );
                    let required_iters = calculate_iterations_quality(
                        2u128.pow(25),
                        &quality,
                        *k,
                        difficulty,
                        &sp_hash,
                    );
                    if required_iters < sp_interval_iters {
                        *wins.get_mut(k).unwrap() += 1;
                    }
                }
            }
        }
    }
    let total_wins = wins.values().sum::<i32>() as f64;
    for (k, space) in &farmer_space {
        let win_percentage = wins[k] as f64 / total_wins;
        let space_percentage = *space as f64 / total_space as f64;
        //Win rate is proportional to percentage of space
        assert!(abs(win_percentage - space_percentage) < 0.01);
    }
}
