pub const MOJO_PER_COIN: u64 = 1_000_000_000_000;
pub const BLOCKS_PER_YEAR: u32 = 1_681_920;

/// The pool earns 7/8 of the block reward, halving every three years of blocks.
/// Height 0 carries the prefarm.
#[must_use]
pub const fn calculate_pool_reward(height: u32) -> u64 {
    if height == 0 {
        (7 * MOJO_PER_COIN / 8) * 21_000_000
    } else if height < 3 * BLOCKS_PER_YEAR {
        7 * MOJO_PER_COIN / 4
    } else if height < 6 * BLOCKS_PER_YEAR {
        7 * MOJO_PER_COIN / 8
    } else if height < 9 * BLOCKS_PER_YEAR {
        7 * MOJO_PER_COIN / 16
    } else if height < 12 * BLOCKS_PER_YEAR {
        7 * MOJO_PER_COIN / 32
    } else {
        7 * MOJO_PER_COIN / 64
    }
}

/// The farmer's 1/8 share, not counting fees.
#[must_use]
pub const fn calculate_base_farmer_reward(height: u32) -> u64 {
    if height == 0 {
        (MOJO_PER_COIN / 8) * 21_000_000
    } else if height < 3 * BLOCKS_PER_YEAR {
        MOJO_PER_COIN / 4
    } else if height < 6 * BLOCKS_PER_YEAR {
        MOJO_PER_COIN / 8
    } else if height < 9 * BLOCKS_PER_YEAR {
        MOJO_PER_COIN / 16
    } else if height < 12 * BLOCKS_PER_YEAR {
        MOJO_PER_COIN / 32
    } else {
        MOJO_PER_COIN / 64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reward_heights() {
        assert_eq!(calculate_pool_reward(0), 18_375_000_000_000_000_000);
        assert_eq!(calculate_pool_reward(1), 1_750_000_000_000);
        assert_eq!(calculate_pool_reward(3 * BLOCKS_PER_YEAR), 875_000_000_000);
        assert_eq!(calculate_pool_reward(12 * BLOCKS_PER_YEAR), 109_375_000_000);
        assert_eq!(calculate_base_farmer_reward(0), 2_625_000_000_000_000_000);
        assert_eq!(calculate_base_farmer_reward(1), 250_000_000_000);
        assert_eq!(calculate_base_farmer_reward(9 * BLOCKS_PER_YEAR), 31_250_000_000);
        for height in [1, 3 * BLOCKS_PER_YEAR, 6 * BLOCKS_PER_YEAR, 12 * BLOCKS_PER_YEAR] {
            let total = calculate_base_farmer_reward(height) + calculate_pool_reward(height);
            assert_eq!(total % (MOJO_PER_COIN / 64), 0);
        }
        assert_eq!(
            calculate_base_farmer_reward(BLOCKS_PER_YEAR) + calculate_pool_reward(BLOCKS_PER_YEAR),
            2_000_000_000_000
        );
    }
}
